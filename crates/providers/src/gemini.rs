use crate::{ProviderError, VisionProvider, VisionRequest};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

#[derive(Clone)]
pub struct GeminiProvider {
    client: Client,
    cfg: Arc<GeminiConfig>,
}

impl GeminiProvider {
    pub fn new(cfg: GeminiConfig) -> Result<Self, ProviderError> {
        if cfg.api_key.trim().is_empty() {
            return Err(ProviderError::MissingCredential("GOOGLE_API_KEY"));
        }
        Ok(Self {
            client: Client::new(),
            cfg: Arc::new(cfg),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.cfg.base_url.trim_end_matches('/'),
            self.cfg.model
        )
    }
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    Inline { inline_data: InlineData },
}

#[derive(Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

fn build_body(request: &VisionRequest) -> GenerateRequest {
    let mut parts = Vec::with_capacity(request.attachments.len() + 1);
    parts.push(Part::Text {
        text: request.instruction.clone(),
    });
    for att in &request.attachments {
        parts.push(Part::Inline {
            inline_data: InlineData {
                mime_type: att.mime_type.clone(),
                data: att.base64(),
            },
        });
    }
    GenerateRequest {
        contents: vec![Content { role: "user", parts }],
    }
}

fn answer_text(parsed: GenerateResponse) -> Result<String, ProviderError> {
    let text: String = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(ProviderError::EmptyResponse);
    }
    Ok(text)
}

#[async_trait::async_trait]
impl VisionProvider for GeminiProvider {
    async fn submit(&self, request: &VisionRequest) -> Result<String, ProviderError> {
        let body = build_body(request);
        debug!(
            model = %self.cfg.model,
            attachments = request.attachments.len(),
            "gemini generateContent"
        );

        let resp = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Status { status, body });
        }

        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        answer_text(parsed)
    }

    fn model_name(&self) -> &str {
        &self.cfg.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Attachment;

    #[test]
    fn body_puts_instruction_before_images() {
        let req = VisionRequest::new("describe")
            .with_attachment(Attachment::new("image/png", vec![1u8, 2, 3]));
        let json = serde_json::to_value(build_body(&req)).unwrap();
        let parts = &json["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], "describe");
        assert_eq!(parts[1]["inline_data"]["mime_type"], "image/png");
        assert_eq!(parts[1]["inline_data"]["data"], "AQID");
    }

    #[test]
    fn answer_joins_text_parts() {
        let parsed: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"{\"products\":"},{"text":"[]}"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(answer_text(parsed).unwrap(), r#"{"products":[]}"#);
    }

    #[test]
    fn blank_answer_is_an_error() {
        let parsed: GenerateResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert!(matches!(answer_text(parsed), Err(ProviderError::EmptyResponse)));
    }

    #[test]
    fn missing_key_is_rejected() {
        let err = GeminiProvider::new(GeminiConfig {
            api_key: " ".into(),
            base_url: DEFAULT_BASE_URL.into(),
            model: "gemini-1.5-flash".into(),
        })
        .err()
        .unwrap();
        assert!(matches!(err, ProviderError::MissingCredential(_)));
    }
}
