//! Provider abstractions for multimodal vision models.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub mod gemini;
pub mod openai;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("status {status} body {body}")]
    Status { status: u16, body: String },
    #[error("model returned an empty response")]
    EmptyResponse,
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

/// One inline payload sent alongside the instruction.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub mime_type: String,
    pub data: Bytes,
}

impl Attachment {
    pub fn new(mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    pub fn base64(&self) -> String {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine;
        STANDARD.encode(&self.data)
    }
}

/// A single model call: an instruction followed by ordered attachments.
#[derive(Debug, Clone, Default)]
pub struct VisionRequest {
    pub instruction: String,
    pub attachments: Vec<Attachment>,
}

impl VisionRequest {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

#[async_trait::async_trait]
pub trait VisionProvider: Send + Sync {
    /// Submits the request and returns the raw text answer of the model.
    async fn submit(&self, request: &VisionRequest) -> Result<String, ProviderError>;

    /// Cheap text-only round trip used as a connectivity check.
    async fn ping(&self) -> Result<(), ProviderError> {
        self.submit(&VisionRequest::new("Connection test. Reply with OK."))
            .await
            .map(|_| ())
    }

    fn model_name(&self) -> &str;
}

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    vision: HashMap<String, Arc<dyn VisionProvider>>,
    pub preferred: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vision(mut self, name: &str, provider: Arc<dyn VisionProvider>) -> Self {
        self.vision.insert(name.to_string(), provider);
        self
    }

    pub fn set_preferred(mut self, name: &str) -> Self {
        self.preferred = Some(name.to_string());
        self
    }

    pub fn vision(&self, name: Option<&str>) -> Result<Arc<dyn VisionProvider>, ProviderError> {
        let key = name
            .map(str::to_string)
            .or_else(|| self.preferred.clone())
            .ok_or_else(|| ProviderError::UnknownProvider("no vision provider configured".into()))?;
        self.vision
            .get(&key)
            .cloned()
            .ok_or(ProviderError::UnknownProvider(key))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.vision.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait::async_trait]
    impl VisionProvider for Echo {
        async fn submit(&self, request: &VisionRequest) -> Result<String, ProviderError> {
            Ok(format!("{}:{}", request.instruction, request.attachments.len()))
        }

        fn model_name(&self) -> &str {
            "echo"
        }
    }

    #[test]
    fn registry_resolves_preferred_provider() {
        let reg = ProviderRegistry::new()
            .with_vision("echo", Arc::new(Echo))
            .set_preferred("echo");
        assert_eq!(reg.vision(None).unwrap().model_name(), "echo");
        assert!(matches!(
            reg.vision(Some("missing")),
            Err(ProviderError::UnknownProvider(name)) if name == "missing"
        ));
        assert_eq!(reg.names(), vec!["echo"]);
    }

    #[test]
    fn empty_registry_has_no_default() {
        let reg = ProviderRegistry::new();
        assert!(reg.vision(None).is_err());
    }

    #[test]
    fn attachment_encodes_base64() {
        let att = Attachment::new("image/png", vec![0u8, 1, 2]);
        assert_eq!(att.base64(), "AAEC");
    }

    #[tokio::test]
    async fn default_ping_uses_submit() {
        assert!(Echo.ping().await.is_ok());
        let req = VisionRequest::new("hi").with_attachment(Attachment::new("image/jpeg", vec![1u8]));
        assert_eq!(Echo.submit(&req).await.unwrap(), "hi:1");
    }
}
