use providers::{Attachment, ProviderError, VisionProvider, VisionRequest};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::models::{ImageRef, ProductFields, ProductRecord, FIELD_DESCRIPTIONS, FIELD_NAMES};
use crate::retry::RetryPolicy;
use crate::scanner::mime_type_for;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed JSON response: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("response has no \"products\" array")]
    MissingProducts,
}

pub fn build_prompt(image_count: usize) -> String {
    let fields = FIELD_NAMES
        .iter()
        .zip(FIELD_DESCRIPTIONS)
        .map(|(name, desc)| format!("- {name}: {desc}"))
        .collect::<Vec<_>>()
        .join("\n");
    let example = FIELD_NAMES
        .iter()
        .map(|name| format!("      \"{name}\": \"...\""))
        .collect::<Vec<_>>()
        .join(",\n");
    format!(
        r#"Analyze these {image_count} product images and extract the following information for each product, one product per image, in the order the images were given.

FIELDS TO EXTRACT:
{fields}

INSTRUCTIONS:
1. Return valid JSON with a "products" array.
2. Every product must contain all of the fields above.
3. If a value is not visible or not legible, use "Not detected".
4. For source_information use "Readable" when everything is clear, "Partially readable" otherwise.
5. Return a single JSON object and nothing else.

EXPECTED FORMAT:
{{
  "products": [
    {{
{example}
    }}
  ]
}}"#
    )
}

/// Removes an optional Markdown code fence around the model answer.
pub fn strip_code_fences(text: &str) -> &str {
    let mut s = text.trim();
    if let Some(rest) = s.strip_prefix("```") {
        s = rest.strip_prefix("json").unwrap_or(rest);
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }
    s.trim()
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

/// Builds a complete field set from one returned product; absent or null
/// keys keep the "Not detected" default.
pub fn fields_from_value(product: &Value) -> ProductFields {
    let mut fields = ProductFields::default();
    if let Some(map) = product.as_object() {
        for name in FIELD_NAMES {
            if let (Some(text), Some(slot)) = (map.get(name).and_then(value_text), fields.get_mut(name)) {
                *slot = text;
            }
        }
    }
    fields
}

pub fn parse_products(text: &str) -> Result<Vec<ProductFields>, BatchError> {
    let parsed: Value = serde_json::from_str(strip_code_fences(text))?;
    let products = parsed
        .get("products")
        .and_then(Value::as_array)
        .ok_or(BatchError::MissingProducts)?;
    Ok(products.iter().map(fields_from_value).collect())
}

/// Matches products to images by position. Missing tail entries become
/// "Not analyzed" placeholders; extra products are kept under synthetic names.
pub fn align(products: Vec<ProductFields>, batch: &[ImageRef]) -> Vec<ProductRecord> {
    if products.len() > batch.len() {
        warn!(
            "model returned {} products for {} images; keeping the extras",
            products.len(),
            batch.len()
        );
    }
    let mut records: Vec<ProductRecord> = products
        .into_iter()
        .enumerate()
        .map(|(idx, fields)| match batch.get(idx) {
            Some(image) => ProductRecord::for_image(fields, image),
            None => ProductRecord::new(fields, format!("unknown_image_{}", idx + 1), ""),
        })
        .collect();
    for image in batch.iter().skip(records.len()) {
        records.push(ProductRecord::not_analyzed(image));
    }
    records
}

pub struct BatchClassifier {
    provider: Arc<dyn VisionProvider>,
    batch_size: usize,
    retry: RetryPolicy,
}

impl BatchClassifier {
    pub fn new(provider: Arc<dyn VisionProvider>, batch_size: usize, retry: RetryPolicy) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
            retry,
        }
    }

    /// One record per image, in input order. A batch that keeps failing turns
    /// into error placeholders without stopping the others.
    pub async fn classify(&self, images: &[ImageRef]) -> Vec<ProductRecord> {
        let total_batches = images.len().div_ceil(self.batch_size);
        info!(
            "analyzing {} images in batches of {} with {}",
            images.len(),
            self.batch_size,
            self.provider.model_name()
        );

        let mut records = Vec::with_capacity(images.len());
        for (idx, batch) in images.chunks(self.batch_size).enumerate() {
            let label = format!("batch {}/{}", idx + 1, total_batches);
            info!("{label}: {} images", batch.len());
            let result = self
                .retry
                .run(&label, move |_| self.classify_batch(batch))
                .await;
            match result {
                Ok(batch_records) => {
                    info!("{label} done");
                    records.extend(batch_records);
                }
                Err(e) => {
                    error!("{label} failed: {e}");
                    let message = e.to_string();
                    records.extend(batch.iter().map(|image| ProductRecord::failed(image, &message)));
                }
            }
        }
        info!("analysis finished: {} records", records.len());
        records
    }

    async fn classify_batch(&self, batch: &[ImageRef]) -> Result<Vec<ProductRecord>, BatchError> {
        let request = build_request(batch)?;
        let answer = self.provider.submit(&request).await?;
        let products = parse_products(&answer).inspect_err(|_| {
            debug!("raw answer: {}", answer.chars().take(500).collect::<String>());
        })?;
        Ok(align(products, batch))
    }
}

fn build_request(batch: &[ImageRef]) -> Result<VisionRequest, BatchError> {
    let mut request = VisionRequest::new(build_prompt(batch.len()));
    for image in batch {
        let data = std::fs::read(&image.path).map_err(|source| BatchError::Io {
            path: image.path.clone(),
            source,
        })?;
        request = request.with_attachment(Attachment::new(mime_type_for(&image.path), data));
    }
    Ok(request)
}
