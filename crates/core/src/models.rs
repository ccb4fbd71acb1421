use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub const NOT_DETECTED: &str = "Not detected";
pub const ANALYSIS_ERROR: &str = "Analysis error";
pub const NOT_ANALYZED: &str = "Not analyzed";

/// Schema field names in their declared order, as the model sees them.
pub const FIELD_NAMES: [&str; 7] = [
    "product_name",
    "description",
    "volume",
    "price",
    "barcode",
    "article_code",
    "source_information",
];

pub const FIELD_DESCRIPTIONS: [&str; 7] = [
    "Product name",
    "Description / product type",
    "Volume / quantity",
    "Price as printed (currency included)",
    "EAN barcode digits",
    "Article code",
    "Information source (Readable / Partially readable)",
];

pub fn is_sentinel(value: &str) -> bool {
    value == NOT_DETECTED || value == ANALYSIS_ERROR
}

#[derive(Debug, Clone)]
pub struct ImageRef {
    /// Staged copy handed to the model.
    pub path: PathBuf,
    /// Name of the file the user dropped in the input folder.
    pub source_name: String,
    pub size_bytes: u64,
    pub dimensions: Option<(u32, u32)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductFields {
    pub product_name: String,
    pub description: String,
    pub volume: String,
    pub price: String,
    pub barcode: String,
    pub article_code: String,
    pub source_information: String,
}

impl Default for ProductFields {
    fn default() -> Self {
        Self::filled(NOT_DETECTED)
    }
}

impl ProductFields {
    pub fn filled(value: &str) -> Self {
        Self {
            product_name: value.to_string(),
            description: value.to_string(),
            volume: value.to_string(),
            price: value.to_string(),
            barcode: value.to_string(),
            article_code: value.to_string(),
            source_information: value.to_string(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        let value = match name {
            "product_name" => &self.product_name,
            "description" => &self.description,
            "volume" => &self.volume,
            "price" => &self.price,
            "barcode" => &self.barcode,
            "article_code" => &self.article_code,
            "source_information" => &self.source_information,
            _ => return None,
        };
        Some(value.as_str())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut String> {
        let value = match name {
            "product_name" => &mut self.product_name,
            "description" => &mut self.description,
            "volume" => &mut self.volume,
            "price" => &mut self.price,
            "barcode" => &mut self.barcode,
            "article_code" => &mut self.article_code,
            "source_information" => &mut self.source_information,
            _ => return None,
        };
        Some(value)
    }

    /// Values in declared schema order.
    pub fn values(&self) -> [&str; 7] {
        [
            self.product_name.as_str(),
            self.description.as_str(),
            self.volume.as_str(),
            self.price.as_str(),
            self.barcode.as_str(),
            self.article_code.as_str(),
            self.source_information.as_str(),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Complete,
    Partial,
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Complete => "Complete",
            Status::Partial => "Partial",
            Status::Error => "Error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attached once by the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub sequence: usize,
    pub processed_at: String,
    pub score: f64,
    pub status: Status,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub fields: ProductFields,
    pub file_name: String,
    pub file_path: String,
    pub error: Option<String>,
    pub assessment: Option<Assessment>,
}

impl ProductRecord {
    pub fn new(fields: ProductFields, file_name: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            fields,
            file_name: file_name.into(),
            file_path: file_path.into(),
            error: None,
            assessment: None,
        }
    }

    pub fn for_image(fields: ProductFields, image: &ImageRef) -> Self {
        Self::new(
            fields,
            image.source_name.clone(),
            image.path.to_string_lossy().into_owned(),
        )
    }

    /// Placeholder for an image the model skipped.
    pub fn not_analyzed(image: &ImageRef) -> Self {
        let mut fields = ProductFields::default();
        fields.source_information = NOT_ANALYZED.to_string();
        Self::for_image(fields, image)
    }

    /// Placeholder for an image whose batch could not be analyzed.
    pub fn failed(image: &ImageRef, message: &str) -> Self {
        let mut fields = ProductFields::filled(ANALYSIS_ERROR);
        fields.source_information = format!("Error: {message}");
        let mut record = Self::for_image(fields, image);
        record.error = Some(message.to_string());
        record
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub complete: usize,
    pub partial: usize,
    pub error: usize,
    pub success_rate: f64,
    pub mean_score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> ImageRef {
        ImageRef {
            path: PathBuf::from("/tmp/staged/a.jpg"),
            source_name: "a.png".into(),
            size_bytes: 10,
            dimensions: None,
        }
    }

    #[test]
    fn defaults_fill_every_field() {
        let fields = ProductFields::default();
        assert!(fields.values().iter().all(|v| *v == NOT_DETECTED));
        for name in FIELD_NAMES {
            assert_eq!(fields.get(name), Some(NOT_DETECTED));
        }
        assert_eq!(fields.get("nope"), None);
    }

    #[test]
    fn failed_placeholder_carries_error() {
        let rec = ProductRecord::failed(&image(), "timeout");
        assert!(rec.is_error());
        assert_eq!(rec.fields.price, ANALYSIS_ERROR);
        assert_eq!(rec.fields.source_information, "Error: timeout");
        assert_eq!(rec.file_name, "a.png");
        assert_eq!(rec.file_path, "/tmp/staged/a.jpg");
    }

    #[test]
    fn not_analyzed_placeholder() {
        let rec = ProductRecord::not_analyzed(&image());
        assert!(!rec.is_error());
        assert_eq!(rec.fields.source_information, NOT_ANALYZED);
        assert_eq!(rec.fields.barcode, NOT_DETECTED);
    }
}
