//! Field cleanup, completeness scoring and status tiers.

use chrono::Local;
use regex::Regex;
use std::sync::OnceLock;
use tracing::info;

use crate::models::{
    is_sentinel, Assessment, ProductFields, ProductRecord, RunSummary, Status, FIELD_NAMES,
    NOT_DETECTED,
};

pub const COMPLETE_THRESHOLD: f64 = 80.0;

const EMPTY_MARKERS: [&str; 7] = ["", "n/a", "na", "null", "none", "?", "-"];

/// Longer words first so "millilitres" is not eaten by "litres".
const UNIT_WORDS: [(&str, &str); 8] = [
    ("millilitres", "mL"),
    ("millilitre", "mL"),
    ("kilogrammes", "kg"),
    ("kilogramme", "kg"),
    ("litres", "L"),
    ("litre", "L"),
    ("grammes", "g"),
    ("gramme", "g"),
];

fn price_noise() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\d.,]").expect("static regex"))
}

fn non_digits() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\D").expect("static regex"))
}

fn litre_tokens() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(^|[^\p{L}])(m?l)([^\p{L}]|$)").expect("static regex"))
}

pub fn clean_price(value: &str) -> String {
    let cleaned = price_noise().replace_all(value, "");
    if cleaned.is_empty() {
        NOT_DETECTED.to_string()
    } else {
        cleaned.into_owned()
    }
}

pub fn clean_barcode(value: &str) -> String {
    let cleaned = non_digits().replace_all(value, "");
    if cleaned.is_empty() {
        NOT_DETECTED.to_string()
    } else {
        cleaned.into_owned()
    }
}

pub fn clean_volume(value: &str) -> String {
    let mut volume = value.to_lowercase();
    for (word, unit) in UNIT_WORDS {
        volume = volume.replace(word, unit);
    }
    // Lowercasing turned earlier "L"/"mL" into "l"/"ml"; restore them.
    let volume = litre_tokens().replace_all(&volume, |caps: &regex::Captures| {
        let unit = if caps[2].len() == 2 { "mL" } else { "L" };
        format!("{}{}{}", &caps[1], unit, &caps[3])
    });
    volume.trim().to_string()
}

fn is_empty_marker(value: &str) -> bool {
    let lower = value.to_lowercase();
    EMPTY_MARKERS.contains(&lower.as_str())
}

fn clean_field(name: &str, value: &str) -> String {
    let value = value.trim();
    if is_sentinel(value) {
        return value.to_string();
    }
    if is_empty_marker(value) {
        return NOT_DETECTED.to_string();
    }
    match name {
        "price" => clean_price(value),
        "volume" => clean_volume(value),
        "barcode" => clean_barcode(value),
        _ => value.to_string(),
    }
}

pub fn clean_fields(fields: &ProductFields) -> ProductFields {
    let mut cleaned = fields.clone();
    for name in FIELD_NAMES {
        if let Some(slot) = cleaned.get_mut(name) {
            *slot = clean_field(name, slot);
        }
    }
    cleaned
}

/// Percentage of schema fields holding a real value.
pub fn completeness(fields: &ProductFields) -> f64 {
    let values = fields.values();
    let filled = values
        .iter()
        .filter(|v| !v.is_empty() && !is_sentinel(v))
        .count();
    100.0 * filled as f64 / values.len() as f64
}

pub fn classify_status(has_error: bool, score: f64) -> Status {
    if has_error {
        Status::Error
    } else if score >= COMPLETE_THRESHOLD {
        Status::Complete
    } else {
        Status::Partial
    }
}

/// Cleans every record, attaches its assessment and summarizes the run.
pub fn normalize(records: Vec<ProductRecord>) -> (Vec<ProductRecord>, RunSummary) {
    info!("normalizing {} records", records.len());
    let processed_at = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();

    let cleaned: Vec<ProductRecord> = records
        .into_iter()
        .enumerate()
        .map(|(idx, mut record)| {
            record.fields = clean_fields(&record.fields);
            let score = completeness(&record.fields);
            record.assessment = Some(Assessment {
                sequence: idx + 1,
                processed_at: processed_at.clone(),
                score,
                status: classify_status(record.is_error(), score),
            });
            record
        })
        .collect();

    let summary = summarize(&cleaned);
    info!(
        total = summary.total,
        complete = summary.complete,
        partial = summary.partial,
        errors = summary.error,
        "success rate {:.1}%",
        summary.success_rate
    );
    (cleaned, summary)
}

pub fn summarize(records: &[ProductRecord]) -> RunSummary {
    let mut summary = RunSummary {
        total: records.len(),
        ..RunSummary::default()
    };
    let mut score_sum = 0.0;
    let mut scored = 0usize;
    for assessment in records.iter().filter_map(|r| r.assessment.as_ref()) {
        match assessment.status {
            Status::Complete => summary.complete += 1,
            Status::Partial => summary.partial += 1,
            Status::Error => summary.error += 1,
        }
        score_sum += assessment.score;
        scored += 1;
    }
    if summary.total > 0 {
        summary.success_rate =
            100.0 * (summary.complete + summary.partial) as f64 / summary.total as f64;
    }
    if scored > 0 {
        summary.mean_score = score_sum / scored as f64;
    }
    summary
}
