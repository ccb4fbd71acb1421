use crate::classifier::BatchClassifier;
use crate::config::AppConfig;
use crate::models::RunSummary;
use crate::report::{self, ReportPaths};
use crate::{compressor, normalizer, scanner, session};
use anyhow::{bail, Context};
use providers::gemini::{GeminiConfig, GeminiProvider};
use providers::openai::{OpenAiConfig, OpenAiProvider};
use providers::{ProviderRegistry, VisionProvider};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug)]
pub enum RunOutcome {
    Completed {
        summary: RunSummary,
        reports: ReportPaths,
        archive: PathBuf,
    },
    /// Nothing to process; no artifacts were written.
    NoInput,
}

/// Registers the configured provider. Only the selected one needs a credential.
pub fn build_registry(config: &AppConfig) -> anyhow::Result<ProviderRegistry> {
    let mut reg = ProviderRegistry::new();
    match config.provider.as_str() {
        "gemini" => {
            let provider = GeminiProvider::new(GeminiConfig {
                api_key: config.google_api_key.clone().unwrap_or_default(),
                base_url: config.gemini_base_url.clone(),
                model: config.gemini_model.clone(),
            })?;
            reg = reg.with_vision("gemini", Arc::new(provider));
        }
        "openai" => {
            let provider = OpenAiProvider::new(OpenAiConfig {
                api_key: config.openai_api_key.clone().unwrap_or_default(),
                base_url: config.openai_base_url.clone(),
                chat_model: config.openai_model.clone(),
            })?;
            reg = reg.with_vision("openai", Arc::new(provider));
        }
        other => bail!("unknown provider '{other}'"),
    }
    Ok(reg.set_preferred(&config.provider))
}

/// Directory layout and model connectivity, everything a run needs up front.
pub async fn preflight(config: &AppConfig, provider: &dyn VisionProvider) -> anyhow::Result<()> {
    session::ensure_directories(config)?;
    session::validate_directories(config)?;
    info!("checking connection to {}", provider.model_name());
    provider
        .ping()
        .await
        .with_context(|| format!("cannot reach model {}", provider.model_name()))?;
    info!("model reachable");
    Ok(())
}

pub async fn run(
    config: &AppConfig,
    provider: Arc<dyn VisionProvider>,
    session_id: &str,
) -> anyhow::Result<RunOutcome> {
    info!("session {session_id} starting");
    preflight(config, provider.as_ref()).await?;

    let sources = scanner::list_images(&config.input_dir);
    if sources.is_empty() {
        warn!("no images in {}", config.input_dir.display());
        return Ok(RunOutcome::NoInput);
    }
    info!("{} images found", sources.len());

    let max_bytes = config.max_image_bytes();
    let staged = compressor::compress_all(
        &sources,
        &config.processed_dir,
        max_bytes,
        config.compression_quality,
    )
    .await;
    if staged.is_empty() {
        bail!("no image could be prepared for analysis");
    }
    let staged = compressor::validate_staged(staged, max_bytes);
    if staged.is_empty() {
        bail!("no prepared image passed validation");
    }

    let classifier = BatchClassifier::new(provider, config.batch_size, config.retry_policy());
    let records = classifier.classify(&staged).await;
    let (records, summary) = normalizer::normalize(records);

    let reports = report::emit(&records, &config.output_dir, session_id)
        .context("writing reports")?;
    let archive = session::archive_staged(&config.processed_dir, &config.archive_dir, session_id)
        .context("archiving staged images")?;
    session::clean_staging(&config.processed_dir)?;

    info!(
        "session {session_id} finished: {}/{} usable records",
        summary.complete + summary.partial,
        summary.total
    );
    Ok(RunOutcome::Completed {
        summary,
        reports,
        archive,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(src: &str) -> AppConfig {
        config::Config::builder()
            .add_source(config::File::from_str(src, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn registry_prefers_configured_provider() {
        let cfg = config_with("google_api_key = \"k\"");
        let reg = build_registry(&cfg).unwrap();
        assert_eq!(reg.names(), vec!["gemini"]);
        assert_eq!(reg.vision(None).unwrap().model_name(), "gemini-1.5-flash");

        let cfg = config_with("provider = \"openai\"\nopenai_api_key = \"k\"");
        let reg = build_registry(&cfg).unwrap();
        assert_eq!(reg.vision(None).unwrap().model_name(), "gpt-4o-mini");
    }

    #[test]
    fn registry_needs_a_credential() {
        let cfg = config_with("provider = \"gemini\"");
        assert!(build_registry(&cfg).is_err());
        let cfg = config_with("provider = \"mystery\"");
        assert!(build_registry(&cfg).is_err());
    }
}
