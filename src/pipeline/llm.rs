//! VLM interaction: provider resolution and the image → Markdown call.
//!
//! ## Retry Strategy
//!
//! Transient 429 / 5xx errors are retried with exponential backoff
//! (`retry_backoff_ms * 2^(attempt-1)`): with a 500 ms base and 3 retries the
//! waits are 500 ms → 1 s → 2 s.

use crate::config::VisionConfig;
use crate::error::ConvertError;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Model used when a provider is named but no model is.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// One successful VLM transcription.
#[derive(Debug, Clone)]
pub struct Transcription {
    pub markdown: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
    pub retries: u32,
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, ConvertError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ConvertError::EngineUnavailable {
            engine: format!("LLM provider '{provider_name}'"),
            detail: e.to_string(),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. Pre-built provider (`config.provider`).
/// 2. Named provider (`config.provider_name`) with `config.model`.
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set.
/// 4. OpenAI when `OPENAI_API_KEY` is set.
/// 5. Whatever `ProviderFactory::from_env` detects.
pub fn resolve_provider(config: &VisionConfig) -> Result<Arc<dyn LLMProvider>, ConvertError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ConvertError::EngineUnavailable {
            engine: "LLM provider".to_string(),
            detail: format!(
                "none could be auto-detected; set OPENAI_API_KEY, ANTHROPIC_API_KEY \
                 or configure a provider ({e})"
            ),
        })?;

    Ok(llm_provider)
}

/// Send one image to the VLM and return its Markdown.
///
/// `label` only appears in logs ("page 3", "photo.png").
pub async fn transcribe(
    provider: &Arc<dyn LLMProvider>,
    label: &str,
    image: ImageData,
    system_prompt: &str,
    config: &VisionConfig,
) -> Result<Transcription, ConvertError> {
    let start = Instant::now();
    let messages = vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user_with_images("", vec![image]),
    ];
    let options = build_options(config);

    let mut last_err: Option<String> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = config.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "{}: retry {}/{} after {}ms",
                label, attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match provider.chat(&messages, Some(&options)).await {
            Ok(response) => {
                let duration = start.elapsed();
                debug!(
                    "{}: {} input tokens, {} output tokens, {:?}",
                    label, response.prompt_tokens, response.completion_tokens, duration
                );
                return Ok(Transcription {
                    markdown: response.content,
                    input_tokens: response.prompt_tokens as u64,
                    output_tokens: response.completion_tokens as u64,
                    duration_ms: duration.as_millis() as u64,
                    retries: attempt,
                });
            }
            Err(e) => {
                let err_msg = e.to_string();
                warn!("{}: attempt {} failed: {}", label, attempt + 1, err_msg);
                last_err = Some(err_msg);
            }
        }
    }

    Err(ConvertError::LlmFailed {
        retries: config.max_retries,
        detail: last_err.unwrap_or_else(|| "unknown error".to_string()),
    })
}

fn build_options(config: &VisionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_options_from_vision_config() {
        let config = VisionConfig::default().with_temperature(0.4);
        let opts = build_options(&config);
        assert_eq!(opts.temperature, Some(0.4));
        assert_eq!(opts.max_tokens, Some(4096));
    }
}
