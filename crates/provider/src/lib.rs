pub mod types;

pub mod anthropic;
pub mod openai;

mod error;
mod sse;

pub use error::ProviderError;
pub use types::*;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    fn supported_models(&self) -> &[ModelInfo];

    fn model_for_tier(&self, tier: Tier) -> Option<&ModelInfo> {
        let models = self.supported_models();
        models
            .iter()
            .find(|m| m.tier == tier)
            .or_else(|| models.first())
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse>;

    async fn chat_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;
}

/// Resolve a credential for `provider_name`: config entry wins, otherwise the
/// provider's well-known environment variable.
pub fn resolve_credential(provider_name: &str, config: &undercity_config::Config) -> Result<String> {
    if let Some(entry) = config.provider.entry(provider_name) {
        if let Some(key) = &entry.api_key {
            if !key.is_empty() {
                return Ok(key.clone());
            }
        }
    }
    let def = undercity_config::find_provider_def(provider_name);
    if let Some(def) = def {
        if let Ok(val) = std::env::var(def.env_var) {
            if !val.is_empty() {
                return Ok(val);
            }
        }
        return Err(ProviderError::NoCredential {
            provider: provider_name.to_string(),
            env_var: def.env_var.to_string(),
        }
        .into());
    }
    Err(ProviderError::NoCredential {
        provider: provider_name.to_string(),
        env_var: format!("{}_API_KEY", provider_name.to_uppercase()),
    }
    .into())
}

fn model_for(entry: Option<&undercity_config::ProviderEntry>, tier: Tier) -> Option<String> {
    let entry = entry?;
    match tier {
        Tier::Cheap => entry.cheap_model.clone(),
        Tier::Mid => entry.mid_model.clone(),
        Tier::Strong => entry.strong_model.clone(),
    }
}

/// Build the provider client for `name` per the project's layered config,
/// defaulting the model slot to the mid tier (callers override per request).
pub fn create_provider(
    name: &str,
    config: &undercity_config::Config,
) -> Result<Box<dyn Provider>> {
    let entry = config.provider.entry(name);
    let style = entry
        .and_then(|e| e.api_style.clone())
        .or_else(|| undercity_config::find_provider_def(name).map(|d| d.api_style.to_string()))
        .unwrap_or_else(|| "openai".to_string());

    let cred = resolve_credential(name, config)?;
    let base_url = entry.and_then(|e| e.base_url.clone()).or_else(|| {
        undercity_config::find_provider_def(name).map(|d| d.default_base_url.to_string())
    });
    let default_model = model_for(entry, Tier::Mid);

    match style.as_str() {
        "anthropic" => Ok(Box::new(anthropic::AnthropicProvider::new(
            cred,
            base_url,
            default_model,
        ))),
        _ => Ok(Box::new(openai::OpenAIProvider::new(
            cred,
            base_url,
            default_model,
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_for_tier_falls_back_to_first_model() {
        let models = anthropic::default_models();
        let provider = anthropic::AnthropicProvider::new("k".into(), None, None);
        assert!(provider.model_for_tier(Tier::Cheap).is_some());
        assert_eq!(models.len(), provider.supported_models().len());
    }

    #[test]
    fn resolve_credential_reads_config_before_env() {
        let mut config = undercity_config::Config::default();
        config.provider.providers.insert(
            "anthropic".to_string(),
            undercity_config::ProviderEntry {
                api_key: Some("from-config".to_string()),
                ..Default::default()
            },
        );
        let cred = resolve_credential("anthropic", &config).unwrap();
        assert_eq!(cred, "from-config");
    }

    #[test]
    fn resolve_credential_errors_without_key_or_env() {
        std::env::remove_var("ANTHROPIC_API_KEY");
        let config = undercity_config::Config::default();
        assert!(resolve_credential("anthropic", &config).is_err());
    }
}
