//! Provider configuration and the immutable provider registry.

use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{Error, Result};

use super::client::{
    model_listed, BackendSet, ClientConfig, GeminiClient, LocalModels, OllamaClient, OpenAIClient,
};
use super::types::{dedupe_credentials, Provider, ProviderKind, ProviderSelection};

/// Environment-style inputs for provider configuration.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Gemini API keys, in configuration order
    pub gemini_keys: Vec<String>,
    /// Gemini model name
    pub gemini_model: String,
    /// OpenAI API keys, in configuration order
    pub openai_keys: Vec<String>,
    /// OpenAI model name
    pub openai_model: String,
    /// OpenAI-compatible base URL override
    pub openai_base_url: Option<String>,
    /// Local Ollama service address
    pub ollama_host: String,
    /// Local model; the local backend is only considered when set
    pub ollama_model: Option<String>,
    /// HTTP timeout for cloud requests, in seconds
    pub timeout_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            gemini_keys: Vec::new(),
            gemini_model: GeminiClient::DEFAULT_MODEL.to_string(),
            openai_keys: Vec::new(),
            openai_model: OpenAIClient::DEFAULT_MODEL.to_string(),
            openai_base_url: None,
            ollama_host: OllamaClient::DEFAULT_BASE_URL.to_string(),
            ollama_model: None,
            timeout_secs: 60,
        }
    }
}

impl ProviderSettings {
    /// Create settings from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create settings from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_blank = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let list = |names: &[&str]| -> Vec<String> {
            dedupe_credentials(
                names
                    .iter()
                    .filter_map(|&name| lookup(name))
                    .flat_map(|value| {
                        value
                            .split(',')
                            .map(|s| s.to_string())
                            .collect::<Vec<_>>()
                    }),
            )
        };

        Self {
            gemini_keys: list(&["GEMINI_API_KEYS", "GOOGLE_API_KEY"]),
            gemini_model: non_blank("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            openai_keys: list(&["OPENAI_API_KEYS", "OPENAI_API_KEY"]),
            openai_model: non_blank("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            openai_base_url: non_blank("OPENAI_BASE_URL"),
            ollama_host: non_blank("OLLAMA_HOST").unwrap_or(defaults.ollama_host),
            ollama_model: non_blank("OLLAMA_MODEL").map(|m| m.trim().to_string()),
            timeout_secs: lookup("AUTOTAG_TIMEOUT_SECS")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.timeout_secs),
        }
    }

    pub fn with_gemini_keys(mut self, keys: Vec<String>) -> Self {
        self.gemini_keys = keys;
        self
    }

    pub fn with_openai_keys(mut self, keys: Vec<String>) -> Self {
        self.openai_keys = keys;
        self
    }

    pub fn with_ollama_model(mut self, model: impl Into<String>) -> Self {
        self.ollama_model = Some(model.into());
        self
    }

    /// Build one backend per provider kind from these settings.
    pub fn backends(&self) -> Result<BackendSet> {
        let gemini = GeminiClient::new(
            ClientConfig::new()
                .with_default_model(&self.gemini_model)
                .with_timeout(self.timeout_secs),
        )?;

        let mut openai_config = ClientConfig::new()
            .with_default_model(&self.openai_model)
            .with_timeout(self.timeout_secs);
        if let Some(url) = &self.openai_base_url {
            openai_config = openai_config.with_base_url(url);
        }
        let openai = OpenAIClient::new(openai_config)?;

        Ok(BackendSet::new()
            .with_backend(Arc::new(gemini))
            .with_backend(Arc::new(openai))
            .with_backend(Arc::new(self.ollama_client()?)))
    }

    /// Client for the local service. Local generation is slow, so it gets a
    /// longer timeout than the cloud backends.
    pub fn ollama_client(&self) -> Result<OllamaClient> {
        OllamaClient::new(
            ClientConfig::new()
                .with_base_url(&self.ollama_host)
                .with_timeout(self.timeout_secs.max(300)),
        )
    }
}

/// The configured providers for one run, in fixed priority order.
///
/// Built once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRegistry {
    providers: Vec<Provider>,
}

impl ProviderRegistry {
    /// Verify credentials and build the registry.
    ///
    /// Cloud keys count as verified when non-blank. The local model counts
    /// only if `local` is reachable and lists it. Returns
    /// [`Error::Config`] when nothing ends up configured.
    pub async fn configure(settings: &ProviderSettings, local: &dyn LocalModels) -> Result<Self> {
        let mut providers = Vec::new();

        for kind in ProviderKind::PRIORITY {
            let credentials = match kind {
                ProviderKind::Gemini => settings.gemini_keys.clone(),
                ProviderKind::OpenAI => settings.openai_keys.clone(),
                ProviderKind::Ollama => match &settings.ollama_model {
                    Some(model) => verify_local_model(local, model, &settings.ollama_host)
                        .await
                        .into_iter()
                        .collect(),
                    None => Vec::new(),
                },
            };

            let provider = Provider::new(kind, credentials);
            if provider.configured {
                info!(
                    provider = %kind,
                    credentials = provider.credential_pool.len(),
                    "Provider configured"
                );
                providers.push(provider);
            }
        }

        Self::from_providers(providers)
    }

    /// Build a registry from already-verified providers, enforcing priority
    /// order and dropping unconfigured entries.
    pub fn from_providers(providers: Vec<Provider>) -> Result<Self> {
        let mut providers: Vec<Provider> = providers.into_iter().filter(|p| p.configured).collect();
        providers.sort_by_key(|p| p.name);
        providers.dedup_by_key(|p| p.name);

        if providers.is_empty() {
            return Err(Error::config(
                "no AI provider is configured; set GEMINI_API_KEYS, OPENAI_API_KEYS or OLLAMA_MODEL",
            ));
        }
        Ok(Self { providers })
    }

    /// Restrict the registry to the selected providers.
    pub fn select(self, selection: ProviderSelection) -> Result<Self> {
        let providers: Vec<Provider> = self
            .providers
            .into_iter()
            .filter(|p| selection.allows(p.name))
            .collect();

        if providers.is_empty() {
            return Err(Error::config(format!(
                "selected provider '{}' is not configured",
                selection
            )));
        }
        Ok(Self { providers })
    }

    /// Providers in fallback order.
    pub fn providers(&self) -> &[Provider] {
        &self.providers
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.providers.iter().map(|p| p.name).collect()
    }
}

async fn verify_local_model(local: &dyn LocalModels, model: &str, host: &str) -> Option<String> {
    match local.list_models().await {
        Ok(models) if model_listed(&models, model) => Some(model.to_string()),
        Ok(models) => {
            warn!(
                model,
                host,
                available = models.len(),
                "Local model not installed; skipping ollama"
            );
            None
        }
        Err(e) => {
            warn!(host, error = %e, "Local model service unreachable; skipping ollama");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct StubModels(Result<Vec<String>>);

    #[async_trait]
    impl LocalModels for StubModels {
        async fn list_models(&self) -> Result<Vec<String>> {
            match &self.0 {
                Ok(models) => Ok(models.clone()),
                Err(_) => Err(Error::provider_unavailable("ollama", "connection failed")),
            }
        }
    }

    fn listing(models: &[&str]) -> StubModels {
        StubModels(Ok(models.iter().map(|m| m.to_string()).collect()))
    }

    fn offline() -> StubModels {
        StubModels(Err(Error::provider_unavailable("ollama", "down")))
    }

    #[test]
    fn test_settings_from_lookup() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("GEMINI_API_KEYS", "g1, g2,,g1"),
            ("GOOGLE_API_KEY", "g3"),
            ("OPENAI_API_KEY", "o1"),
            ("OLLAMA_MODEL", " llama3 "),
            ("AUTOTAG_TIMEOUT_SECS", "15"),
        ]);
        let settings = ProviderSettings::from_lookup(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(settings.gemini_keys, vec!["g1", "g2", "g3"]);
        assert_eq!(settings.openai_keys, vec!["o1"]);
        assert_eq!(settings.ollama_model.as_deref(), Some("llama3"));
        assert_eq!(settings.ollama_host, "http://localhost:11434");
        assert_eq!(settings.gemini_model, "gemini-1.5-flash");
        assert_eq!(settings.timeout_secs, 15);
    }

    #[tokio::test]
    async fn test_zero_providers_is_config_error() {
        let settings = ProviderSettings::default();
        let err = ProviderRegistry::configure(&settings, &listing(&[]))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_priority_order_is_fixed() {
        let settings = ProviderSettings::default()
            .with_ollama_model("llama3")
            .with_openai_keys(vec!["o1".into()])
            .with_gemini_keys(vec!["g1".into(), "g2".into()]);

        let registry = ProviderRegistry::configure(&settings, &listing(&["llama3:latest"]))
            .await
            .unwrap();

        assert_eq!(
            registry.kinds(),
            vec![ProviderKind::Gemini, ProviderKind::OpenAI, ProviderKind::Ollama]
        );
        assert_eq!(registry.providers()[2].credential_pool, vec!["llama3"]);
    }

    #[tokio::test]
    async fn test_local_model_excluded_when_missing_or_unreachable() {
        let settings = ProviderSettings::default()
            .with_gemini_keys(vec!["g1".into()])
            .with_ollama_model("phi3");

        let missing = ProviderRegistry::configure(&settings, &listing(&["llama3:latest"]))
            .await
            .unwrap();
        assert_eq!(missing.kinds(), vec![ProviderKind::Gemini]);

        let down = ProviderRegistry::configure(&settings, &offline())
            .await
            .unwrap();
        assert_eq!(down.kinds(), vec![ProviderKind::Gemini]);
    }

    #[tokio::test]
    async fn test_only_local_and_unreachable_is_fatal() {
        let settings = ProviderSettings::default().with_ollama_model("llama3");
        let err = ProviderRegistry::configure(&settings, &offline())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_select_filters_providers() {
        let registry = ProviderRegistry::from_providers(vec![
            Provider::new(ProviderKind::OpenAI, vec!["o1".into()]),
            Provider::new(ProviderKind::Gemini, vec!["g1".into()]),
        ])
        .unwrap();
        assert_eq!(
            registry.kinds(),
            vec![ProviderKind::Gemini, ProviderKind::OpenAI]
        );

        let only = registry
            .clone()
            .select(ProviderSelection::Only(ProviderKind::OpenAI))
            .unwrap();
        assert_eq!(only.kinds(), vec![ProviderKind::OpenAI]);

        let err = registry
            .select(ProviderSelection::Only(ProviderKind::Ollama))
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_settings_build_all_backends() {
        let backends = ProviderSettings::default().backends().unwrap();
        assert_eq!(backends.len(), 3);
        for kind in ProviderKind::PRIORITY {
            assert!(backends.get(kind).is_some());
        }
    }
}
