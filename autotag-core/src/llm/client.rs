//! Backend trait and provider adapters.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::error::{Error, Result};

use super::types::ProviderKind;

/// A tagging backend: issues one request with one credential.
///
/// Every failure (transport, auth, rate limit, malformed or empty response)
/// is returned as [`Error::ProviderUnavailable`]; callers only care whether
/// usable text came back.
#[async_trait]
pub trait TagBackend: Send + Sync {
    /// Send `prompt` using `credential` and return the response text.
    async fn generate(&self, prompt: &str, credential: &str) -> Result<String>;

    /// The provider kind this backend serves.
    fn kind(&self) -> ProviderKind;
}

/// Model listing exposed by a local model service.
#[async_trait]
pub trait LocalModels: Send + Sync {
    /// Names of the models currently installed.
    async fn list_models(&self) -> Result<Vec<String>>;
}

/// Configuration for backend clients.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL override
    pub base_url: Option<String>,
    /// Default model
    pub default_model: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Sampling temperature
    pub temperature: f64,
    /// Output token cap
    pub max_output_tokens: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            default_model: None,
            timeout_secs: 60,
            temperature: 0.4,
            max_output_tokens: 256,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    fn base_url_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.base_url
            .as_deref()
            .map(|url| url.trim_end_matches('/'))
            .unwrap_or(default)
    }

    fn model_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.default_model.as_deref().unwrap_or(default)
    }
}

fn build_http_client(timeout_secs: u64) -> Result<Client> {
    let timeout = Duration::from_secs(timeout_secs);

    // Some sandboxed macOS environments can panic during proxy auto-detection
    // in reqwest's default client builder. Fall back to no-proxy in that case.
    match catch_unwind(AssertUnwindSafe(|| {
        Client::builder().timeout(timeout).build()
    })) {
        Ok(Ok(client)) => Ok(client),
        Ok(Err(_)) | Err(_) => Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to create HTTP client: {}", e))),
    }
}

async fn read_body(
    provider: ProviderKind,
    response: reqwest::Result<reqwest::Response>,
) -> Result<(StatusCode, String)> {
    let response = response.map_err(|e| {
        let message = if e.is_timeout() {
            "request timed out".to_string()
        } else if e.is_connect() {
            "connection failed".to_string()
        } else {
            format!("HTTP request failed: {}", e.without_url())
        };
        Error::provider_unavailable(provider, message)
    })?;

    let status = response.status();
    let body = response.text().await.map_err(|e| {
        Error::provider_unavailable(provider, format!("Failed to read response: {}", e))
    })?;
    Ok((status, body))
}

fn non_empty(provider: ProviderKind, text: String) -> Result<String> {
    if text.trim().is_empty() {
        Err(Error::provider_unavailable(provider, "empty response"))
    } else {
        Ok(text)
    }
}

// ---------------------------------------------------------------------------
// Gemini
// ---------------------------------------------------------------------------

/// Google Gemini client.
pub struct GeminiClient {
    config: ClientConfig,
    http: Client,
}

impl GeminiClient {
    const DEFAULT_BASE_URL: &'static str = "https://generativelanguage.googleapis.com";
    pub const DEFAULT_MODEL: &'static str = "gemini-1.5-flash";

    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = build_http_client(config.timeout_secs)?;
        Ok(Self { config, http })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    role: &'static str,
    parts: Vec<GeminiPartOut<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiPartOut<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    max_output_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiCandidateContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
}

/// Extract the response text from a Gemini `generateContent` reply.
pub fn parse_gemini_response(status: StatusCode, body: &str) -> Result<String> {
    let provider = ProviderKind::Gemini;
    if !status.is_success() {
        let message = match serde_json::from_str::<GeminiError>(body) {
            Ok(error) => format!("Gemini API error ({}): {}", status, error.error.message),
            Err(_) => format!("Gemini API error ({}): {}", status, body),
        };
        return Err(Error::provider_unavailable(provider, message));
    }

    let response: GeminiResponse = serde_json::from_str(body).map_err(|e| {
        Error::provider_unavailable(provider, format!("Failed to parse response: {}", e))
    })?;

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| Error::provider_unavailable(provider, "No candidates in response"))?;

    let text = candidate
        .content
        .map(|c| {
            c.parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    non_empty(provider, text)
}

#[async_trait]
impl TagBackend for GeminiClient {
    #[instrument(skip_all, fields(provider = "gemini"))]
    async fn generate(&self, prompt: &str, credential: &str) -> Result<String> {
        let model = self.config.model_or(Self::DEFAULT_MODEL);
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url_or(Self::DEFAULT_BASE_URL),
            model
        );

        let request = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user",
                parts: vec![GeminiPartOut { text: prompt }],
            }],
            generation_config: GeminiGenerationConfig {
                max_output_tokens: self.config.max_output_tokens,
                temperature: self.config.temperature,
            },
        };

        debug!(model, "Sending Gemini request");
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", credential)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await;

        let (status, body) = read_body(self.kind(), response).await?;
        parse_gemini_response(status, &body)
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }
}

// ---------------------------------------------------------------------------
// OpenAI
// ---------------------------------------------------------------------------

/// OpenAI chat completions client. Works with any compatible endpoint via
/// [`ClientConfig::with_base_url`].
pub struct OpenAIClient {
    config: ClientConfig,
    http: Client,
}

impl OpenAIClient {
    const DEFAULT_BASE_URL: &'static str = "https://api.openai.com";
    pub const DEFAULT_MODEL: &'static str = "gpt-4o-mini";

    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = build_http_client(config.timeout_secs)?;
        Ok(Self { config, http })
    }
}

#[derive(Debug, Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessageOut<'a>>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct OpenAIMessageOut<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    error: OpenAIErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorDetail {
    message: String,
}

/// Extract the response text from an OpenAI chat completion reply.
pub fn parse_openai_response(status: StatusCode, body: &str) -> Result<String> {
    let provider = ProviderKind::OpenAI;
    if !status.is_success() {
        let message = match serde_json::from_str::<OpenAIError>(body) {
            Ok(error) => format!("OpenAI API error ({}): {}", status, error.error.message),
            Err(_) => format!("OpenAI API error ({}): {}", status, body),
        };
        return Err(Error::provider_unavailable(provider, message));
    }

    let response: OpenAIResponse = serde_json::from_str(body).map_err(|e| {
        Error::provider_unavailable(provider, format!("Failed to parse response: {}", e))
    })?;

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::provider_unavailable(provider, "No choices in response"))?;

    non_empty(provider, choice.message.content.unwrap_or_default())
}

#[async_trait]
impl TagBackend for OpenAIClient {
    #[instrument(skip_all, fields(provider = "openai"))]
    async fn generate(&self, prompt: &str, credential: &str) -> Result<String> {
        let model = self.config.model_or(Self::DEFAULT_MODEL);
        let url = format!(
            "{}/v1/chat/completions",
            self.config.base_url_or(Self::DEFAULT_BASE_URL)
        );

        let request = OpenAIRequest {
            model,
            messages: vec![OpenAIMessageOut {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.config.max_output_tokens,
            temperature: self.config.temperature,
        };

        debug!(model, "Sending OpenAI request");
        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", credential))
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await;

        let (status, body) = read_body(self.kind(), response).await?;
        parse_openai_response(status, &body)
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAI
    }
}

// ---------------------------------------------------------------------------
// Ollama
// ---------------------------------------------------------------------------

/// Local Ollama client. The "credential" it receives is the model name.
pub struct OllamaClient {
    base_url: String,
    config: ClientConfig,
    http: Client,
}

impl OllamaClient {
    pub const DEFAULT_BASE_URL: &'static str = "http://localhost:11434";

    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = build_http_client(config.timeout_secs)?;
        let base_url = config.base_url_or(Self::DEFAULT_BASE_URL).to_string();
        Ok(Self {
            base_url,
            config,
            http,
        })
    }
}

#[derive(Debug, Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f64,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    #[serde(default)]
    models: Vec<OllamaModel>,
}

#[derive(Debug, Deserialize)]
struct OllamaModel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct OllamaError {
    error: String,
}

/// Whether `wanted` appears in an Ollama model listing. A name without a
/// tag also matches its `:latest` entry.
pub fn model_listed(models: &[String], wanted: &str) -> bool {
    models.iter().any(|name| {
        name == wanted || (!wanted.contains(':') && name.strip_suffix(":latest") == Some(wanted))
    })
}

/// Fail unless `local` still lists `model`. Listing errors surface as-is.
pub(crate) async fn ensure_model_available(
    local: &dyn LocalModels,
    model: &str,
    host: &str,
) -> Result<()> {
    let models = local.list_models().await?;
    if model_listed(&models, model) {
        return Ok(());
    }
    Err(Error::provider_unavailable(
        ProviderKind::Ollama,
        format!("model '{}' is no longer available at {}", model, host),
    ))
}

/// Extract the model names from an Ollama `/api/tags` reply.
pub fn parse_ollama_tags(status: StatusCode, body: &str) -> Result<Vec<String>> {
    let provider = ProviderKind::Ollama;
    if !status.is_success() {
        return Err(Error::provider_unavailable(
            provider,
            format!("Ollama model listing failed ({}): {}", status, body),
        ));
    }
    let tags: OllamaTagsResponse = serde_json::from_str(body).map_err(|e| {
        Error::provider_unavailable(provider, format!("Failed to parse model listing: {}", e))
    })?;
    Ok(tags.models.into_iter().map(|m| m.name).collect())
}

/// Extract the response text from an Ollama `/api/generate` reply.
pub fn parse_ollama_response(status: StatusCode, body: &str) -> Result<String> {
    let provider = ProviderKind::Ollama;
    if !status.is_success() {
        let message = match serde_json::from_str::<OllamaError>(body) {
            Ok(error) => format!("Ollama error ({}): {}", status, error.error),
            Err(_) => format!("Ollama error ({}): {}", status, body),
        };
        return Err(Error::provider_unavailable(provider, message));
    }

    let response: OllamaGenerateResponse = serde_json::from_str(body).map_err(|e| {
        Error::provider_unavailable(provider, format!("Failed to parse response: {}", e))
    })?;

    non_empty(provider, response.response)
}

#[async_trait]
impl LocalModels for OllamaClient {
    async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.http.get(&url).send().await;
        let (status, body) = read_body(ProviderKind::Ollama, response).await?;
        parse_ollama_tags(status, &body)
    }
}

#[async_trait]
impl TagBackend for OllamaClient {
    #[instrument(skip_all, fields(provider = "ollama", model = %credential))]
    async fn generate(&self, prompt: &str, credential: &str) -> Result<String> {
        ensure_model_available(self, credential, &self.base_url).await?;

        let request = OllamaGenerateRequest {
            model: credential,
            prompt,
            stream: false,
            options: OllamaOptions {
                temperature: self.config.temperature,
                num_predict: self.config.max_output_tokens,
            },
        };

        debug!("Sending Ollama request");
        let url = format!("{}/api/generate", self.base_url);
        let response = self.http.post(&url).json(&request).send().await;

        let (status, body) = read_body(self.kind(), response).await?;
        parse_ollama_response(status, &body)
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }
}

// ---------------------------------------------------------------------------
// Backend lookup
// ---------------------------------------------------------------------------

/// Backends keyed by provider kind.
#[derive(Clone, Default)]
pub struct BackendSet {
    backends: HashMap<ProviderKind, Arc<dyn TagBackend>>,
}

impl BackendSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a backend; it replaces any previous backend of the same kind.
    pub fn with_backend(mut self, backend: Arc<dyn TagBackend>) -> Self {
        self.backends.insert(backend.kind(), backend);
        self
    }

    /// Get the backend for a provider kind.
    pub fn get(&self, kind: ProviderKind) -> Option<&Arc<dyn TagBackend>> {
        self.backends.get(&kind)
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl std::fmt::Debug for BackendSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.backends.keys().collect();
        kinds.sort();
        f.debug_struct("BackendSet").field("kinds", &kinds).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_builder() {
        let config = ClientConfig::new()
            .with_base_url("https://proxy.example.com/")
            .with_default_model("gpt-4o")
            .with_timeout(30);

        assert_eq!(config.base_url_or("unused"), "https://proxy.example.com");
        assert_eq!(config.model_or("unused"), "gpt-4o");
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(ClientConfig::new().model_or("fallback"), "fallback");
    }

    #[test]
    fn test_parse_gemini_success() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"Fantasy, "},{"text":"Magic"}],"role":"model"}}]}"#;
        let text = parse_gemini_response(StatusCode::OK, body).unwrap();
        assert_eq!(text, "Fantasy, Magic");
    }

    #[test]
    fn test_parse_gemini_error_and_empty() {
        let body = r#"{"error":{"code":429,"message":"Resource exhausted","status":"RESOURCE_EXHAUSTED"}}"#;
        let err = parse_gemini_response(StatusCode::TOO_MANY_REQUESTS, body).unwrap_err();
        assert!(err.to_string().contains("Resource exhausted"));

        let blocked = r#"{"candidates":[{"finishReason":"SAFETY"}]}"#;
        assert!(parse_gemini_response(StatusCode::OK, blocked).is_err());
        assert!(parse_gemini_response(StatusCode::OK, r#"{"candidates":[]}"#).is_err());
    }

    #[test]
    fn test_parse_openai_response() {
        let body = r#"{"id":"x","choices":[{"message":{"role":"assistant","content":"Sci-Fi,Space"},"finish_reason":"stop"}]}"#;
        assert_eq!(
            parse_openai_response(StatusCode::OK, body).unwrap(),
            "Sci-Fi,Space"
        );

        let unauthorized = r#"{"error":{"message":"Incorrect API key","type":"invalid_request_error"}}"#;
        let err = parse_openai_response(StatusCode::UNAUTHORIZED, unauthorized).unwrap_err();
        assert!(matches!(err, Error::ProviderUnavailable { .. }));

        let blank = r#"{"choices":[{"message":{"content":"   "}}]}"#;
        assert!(parse_openai_response(StatusCode::OK, blank).is_err());
        assert!(parse_openai_response(StatusCode::OK, "not json").is_err());
    }

    #[test]
    fn test_parse_ollama_responses() {
        let tags = r#"{"models":[{"name":"llama3:latest","size":1},{"name":"mistral:7b"}]}"#;
        let models = parse_ollama_tags(StatusCode::OK, tags).unwrap();
        assert_eq!(models, vec!["llama3:latest", "mistral:7b"]);

        let generated = r#"{"model":"llama3","response":"Mystery, Detective","done":true}"#;
        assert_eq!(
            parse_ollama_response(StatusCode::OK, generated).unwrap(),
            "Mystery, Detective"
        );

        let missing = r#"{"error":"model 'x' not found"}"#;
        assert!(parse_ollama_response(StatusCode::NOT_FOUND, missing).is_err());
    }

    #[test]
    fn test_model_listed() {
        let models = vec!["llama3:latest".to_string(), "mistral:7b".to_string()];
        assert!(model_listed(&models, "llama3"));
        assert!(model_listed(&models, "llama3:latest"));
        assert!(model_listed(&models, "mistral:7b"));
        assert!(!model_listed(&models, "mistral"));
        assert!(!model_listed(&models, "llama"));
    }

    /// Listing stub that counts how often it was asked.
    struct CountingModels {
        models: Option<Vec<String>>,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl CountingModels {
        fn listing(models: &[&str]) -> Self {
            Self {
                models: Some(models.iter().map(|s| s.to_string()).collect()),
                calls: Default::default(),
            }
        }

        fn offline() -> Self {
            Self {
                models: None,
                calls: Default::default(),
            }
        }
    }

    #[async_trait]
    impl LocalModels for CountingModels {
        async fn list_models(&self) -> Result<Vec<String>> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.models
                .clone()
                .ok_or_else(|| Error::provider_unavailable(ProviderKind::Ollama, "connection failed"))
        }
    }

    #[tokio::test]
    async fn test_model_still_listed_before_generate() {
        let local = CountingModels::listing(&["llama3:latest"]);
        ensure_model_available(&local, "llama3", "http://localhost:11434")
            .await
            .unwrap();
        assert_eq!(local.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_removed_model_fails_fast() {
        let local = CountingModels::listing(&["mistral:7b"]);
        let err = ensure_model_available(&local, "llama3", "http://localhost:11434")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::ProviderUnavailable { ref message, .. }
                if message.contains("'llama3' is no longer available at http://localhost:11434")
        ));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_provider_unavailable() {
        let local = CountingModels::offline();
        let err = ensure_model_available(&local, "llama3", "http://localhost:11434")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProviderUnavailable { .. }));
    }

    #[test]
    fn test_backend_set_lookup() {
        let gemini = GeminiClient::new(ClientConfig::new()).unwrap();
        let set = BackendSet::new().with_backend(Arc::new(gemini));

        assert_eq!(set.len(), 1);
        assert!(set.get(ProviderKind::Gemini).is_some());
        assert!(set.get(ProviderKind::Ollama).is_none());
    }
}
