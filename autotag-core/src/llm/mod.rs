//! Tagging backends and the provider registry.
//!
//! This module provides one adapter per provider kind (Gemini, OpenAI and a
//! local Ollama model) behind the [`TagBackend`] trait, plus the registry
//! that decides which of them are usable for a run.
//!
//! ## Example
//!
//! ```rust,ignore
//! use autotag_core::llm::{ProviderRegistry, ProviderSettings};
//!
//! let settings = ProviderSettings::from_env();
//! let local = settings.ollama_client()?;
//! let registry = ProviderRegistry::configure(&settings, &local).await?;
//! let backends = settings.backends()?;
//! ```

mod client;
mod registry;
mod types;

pub use client::{
    model_listed, parse_gemini_response, parse_ollama_response, parse_ollama_tags,
    parse_openai_response, BackendSet, ClientConfig, GeminiClient, LocalModels, OllamaClient,
    OpenAIClient, TagBackend,
};
pub use registry::{ProviderRegistry, ProviderSettings};
pub use types::{mask_credential, Provider, ProviderKind, ProviderSelection};
