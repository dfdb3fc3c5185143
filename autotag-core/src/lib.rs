//! # autotag-core
//!
//! Multi-provider AI tag generation for Calibre libraries.
//!
//! ## Core Components
//!
//! - **Provider registry**: which backends (Gemini, OpenAI, local Ollama) are usable
//! - **Prompt builder**: provider-agnostic prompts with title heuristics
//! - **Backends**: one adapter per provider kind
//! - **Orchestrator**: priority fallback with per-credential retry
//! - **Tags**: response normalization and append/overwrite merging
//! - **Catalog** and **run driver**: `calibredb` access and the per-record loop
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use autotag_core::{
//!     CalibreCatalog, ProviderRegistry, ProviderSettings, RetryPolicy, RunOptions,
//!     TagOrchestrator, TaggingRun,
//! };
//!
//! let settings = ProviderSettings::from_env();
//! let registry = ProviderRegistry::configure(&settings, &settings.ollama_client()?).await?;
//! let orchestrator = TagOrchestrator::new(settings.backends()?, RetryPolicy::default());
//! let catalog = Arc::new(CalibreCatalog::new("~/Calibre Library"));
//!
//! let summary = TaggingRun::new(catalog, orchestrator, registry, RunOptions::default())
//!     .run()
//!     .await?;
//! println!("tagged {} of {}", summary.tagged, summary.total);
//! ```

pub mod catalog;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod prompt;
pub mod run;
pub mod tags;

// Re-exports for convenience
pub use catalog::{parse_listing, BookRecord, CalibreCatalog, Catalog};
pub use error::{Error, Result};
pub use llm::{
    BackendSet, ClientConfig, GeminiClient, LocalModels, OllamaClient, OpenAIClient, Provider,
    ProviderKind, ProviderRegistry, ProviderSelection, ProviderSettings, TagBackend,
};
pub use orchestrator::{RetryPolicy, TagOrchestrator};
pub use prompt::{build_prompt, clean_description, PromptTemplate, TitleSignals};
pub use run::{RecordOutcome, RecordStatus, RunOptions, RunSummary, TaggingRun};
pub use tags::{merge, normalize_tags, GeneratedTagSet, MergeMode};
