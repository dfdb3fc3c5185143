//! Provider fallback with per-credential retry.
//!
//! Providers are tried in priority order. Within a provider, each credential
//! of a shuffled copy of its pool gets one attempt, separated by a fixed
//! cooldown. The first response that normalizes to at least one tag wins.

use rand::seq::SliceRandom;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};
use crate::llm::{mask_credential, BackendSet, Provider};
use crate::prompt::build_prompt;
use crate::tags::GeneratedTagSet;

/// Bounded retry over a credential pool.
///
/// One attempt per credential; `cooldown` is waited between consecutive
/// attempts, never after the last one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait between failed attempts
    pub cooldown: Duration,
    /// Shuffle the pool before each record
    pub shuffle: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            cooldown: Self::DEFAULT_COOLDOWN,
            shuffle: true,
        }
    }
}

impl RetryPolicy {
    pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(2);

    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            ..Self::default()
        }
    }

    /// Keep the pool's configured order.
    pub fn without_shuffle(mut self) -> Self {
        self.shuffle = false;
        self
    }

    /// Credentials in the order they will be attempted.
    pub fn attempt_order(&self, pool: &[String]) -> Vec<String> {
        let mut order = pool.to_vec();
        if self.shuffle {
            order.shuffle(&mut rand::thread_rng());
        }
        order
    }

    /// Run `attempt` once per credential until one succeeds.
    pub async fn run<T, F, Fut>(&self, credentials: &[String], mut attempt: F) -> Option<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        for (i, credential) in credentials.iter().enumerate() {
            if i > 0 {
                debug!(cooldown_ms = self.cooldown.as_millis() as u64, "Cooling down");
                tokio::time::sleep(self.cooldown).await;
            }
            match attempt(credential.clone()).await {
                Ok(value) => return Some(value),
                Err(e) => debug!(
                    attempt = i + 1,
                    of = credentials.len(),
                    error = %e,
                    "Attempt failed"
                ),
            }
        }
        None
    }
}

/// Fallback orchestrator over the configured providers.
#[derive(Debug, Clone)]
pub struct TagOrchestrator {
    backends: BackendSet,
    policy: RetryPolicy,
}

impl TagOrchestrator {
    pub fn new(backends: BackendSet, policy: RetryPolicy) -> Self {
        Self { backends, policy }
    }

    /// Generate tags for one record.
    ///
    /// Returns `None` when every configured provider is exhausted; the
    /// caller skips the record for this run.
    #[instrument(skip_all, fields(title = %title))]
    pub async fn generate_tags(
        &self,
        providers: &[Provider],
        title: &str,
        description: Option<&str>,
        existing_tags: &[String],
        extra_instructions: Option<&str>,
    ) -> Option<GeneratedTagSet> {
        let prompt = build_prompt(title, description, existing_tags, extra_instructions);
        let prompt = prompt.as_str();

        for provider in providers.iter().filter(|p| p.configured) {
            let kind = provider.name;
            let Some(backend) = self.backends.get(kind) else {
                warn!(provider = %kind, "No backend registered for provider; skipping");
                continue;
            };

            let credentials = self.policy.attempt_order(&provider.credential_pool);
            info!(provider = %kind, credentials = credentials.len(), "Asking provider for tags");

            let outcome = self
                .policy
                .run(&credentials, |credential| async move {
                    let result = backend.generate(prompt, &credential).await.and_then(|text| {
                        GeneratedTagSet::from_response(text).ok_or_else(|| {
                            Error::provider_unavailable(kind, "response contained no tags")
                        })
                    });
                    if let Err(e) = &result {
                        warn!(
                            provider = %kind,
                            credential = %mask_credential(&credential),
                            error = %e,
                            "Tag request failed"
                        );
                    }
                    result
                })
                .await;

            if let Some(tag_set) = outcome {
                info!(provider = %kind, tags = tag_set.tags.len(), "Tags generated");
                return Some(tag_set);
            }
            warn!(provider = %kind, "All credentials failed; falling back");
        }

        None
    }
}
