//! Provider kinds and configured provider definitions.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::Error;

/// Tagging backend kind.
///
/// Declaration order is the fallback priority: cloud backends first, the
/// local model last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Gemini,
    OpenAI,
    Ollama,
}

impl ProviderKind {
    /// All kinds in fallback priority order.
    pub const PRIORITY: [ProviderKind; 3] =
        [ProviderKind::Gemini, ProviderKind::OpenAI, ProviderKind::Ollama];
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gemini => write!(f, "gemini"),
            Self::OpenAI => write!(f, "openai"),
            Self::Ollama => write!(f, "ollama"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gemini" | "google" => Ok(Self::Gemini),
            "openai" => Ok(Self::OpenAI),
            "ollama" | "local" => Ok(Self::Ollama),
            other => Err(Error::config(format!("unknown provider: {}", other))),
        }
    }
}

/// A configured tagging backend and its credential pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    /// Backend kind
    pub name: ProviderKind,
    /// API keys, or the local model identifier for [`ProviderKind::Ollama`]
    pub credential_pool: Vec<String>,
    /// True only if at least one credential passed verification
    pub configured: bool,
}

impl Provider {
    /// Create a configured provider. The pool is trimmed and de-duplicated
    /// in order; an empty resulting pool leaves the provider unconfigured.
    pub fn new(name: ProviderKind, credentials: impl IntoIterator<Item = String>) -> Self {
        let credential_pool = dedupe_credentials(credentials);
        let configured = !credential_pool.is_empty();
        Self {
            name,
            credential_pool,
            configured,
        }
    }
}

/// Which providers a run may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderSelection {
    #[default]
    All,
    Only(ProviderKind),
}

impl ProviderSelection {
    pub fn allows(&self, kind: ProviderKind) -> bool {
        match self {
            Self::All => true,
            Self::Only(selected) => *selected == kind,
        }
    }
}

impl FromStr for ProviderSelection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            Ok(Self::All)
        } else {
            s.parse().map(Self::Only)
        }
    }
}

impl std::fmt::Display for ProviderSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Only(kind) => write!(f, "{}", kind),
        }
    }
}

pub(crate) fn dedupe_credentials(credentials: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut pool: Vec<String> = Vec::new();
    for credential in credentials {
        let credential = credential.trim();
        if !credential.is_empty() && !pool.iter().any(|c| c == credential) {
            pool.push(credential.to_string());
        }
    }
    pool
}

/// Mask a credential for logs, keeping only the last four characters.
pub fn mask_credential(credential: &str) -> String {
    let chars: Vec<char> = credential.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_matches_ordering() {
        let mut kinds = vec![ProviderKind::Ollama, ProviderKind::Gemini, ProviderKind::OpenAI];
        kinds.sort();
        assert_eq!(kinds, ProviderKind::PRIORITY.to_vec());
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("Gemini".parse::<ProviderKind>().unwrap(), ProviderKind::Gemini);
        assert_eq!("openai".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAI);
        assert_eq!("local".parse::<ProviderKind>().unwrap(), ProviderKind::Ollama);
        assert!("claude".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_selection_parse_and_allows() {
        assert_eq!("all".parse::<ProviderSelection>().unwrap(), ProviderSelection::All);

        let only = "ollama".parse::<ProviderSelection>().unwrap();
        assert!(only.allows(ProviderKind::Ollama));
        assert!(!only.allows(ProviderKind::Gemini));
    }

    #[test]
    fn test_provider_pool_is_deduplicated() {
        let provider = Provider::new(
            ProviderKind::Gemini,
            vec!["k1".into(), " k2 ".into(), "k1".into(), "".into()],
        );
        assert_eq!(provider.credential_pool, vec!["k1", "k2"]);
        assert!(provider.configured);

        let empty = Provider::new(ProviderKind::OpenAI, vec!["  ".to_string()]);
        assert!(!empty.configured);
    }

    #[test]
    fn test_mask_credential() {
        assert_eq!(mask_credential("short"), "****");
        assert_eq!(mask_credential("sk-abcdefgh1234"), "****1234");
    }
}
