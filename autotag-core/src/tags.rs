//! Response normalization and tag merging.
//!
//! Both halves are pure: no provider calls, no catalog access.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Tags derived from one successful provider response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedTagSet {
    /// Unprocessed response text
    pub raw_text: String,
    /// Trimmed, non-empty tags in response order
    pub tags: Vec<String>,
}

impl GeneratedTagSet {
    /// Normalize a provider response. Returns `None` when no tag survives,
    /// which callers treat as a failed call.
    pub fn from_response(raw_text: impl Into<String>) -> Option<Self> {
        let raw_text = raw_text.into();
        let tags = normalize_tags(&raw_text);
        if tags.is_empty() {
            None
        } else {
            Some(Self { raw_text, tags })
        }
    }
}

/// Split a response into tags: line breaks become separators, then split on
/// commas, trim, and drop empties.
pub fn normalize_tags(raw_text: &str) -> Vec<String> {
    raw_text
        .replace("\r\n", ",")
        .replace(['\n', '\r'], ",")
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(String::from)
        .collect()
}

/// How generated tags combine with the record's existing tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Union with existing tags
    #[default]
    Append,
    /// Replace existing tags
    Overwrite,
}

impl MergeMode {
    pub fn from_overwrite(overwrite: bool) -> Self {
        if overwrite {
            Self::Overwrite
        } else {
            Self::Append
        }
    }
}

impl std::fmt::Display for MergeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Append => write!(f, "append"),
            Self::Overwrite => write!(f, "overwrite"),
        }
    }
}

/// Compute the final tag set to persist.
///
/// Tags compare by exact string equality after trimming; there is no case
/// folding. The result is deduplicated and sorted lexicographically.
pub fn merge(existing_tags: &[String], generated_tags: &[String], mode: MergeMode) -> Vec<String> {
    let existing: &[String] = match mode {
        MergeMode::Append => existing_tags,
        MergeMode::Overwrite => &[],
    };

    existing
        .iter()
        .chain(generated_tags)
        .map(|tag| tag.trim())
        .filter(|tag| !tag.is_empty())
        .map(String::from)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
