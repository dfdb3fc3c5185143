//! Catalog access through Calibre's `calibredb` command-line tool.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::error::{Error, Result};

/// One catalog entry under consideration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookRecord {
    /// Catalog-assigned id
    pub id: i64,
    pub title: String,
    /// Description (Calibre "comments"), possibly HTML
    pub description: Option<String>,
    /// Tags at listing time
    pub existing_tags: Vec<String>,
}

impl BookRecord {
    pub fn new(id: i64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            description: None,
            existing_tags: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.existing_tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }
}

/// Catalog collaborator used by the run driver.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// List records in catalog order, at most `limit` of them.
    async fn list_records(&self, limit: Option<usize>) -> Result<Vec<BookRecord>>;

    /// Current tags of one record.
    async fn read_tags(&self, record_id: i64) -> Result<Vec<String>>;

    /// Replace a record's tags with `tags`. Writing the same set twice must
    /// leave the catalog unchanged.
    async fn write_tags(&self, record_id: i64, tags: &[String]) -> Result<()>;
}

/// [`Catalog`] backed by a Calibre library on disk.
#[derive(Debug, Clone)]
pub struct CalibreCatalog {
    library_path: PathBuf,
    binary: Option<PathBuf>,
}

impl CalibreCatalog {
    /// Create a catalog for a library folder; `~` is expanded.
    pub fn new(library_path: &str) -> Self {
        Self {
            library_path: PathBuf::from(shellexpand::tilde(library_path).as_ref()),
            binary: None,
        }
    }

    /// Use an explicit `calibredb` executable instead of searching `PATH`.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = Some(binary.into());
        self
    }

    pub fn library_path(&self) -> &Path {
        &self.library_path
    }

    fn find_binary(&self) -> Result<PathBuf> {
        if let Some(path) = &self.binary {
            return Ok(path.clone());
        }

        which::which("calibredb").map_err(|_| {
            Error::CatalogUnavailable(
                "'calibredb' not found; install Calibre and put its command-line tools on PATH"
                    .to_string(),
            )
        })
    }

    /// Run `calibredb` against this library and return its stdout.
    async fn run(&self, args: &[String]) -> Result<String> {
        let binary = self.find_binary()?;
        debug!(binary = %binary.display(), ?args, "Running calibredb");

        let output = Command::new(&binary)
            .args(args)
            .arg("--with-library")
            .arg(&self.library_path)
            .output()
            .await
            .map_err(|e| {
                Error::CatalogUnavailable(format!("failed to run {}: {}", binary.display(), e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::CatalogQueryFailed(format!(
                "calibredb exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Tags as printed by `calibredb list --for-machine`: a JSON array in
/// current releases, a comma-joined string in older ones.
#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum CalibreTags {
    List(Vec<String>),
    Joined(String),
    #[default]
    Missing,
}

impl CalibreTags {
    fn into_vec(self) -> Vec<String> {
        let tags = match self {
            Self::List(tags) => tags,
            Self::Joined(joined) => joined.split(',').map(String::from).collect(),
            Self::Missing => Vec::new(),
        };
        tags.into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct CalibreEntry {
    id: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    comments: Option<String>,
    #[serde(default)]
    tags: CalibreTags,
}

/// Parse `calibredb list --for-machine` output.
pub fn parse_listing(stdout: &str) -> Result<Vec<BookRecord>> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }

    let entries: Vec<CalibreEntry> = serde_json::from_str(stdout)
        .map_err(|e| Error::CatalogParseFailed(format!("invalid calibredb output: {}", e)))?;

    Ok(entries
        .into_iter()
        .map(|entry| BookRecord {
            id: entry.id,
            title: entry.title,
            description: entry.comments.filter(|c| !c.trim().is_empty()),
            existing_tags: entry.tags.into_vec(),
        })
        .collect())
}

#[async_trait]
impl Catalog for CalibreCatalog {
    #[instrument(skip(self), fields(library = %self.library_path.display()))]
    async fn list_records(&self, limit: Option<usize>) -> Result<Vec<BookRecord>> {
        let mut args: Vec<String> = vec![
            "list".into(),
            "--for-machine".into(),
            "--fields".into(),
            "id,title,comments,tags".into(),
        ];
        if let Some(limit) = limit {
            args.push("--limit".into());
            args.push(limit.to_string());
        }

        let stdout = self.run(&args).await?;
        let mut records = parse_listing(&stdout)?;
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    async fn read_tags(&self, record_id: i64) -> Result<Vec<String>> {
        let args: Vec<String> = vec![
            "list".into(),
            "--for-machine".into(),
            "--fields".into(),
            "tags".into(),
            "--search".into(),
            format!("id:{}", record_id),
        ];

        let stdout = self.run(&args).await?;
        Ok(parse_listing(&stdout)?
            .into_iter()
            .find(|r| r.id == record_id)
            .map(|r| r.existing_tags)
            .unwrap_or_default())
    }

    async fn write_tags(&self, record_id: i64, tags: &[String]) -> Result<()> {
        let args: Vec<String> = vec![
            "set_metadata".into(),
            "--field".into(),
            format!("tags:{}", tags.join(",")),
            record_id.to_string(),
        ];

        self.run(&args)
            .await
            .map(|_| ())
            .map_err(|e| Error::catalog_write(record_id, e.to_string()))
    }
}
