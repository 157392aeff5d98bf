//! Sources of client-identifier lists
//!
//! The engine never reads lists itself; it asks a [`ListSource`] for the
//! current list at startup and on every refresh cycle. The reference format
//! is a newline-delimited text file, read by [`FileListSource`].

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure to fetch a list
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Other(String),
}

/// Anything that can produce the current list of client identifiers
///
/// Implementations may hit a file, a database or an RPC endpoint. A failed
/// fetch is never fatal once the engine is running: the previous snapshot
/// stays in effect.
#[async_trait]
pub trait ListSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<String>, SourceError>;

    /// Human-readable description used in logs
    fn describe(&self) -> String;
}

/// Split newline-delimited text into identifiers
///
/// Surrounding whitespace is trimmed; blank lines and lines starting with
/// `#` are skipped.
///
/// ```
/// let ids = loadgate::core::source::parse_list("10.0.0.1\n\n# office\n 10.0.0.2 \n");
/// assert_eq!(ids, vec!["10.0.0.1", "10.0.0.2"]);
/// ```
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect()
}

/// Newline-delimited list read from a file on every fetch
#[derive(Debug, Clone)]
pub struct FileListSource {
    path: PathBuf,
}

impl FileListSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileListSource { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ListSource for FileListSource {
    async fn fetch(&self) -> Result<Vec<String>, SourceError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| SourceError::Io {
                path: self.path.clone(),
                source,
            })?;
        Ok(parse_list(&raw))
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

/// Fixed in-memory list
#[derive(Debug, Clone, Default)]
pub struct StaticListSource {
    entries: Vec<String>,
}

impl StaticListSource {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        StaticListSource {
            entries: entries.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ListSource for StaticListSource {
    async fn fetch(&self) -> Result<Vec<String>, SourceError> {
        Ok(self.entries.clone())
    }

    fn describe(&self) -> String {
        format!("static list ({} entries)", self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn temp_path(name: &str) -> PathBuf {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("loadgate-{}-{name}-{n}.txt", std::process::id()))
    }

    #[test]
    fn test_parse_list_handles_crlf_and_comments() {
        let ids = parse_list("a\r\nb\r\n\r\n#c\r\n  d\t\n");
        assert_eq!(ids, vec!["a", "b", "d"]);
    }

    #[test]
    fn test_parse_empty() {
        assert!(parse_list("").is_empty());
        assert!(parse_list("\n\n# nothing\n").is_empty());
    }

    #[tokio::test]
    async fn test_file_source_reads_current_contents() {
        let path = temp_path("file-source");
        tokio::fs::write(&path, "192.168.1.1\n192.168.1.2\n")
            .await
            .unwrap();

        let source = FileListSource::new(&path);
        assert_eq!(source.fetch().await.unwrap(), vec!["192.168.1.1", "192.168.1.2"]);

        tokio::fs::write(&path, "192.168.1.3\n").await.unwrap();
        assert_eq!(source.fetch().await.unwrap(), vec!["192.168.1.3"]);

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_file_source_missing_file() {
        let source = FileListSource::new(temp_path("missing"));
        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, SourceError::Io { .. }));
        assert!(err.to_string().contains("failed to read"));
    }

    #[tokio::test]
    async fn test_static_source() {
        let source = StaticListSource::new(["a", "b"]);
        assert_eq!(source.fetch().await.unwrap(), vec!["a", "b"]);
        assert_eq!(source.describe(), "static list (2 entries)");
    }
}
