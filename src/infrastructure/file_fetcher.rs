//! Local-file fetcher and scheme routing

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::http_client::HttpFetcher;
use crate::domain::{FetchError, Fetcher, RawDocument, SourceRef};

/// Reads `file://` URLs and plain filesystem paths
#[derive(Debug, Default, Clone)]
pub struct FileFetcher;

impl FileFetcher {
    pub fn new() -> Self {
        Self
    }

    /// Filesystem path for a source, if it names one
    pub fn path_of(source: &SourceRef) -> Option<PathBuf> {
        match source.as_url() {
            Some(url) if url.scheme() == "file" => url.to_file_path().ok(),
            // Windows drive letters parse as a one-letter scheme
            Some(url) if url.scheme().len() > 1 => None,
            _ => Some(PathBuf::from(source.as_str())),
        }
    }
}

/// Media type guessed from the file extension
fn content_type_for(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "html" | "htm" => Some("text/html"),
        "xhtml" => Some("application/xhtml+xml"),
        "txt" => Some("text/plain"),
        "json" => Some("application/json"),
        "xml" => Some("application/xml"),
        "pdf" => Some("application/pdf"),
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        _ => None,
    }
}

#[async_trait]
impl Fetcher for FileFetcher {
    async fn fetch(&self, source: &SourceRef) -> Result<RawDocument, FetchError> {
        let path = Self::path_of(source)
            .ok_or_else(|| FetchError::Transport(format!("not a file source: {source}")))?;

        let content = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FetchError::NotFound,
            _ => FetchError::Transport(format!("{}: {e}", path.display())),
        })?;
        debug!("Read {} bytes from {:?}", content.len(), path);

        let raw = RawDocument::new(source.clone(), content);
        Ok(match content_type_for(&path) {
            Some(content_type) => raw.with_content_type(content_type),
            None => raw,
        })
    }
}

/// Sends `http(s)` sources to the HTTP fetcher and everything else to the file fetcher
pub struct DefaultFetcher {
    http: HttpFetcher,
    file: FileFetcher,
}

impl DefaultFetcher {
    pub fn new(http: HttpFetcher) -> Self {
        Self {
            http,
            file: FileFetcher::new(),
        }
    }
}

#[async_trait]
impl Fetcher for DefaultFetcher {
    async fn fetch(&self, source: &SourceRef) -> Result<RawDocument, FetchError> {
        if HttpFetcher::supports(source) {
            self.http.fetch(source).await
        } else {
            self.file.fetch(source).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::HttpConfig;

    #[tokio::test]
    async fn reads_plain_paths_and_file_urls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.html");
        std::fs::write(&path, "<h1>Hello</h1>").unwrap();

        let by_path = FileFetcher::new()
            .fetch(&SourceRef::new(path.to_string_lossy()))
            .await
            .unwrap();
        assert_eq!(by_path.content, b"<h1>Hello</h1>");
        assert_eq!(by_path.content_type.as_deref(), Some("text/html"));

        let url = url::Url::from_file_path(&path).unwrap();
        let by_url = FileFetcher::new()
            .fetch(&SourceRef::new(url.as_str()))
            .await
            .unwrap();
        assert_eq!(by_url.content, by_path.content);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.html");
        let result = FileFetcher::new()
            .fetch(&SourceRef::new(missing.to_string_lossy()))
            .await;
        assert_eq!(result.unwrap_err(), FetchError::NotFound);
    }

    #[tokio::test]
    async fn non_html_extensions_get_their_content_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, "{}").unwrap();
        let raw = FileFetcher::new()
            .fetch(&SourceRef::new(path.to_string_lossy()))
            .await
            .unwrap();
        assert!(!raw.is_html());
    }

    #[tokio::test]
    async fn default_fetcher_routes_files_locally() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.htm");
        std::fs::write(&path, "<p>x</p>").unwrap();

        let fetcher = DefaultFetcher::new(HttpFetcher::new(HttpConfig::default()).unwrap());
        let raw = fetcher
            .fetch(&SourceRef::new(path.to_string_lossy()))
            .await
            .unwrap();
        assert_eq!(raw.content, b"<p>x</p>");
    }
}
