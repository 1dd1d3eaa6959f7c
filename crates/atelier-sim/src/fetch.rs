//! Model fetching over HTTP(S) and from the local filesystem

use anyhow::{Context, Result};
use async_trait::async_trait;
use atelier_core::loader::ModelFetcher;
use atelier_core::LoadError;
use std::path::PathBuf;
use tracing::debug;
use url::Url;

/// Fetches `http(s)://` URLs with reqwest, `file://` URLs and bare paths from disk
pub struct HostFetcher {
    client: reqwest::Client,
}

impl HostFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }

    async fn fetch_http(&self, url: &str) -> Result<Vec<u8>, LoadError> {
        let fail = |reason: String| LoadError::Fetch {
            url: url.to_string(),
            reason,
        };

        let response = self.client.get(url).send().await.map_err(|e| fail(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(fail(format!("HTTP {}", status)));
        }
        let bytes = response.bytes().await.map_err(|e| fail(e.to_string()))?;
        debug!(url = %url, bytes = bytes.len(), "Fetched model");
        Ok(bytes.to_vec())
    }
}

/// Filesystem path for `file://` URLs and plain paths
fn local_path(url: &str) -> Option<PathBuf> {
    match Url::parse(url) {
        Ok(parsed) if parsed.scheme() == "file" => parsed.to_file_path().ok(),
        // Windows drive letter
        Ok(parsed) if parsed.scheme().len() == 1 => Some(PathBuf::from(url)),
        Ok(_) => None,
        // Not an absolute URL, treat it as a path
        Err(_) => Some(PathBuf::from(url)),
    }
}

#[async_trait]
impl ModelFetcher for HostFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError> {
        match local_path(url) {
            Some(path) => tokio::fs::read(&path).await.map_err(|e| LoadError::Fetch {
                url: url.to_string(),
                reason: format!("{}: {}", path.display(), e),
            }),
            None => self.fetch_http(url).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_path() {
        assert_eq!(local_path("file:///srv/a.glb"), Some(PathBuf::from("/srv/a.glb")));
        assert_eq!(local_path("models/a.glb"), Some(PathBuf::from("models/a.glb")));
        assert_eq!(local_path("file:///srv/lounge%20chair.glb"), Some(PathBuf::from("/srv/lounge chair.glb")));
        assert_eq!(local_path("https://cdn.example.com/a.glb"), None);
    }

    #[tokio::test]
    async fn test_fetch_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ottoman.gltf");
        std::fs::write(&path, atelier_core::sim::SAMPLE_GLTF).unwrap();

        let fetcher = HostFetcher::new().unwrap();
        let url = format!("file://{}", path.display());
        let bytes = fetcher.fetch(&url).await.unwrap();
        assert_eq!(bytes, atelier_core::sim::SAMPLE_GLTF.as_bytes());

        let err = fetcher.fetch(&format!("file://{}", dir.path().join("missing.glb").display())).await.unwrap_err();
        assert!(matches!(err, LoadError::Fetch { .. }));
    }

    #[tokio::test]
    async fn test_fetch_encoded_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lounge chair.gltf");
        std::fs::write(&path, atelier_core::sim::SAMPLE_GLTF).unwrap();

        let url = Url::from_file_path(&path).unwrap();
        assert!(url.as_str().contains("lounge%20chair"));
        let bytes = HostFetcher::new().unwrap().fetch(url.as_str()).await.unwrap();
        assert_eq!(bytes, atelier_core::sim::SAMPLE_GLTF.as_bytes());
    }

    #[tokio::test]
    async fn test_loader_over_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ottoman.gltf");
        std::fs::write(&path, atelier_core::sim::SAMPLE_GLTF).unwrap();

        let loader = atelier_core::AssetLoader::with_gltf(
            std::sync::Arc::new(HostFetcher::new().unwrap()),
            atelier_core::config::LoaderConfig::default(),
        );
        let model = loader.load(path.to_str().unwrap()).await.unwrap();
        assert_eq!(model.animations.len(), 1);
        assert!(loader.is_cached(path.to_str().unwrap()));
    }
}
