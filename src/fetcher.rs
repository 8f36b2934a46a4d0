use colored::*;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::error::BookError;
use crate::http::{fetch_bytes, Fetch};
use crate::resolver::AssetBasePath;

// The page count comes from the landing page; don't trust it for allocation.
const MAX_PREALLOCATED: usize = 1024;

/// Which per-page asset to download, and therefore how to assemble.
///
/// Vector pages keep selectable, scalable content but are slower to convert.
/// Raster pages are flattened images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetFormat {
    Vector,
    Raster,
}

impl AssetFormat {
    pub fn suffix(&self) -> &'static str {
        match self {
            AssetFormat::Vector => ".svgz",
            AssetFormat::Raster => ".jpg",
        }
    }
}

/// One downloaded page, 1-indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageAsset {
    pub index: usize,
    pub path: PathBuf,
}

pub struct PageFetcher {
    format: AssetFormat,
}

impl PageFetcher {
    pub fn new(format: AssetFormat) -> Self {
        Self { format }
    }

    pub fn staged_path(&self, staging_dir: &Path, index: usize) -> PathBuf {
        staging_dir.join(format!("output_{}{}", index, self.format.suffix()))
    }

    /// Download pages `1..=pages` in order into `staging_dir`.
    ///
    /// Stops at the first failing page; nothing is returned for a partial set.
    pub async fn fetch_all<F: Fetch>(
        &self,
        client: &F,
        base: &AssetBasePath,
        pages: usize,
        staging_dir: &Path,
    ) -> Result<Vec<PageAsset>, BookError> {
        info!("Downloading {} pages from \"{}\"", pages, base.as_str().green());

        let mut assets = Vec::with_capacity(pages.min(MAX_PREALLOCATED));

        for index in 1..=pages {
            let url = base.page_url(index, self.format.suffix());
            let path = self.staged_path(staging_dir, index);

            let body = fetch_bytes(client, &url).await?;
            fs::write(&path, &body)
                .await
                .map_err(|e| BookError::io(&path, e))?;

            debug!("Page {}/{} -> {} ({} bytes)", index, pages, path.display(), body.len());
            assets.push(PageAsset { index, path });
        }

        Ok(assets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpResponse;
    use std::sync::Mutex;

    /// Serves `page-N` bodies and records the requested URLs.
    struct Pages {
        missing: Option<usize>,
        requested: Mutex<Vec<String>>,
    }

    impl Fetch for Pages {
        async fn get(&self, url: &str) -> Result<HttpResponse, BookError> {
            self.requested.lock().unwrap().push(url.to_string());
            let index = url.rsplit("/p").next().unwrap().split('.').next().unwrap();
            if self.missing.map(|m| m.to_string()) == Some(index.to_string()) {
                return Ok(HttpResponse::status(404));
            }
            Ok(HttpResponse::ok(format!("page-{}", index).into_bytes()))
        }
    }

    fn base() -> AssetBasePath {
        AssetBasePath::from_preview_url("https://cdn.example.com/book/p1.jpg").unwrap()
    }

    #[test]
    fn test_suffixes() {
        assert_eq!(AssetFormat::Vector.suffix(), ".svgz");
        assert_eq!(AssetFormat::Raster.suffix(), ".jpg");
    }

    #[tokio::test]
    async fn test_fetches_every_page_inclusive() {
        let dir = tempfile::tempdir().unwrap();
        let client = Pages {
            missing: None,
            requested: Mutex::new(Vec::new()),
        };

        let assets = PageFetcher::new(AssetFormat::Raster)
            .fetch_all(&client, &base(), 12, dir.path())
            .await
            .unwrap();

        assert_eq!(assets.len(), 12);
        for (i, asset) in assets.iter().enumerate() {
            assert_eq!(asset.index, i + 1);
            assert_eq!(asset.path, dir.path().join(format!("output_{}.jpg", i + 1)));
            assert_eq!(
                std::fs::read(&asset.path).unwrap(),
                format!("page-{}", i + 1).into_bytes()
            );
        }

        let requested = client.requested.lock().unwrap();
        assert_eq!(requested.first().unwrap(), "https://cdn.example.com/book/p1.jpg");
        assert_eq!(requested.last().unwrap(), "https://cdn.example.com/book/p12.jpg");
    }

    #[tokio::test]
    async fn test_missing_page_aborts_remaining_fetches() {
        let dir = tempfile::tempdir().unwrap();
        let client = Pages {
            missing: Some(3),
            requested: Mutex::new(Vec::new()),
        };

        let err = PageFetcher::new(AssetFormat::Vector)
            .fetch_all(&client, &base(), 5, dir.path())
            .await
            .unwrap_err();

        assert!(matches!(err, BookError::NotFound { url } if url.ends_with("/p3.svgz")));
        assert_eq!(client.requested.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_huge_page_count_fails_without_allocating() {
        let dir = tempfile::tempdir().unwrap();
        let client = Pages {
            missing: Some(2),
            requested: Mutex::new(Vec::new()),
        };

        let err = PageFetcher::new(AssetFormat::Raster)
            .fetch_all(&client, &base(), usize::MAX, dir.path())
            .await
            .unwrap_err();

        assert!(matches!(err, BookError::NotFound { url } if url.ends_with("/p2.jpg")));
        assert_eq!(client.requested.lock().unwrap().len(), 2);
    }
}
