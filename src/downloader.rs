use colored::*;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::assembler::Assembler;
use crate::error::BookError;
use crate::fetcher::{AssetFormat, PageFetcher};
use crate::http::Fetch;
use crate::resolver::{LandingPage, Resolver};

/// Keep alphanumerics, `-` and `_`; drop everything else, then trailing
/// whitespace.
pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
        .collect::<String>()
        .trim_end()
        .to_string()
}

#[derive(Debug)]
pub struct BookFailure {
    pub url: String,
    pub error: BookError,
}

/// Outcome of a whole run, one entry per configured book.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub completed: Vec<PathBuf>,
    pub failed: Vec<BookFailure>,
}

/// Drives resolve → fetch → assemble for each book, one after the other,
/// over a single shared HTTP client.
pub struct Downloader<F> {
    client: F,
    out_dir: PathBuf,
    resolver: Resolver,
    fetcher: PageFetcher,
    assembler: Assembler,
}

impl<F: Fetch> Downloader<F> {
    pub fn new(client: F, out_dir: impl Into<PathBuf>, format: AssetFormat) -> Self {
        Self {
            client,
            out_dir: out_dir.into(),
            resolver: Resolver::default(),
            fetcher: PageFetcher::new(format),
            assembler: Assembler::new(format),
        }
    }

    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn client(&self) -> &F {
        &self.client
    }

    /// Process every target in order. A failing book is logged and skipped.
    pub async fn run(&self, targets: &[String]) -> RunSummary {
        let mut summary = RunSummary::default();

        for (index, url) in targets.iter().enumerate() {
            let span = info_span!("book", n = index + 1, url = %url);

            match self.download_book(url).instrument(span.clone()).await {
                Ok(path) => {
                    span.in_scope(|| {
                        info!("Successfully saved \"{}\"", path.display().to_string().green())
                    });
                    summary.completed.push(path);
                }
                Err(e) => {
                    span.in_scope(|| error!("{}", format!("Skipping book: {}", e).red()));
                    summary.failed.push(BookFailure {
                        url: url.clone(),
                        error: e,
                    });
                }
            }
        }

        summary
    }

    /// Download one book and return the path of its PDF.
    pub async fn download_book(&self, url: &str) -> Result<PathBuf, BookError> {
        let landing = self.resolver.resolve(&self.client, url).await?;

        let name = sanitize_title(&landing.description.title);
        if name.is_empty() {
            return Err(BookError::metadata(format!(
                "title \"{}\" has no usable characters for a file name",
                landing.description.title
            )));
        }

        let book_dir = self.out_dir.join(&name);
        let created = !book_dir.exists();
        fs::create_dir_all(&book_dir)
            .await
            .map_err(|e| BookError::io(&book_dir, e))?;

        let output = book_dir.join(format!("{}.pdf", name));
        let result = self.fetch_and_assemble(&landing, &book_dir, &output).await;

        if result.is_err() && created {
            remove_dir_if_empty(&book_dir).await;
        }

        result
    }

    async fn fetch_and_assemble(
        &self,
        landing: &LandingPage,
        book_dir: &Path,
        output: &Path,
    ) -> Result<PathBuf, BookError> {
        let staging = tempfile::Builder::new()
            .prefix(".temp")
            .tempdir_in(book_dir)
            .map_err(|e| BookError::io(book_dir, e))?;

        let result = self.assemble_staged(landing, staging.path(), output).await;

        let staging_path = staging.path().to_path_buf();
        if let Err(e) = staging.close() {
            warn!("Failed to remove {}: {}", staging_path.display(), e);
        }

        result
    }

    /// Fetch and assemble inside `staging_dir`; `output` is only replaced
    /// once the assembled page count is verified.
    async fn assemble_staged(
        &self,
        landing: &LandingPage,
        staging_dir: &Path,
        output: &Path,
    ) -> Result<PathBuf, BookError> {
        let expected = landing.description.pages;
        let assets = self
            .fetcher
            .fetch_all(&self.client, &landing.asset_base, expected, staging_dir)
            .await?;

        let partial = staging_dir.join("assembled.pdf");
        let document = self.assembler.assemble(&assets, &partial).await?;
        if document.pages != expected {
            return Err(BookError::PageCountMismatch {
                expected,
                actual: document.pages,
            });
        }

        fs::rename(&partial, output)
            .await
            .map_err(|e| BookError::io(output, e))?;

        Ok(output.to_path_buf())
    }
}

async fn remove_dir_if_empty(dir: &Path) {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to read {}: {}", dir.display(), e);
            return;
        }
    };

    match entries.next_entry().await {
        Ok(None) => {
            if let Err(e) = fs::remove_dir(dir).await {
                warn!("Failed to remove {}: {}", dir.display(), e);
            }
        }
        Ok(Some(_)) => debug!("Keeping {}, it is not empty", dir.display()),
        Err(e) => warn!("Failed to read {}: {}", dir.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_title() {
        assert_eq!(sanitize_title("My Book: Part 2!"), "MyBookPart2");
        assert_eq!(sanitize_title("snake_case-title"), "snake_case-title");
        assert_eq!(sanitize_title("Économie générale"), "Économiegénérale");
        assert_eq!(sanitize_title("?!"), "");
    }

    #[tokio::test]
    async fn test_remove_dir_if_empty_keeps_populated_dirs() {
        let root = tempfile::tempdir().unwrap();
        let empty = root.path().join("empty");
        let full = root.path().join("full");
        std::fs::create_dir(&empty).unwrap();
        std::fs::create_dir(&full).unwrap();
        std::fs::write(full.join("keep.pdf"), b"x").unwrap();

        remove_dir_if_empty(&empty).await;
        remove_dir_if_empty(&full).await;

        assert!(!empty.exists());
        assert!(full.join("keep.pdf").exists());
    }

    #[tokio::test]
    async fn test_remove_dir_if_empty_tolerates_missing_dir() {
        let root = tempfile::tempdir().unwrap();
        let gone = root.path().join("gone");

        remove_dir_if_empty(&gone).await;

        assert!(!gone.exists());
        assert!(root.path().exists());
    }
}
