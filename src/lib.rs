//! # calameo2pdf
//!
//! A CLI utility to download books published on a paginated document viewer
//! and turn each one into a single PDF.
//!
//! For every configured landing page the pipeline
//!
//! - reads the book metadata and the page asset location from the page head,
//! - downloads every page (`.svgz` vector or `.jpg` raster) into a staging
//!   directory,
//! - assembles the pages, in order, into `{Title}/{Title}.pdf`.
//!
//! A failing book is logged and skipped; the next one is still attempted.
//!
//! ## Usage
//!
//! ```bash
//! calameo2pdf download --config config.yml
//! ```

mod assembler;
mod config;
mod downloader;
mod error;
mod fetcher;
mod http;
mod pdf_merger;
mod resolver;

pub use assembler::{svg_options_with_system_fonts, svg_to_pdf, AssembledDocument, Assembler};
pub use config::Config;
pub use downloader::{sanitize_title, BookFailure, Downloader, RunSummary};
pub use error::{BookError, ConfigError};
pub use fetcher::{AssetFormat, PageAsset, PageFetcher};
pub use http::{fetch_bytes, Fetch, HttpClient, HttpResponse};
pub use pdf_merger::PdfMerger;
pub use resolver::{
    AssetBasePath, BookDescription, DescriptionParser, LabelledDescriptionParser, LandingPage,
    Resolver, MAX_PAGES,
};
