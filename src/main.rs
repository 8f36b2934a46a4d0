use anyhow::{anyhow, Result};
use calameo2pdf::{AssetFormat, Config, Downloader, HttpClient, PdfMerger, Resolver};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;
use tokio::fs;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "calameo2pdf")]
#[command(about = "CLI utility to turn books published on a paginated document viewer into PDFs")]
#[command(version = "0.1.0")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Quality {
    /// Scalable pages with selectable text (slower)
    Vector,
    /// One flattened image per page (faster)
    Raster,
}

impl From<Quality> for AssetFormat {
    fn from(quality: Quality) -> Self {
        match quality {
            Quality::Vector => AssetFormat::Vector,
            Quality::Raster => AssetFormat::Raster,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Download every book listed in the configuration file
    Download {
        /// YAML configuration file
        #[arg(short = 'c', long = "config", default_value = "config.yml")]
        config: PathBuf,

        /// Output directory, overrides `output_dir` from the configuration
        #[arg(short = 'o', long = "outDir")]
        out_dir: Option<PathBuf>,

        /// Page format, overrides `svg_quality` from the configuration
        #[arg(short = 'q', long = "quality", value_enum)]
        quality: Option<Quality>,
    },
    /// Print the metadata of one landing page as JSON without downloading
    Info {
        /// Landing page URL
        url: String,

        /// Configuration file providing HTTP headers
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },
    /// Merge existing PDF files into a single document
    Merge {
        /// Directory containing PDF files to merge
        #[arg(short = 'd', long = "dir")]
        input_dir: PathBuf,

        /// Output file path for the merged PDF
        #[arg(short = 'o', long = "output", default_value = "merged.pdf")]
        output_file: PathBuf,
    },
}

async fn download(config_path: &Path, out_dir: Option<PathBuf>, quality: Option<Quality>) -> Result<()> {
    let config = Config::load(config_path)?;
    let format = quality.map(AssetFormat::from).unwrap_or_else(|| config.asset_format());
    let out_dir = out_dir.unwrap_or_else(|| config.output_dir.clone());

    info!(
        "Downloading {} books as {:?} pages into \"{}\"",
        config.book_list.len(),
        format,
        out_dir.display().to_string().blue()
    );

    let client = HttpClient::new(&config.headers, config.timeout())?;
    let downloader = Downloader::new(client, out_dir, format);
    let summary = downloader.run(&config.book_list).await;

    for failure in &summary.failed {
        warn!("{} {}: {}", "Failed".red(), failure.url, failure.error);
    }
    info!(
        "{} books saved, {} failed",
        summary.completed.len().to_string().green(),
        summary.failed.len().to_string().red()
    );

    Ok(())
}

async fn show_info(url: &str, config_path: Option<&Path>) -> Result<()> {
    let (headers, timeout) = match config_path {
        Some(path) => {
            let config = Config::load(path)?;
            (config.headers.clone(), config.timeout())
        }
        None => (BTreeMap::new(), Duration::from_secs(30)),
    };

    let client = HttpClient::new(&headers, timeout)?;
    let landing = Resolver::default().resolve(&client, url).await?;
    println!("{}", serde_json::to_string_pretty(&landing)?);

    Ok(())
}

async fn merge_pdfs(input_dir: &Path, output_file: &Path) -> Result<()> {
    if !input_dir.exists() {
        return Err(anyhow!("Input directory '{}' does not exist", input_dir.display()));
    }

    info!("Scanning directory: {}", input_dir.display().to_string().green());

    let mut entries = fs::read_dir(input_dir).await?;
    let mut pdf_files = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "pdf") {
            pdf_files.push(path);
        }
    }

    if pdf_files.is_empty() {
        return Err(anyhow!("No PDF files found in '{}'", input_dir.display()));
    }

    // Sort by filename to maintain order (especially numbered files)
    pdf_files.sort();

    info!("Found {} PDF files to merge", pdf_files.len());

    let mut merger = PdfMerger::new();
    for pdf_path in &pdf_files {
        info!("Adding: {}", pdf_path.display().to_string().blue());
        merger.add_pdf(pdf_path).await?;
    }

    let pages = merger.save(output_file).await?;

    info!(
        "Successfully merged {} PDFs ({} pages) into: {}",
        pdf_files.len(),
        pages,
        output_file.display().to_string().green()
    );

    Ok(())
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("calameo2pdf=info"));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let args = Args::parse();

    let result = match args.command {
        Commands::Download {
            config,
            out_dir,
            quality,
        } => download(&config, out_dir, quality).await,
        Commands::Info { url, config } => show_info(&url, config.as_deref()).await,
        Commands::Merge {
            input_dir,
            output_file,
        } => merge_pdfs(&input_dir, &output_file).await,
    };

    if let Err(e) = result {
        error!("{}", format!("Error: {:#}", e).red());
        process::exit(1);
    }
}
