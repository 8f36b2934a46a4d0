use colored::*;
use image::codecs::jpeg::JpegEncoder;
use image::ImageFormat;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use usvg::fontdb::{Database, Family, Query};

use crate::error::BookError;
use crate::fetcher::{AssetFormat, PageAsset};
use crate::PdfMerger;

const REENCODE_QUALITY: u8 = 90;

/// The written output and the page count read back from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledDocument {
    pub path: PathBuf,
    pub pages: usize,
}

/// Turns the staged page assets of one book into a single PDF.
pub struct Assembler {
    format: AssetFormat,
    svg_options: usvg::Options<'static>,
}

impl Assembler {
    pub fn new(format: AssetFormat) -> Self {
        let svg_options = match format {
            AssetFormat::Vector => svg_options_with_system_fonts(),
            AssetFormat::Raster => usvg::Options::default(),
        };
        Self {
            format,
            svg_options,
        }
    }

    pub async fn assemble(&self, assets: &[PageAsset], output: &Path) -> Result<AssembledDocument, BookError> {
        if assets.is_empty() {
            return Err(BookError::pdf("no pages to assemble"));
        }

        info!(
            "Assembling {} pages into \"{}\"",
            assets.len(),
            output.display().to_string().blue()
        );

        match self.format {
            AssetFormat::Vector => assemble_vector(assets, output, &self.svg_options).await?,
            AssetFormat::Raster => assemble_raster(assets, output).await?,
        }

        let pages = written_page_count(output).await?;
        Ok(AssembledDocument {
            path: output.to_path_buf(),
            pages,
        })
    }
}

/// SVG parsing options with the installed fonts loaded, so `<text>` survives
/// the conversion instead of being dropped.
pub fn svg_options_with_system_fonts() -> usvg::Options<'static> {
    let mut options = usvg::Options::default();
    let fontdb = options.fontdb_mut();
    fontdb.load_system_fonts();

    if fontdb.is_empty() {
        warn!("No system fonts found, text in vector pages will be dropped");
        return options;
    }

    // Generic families default to Windows font names
    if let Some(installed) = first_family(fontdb) {
        for generic in [Family::Serif, Family::SansSerif, Family::Monospace] {
            if resolves(fontdb, generic) {
                continue;
            }
            debug!("Mapping {:?} to \"{}\"", generic, installed);
            match generic {
                Family::Serif => fontdb.set_serif_family(installed.as_str()),
                Family::SansSerif => fontdb.set_sans_serif_family(installed.as_str()),
                _ => fontdb.set_monospace_family(installed.as_str()),
            }
        }
    }

    debug!("Loaded {} font faces", fontdb.len());
    options
}

fn first_family(fontdb: &Database) -> Option<String> {
    fontdb
        .faces()
        .find_map(|face| face.families.first().map(|(name, _)| name.clone()))
}

fn resolves(fontdb: &Database, family: Family<'_>) -> bool {
    fontdb
        .query(&Query {
            families: &[family],
            ..Query::default()
        })
        .is_some()
}

/// Convert each SVG page to a one-page PDF beside it, then concatenate.
async fn assemble_vector(
    assets: &[PageAsset],
    output: &Path,
    options: &usvg::Options<'_>,
) -> Result<(), BookError> {
    let mut merger = PdfMerger::new();

    for asset in assets {
        let pdf_path = svg_to_pdf(&asset.path, options).await?;
        merger.add_pdf(&pdf_path).await?;
    }

    merger.save(output).await?;
    Ok(())
}

/// Decode `path` (plain or gzip-compressed SVG) and write it as a single-page
/// PDF with the `.pdf` extension. Returns the new path.
pub async fn svg_to_pdf(path: &Path, options: &usvg::Options<'_>) -> Result<PathBuf, BookError> {
    let data = fs::read(path).await.map_err(|e| BookError::io(path, e))?;
    let decode_error = |detail: String| BookError::AssetDecode {
        path: path.to_path_buf(),
        detail,
    };

    let tree = usvg::Tree::from_data(&data, options)
        .map_err(|e| decode_error(e.to_string()))?;
    let pdf = svg2pdf::to_pdf(
        &tree,
        svg2pdf::ConversionOptions::default(),
        svg2pdf::PageOptions::default(),
    )
    .map_err(|e| decode_error(e.to_string()))?;

    let pdf_path = path.with_extension("pdf");
    fs::write(&pdf_path, pdf)
        .await
        .map_err(|e| BookError::io(&pdf_path, e))?;

    debug!("Converted {} -> {}", path.display(), pdf_path.display());
    Ok(pdf_path)
}

/// A page image ready to embed as a `DCTDecode` XObject.
struct RasterPage {
    width: u32,
    height: u32,
    color_space: &'static str,
    jpeg: Vec<u8>,
}

impl RasterPage {
    fn decode(path: &Path, data: Vec<u8>) -> Result<Self, BookError> {
        let decode_error = |detail: String| BookError::AssetDecode {
            path: path.to_path_buf(),
            detail,
        };

        let format = image::guess_format(&data).map_err(|e| decode_error(e.to_string()))?;
        let image = image::load_from_memory_with_format(&data, format)
            .map_err(|e| decode_error(e.to_string()))?;
        let (width, height) = (image.width(), image.height());

        if width == 0 || height == 0 {
            return Err(decode_error("image has no pixels".to_string()));
        }

        // The decoder reports CMYK and YCCK sources as RGB, so the frame
        // header decides whether the original bytes can be embedded.
        let passthrough = match format {
            ImageFormat::Jpeg => passthrough_color_space(&data),
            _ => None,
        };

        let (color_space, jpeg) = match passthrough {
            Some(color_space) => (color_space, data),
            None => {
                debug!("Re-encoding {} ({:?}) as JPEG", path.display(), format);
                let rgb = image.to_rgb8();
                let mut jpeg = Vec::new();
                JpegEncoder::new_with_quality(&mut jpeg, REENCODE_QUALITY)
                    .encode_image(&rgb)
                    .map_err(|e| decode_error(e.to_string()))?;
                ("DeviceRGB", jpeg)
            }
        };

        Ok(Self {
            width,
            height,
            color_space,
            jpeg,
        })
    }
}

/// PDF colour space for a baseline 8-bit JPEG with one or three components.
/// CMYK and 12-bit sources have to be re-encoded.
fn passthrough_color_space(jpeg: &[u8]) -> Option<&'static str> {
    match jpeg_frame_header(jpeg)? {
        (8, 1) => Some("DeviceGray"),
        (8, 3) => Some("DeviceRGB"),
        _ => None,
    }
}

/// `(precision, components)` from the first start-of-frame segment.
fn jpeg_frame_header(jpeg: &[u8]) -> Option<(u8, u8)> {
    if !jpeg.starts_with(&[0xFF, 0xD8]) {
        return None;
    }

    let mut pos = 2;
    while pos + 4 <= jpeg.len() {
        if jpeg[pos] != 0xFF {
            return None;
        }
        let marker = jpeg[pos + 1];
        if marker == 0xFF {
            pos += 1;
            continue;
        }

        match marker {
            // SOF0..SOF15 except DHT, JPG and DAC
            0xC0..=0xCF if !matches!(marker, 0xC4 | 0xC8 | 0xCC) => {
                return Some((*jpeg.get(pos + 4)?, *jpeg.get(pos + 9)?));
            }
            0xD9 | 0xDA => return None,
            _ => {
                let length = u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]) as usize;
                pos += 2 + length;
            }
        }
    }

    None
}

/// Every page gets the first image's pixel size (in points) and its image
/// stretched over the whole page.
async fn assemble_raster(assets: &[PageAsset], output: &Path) -> Result<(), BookError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::with_capacity(assets.len());
    let mut page_size = None;

    for asset in assets {
        let data = fs::read(&asset.path)
            .await
            .map_err(|e| BookError::io(&asset.path, e))?;
        let page = RasterPage::decode(&asset.path, data)?;
        let (width, height) = *page_size.get_or_insert((page.width as i64, page.height as i64));

        let image_id = doc.add_object(
            Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => page.width as i64,
                    "Height" => page.height as i64,
                    "ColorSpace" => page.color_space,
                    "BitsPerComponent" => 8,
                    "Filter" => "DCTDecode",
                },
                page.jpeg,
            )
            .with_compression(false),
        );

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![width.into(), 0.into(), 0.into(), height.into(), 0.into(), 0.into()],
                ),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().map_err(BookError::pdf)?,
        ));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => Object::Array(vec![0.into(), 0.into(), width.into(), height.into()]),
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
        });

        debug!("Page {} embedded from {}", asset.index, asset.path.display());
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut data = Vec::new();
    doc.save_to(&mut data)
        .map_err(|e| BookError::pdf(format!("failed to serialize PDF: {}", e)))?;
    fs::write(output, data)
        .await
        .map_err(|e| BookError::io(output, e))?;

    Ok(())
}

async fn written_page_count(path: &Path) -> Result<usize, BookError> {
    let data = fs::read(path).await.map_err(|e| BookError::io(path, e))?;
    let document = Document::load_mem(&data)
        .map_err(|e| BookError::pdf(format!("written PDF cannot be read back: {}", e)))?;
    Ok(document.get_pages().len())
}
