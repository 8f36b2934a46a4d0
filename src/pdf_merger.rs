use lopdf::{dictionary, Document, Object, ObjectId};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::error::BookError;

/// Concatenates PDF files, page order following insertion order.
///
/// Each source page tree is grafted unchanged under a new root `Pages` node,
/// so attributes a page inherits from its own tree (media box, resources)
/// are kept.
pub struct PdfMerger {
    documents: Vec<(PathBuf, Document)>,
}

impl PdfMerger {
    pub fn new() -> Self {
        Self {
            documents: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub async fn add_pdf(&mut self, path: &Path) -> Result<(), BookError> {
        let data = fs::read(path).await.map_err(|e| BookError::io(path, e))?;

        let document = Document::load_mem(&data).map_err(|e| BookError::AssetDecode {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;

        debug!("Loaded PDF with {} pages from {}", document.get_pages().len(), path.display());
        self.documents.push((path.to_path_buf(), document));

        Ok(())
    }

    /// Build the merged document in memory.
    pub fn merge(&self) -> Result<Document, BookError> {
        if self.documents.is_empty() {
            return Err(BookError::pdf("no PDFs added to merge"));
        }

        let mut merged = Document::with_version("1.7");
        let mut next_id = 1;
        let mut subtrees: Vec<ObjectId> = Vec::with_capacity(self.documents.len());
        let mut total_pages = 0;

        for (path, document) in &self.documents {
            let mut doc = document.clone();

            // Renumber objects to avoid conflicts
            doc.renumber_objects_with(next_id);
            next_id = doc.max_id + 1;

            let catalog_id = doc
                .trailer
                .get(b"Root")
                .and_then(Object::as_reference)
                .map_err(|e| BookError::pdf(format!("{}: no catalog: {}", path.display(), e)))?;
            let pages_id = doc
                .catalog()
                .and_then(|catalog| catalog.get(b"Pages"))
                .and_then(Object::as_reference)
                .map_err(|e| BookError::pdf(format!("{}: no page tree: {}", path.display(), e)))?;

            let pages = doc.get_pages().len();
            debug!("Grafting {} ({} pages)", path.display(), pages);

            doc.objects.remove(&catalog_id);
            merged.objects.extend(doc.objects);

            subtrees.push(pages_id);
            total_pages += pages;
        }

        merged.max_id = next_id - 1;
        let root_pages_id = merged.new_object_id();

        for subtree in &subtrees {
            merged
                .get_object_mut(*subtree)
                .and_then(Object::as_dict_mut)
                .map_err(BookError::pdf)?
                .set("Parent", root_pages_id);
        }

        merged.objects.insert(
            root_pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => subtrees.into_iter().map(Object::Reference).collect::<Vec<_>>(),
                "Count" => total_pages as i64,
            }),
        );

        let catalog_id = merged.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => root_pages_id,
        });
        merged.trailer.set("Root", catalog_id);

        info!("Merged {} documents into {} pages", self.documents.len(), total_pages);
        Ok(merged)
    }

    /// Merge and write to `output_path`; returns the page count.
    pub async fn save(&self, output_path: &Path) -> Result<usize, BookError> {
        let mut merged = self.merge()?;
        let pages = merged.get_pages().len();

        let mut data = Vec::new();
        merged
            .save_to(&mut data)
            .map_err(|e| BookError::pdf(format!("failed to serialize merged PDF: {}", e)))?;

        fs::write(output_path, data)
            .await
            .map_err(|e| BookError::io(output_path, e))?;

        info!("Successfully merged {} PDFs into {}", self.documents.len(), output_path.display());
        Ok(pages)
    }
}

impl Default for PdfMerger {
    fn default() -> Self {
        Self::new()
    }
}
