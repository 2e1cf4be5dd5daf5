//! The OCR worker: uploaded documents in, extracted text out.

use std::time::Duration;

use crate::{
    extract::{DocumentKind, extract_document, pdf::PdfRasterizer, tesseract::TextExtractor},
    model::MenuStatus,
    prelude::*,
    storage::ObjectStorage,
    store::{ClaimedUpload, JobStore},
    workers::Worker,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct OcrWorker {
    store: Arc<dyn JobStore>,
    storage: Arc<dyn ObjectStorage>,
    extractor: Arc<dyn TextExtractor>,
    rasterizer: Arc<dyn PdfRasterizer>,
    poll_interval: Duration,
}

impl OcrWorker {
    pub fn new(
        store: Arc<dyn JobStore>,
        storage: Arc<dyn ObjectStorage>,
        extractor: Arc<dyn TextExtractor>,
        rasterizer: Arc<dyn PdfRasterizer>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            storage,
            extractor,
            rasterizer,
            poll_interval,
        }
    }

    /// Download, OCR, and return the storage form of the extracted text.
    ///
    /// All scratch files live in a temporary directory that is removed when
    /// this function returns, on success and failure alike.
    #[instrument(level = "debug", skip_all, fields(id = %claim.id, key = %claim.source_object_key))]
    async fn process(&self, claim: &ClaimedUpload) -> Result<String> {
        let kind = DocumentKind::from_filename(&claim.original_filename)?;
        let scratch = tempfile::TempDir::with_prefix("menu-ocr")?;
        let local_path = self
            .storage
            .download(&claim.source_object_key, scratch.path())
            .await?;
        // Rasterized pages get their own directory: the rasterizer treats
        // everything in its output directory as a page image.
        let pages_dir = scratch.path().join("pages");
        tokio::fs::create_dir(&pages_dir)
            .await
            .context("failed to create the page scratch directory")?;
        let pages = extract_document(
            &local_path,
            kind,
            self.extractor.as_ref(),
            self.rasterizer.as_ref(),
            &pages_dir,
        )
        .await?;
        Ok(pages.to_raw_text())
    }
}

#[async_trait]
impl Worker for OcrWorker {
    fn name(&self) -> &'static str {
        "ocr"
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn tick(&self) -> Result<bool> {
        let Some(claim) = self.store.claim_next_uploaded().await? else {
            return Ok(false);
        };
        info!(id = %claim.id, filename = %claim.original_filename, "claimed document for OCR");
        match self.process(&claim).await {
            Ok(raw_text) => {
                self.store.save_text(claim.id, &raw_text).await?;
                info!(id = %claim.id, chars = raw_text.len(), "extracted text");
            }
            Err(err) => {
                warn!(id = %claim.id, "OCR failed: {:#}", err);
                self.store
                    .mark_failed(claim.id, MenuStatus::OcrFailed, &format!("{err:#}"))
                    .await?;
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{extract::PAGE_DELIMITER, storage::FsObjectStorage, store::memory::MemoryStore};

    struct FixedExtractor(&'static str);

    #[async_trait]
    impl TextExtractor for FixedExtractor {
        async fn extract_text(&self, _image_path: &Path) -> Result<String> {
            Ok(self.0.to_owned())
        }
    }

    struct FakeRasterizer {
        pages: usize,
    }

    #[async_trait]
    impl PdfRasterizer for FakeRasterizer {
        async fn rasterize(&self, _pdf_path: &Path, out_dir: &Path) -> Result<Vec<PathBuf>> {
            let mut paths = Vec::new();
            for n in 0..self.pages {
                let path = out_dir.join(format!("page-{n}.png"));
                std::fs::write(&path, b"png")?;
                paths.push(path);
            }
            Ok(paths)
        }
    }

    fn worker_with(
        store: &MemoryStore,
        storage_root: PathBuf,
        rasterizer_pages: usize,
    ) -> OcrWorker {
        OcrWorker::new(
            Arc::new(store.clone()),
            Arc::new(FsObjectStorage::new(storage_root)),
            Arc::new(FixedExtractor("Paneer Tikka 250")),
            Arc::new(FakeRasterizer {
                pages: rasterizer_pages,
            }),
            DEFAULT_POLL_INTERVAL,
        )
    }

    #[tokio::test]
    async fn image_upload_transitions_to_ocr_done() -> Result<()> {
        let root = tempfile::TempDir::with_prefix("uploads")?;
        std::fs::create_dir(root.path().join("menus"))?;
        std::fs::write(root.path().join("menus/1.png"), b"png")?;

        let store = MemoryStore::new();
        store.seed_restaurant(1, "Pune", "indian");
        let id = store.seed_uploaded(1, "menus/1.png", "menu.png");

        let worker = worker_with(&store, root.path().to_path_buf(), 0);
        assert!(worker.tick().await?);

        let doc = store.get_document(id).await?;
        assert_eq!(doc.status, MenuStatus::OcrDone);
        assert_eq!(doc.raw_text.as_deref(), Some("Paneer Tikka 250"));
        assert!(doc.failure_reason.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn pdf_pages_are_joined_with_the_delimiter() -> Result<()> {
        let root = tempfile::TempDir::with_prefix("uploads")?;
        std::fs::write(root.path().join("1.pdf"), b"pdf")?;

        let store = MemoryStore::new();
        store.seed_restaurant(1, "Pune", "indian");
        let id = store.seed_uploaded(1, "1.pdf", "menu.pdf");

        let worker = worker_with(&store, root.path().to_path_buf(), 2);
        worker.tick().await?;

        let doc = store.get_document(id).await?;
        assert_eq!(doc.status, MenuStatus::OcrDone);
        let raw = doc.raw_text.unwrap();
        assert_eq!(raw.matches(PAGE_DELIMITER).count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn missing_object_transitions_to_ocr_failed() -> Result<()> {
        let root = tempfile::TempDir::with_prefix("uploads")?;
        let store = MemoryStore::new();
        store.seed_restaurant(1, "Pune", "indian");
        let id = store.seed_uploaded(1, "menus/missing.png", "menu.png");

        let worker = worker_with(&store, root.path().to_path_buf(), 0);
        assert!(worker.tick().await?);

        let doc = store.get_document(id).await?;
        assert_eq!(doc.status, MenuStatus::OcrFailed);
        assert!(doc.failure_reason.is_some());
        assert!(doc.raw_text.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn unsupported_extension_transitions_to_ocr_failed() -> Result<()> {
        let root = tempfile::TempDir::with_prefix("uploads")?;
        let store = MemoryStore::new();
        store.seed_restaurant(1, "Pune", "indian");
        let id = store.seed_uploaded(1, "menus/menu.docx", "menu.docx");

        let worker = worker_with(&store, root.path().to_path_buf(), 0);
        worker.tick().await?;

        let doc = store.get_document(id).await?;
        assert_eq!(doc.status, MenuStatus::OcrFailed);
        assert!(doc.failure_reason.unwrap().contains("docx"));
        Ok(())
    }

    #[tokio::test]
    async fn empty_queue_is_a_quiet_tick() -> Result<()> {
        let root = tempfile::TempDir::with_prefix("uploads")?;
        let store = MemoryStore::new();
        let worker = worker_with(&store, root.path().to_path_buf(), 0);
        assert!(!worker.tick().await?);
        Ok(())
    }
}
