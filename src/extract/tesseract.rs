//! OCR via the `tesseract` CLI tool.

use std::time::Duration;

use tokio::fs;
use tokio::process::Command;

use crate::{
    prelude::*,
    process_util::{check_for_command_failure, output_with_timeout},
};

/// Hard cap on a single tesseract run. A hung OCR process must not stall
/// the worker loop.
const OCR_TIMEOUT: Duration = Duration::from_secs(120);

/// Extracts text from a single image.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// OCR one image into plain text.
    async fn extract_text(&self, image_path: &Path) -> Result<String>;
}

/// [`TextExtractor`] wrapping the `tesseract` CLI tool.
#[derive(Debug, Default)]
#[non_exhaustive]
pub struct TesseractExtractor {}

impl TesseractExtractor {
    pub fn new() -> Self {
        Self {}
    }
}

#[async_trait]
impl TextExtractor for TesseractExtractor {
    #[instrument(level = "debug", skip_all, fields(path = %image_path.display()))]
    async fn extract_text(&self, image_path: &Path) -> Result<String> {
        // Tesseract appends `.txt` to the output base name itself.
        let tmpdir = tempfile::TempDir::with_prefix("tesseract")?;
        let output_base = tmpdir.path().join("output");

        let output = output_with_timeout(
            "tesseract",
            OCR_TIMEOUT,
            Command::new("tesseract")
                .arg(image_path)
                .arg(&output_base)
                .kill_on_drop(true)
                .output(),
        )
        .await?;
        check_for_command_failure("tesseract", &output, None)?;

        let text = fs::read_to_string(output_base.with_extension("txt"))
            .await
            .context("cannot read tesseract output file")?;
        Ok(text)
    }
}
