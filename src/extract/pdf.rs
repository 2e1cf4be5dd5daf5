//! PDF rasterization using Poppler's CLI tools.

use std::{collections::BTreeMap, sync::LazyLock, time::Duration};

use regex::Regex;
use tokio::process::Command;

use crate::{
    prelude::*,
    process_util::{check_for_command_failure, output_with_timeout},
};

/// Rasterization DPI. 300 is what the OCR engine is tuned for.
const RASTERIZE_DPI: u32 = 300;

/// Hard cap on a single poppler tool run. A hung rasterization must not
/// stall the worker loop.
const PDF_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Poppler tools sometimes exit 0 while printing errors, so we screen their
/// stderr line by line.
static ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error").expect("failed to compile regex"));

/// "xref num" complaints are recoverable and downgraded to noise.
static DOWNGRADE_TO_WARNING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)error: xref num").expect("failed to compile regex")
});

/// Does this stderr line contain a real error?
fn is_error_line(line: &str) -> bool {
    ERROR_REGEX.is_match(line) && !DOWNGRADE_TO_WARNING_REGEX.is_match(line)
}

/// Converts a PDF into one image per page.
#[async_trait]
pub trait PdfRasterizer: Send + Sync {
    /// Rasterize every page of `pdf_path` into `out_dir`, returning the
    /// image paths in page order.
    async fn rasterize(&self, pdf_path: &Path, out_dir: &Path) -> Result<Vec<PathBuf>>;
}

/// [`PdfRasterizer`] wrapping Poppler's `pdftocairo` and `pdfinfo`.
#[derive(Debug, Default)]
#[non_exhaustive]
pub struct PopplerRasterizer {}

impl PopplerRasterizer {
    pub fn new() -> Self {
        Self {}
    }
}

#[async_trait]
impl PdfRasterizer for PopplerRasterizer {
    #[instrument(level = "debug", skip_all, fields(path = %pdf_path.display()))]
    async fn rasterize(&self, pdf_path: &Path, out_dir: &Path) -> Result<Vec<PathBuf>> {
        let total_pages = pdf_page_count(pdf_path).await?;
        debug!(total_pages, "Rasterizing PDF");

        // pdftocairo appends page digits to this base name when the PDF has
        // more than one page.
        let out_base = out_dir.join("page");
        let output = output_with_timeout(
            "pdftocairo",
            PDF_TOOL_TIMEOUT,
            Command::new("pdftocairo")
                .arg("-png")
                .arg("-r")
                .arg(RASTERIZE_DPI.to_string())
                .arg(pdf_path)
                .arg(&out_base)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .with_context(|| format!("failed to rasterize {:?}", pdf_path.display()))?;
        check_for_command_failure("pdftocairo", &output, Some(&is_error_line))?;

        // Page files sort lexically because pdftocairo zero-pads the digits.
        let mut page_paths = out_dir
            .read_dir()
            .with_context(|| format!("failed to read {:?}", out_dir.display()))?
            .map(|entry| {
                let entry = entry.with_context(|| {
                    format!("failed to read entry in {:?}", out_dir.display())
                })?;
                Ok(entry.path())
            })
            .collect::<Result<Vec<_>>>()?;
        page_paths.sort();

        if page_paths.is_empty() {
            return Err(anyhow!(
                "pdftocairo produced no pages for {:?}",
                pdf_path.display()
            ));
        }
        Ok(page_paths)
    }
}

/// Get the number of pages in a PDF file.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn pdf_page_count(path: &Path) -> Result<usize> {
    let output = output_with_timeout(
        "pdfinfo",
        PDF_TOOL_TIMEOUT,
        Command::new("pdfinfo").arg(path).kill_on_drop(true).output(),
    )
    .await
    .with_context(|| format!("failed to inspect {:?}", path.display()))?;
    check_for_command_failure("pdfinfo", &output, None)?;

    // Parse the output of pdfinfo into properties.
    let output =
        String::from_utf8(output.stdout).context("pdfinfo output was not valid UTF-8")?;
    let mut properties = BTreeMap::new();
    for line in output.lines() {
        let mut parts = line.splitn(2, ':');
        let key = parts.next().unwrap_or("").trim();
        let value = parts.next().unwrap_or("").trim();
        properties.insert(key.to_string(), value.to_string());
    }

    let page_count_str = properties
        .get("Pages")
        .ok_or_else(|| anyhow!("failed to find page count in pdfinfo output"))?;
    page_count_str.parse::<usize>().with_context(|| {
        format!(
            "failed to parse page count for {:?} from pdfinfo output",
            path.display()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    static TEST_PDF_PATH: &str = "tests/fixtures/two_pages.pdf";

    #[test]
    fn is_error_line_works() {
        assert!(is_error_line("error: something went wrong"));
        assert!(is_error_line("ERROR: something went wrong"));
        assert!(!is_error_line("Warning: something is odd"));
        assert!(!is_error_line(
            "Internal Error: xref num 1234 not found but needed, document has changes, reconstruct aborted"
        ));
    }

    #[tokio::test]
    #[ignore = "Requires poppler-utils to be installed"]
    async fn page_count_returns_correct_number_of_pages() -> Result<()> {
        let page_count = pdf_page_count(Path::new(TEST_PDF_PATH)).await?;
        assert_eq!(page_count, 2);
        Ok(())
    }

    #[tokio::test]
    #[ignore = "Requires poppler-utils to be installed"]
    async fn rasterize_produces_one_image_per_page() -> Result<()> {
        let tmpdir = tempfile::TempDir::with_prefix("pages")?;
        let rasterizer = PopplerRasterizer::new();
        let pages = rasterizer
            .rasterize(Path::new(TEST_PDF_PATH), tmpdir.path())
            .await?;
        assert_eq!(pages.len(), 2);
        Ok(())
    }
}
