//! PDF helpers built on poppler command-line tools.
//!
//! Page counting via pdfinfo, rasterization via pdftoppm, and per-page text
//! via pdftotext. All callers that run inside async tasks should wrap these
//! in `tokio::task::spawn_blocking`.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

/// Errors from PDF tooling.
#[derive(Debug, Error)]
pub enum PdfError {
    #[error("External tool not found: {0}")]
    ToolNotFound(String),

    #[error("PDF processing failed: {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle command output, extracting stdout on success or returning
/// appropriate error.
fn handle_cmd_output(
    result: std::io::Result<std::process::Output>,
    tool_name: &str,
    error_prefix: &str,
) -> Result<String, PdfError> {
    match result {
        Ok(output) => {
            if output.status.success() {
                Ok(String::from_utf8_lossy(&output.stdout).to_string())
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(PdfError::Failed(format!("{}: {}", error_prefix, stderr)))
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(PdfError::ToolNotFound(tool_name.to_string()))
        }
        Err(e) => Err(PdfError::Io(e)),
    }
}

/// Get the page count of a PDF.
pub fn page_count(pdf_path: &Path) -> Option<u32> {
    let output = Command::new("pdfinfo").arg(pdf_path).output().ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        if line.starts_with("Pages:") {
            return line.split_whitespace().nth(1).and_then(|s| s.parse().ok());
        }
    }
    None
}

/// Extract text from a whole PDF using pdftotext.
pub fn full_text(pdf_path: &Path) -> Result<String, PdfError> {
    let output = Command::new("pdftotext")
        .args(["-layout", "-enc", "UTF-8"])
        .arg(pdf_path)
        .arg("-")
        .output();

    handle_cmd_output(output, "pdftotext (install poppler-utils)", "pdftotext failed")
}

/// Extract text from a single page of a PDF using pdftotext.
pub fn page_text(pdf_path: &Path, page: u32) -> Result<String, PdfError> {
    let page_str = page.to_string();
    let output = Command::new("pdftotext")
        .args(["-layout", "-enc", "UTF-8", "-f", &page_str, "-l", &page_str])
        .arg(pdf_path)
        .arg("-")
        .output();

    handle_cmd_output(
        output,
        "pdftotext (install poppler-utils)",
        &format!("pdftotext failed on page {}", page),
    )
}

/// Rasterize a single PDF page to a PNG in the given directory.
pub fn page_to_image(pdf_path: &Path, page: u32, out_dir: &Path) -> Result<PathBuf, PdfError> {
    let page_str = page.to_string();
    let status = Command::new("pdftoppm")
        .args(["-png", "-r", "300", "-f", &page_str, "-l", &page_str])
        .arg(pdf_path)
        .arg(out_dir.join("page"))
        .status();

    match status {
        Ok(s) if s.success() => {}
        Ok(_) => {
            return Err(PdfError::Failed(format!(
                "pdftoppm failed on page {}",
                page
            )))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PdfError::ToolNotFound(
                "pdftoppm (install poppler-utils)".to_string(),
            ))
        }
        Err(e) => return Err(PdfError::Io(e)),
    }

    find_page_image(out_dir, page).ok_or_else(|| {
        PdfError::Failed(format!("pdftoppm produced no image for page {}", page))
    })
}

/// Find the image file for a specific page number.
/// pdftoppm names files like page-01.png, page-1.png, or page-001.png
/// depending on the document's page count.
fn find_page_image(dir: &Path, page: u32) -> Option<PathBuf> {
    for digits in [1, 2, 3, 4] {
        let filename = format!("page-{:0width$}.png", page, width = digits);
        let path = dir.join(&filename);
        if path.exists() {
            return Some(path);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_page_image_probes_digit_widths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("page-003.png"), b"png").unwrap();
        let found = find_page_image(dir.path(), 3).unwrap();
        assert!(found.ends_with("page-003.png"));
        assert!(find_page_image(dir.path(), 4).is_none());
    }

    #[test]
    fn page_count_on_missing_file_is_none() {
        assert_eq!(page_count(Path::new("/nonexistent/file.pdf")), None);
    }
}
