//! Tesseract OCR provider via command-line.
//!
//! The last-resort provider: reachable only when no AI provider is
//! configured or available. Runs locally, consumes no API quota, and
//! needs the `tesseract` binary (plus poppler-utils for PDFs) on PATH.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::process::Command;

use async_trait::async_trait;
use tempfile::TempDir;

use super::{ExtractProvider, ProviderError, ProviderId, ProviderRequest, ProviderResponse};
use crate::config::TesseractConfig;
use crate::pdf;

/// Nominal confidence for Tesseract output.
const TESSERACT_CONFIDENCE: f32 = 0.60;

/// Tesseract OCR provider using the system binary.
pub struct TesseractProvider {
    language: String,
}

impl TesseractProvider {
    /// Create a new Tesseract provider from configuration.
    pub fn new(config: &TesseractConfig) -> Self {
        Self {
            language: config.language.clone(),
        }
    }

    /// Set the OCR language.
    pub fn with_language(mut self, lang: impl Into<String>) -> Self {
        self.language = lang.into();
        self
    }

    /// Run tesseract on an image file.
    fn run_tesseract(&self, image_path: &Path) -> Result<String, ProviderError> {
        let output = Command::new("tesseract")
            .arg(image_path)
            .arg("stdout")
            .args(["-l", &self.language])
            .output();

        match output {
            Ok(out) => {
                if out.status.success() {
                    Ok(String::from_utf8_lossy(&out.stdout).to_string())
                } else {
                    let stderr = String::from_utf8_lossy(&out.stderr);
                    Err(ProviderError::Invocation {
                        provider: ProviderId::Tesseract,
                        message: format!("tesseract failed: {}", stderr),
                    })
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(
                ProviderError::NotAvailable("tesseract binary not found on PATH".to_string()),
            ),
            Err(e) => Err(ProviderError::Io(e)),
        }
    }

    /// OCR every page of a PDF, joining the page texts.
    fn ocr_pdf(&self, pdf_path: &Path) -> Result<String, ProviderError> {
        let pages = pdf::page_count(pdf_path).unwrap_or(1);
        let temp_dir = TempDir::new()?;

        let mut page_texts = Vec::with_capacity(pages as usize);
        for page in 1..=pages {
            let image = pdf::page_to_image(pdf_path, page, temp_dir.path()).map_err(|e| {
                ProviderError::Invocation {
                    provider: ProviderId::Tesseract,
                    message: e.to_string(),
                }
            })?;
            page_texts.push(self.run_tesseract(&image)?);
        }

        Ok(page_texts.join("\n\n"))
    }

    /// Blocking extraction body, run under spawn_blocking.
    fn extract_blocking(&self, request: &ProviderRequest) -> Result<String, ProviderError> {
        let temp_dir = TempDir::new()?;

        let extension = match request.mime_type.as_str() {
            "application/pdf" => "pdf",
            "image/png" => "png",
            "image/tiff" => "tif",
            _ => "jpg",
        };
        let input_path = temp_dir.path().join(format!("input.{}", extension));
        let mut file = std::fs::File::create(&input_path)?;
        file.write_all(&request.bytes)?;

        if extension == "pdf" {
            self.ocr_pdf(&input_path)
        } else {
            self.run_tesseract(&input_path)
        }
    }
}

#[async_trait]
impl ExtractProvider for TesseractProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Tesseract
    }

    fn is_available(&self) -> bool {
        which::which("tesseract").is_ok()
    }

    fn availability_hint(&self) -> String {
        if which::which("tesseract").is_err() {
            "tesseract binary not found. Install tesseract-ocr (and poppler-utils for PDFs)"
                .to_string()
        } else {
            format!("Tesseract is available (language: {})", self.language)
        }
    }

    async fn extract(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let language = self.language.clone();
        let request = request.clone();

        let text = tokio::task::spawn_blocking(move || {
            let provider = TesseractProvider { language };
            provider.extract_blocking(&request)
        })
        .await
        .map_err(|e| ProviderError::Invocation {
            provider: ProviderId::Tesseract,
            message: format!("OCR task panicked: {}", e),
        })??;

        let mut metadata = HashMap::new();
        metadata.insert("language".to_string(), self.language.clone());

        Ok(ProviderResponse {
            text,
            confidence: TESSERACT_CONFIDENCE,
            model: None,
            metadata,
        })
    }

    /// Tesseract needs no session warming; a binary check is enough and
    /// costs nothing.
    async fn warm_ping(&self) -> Result<(), ProviderError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(ProviderError::NotAvailable(self.availability_hint()))
        }
    }
}
