//! Document classification ahead of routing.
//!
//! Classification is heuristic first: file extension, byte-size tiers,
//! filename keyword matching, and a lightweight byte-scan of PDFs for
//! font/text-operator markers to separate native-text from scanned
//! documents. Only when heuristic confidence falls below the escalation
//! threshold (and an AI provider is reachable) is a single provider call
//! spent on classification; a malformed response falls back to the pure
//! heuristic, never to the caller.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::provider::{ProviderId, ProviderPool, ProviderRequest};

/// Heuristic confidence below which classification escalates to an AI
/// provider.
pub const ESCALATION_THRESHOLD: u8 = 70;

/// Filename keyword to document kind mapping.
const KIND_KEYWORDS: &[(&str, &str)] = &[
    ("invoice", "invoice"),
    ("receipt", "receipt"),
    ("contract", "contract"),
    ("agreement", "contract"),
    ("statement", "bank_statement"),
    ("w-2", "tax_form"),
    ("w2", "tax_form"),
    ("1099", "tax_form"),
    ("1040", "tax_form"),
    ("claim", "insurance_claim"),
    ("policy", "insurance_policy"),
    ("prescription", "medical_record"),
    ("lab_result", "medical_record"),
    ("purchase_order", "purchase_order"),
    ("manifest", "shipping_manifest"),
    ("bill_of_lading", "shipping_manifest"),
    ("report", "report"),
    ("memo", "correspondence"),
    ("letter", "correspondence"),
];

/// Document kinds whose layout is dominated by tabular data.
const TABULAR_KINDS: &[&str] = &["invoice", "bank_statement", "purchase_order", "tax_form"];

/// Structural complexity tier of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

impl Complexity {
    /// Multiplier applied to per-provider base time estimates.
    pub fn multiplier(&self) -> f32 {
        match self {
            Complexity::Simple => 0.5,
            Complexity::Medium => 1.0,
            Complexity::Complex => 1.8,
        }
    }
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Complexity::Simple => "simple",
            Complexity::Medium => "medium",
            Complexity::Complex => "complex",
        };
        write!(f, "{}", s)
    }
}

/// Structural profile of a document, produced once per document and
/// immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub document_kind: String,
    pub complexity: Complexity,
    pub has_table: bool,
    pub has_chart: bool,
    pub has_handwriting: bool,
    pub recommended_provider: ProviderId,
    /// Confidence 0-100.
    pub confidence: u8,
    pub reasoning: String,
}

#[derive(Debug, Error)]
enum ClassifyError {
    #[error("classification response was not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Provider(#[from] crate::provider::ProviderError),
}

/// Structured classification returned by an AI provider.
#[derive(Debug, Deserialize)]
struct AiClassification {
    document_kind: String,
    complexity: Complexity,
    #[serde(default)]
    has_table: bool,
    #[serde(default)]
    has_chart: bool,
    #[serde(default)]
    has_handwriting: bool,
    #[serde(default)]
    recommended_provider: Option<String>,
    confidence: u8,
    #[serde(default)]
    reasoning: String,
}

/// Instruction sent for provider-side classification.
const CLASSIFY_INSTRUCTION: &str = "Classify this document's structure. Respond with ONLY a JSON \
object, no commentary and no code fences, with keys: document_kind (snake_case string), \
complexity (\"simple\", \"medium\", or \"complex\"), has_table (bool), has_chart (bool), \
has_handwriting (bool), recommended_provider (\"gemini\", \"groq\", or \"deepseek\"), \
confidence (integer 0-100), reasoning (one sentence).";

/// Sniff the MIME type from content, preferring the detected type when the
/// declared one is generic or belongs to a different type family.
pub fn sniff_mime(bytes: &[u8], declared: &str) -> String {
    let head = &bytes[..bytes.len().min(8192)];

    let declared_normalized = declared
        .split(';')
        .next()
        .unwrap_or(declared)
        .trim()
        .to_lowercase();

    let Some(detected) = infer::get(head) else {
        return declared_normalized;
    };
    let detected_mime = detected.mime_type();

    if detected_mime == declared_normalized {
        return declared_normalized;
    }

    if declared_normalized == "application/octet-stream"
        || declared_normalized == "binary/octet-stream"
        || declared_normalized.is_empty()
    {
        return detected_mime.to_string();
    }

    let declared_base = declared_normalized.split('/').next().unwrap_or("");
    let detected_base = detected_mime.split('/').next().unwrap_or("");
    if declared_base != detected_base {
        // Different type families: trust the content.
        return detected_mime.to_string();
    }

    declared_normalized
}

/// Scan PDF bytes for font and text-operator markers. Native-text PDFs
/// carry font dictionaries and text-show operators in their object streams;
/// pure image scans do not.
pub fn pdf_has_text_layer(bytes: &[u8]) -> bool {
    let has_font = find_subsequence(bytes, b"/Font").is_some()
        || find_subsequence(bytes, b"/ToUnicode").is_some();
    let has_text_op = find_subsequence(bytes, b"Tj").is_some()
        || find_subsequence(bytes, b"TJ").is_some()
        || find_subsequence(bytes, b"/Text").is_some();
    has_font && has_text_op
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Size tier thresholds in bytes.
const SIMPLE_MAX_BYTES: usize = 256 * 1024;
const MEDIUM_MAX_BYTES: usize = 4 * 1024 * 1024;

fn size_tier(len: usize) -> Complexity {
    if len < SIMPLE_MAX_BYTES {
        Complexity::Simple
    } else if len < MEDIUM_MAX_BYTES {
        Complexity::Medium
    } else {
        Complexity::Complex
    }
}

fn kind_from_filename(path: &Path) -> Option<&'static str> {
    let name = path.file_name()?.to_string_lossy().to_lowercase();
    KIND_KEYWORDS
        .iter()
        .find(|(keyword, _)| name.contains(keyword))
        .map(|(_, kind)| *kind)
}

/// Classifier producing a structural profile for routing.
pub struct Classifier {
    pool: Arc<ProviderPool>,
}

impl Classifier {
    pub fn new(pool: Arc<ProviderPool>) -> Self {
        Self { pool }
    }

    /// Classify a document, escalating to an AI provider only when the
    /// heuristics are unsure and a provider is reachable.
    pub async fn classify(&self, path: &Path, bytes: &Arc<Vec<u8>>, mime: &str) -> Classification {
        let heuristic = fast_classify(path, bytes, mime);

        if heuristic.confidence >= ESCALATION_THRESHOLD {
            return heuristic;
        }

        let Some(best) = self.pool.best_available_ai() else {
            debug!("No AI provider available for classification escalation");
            return heuristic;
        };

        match self.classify_with_provider(best, bytes, mime).await {
            Ok(classification) => classification,
            Err(e) => {
                warn!(
                    "Provider classification via {} failed ({}), using heuristics",
                    best, e
                );
                basic_classification(path, bytes, mime)
            }
        }
    }

    /// Ask an AI provider for a structured classification and parse it.
    async fn classify_with_provider(
        &self,
        id: ProviderId,
        bytes: &Arc<Vec<u8>>,
        mime: &str,
    ) -> Result<Classification, ClassifyError> {
        let provider = self.pool.get(id).ok_or_else(|| {
            ClassifyError::Provider(crate::provider::ProviderError::NotAvailable(format!(
                "{} not registered",
                id
            )))
        })?;

        let request =
            ProviderRequest::new(bytes.clone(), mime, CLASSIFY_INSTRUCTION).with_max_output_tokens(512);
        let response = provider.extract(&request).await?;

        let parsed: AiClassification = serde_json::from_str(strip_code_fences(&response.text))?;

        let recommended = parsed
            .recommended_provider
            .as_deref()
            .and_then(ProviderId::from_str)
            // The classifier never recommends OCR; the router alone may
            // reach it, and only when no AI provider is configured.
            .filter(|p| p.is_ai())
            .unwrap_or(id);

        Ok(Classification {
            document_kind: parsed.document_kind,
            complexity: parsed.complexity,
            has_table: parsed.has_table,
            has_chart: parsed.has_chart,
            has_handwriting: parsed.has_handwriting,
            recommended_provider: recommended,
            confidence: parsed.confidence.min(100),
            reasoning: parsed.reasoning,
        })
    }
}

/// O(1) heuristic classification: extension, size tier, filename keywords,
/// and the PDF text-layer byte-scan. Never touches the network.
pub fn fast_classify(path: &Path, bytes: &[u8], mime: &str) -> Classification {
    let mut confidence: u8 = 40;
    let mut reasons: Vec<String> = Vec::new();

    let kind = match kind_from_filename(path) {
        Some(kind) => {
            confidence += 30;
            reasons.push(format!("filename suggests {}", kind));
            kind.to_string()
        }
        None => "unknown".to_string(),
    };

    let complexity = size_tier(bytes.len());
    reasons.push(format!("{} bytes -> {}", bytes.len(), complexity));

    let is_pdf = mime == "application/pdf";
    let is_image = mime.starts_with("image/");
    if is_pdf || is_image || mime == "text/plain" {
        confidence += 15;
        reasons.push(format!("recognized type {}", mime));
    }

    let native_text = is_pdf && pdf_has_text_layer(bytes);
    if is_pdf {
        confidence += 10;
        reasons.push(if native_text {
            "PDF has a text layer".to_string()
        } else {
            "PDF appears scanned".to_string()
        });
    }

    // Native-text PDFs take the fast multimodal path; scanned material
    // prefers a vision model, with the quick one for simple documents.
    let recommended_provider = if native_text {
        ProviderId::Gemini
    } else if (is_pdf || is_image) && complexity == Complexity::Simple {
        ProviderId::Groq
    } else {
        ProviderId::Gemini
    };

    let has_table = TABULAR_KINDS.contains(&kind.as_str());

    Classification {
        document_kind: kind,
        complexity,
        has_table,
        has_chart: false,
        has_handwriting: false,
        recommended_provider,
        confidence: confidence.min(95),
        reasoning: reasons.join("; "),
    }
}

/// Pure-heuristic floor used when provider classification fails. Identical
/// to `fast_classify` but named separately because it is the guaranteed
/// no-network path.
pub fn basic_classification(path: &Path, bytes: &[u8], mime: &str) -> Classification {
    fast_classify(path, bytes, mime)
}

/// Strip Markdown code fences that models sometimes wrap around JSON.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open.strip_suffix("```").unwrap_or(without_open).trim()
}

/// Metadata describing how a classification was produced, for diagnostics.
pub fn classification_metadata(classification: &Classification) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    metadata.insert(
        "document_kind".to_string(),
        classification.document_kind.clone(),
    );
    metadata.insert(
        "complexity".to_string(),
        classification.complexity.to_string(),
    );
    metadata.insert(
        "classification_confidence".to_string(),
        classification.confidence.to_string(),
    );
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal PDF-looking bytes with font and text-operator markers.
    fn native_pdf_bytes() -> Vec<u8> {
        b"%PDF-1.4\n1 0 obj << /Type /Font /Subtype /Type1 >> endobj\nBT (hello) Tj ET\n%%EOF"
            .to_vec()
    }

    fn scanned_pdf_bytes() -> Vec<u8> {
        b"%PDF-1.4\n1 0 obj << /Type /XObject /Subtype /Image >> endobj\n%%EOF".to_vec()
    }

    #[test]
    fn text_layer_detection() {
        assert!(pdf_has_text_layer(&native_pdf_bytes()));
        assert!(!pdf_has_text_layer(&scanned_pdf_bytes()));
    }

    #[test]
    fn invoice_pdf_classifies_confidently() {
        let bytes = native_pdf_bytes();
        let c = fast_classify(
            Path::new("invoice_march.pdf"),
            &bytes,
            "application/pdf",
        );
        assert_eq!(c.document_kind, "invoice");
        assert_eq!(c.complexity, Complexity::Simple);
        assert!(c.has_table);
        assert_eq!(c.recommended_provider, ProviderId::Gemini);
        assert!(c.confidence >= ESCALATION_THRESHOLD);
    }

    #[test]
    fn scanned_simple_document_prefers_fast_vision() {
        let bytes = scanned_pdf_bytes();
        let c = fast_classify(Path::new("scan_0001.pdf"), &bytes, "application/pdf");
        assert_eq!(c.document_kind, "unknown");
        assert_eq!(c.recommended_provider, ProviderId::Groq);
    }

    #[test]
    fn large_scan_prefers_high_capability() {
        let mut bytes = scanned_pdf_bytes();
        bytes.resize(5 * 1024 * 1024, 0);
        let c = fast_classify(Path::new("scan.pdf"), &bytes, "application/pdf");
        assert_eq!(c.complexity, Complexity::Complex);
        assert_eq!(c.recommended_provider, ProviderId::Gemini);
    }

    #[test]
    fn heuristics_never_recommend_ocr() {
        for (name, mime) in [
            ("a.pdf", "application/pdf"),
            ("b.png", "image/png"),
            ("weird.bin", "application/octet-stream"),
        ] {
            let c = fast_classify(Path::new(name), b"data", mime);
            assert!(c.recommended_provider.is_ai());
        }
    }

    #[test]
    fn unknown_binary_is_low_confidence() {
        let c = fast_classify(Path::new("mystery.bin"), b"\x00\x01", "application/octet-stream");
        assert!(c.confidence < ESCALATION_THRESHOLD);
    }

    #[test]
    fn sniff_overrides_cross_family_mismatch() {
        // PDF magic declared as HTML: content wins.
        let pdf = b"%PDF-1.4 rest of file";
        assert_eq!(sniff_mime(pdf, "text/html"), "application/pdf");
        // Octet-stream always yields to detection.
        assert_eq!(sniff_mime(pdf, "application/octet-stream"), "application/pdf");
    }

    #[test]
    fn sniff_keeps_declared_when_consistent() {
        let pdf = b"%PDF-1.4 rest of file";
        assert_eq!(
            sniff_mime(pdf, "application/pdf; charset=binary"),
            "application/pdf"
        );
        // Undetectable content keeps the declared type.
        assert_eq!(sniff_mime(b"just text", "text/plain"), "text/plain");
    }

    #[test]
    fn code_fence_stripping() {
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[tokio::test]
    async fn confident_heuristics_skip_provider_call() {
        // Empty pool: if classification tried a provider, it would have no
        // candidates, but a confident heuristic never looks.
        let classifier = Classifier::new(Arc::new(ProviderPool::new()));
        let bytes = Arc::new(native_pdf_bytes());
        let c = classifier
            .classify(Path::new("invoice_march.pdf"), &bytes, "application/pdf")
            .await;
        assert!(c.confidence >= ESCALATION_THRESHOLD);
        assert_eq!(c.document_kind, "invoice");
    }

    #[tokio::test]
    async fn low_confidence_without_providers_uses_heuristics() {
        let classifier = Classifier::new(Arc::new(ProviderPool::new()));
        let bytes = Arc::new(b"\x00\x01\x02".to_vec());
        let c = classifier
            .classify(Path::new("mystery.bin"), &bytes, "application/octet-stream")
            .await;
        assert_eq!(c.document_kind, "unknown");
        assert!(c.confidence < ESCALATION_THRESHOLD);
    }
}
