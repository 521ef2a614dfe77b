//! Adaptive refinement extension contract.
//!
//! For large multi-page documents, an external collaborator consumes the
//! per-page text this engine extracted plus an industry tag, and returns
//! consolidated entities alongside a self-evaluation naming pages that need
//! re-extraction. The engine re-extracts those pages through the
//! recommended provider and re-invokes the collaborator at most once with
//! the corrected pages (bounded retry, no loop).
//!
//! The collaborator is a black box: an RPC-style async call whose internal
//! retries are opaque here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::provider::ProviderId;

/// Text extracted from one page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageText {
    pub page_number: u32,
    pub text: String,
    /// Confidence 0.0 - 1.0.
    pub confidence: f32,
    /// Which provider produced this page's text.
    pub source: ProviderId,
}

/// Verdict on a single page from the refiner's self-evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageEvaluation {
    pub page_number: u32,
    pub needs_reanalysis: bool,
    /// Provider the refiner recommends for re-extraction.
    #[serde(default)]
    pub recommended_method: Option<ProviderId>,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelfEvaluation {
    pub page_evaluations: Vec<PageEvaluation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingPlan {
    pub batches: u32,
    pub fallback_needed: bool,
}

/// Consolidated output of one refiner invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementOutcome {
    /// Consolidated entities/summaries; shape is industry-specific and
    /// opaque to this engine.
    pub extracted_data: serde_json::Value,
    /// Confidence 0.0 - 1.0.
    pub confidence: f32,
    #[serde(default)]
    pub self_evaluation: SelfEvaluation,
    #[serde(default)]
    pub processing_plan: ProcessingPlan,
}

impl RefinementOutcome {
    /// Pages flagged for re-extraction, with their recommended providers.
    pub fn flagged_pages(&self) -> Vec<&PageEvaluation> {
        self.self_evaluation
            .page_evaluations
            .iter()
            .filter(|e| e.needs_reanalysis)
            .collect()
    }
}

/// Errors from the refinement collaborator.
#[derive(Debug, Error)]
pub enum RefineError {
    #[error("Refiner call failed: {0}")]
    Call(String),

    #[error("Refiner returned malformed data: {0}")]
    Malformed(String),
}

/// The refinement collaborator seam.
#[async_trait]
pub trait AdaptiveRefiner: Send + Sync {
    /// Consolidate per-page text into structured output, evaluating which
    /// pages need another pass.
    async fn refine(
        &self,
        pages: &[PageText],
        industry: &str,
    ) -> Result<RefinementOutcome, RefineError>;
}

/// Merge corrected pages into the original set by page number, keeping the
/// result ordered.
pub fn merge_pages(original: Vec<PageText>, corrected: Vec<PageText>) -> Vec<PageText> {
    let mut merged = original;
    for page in corrected {
        match merged
            .iter_mut()
            .find(|p| p.page_number == page.page_number)
        {
            Some(slot) => *slot = page,
            None => merged.push(page),
        }
    }
    merged.sort_by_key(|p| p.page_number);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(n: u32, text: &str, source: ProviderId) -> PageText {
        PageText {
            page_number: n,
            text: text.to_string(),
            confidence: 0.9,
            source,
        }
    }

    #[test]
    fn merge_replaces_by_page_number() {
        let original = vec![
            page(1, "one", ProviderId::Gemini),
            page(2, "garbled", ProviderId::Groq),
            page(3, "three", ProviderId::Gemini),
        ];
        let corrected = vec![page(2, "two", ProviderId::DeepSeek)];

        let merged = merge_pages(original, corrected);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[1].text, "two");
        assert_eq!(merged[1].source, ProviderId::DeepSeek);
        assert_eq!(merged[0].text, "one");
    }

    #[test]
    fn merge_appends_unknown_pages_in_order() {
        let original = vec![page(1, "one", ProviderId::Gemini)];
        let corrected = vec![page(3, "three", ProviderId::Groq)];
        let merged = merge_pages(original, corrected);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1].page_number, 3);
    }

    #[test]
    fn flagged_pages_filters_on_needs_reanalysis() {
        let outcome = RefinementOutcome {
            extracted_data: serde_json::json!({}),
            confidence: 0.8,
            self_evaluation: SelfEvaluation {
                page_evaluations: vec![
                    PageEvaluation {
                        page_number: 1,
                        needs_reanalysis: false,
                        recommended_method: None,
                        reason: String::new(),
                    },
                    PageEvaluation {
                        page_number: 2,
                        needs_reanalysis: true,
                        recommended_method: Some(ProviderId::DeepSeek),
                        reason: "low legibility".to_string(),
                    },
                ],
            },
            processing_plan: ProcessingPlan::default(),
        };
        let flagged = outcome.flagged_pages();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].page_number, 2);
    }

    #[test]
    fn outcome_deserializes_with_missing_optionals() {
        let outcome: RefinementOutcome = serde_json::from_str(
            r#"{"extracted_data": {"total": 42}, "confidence": 0.75}"#,
        )
        .unwrap();
        assert!(outcome.self_evaluation.page_evaluations.is_empty());
        assert!(!outcome.processing_plan.fallback_needed);
    }
}
