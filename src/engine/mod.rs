//! Execution engine: cascading fallback and racing across providers.
//!
//! Cascading mode walks the routing decision's candidate order strictly in
//! sequence, recording every attempt, until a provider succeeds or the list
//! is exhausted. Racing mode fires one task per warm provider and takes the
//! first success within a hard deadline; losers are abandoned, not
//! cancelled - their results are discarded whenever they resolve. When the
//! deadline elapses or no provider is warm, racing falls back to a cascade
//! that starts from OCR.
//!
//! A provider failure is never fatal to the overall call. The only fatal
//! condition is every candidate (including OCR) failing, which surfaces as
//! one aggregate error carrying the full attempt log.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tempfile::TempDir;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::classify::{classification_metadata, sniff_mime, Classifier};
use crate::config::EngineConfig;
use crate::metrics::{ExtractionMetric, MetricsHandle};
use crate::pdf::{self, PdfError};
use crate::provider::{
    ExtractProvider, ProviderError, ProviderId, ProviderPool, ProviderRequest,
};
use crate::refine::{merge_pages, AdaptiveRefiner, PageEvaluation, PageText, RefineError, RefinementOutcome};
use crate::route::Router;
use crate::warm::WarmSessionManager;

/// Default extraction instruction sent to model providers.
pub const EXTRACT_INSTRUCTION: &str = "Extract all text from this document. Return only the \
extracted text, preserving the original layout and formatting as much as possible. Do not add \
any explanations or commentary.";

/// How providers are invoked for one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Sequential attempts with cascading fallback (default).
    Cascade,
    /// Concurrent attempts across warm providers, first success wins.
    Race,
}

/// Outcome of one provider attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed,
    TimedOut,
    /// A racing loser still in flight when the winner returned. Its result
    /// is discarded whenever it resolves.
    Abandoned,
}

/// One entry in the append-only attempt log.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub provider: ProviderId,
    pub outcome: AttemptOutcome,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

/// Final result of processing one document.
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub text: String,
    /// Confidence 0.0 - 1.0 as reported by the winning provider.
    pub confidence: f32,
    /// Exactly the provider that produced `text`, which may differ from the
    /// routing decision's first choice when fallback occurred.
    pub provider_used: ProviderId,
    pub attempt_log: Vec<AttemptRecord>,
    pub metadata: HashMap<String, String>,
}

/// Fatal processing errors. Individual provider failures are recovered
/// internally and never surface here.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Cannot read document: {0}")]
    Unreadable(#[from] std::io::Error),

    #[error("All providers exhausted after {} attempts", .attempts.len())]
    AllProvidersExhausted { attempts: Vec<AttemptRecord> },
}

/// Result of the bounded refinement loop.
#[derive(Debug, Clone)]
pub struct RefinedExtraction {
    pub pages: Vec<PageText>,
    pub outcome: RefinementOutcome,
}

/// Rasterizes a PDF page so a vision provider can re-extract it.
pub trait PageRasterizer: Send + Sync {
    fn rasterize(&self, pdf_path: &Path, page: u32) -> Result<Vec<u8>, PdfError>;
}

/// Default rasterizer backed by poppler's pdftoppm.
pub struct PopplerRasterizer;

impl PageRasterizer for PopplerRasterizer {
    fn rasterize(&self, pdf_path: &Path, page: u32) -> Result<Vec<u8>, PdfError> {
        let dir = TempDir::new()?;
        let image = pdf::page_to_image(pdf_path, page, dir.path())?;
        Ok(std::fs::read(image)?)
    }
}

/// Orchestrates classification, routing, and provider invocation.
pub struct ExecutionEngine {
    pool: Arc<ProviderPool>,
    warm: Arc<WarmSessionManager>,
    classifier: Classifier,
    router: Router,
    metrics: MetricsHandle,
    config: EngineConfig,
    rasterizer: Arc<dyn PageRasterizer>,
}

impl ExecutionEngine {
    pub fn new(
        pool: Arc<ProviderPool>,
        warm: Arc<WarmSessionManager>,
        metrics: MetricsHandle,
        config: EngineConfig,
    ) -> Self {
        Self {
            classifier: Classifier::new(pool.clone()),
            router: Router::new(pool.clone(), warm.clone()),
            pool,
            warm,
            metrics,
            config,
            rasterizer: Arc::new(PopplerRasterizer),
        }
    }

    /// Replace the page rasterizer (used by tests and embedders).
    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn PageRasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    /// Process one document end to end: read, sniff, classify, route, and
    /// execute in the requested mode.
    pub async fn process(
        &self,
        path: &Path,
        declared_mime: &str,
        industry_tag: &str,
        mode: ExecutionMode,
    ) -> Result<ProcessingResult, ProcessError> {
        let started = Instant::now();
        let document_id = uuid::Uuid::new_v4().to_string();

        let bytes = Arc::new(tokio::fs::read(path).await?);
        let mime = sniff_mime(&bytes, declared_mime);
        if mime != declared_mime {
            debug!("MIME corrected: declared {}, using {}", declared_mime, mime);
        }

        let classification = self.classifier.classify(path, &bytes, &mime).await;
        let decision = self.router.route(&classification);
        info!(
            "Routing {}: {} ({}), est {:.1}s",
            path.display(),
            decision.chosen_provider,
            decision.reason,
            decision.estimated_seconds
        );

        let request = ProviderRequest::new(bytes, mime.as_str(), EXTRACT_INSTRUCTION)
            .with_max_output_tokens(self.config.max_output_tokens);

        let (mut result, method) = match mode {
            ExecutionMode::Cascade => (
                self.cascade(&decision.candidate_order, &request, Vec::new())
                    .await,
                "cascade",
            ),
            ExecutionMode::Race => self.race(&decision.candidate_order, &request).await,
        };

        if let Ok(r) = &mut result {
            r.metadata.extend(classification_metadata(&classification));
            r.metadata
                .insert("routing_reason".to_string(), decision.reason.clone());
            if !industry_tag.is_empty() {
                r.metadata
                    .insert("industry".to_string(), industry_tag.to_string());
            }
        }

        self.report(&document_id, method, &result, started);
        result
    }

    /// Sequential fallback over the candidate order. `attempts` carries any
    /// records already accumulated (racing fallback path).
    async fn cascade(
        &self,
        candidates: &[ProviderId],
        request: &ProviderRequest,
        mut attempts: Vec<AttemptRecord>,
    ) -> Result<ProcessingResult, ProcessError> {
        for id in candidates {
            let Some(provider) = self.pool.get(*id) else {
                continue;
            };

            if !provider.is_available() {
                debug!("Skipping {}: {}", id, provider.availability_hint());
                attempts.push(AttemptRecord {
                    provider: *id,
                    outcome: AttemptOutcome::Failed,
                    elapsed_ms: 0,
                    error: Some(format!(
                        "attempt {}: not available: {}",
                        attempts.len(),
                        provider.availability_hint()
                    )),
                });
                continue;
            }

            let start = Instant::now();
            match tokio::time::timeout(self.config.attempt_timeout(), provider.extract(request))
                .await
            {
                Ok(Ok(response)) => {
                    let elapsed_ms = start.elapsed().as_millis() as u64;
                    debug!("{} succeeded in {}ms", id, elapsed_ms);
                    attempts.push(AttemptRecord {
                        provider: *id,
                        outcome: AttemptOutcome::Succeeded,
                        elapsed_ms,
                        error: None,
                    });
                    return Ok(ProcessingResult {
                        text: response.text,
                        confidence: response.confidence,
                        provider_used: *id,
                        attempt_log: attempts,
                        metadata: response.metadata,
                    });
                }
                Ok(Err(e)) => {
                    warn!("{} failed, trying next candidate: {}", id, e);
                    attempts.push(AttemptRecord {
                        provider: *id,
                        outcome: AttemptOutcome::Failed,
                        elapsed_ms: start.elapsed().as_millis() as u64,
                        error: Some(format!("attempt {}: {}", attempts.len(), e)),
                    });
                }
                Err(_) => {
                    warn!(
                        "{} exceeded the {}s attempt deadline, trying next candidate",
                        id, self.config.attempt_timeout_secs
                    );
                    attempts.push(AttemptRecord {
                        provider: *id,
                        outcome: AttemptOutcome::TimedOut,
                        elapsed_ms: start.elapsed().as_millis() as u64,
                        error: Some(format!(
                            "attempt {}: exceeded {}s deadline",
                            attempts.len(),
                            self.config.attempt_timeout_secs
                        )),
                    });
                }
            }
        }

        Err(ProcessError::AllProvidersExhausted { attempts })
    }

    /// Fire a call to every warm candidate concurrently and take the first
    /// success within the racing deadline. Losing calls are left running;
    /// their results are discarded when they resolve.
    async fn race(
        &self,
        candidates: &[ProviderId],
        request: &ProviderRequest,
    ) -> (Result<ProcessingResult, ProcessError>, &'static str) {
        let warm: Vec<ProviderId> = candidates
            .iter()
            .copied()
            .filter(|id| self.warm.is_warm(*id))
            .collect();

        if warm.is_empty() {
            info!("No warm providers to race, cascading from OCR");
            let order = ocr_first(candidates);
            return (
                self.cascade(&order, request, Vec::new()).await,
                "race-fallback",
            );
        }

        let race_started = Instant::now();
        let (tx, mut rx) =
            mpsc::unbounded_channel::<(ProviderId, u64, Result<crate::provider::ProviderResponse, ProviderError>)>();

        for id in &warm {
            let Some(provider) = self.pool.get(*id) else {
                continue;
            };
            spawn_racer(provider, *id, request.clone(), tx.clone());
        }
        drop(tx);

        let deadline = tokio::time::sleep(self.config.race_deadline());
        tokio::pin!(deadline);

        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut pending: Vec<ProviderId> = warm.clone();

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    warn!(
                        "Racing deadline of {}s elapsed with no winner",
                        self.config.race_deadline_secs
                    );
                    break;
                }
                received = rx.recv() => {
                    match received {
                        Some((id, elapsed_ms, Ok(response))) => {
                            pending.retain(|p| *p != id);
                            attempts.push(AttemptRecord {
                                provider: id,
                                outcome: AttemptOutcome::Succeeded,
                                elapsed_ms,
                                error: None,
                            });
                            let abandoned_ms = race_started.elapsed().as_millis() as u64;
                            for loser in &pending {
                                attempts.push(AttemptRecord {
                                    provider: *loser,
                                    outcome: AttemptOutcome::Abandoned,
                                    elapsed_ms: abandoned_ms,
                                    error: Some("abandoned after first success".to_string()),
                                });
                            }
                            debug!("{} won the race in {}ms", id, elapsed_ms);
                            return (
                                Ok(ProcessingResult {
                                    text: response.text,
                                    confidence: response.confidence,
                                    provider_used: id,
                                    attempt_log: attempts,
                                    metadata: response.metadata,
                                }),
                                "race",
                            );
                        }
                        Some((id, elapsed_ms, Err(e))) => {
                            warn!("{} lost the race with an error: {}", id, e);
                            pending.retain(|p| *p != id);
                            attempts.push(AttemptRecord {
                                provider: id,
                                outcome: AttemptOutcome::Failed,
                                elapsed_ms,
                                error: Some(format!("attempt {}: {}", attempts.len(), e)),
                            });
                            if pending.is_empty() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        // Deadline elapsed (or every racer failed): record what never
        // finished, then cascade starting from OCR.
        let deadline_ms = race_started.elapsed().as_millis() as u64;
        for id in &pending {
            attempts.push(AttemptRecord {
                provider: *id,
                outcome: AttemptOutcome::TimedOut,
                elapsed_ms: deadline_ms,
                error: Some(format!(
                    "attempt {}: racing deadline of {}s elapsed",
                    attempts.len(),
                    self.config.race_deadline_secs
                )),
            });
        }

        let order = ocr_first(candidates);
        (
            self.cascade(&order, request, attempts).await,
            "race-fallback",
        )
    }

    /// Run the bounded refinement loop: consolidate per-page text, re-extract
    /// any flagged pages through the recommended provider, and re-invoke the
    /// refiner at most once with only the corrected pages.
    pub async fn refine_extraction(
        &self,
        pdf_path: &Path,
        pages: Vec<PageText>,
        industry_tag: &str,
        refiner: &dyn AdaptiveRefiner,
    ) -> Result<RefinedExtraction, RefineError> {
        let outcome = refiner.refine(&pages, industry_tag).await?;

        let flagged: Vec<PageEvaluation> =
            outcome.flagged_pages().into_iter().cloned().collect();
        if flagged.is_empty() {
            return Ok(RefinedExtraction { pages, outcome });
        }

        info!(
            "Refiner flagged {} of {} pages for re-extraction",
            flagged.len(),
            pages.len()
        );

        let mut corrected = Vec::new();
        for evaluation in &flagged {
            match self.re_extract_page(pdf_path, evaluation).await {
                Ok(page) => corrected.push(page),
                Err(e) => warn!(
                    "Re-extraction of page {} failed, keeping original text: {}",
                    evaluation.page_number, e
                ),
            }
        }

        if corrected.is_empty() {
            return Ok(RefinedExtraction { pages, outcome });
        }

        // Exactly one more refiner pass, over the corrected pages only.
        let second = refiner.refine(&corrected, industry_tag).await?;
        let pages = merge_pages(pages, corrected);
        Ok(RefinedExtraction {
            pages,
            outcome: second,
        })
    }

    /// Re-extract a single page through the refiner's recommended provider,
    /// falling back to the best available AI provider.
    async fn re_extract_page(
        &self,
        pdf_path: &Path,
        evaluation: &PageEvaluation,
    ) -> Result<PageText, ProviderError> {
        let provider_id = evaluation
            .recommended_method
            .filter(|id| self.pool.get(*id).is_some_and(|p| p.is_available()))
            .or_else(|| self.pool.best_available_ai())
            .ok_or_else(|| {
                ProviderError::NotAvailable(
                    "no provider available for page re-extraction".to_string(),
                )
            })?;
        let provider = self.pool.get(provider_id).ok_or_else(|| {
            ProviderError::NotAvailable(format!("{} not registered", provider_id))
        })?;

        let page = evaluation.page_number;
        let path = pdf_path.to_path_buf();
        let rasterizer = self.rasterizer.clone();
        let image_bytes = tokio::task::spawn_blocking(move || rasterizer.rasterize(&path, page))
            .await
            .map_err(|e| ProviderError::Invocation {
                provider: provider_id,
                message: format!("rasterization task panicked: {}", e),
            })?
            .map_err(|e| ProviderError::Invocation {
                provider: provider_id,
                message: e.to_string(),
            })?;

        let request = ProviderRequest::new(Arc::new(image_bytes), "image/png", EXTRACT_INSTRUCTION)
            .with_max_output_tokens(self.config.max_output_tokens);

        let start = Instant::now();
        let response =
            tokio::time::timeout(self.config.attempt_timeout(), provider.extract(&request))
                .await
                .map_err(|_| ProviderError::Timeout {
                    provider: provider_id,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                })??;

        Ok(PageText {
            page_number: page,
            text: response.text,
            confidence: response.confidence,
            source: provider_id,
        })
    }

    /// Report the outcome to the metrics collaborator. Fire-and-forget.
    fn report(
        &self,
        document_id: &str,
        method: &str,
        result: &Result<ProcessingResult, ProcessError>,
        started: Instant,
    ) {
        let metric = match result {
            Ok(r) => ExtractionMetric {
                document_id: document_id.to_string(),
                method: method.to_string(),
                provider: Some(r.provider_used),
                confidence: r.confidence,
                processing_time_ms: started.elapsed().as_millis() as u64,
                errors: attempt_errors(&r.attempt_log),
                recorded_at: Utc::now(),
            },
            Err(e) => {
                let errors = match e {
                    ProcessError::AllProvidersExhausted { attempts } => attempt_errors(attempts),
                    other => vec![other.to_string()],
                };
                ExtractionMetric {
                    document_id: document_id.to_string(),
                    method: method.to_string(),
                    provider: None,
                    confidence: 0.0,
                    processing_time_ms: started.elapsed().as_millis() as u64,
                    errors,
                    recorded_at: Utc::now(),
                }
            }
        };
        self.metrics.record(metric);
    }
}

/// Spawn one racing task. The task is detached on purpose: if it loses, its
/// send fails against a closed channel and the result is discarded.
fn spawn_racer(
    provider: Arc<dyn ExtractProvider>,
    id: ProviderId,
    request: ProviderRequest,
    tx: mpsc::UnboundedSender<(ProviderId, u64, Result<crate::provider::ProviderResponse, ProviderError>)>,
) {
    tokio::spawn(async move {
        let start = Instant::now();
        let result = provider.extract(&request).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        let _ = tx.send((id, elapsed_ms, result));
    });
}

/// Reorder candidates so Tesseract leads: the racing fallback cascade
/// starts from OCR because the deadline is already blown and the local
/// engine is the predictable option.
fn ocr_first(candidates: &[ProviderId]) -> Vec<ProviderId> {
    let mut order = Vec::with_capacity(candidates.len());
    if candidates.contains(&ProviderId::Tesseract) {
        order.push(ProviderId::Tesseract);
    }
    for id in candidates {
        if *id != ProviderId::Tesseract {
            order.push(*id);
        }
    }
    order
}

/// Collect the non-empty error strings from an attempt log.
fn attempt_errors(attempts: &[AttemptRecord]) -> Vec<String> {
    attempts
        .iter()
        .filter_map(|a| {
            a.error
                .as_ref()
                .map(|e| format!("{}: {}", a.provider, e))
        })
        .collect()
}
