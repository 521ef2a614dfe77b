//! Bounded refinement loop tests.

mod common;

use std::path::PathBuf;
use std::sync::Arc;

use common::{FakeRasterizer, MockProvider, MockRefiner};
use docrelay::config::{EngineConfig, WarmConfig};
use docrelay::engine::ExecutionEngine;
use docrelay::metrics::MetricsHandle;
use docrelay::provider::{ProviderId, ProviderPool};
use docrelay::refine::{
    PageEvaluation, PageText, ProcessingPlan, RefinementOutcome, SelfEvaluation,
};
use docrelay::warm::WarmSessionManager;

fn engine_with(providers: Vec<MockProvider>) -> ExecutionEngine {
    let mut pool = ProviderPool::new();
    for p in providers {
        pool.register(Arc::new(p));
    }
    let pool = Arc::new(pool);
    let warm = WarmSessionManager::new(pool.clone(), WarmConfig::default());
    ExecutionEngine::new(
        pool,
        warm,
        MetricsHandle::disconnected(),
        EngineConfig::default(),
    )
    .with_rasterizer(Arc::new(FakeRasterizer))
}

fn page(n: u32, text: &str) -> PageText {
    PageText {
        page_number: n,
        text: text.to_string(),
        confidence: 0.9,
        source: ProviderId::Gemini,
    }
}

fn outcome_flagging(pages: &[(u32, Option<ProviderId>)], confidence: f32) -> RefinementOutcome {
    RefinementOutcome {
        extracted_data: serde_json::json!({"entities": []}),
        confidence,
        self_evaluation: SelfEvaluation {
            page_evaluations: pages
                .iter()
                .map(|(n, method)| PageEvaluation {
                    page_number: *n,
                    needs_reanalysis: true,
                    recommended_method: *method,
                    reason: "garbled".to_string(),
                })
                .collect(),
        },
        processing_plan: ProcessingPlan {
            batches: 1,
            fallback_needed: true,
        },
    }
}

fn clean_outcome(confidence: f32) -> RefinementOutcome {
    RefinementOutcome {
        extracted_data: serde_json::json!({"entities": ["total: 42"]}),
        confidence,
        self_evaluation: SelfEvaluation::default(),
        processing_plan: ProcessingPlan::default(),
    }
}

#[tokio::test]
async fn clean_evaluation_returns_after_one_pass() {
    let engine = engine_with(vec![MockProvider::new(ProviderId::Gemini)]);
    let refiner = MockRefiner::new(vec![clean_outcome(0.95)]);

    let pages = vec![page(1, "one"), page(2, "two")];
    let refined = engine
        .refine_extraction(&PathBuf::from("doc.pdf"), pages, "logistics", &refiner)
        .await
        .unwrap();

    assert_eq!(refiner.calls(), 1);
    assert_eq!(refined.pages.len(), 2);
    assert_eq!(refined.pages[0].text, "one");
    assert_eq!(refined.outcome.confidence, 0.95);
}

#[tokio::test]
async fn flagged_page_is_re_extracted_via_recommended_provider() {
    let engine = engine_with(vec![
        MockProvider::new(ProviderId::Gemini),
        MockProvider::new(ProviderId::DeepSeek).then_ok("corrected page two"),
    ]);
    let refiner = MockRefiner::new(vec![
        outcome_flagging(&[(2, Some(ProviderId::DeepSeek))], 0.5),
        clean_outcome(0.9),
    ]);

    let pages = vec![page(1, "one"), page(2, "garbled")];
    let refined = engine
        .refine_extraction(&PathBuf::from("doc.pdf"), pages, "logistics", &refiner)
        .await
        .unwrap();

    assert_eq!(refiner.calls(), 2);
    // The second refiner pass saw only the corrected page.
    let seen = refiner.seen.lock().unwrap();
    assert_eq!(seen[1].len(), 1);
    assert_eq!(seen[1][0].page_number, 2);
    drop(seen);

    // Merged result carries the corrected page text and its new source.
    assert_eq!(refined.pages.len(), 2);
    assert_eq!(refined.pages[1].text, "corrected page two");
    assert_eq!(refined.pages[1].source, ProviderId::DeepSeek);
    assert_eq!(refined.outcome.confidence, 0.9);
}

#[tokio::test]
async fn refinement_loop_runs_at_most_once() {
    let engine = engine_with(vec![
        MockProvider::new(ProviderId::Gemini).then_ok("still garbled"),
    ]);
    // Both passes flag pages; the loop must still stop after the second.
    let refiner = MockRefiner::new(vec![
        outcome_flagging(&[(1, Some(ProviderId::Gemini))], 0.4),
        outcome_flagging(&[(1, Some(ProviderId::Gemini))], 0.45),
    ]);

    let pages = vec![page(1, "garbled")];
    let refined = engine
        .refine_extraction(&PathBuf::from("doc.pdf"), pages, "", &refiner)
        .await
        .unwrap();

    assert_eq!(refiner.calls(), 2);
    assert_eq!(refined.outcome.confidence, 0.45);
}

#[tokio::test]
async fn unavailable_recommendation_falls_back_to_best_ai() {
    let engine = engine_with(vec![
        MockProvider::new(ProviderId::Gemini).then_ok("gemini fix"),
        MockProvider::new(ProviderId::DeepSeek).unavailable(),
    ]);
    let refiner = MockRefiner::new(vec![
        outcome_flagging(&[(1, Some(ProviderId::DeepSeek))], 0.5),
        clean_outcome(0.85),
    ]);

    let pages = vec![page(1, "garbled")];
    let refined = engine
        .refine_extraction(&PathBuf::from("doc.pdf"), pages, "", &refiner)
        .await
        .unwrap();

    assert_eq!(refined.pages[0].source, ProviderId::Gemini);
    assert_eq!(refined.pages[0].text, "gemini fix");
}

#[tokio::test]
async fn failed_re_extraction_keeps_original_pages() {
    let engine = engine_with(vec![
        MockProvider::new(ProviderId::Gemini).then_err("provider down"),
    ]);
    let refiner = MockRefiner::new(vec![outcome_flagging(
        &[(1, Some(ProviderId::Gemini))],
        0.5,
    )]);

    let pages = vec![page(1, "original")];
    let refined = engine
        .refine_extraction(&PathBuf::from("doc.pdf"), pages, "", &refiner)
        .await
        .unwrap();

    // No corrected pages means no second refiner pass and untouched text.
    assert_eq!(refiner.calls(), 1);
    assert_eq!(refined.pages[0].text, "original");
    assert_eq!(refined.outcome.confidence, 0.5);
}
