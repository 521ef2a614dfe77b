//! docrelay - document extraction router with multi-provider orchestration.
//!
//! The engine classifies an uploaded document, routes it to an ordered list
//! of extraction providers under a static priority policy, and executes
//! either with cascading fallback or by racing warm providers. Provider
//! sessions are kept warm by a background manager, and every outcome is
//! reported to a fire-and-forget metrics collaborator.
//!
//! OCR is a last resort: it is never chosen while any AI provider is
//! reachable.

pub mod classify;
pub mod config;
pub mod engine;
pub mod metrics;
pub mod pdf;
pub mod provider;
pub mod refine;
pub mod route;
pub mod warm;

#[cfg(test)]
pub(crate) mod testing;

pub use classify::{Classification, Classifier, Complexity};
pub use config::Config;
pub use engine::{
    AttemptOutcome, AttemptRecord, ExecutionEngine, ExecutionMode, ProcessError, ProcessingResult,
};
pub use provider::{
    ExtractProvider, ProviderError, ProviderId, ProviderPool, ProviderRequest, ProviderResponse,
};
pub use refine::{AdaptiveRefiner, PageText, RefinementOutcome};
pub use route::{Router, RoutingDecision};
pub use warm::WarmSessionManager;
