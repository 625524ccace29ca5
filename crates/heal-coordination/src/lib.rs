//! Deterministic control-loop primitives shared by every adapter in the
//! self-healing patch pipeline: the patch envelope, dual circuit breaker,
//! cascade/friction handler, confidence scorer, memory buffer, safety
//! observers, and the policy presets that parameterize all of them.
//!
//! Everything in this crate is synchronous and has no I/O beyond the memory
//! buffer's optional file backend. Async orchestration, subprocess
//! adapters, and the LLM transport live in `heal-orchestrator`.

pub mod backoff;
pub mod breaker;
pub mod canonical;
pub mod cascade;
pub mod envelope;
pub mod error_class;
pub mod memory;
pub mod observers;
pub mod policy;
pub mod rate_limiter;
pub mod rebanker;
pub mod ring;
pub mod scorer;

pub use breaker::{BreakerStateSummary, DualCircuitBreaker, Recommendation};
pub use cascade::{CascadeEntry, CascadeHandler, FrictionAssessment, FrictionSignal};
pub use envelope::{
    wrap_patch, AttemptRecord, ConfidenceComponents, Counters, CounterKind, DeveloperFlag,
    EnvelopeError, ErrorTrend, NormalizedBreakerState, PatchData, PatchEnvelope, RebankerHistoryEntry,
    ResourceUsage, RiskFlag, TimelineEntry, TrendMetadata,
};
pub use error_class::{BudgetGroup, ErrorClass};
pub use memory::{MemoryBuffer, MemoryMetrics, MemoryOutcome, PersistenceBackend};
pub use observers::{Observer, ObserverContext, ObserverEvent, SuspicionLevel};
pub use policy::{PolicyConfig, SandboxIsolation};
pub use rebanker::{RebankerDiagnostic, Severity};
pub use scorer::{ConfidenceScorer, HistoricalFactors};
