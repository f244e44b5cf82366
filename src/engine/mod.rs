//! Core engine — distribution, placement, retry, and settlement.

pub mod checker;
pub mod orchestrator;
pub mod placement;
pub mod reconciler;

pub use checker::{AccountChecker, CheckReport};
pub use orchestrator::{Orchestrator, RetryConfig, SubmissionReport};
pub use placement::{PlacementOutcome, Placer};
pub use reconciler::{ReconcileReport, Reconciler};
