//! Core domain model and decision contracts for Nightingale.
//!
//! Everything in this crate is pure: no filesystem, no processes. The engine
//! crate drives these types through sandboxed trials.

pub mod blast_radius;
pub mod confidence;
pub mod error;
pub mod model;
pub mod protocol;
pub mod resolution;

pub use blast_radius::{analyze, BlastRadiusReport, RiskTier};
pub use confidence::{score, ConfidenceBreakdown, Factor, FactorScore};
pub use error::{AttemptFailure, FailureKind, RepairError};
pub use model::*;
pub use protocol::*;
pub use resolution::{decide, Decision, DecisionKind, DecisionRule};
