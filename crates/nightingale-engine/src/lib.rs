//! Nightingale engine: sandboxed trials and the reflective attempt loop.

pub mod outcome;
pub mod proposal;
pub mod proposers;
pub mod repair_loop;
pub mod runner;
pub mod sandbox;

pub use proposal::{parse_proposal, parse_proposal_value};
pub use proposers::{CommandProposer, ReplayProposer};
pub use repair_loop::{LoopSettings, RepairLoop};
pub use sandbox::{Sandbox, SandboxOptions};
