//! Runtime adapters for Nightingale (config, repository inventory, CI workflow
//! discovery, failure-log context).

pub mod config;
pub mod context;
pub mod inventory;
pub mod util;
pub mod workflow;

pub use config::NightingaleConfig;
pub use inventory::{InventorySource, RepoInventory};
