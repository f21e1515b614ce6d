pub mod allocate;
pub mod cashflow;
pub mod config;
pub mod engine;
pub mod ensemble;
pub mod entitlement;
pub mod market;
pub mod resolve;
pub mod tax;
pub mod types;

pub use config::{ConfigError, HouseholdConfig};
pub use engine::{RunMode, RunOutput, run_projection};
pub use ensemble::{EnsembleParams, EnsembleSummary, run_ensemble};
pub use entitlement::{EntitlementInput, compute_entitlement};
pub use market::{ShockMethod, SimulationContext};
pub use types::ProjectionRow;
