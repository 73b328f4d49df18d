pub mod adapters;
pub mod bootstrap;
pub mod config;
pub mod eligibility;
pub mod error;
pub mod ledger;
pub mod reconciler;
pub mod ros;
pub mod scheduler;
pub mod wallet;

#[cfg(test)]
pub mod testing;

pub use error::{AppError, AppResult, ReconcileError, ReconcileResult};
pub use reconciler::{ReconcileOutcome, WalletDecision, WalletEligibilityReconciler};
