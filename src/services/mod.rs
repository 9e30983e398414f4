pub mod claim_service;
pub mod deposit_service;
pub mod payout;
pub mod scheduler;
pub mod settlement;

pub use claim_service::{ClaimConfirmation, ClaimInstructions, ClaimService};
pub use deposit_service::{DepositConfirmation, DepositInstructions, DepositService};
pub use payout::{compute_payout, PayoutBreakdown, PayoutError};
pub use scheduler::{PoolScheduler, SchedulerStatus};
pub use settlement::{ResolutionReport, SettlementEngine, SettlementOutcome, TransitionReport};
