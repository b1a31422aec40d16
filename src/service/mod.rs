//! Service layer
//!
//! Contains business logic separated from HTTP handlers.
//! Services validate requests, consult the injected clock and delegate
//! persistence to the data layer.

pub mod access;
pub mod clock;
mod wallet;

pub use access::{AccessDecision, AccessReason, AccessService};
pub use clock::{Clock, SystemClock};
pub use wallet::{LedgerOutcome, Reconciliation, WalletService, WalletSummary};
