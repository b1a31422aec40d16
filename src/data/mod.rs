//! Data layer module
//!
//! Handles all data persistence:
//! - SQLite database operations (catalog, entitlements, wallet ledger)
//! - Fixed-point money conversion

mod database;
mod models;
pub mod money;

pub use database::{
    Database, DeviceRegistration, LedgerBalance, LedgerReceipt, NewContentPurchase, NewCredit,
    NewEpisodePurchase, NewSupport,
};
pub use models::*;
