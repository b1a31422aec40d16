//! API request and response DTOs
//!
//! Amounts cross the API as decimals (JSON strings or numbers) and are
//! always returned as strings so no precision is lost in clients.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::data::money::units_to_amount;
use crate::data::{
    ContentSupport, DeviceSession, TransactionCategory, TransactionType, WalletTransaction,
};

// =============================================================================
// Entitlements
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CheckContentAccessRequest {
    pub content_id: String,
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckEpisodeAccessRequest {
    pub episode_id: String,
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterDeviceRequest {
    pub content_id: String,
    /// Episode being played; its device cap applies when set
    pub episode_id: Option<String>,
    pub device_id: String,
    /// Free-form client description (model, OS, app version)
    pub device_info: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizePlaybackRequest {
    pub content_id: String,
    pub episode_id: Option<String>,
    pub device_id: String,
    pub device_info: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeactivateDeviceRequest {
    pub content_id: String,
    pub device_id: String,
}

/// Device session as shown to its owner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSessionResponse {
    pub device_id: String,
    pub device_info: Option<serde_json::Value>,
    pub last_active: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<DeviceSession> for DeviceSessionResponse {
    fn from(session: DeviceSession) -> Self {
        Self {
            device_info: session
                .device_info
                .as_deref()
                .and_then(|raw| serde_json::from_str(raw).ok()),
            device_id: session.device_id,
            last_active: session.last_active,
            created_at: session.created_at,
        }
    }
}

// =============================================================================
// Wallet
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct AddWalletFundsRequest {
    pub user_id: Option<String>,
    pub amount: Decimal,
    /// Payment provider reference used for deduplication
    pub transaction_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseContentRequest {
    pub user_id: Option<String>,
    pub content_id: String,
    /// Buy only this episode of the show
    pub episode_id: Option<String>,
    pub amount: Decimal,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseMembershipRequest {
    pub user_id: Option<String>,
    pub plan_id: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupportContentRequest {
    pub user_id: Option<String>,
    pub content_id: String,
    pub amount: Decimal,
    pub episode_id: Option<String>,
}

/// Query parameters for transaction history
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionsQuery {
    pub limit: Option<usize>,
    pub max_id: Option<String>,
}

/// Ledger entry with its amount in currency units
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletTransactionResponse {
    pub id: String,
    /// Signed: credits positive, debits negative
    pub amount: Decimal,
    pub transaction_type: TransactionType,
    pub category: TransactionCategory,
    pub description: String,
    pub reference_id: Option<String>,
    pub external_transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<WalletTransaction> for WalletTransactionResponse {
    fn from(entry: WalletTransaction) -> Self {
        Self {
            id: entry.id,
            amount: units_to_amount(entry.amount),
            transaction_type: entry.transaction_type,
            category: entry.category,
            description: entry.description,
            reference_id: entry.reference_id,
            external_transaction_id: entry.external_transaction_id,
            created_at: entry.created_at,
        }
    }
}

/// Tip with its amount in currency units
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportResponse {
    pub id: String,
    pub content_id: String,
    pub episode_id: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

impl From<ContentSupport> for SupportResponse {
    fn from(support: ContentSupport) -> Self {
        Self {
            id: support.id,
            content_id: support.content_id,
            episode_id: support.episode_id,
            amount: units_to_amount(support.amount),
            currency: support.currency,
            created_at: support.created_at,
        }
    }
}
