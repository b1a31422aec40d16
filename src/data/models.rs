//! Data models
//!
//! Rust structs representing database entities.
//! All models use ULID for IDs, chrono for timestamps and integer
//! ledger units (see `money`) for amounts.

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    /// Parse a caller-supplied identifier
    ///
    /// # Errors
    /// Returns `Validation` naming `field` if `raw` is not a ULID, so a
    /// broken link is never mistaken for a missing entitlement.
    pub fn parse(field: &str, raw: &str) -> Result<Self, AppError> {
        ulid::Ulid::from_string(raw.trim())
            .map(|id| Self(id.to_string()))
            .map_err(|_| AppError::Validation(format!("{field} is not a valid identifier")))
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// How a piece of content is gated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum AccessType {
    Free,
    Membership,
    Purchase,
}

/// Kind of catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ContentType {
    Movie,
    Series,
    Anime,
    AnimeMovie,
}

/// A movie or show in the catalog
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Content {
    pub id: String,
    pub title: String,
    pub content_type: ContentType,
    pub access_type: AccessType,
    /// Price in ledger units
    pub price: i64,
    pub currency: String,
    /// Rental length in days for purchase-gated content
    pub purchase_period: i64,
    pub max_devices: i64,
    pub tmdb_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A season of a show
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Season {
    pub id: String,
    pub content_id: String,
    pub season_number: i64,
    pub title: Option<String>,
}

/// An episode of a show
///
/// `access_type`, `price`, `currency` and `max_devices` override the
/// parent show when set.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Episode {
    pub id: String,
    pub content_id: String,
    pub season_id: Option<String>,
    pub episode_number: i64,
    pub title: String,
    pub access_type: Option<AccessType>,
    pub price: Option<i64>,
    pub currency: Option<String>,
    pub max_devices: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Unit of a membership plan's duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum DurationUnit {
    Day,
    Week,
    Month,
    Year,
}

impl DurationUnit {
    /// Add `count` of this unit to `start`
    ///
    /// Month arithmetic clamps to the end of shorter months
    /// (Jan 31 + 1 month = Feb 28/29).
    pub fn add_to(self, start: DateTime<Utc>, count: i64) -> Option<DateTime<Utc>> {
        let count_u32 = u32::try_from(count).ok()?;
        match self {
            DurationUnit::Day => start.checked_add_signed(chrono::Duration::try_days(count)?),
            DurationUnit::Week => start.checked_add_signed(chrono::Duration::try_weeks(count)?),
            DurationUnit::Month => start.checked_add_months(Months::new(count_u32)),
            DurationUnit::Year => {
                start.checked_add_months(Months::new(count_u32.checked_mul(12)?))
            }
        }
    }
}

/// A purchasable membership plan
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MembershipPlan {
    pub id: String,
    pub name: String,
    /// Price in ledger units
    pub price: i64,
    pub currency: String,
    pub duration: i64,
    pub duration_unit: DurationUnit,
    pub max_devices: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Entitlements
// =============================================================================

/// Status column of a content purchase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PurchaseStatus {
    Active,
    Expired,
    Refunded,
}

/// Status column of a membership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum MembershipStatus {
    Active,
    Expired,
    Cancelled,
}

/// A user's purchase of one piece of content
///
/// Exactly one row exists per (user, content). `status` is never swept,
/// so validity is always `status == Active && now < expires_at`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserContentPurchase {
    pub id: String,
    pub user_id: String,
    pub content_id: String,
    pub status: PurchaseStatus,
    pub purchase_date: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub max_devices: i64,
    pub amount: i64,
    pub currency: String,
}

impl UserContentPurchase {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.status == PurchaseStatus::Active && now < self.expires_at
    }
}

/// A user's membership (one row per user)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserMembership {
    pub user_id: String,
    pub plan_id: String,
    pub membership_type: String,
    pub status: MembershipStatus,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserMembership {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.status == MembershipStatus::Active && now < self.expires_at
    }
}

/// A (user, content, device) registration used for device caps
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeviceSession {
    pub id: String,
    pub content_id: String,
    pub user_id: String,
    pub device_id: String,
    /// Free-form JSON describing the device
    pub device_info: Option<String>,
    pub last_active: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Wallet
// =============================================================================

/// A user's profile row holding the cached wallet balance
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Profile {
    pub user_id: String,
    pub display_name: Option<String>,
    /// Balance in ledger units, never negative
    pub wallet_balance: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Direction of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TransactionType {
    Credit,
    Debit,
}

/// Which ledger operation produced an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TransactionCategory {
    TopUp,
    ContentPurchase,
    MembershipPurchase,
    Support,
}

impl TransactionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TopUp => "top_up",
            Self::ContentPurchase => "content_purchase",
            Self::MembershipPurchase => "membership_purchase",
            Self::Support => "support",
        }
    }
}

/// Append-only ledger entry
///
/// `amount` is signed: credits positive, debits negative, so the sum of
/// a user's entries equals their balance.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WalletTransaction {
    pub id: String,
    pub user_id: String,
    pub amount: i64,
    pub transaction_type: TransactionType,
    pub category: TransactionCategory,
    pub description: String,
    pub reference_id: Option<String>,
    pub external_transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A tip to a piece of content or one of its episodes
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ContentSupport {
    pub id: String,
    pub user_id: String,
    pub content_id: String,
    pub episode_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}
