//! Wallet service
//!
//! Validates ledger requests at the decimal boundary and hands them to
//! the database as integer ledger units. Every mutation is one atomic
//! database transaction; see `data::database`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::clock::Clock;
use crate::config::LedgerConfig;
use crate::data::money::{amount_to_units, normalize_currency, units_to_amount};
use crate::data::{
    AccessType, Content, ContentSupport, Database, EntityId, Episode, LedgerBalance,
    LedgerReceipt, NewContentPurchase, NewCredit, NewEpisodePurchase, NewSupport,
    TransactionCategory, WalletTransaction,
};
use crate::error::AppError;
use crate::metrics::{record_ledger_outcome, LEDGER_UNRECONCILED_WALLETS};

const MAX_EXTERNAL_ID_LEN: usize = 128;
const MAX_TRANSACTIONS_PAGE: usize = 100;

/// Result of a ledger operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerOutcome {
    pub success: bool,
    pub new_balance: Decimal,
    pub transaction_id: Option<String>,
    /// `false` when a top-up replayed an already applied transfer
    pub applied: bool,
    /// New expiry for purchases and memberships
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl LedgerOutcome {
    fn from_receipt(receipt: LedgerReceipt, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            success: true,
            new_balance: units_to_amount(receipt.balance),
            transaction_id: Some(receipt.transaction_id),
            applied: receipt.applied,
            expires_at,
        }
    }
}

/// Balance overview for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletSummary {
    pub user_id: String,
    pub balance: Decimal,
    pub currency: String,
    pub transaction_count: i64,
}

/// Cached balance versus ledger sum
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub user_id: String,
    pub balance: Decimal,
    pub ledger_sum: Decimal,
    pub consistent: bool,
}

impl From<LedgerBalance> for Reconciliation {
    fn from(row: LedgerBalance) -> Self {
        Self {
            consistent: row.wallet_balance == row.ledger_sum,
            balance: units_to_amount(row.wallet_balance),
            ledger_sum: units_to_amount(row.ledger_sum),
            user_id: row.user_id,
        }
    }
}

/// Wallet service
pub struct WalletService {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
}

impl WalletService {
    /// Create new wallet service
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>, config: LedgerConfig) -> Self {
        Self { db, clock, config }
    }

    /// Currency every wallet is denominated in
    pub fn currency(&self) -> &str {
        &self.config.default_currency
    }

    fn units(&self, amount: Decimal) -> Result<i64, AppError> {
        if amount > self.config.max_transaction_amount {
            return Err(AppError::Validation(format!(
                "amount exceeds the maximum of {}",
                self.config.max_transaction_amount
            )));
        }
        amount_to_units(amount)
    }

    fn check_wallet_currency(&self, currency: &str) -> Result<String, AppError> {
        let currency = normalize_currency(currency)?;
        if currency != self.config.default_currency {
            return Err(AppError::Validation(format!(
                "currency {} does not match wallet currency {}",
                currency, self.config.default_currency
            )));
        }
        Ok(currency)
    }

    /// Credit a wallet from an external payment
    ///
    /// # Arguments
    /// * `external_transaction_id` - Payment provider reference; replaying
    ///   it is a no-op
    pub async fn add_wallet_funds(
        &self,
        user_id: &str,
        amount: Decimal,
        external_transaction_id: &str,
    ) -> Result<LedgerOutcome, AppError> {
        let result = self
            .add_wallet_funds_inner(user_id, amount, external_transaction_id)
            .await;
        record_ledger_outcome(TransactionCategory::TopUp.as_str(), &result);
        result
    }

    async fn add_wallet_funds_inner(
        &self,
        user_id: &str,
        amount: Decimal,
        external_transaction_id: &str,
    ) -> Result<LedgerOutcome, AppError> {
        let units = self.units(amount)?;
        let external_id = external_transaction_id.trim();
        if external_id.is_empty() {
            return Err(AppError::Validation(
                "transaction_id cannot be empty".to_string(),
            ));
        }
        if external_id.len() > MAX_EXTERNAL_ID_LEN {
            return Err(AppError::Validation(format!(
                "transaction_id must be at most {} characters",
                MAX_EXTERNAL_ID_LEN
            )));
        }

        let receipt = self
            .db
            .credit_wallet(
                &NewCredit {
                    user_id,
                    units,
                    external_transaction_id: external_id,
                    description: format!("Top-up {} {}", amount.normalize(), self.currency()),
                },
                self.clock.now(),
            )
            .await?;

        if receipt.applied {
            tracing::info!(
                user_id = %user_id,
                amount = %amount,
                balance = %units_to_amount(receipt.balance),
                "Wallet funded"
            );
        } else {
            tracing::info!(
                user_id = %user_id,
                external_transaction_id = %external_id,
                "Top-up replay ignored"
            );
        }

        Ok(LedgerOutcome::from_receipt(receipt, None))
    }

    /// Buy a rental of purchase-gated content, or of a single episode
    ///
    /// With `episode_id`, the episode must resolve to purchase access. Its
    /// own price, currency and device cap apply where set; the rental period
    /// is always the show's.
    ///
    /// # Errors
    /// - `NotFound` for unknown content or episode
    /// - `Validation` if the target is not for sale or the amount or
    ///   currency differ from its price
    /// - `AlreadyActive` while an earlier purchase is still valid
    /// - `InsufficientFunds` if the balance does not cover the price
    pub async fn purchase_content_with_wallet(
        &self,
        user_id: &str,
        content_id: &str,
        episode_id: Option<&str>,
        amount: Decimal,
        currency: Option<&str>,
    ) -> Result<LedgerOutcome, AppError> {
        let result = self
            .purchase_content_inner(user_id, content_id, episode_id, amount, currency)
            .await;
        record_ledger_outcome(TransactionCategory::ContentPurchase.as_str(), &result);
        result
    }

    async fn purchase_content_inner(
        &self,
        user_id: &str,
        content_id: &str,
        episode_id: Option<&str>,
        amount: Decimal,
        currency: Option<&str>,
    ) -> Result<LedgerOutcome, AppError> {
        let content_id = EntityId::parse("content_id", content_id)?;
        let episode_id = episode_id
            .map(|raw| EntityId::parse("episode_id", raw))
            .transpose()?;
        let units = self.units(amount)?;

        let content = self
            .db
            .get_content(&content_id.0)
            .await?
            .ok_or(AppError::NotFound("content"))?;

        if let Some(episode_id) = episode_id {
            let episode = self
                .db
                .get_episode(&episode_id.0)
                .await?
                .ok_or(AppError::NotFound("episode"))?;
            if episode.content_id != content.id {
                return Err(AppError::Validation(
                    "episode does not belong to content".to_string(),
                ));
            }
            return self
                .purchase_episode(user_id, &content, &episode, units, amount, currency)
                .await;
        }

        if content.access_type != AccessType::Purchase {
            return Err(AppError::Validation(
                "content is not available for purchase".to_string(),
            ));
        }
        let content_currency = self.check_price(content.price, &content.currency, units, currency)?;
        let now = self.clock.now();
        let expires_at = self.rental_window(&content, now)?;

        let receipt = self
            .db
            .purchase_content(
                &NewContentPurchase {
                    user_id,
                    content: &content,
                    units,
                    currency: &content_currency,
                    expires_at,
                },
                now,
            )
            .await?;

        tracing::info!(
            user_id = %user_id,
            content_id = %content.id,
            amount = %amount,
            balance = %units_to_amount(receipt.balance),
            expires_at = %expires_at,
            "Content purchased"
        );

        Ok(LedgerOutcome::from_receipt(receipt, Some(expires_at)))
    }

    async fn purchase_episode(
        &self,
        user_id: &str,
        show: &Content,
        episode: &Episode,
        units: i64,
        amount: Decimal,
        currency: Option<&str>,
    ) -> Result<LedgerOutcome, AppError> {
        if episode.access_type.unwrap_or(show.access_type) != AccessType::Purchase {
            return Err(AppError::Validation(
                "episode is not available for purchase".to_string(),
            ));
        }
        let price = episode.price.unwrap_or(show.price);
        let episode_currency = self.check_price(
            price,
            episode.currency.as_deref().unwrap_or(&show.currency),
            units,
            currency,
        )?;
        let now = self.clock.now();
        let expires_at = self.rental_window(show, now)?;

        let receipt = self
            .db
            .purchase_episode(
                &NewEpisodePurchase {
                    user_id,
                    show,
                    episode,
                    units,
                    currency: &episode_currency,
                    max_devices: episode.max_devices.unwrap_or(show.max_devices),
                    expires_at,
                },
                now,
            )
            .await?;

        tracing::info!(
            user_id = %user_id,
            content_id = %show.id,
            episode_id = %episode.id,
            amount = %amount,
            balance = %units_to_amount(receipt.balance),
            expires_at = %expires_at,
            "Episode purchased"
        );

        Ok(LedgerOutcome::from_receipt(receipt, Some(expires_at)))
    }

    /// Checks a payment against a price and returns the normalized currency
    fn check_price(
        &self,
        price_units: i64,
        price_currency: &str,
        units: i64,
        currency: Option<&str>,
    ) -> Result<String, AppError> {
        let price_currency = self.check_wallet_currency(price_currency)?;
        if let Some(currency) = currency {
            if normalize_currency(currency)? != price_currency {
                return Err(AppError::Validation(format!(
                    "content is priced in {}",
                    price_currency
                )));
            }
        }
        if units != price_units {
            return Err(price_mismatch(price_units));
        }
        Ok(price_currency)
    }

    fn rental_window(
        &self,
        content: &Content,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, AppError> {
        if content.purchase_period <= 0 {
            return Err(AppError::Validation(
                "content has no purchase period".to_string(),
            ));
        }
        rental_expiry(content, now)
            .ok_or_else(|| AppError::Validation("purchase period is out of range".to_string()))
    }

    /// Buy or renew a membership
    ///
    /// Renewing an active membership extends it from its current expiry.
    pub async fn purchase_membership_with_wallet(
        &self,
        user_id: &str,
        plan_id: &str,
        amount: Decimal,
    ) -> Result<LedgerOutcome, AppError> {
        let result = self.purchase_membership_inner(user_id, plan_id, amount).await;
        record_ledger_outcome(TransactionCategory::MembershipPurchase.as_str(), &result);
        result
    }

    async fn purchase_membership_inner(
        &self,
        user_id: &str,
        plan_id: &str,
        amount: Decimal,
    ) -> Result<LedgerOutcome, AppError> {
        let plan_id = EntityId::parse("plan_id", plan_id)?;
        let units = self.units(amount)?;

        let plan = self
            .db
            .get_membership_plan(&plan_id.0)
            .await?
            .ok_or(AppError::NotFound("membership plan"))?;
        if !plan.is_active {
            return Err(AppError::Validation(
                "membership plan is no longer offered".to_string(),
            ));
        }
        self.check_wallet_currency(&plan.currency)?;
        if units != plan.price {
            return Err(price_mismatch(plan.price));
        }

        let (receipt, expires_at) = self
            .db
            .purchase_membership(user_id, &plan, units, self.clock.now())
            .await?;

        tracing::info!(
            user_id = %user_id,
            plan_id = %plan.id,
            amount = %amount,
            balance = %units_to_amount(receipt.balance),
            expires_at = %expires_at,
            "Membership purchased"
        );

        Ok(LedgerOutcome::from_receipt(receipt, Some(expires_at)))
    }

    /// Tip a piece of content or one of its episodes
    pub async fn support_content_with_wallet(
        &self,
        user_id: &str,
        content_id: &str,
        amount: Decimal,
        episode_id: Option<&str>,
    ) -> Result<LedgerOutcome, AppError> {
        let result = self
            .support_content_inner(user_id, content_id, amount, episode_id)
            .await;
        record_ledger_outcome(TransactionCategory::Support.as_str(), &result);
        result
    }

    async fn support_content_inner(
        &self,
        user_id: &str,
        content_id: &str,
        amount: Decimal,
        episode_id: Option<&str>,
    ) -> Result<LedgerOutcome, AppError> {
        let content_id = EntityId::parse("content_id", content_id)?;
        let episode_id = episode_id
            .map(|raw| EntityId::parse("episode_id", raw))
            .transpose()?;
        let units = self.units(amount)?;

        let content = self
            .db
            .get_content(&content_id.0)
            .await?
            .ok_or(AppError::NotFound("content"))?;

        if let Some(episode_id) = &episode_id {
            let episode = self
                .db
                .get_episode(&episode_id.0)
                .await?
                .ok_or(AppError::NotFound("episode"))?;
            if episode.content_id != content.id {
                return Err(AppError::Validation(
                    "episode does not belong to content".to_string(),
                ));
            }
        }

        let receipt = self
            .db
            .support_content(
                &NewSupport {
                    user_id,
                    content: &content,
                    episode_id: episode_id.as_ref().map(|id| id.0.as_str()),
                    units,
                    currency: self.currency(),
                },
                self.clock.now(),
            )
            .await?;

        tracing::info!(
            user_id = %user_id,
            content_id = %content.id,
            amount = %amount,
            balance = %units_to_amount(receipt.balance),
            "Content supported"
        );

        Ok(LedgerOutcome::from_receipt(receipt, None))
    }

    /// Balance and ledger size for a user; users without a profile have 0
    pub async fn wallet_summary(&self, user_id: &str) -> Result<WalletSummary, AppError> {
        let balance = self
            .db
            .get_profile(user_id)
            .await?
            .map(|profile| profile.wallet_balance)
            .unwrap_or(0);
        let transaction_count = self.db.count_wallet_transactions(user_id).await?;

        Ok(WalletSummary {
            user_id: user_id.to_string(),
            balance: units_to_amount(balance),
            currency: self.currency().to_string(),
            transaction_count,
        })
    }

    /// Ledger entries, newest first
    ///
    /// # Arguments
    /// * `limit` - Page size, clamped to 1..=100
    /// * `max_id` - Only entries older than this one
    pub async fn list_transactions(
        &self,
        user_id: &str,
        limit: Option<usize>,
        max_id: Option<&str>,
    ) -> Result<Vec<WalletTransaction>, AppError> {
        let limit = limit.unwrap_or(20).clamp(1, MAX_TRANSACTIONS_PAGE);
        let max_id = max_id
            .map(|raw| EntityId::parse("max_id", raw))
            .transpose()?;
        self.db
            .get_wallet_transactions(user_id, limit, max_id.as_ref().map(|id| id.0.as_str()))
            .await
    }

    /// Tips the user has given, newest first
    pub async fn list_supports(&self, user_id: &str) -> Result<Vec<ContentSupport>, AppError> {
        self.db.get_content_supports(user_id).await
    }

    /// Compare one user's cached balance against their ledger
    pub async fn reconcile_wallet(&self, user_id: &str) -> Result<Reconciliation, AppError> {
        let row = self.db.get_ledger_balance(user_id).await?;
        let report = Reconciliation::from(row);
        if !report.consistent {
            tracing::error!(
                user_id = %user_id,
                balance = %report.balance,
                ledger_sum = %report.ledger_sum,
                "Wallet balance does not match ledger"
            );
        }
        Ok(report)
    }

    /// Every wallet whose balance disagrees with its ledger
    pub async fn reconcile_all(&self) -> Result<Vec<Reconciliation>, AppError> {
        let mismatches: Vec<Reconciliation> = self
            .db
            .find_unreconciled_wallets()
            .await?
            .into_iter()
            .map(Reconciliation::from)
            .collect();

        LEDGER_UNRECONCILED_WALLETS.set(mismatches.len() as i64);
        for mismatch in &mismatches {
            tracing::error!(
                user_id = %mismatch.user_id,
                balance = %mismatch.balance,
                ledger_sum = %mismatch.ledger_sum,
                "Wallet balance does not match ledger"
            );
        }

        Ok(mismatches)
    }
}

fn price_mismatch(price_units: i64) -> AppError {
    AppError::Validation(format!(
        "amount must equal the price of {}",
        units_to_amount(price_units)
    ))
}

/// Rental expiry for content bought at `now`
pub fn rental_expiry(content: &Content, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Duration::try_days(content.purchase_period).and_then(|period| now.checked_add_signed(period))
}
