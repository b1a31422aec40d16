//! SQLite database operations
//!
//! All database access goes through this module.
//!
//! # Ledger transactions
//!
//! Every wallet mutation runs inside one SQLite transaction whose first
//! statement is a write (`touch_profile`). SQLite therefore grants the
//! single writer lock before any balance is read, which makes concurrent
//! ledger operations linearizable. Debits are conditional updates
//! (`wallet_balance >= amount`), backed by a `CHECK (wallet_balance >= 0)`.

use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite, SqliteConnection, SqlitePool};
use std::path::Path;

use super::models::*;
use super::money::units_to_amount;
use crate::error::AppError;

/// Result of a committed (or replayed) ledger operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerReceipt {
    /// Ledger entry recording the operation
    pub transaction_id: String,
    /// Balance after the operation, in ledger units
    pub balance: i64,
    /// `false` when a top-up was a replay of an already applied transfer
    pub applied: bool,
}

/// Top-up to apply
#[derive(Debug, Clone)]
pub struct NewCredit<'a> {
    pub user_id: &'a str,
    pub units: i64,
    pub external_transaction_id: &'a str,
    pub description: String,
}

/// Rental to record against a content row
#[derive(Debug, Clone)]
pub struct NewContentPurchase<'a> {
    pub user_id: &'a str,
    pub content: &'a Content,
    pub units: i64,
    pub currency: &'a str,
    pub expires_at: DateTime<Utc>,
}

/// Rental of a single episode whose access type or price overrides its show
#[derive(Debug, Clone)]
pub struct NewEpisodePurchase<'a> {
    pub user_id: &'a str,
    pub show: &'a Content,
    pub episode: &'a Episode,
    pub units: i64,
    pub currency: &'a str,
    pub max_devices: i64,
    pub expires_at: DateTime<Utc>,
}

/// Tip to record
#[derive(Debug, Clone)]
pub struct NewSupport<'a> {
    pub user_id: &'a str,
    pub content: &'a Content,
    pub episode_id: Option<&'a str>,
    pub units: i64,
    pub currency: &'a str,
}

/// Reconciliation figures for one user
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct LedgerBalance {
    pub user_id: String,
    /// Cached balance on the profile row
    pub wallet_balance: i64,
    /// Sum of signed ledger entries
    pub ledger_sum: i64,
}

/// Device registration attempt
#[derive(Debug, Clone)]
pub struct DeviceRegistration<'a> {
    pub user_id: &'a str,
    pub content_id: &'a str,
    pub device_id: &'a str,
    pub device_info: Option<&'a str>,
    /// Sessions last active before this instant do not hold a slot
    pub active_since: DateTime<Utc>,
    pub max_devices: i64,
}

/// Database connection pool wrapper
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Arguments
    /// * `path` - Path to SQLite database file
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!("Database connected and migrated successfully");

        Ok(Self { pool })
    }

    // =========================================================================
    // Catalog
    // =========================================================================

    /// Insert a content row
    pub async fn insert_content(&self, content: &Content) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO contents (
                id, title, content_type, access_type, price, currency,
                purchase_period, max_devices, tmdb_id, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&content.id)
        .bind(&content.title)
        .bind(content.content_type)
        .bind(content.access_type)
        .bind(content.price)
        .bind(&content.currency)
        .bind(content.purchase_period)
        .bind(content.max_devices)
        .bind(content.tmdb_id)
        .bind(content.created_at)
        .bind(content.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get content by ID
    pub async fn get_content(&self, id: &str) -> Result<Option<Content>, AppError> {
        let content = sqlx::query_as::<_, Content>("SELECT * FROM contents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(content)
    }

    /// Insert a season row
    pub async fn insert_season(&self, season: &Season) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO seasons (id, content_id, season_number, title) VALUES (?, ?, ?, ?)",
        )
        .bind(&season.id)
        .bind(&season.content_id)
        .bind(season.season_number)
        .bind(&season.title)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert an episode row
    pub async fn insert_episode(&self, episode: &Episode) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO episodes (
                id, content_id, season_id, episode_number, title,
                access_type, price, currency, max_devices, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&episode.id)
        .bind(&episode.content_id)
        .bind(&episode.season_id)
        .bind(episode.episode_number)
        .bind(&episode.title)
        .bind(episode.access_type)
        .bind(episode.price)
        .bind(&episode.currency)
        .bind(episode.max_devices)
        .bind(episode.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get episode by ID
    pub async fn get_episode(&self, id: &str) -> Result<Option<Episode>, AppError> {
        let episode = sqlx::query_as::<_, Episode>("SELECT * FROM episodes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(episode)
    }

    /// Insert a membership plan
    pub async fn insert_membership_plan(&self, plan: &MembershipPlan) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO membership_plans (
                id, name, price, currency, duration, duration_unit,
                max_devices, is_active, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&plan.id)
        .bind(&plan.name)
        .bind(plan.price)
        .bind(&plan.currency)
        .bind(plan.duration)
        .bind(plan.duration_unit)
        .bind(plan.max_devices)
        .bind(plan.is_active)
        .bind(plan.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get membership plan by ID
    pub async fn get_membership_plan(&self, id: &str) -> Result<Option<MembershipPlan>, AppError> {
        let plan =
            sqlx::query_as::<_, MembershipPlan>("SELECT * FROM membership_plans WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(plan)
    }

    // =========================================================================
    // Entitlements
    // =========================================================================

    /// Get the purchase row for (user, content), whatever its status
    pub async fn get_content_purchase(
        &self,
        user_id: &str,
        content_id: &str,
    ) -> Result<Option<UserContentPurchase>, AppError> {
        let purchase = sqlx::query_as::<_, UserContentPurchase>(
            "SELECT * FROM user_content_purchases WHERE user_id = ? AND content_id = ?",
        )
        .bind(user_id)
        .bind(content_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(purchase)
    }

    /// Get the purchase row for (user, episode), whatever its status
    pub async fn get_episode_purchase(
        &self,
        user_id: &str,
        episode_id: &str,
    ) -> Result<Option<UserContentPurchase>, AppError> {
        let purchase = sqlx::query_as::<_, UserContentPurchase>(
            r#"
            SELECT id, user_id, content_id, status, purchase_date, expires_at,
                   max_devices, amount, currency
            FROM user_episode_purchases
            WHERE user_id = ? AND episode_id = ?
            "#,
        )
        .bind(user_id)
        .bind(episode_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(purchase)
    }

    /// Get the membership row for a user, whatever its status
    pub async fn get_membership(&self, user_id: &str) -> Result<Option<UserMembership>, AppError> {
        let membership =
            sqlx::query_as::<_, UserMembership>("SELECT * FROM user_memberships WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(membership)
    }

    /// Device sessions for (user, content) active at or after `since`
    pub async fn get_active_device_sessions(
        &self,
        user_id: &str,
        content_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DeviceSession>, AppError> {
        let sessions = sqlx::query_as::<_, DeviceSession>(
            r#"
            SELECT * FROM device_sessions
            WHERE user_id = ? AND content_id = ?
              AND julianday(last_active) >= julianday(?)
            ORDER BY julianday(last_active) DESC
            "#,
        )
        .bind(user_id)
        .bind(content_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(sessions)
    }

    /// Register or touch a device session, enforcing the device cap
    ///
    /// Single statement: the row is inserted (or its `last_active` bumped)
    /// only if the device already holds an active slot or fewer than
    /// `max_devices` other devices are active.
    ///
    /// # Returns
    /// `true` if the session was written, `false` if the cap was reached.
    pub async fn register_device_session(
        &self,
        registration: &DeviceRegistration<'_>,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO device_sessions (
                id, content_id, user_id, device_id, device_info, last_active, created_at
            )
            SELECT ?, ?, ?, ?, ?, ?, ?
            WHERE EXISTS (
                SELECT 1 FROM device_sessions
                WHERE content_id = ? AND user_id = ? AND device_id = ?
                  AND julianday(last_active) >= julianday(?)
            ) OR (
                SELECT COUNT(*) FROM device_sessions
                WHERE content_id = ? AND user_id = ? AND device_id != ?
                  AND julianday(last_active) >= julianday(?)
            ) < ?
            ON CONFLICT (content_id, user_id, device_id) DO UPDATE SET
                last_active = excluded.last_active,
                device_info = COALESCE(excluded.device_info, device_sessions.device_info)
            "#,
        )
        .bind(EntityId::new().0)
        .bind(registration.content_id)
        .bind(registration.user_id)
        .bind(registration.device_id)
        .bind(registration.device_info)
        .bind(now)
        .bind(now)
        .bind(registration.content_id)
        .bind(registration.user_id)
        .bind(registration.device_id)
        .bind(registration.active_since)
        .bind(registration.content_id)
        .bind(registration.user_id)
        .bind(registration.device_id)
        .bind(registration.active_since)
        .bind(registration.max_devices)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Remove a device session, freeing its slot
    pub async fn delete_device_session(
        &self,
        user_id: &str,
        content_id: &str,
        device_id: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "DELETE FROM device_sessions WHERE user_id = ? AND content_id = ? AND device_id = ?",
        )
        .bind(user_id)
        .bind(content_id)
        .bind(device_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Wallet reads
    // =========================================================================

    /// Get a user's profile
    pub async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, AppError> {
        let profile = sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(profile)
    }

    /// Count a user's ledger entries
    pub async fn count_wallet_transactions(&self, user_id: &str) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM wallet_transactions WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Get a user's ledger entries, newest first
    ///
    /// # Arguments
    /// * `limit` - Maximum number of results
    /// * `max_id` - Return entries recorded before this entry (for pagination)
    pub async fn get_wallet_transactions(
        &self,
        user_id: &str,
        limit: usize,
        max_id: Option<&str>,
    ) -> Result<Vec<WalletTransaction>, AppError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let transactions = if let Some(max_id) = max_id {
            sqlx::query_as::<_, WalletTransaction>(
                r#"
                SELECT * FROM wallet_transactions
                WHERE user_id = ?
                  AND rowid < (SELECT rowid FROM wallet_transactions WHERE id = ?)
                ORDER BY rowid DESC
                LIMIT ?
                "#,
            )
            .bind(user_id)
            .bind(max_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, WalletTransaction>(
                "SELECT * FROM wallet_transactions WHERE user_id = ? ORDER BY rowid DESC LIMIT ?",
            )
            .bind(user_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        };

        Ok(transactions)
    }

    /// Cached balance and ledger sum for one user
    ///
    /// Both figures are read in one statement so they describe the same
    /// snapshot.
    pub async fn get_ledger_balance(&self, user_id: &str) -> Result<LedgerBalance, AppError> {
        let balance = sqlx::query_as::<_, LedgerBalance>(
            r#"
            SELECT
                ? AS user_id,
                COALESCE((SELECT wallet_balance FROM profiles WHERE user_id = ?), 0) AS wallet_balance,
                COALESCE((SELECT SUM(amount) FROM wallet_transactions WHERE user_id = ?), 0) AS ledger_sum
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(balance)
    }

    /// Users whose cached balance disagrees with their ledger
    pub async fn find_unreconciled_wallets(&self) -> Result<Vec<LedgerBalance>, AppError> {
        let rows = sqlx::query_as::<_, LedgerBalance>(
            r#"
            SELECT user_id, wallet_balance, ledger_sum FROM (
                SELECT
                    p.user_id AS user_id,
                    p.wallet_balance AS wallet_balance,
                    COALESCE((SELECT SUM(t.amount) FROM wallet_transactions t WHERE t.user_id = p.user_id), 0) AS ledger_sum
                FROM profiles p
                UNION ALL
                SELECT t.user_id, 0, SUM(t.amount)
                FROM wallet_transactions t
                WHERE NOT EXISTS (SELECT 1 FROM profiles p WHERE p.user_id = t.user_id)
                GROUP BY t.user_id
            )
            WHERE wallet_balance != ledger_sum
            ORDER BY user_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Get content support rows recorded by a user
    pub async fn get_content_supports(
        &self,
        user_id: &str,
    ) -> Result<Vec<ContentSupport>, AppError> {
        let supports = sqlx::query_as::<_, ContentSupport>(
            "SELECT * FROM content_supports WHERE user_id = ? ORDER BY rowid DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(supports)
    }

    // =========================================================================
    // Ledger operations
    // =========================================================================

    /// Credit a wallet, deduplicated by external transaction ID
    ///
    /// Replaying an external ID already recorded for the same user and
    /// amount returns the current balance with `applied = false`.
    ///
    /// # Errors
    /// `Validation` if the external ID was used for another user or amount.
    pub async fn credit_wallet(
        &self,
        credit: &NewCredit<'_>,
        now: DateTime<Utc>,
    ) -> Result<LedgerReceipt, AppError> {
        let mut tx = self.pool.begin().await?;
        touch_profile(&mut tx, credit.user_id, now).await?;

        let existing = sqlx::query_as::<_, WalletTransaction>(
            "SELECT * FROM wallet_transactions WHERE external_transaction_id = ?",
        )
        .bind(credit.external_transaction_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(existing) = existing {
            if existing.user_id != credit.user_id
                || existing.amount != credit.units
                || existing.category != TransactionCategory::TopUp
            {
                return Err(AppError::Validation(
                    "transaction_id was already used for a different transfer".to_string(),
                ));
            }

            let balance = current_balance(&mut tx, credit.user_id).await?;
            tx.commit().await?;
            return Ok(LedgerReceipt {
                transaction_id: existing.id,
                balance,
                applied: false,
            });
        }

        sqlx::query(
            "UPDATE profiles SET wallet_balance = wallet_balance + ?, updated_at = ? WHERE user_id = ?",
        )
        .bind(credit.units)
        .bind(now)
        .bind(credit.user_id)
        .execute(&mut *tx)
        .await?;

        let entry = WalletTransaction {
            id: EntityId::new().0,
            user_id: credit.user_id.to_string(),
            amount: credit.units,
            transaction_type: TransactionType::Credit,
            category: TransactionCategory::TopUp,
            description: credit.description.clone(),
            reference_id: None,
            external_transaction_id: Some(credit.external_transaction_id.to_string()),
            created_at: now,
        };
        append_transaction(&mut tx, &entry).await?;

        let balance = current_balance(&mut tx, credit.user_id).await?;
        tx.commit().await?;

        Ok(LedgerReceipt {
            transaction_id: entry.id,
            balance,
            applied: true,
        })
    }

    /// Debit a wallet and grant a content purchase
    ///
    /// # Errors
    /// - `AlreadyActive` if an unexpired active purchase exists
    /// - `InsufficientFunds` if the balance does not cover the price
    pub async fn purchase_content(
        &self,
        purchase: &NewContentPurchase<'_>,
        now: DateTime<Utc>,
    ) -> Result<LedgerReceipt, AppError> {
        let mut tx = self.pool.begin().await?;
        touch_profile(&mut tx, purchase.user_id, now).await?;

        let existing = sqlx::query_as::<_, UserContentPurchase>(
            "SELECT * FROM user_content_purchases WHERE user_id = ? AND content_id = ?",
        )
        .bind(purchase.user_id)
        .bind(&purchase.content.id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(existing) = existing.filter(|p| p.is_valid_at(now)) {
            return Err(AppError::AlreadyActive {
                expires_at: existing.expires_at,
            });
        }

        debit(&mut tx, purchase.user_id, purchase.units, now).await?;

        sqlx::query(
            r#"
            INSERT INTO user_content_purchases (
                id, user_id, content_id, status, purchase_date, expires_at,
                max_devices, amount, currency
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id, content_id) DO UPDATE SET
                status = excluded.status,
                purchase_date = excluded.purchase_date,
                expires_at = excluded.expires_at,
                max_devices = excluded.max_devices,
                amount = excluded.amount,
                currency = excluded.currency
            "#,
        )
        .bind(EntityId::new().0)
        .bind(purchase.user_id)
        .bind(&purchase.content.id)
        .bind(PurchaseStatus::Active)
        .bind(now)
        .bind(purchase.expires_at)
        .bind(purchase.content.max_devices)
        .bind(purchase.units)
        .bind(purchase.currency)
        .execute(&mut *tx)
        .await?;

        let entry = WalletTransaction {
            id: EntityId::new().0,
            user_id: purchase.user_id.to_string(),
            amount: -purchase.units,
            transaction_type: TransactionType::Debit,
            category: TransactionCategory::ContentPurchase,
            description: format!("Purchase: {}", purchase.content.title),
            reference_id: Some(purchase.content.id.clone()),
            external_transaction_id: None,
            created_at: now,
        };
        append_transaction(&mut tx, &entry).await?;

        let balance = current_balance(&mut tx, purchase.user_id).await?;
        tx.commit().await?;

        Ok(LedgerReceipt {
            transaction_id: entry.id,
            balance,
            applied: true,
        })
    }

    /// Debit a wallet and grant a single episode
    ///
    /// # Errors
    /// - `AlreadyActive` if the episode or its whole show is already
    ///   purchased and unexpired
    /// - `InsufficientFunds` if the balance does not cover the price
    pub async fn purchase_episode(
        &self,
        purchase: &NewEpisodePurchase<'_>,
        now: DateTime<Utc>,
    ) -> Result<LedgerReceipt, AppError> {
        let mut tx = self.pool.begin().await?;
        touch_profile(&mut tx, purchase.user_id, now).await?;

        let show_purchase = sqlx::query_as::<_, UserContentPurchase>(
            "SELECT * FROM user_content_purchases WHERE user_id = ? AND content_id = ?",
        )
        .bind(purchase.user_id)
        .bind(&purchase.show.id)
        .fetch_optional(&mut *tx)
        .await?;
        let episode_purchase = sqlx::query_as::<_, UserContentPurchase>(
            r#"
            SELECT id, user_id, content_id, status, purchase_date, expires_at,
                   max_devices, amount, currency
            FROM user_episode_purchases
            WHERE user_id = ? AND episode_id = ?
            "#,
        )
        .bind(purchase.user_id)
        .bind(&purchase.episode.id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(existing) = show_purchase
            .into_iter()
            .chain(episode_purchase)
            .find(|p| p.is_valid_at(now))
        {
            return Err(AppError::AlreadyActive {
                expires_at: existing.expires_at,
            });
        }

        debit(&mut tx, purchase.user_id, purchase.units, now).await?;

        sqlx::query(
            r#"
            INSERT INTO user_episode_purchases (
                id, user_id, content_id, episode_id, status, purchase_date,
                expires_at, max_devices, amount, currency
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id, episode_id) DO UPDATE SET
                status = excluded.status,
                purchase_date = excluded.purchase_date,
                expires_at = excluded.expires_at,
                max_devices = excluded.max_devices,
                amount = excluded.amount,
                currency = excluded.currency
            "#,
        )
        .bind(EntityId::new().0)
        .bind(purchase.user_id)
        .bind(&purchase.show.id)
        .bind(&purchase.episode.id)
        .bind(PurchaseStatus::Active)
        .bind(now)
        .bind(purchase.expires_at)
        .bind(purchase.max_devices)
        .bind(purchase.units)
        .bind(purchase.currency)
        .execute(&mut *tx)
        .await?;

        let entry = WalletTransaction {
            id: EntityId::new().0,
            user_id: purchase.user_id.to_string(),
            amount: -purchase.units,
            transaction_type: TransactionType::Debit,
            category: TransactionCategory::ContentPurchase,
            description: format!(
                "Purchase: {} - {}",
                purchase.show.title, purchase.episode.title
            ),
            reference_id: Some(purchase.episode.id.clone()),
            external_transaction_id: None,
            created_at: now,
        };
        append_transaction(&mut tx, &entry).await?;

        let balance = current_balance(&mut tx, purchase.user_id).await?;
        tx.commit().await?;

        Ok(LedgerReceipt {
            transaction_id: entry.id,
            balance,
            applied: true,
        })
    }

    /// Debit a wallet and start or renew a membership
    ///
    /// A membership still valid at `now` is extended from its current
    /// expiry; otherwise the new period starts at `now`.
    ///
    /// # Returns
    /// The receipt and the membership's new expiry.
    pub async fn purchase_membership(
        &self,
        user_id: &str,
        plan: &MembershipPlan,
        units: i64,
        now: DateTime<Utc>,
    ) -> Result<(LedgerReceipt, DateTime<Utc>), AppError> {
        let mut tx = self.pool.begin().await?;
        touch_profile(&mut tx, user_id, now).await?;

        let current = sqlx::query_as::<_, UserMembership>(
            "SELECT * FROM user_memberships WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .filter(|m| m.is_valid_at(now));

        let (started_at, period_start) = match &current {
            Some(membership) => (membership.started_at, membership.expires_at),
            None => (now, now),
        };
        let expires_at = plan
            .duration_unit
            .add_to(period_start, plan.duration)
            .ok_or_else(|| {
                AppError::Validation("membership plan duration is out of range".to_string())
            })?;

        debit(&mut tx, user_id, units, now).await?;

        sqlx::query(
            r#"
            INSERT INTO user_memberships (
                user_id, plan_id, membership_type, status, started_at, expires_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id) DO UPDATE SET
                plan_id = excluded.plan_id,
                membership_type = excluded.membership_type,
                status = excluded.status,
                started_at = excluded.started_at,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(&plan.id)
        .bind(&plan.name)
        .bind(MembershipStatus::Active)
        .bind(started_at)
        .bind(expires_at)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let entry = WalletTransaction {
            id: EntityId::new().0,
            user_id: user_id.to_string(),
            amount: -units,
            transaction_type: TransactionType::Debit,
            category: TransactionCategory::MembershipPurchase,
            description: format!("Membership: {}", plan.name),
            reference_id: Some(plan.id.clone()),
            external_transaction_id: None,
            created_at: now,
        };
        append_transaction(&mut tx, &entry).await?;

        let balance = current_balance(&mut tx, user_id).await?;
        tx.commit().await?;

        Ok((
            LedgerReceipt {
                transaction_id: entry.id,
                balance,
                applied: true,
            },
            expires_at,
        ))
    }

    /// Debit a wallet for a tip; grants no entitlement
    pub async fn support_content(
        &self,
        support: &NewSupport<'_>,
        now: DateTime<Utc>,
    ) -> Result<LedgerReceipt, AppError> {
        let mut tx = self.pool.begin().await?;
        touch_profile(&mut tx, support.user_id, now).await?;

        debit(&mut tx, support.user_id, support.units, now).await?;

        sqlx::query(
            r#"
            INSERT INTO content_supports (
                id, user_id, content_id, episode_id, amount, currency, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(EntityId::new().0)
        .bind(support.user_id)
        .bind(&support.content.id)
        .bind(support.episode_id)
        .bind(support.units)
        .bind(support.currency)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let entry = WalletTransaction {
            id: EntityId::new().0,
            user_id: support.user_id.to_string(),
            amount: -support.units,
            transaction_type: TransactionType::Debit,
            category: TransactionCategory::Support,
            description: format!("Support: {}", support.content.title),
            reference_id: Some(
                support
                    .episode_id
                    .map(str::to_string)
                    .unwrap_or_else(|| support.content.id.clone()),
            ),
            external_transaction_id: None,
            created_at: now,
        };
        append_transaction(&mut tx, &entry).await?;

        let balance = current_balance(&mut tx, support.user_id).await?;
        tx.commit().await?;

        Ok(LedgerReceipt {
            transaction_id: entry.id,
            balance,
            applied: true,
        })
    }

    #[cfg(test)]
    pub(crate) async fn set_wallet_balance_for_test(
        &self,
        user_id: &str,
        units: i64,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE profiles SET wallet_balance = ? WHERE user_id = ?")
            .bind(units)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn set_device_last_active_for_test(
        &self,
        user_id: &str,
        content_id: &str,
        device_id: &str,
        last_active: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE device_sessions SET last_active = ? WHERE user_id = ? AND content_id = ? AND device_id = ?",
        )
        .bind(last_active)
        .bind(user_id)
        .bind(content_id)
        .bind(device_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Create the profile row if missing.
///
/// Always the first statement of a ledger transaction: it is a write, so
/// SQLite takes the writer lock here rather than upgrading a read later.
async fn touch_profile(
    conn: &mut SqliteConnection,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO profiles (user_id, display_name, wallet_balance, created_at, updated_at)
        VALUES (?, NULL, 0, ?, ?)
        ON CONFLICT (user_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn current_balance(conn: &mut SqliteConnection, user_id: &str) -> Result<i64, AppError> {
    let balance =
        sqlx::query_scalar::<_, i64>("SELECT wallet_balance FROM profiles WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&mut *conn)
            .await?;

    Ok(balance)
}

/// Conditionally subtract `units` from the balance.
async fn debit(
    conn: &mut SqliteConnection,
    user_id: &str,
    units: i64,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let result = sqlx::query(
        r#"
        UPDATE profiles
        SET wallet_balance = wallet_balance - ?, updated_at = ?
        WHERE user_id = ? AND wallet_balance >= ?
        "#,
    )
    .bind(units)
    .bind(now)
    .bind(user_id)
    .bind(units)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        let balance = current_balance(conn, user_id).await?;
        return Err(AppError::InsufficientFunds {
            balance: units_to_amount(balance),
            required: units_to_amount(units),
        });
    }

    Ok(())
}

async fn append_transaction(
    conn: &mut SqliteConnection,
    entry: &WalletTransaction,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO wallet_transactions (
            id, user_id, amount, transaction_type, category, description,
            reference_id, external_transaction_id, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&entry.id)
    .bind(&entry.user_id)
    .bind(entry.amount)
    .bind(entry.transaction_type)
    .bind(entry.category)
    .bind(&entry.description)
    .bind(&entry.reference_id)
    .bind(&entry.external_transaction_id)
    .bind(entry.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}
