//! Entitlement evaluation
//!
//! Decides whether a user may stream a piece of content or an episode,
//! and manages the device sessions that back device caps.
//!
//! The decision itself is the pure function [`evaluate_access`]; the
//! service only gathers the facts it needs from the database.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::clock::Clock;
use crate::data::{
    AccessType, Content, Database, DeviceRegistration, DeviceSession, EntityId, Episode,
    UserContentPurchase, UserMembership,
};
use crate::error::AppError;
use crate::metrics::{ACCESS_DECISIONS_TOTAL, DEVICE_REGISTRATIONS_TOTAL};

const MAX_DEVICE_ID_LEN: usize = 128;
const MAX_DEVICE_INFO_BYTES: usize = 2048;

/// Why access was granted or denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessReason {
    Free,
    MembershipActive,
    MembershipExpired,
    NoMembership,
    PurchaseActive,
    PurchaseExpired,
    NoPurchase,
    DeviceLimitReached,
    Unauthenticated,
}

impl AccessReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "FREE",
            Self::MembershipActive => "MEMBERSHIP_ACTIVE",
            Self::MembershipExpired => "MEMBERSHIP_EXPIRED",
            Self::NoMembership => "NO_MEMBERSHIP",
            Self::PurchaseActive => "PURCHASE_ACTIVE",
            Self::PurchaseExpired => "PURCHASE_EXPIRED",
            Self::NoPurchase => "NO_PURCHASE",
            Self::DeviceLimitReached => "DEVICE_LIMIT_REACHED",
            Self::Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

/// Outcome of an access check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub has_access: bool,
    pub reason: AccessReason,
    pub expires_at: Option<DateTime<Utc>>,
    pub devices_used: i64,
    pub max_devices: i64,
}

/// The thing being played, with episode overrides already applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessTarget {
    /// Content whose purchases and device sessions apply
    pub content_id: String,
    pub episode_id: Option<String>,
    pub access_type: AccessType,
    pub max_devices: i64,
    /// Episode device cap. Bounds whatever cap the granting entitlement carries.
    pub max_devices_override: Option<i64>,
}

impl AccessTarget {
    pub fn for_content(content: &Content) -> Self {
        Self {
            content_id: content.id.clone(),
            episode_id: None,
            access_type: content.access_type,
            max_devices: content.max_devices,
            max_devices_override: None,
        }
    }

    /// Episode columns win over the show's when set.
    pub fn for_episode(show: &Content, episode: &Episode) -> Self {
        Self {
            content_id: show.id.clone(),
            episode_id: Some(episode.id.clone()),
            access_type: episode.access_type.unwrap_or(show.access_type),
            max_devices: episode.max_devices.unwrap_or(show.max_devices),
            max_devices_override: episode.max_devices,
        }
    }

    /// Applies the episode cap, if any, to an entitlement's cap.
    pub fn bounded_cap(&self, entitlement_cap: i64) -> i64 {
        match self.max_devices_override {
            Some(cap) => entitlement_cap.min(cap),
            None => entitlement_cap,
        }
    }
}

/// Everything known about a user's entitlement to one target
#[derive(Debug, Clone, Copy)]
pub struct EntitlementFacts<'a> {
    pub membership: Option<&'a UserMembership>,
    /// Device cap of the membership's plan, if the plan still exists
    pub membership_max_devices: Option<i64>,
    pub purchase: Option<&'a UserContentPurchase>,
    /// Purchase of the single episode, when the target is an episode
    pub episode_purchase: Option<&'a UserContentPurchase>,
    pub device_sessions: &'a [DeviceSession],
    /// Sessions last active before this instant are ignored
    pub active_since: DateTime<Utc>,
}

/// Decide whether `user_id` may play `target` on `device_id` at `now`.
///
/// Precedence: free, then authentication, then the gate named by the
/// target's access type, then the device cap. Expiry is always compared
/// against `now`; an `active` status alone never grants access.
pub fn evaluate_access(
    target: &AccessTarget,
    user_id: Option<&str>,
    facts: &EntitlementFacts<'_>,
    device_id: Option<&str>,
    now: DateTime<Utc>,
) -> AccessDecision {
    let active_devices: Vec<&DeviceSession> = facts
        .device_sessions
        .iter()
        .filter(|session| session.last_active >= facts.active_since)
        .collect();
    let devices_used = active_devices.len() as i64;

    if target.access_type == AccessType::Free {
        return AccessDecision {
            has_access: true,
            reason: AccessReason::Free,
            expires_at: None,
            devices_used,
            max_devices: target.max_devices,
        };
    }

    if user_id.is_none() {
        return AccessDecision {
            has_access: false,
            reason: AccessReason::Unauthenticated,
            expires_at: None,
            devices_used: 0,
            max_devices: target.max_devices,
        };
    }

    let (granted, reason, expires_at, max_devices) = match target.access_type {
        AccessType::Membership => {
            let max_devices = facts.membership_max_devices.unwrap_or(target.max_devices);
            match facts.membership {
                None => (false, AccessReason::NoMembership, None, max_devices),
                Some(m) if m.is_valid_at(now) => (
                    true,
                    AccessReason::MembershipActive,
                    Some(m.expires_at),
                    max_devices,
                ),
                Some(m) => (
                    false,
                    AccessReason::MembershipExpired,
                    Some(m.expires_at),
                    max_devices,
                ),
            }
        }
        AccessType::Purchase => match usable_purchase(facts, now) {
            None => (false, AccessReason::NoPurchase, None, target.max_devices),
            Some(p) if p.is_valid_at(now) => (
                true,
                AccessReason::PurchaseActive,
                Some(p.expires_at),
                p.max_devices,
            ),
            Some(p) => (
                false,
                AccessReason::PurchaseExpired,
                Some(p.expires_at),
                p.max_devices,
            ),
        },
        AccessType::Free => (true, AccessReason::Free, None, target.max_devices),
    };
    let max_devices = target.bounded_cap(max_devices);

    if granted {
        if let Some(device_id) = device_id {
            let registered = active_devices
                .iter()
                .any(|session| session.device_id == device_id);
            if !registered && devices_used >= max_devices {
                return AccessDecision {
                    has_access: false,
                    reason: AccessReason::DeviceLimitReached,
                    expires_at,
                    devices_used,
                    max_devices,
                };
            }
        }
    }

    AccessDecision {
        has_access: granted,
        reason,
        expires_at,
        devices_used,
        max_devices,
    }
}

/// A valid show or episode purchase, else whichever lapsed one exists.
fn usable_purchase<'a>(
    facts: &EntitlementFacts<'a>,
    now: DateTime<Utc>,
) -> Option<&'a UserContentPurchase> {
    let candidates = [facts.purchase, facts.episode_purchase];
    candidates
        .iter()
        .flatten()
        .copied()
        .find(|p| p.is_valid_at(now))
        .or(facts.purchase)
        .or(facts.episode_purchase)
}

/// Validate a client-supplied device identifier.
pub fn validate_device_id(raw: &str) -> Result<&str, AppError> {
    let device_id = raw.trim();
    if device_id.is_empty() {
        return Err(AppError::Validation("device_id cannot be empty".to_string()));
    }
    if device_id.len() > MAX_DEVICE_ID_LEN || device_id.chars().any(char::is_control) {
        return Err(AppError::Validation(format!(
            "device_id must be at most {} printable characters",
            MAX_DEVICE_ID_LEN
        )));
    }
    Ok(device_id)
}

fn encode_device_info(device_info: Option<&serde_json::Value>) -> Result<Option<String>, AppError> {
    let encoded = device_info
        .map(|info| serde_json::to_string(info).map_err(|e| AppError::Internal(e.into())))
        .transpose()?;
    if encoded
        .as_ref()
        .is_some_and(|info| info.len() > MAX_DEVICE_INFO_BYTES)
    {
        return Err(AppError::Validation(format!(
            "device_info must be at most {} bytes",
            MAX_DEVICE_INFO_BYTES
        )));
    }
    Ok(encoded)
}

/// Entitlement service
pub struct AccessService {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    device_window: Duration,
}

impl AccessService {
    /// Create new access service
    ///
    /// # Arguments
    /// * `device_window` - How long a device keeps its slot after last use
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>, device_window: Duration) -> Self {
        Self {
            db,
            clock,
            device_window,
        }
    }

    /// Check access to a movie or show
    ///
    /// # Errors
    /// `Validation` for malformed identifiers, `NotFound` for unknown content.
    pub async fn check_content_access(
        &self,
        user_id: Option<&str>,
        content_id: &str,
        device_id: Option<&str>,
    ) -> Result<AccessDecision, AppError> {
        let content_id = EntityId::parse("content_id", content_id)?;
        let device_id = device_id.map(validate_device_id).transpose()?;

        let content = self
            .db
            .get_content(&content_id.0)
            .await?
            .ok_or(AppError::NotFound("content"))?;

        let decision = self
            .evaluate(&AccessTarget::for_content(&content), user_id, device_id)
            .await?;
        ACCESS_DECISIONS_TOTAL
            .with_label_values(&["content", decision.reason.as_str()])
            .inc();
        Ok(decision)
    }

    /// Check access to a single episode
    ///
    /// # Errors
    /// `Validation` for malformed identifiers, `NotFound` for unknown episodes.
    pub async fn check_episode_access(
        &self,
        user_id: Option<&str>,
        episode_id: &str,
        device_id: Option<&str>,
    ) -> Result<AccessDecision, AppError> {
        let episode_id = EntityId::parse("episode_id", episode_id)?;
        let device_id = device_id.map(validate_device_id).transpose()?;

        let episode = self
            .db
            .get_episode(&episode_id.0)
            .await?
            .ok_or(AppError::NotFound("episode"))?;
        let show = self
            .db
            .get_content(&episode.content_id)
            .await?
            .ok_or(AppError::NotFound("content"))?;

        let decision = self
            .evaluate(&AccessTarget::for_episode(&show, &episode), user_id, device_id)
            .await?;
        ACCESS_DECISIONS_TOTAL
            .with_label_values(&["episode", decision.reason.as_str()])
            .inc();
        Ok(decision)
    }

    async fn evaluate(
        &self,
        target: &AccessTarget,
        user_id: Option<&str>,
        device_id: Option<&str>,
    ) -> Result<AccessDecision, AppError> {
        let now = self.clock.now();
        let active_since = now - self.device_window;

        let Some(user) = user_id.filter(|_| target.access_type != AccessType::Free) else {
            return Ok(evaluate_access(
                target,
                user_id,
                &EntitlementFacts {
                    membership: None,
                    membership_max_devices: None,
                    purchase: None,
                    episode_purchase: None,
                    device_sessions: &[],
                    active_since,
                },
                device_id,
                now,
            ));
        };

        let membership = match target.access_type {
            AccessType::Membership => self.db.get_membership(user).await?,
            _ => None,
        };
        let membership_max_devices = match &membership {
            Some(m) => self
                .db
                .get_membership_plan(&m.plan_id)
                .await?
                .map(|plan| plan.max_devices),
            None => None,
        };
        let (purchase, episode_purchase) = match target.access_type {
            AccessType::Purchase => {
                let purchase = self
                    .db
                    .get_content_purchase(user, &target.content_id)
                    .await?;
                let episode_purchase = match &target.episode_id {
                    Some(episode_id) => self.db.get_episode_purchase(user, episode_id).await?,
                    None => None,
                };
                (purchase, episode_purchase)
            }
            _ => (None, None),
        };
        let device_sessions = self
            .db
            .get_active_device_sessions(user, &target.content_id, active_since)
            .await?;

        let decision = evaluate_access(
            target,
            Some(user),
            &EntitlementFacts {
                membership: membership.as_ref(),
                membership_max_devices,
                purchase: purchase.as_ref(),
                episode_purchase: episode_purchase.as_ref(),
                device_sessions: &device_sessions,
                active_since,
            },
            device_id,
            now,
        );

        if !decision.has_access {
            tracing::debug!(
                user_id = %user,
                content_id = %target.content_id,
                episode_id = ?target.episode_id,
                reason = decision.reason.as_str(),
                "Access denied"
            );
        }

        Ok(decision)
    }

    /// Resolve a show and, optionally, one of its episodes into a target
    async fn load_target(
        &self,
        content_id: &str,
        episode_id: Option<&str>,
    ) -> Result<AccessTarget, AppError> {
        let content_id = EntityId::parse("content_id", content_id)?;
        let episode_id = episode_id
            .map(|id| EntityId::parse("episode_id", id))
            .transpose()?;

        let content = self
            .db
            .get_content(&content_id.0)
            .await?
            .ok_or(AppError::NotFound("content"))?;
        let Some(episode_id) = episode_id else {
            return Ok(AccessTarget::for_content(&content));
        };

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
        Ok(AccessTarget::for_episode(&content, &episode))
    }

    /// Register (or touch) a device session for a piece of content
    ///
    /// The cap is the active show or episode purchase's `max_devices`, else
    /// the active membership plan's for membership targets, else the
    /// target's own. An episode's `max_devices` bounds all of these.
    /// Sessions are kept per show, so `episode_id` only changes the cap.
    /// A new device is refused once the cap is reached; nothing is evicted.
    ///
    /// # Returns
    /// `true` if the device holds a slot, `false` if the cap was reached.
    pub async fn register_device_session(
        &self,
        user_id: &str,
        content_id: &str,
        episode_id: Option<&str>,
        device_id: &str,
        device_info: Option<&serde_json::Value>,
    ) -> Result<bool, AppError> {
        let device_id = validate_device_id(device_id)?;
        let device_info = encode_device_info(device_info)?;
        let target = self.load_target(content_id, episode_id).await?;

        let now = self.clock.now();
        let max_devices = self.device_cap(user_id, &target, now).await?;
        self.claim_device_slot(
            user_id,
            &target,
            device_id,
            device_info.as_deref(),
            max_devices,
            now,
        )
        .await
    }

    /// Check access and, when granted, claim a device slot in one call
    ///
    /// # Errors
    /// `Unauthorized`, `Forbidden` or `Expired` when the entitlement is
    /// missing, and `DeviceLimitReached` when no slot is left for the device.
    pub async fn authorize_playback(
        &self,
        user_id: &str,
        content_id: &str,
        episode_id: Option<&str>,
        device_id: &str,
        device_info: Option<&serde_json::Value>,
    ) -> Result<AccessDecision, AppError> {
        let device_id = validate_device_id(device_id)?;
        let device_info = encode_device_info(device_info)?;
        let target = self.load_target(content_id, episode_id).await?;

        let decision = self.evaluate(&target, Some(user_id), Some(device_id)).await?;
        ACCESS_DECISIONS_TOTAL
            .with_label_values(&["playback", decision.reason.as_str()])
            .inc();

        match decision.reason {
            AccessReason::Free => return Ok(decision),
            AccessReason::MembershipActive | AccessReason::PurchaseActive => {}
            AccessReason::DeviceLimitReached => {
                return Err(AppError::DeviceLimitReached {
                    max_devices: decision.max_devices,
                });
            }
            AccessReason::MembershipExpired | AccessReason::PurchaseExpired => {
                return Err(AppError::Expired);
            }
            AccessReason::Unauthenticated => return Err(AppError::Unauthorized),
            AccessReason::NoMembership | AccessReason::NoPurchase => {
                return Err(AppError::Forbidden);
            }
        }

        let now = self.clock.now();
        let claimed = self
            .claim_device_slot(
                user_id,
                &target,
                device_id,
                device_info.as_deref(),
                decision.max_devices,
                now,
            )
            .await?;
        if !claimed {
            return Err(AppError::DeviceLimitReached {
                max_devices: decision.max_devices,
            });
        }
        Ok(decision)
    }

    async fn claim_device_slot(
        &self,
        user_id: &str,
        target: &AccessTarget,
        device_id: &str,
        device_info: Option<&str>,
        max_devices: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let registered = self
            .db
            .register_device_session(
                &DeviceRegistration {
                    user_id,
                    content_id: &target.content_id,
                    device_id,
                    device_info,
                    active_since: now - self.device_window,
                    max_devices,
                },
                now,
            )
            .await?;

        let outcome = if registered { "registered" } else { "limit_reached" };
        DEVICE_REGISTRATIONS_TOTAL
            .with_label_values(&[outcome])
            .inc();
        tracing::info!(
            user_id = %user_id,
            content_id = %target.content_id,
            episode_id = ?target.episode_id,
            device_id = %device_id,
            max_devices,
            outcome,
            "Device session registration"
        );

        Ok(registered)
    }

    async fn device_cap(
        &self,
        user_id: &str,
        target: &AccessTarget,
        now: DateTime<Utc>,
    ) -> Result<i64, AppError> {
        let mut purchase = self
            .db
            .get_content_purchase(user_id, &target.content_id)
            .await?
            .filter(|p| p.is_valid_at(now));
        if purchase.is_none() {
            if let Some(episode_id) = &target.episode_id {
                purchase = self
                    .db
                    .get_episode_purchase(user_id, episode_id)
                    .await?
                    .filter(|p| p.is_valid_at(now));
            }
        }
        if let Some(purchase) = purchase {
            return Ok(target.bounded_cap(purchase.max_devices));
        }

        if target.access_type == AccessType::Membership {
            if let Some(membership) = self
                .db
                .get_membership(user_id)
                .await?
                .filter(|m| m.is_valid_at(now))
            {
                if let Some(plan) = self.db.get_membership_plan(&membership.plan_id).await? {
                    return Ok(target.bounded_cap(plan.max_devices));
                }
            }
        }

        Ok(target.max_devices)
    }

    /// Remove a device session, freeing its slot
    ///
    /// # Returns
    /// `false` if no such session existed
    pub async fn deactivate_device_session(
        &self,
        user_id: &str,
        content_id: &str,
        device_id: &str,
    ) -> Result<bool, AppError> {
        let content_id = EntityId::parse("content_id", content_id)?;
        let device_id = validate_device_id(device_id)?;

        let removed = self
            .db
            .delete_device_session(user_id, &content_id.0, device_id)
            .await?;
        if removed {
            tracing::info!(
                user_id = %user_id,
                content_id = %content_id,
                device_id = %device_id,
                "Device session deactivated"
            );
        }
        Ok(removed)
    }

    /// Device sessions currently holding a slot for (user, content)
    pub async fn list_device_sessions(
        &self,
        user_id: &str,
        content_id: &str,
    ) -> Result<Vec<DeviceSession>, AppError> {
        let content_id = EntityId::parse("content_id", content_id)?;
        let since = self.clock.now() - self.device_window;
        self.db
            .get_active_device_sessions(user_id, &content_id.0, since)
            .await
    }
}
