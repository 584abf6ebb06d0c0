//! Refresh ledger models

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Why a ledger entry stopped being usable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationReason {
    /// Consumed by a refresh and replaced by a newer token
    Rotated,
    /// Explicit logout of this session
    Logout,
    /// Logout-all, suspension or secret change
    RevokedAll,
}

impl RevocationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevocationReason::Rotated => "rotated",
            RevocationReason::Logout => "logout",
            RevocationReason::RevokedAll => "revoked_all",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rotated" => Some(RevocationReason::Rotated),
            "logout" => Some(RevocationReason::Logout),
            "revoked_all" => Some(RevocationReason::RevokedAll),
            _ => None,
        }
    }
}

/// One persisted refresh token (only its digest is stored)
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub token_hash: String,
    pub account_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
    pub replaced_by: Option<Uuid>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

impl RefreshTokenRecord {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Usable by a refresh right now
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked() && !self.is_expired_at(now)
    }

    pub fn revocation_reason(&self) -> Option<RevocationReason> {
        self.revoked_reason.as_deref().and_then(RevocationReason::parse)
    }
}

/// Client metadata recorded with a session
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Result of an expiry sweep
#[derive(Debug, Serialize)]
pub struct SweepResponse {
    pub removed: u64,
}
