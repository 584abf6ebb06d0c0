//! Account domain models

use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

/// Account role, a fixed set shared with every collaborator that reads the token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Doctor,
    Admin,
    Lab,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Doctor => "doctor",
            Role::Admin => "admin",
            Role::Lab => "lab",
        }
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "doctor" => Ok(Role::Doctor),
            "admin" => Ok(Role::Admin),
            "lab" => Ok(Role::Lab),
            other => Err(AppError::Validation(format!("Unknown role: {}", other))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account status. Only `Active` accounts may authenticate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Pending,
    Rejected,
    Suspended,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Pending => "pending",
            AccountStatus::Rejected => "rejected",
            AccountStatus::Suspended => "suspended",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, AccountStatus::Active)
    }
}

impl FromStr for AccountStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(AccountStatus::Active),
            "pending" => Ok(AccountStatus::Pending),
            "rejected" => Ok(AccountStatus::Rejected),
            "suspended" => Ok(AccountStatus::Suspended),
            other => Err(AppError::Validation(format!("Unknown account status: {}", other))),
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Algorithm a stored secret hash was produced with.
///
/// Persisted next to the hash so verification dispatches on the recorded
/// scheme instead of guessing from the hash text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashScheme {
    /// Argon2id PHC string, used for every new or changed secret
    Argon2id,
    /// `<salt_hex>$<sha256(salt || secret)_hex>` imported from the previous system
    LegacySha256,
}

impl HashScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashScheme::Argon2id => "argon2id",
            HashScheme::LegacySha256 => "legacy_sha256",
        }
    }
}

impl FromStr for HashScheme {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "argon2id" => Ok(HashScheme::Argon2id),
            "legacy_sha256" => Ok(HashScheme::LegacySha256),
            other => Err(AppError::Internal(format!("Unknown hash scheme: {}", other))),
        }
    }
}

/// Account as used by the services
#[derive(Debug, Clone)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub secret_hash: String,
    pub hash_scheme: HashScheme,
    pub role: Role,
    pub status: AccountStatus,
    pub full_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Raw `accounts` row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccountRow {
    pub id: Uuid,
    pub email: String,
    pub secret_hash: String,
    pub hash_scheme: String,
    pub role: String,
    pub status: String,
    pub full_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = AppError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            email: row.email,
            secret_hash: row.secret_hash,
            hash_scheme: row.hash_scheme.parse()?,
            role: row
                .role
                .parse()
                .map_err(|_| AppError::Internal(format!("Corrupt role in row {}", row.id)))?,
            status: row
                .status
                .parse()
                .map_err(|_| AppError::Internal(format!("Corrupt status in row {}", row.id)))?,
            full_name: row.full_name,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Insert payload. The secret is already hashed by the caller.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub secret_hash: String,
    pub hash_scheme: HashScheme,
    pub role: Role,
    pub status: AccountStatus,
    pub full_name: Option<String>,
}

/// Canonical form used for lookups and the uniqueness index
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Self-registration request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    pub secret: String,
    pub role: Option<Role>,
    #[validate(length(max = 200, message = "Full name too long"))]
    pub full_name: Option<String>,
}

/// Administrative status change
#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: AccountStatus,
}

/// Change own secret
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSecretRequest {
    pub current_secret: String,
    pub new_secret: String,
}

/// Account response (without the secret hash)
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub status: AccountStatus,
    pub full_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            email: account.email,
            role: account.role,
            status: account.status,
            full_name: account.full_name,
            created_at: account.created_at,
        }
    }
}
