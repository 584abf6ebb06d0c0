//! Refresh ledger (刷新令牌账本)
//!
//! Rows are keyed by the SHA-256 digest of the refresh token; the token
//! itself is never stored.

use crate::{
    error::AppError,
    models::session::{RefreshTokenRecord, RevocationReason},
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

/// 哈希令牌用于存储
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[async_trait]
pub trait RefreshLedger: Send + Sync {
    /// 存储刷新令牌（不去重，同一账户允许多个会话）
    async fn store(&self, record: &RefreshTokenRecord) -> Result<(), AppError>;

    /// 消费刷新令牌：仅当令牌存在、未撤销且未过期时标记为已轮换并返回账户 ID。
    /// 并发调用同一令牌时只有一个调用者成功。
    async fn consume(&self, token_hash: &str, replaced_by: Uuid) -> Result<Option<Uuid>, AppError>;

    /// 根据哈希查找记录（包括已撤销的记录）
    async fn find(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>, AppError>;

    /// 撤销单个刷新令牌
    async fn revoke(&self, token_hash: &str, reason: RevocationReason) -> Result<bool, AppError>;

    /// 撤销账户的所有刷新令牌
    async fn revoke_all(&self, account_id: Uuid) -> Result<u64, AppError>;

    /// 删除账户的全部记录
    async fn purge_account(&self, account_id: Uuid) -> Result<u64, AppError>;

    /// 清理过期的刷新令牌
    async fn sweep_expired(&self) -> Result<u64, AppError>;
}

const RECORD_COLUMNS: &str = "id, token_hash, account_id, issued_at, expires_at, revoked_at, \
     revoked_reason, replaced_by, user_agent, ip_address";

/// PostgreSQL 实现
pub struct PgRefreshLedger {
    db: PgPool,
}

impl PgRefreshLedger {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RefreshLedger for PgRefreshLedger {
    async fn store(&self, record: &RefreshTokenRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (
                id, token_hash, account_id, issued_at, expires_at, user_agent, ip_address
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id)
        .bind(&record.token_hash)
        .bind(record.account_id)
        .bind(record.issued_at)
        .bind(record.expires_at)
        .bind(&record.user_agent)
        .bind(&record.ip_address)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn consume(&self, token_hash: &str, replaced_by: Uuid) -> Result<Option<Uuid>, AppError> {
        // 单条 UPDATE 的行锁保证只有一个并发调用者能看到 revoked_at IS NULL
        let account_id: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = $3, revoked_reason = $4, replaced_by = $2
            WHERE token_hash = $1
                AND revoked_at IS NULL
                AND expires_at > $3
            RETURNING account_id
            "#,
        )
        .bind(token_hash)
        .bind(replaced_by)
        .bind(Utc::now())
        .bind(RevocationReason::Rotated.as_str())
        .fetch_optional(&self.db)
        .await?;

        Ok(account_id)
    }

    async fn find(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>, AppError> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(&format!(
            "SELECT {} FROM refresh_tokens WHERE token_hash = $1",
            RECORD_COLUMNS
        ))
        .bind(token_hash)
        .fetch_optional(&self.db)
        .await?;

        Ok(record)
    }

    async fn revoke(&self, token_hash: &str, reason: RevocationReason) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = NOW(), revoked_reason = $2
            WHERE token_hash = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(token_hash)
        .bind(reason.as_str())
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all(&self, account_id: Uuid) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = NOW(), revoked_reason = $2
            WHERE account_id = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(account_id)
        .bind(RevocationReason::RevokedAll.as_str())
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }

    async fn purge_account(&self, account_id: Uuid) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE account_id = $1")
            .bind(account_id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }

    async fn sweep_expired(&self) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= $1")
            .bind(Utc::now())
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }
}

/// 内存实现，用于开发环境和测试
#[derive(Default)]
pub struct MemoryRefreshLedger {
    entries: DashMap<String, RefreshTokenRecord>,
}

impl MemoryRefreshLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl RefreshLedger for MemoryRefreshLedger {
    async fn store(&self, record: &RefreshTokenRecord) -> Result<(), AppError> {
        self.entries.insert(record.token_hash.clone(), record.clone());
        Ok(())
    }

    async fn consume(&self, token_hash: &str, replaced_by: Uuid) -> Result<Option<Uuid>, AppError> {
        let now = Utc::now();
        // get_mut 持有分片写锁，检查与标记在同一临界区内完成
        let Some(mut entry) = self.entries.get_mut(token_hash) else {
            return Ok(None);
        };

        if !entry.is_live_at(now) {
            return Ok(None);
        }

        entry.revoked_at = Some(now);
        entry.revoked_reason = Some(RevocationReason::Rotated.as_str().to_string());
        entry.replaced_by = Some(replaced_by);
        Ok(Some(entry.account_id))
    }

    async fn find(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>, AppError> {
        Ok(self.entries.get(token_hash).map(|e| e.clone()))
    }

    async fn revoke(&self, token_hash: &str, reason: RevocationReason) -> Result<bool, AppError> {
        let Some(mut entry) = self.entries.get_mut(token_hash) else {
            return Ok(false);
        };

        if entry.is_revoked() {
            return Ok(false);
        }

        entry.revoked_at = Some(Utc::now());
        entry.revoked_reason = Some(reason.as_str().to_string());
        Ok(true)
    }

    async fn revoke_all(&self, account_id: Uuid) -> Result<u64, AppError> {
        let now = Utc::now();
        let mut revoked = 0;
        for mut entry in self.entries.iter_mut() {
            if entry.account_id == account_id && !entry.is_revoked() {
                entry.revoked_at = Some(now);
                entry.revoked_reason = Some(RevocationReason::RevokedAll.as_str().to_string());
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn purge_account(&self, account_id: Uuid) -> Result<u64, AppError> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.account_id != account_id);
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }

    async fn sweep_expired(&self) -> Result<u64, AppError> {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired_at(now));
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }
}
