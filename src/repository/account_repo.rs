//! Account repository (凭据存储)

use crate::{
    db::HealthStatus,
    error::AppError,
    models::account::{
        normalize_email, Account, AccountRow, AccountStatus, HashScheme, NewAccount,
    },
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};
use sqlx::PgPool;
use uuid::Uuid;

/// Durable account lookup. Emails are matched in normalized form.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// 根据邮箱查找账户
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AppError>;

    /// 根据 ID 查找账户
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, AppError>;

    /// 创建账户，邮箱重复时返回 Conflict
    async fn insert(&self, account: NewAccount) -> Result<Account, AppError>;

    /// 更新密码哈希
    async fn update_secret(
        &self,
        id: Uuid,
        secret_hash: &str,
        scheme: HashScheme,
    ) -> Result<bool, AppError>;

    /// 更新账户状态
    async fn update_status(
        &self,
        id: Uuid,
        status: AccountStatus,
    ) -> Result<Option<Account>, AppError>;

    /// 删除账户
    async fn delete(&self, id: Uuid) -> Result<bool, AppError>;

    /// 存储健康检查
    async fn health_check(&self) -> HealthStatus;
}

const ACCOUNT_COLUMNS: &str =
    "id, email, secret_hash, hash_scheme, role, status, full_name, created_at, updated_at";

/// PostgreSQL 实现
pub struct PgAccountStore {
    db: PgPool,
}

impl PgAccountStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn into_account(row: Option<AccountRow>) -> Result<Option<Account>, AppError> {
    row.map(Account::try_from).transpose()
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AppError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE email = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(normalize_email(email))
        .fetch_optional(&self.db)
        .await?;

        into_account(row)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, AppError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        into_account(row)
    }

    async fn insert(&self, account: NewAccount) -> Result<Account, AppError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            r#"
            INSERT INTO accounts (id, email, secret_hash, hash_scheme, role, status, full_name)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(normalize_email(&account.email))
        .bind(&account.secret_hash)
        .bind(account.hash_scheme.as_str())
        .bind(account.role.as_str())
        .bind(account.status.as_str())
        .bind(&account.full_name)
        .fetch_one(&self.db)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict("Email already registered".to_string())
            }
            other => AppError::Database(other),
        })?;

        Account::try_from(row)
    }

    async fn update_secret(
        &self,
        id: Uuid,
        secret_hash: &str,
        scheme: HashScheme,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET
                secret_hash = $2,
                hash_scheme = $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(secret_hash)
        .bind(scheme.as_str())
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: AccountStatus,
    ) -> Result<Option<Account>, AppError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            r#"
            UPDATE accounts
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(&self.db)
        .await?;

        into_account(row)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn health_check(&self) -> HealthStatus {
        crate::db::health_check(&self.db).await
    }
}

/// 内存实现，用于开发环境和测试
#[derive(Default)]
pub struct MemoryAccountStore {
    accounts: DashMap<Uuid, Account>,
    by_email: DashMap<String, Uuid>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AppError> {
        let id = match self.by_email.get(&normalize_email(email)) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(self.accounts.get(&id).map(|a| a.clone()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, AppError> {
        Ok(self.accounts.get(&id).map(|a| a.clone()))
    }

    async fn insert(&self, account: NewAccount) -> Result<Account, AppError> {
        let email = normalize_email(&account.email);

        // 邮箱索引条目加锁期间完成插入，保证唯一性
        match self.by_email.entry(email.clone()) {
            Entry::Occupied(_) => Err(AppError::Conflict("Email already registered".to_string())),
            Entry::Vacant(slot) => {
                let now = Utc::now();
                let created = Account {
                    id: Uuid::new_v4(),
                    email,
                    secret_hash: account.secret_hash,
                    hash_scheme: account.hash_scheme,
                    role: account.role,
                    status: account.status,
                    full_name: account.full_name,
                    created_at: now,
                    updated_at: now,
                };
                self.accounts.insert(created.id, created.clone());
                slot.insert(created.id);
                Ok(created)
            }
        }
    }

    async fn update_secret(
        &self,
        id: Uuid,
        secret_hash: &str,
        scheme: HashScheme,
    ) -> Result<bool, AppError> {
        Ok(match self.accounts.get_mut(&id) {
            Some(mut account) => {
                account.secret_hash = secret_hash.to_string();
                account.hash_scheme = scheme;
                account.updated_at = Utc::now();
                true
            }
            None => false,
        })
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: AccountStatus,
    ) -> Result<Option<Account>, AppError> {
        Ok(self.accounts.get_mut(&id).map(|mut account| {
            account.status = status;
            account.updated_at = Utc::now();
            account.clone()
        }))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        match self.accounts.remove(&id) {
            Some((_, account)) => {
                self.by_email.remove(&account.email);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn health_check(&self) -> HealthStatus {
        HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::account::Role;

    fn new_account(email: &str) -> NewAccount {
        NewAccount {
            email: email.to_string(),
            secret_hash: "hash".to_string(),
            hash_scheme: HashScheme::Argon2id,
            role: Role::User,
            status: AccountStatus::Active,
            full_name: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_find_normalized() {
        let store = MemoryAccountStore::new();
        let created = store.insert(new_account(" A@B.com")).await.unwrap();
        assert_eq!(created.email, "a@b.com");

        let found = store.find_by_email("a@B.COM").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert!(store.find_by_email("other@b.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let store = MemoryAccountStore::new();
        store.insert(new_account("a@b.com")).await.unwrap();
        let err = store.insert(new_account("A@b.com")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_status_and_secret() {
        let store = MemoryAccountStore::new();
        let created = store.insert(new_account("a@b.com")).await.unwrap();

        let updated = store
            .update_status(created.id, AccountStatus::Suspended)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, AccountStatus::Suspended);

        assert!(store
            .update_secret(created.id, "new", HashScheme::Argon2id)
            .await
            .unwrap());
        let found = store.find_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(found.secret_hash, "new");

        assert!(store.update_status(Uuid::new_v4(), AccountStatus::Active).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_frees_email() {
        let store = MemoryAccountStore::new();
        let created = store.insert(new_account("a@b.com")).await.unwrap();
        assert!(store.delete(created.id).await.unwrap());
        assert!(store.find_by_email("a@b.com").await.unwrap().is_none());
        assert!(store.insert(new_account("a@b.com")).await.is_ok());
    }
}
