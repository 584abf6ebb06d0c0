//! 认证服务：登录、令牌轮换、登出与账户生命周期

use crate::{
    auth::{
        jwt::{JwtService, TokenPair},
        password::PasswordHasher,
    },
    config::AppConfig,
    error::AppError,
    models::{
        account::{Account, AccountStatus, HashScheme, NewAccount, RegisterRequest, Role},
        session::{ClientInfo, RefreshTokenRecord, RevocationReason},
    },
    repository::{hash_token, AccountStore, RefreshLedger},
};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// 登录或刷新成功的结果
#[derive(Debug)]
pub struct SessionGrant {
    pub tokens: TokenPair,
    pub account: Account,
}

pub struct AuthService {
    accounts: Arc<dyn AccountStore>,
    ledger: Arc<dyn RefreshLedger>,
    jwt_service: Arc<JwtService>,
    hasher: Arc<PasswordHasher>,
    config: Arc<AppConfig>,
}

impl AuthService {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        ledger: Arc<dyn RefreshLedger>,
        jwt_service: Arc<JwtService>,
        hasher: Arc<PasswordHasher>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            accounts,
            ledger,
            jwt_service,
            hasher,
            config,
        }
    }

    pub fn accounts(&self) -> &Arc<dyn AccountStore> {
        &self.accounts
    }

    /// 用户登录
    pub async fn login(
        &self,
        email: &str,
        secret: &str,
        client: &ClientInfo,
    ) -> Result<SessionGrant, AppError> {
        let account = match self.accounts.find_by_email(email).await? {
            Some(account) => account,
            None => {
                // 与密码错误耗时一致，避免账户枚举
                let hasher = self.hasher.clone();
                let candidate = secret.to_string();
                let _ = tokio::task::spawn_blocking(move || hasher.verify_dummy(&candidate)).await;
                record_login("unknown_account");
                tracing::info!(ip = ?client.ip_address, "Login failed");
                return Err(AppError::InvalidCredentials);
            }
        };

        if !self.verify_secret(&account, secret).await? {
            record_login("wrong_secret");
            tracing::info!(account_id = %account.id, ip = ?client.ip_address, "Login failed");
            return Err(AppError::InvalidCredentials);
        }

        // 检查账户状态
        if !account.status.is_active() {
            record_login("inactive");
            tracing::info!(
                account_id = %account.id,
                status = %account.status,
                "Login refused for inactive account"
            );
            return Err(AppError::AccountInactive(account.status.to_string()));
        }

        let tokens = self.issue_session(&account, client, Uuid::new_v4()).await?;

        record_login("success");
        tracing::info!(
            account_id = %account.id,
            role = %account.role,
            legacy_hash = account.hash_scheme == HashScheme::LegacySha256,
            "Login succeeded"
        );

        Ok(SessionGrant { tokens, account })
    }

    /// 校验密码（Argon2 在阻塞线程池中执行）
    pub async fn verify_secret(&self, account: &Account, candidate: &str) -> Result<bool, AppError> {
        let hasher = self.hasher.clone();
        let candidate = candidate.to_string();
        let stored = account.secret_hash.clone();
        let scheme = account.hash_scheme;

        tokio::task::spawn_blocking(move || hasher.verify(&candidate, &stored, scheme))
            .await
            .map_err(|e| AppError::Internal(format!("Secret verification task failed: {}", e)))
    }

    /// 哈希新密码（只在创建账户和修改密码时调用）
    async fn hash_secret(&self, secret: &str) -> Result<(String, HashScheme), AppError> {
        let hasher = self.hasher.clone();
        let secret = secret.to_string();

        tokio::task::spawn_blocking(move || hasher.hash_and_store(&secret))
            .await
            .map_err(|e| AppError::Internal(format!("Secret hashing task failed: {}", e)))?
    }

    /// 签发令牌对并把刷新令牌写入账本
    async fn issue_session(
        &self,
        account: &Account,
        client: &ClientInfo,
        entry_id: Uuid,
    ) -> Result<TokenPair, AppError> {
        let issued_at = Utc::now();
        let tokens = self.jwt_service.issue_at(account, issued_at)?;

        let record = RefreshTokenRecord {
            id: entry_id,
            token_hash: hash_token(&tokens.refresh_token),
            account_id: account.id,
            issued_at,
            expires_at: tokens.refresh_expires_at,
            revoked_at: None,
            revoked_reason: None,
            replaced_by: None,
            user_agent: client.user_agent.clone(),
            ip_address: client.ip_address.clone(),
        };

        self.ledger.store(&record).await?;

        Ok(tokens)
    }

    /// 刷新令牌（旧令牌立即失效）
    pub async fn refresh(
        &self,
        refresh_token: &str,
        client: &ClientInfo,
    ) -> Result<SessionGrant, AppError> {
        let claims = self.jwt_service.verify_refresh(refresh_token).map_err(|e| {
            tracing::debug!(error = %e, "Refresh token rejected before ledger lookup");
            record_refresh("bad_token");
            AppError::ReauthenticationRequired
        })?;

        let token_hash = hash_token(refresh_token);
        let next_entry_id = Uuid::new_v4();

        let account_id = match self.ledger.consume(&token_hash, next_entry_id).await? {
            Some(account_id) => account_id,
            None => {
                self.handle_rejected_refresh(&token_hash).await?;
                record_refresh("rejected");
                return Err(AppError::ReauthenticationRequired);
            }
        };

        if claims.account_id().ok() != Some(account_id) {
            tracing::error!(%account_id, "Ledger owner does not match refresh token subject");
            self.ledger.revoke_all(account_id).await?;
            return Err(AppError::ReauthenticationRequired);
        }

        let account = self
            .accounts
            .find_by_id(account_id)
            .await?
            .ok_or(AppError::ReauthenticationRequired)?;

        if !account.status.is_active() {
            let revoked = self.ledger.revoke_all(account.id).await?;
            tracing::info!(
                account_id = %account.id,
                status = %account.status,
                revoked,
                "Refresh refused for inactive account"
            );
            record_refresh("inactive");
            return Err(AppError::ReauthenticationRequired);
        }

        let tokens = self.issue_session(&account, client, next_entry_id).await?;

        record_refresh("success");
        tracing::debug!(account_id = %account.id, "Refresh token rotated");

        Ok(SessionGrant { tokens, account })
    }

    /// 已轮换的令牌再次出现，视为令牌被盗用，撤销该账户的所有会话
    async fn handle_rejected_refresh(&self, token_hash: &str) -> Result<(), AppError> {
        if !self.config.security.refresh_reuse_detection {
            return Ok(());
        }

        let Some(record) = self.ledger.find(token_hash).await? else {
            return Ok(());
        };

        if record.revocation_reason() == Some(RevocationReason::Rotated) {
            let revoked = self.ledger.revoke_all(record.account_id).await?;
            tracing::warn!(
                account_id = %record.account_id,
                revoked,
                "Rotated refresh token replayed, all sessions revoked"
            );
            metrics::counter!("auth_refresh_reuse_total").increment(1);
        }

        Ok(())
    }

    /// 登出（撤销当前刷新令牌），令牌未知时同样视为成功
    pub async fn logout(&self, refresh_token: Option<&str>) -> Result<(), AppError> {
        let Some(token) = refresh_token.filter(|t| !t.is_empty()) else {
            return Ok(());
        };

        let revoked = self
            .ledger
            .revoke(&hash_token(token), RevocationReason::Logout)
            .await?;
        tracing::debug!(revoked, "Logout");

        Ok(())
    }

    /// 从所有设备登出
    pub async fn logout_all(&self, account_id: Uuid) -> Result<u64, AppError> {
        let revoked = self.ledger.revoke_all(account_id).await?;
        tracing::info!(%account_id, revoked, "Logged out from all devices");
        Ok(revoked)
    }

    /// 自助注册。普通用户直接启用，医生和化验员需管理员审核
    pub async fn register(&self, req: RegisterRequest) -> Result<Account, AppError> {
        req.validate()?;

        let role = req.role.unwrap_or(Role::User);
        if role == Role::Admin {
            return Err(AppError::Forbidden);
        }

        PasswordHasher::validate_policy(&req.secret, &self.config.security)?;

        let status = match role {
            Role::User => AccountStatus::Active,
            _ => AccountStatus::Pending,
        };

        let (secret_hash, hash_scheme) = self.hash_secret(&req.secret).await?;
        let account = self
            .accounts
            .insert(NewAccount {
                email: req.email,
                secret_hash,
                hash_scheme,
                role,
                status,
                full_name: req.full_name,
            })
            .await?;

        tracing::info!(
            account_id = %account.id,
            role = %account.role,
            status = %account.status,
            "Account registered"
        );

        Ok(account)
    }

    /// 修改密码，成功后撤销所有刷新令牌
    pub async fn change_secret(
        &self,
        account_id: Uuid,
        current_secret: &str,
        new_secret: &str,
    ) -> Result<u64, AppError> {
        let account = self
            .accounts
            .find_by_id(account_id)
            .await?
            .ok_or_else(|| AppError::not_found("account"))?;

        if !self.verify_secret(&account, current_secret).await? {
            return Err(AppError::InvalidCredentials);
        }

        PasswordHasher::validate_policy(new_secret, &self.config.security)?;

        let (secret_hash, scheme) = self.hash_secret(new_secret).await?;
        self.accounts
            .update_secret(account.id, &secret_hash, scheme)
            .await?;

        let revoked = self.ledger.revoke_all(account.id).await?;
        tracing::info!(
            account_id = %account.id,
            migrated_from_legacy = account.hash_scheme == HashScheme::LegacySha256,
            revoked,
            "Secret changed"
        );

        Ok(revoked)
    }

    /// 管理员修改账户状态（审核、拒绝、停用）
    pub async fn set_status(
        &self,
        account_id: Uuid,
        status: AccountStatus,
    ) -> Result<Account, AppError> {
        let account = self
            .accounts
            .update_status(account_id, status)
            .await?
            .ok_or_else(|| AppError::not_found("account"))?;

        let revoked = if status.is_active() {
            0
        } else {
            self.ledger.revoke_all(account.id).await?
        };

        tracing::info!(
            account_id = %account.id,
            status = %status,
            revoked,
            "Account status changed"
        );

        Ok(account)
    }

    /// 删除账户及其刷新令牌
    pub async fn delete_account(&self, account_id: Uuid) -> Result<(), AppError> {
        if !self.accounts.delete(account_id).await? {
            return Err(AppError::not_found("account"));
        }

        let purged = self.ledger.purge_account(account_id).await?;
        tracing::info!(%account_id, purged, "Account deleted");
        Ok(())
    }

    /// 清理过期的刷新令牌
    pub async fn sweep_expired(&self) -> Result<u64, AppError> {
        let removed = self.ledger.sweep_expired().await?;
        tracing::info!(removed, "Expired refresh tokens swept");
        Ok(removed)
    }

    /// 创建初始管理员（已存在时跳过）
    pub async fn seed_admin(&self, email: &str, secret: &str) -> Result<Option<Account>, AppError> {
        if self.accounts.find_by_email(email).await?.is_some() {
            tracing::debug!("Bootstrap admin already exists");
            return Ok(None);
        }

        PasswordHasher::validate_policy(secret, &self.config.security)?;

        let (secret_hash, hash_scheme) = self.hash_secret(secret).await?;
        let account = self
            .accounts
            .insert(NewAccount {
                email: email.to_string(),
                secret_hash,
                hash_scheme,
                role: Role::Admin,
                status: AccountStatus::Active,
                full_name: None,
            })
            .await?;

        tracing::info!(account_id = %account.id, "Bootstrap admin created");
        Ok(Some(account))
    }
}

fn record_login(outcome: &'static str) {
    metrics::counter!("auth_login_total", "outcome" => outcome).increment(1);
}

fn record_refresh(outcome: &'static str) {
    metrics::counter!("auth_refresh_total", "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{MemoryAccountStore, MemoryRefreshLedger};

    struct Fixture {
        service: AuthService,
        ledger: Arc<MemoryRefreshLedger>,
        jwt: Arc<JwtService>,
    }

    fn fixture() -> Fixture {
        let config = Arc::new(crate::test_support::test_config());
        let ledger = Arc::new(MemoryRefreshLedger::new());
        let jwt = Arc::new(JwtService::from_config(&config).unwrap());
        let hasher = Arc::new(PasswordHasher::from_config(&config.security).unwrap());
        let service = AuthService::new(
            Arc::new(MemoryAccountStore::new()),
            ledger.clone(),
            jwt.clone(),
            hasher,
            config,
        );
        Fixture { service, ledger, jwt }
    }

    fn register_req(email: &str, role: Option<Role>) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            secret: "Passw0rd!".to_string(),
            role,
            full_name: None,
        }
    }

    #[tokio::test]
    async fn test_login_then_verify_yields_same_identity() {
        let f = fixture();
        let account = f.service.register(register_req("a@b.com", None)).await.unwrap();

        let grant = f
            .service
            .login("a@b.com", "Passw0rd!", &ClientInfo::default())
            .await
            .unwrap();
        let claims = f.jwt.verify_access(&grant.tokens.access_token).unwrap();

        assert_eq!(claims.account_id().unwrap(), account.id);
        assert_eq!(claims.role, Role::User);
        assert_eq!(f.ledger.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_email_and_wrong_secret_look_the_same() {
        let f = fixture();
        f.service.register(register_req("a@b.com", None)).await.unwrap();

        let unknown = f
            .service
            .login("nobody@b.com", "Passw0rd!", &ClientInfo::default())
            .await
            .unwrap_err();
        let wrong = f
            .service
            .login("a@b.com", "Wrong0rd!", &ClientInfo::default())
            .await
            .unwrap_err();

        assert!(matches!(unknown, AppError::InvalidCredentials));
        assert!(matches!(wrong, AppError::InvalidCredentials));
        assert_eq!(unknown.user_message(), wrong.user_message());
    }

    #[tokio::test]
    async fn test_pending_doctor_cannot_login_until_approved() {
        let f = fixture();
        let doctor = f
            .service
            .register(register_req("doc@b.com", Some(Role::Doctor)))
            .await
            .unwrap();
        assert_eq!(doctor.status, AccountStatus::Pending);

        let err = f
            .service
            .login("doc@b.com", "Passw0rd!", &ClientInfo::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AccountInactive(_)));

        f.service.set_status(doctor.id, AccountStatus::Active).await.unwrap();
        assert!(f
            .service
            .login("doc@b.com", "Passw0rd!", &ClientInfo::default())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_admin_cannot_self_register() {
        let f = fixture();
        let err = f
            .service
            .register(register_req("root@b.com", Some(Role::Admin)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden));
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_old_token_is_single_use() {
        let f = fixture();
        f.service.register(register_req("a@b.com", None)).await.unwrap();
        let grant = f
            .service
            .login("a@b.com", "Passw0rd!", &ClientInfo::default())
            .await
            .unwrap();

        let rotated = f
            .service
            .refresh(&grant.tokens.refresh_token, &ClientInfo::default())
            .await
            .unwrap();
        assert_ne!(rotated.tokens.refresh_token, grant.tokens.refresh_token);
        assert_ne!(rotated.tokens.access_token, grant.tokens.access_token);

        let replay = f
            .service
            .refresh(&grant.tokens.refresh_token, &ClientInfo::default())
            .await
            .unwrap_err();
        assert!(matches!(replay, AppError::ReauthenticationRequired));
    }

    #[tokio::test]
    async fn test_replayed_rotated_token_revokes_whole_family() {
        let f = fixture();
        f.service.register(register_req("a@b.com", None)).await.unwrap();
        let grant = f
            .service
            .login("a@b.com", "Passw0rd!", &ClientInfo::default())
            .await
            .unwrap();
        let rotated = f
            .service
            .refresh(&grant.tokens.refresh_token, &ClientInfo::default())
            .await
            .unwrap();

        // Attacker replays the stolen first token
        assert!(f
            .service
            .refresh(&grant.tokens.refresh_token, &ClientInfo::default())
            .await
            .is_err());

        // The legitimate holder's newer token is gone too
        assert!(f
            .service
            .refresh(&rotated.tokens.refresh_token, &ClientInfo::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_logout_revokes_without_touching_other_sessions() {
        let f = fixture();
        f.service.register(register_req("a@b.com", None)).await.unwrap();
        let phone = f
            .service
            .login("a@b.com", "Passw0rd!", &ClientInfo::default())
            .await
            .unwrap();
        let laptop = f
            .service
            .login("a@b.com", "Passw0rd!", &ClientInfo::default())
            .await
            .unwrap();

        f.service.logout(Some(&phone.tokens.refresh_token)).await.unwrap();
        assert!(f
            .service
            .refresh(&phone.tokens.refresh_token, &ClientInfo::default())
            .await
            .is_err());
        assert!(f
            .service
            .refresh(&laptop.tokens.refresh_token, &ClientInfo::default())
            .await
            .is_ok());

        // Missing or unknown cookie is still a successful logout
        f.service.logout(None).await.unwrap();
        f.service.logout(Some("garbage")).await.unwrap();
    }

    #[tokio::test]
    async fn test_suspension_revokes_sessions() {
        let f = fixture();
        let account = f.service.register(register_req("a@b.com", None)).await.unwrap();
        let grant = f
            .service
            .login("a@b.com", "Passw0rd!", &ClientInfo::default())
            .await
            .unwrap();

        f.service.set_status(account.id, AccountStatus::Suspended).await.unwrap();
        let err = f
            .service
            .refresh(&grant.tokens.refresh_token, &ClientInfo::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ReauthenticationRequired));
    }

    #[tokio::test]
    async fn test_change_secret_migrates_legacy_hash_and_revokes() {
        let f = fixture();
        let legacy = f
            .service
            .accounts()
            .insert(NewAccount {
                email: "old@b.com".to_string(),
                secret_hash: crate::auth::password::legacy_sha256_digest(b"s4lt", "Passw0rd!"),
                hash_scheme: HashScheme::LegacySha256,
                role: Role::Lab,
                status: AccountStatus::Active,
                full_name: None,
            })
            .await
            .unwrap();

        let grant = f
            .service
            .login("old@b.com", "Passw0rd!", &ClientInfo::default())
            .await
            .unwrap();

        let revoked = f
            .service
            .change_secret(legacy.id, "Passw0rd!", "N3wSecret!")
            .await
            .unwrap();
        assert_eq!(revoked, 1);

        let migrated = f.service.accounts().find_by_id(legacy.id).await.unwrap().unwrap();
        assert_eq!(migrated.hash_scheme, HashScheme::Argon2id);
        assert!(f
            .service
            .refresh(&grant.tokens.refresh_token, &ClientInfo::default())
            .await
            .is_err());
        assert!(f
            .service
            .login("old@b.com", "N3wSecret!", &ClientInfo::default())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_delete_account_purges_ledger() {
        let f = fixture();
        let account = f.service.register(register_req("a@b.com", None)).await.unwrap();
        f.service
            .login("a@b.com", "Passw0rd!", &ClientInfo::default())
            .await
            .unwrap();

        f.service.delete_account(account.id).await.unwrap();
        assert!(f.ledger.is_empty());
        assert!(matches!(
            f.service.delete_account(account.id).await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_seed_admin_is_idempotent() {
        let f = fixture();
        assert!(f.service.seed_admin("root@b.com", "Adm1nPass").await.unwrap().is_some());
        assert!(f.service.seed_admin("root@b.com", "Adm1nPass").await.unwrap().is_none());
    }
}
