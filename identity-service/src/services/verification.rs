//! One-time codes for email/SMS confirmation and password reset tokens.
//!
//! OTP codes live in the cache first, under `verification_token:{token}` with a
//! TTL equal to their validity window. When the cache cannot take the write the
//! code is persisted instead, with an explicit used flag. Redemption checks the
//! cache before durable storage.
//!
//! The durable path reads, checks, then marks used. Two redemptions racing on
//! the same fallback record can both succeed. The cache path is single-use
//! because only one caller can delete the entry.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use super::cache::CacheStore;
use super::email::EmailProvider;
use super::error::ServiceError;
use super::sms::SmsProvider;
use crate::models::{CodeChannel, CodePurpose, VerificationCode};
use crate::repository::VerificationCodeRepository;

/// TTLs and intervals the service runs with.
#[derive(Debug, Clone)]
pub struct VerificationSettings {
    pub code_ttl_seconds: i64,
    pub reset_ttl_seconds: i64,
    pub resend_interval_seconds: u64,
    pub frontend_url: String,
}

/// Returned when a code was sent. The code itself only travels out of band.
#[derive(Debug, Clone)]
pub struct IssuedCode {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redemption {
    pub valid: bool,
    pub target: Option<String>,
}

impl Redemption {
    fn invalid() -> Self {
        Self {
            valid: false,
            target: None,
        }
    }

    fn valid(target: String) -> Self {
        Self {
            valid: true,
            target: Some(target),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedCode {
    code: String,
    token: String,
    target: String,
    channel: CodeChannel,
}

/// Where an issued code ended up.
enum Stored {
    Cache,
    Durable,
}

fn token_key(token: &str) -> String {
    format!("verification_token:{}", token)
}

fn target_key(channel: CodeChannel, target: &str) -> String {
    match channel {
        CodeChannel::Email => format!("verification_code:{}", target),
        CodeChannel::Sms => format!("sms_verification:{}", target),
    }
}

fn rate_key(channel: CodeChannel, target: &str) -> String {
    format!("verification_rate:{}:{}", channel.as_str(), target)
}

/// Emails compare lowercased; phone numbers as given, trimmed.
pub fn normalize_target(channel: CodeChannel, target: &str) -> String {
    match channel {
        CodeChannel::Email => target.trim().to_lowercase(),
        CodeChannel::Sms => target.trim().to_string(),
    }
}

fn generate_code() -> String {
    rand::thread_rng().gen_range(100_000..=999_999).to_string()
}

fn codes_match(expected: &str, presented: &str) -> bool {
    bool::from(expected.as_bytes().ct_eq(presented.trim().as_bytes()))
}

fn invalid_reset_token() -> ServiceError {
    ServiceError::Validation("Invalid or expired reset token".to_string())
}

#[derive(Clone)]
pub struct VerificationCodeService {
    cache: Arc<dyn CacheStore>,
    codes: Arc<dyn VerificationCodeRepository>,
    email: Arc<dyn EmailProvider>,
    sms: Arc<dyn SmsProvider>,
    settings: VerificationSettings,
}

impl VerificationCodeService {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        codes: Arc<dyn VerificationCodeRepository>,
        email: Arc<dyn EmailProvider>,
        sms: Arc<dyn SmsProvider>,
        settings: VerificationSettings,
    ) -> Self {
        Self {
            cache,
            codes,
            email,
            sms,
            settings,
        }
    }

    // ==== One-time codes ====

    /// Generate, store and send a code to `target`.
    pub async fn issue(
        &self,
        channel: CodeChannel,
        target: &str,
    ) -> Result<IssuedCode, ServiceError> {
        let target = normalize_target(channel, target);
        if target.is_empty() {
            return Err(ServiceError::Validation("Target address is required".to_string()));
        }

        self.ensure_can_send(channel, &target).await?;

        let code = generate_code();
        let token = Uuid::new_v4().to_string();
        let expires_at = Utc::now() + Duration::seconds(self.settings.code_ttl_seconds);

        let stored = self
            .store_code(channel, &target, &code, &token, expires_at)
            .await?;

        if let Err(e) = self.deliver(channel, &target, &code).await {
            tracing::error!(error = %e, channel = channel.as_str(), "Failed to deliver verification code");
            self.discard(&stored, channel, &target, &token).await;
            return Err(ServiceError::Notification(
                "Failed to send verification code".to_string(),
            ));
        }

        if let Err(e) = self
            .cache
            .set_ex(
                &rate_key(channel, &target),
                "1",
                self.settings.resend_interval_seconds,
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to record resend interval");
        }

        tracing::info!(channel = channel.as_str(), expires_at = %expires_at, "Verification code issued");

        Ok(IssuedCode { token, expires_at })
    }

    async fn ensure_can_send(&self, channel: CodeChannel, target: &str) -> Result<(), ServiceError> {
        let key = rate_key(channel, target);
        match self.cache.get(&key).await {
            Ok(Some(_)) => {
                let retry_after = self
                    .cache
                    .ttl(&key)
                    .await
                    .ok()
                    .flatten()
                    .unwrap_or(self.settings.resend_interval_seconds);
                return Err(Self::too_soon(retry_after));
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Resend marker unavailable, checking durable codes"),
        }

        // Codes written through the fallback path never set the marker.
        let since = Utc::now() - Duration::seconds(self.settings.resend_interval_seconds as i64);
        let recent = self
            .codes
            .count_issued_since(target, channel, since)
            .await
            .map_err(ServiceError::Storage)?;

        if recent > 0 {
            return Err(Self::too_soon(self.settings.resend_interval_seconds));
        }

        Ok(())
    }

    fn too_soon(retry_after: u64) -> ServiceError {
        ServiceError::RateLimited {
            message: "Please wait before requesting another code".to_string(),
            retry_after: Some(retry_after),
        }
    }

    async fn store_code(
        &self,
        channel: CodeChannel,
        target: &str,
        code: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Stored, ServiceError> {
        match self.cache_code(channel, target, code, token).await {
            Ok(()) => return Ok(Stored::Cache),
            Err(e) => {
                tracing::warn!(error = %e, "Cache write failed, storing verification code durably");
                // A partial write must not leave a second redeemable copy behind.
                if let Err(e) = self.cache.del(&token_key(token)).await {
                    tracing::warn!(error = %e, "Failed to drop partial cached verification code");
                }
            }
        }

        self.codes
            .delete_for_target(target, channel, CodePurpose::Otp)
            .await
            .map_err(ServiceError::Storage)?;

        let record = VerificationCode::otp(
            channel,
            target.to_string(),
            code.to_string(),
            token.to_string(),
            expires_at,
        );
        self.codes
            .insert(&record)
            .await
            .map_err(ServiceError::Storage)?;

        Ok(Stored::Durable)
    }

    async fn cache_code(
        &self,
        channel: CodeChannel,
        target: &str,
        code: &str,
        token: &str,
    ) -> Result<(), anyhow::Error> {
        let ttl = self.settings.code_ttl_seconds.max(1) as u64;
        let per_target = target_key(channel, target);

        // A new code supersedes the previous one for the same target.
        if let Some(previous) = self.cache.get(&per_target).await? {
            self.cache.del(&token_key(&previous)).await?;
        }

        let entry = serde_json::to_string(&CachedCode {
            code: code.to_string(),
            token: token.to_string(),
            target: target.to_string(),
            channel,
        })?;

        // The redeemable entry goes last so a failed write leaves nothing to redeem.
        self.cache.set_ex(&per_target, token, ttl).await?;
        self.cache.set_ex(&token_key(token), &entry, ttl).await?;
        Ok(())
    }

    async fn deliver(&self, channel: CodeChannel, target: &str, code: &str) -> Result<(), anyhow::Error> {
        match channel {
            CodeChannel::Email => self
                .email
                .send_verification_code(target, code)
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string())),
            CodeChannel::Sms => {
                let minutes = (self.settings.code_ttl_seconds / 60).max(1);
                let text = format!(
                    "Your verification code is {}. It expires in {} minutes.",
                    code, minutes
                );
                self.sms.send(target, &text).await
            }
        }
    }

    async fn discard(&self, stored: &Stored, channel: CodeChannel, target: &str, token: &str) {
        let result = match stored {
            Stored::Cache => {
                let removed = self.cache.del(&token_key(token)).await;
                let _ = self.cache.del(&target_key(channel, target)).await;
                removed.map(|_| ())
            }
            Stored::Durable => self.codes.delete_by_token(token).await,
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to discard undelivered verification code");
        }
    }

    /// Check `code` against the code issued under `token`. A code validates at most once.
    pub async fn redeem(
        &self,
        channel: CodeChannel,
        token: &str,
        code: &str,
    ) -> Result<Redemption, ServiceError> {
        match self.cache.get(&token_key(token)).await {
            Ok(Some(raw)) => return Ok(self.redeem_cached(channel, token, code, &raw).await),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Cache read failed, checking durable codes"),
        }

        self.redeem_durable(channel, token, code).await
    }

    async fn redeem_cached(
        &self,
        channel: CodeChannel,
        token: &str,
        code: &str,
        raw: &str,
    ) -> Redemption {
        let entry: CachedCode = match serde_json::from_str(raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed cached verification code");
                return Redemption::invalid();
            }
        };

        if entry.channel != channel || !codes_match(&entry.code, code) {
            return Redemption::invalid();
        }

        match self.cache.del(&token_key(token)).await {
            Ok(true) => {}
            Ok(false) => return Redemption::invalid(),
            Err(e) => {
                tracing::warn!(error = %e, "Could not consume cached verification code");
                return Redemption::invalid();
            }
        }

        let per_target = target_key(channel, &entry.target);
        if let Ok(Some(current)) = self.cache.get(&per_target).await {
            if current == token {
                let _ = self.cache.del(&per_target).await;
            }
        }

        Redemption::valid(entry.target)
    }

    async fn redeem_durable(
        &self,
        channel: CodeChannel,
        token: &str,
        code: &str,
    ) -> Result<Redemption, ServiceError> {
        let record = match self
            .codes
            .find_by_token(token)
            .await
            .map_err(ServiceError::Storage)?
        {
            Some(record) => record,
            None => return Ok(Redemption::invalid()),
        };

        if !record.is_otp(channel) {
            return Ok(Redemption::invalid());
        }

        if record.is_expired() {
            self.codes
                .delete_by_token(token)
                .await
                .map_err(ServiceError::Storage)?;
            return Ok(Redemption::invalid());
        }

        if record.is_used || !codes_match(&record.code, code) {
            return Ok(Redemption::invalid());
        }

        if !self
            .codes
            .mark_used(token)
            .await
            .map_err(ServiceError::Storage)?
        {
            return Ok(Redemption::invalid());
        }

        Ok(Redemption::valid(record.target))
    }

    // ==== Password reset ====

    /// Replace any outstanding reset token for `email` and mail a fresh one.
    ///
    /// Delivery failures are logged only; the caller's response must not
    /// depend on whether the mail went out.
    pub async fn issue_password_reset(
        &self,
        email: &str,
        tenant_id: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        let email = normalize_target(CodeChannel::Email, email);

        self.codes
            .delete_for_target(&email, CodeChannel::Email, CodePurpose::PasswordReset)
            .await
            .map_err(ServiceError::Storage)?;

        let token = Uuid::new_v4().to_string();
        let record = VerificationCode::password_reset(
            email.clone(),
            token.clone(),
            tenant_id,
            Duration::seconds(self.settings.reset_ttl_seconds),
        );
        self.codes
            .insert(&record)
            .await
            .map_err(ServiceError::Storage)?;

        if let Err(e) = self
            .email
            .send_password_reset_email(&email, &token, &self.settings.frontend_url)
            .await
        {
            tracing::warn!(error = %e, "Failed to send password reset email");
        }

        Ok(())
    }

    /// Load a reset token that is a reset record, unexpired and unused.
    pub async fn verify_password_reset(
        &self,
        token: &str,
    ) -> Result<VerificationCode, ServiceError> {
        let record = self
            .codes
            .find_by_token(token)
            .await
            .map_err(ServiceError::Storage)?
            .filter(|r| r.is_password_reset())
            .ok_or_else(invalid_reset_token)?;

        if record.is_expired() {
            self.codes
                .delete_by_token(token)
                .await
                .map_err(ServiceError::Storage)?;
            return Err(invalid_reset_token());
        }

        if record.is_used {
            return Err(invalid_reset_token());
        }

        Ok(record)
    }

    pub async fn complete_password_reset(&self, token: &str) -> Result<(), ServiceError> {
        self.codes
            .mark_used(token)
            .await
            .map_err(ServiceError::Storage)?;
        Ok(())
    }

    // ==== Maintenance ====

    /// Delete durable codes past their expiry.
    pub async fn cleanup_expired(&self) -> Result<u64, ServiceError> {
        let removed = self
            .codes
            .delete_expired(Utc::now())
            .await
            .map_err(ServiceError::Storage)?;
        if removed > 0 {
            tracing::info!(removed, "Expired verification codes removed");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryStore;
    use crate::services::cache::MockCache;
    use crate::services::email::{MockEmailService, SentEmailKind};
    use crate::services::sms::MockSmsProvider;

    struct Harness {
        service: VerificationCodeService,
        store: Arc<InMemoryStore>,
        cache: Arc<MockCache>,
        email: Arc<MockEmailService>,
        sms: Arc<MockSmsProvider>,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let cache = Arc::new(MockCache::new());
        let email = Arc::new(MockEmailService::new());
        let sms = Arc::new(MockSmsProvider::new());
        let service = VerificationCodeService::new(
            cache.clone(),
            store.clone(),
            email.clone(),
            sms.clone(),
            VerificationSettings {
                code_ttl_seconds: 600,
                reset_ttl_seconds: 3600,
                resend_interval_seconds: 60,
                frontend_url: "http://localhost:3000".to_string(),
            },
        );
        Harness {
            service,
            store,
            cache,
            email,
            sms,
        }
    }

    fn wrong(code: &str) -> String {
        if code == "111111" { "222222" } else { "111111" }.to_string()
    }

    #[tokio::test]
    async fn cached_code_redeems_exactly_once() {
        let h = harness();
        let issued = h.service.issue(CodeChannel::Email, "A@X.com").await.unwrap();
        let code = h
            .email
            .last_payload(SentEmailKind::VerificationCode, "a@x.com")
            .unwrap();
        assert_eq!(code.len(), 6);

        let miss = h
            .service
            .redeem(CodeChannel::Email, &issued.token, &wrong(&code))
            .await
            .unwrap();
        assert!(!miss.valid);

        let hit = h
            .service
            .redeem(CodeChannel::Email, &issued.token, &code)
            .await
            .unwrap();
        assert_eq!(hit, Redemption::valid("a@x.com".to_string()));

        let replay = h
            .service
            .redeem(CodeChannel::Email, &issued.token, &code)
            .await
            .unwrap();
        assert!(!replay.valid);
    }

    #[tokio::test]
    async fn cache_outage_falls_back_to_durable_storage() {
        let h = harness();
        h.cache.set_unavailable(true);

        let issued = h.service.issue(CodeChannel::Email, "a@x.com").await.unwrap();
        let code = h
            .email
            .last_payload(SentEmailKind::VerificationCode, "a@x.com")
            .unwrap();

        let record = VerificationCodeRepository::find_by_token(h.store.as_ref(), &issued.token)
            .await
            .unwrap()
            .unwrap();
        assert!(record.is_otp(CodeChannel::Email));

        assert!(h.service.redeem(CodeChannel::Email, &issued.token, &code).await.unwrap().valid);
        assert!(!h.service.redeem(CodeChannel::Email, &issued.token, &code).await.unwrap().valid);
    }

    /// Lets the chosen `set_ex` call reach the store and then reports it as failed.
    struct FlakyCache {
        inner: MockCache,
        fail_on: usize,
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl CacheStore for FlakyCache {
        async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
            self.inner.get(key).await
        }

        async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), anyhow::Error> {
            self.inner.set_ex(key, value, ttl_seconds).await?;
            let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            if call == self.fail_on {
                return Err(anyhow::anyhow!("connection reset"));
            }
            Ok(())
        }

        async fn incr(&self, key: &str, ttl_seconds: u64) -> Result<i64, anyhow::Error> {
            self.inner.incr(key, ttl_seconds).await
        }

        async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<(), anyhow::Error> {
            self.inner.expire(key, ttl_seconds).await
        }

        async fn ttl(&self, key: &str) -> Result<Option<u64>, anyhow::Error> {
            self.inner.ttl(key).await
        }

        async fn del(&self, key: &str) -> Result<bool, anyhow::Error> {
            self.inner.del(key).await
        }

        async fn health_check(&self) -> Result<(), anyhow::Error> {
            self.inner.health_check().await
        }
    }

    #[tokio::test]
    async fn partial_cache_write_leaves_a_single_redeemable_copy() {
        for fail_on in [1, 2] {
            let store = Arc::new(InMemoryStore::new());
            let email = Arc::new(MockEmailService::new());
            let service = VerificationCodeService::new(
                Arc::new(FlakyCache {
                    inner: MockCache::new(),
                    fail_on,
                    calls: Default::default(),
                }),
                store.clone(),
                email.clone(),
                Arc::new(MockSmsProvider::new()),
                VerificationSettings {
                    code_ttl_seconds: 600,
                    reset_ttl_seconds: 3600,
                    resend_interval_seconds: 60,
                    frontend_url: "http://localhost:3000".to_string(),
                },
            );

            let issued = service.issue(CodeChannel::Email, "a@x.com").await.unwrap();
            let code = email
                .last_payload(SentEmailKind::VerificationCode, "a@x.com")
                .unwrap();

            let first = service.redeem(CodeChannel::Email, &issued.token, &code).await.unwrap();
            let second = service.redeem(CodeChannel::Email, &issued.token, &code).await.unwrap();
            assert!(first.valid, "write {fail_on} failed: first redemption");
            assert!(!second.valid, "write {fail_on} failed: replay accepted");
        }
    }

    #[tokio::test]
    async fn resend_within_interval_is_rate_limited() {
        let h = harness();
        h.service.issue(CodeChannel::Email, "a@x.com").await.unwrap();
        let err = h.service.issue(CodeChannel::Email, "a@x.com").await.unwrap_err();
        assert!(matches!(err, ServiceError::RateLimited { .. }));

        // Another target is unaffected.
        h.service.issue(CodeChannel::Email, "b@x.com").await.unwrap();
    }

    #[tokio::test]
    async fn resend_limit_holds_without_cache() {
        let h = harness();
        h.cache.set_unavailable(true);
        h.service.issue(CodeChannel::Sms, "+15550100").await.unwrap();
        let err = h.service.issue(CodeChannel::Sms, "+15550100").await.unwrap_err();
        assert!(matches!(err, ServiceError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn delivery_failure_surfaces_and_discards_code() {
        let h = harness();
        h.sms.set_failing(true);

        let err = h.service.issue(CodeChannel::Sms, "+15550100").await.unwrap_err();
        assert!(matches!(err, ServiceError::Notification(_)));
        assert!(h.cache.get(&target_key(CodeChannel::Sms, "+15550100")).await.unwrap().is_none());

        // No resend marker was set, so a retry is allowed.
        h.sms.set_failing(false);
        h.service.issue(CodeChannel::Sms, "+15550100").await.unwrap();
    }

    #[tokio::test]
    async fn sms_code_does_not_redeem_on_email_channel() {
        let h = harness();
        let issued = h.service.issue(CodeChannel::Sms, "+15550100").await.unwrap();
        let text = h.sms.last_text("+15550100").unwrap();
        let code: String = text.chars().filter(|c| c.is_ascii_digit()).take(6).collect();

        assert!(!h.service.redeem(CodeChannel::Email, &issued.token, &code).await.unwrap().valid);
        let ok = h.service.redeem(CodeChannel::Sms, &issued.token, &code).await.unwrap();
        assert_eq!(ok.target.as_deref(), Some("+15550100"));
    }

    #[tokio::test]
    async fn expired_durable_code_is_invalid_and_removed() {
        let h = harness();
        let record = VerificationCode::otp(
            CodeChannel::Email,
            "a@x.com".to_string(),
            "123456".to_string(),
            "tok".to_string(),
            Utc::now() - Duration::seconds(1),
        );
        VerificationCodeRepository::insert(h.store.as_ref(), &record).await.unwrap();

        assert!(!h.service.redeem(CodeChannel::Email, "tok", "123456").await.unwrap().valid);
        assert!(VerificationCodeRepository::find_by_token(h.store.as_ref(), "tok")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn reset_token_is_single_use() {
        let h = harness();
        h.service.issue_password_reset("A@x.com", None).await.unwrap();
        let token = h
            .email
            .last_payload(SentEmailKind::PasswordReset, "a@x.com")
            .unwrap();

        let record = h.service.verify_password_reset(&token).await.unwrap();
        assert_eq!(record.target, "a@x.com");

        h.service.complete_password_reset(&token).await.unwrap();
        assert!(matches!(
            h.service.verify_password_reset(&token).await,
            Err(ServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn new_reset_supersedes_old_one() {
        let h = harness();
        h.service.issue_password_reset("a@x.com", None).await.unwrap();
        let first = h.email.last_payload(SentEmailKind::PasswordReset, "a@x.com").unwrap();
        h.service.issue_password_reset("a@x.com", None).await.unwrap();

        assert!(h.service.verify_password_reset(&first).await.is_err());
    }

    #[tokio::test]
    async fn otp_token_is_not_a_reset_token() {
        let h = harness();
        h.cache.set_unavailable(true);
        let issued = h.service.issue(CodeChannel::Email, "a@x.com").await.unwrap();
        assert!(h.service.verify_password_reset(&issued.token).await.is_err());
    }

    #[tokio::test]
    async fn reset_mail_failure_is_swallowed() {
        let h = harness();
        h.email.set_failing(true);
        h.service.issue_password_reset("a@x.com", None).await.unwrap();
    }

    #[tokio::test]
    async fn cleanup_removes_expired_codes() {
        let h = harness();
        let expired = VerificationCode::otp(
            CodeChannel::Sms,
            "+1".to_string(),
            "123456".to_string(),
            "old".to_string(),
            Utc::now() - Duration::minutes(5),
        );
        VerificationCodeRepository::insert(h.store.as_ref(), &expired).await.unwrap();

        assert_eq!(h.service.cleanup_expired().await.unwrap(), 1);
        assert_eq!(h.service.cleanup_expired().await.unwrap(), 0);
    }
}
