//! Verification code model - one-time codes and password reset tokens.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Value stored in the `code` column of password reset records.
pub const PASSWORD_RESET_SENTINEL: &str = "PASSWORD_RESET";

/// Delivery channel of a code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeChannel {
    Email,
    Sms,
}

impl CodeChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeChannel::Email => "email",
            CodeChannel::Sms => "sms",
        }
    }
}

/// What a redemption token may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodePurpose {
    Otp,
    PasswordReset,
}

impl CodePurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodePurpose::Otp => "otp",
            CodePurpose::PasswordReset => "password_reset",
        }
    }
}

/// Durable verification code record.
#[derive(Debug, Clone, FromRow)]
pub struct VerificationCode {
    pub code_id: Uuid,
    pub channel_code: String,
    pub purpose_code: String,
    pub target: String,
    pub code: String,
    pub token: String,
    /// Tenant a password reset was requested in.
    pub tenant_id: Option<Uuid>,
    pub is_used: bool,
    pub expiry_utc: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
}

impl VerificationCode {
    pub fn otp(
        channel: CodeChannel,
        target: String,
        code: String,
        token: String,
        expiry_utc: DateTime<Utc>,
    ) -> Self {
        Self {
            code_id: Uuid::new_v4(),
            channel_code: channel.as_str().to_string(),
            purpose_code: CodePurpose::Otp.as_str().to_string(),
            target,
            code,
            token,
            tenant_id: None,
            is_used: false,
            expiry_utc,
            created_utc: Utc::now(),
        }
    }

    pub fn password_reset(
        target: String,
        token: String,
        tenant_id: Option<Uuid>,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            code_id: Uuid::new_v4(),
            channel_code: CodeChannel::Email.as_str().to_string(),
            purpose_code: CodePurpose::PasswordReset.as_str().to_string(),
            target,
            code: PASSWORD_RESET_SENTINEL.to_string(),
            token,
            tenant_id,
            is_used: false,
            expiry_utc: now + ttl,
            created_utc: now,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expiry_utc
    }

    /// Password reset records carry both the purpose tag and the sentinel code.
    pub fn is_password_reset(&self) -> bool {
        self.purpose_code == CodePurpose::PasswordReset.as_str()
            && self.code == PASSWORD_RESET_SENTINEL
    }

    pub fn is_otp(&self, channel: CodeChannel) -> bool {
        self.purpose_code == CodePurpose::Otp.as_str() && self.channel_code == channel.as_str()
    }
}
