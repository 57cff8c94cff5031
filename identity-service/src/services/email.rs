use lettre::{
    message::{header::ContentType, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    Message, SmtpTransport, Transport,
};
use secrecy::ExposeSecret;
use async_trait::async_trait;
use service_core::error::AppError;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::SmtpConfig;

#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send_verification_code(&self, to_email: &str, code: &str) -> Result<(), AppError>;

    async fn send_password_reset_email(
        &self,
        to_email: &str,
        reset_token: &str,
        frontend_url: &str,
    ) -> Result<(), AppError>;

    async fn send_welcome_email(&self, to_email: &str, first_name: &str) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct EmailService {
    mailer: SmtpTransport,
    from_email: String,
}

impl EmailService {
    pub fn new(config: &SmtpConfig) -> Result<Self, AppError> {
        let creds = Credentials::new(
            config.user.clone(),
            config.password.expose_secret().clone(),
        );

        let mailer = SmtpTransport::starttls_relay(&config.host)
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e.to_string())))?
            .credentials(creds)
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(host = %config.host, port = config.port, "Email service initialized");

        Ok(Self {
            mailer,
            from_email: config.from.clone(),
        })
    }

    async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        plain_body: String,
        html_body: String,
    ) -> Result<(), AppError> {
        let email = Message::builder()
            .from(
                self.from_email
                    .parse()
                    .map_err(|e: lettre::address::AddressError| AppError::InternalError(e.into()))?,
            )
            .to(to_email
                .parse()
                .map_err(|e: lettre::address::AddressError| AppError::BadRequest(e.into()))?)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(plain_body),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body),
                    ),
            )
            .map_err(|e| AppError::InternalError(e.into()))?;

        // Send email in blocking thread pool to avoid blocking async runtime
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| AppError::InternalError(e.into()))?;

        match result {
            Ok(_) => {
                tracing::info!(to = %to_email, subject = %subject, "Email sent successfully");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, to = %to_email, "Failed to send email");
                Err(AppError::EmailError(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl EmailProvider for EmailService {
    async fn send_verification_code(&self, to_email: &str, code: &str) -> Result<(), AppError> {
        let html_body = format!(
            r###"<html>
    <body style="font-family: Arial, sans-serif;">
        <h2>Your verification code</h2>
        <p style="font-size: 24px; font-weight: bold; letter-spacing: 4px;">{}</p>
        <p style="color: #666; font-size: 12px;">
            This code expires in 10 minutes. If you didn't request it, please ignore this email.
        </p>
    </body>
</html>"###,
            code
        );

        let plain_body = format!(
            "Your verification code is {}\n\nThis code expires in 10 minutes. If you didn't request it, please ignore this email.",
            code
        );

        self.send_email(to_email, "Your verification code", plain_body, html_body)
            .await
    }

    async fn send_password_reset_email(
        &self,
        to_email: &str,
        reset_token: &str,
        frontend_url: &str,
    ) -> Result<(), AppError> {
        let reset_link = format!(
            "{}/reset-password?token={}",
            frontend_url.trim_end_matches('/'),
            urlencoding::encode(reset_token)
        );

        let html_body = format!(
            r###"<html>
    <body style="font-family: Arial, sans-serif;">
        <h2>Password Reset Request</h2>
        <p>We received a request to reset your password. Click the link below to set a new password:</p>
        <p>
            <a href="{0}" style="background-color: #2196F3; color: white; padding: 14px 20px; text-decoration: none; border-radius: 4px;">
                Reset Password
            </a>
        </p>
        <p style="color: #666; font-size: 12px;">
            This link will expire in 1 hour. If you didn't request this, please ignore this email.
        </p>
        <p style="color: #999; font-size: 12px;">{0}</p>
    </body>
</html>"###,
            reset_link
        );

        let plain_body = format!(
            "Password Reset Request\n\nWe received a request to reset your password. Visit the following link to set a new password:\n\n{}\n\nThis link will expire in 1 hour. If you didn't request this, please ignore this email.",
            reset_link
        );

        self.send_email(to_email, "Reset Your Password", plain_body, html_body)
            .await
    }

    async fn send_welcome_email(&self, to_email: &str, first_name: &str) -> Result<(), AppError> {
        let html_body = format!(
            r###"<html>
    <body style="font-family: Arial, sans-serif;">
        <h2>Welcome aboard!</h2>
        <p>Hi {},</p>
        <p>Your account has been created. You can now sign in with your email and password.</p>
    </body>
</html>"###,
            first_name
        );

        let plain_body = format!(
            "Welcome aboard!\n\nHi {},\n\nYour account has been created. You can now sign in with your email and password.",
            first_name
        );

        self.send_email(to_email, "Welcome", plain_body, html_body)
            .await
    }
}

/// Kind of message the mock recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentEmailKind {
    VerificationCode,
    PasswordReset,
    Welcome,
}

#[derive(Debug, Clone)]
pub struct SentEmail {
    pub kind: SentEmailKind,
    pub to: String,
    /// Verification code or reset token.
    pub payload: String,
}

/// Records every message instead of sending it; `set_failing(true)` simulates an SMTP outage.
#[derive(Default)]
pub struct MockEmailService {
    pub sent: Mutex<Vec<SentEmail>>,
    failing: std::sync::atomic::AtomicBool,
}

impl MockEmailService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    /// Payload of the most recent message of `kind` sent to `to`.
    pub fn last_payload(&self, kind: SentEmailKind, to: &str) -> Option<String> {
        self.sent.lock().ok().and_then(|sent| {
            sent.iter()
                .rev()
                .find(|m| m.kind == kind && m.to == to)
                .map(|m| m.payload.clone())
        })
    }

    fn record(&self, kind: SentEmailKind, to: &str, payload: &str) -> Result<(), AppError> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(AppError::EmailError("mock SMTP outage".to_string()));
        }
        self.sent
            .lock()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Mock email mutex poisoned: {}", e)))?
            .push(SentEmail {
                kind,
                to: to.to_string(),
                payload: payload.to_string(),
            });
        Ok(())
    }
}

#[async_trait]
impl EmailProvider for MockEmailService {
    async fn send_verification_code(&self, to_email: &str, code: &str) -> Result<(), AppError> {
        self.record(SentEmailKind::VerificationCode, to_email, code)
    }

    async fn send_password_reset_email(
        &self,
        to_email: &str,
        reset_token: &str,
        _frontend_url: &str,
    ) -> Result<(), AppError> {
        self.record(SentEmailKind::PasswordReset, to_email, reset_token)
    }

    async fn send_welcome_email(&self, to_email: &str, first_name: &str) -> Result<(), AppError> {
        self.record(SentEmailKind::Welcome, to_email, first_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;

    #[test]
    fn test_email_service_creation() {
        let config = SmtpConfig {
            host: "smtp.example.com".to_string(),
            port: 587,
            user: "mailer@example.com".to_string(),
            password: Secret::new("app-password".to_string()),
            from: "no-reply@example.com".to_string(),
        };

        assert!(EmailService::new(&config).is_ok());
    }

    #[tokio::test]
    async fn mock_records_and_fails_on_demand() {
        let mock = MockEmailService::new();
        mock.send_verification_code("a@x.com", "123456").await.unwrap();
        assert_eq!(
            mock.last_payload(SentEmailKind::VerificationCode, "a@x.com").as_deref(),
            Some("123456")
        );

        mock.set_failing(true);
        assert!(mock.send_welcome_email("a@x.com", "A").await.is_err());
    }
}
