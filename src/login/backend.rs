//! Identity backend RPC surface consumed by the login flow.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use std::time::Duration;
use thiserror::Error;

use super::{
    error::FlowError,
    request::RequestId,
    types::{
        AuthenticationMethodInventory, DeviceAuthorizationRequest, LoginPolicy,
        PasswordComplexityPolicy, SessionState, SessionToken, UserProfile,
    },
};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("resource not found")]
    NotFound,
    #[error("session token rejected")]
    Unauthenticated,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("too many failed attempts")]
    Locked,
    #[error("already completed")]
    AlreadyCompleted,
    #[error("precondition failed: {0}")]
    FailedPrecondition(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("unexpected backend response: {0}")]
    InvalidResponse(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl From<BackendError> for FlowError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotFound => Self::NotFound,
            BackendError::Unauthenticated => Self::Unauthenticated,
            BackendError::InvalidCredentials => Self::ValidationFailed,
            BackendError::Locked => Self::Locked,
            BackendError::FailedPrecondition(reason) => Self::PolicyUnsatisfiable(reason),
            other @ (BackendError::AlreadyCompleted
            | BackendError::Unavailable(_)
            | BackendError::InvalidResponse(_)
            | BackendError::Http(_)) => Self::Transient(other.to_string()),
        }
    }
}

/// Identifies the user a new session is created for.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UserCheck {
    UserId(String),
    LoginName(String),
}

#[derive(Clone, Debug)]
pub struct IntentCheck {
    pub intent_id: String,
    pub intent_token: SecretString,
}

/// Credentials submitted for verification against a session.
#[derive(Clone, Debug, Default)]
pub struct SessionChecks {
    pub user: Option<UserCheck>,
    pub password: Option<SecretString>,
    pub web_authn: Option<serde_json::Value>,
    pub totp: Option<SecretString>,
    pub otp_email: Option<SecretString>,
    pub otp_sms: Option<SecretString>,
    pub intent: Option<IntentCheck>,
}

impl SessionChecks {
    #[must_use]
    pub fn user(check: UserCheck) -> Self {
        Self {
            user: Some(check),
            ..Self::default()
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UserVerification {
    Required,
    Preferred,
    Discouraged,
}

impl UserVerification {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Required => "USER_VERIFICATION_REQUIREMENT_REQUIRED",
            Self::Preferred => "USER_VERIFICATION_REQUIREMENT_PREFERRED",
            Self::Discouraged => "USER_VERIFICATION_REQUIREMENT_DISCOURAGED",
        }
    }
}

/// Challenge the backend should issue alongside a session update.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ChallengeRequest {
    WebAuthn {
        domain: String,
        user_verification: UserVerification,
    },
    OtpEmail,
    OtpSms,
}

#[derive(Clone, Debug)]
pub struct CreatedSession {
    pub id: String,
    pub token: SessionToken,
    pub change_date: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct SessionUpdate {
    pub token: SessionToken,
    pub change_date: DateTime<Utc>,
    /// WebAuthn request options when a WebAuthn challenge was requested.
    pub web_authn: Option<serde_json::Value>,
}

#[async_trait]
pub trait IdentityBackend: Send + Sync {
    async fn create_session(
        &self,
        checks: &SessionChecks,
        lifetime: Duration,
    ) -> Result<CreatedSession, BackendError>;

    async fn get_session(
        &self,
        session_id: &str,
        token: &SessionToken,
    ) -> Result<SessionState, BackendError>;

    async fn list_sessions(&self, ids: &[String]) -> Result<Vec<SessionState>, BackendError>;

    async fn set_session(
        &self,
        session_id: &str,
        token: &SessionToken,
        checks: &SessionChecks,
        challenge: Option<&ChallengeRequest>,
    ) -> Result<SessionUpdate, BackendError>;

    async fn delete_session(&self, session_id: &str, token: &SessionToken)
        -> Result<(), BackendError>;

    /// `Ok(None)` when no user carries the login name.
    async fn search_user(
        &self,
        login_name: &str,
        organization_id: Option<&str>,
    ) -> Result<Option<UserProfile>, BackendError>;

    async fn list_authentication_methods(
        &self,
        user_id: &str,
    ) -> Result<AuthenticationMethodInventory, BackendError>;

    async fn get_login_policy(
        &self,
        organization_id: Option<&str>,
    ) -> Result<LoginPolicy, BackendError>;

    async fn get_password_complexity(
        &self,
        organization_id: Option<&str>,
    ) -> Result<PasswordComplexityPolicy, BackendError>;

    async fn skip_mfa_init(&self, user_id: &str) -> Result<(), BackendError>;

    async fn get_device_authorization(
        &self,
        user_code: &str,
    ) -> Result<DeviceAuthorizationRequest, BackendError>;

    async fn complete_device_authorization(
        &self,
        device_request_id: &str,
        session_id: &str,
        token: &SessionToken,
    ) -> Result<(), BackendError>;

    /// Returns the URL continuing the application's authorization request.
    async fn create_callback(
        &self,
        request_id: &RequestId,
        session_id: &str,
        token: &SessionToken,
    ) -> Result<String, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_errors_map_into_flow_errors() {
        assert_eq!(FlowError::from(BackendError::NotFound), FlowError::NotFound);
        assert_eq!(
            FlowError::from(BackendError::Unauthenticated),
            FlowError::Unauthenticated
        );
        assert_eq!(
            FlowError::from(BackendError::InvalidCredentials),
            FlowError::ValidationFailed
        );
        assert_eq!(FlowError::from(BackendError::Locked), FlowError::Locked);
        assert!(matches!(
            FlowError::from(BackendError::Unavailable("503".into())),
            FlowError::Transient(_)
        ));
        assert!(matches!(
            FlowError::from(BackendError::FailedPrecondition("no email".into())),
            FlowError::PolicyUnsatisfiable(_)
        ));
    }
}
