//! Data model shared by the store, resolver, evaluator and router.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use utoipa::ToSchema;

const DEFAULT_MFA_INIT_GRACE_SECONDS: u64 = 30 * 24 * 60 * 60;
const DEFAULT_PASSWORD_MIN_LENGTH: u32 = 8;

/// Opaque session token issued by the identity backend.
///
/// Never printed; only exposed when talking to the backend or writing the cookie.
#[derive(Clone, Default)]
pub struct SessionToken(SecretString);

impl SessionToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken([REDACTED])")
    }
}

impl PartialEq for SessionToken {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl Eq for SessionToken {}

impl Serialize for SessionToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.expose())
    }
}

impl<'de> Deserialize<'de> for SessionToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

/// Browser-held pointer to backend authentication state.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReference {
    pub id: String,
    pub token: SessionToken,
    pub login_name: String,
    pub organization_id: String,
    pub change_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<DateTime<Utc>>,
    /// Last email code dispatch; the backend does not report it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otp_email_sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otp_sms_sent_at: Option<DateTime<Utc>>,
}

impl SessionReference {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        token: SessionToken,
        login_name: impl Into<String>,
        organization_id: impl Into<String>,
        change_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            token,
            login_name: login_name.into(),
            organization_id: organization_id.into(),
            change_date,
            creation_date: None,
            expiration_date: None,
            otp_email_sent_at: None,
            otp_sms_sent_at: None,
        }
    }

    #[must_use]
    pub fn with_expiration_date(mut self, expiration_date: DateTime<Utc>) -> Self {
        self.expiration_date = Some(expiration_date);
        self
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_date.is_some_and(|expires| expires <= now)
    }
}

/// Authentication factor kinds known to the login flow.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FactorKind {
    Password,
    Passkey,
    U2f,
    Totp,
    OtpEmail,
    OtpSms,
    IdentityProvider,
}

/// Contact channel an OTP factor is delivered through.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ContactChannel {
    Email,
    Phone,
}

impl FactorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::Passkey => "passkey",
            Self::U2f => "u2f",
            Self::Totp => "totp",
            Self::OtpEmail => "otp_email",
            Self::OtpSms => "otp_sms",
            Self::IdentityProvider => "identity_provider",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "password" => Some(Self::Password),
            "passkey" => Some(Self::Passkey),
            "u2f" => Some(Self::U2f),
            "totp" => Some(Self::Totp),
            "otp_email" => Some(Self::OtpEmail),
            "otp_sms" => Some(Self::OtpSms),
            "identity_provider" => Some(Self::IdentityProvider),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_second_factor(self) -> bool {
        matches!(self, Self::Totp | Self::U2f | Self::OtpEmail | Self::OtpSms)
    }

    #[must_use]
    pub fn is_multi_factor(self) -> bool {
        matches!(self, Self::Passkey)
    }

    /// Channel that must be verified before the factor can be offered.
    #[must_use]
    pub fn contact_channel(self) -> Option<ContactChannel> {
        match self {
            Self::OtpEmail => Some(ContactChannel::Email),
            Self::OtpSms => Some(ContactChannel::Phone),
            _ => None,
        }
    }

    /// Factors whose challenge is bound to the relying party's origin.
    #[must_use]
    pub fn is_origin_bound(self) -> bool {
        matches!(self, Self::Passkey | Self::U2f)
    }
}

impl fmt::Display for FactorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedFactor {
    pub verified_at: DateTime<Utc>,
}

impl VerifiedFactor {
    #[must_use]
    pub fn at(verified_at: DateTime<Utc>) -> Self {
        Self { verified_at }
    }
}

/// Factors verified so far in one authentication session.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionFactors {
    pub password: Option<VerifiedFactor>,
    pub passkey: Option<VerifiedFactor>,
    pub u2f: Option<VerifiedFactor>,
    pub totp: Option<VerifiedFactor>,
    pub otp_email: Option<VerifiedFactor>,
    pub otp_sms: Option<VerifiedFactor>,
    pub identity_provider_intent: Option<VerifiedFactor>,
}

impl SessionFactors {
    #[must_use]
    pub fn get(&self, kind: FactorKind) -> Option<&VerifiedFactor> {
        match kind {
            FactorKind::Password => self.password.as_ref(),
            FactorKind::Passkey => self.passkey.as_ref(),
            FactorKind::U2f => self.u2f.as_ref(),
            FactorKind::Totp => self.totp.as_ref(),
            FactorKind::OtpEmail => self.otp_email.as_ref(),
            FactorKind::OtpSms => self.otp_sms.as_ref(),
            FactorKind::IdentityProvider => self.identity_provider_intent.as_ref(),
        }
    }

    #[must_use]
    pub fn is_verified(&self, kind: FactorKind) -> bool {
        self.get(kind).is_some()
    }

    /// Password, passkey or an identity provider intent.
    #[must_use]
    pub fn has_primary(&self) -> bool {
        self.password.is_some() || self.passkey.is_some() || self.identity_provider_intent.is_some()
    }

    pub fn set(&mut self, kind: FactorKind, verified: VerifiedFactor) {
        let slot = match kind {
            FactorKind::Password => &mut self.password,
            FactorKind::Passkey => &mut self.passkey,
            FactorKind::U2f => &mut self.u2f,
            FactorKind::Totp => &mut self.totp,
            FactorKind::OtpEmail => &mut self.otp_email,
            FactorKind::OtpSms => &mut self.otp_sms,
            FactorKind::IdentityProvider => &mut self.identity_provider_intent,
        };
        *slot = Some(verified);
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: String,
    pub login_name: String,
    pub organization_id: String,
    #[serde(default)]
    pub display_name: String,
}

/// Challenges the backend has issued for the session and not consumed yet.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PendingChallenges {
    pub web_authn: Option<serde_json::Value>,
    pub otp_email_sent_at: Option<DateTime<Utc>>,
    pub otp_sms_sent_at: Option<DateTime<Utc>>,
}

/// Live session state as reported by the identity backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub id: String,
    pub user: SessionUser,
    #[serde(default)]
    pub factors: SessionFactors,
    #[serde(default)]
    pub pending_challenges: PendingChallenges,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<DateTime<Utc>>,
}

impl SessionState {
    /// Users who signed in through an identity provider are not local users.
    #[must_use]
    pub fn is_local_user(&self) -> bool {
        self.factors.identity_provider_intent.is_none()
    }
}

/// Instance or organization login policy.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoginPolicy {
    pub allow_username_password: bool,
    pub allow_passkey: bool,
    pub allow_register: bool,
    pub required_second_factors: Vec<FactorKind>,
    pub required_multi_factors: Vec<FactorKind>,
    pub force_mfa: bool,
    pub force_mfa_for_local_users_only: bool,
    pub multi_factor_init_grace_seconds: u64,
    pub ignore_unknown_usernames: bool,
    pub default_redirect_uri: Option<String>,
    pub require_email_verification: bool,
}

impl Default for LoginPolicy {
    fn default() -> Self {
        Self {
            allow_username_password: true,
            allow_passkey: true,
            allow_register: false,
            required_second_factors: Vec::new(),
            required_multi_factors: Vec::new(),
            force_mfa: false,
            force_mfa_for_local_users_only: false,
            multi_factor_init_grace_seconds: DEFAULT_MFA_INIT_GRACE_SECONDS,
            ignore_unknown_usernames: false,
            default_redirect_uri: None,
            require_email_verification: false,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct PasswordComplexityPolicy {
    pub min_length: u32,
    pub requires_uppercase: bool,
    pub requires_lowercase: bool,
    pub requires_number: bool,
    pub requires_symbol: bool,
}

impl Default for PasswordComplexityPolicy {
    fn default() -> Self {
        Self {
            min_length: DEFAULT_PASSWORD_MIN_LENGTH,
            requires_uppercase: false,
            requires_lowercase: false,
            requires_number: false,
            requires_symbol: false,
        }
    }
}

/// What the user has registered, independent of the current session.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthenticationMethodInventory {
    pub methods: Vec<FactorKind>,
    pub email_verified: bool,
    pub phone_verified: bool,
    pub registered_at: Option<DateTime<Utc>>,
    pub mfa_init_skipped_at: Option<DateTime<Utc>>,
}

impl AuthenticationMethodInventory {
    #[must_use]
    pub fn has(&self, kind: FactorKind) -> bool {
        self.methods.contains(&kind)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    #[must_use]
    pub fn contact_verified(&self, channel: ContactChannel) -> bool {
        match channel {
            ContactChannel::Email => self.email_verified,
            ContactChannel::Phone => self.phone_verified,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserState {
    Active,
    Inactive,
    Locked,
    Initial,
}

/// Result of a login-name search.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub login_name: String,
    pub organization_id: String,
    pub state: UserState,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAuthorizationRequest {
    pub id: String,
    pub user_code: String,
    pub app_name: String,
    #[serde(default)]
    pub requested_scopes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn factor_kind_round_trips() {
        for kind in [
            FactorKind::Password,
            FactorKind::Passkey,
            FactorKind::U2f,
            FactorKind::Totp,
            FactorKind::OtpEmail,
            FactorKind::OtpSms,
            FactorKind::IdentityProvider,
        ] {
            assert_eq!(FactorKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(FactorKind::parse("sms"), None);
    }

    #[test]
    fn session_token_is_redacted_in_debug() {
        let token = SessionToken::new("very-secret");
        assert_eq!(format!("{token:?}"), "SessionToken([REDACTED])");
        assert_eq!(token.expose(), "very-secret");
    }

    #[test]
    fn session_reference_uses_cookie_encoding() {
        let reference = SessionReference::new(
            "s1",
            SessionToken::new("t1"),
            "a@org",
            "org1",
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        );
        let value = serde_json::to_value(&reference).unwrap();
        assert_eq!(value["id"], "s1");
        assert_eq!(value["token"], "t1");
        assert_eq!(value["loginName"], "a@org");
        assert_eq!(value["organizationId"], "org1");
        assert_eq!(value["changeDate"], "2024-01-01T00:00:00Z");
        assert!(value.get("expirationDate").is_none());

        let parsed: SessionReference = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, reference);
    }

    #[test]
    fn login_policy_defaults_when_fields_missing() {
        let policy: LoginPolicy = serde_json::from_str(r#"{"forceMfa":true}"#).unwrap();
        assert!(policy.force_mfa);
        assert!(policy.allow_username_password);
        assert_eq!(
            policy.multi_factor_init_grace_seconds,
            DEFAULT_MFA_INIT_GRACE_SECONDS
        );
    }

    #[test]
    fn session_factors_set_and_get() {
        let mut factors = SessionFactors::default();
        assert!(!factors.has_primary());
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        factors.set(FactorKind::Totp, VerifiedFactor::at(at));
        assert!(factors.is_verified(FactorKind::Totp));
        assert!(!factors.has_primary());
        factors.set(FactorKind::IdentityProvider, VerifiedFactor::at(at));
        assert!(factors.has_primary());
    }
}
