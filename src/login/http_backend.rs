//! [`IdentityBackend`] over the identity platform's v2 JSON API.
//!
//! Every call carries the service account token as a bearer credential.
//! Error bodies follow the gateway shape `{"code": <grpc code>, "message": ..}`;
//! the code decides the [`BackendError`] variant and the HTTP status is only
//! consulted when the body carries none.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, de::IgnoredAny, Deserialize};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use super::{
    backend::{
        BackendError, ChallengeRequest, CreatedSession, IdentityBackend, SessionChecks,
        SessionUpdate, UserCheck,
    },
    request::{RequestId, RequestKind},
    types::{
        AuthenticationMethodInventory, DeviceAuthorizationRequest, FactorKind, LoginPolicy,
        PasswordComplexityPolicy, SessionFactors, SessionState, SessionToken, SessionUser,
        UserProfile, UserState, VerifiedFactor,
    },
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct HttpBackendConfig {
    base_url: Url,
    token: SecretString,
    timeout: Duration,
}

impl HttpBackendConfig {
    #[must_use]
    pub fn new(base_url: Url, token: SecretString) -> Self {
        Self {
            base_url,
            token,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

pub struct HttpIdentityBackend {
    client: Client,
    base_url: String,
    token: SecretString,
}

impl HttpIdentityBackend {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &HttpBackendConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.as_str().trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        self.client
            .request(method, url)
            .bearer_auth(self.token.expose_secret())
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, BackendError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            let json: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
            let err = error_from_response(status, &json);
            debug!(%status, "backend call failed: {err}");
            return Err(err);
        }
        let body: &[u8] = if body.is_empty() { b"null" } else { &body };
        serde_json::from_slice(body).map_err(|err| BackendError::InvalidResponse(err.to_string()))
    }

    async fn user(&self, user_id: &str) -> Result<UserWire, BackendError> {
        let response: GetUserResponse = self
            .send(self.request(Method::GET, &format!("v2/users/{user_id}")))
            .await?;
        let mut user = response.user;
        if user.details.is_none() {
            user.details = response.details;
        }
        Ok(user)
    }
}

/// Map a gateway error body onto [`BackendError`].
fn error_from_response(status: StatusCode, body: &Value) -> BackendError {
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    match body.get("code").and_then(Value::as_u64) {
        Some(3) => BackendError::InvalidCredentials,
        Some(5) => BackendError::NotFound,
        Some(6) => BackendError::AlreadyCompleted,
        Some(7 | 16) => BackendError::Unauthenticated,
        Some(8) => BackendError::Locked,
        Some(9) => {
            let lower = message.to_lowercase();
            if lower.contains("locked") {
                BackendError::Locked
            } else if lower.contains("already") {
                BackendError::AlreadyCompleted
            } else {
                BackendError::FailedPrecondition(message)
            }
        }
        Some(4 | 14) => BackendError::Unavailable(message),
        _ => match status {
            StatusCode::NOT_FOUND => BackendError::NotFound,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Unauthenticated,
            StatusCode::BAD_REQUEST => BackendError::InvalidCredentials,
            StatusCode::CONFLICT => BackendError::AlreadyCompleted,
            StatusCode::PRECONDITION_FAILED => BackendError::FailedPrecondition(message),
            StatusCode::TOO_MANY_REQUESTS => BackendError::Locked,
            status => BackendError::Unavailable(format!("{status} {message}").trim().to_string()),
        },
    }
}

fn checks_body(checks: &SessionChecks) -> Value {
    let mut body = Map::new();
    match &checks.user {
        Some(UserCheck::UserId(id)) => {
            body.insert("user".into(), json!({"userId": id}));
        }
        Some(UserCheck::LoginName(name)) => {
            body.insert("user".into(), json!({"loginName": name}));
        }
        None => {}
    }
    if let Some(password) = &checks.password {
        body.insert(
            "password".into(),
            json!({"password": password.expose_secret()}),
        );
    }
    if let Some(credential) = &checks.web_authn {
        body.insert(
            "webAuthN".into(),
            json!({"credentialAssertionData": credential}),
        );
    }
    for (key, code) in [
        ("totp", &checks.totp),
        ("otpEmail", &checks.otp_email),
        ("otpSms", &checks.otp_sms),
    ] {
        if let Some(code) = code {
            body.insert(key.into(), json!({"code": code.expose_secret()}));
        }
    }
    if let Some(intent) = &checks.intent {
        body.insert(
            "idpIntent".into(),
            json!({
                "idpIntentId": intent.intent_id,
                "idpIntentToken": intent.intent_token.expose_secret(),
            }),
        );
    }
    Value::Object(body)
}

fn challenges_body(challenge: &ChallengeRequest) -> Value {
    match challenge {
        ChallengeRequest::WebAuthn {
            domain,
            user_verification,
        } => json!({"webAuthN": {
            "domain": domain,
            "userVerificationRequirement": user_verification.as_str(),
        }}),
        ChallengeRequest::OtpEmail => json!({"otpEmail": {}}),
        ChallengeRequest::OtpSms => json!({"otpSms": {}}),
    }
}

fn session_binding(session_id: &str, token: &SessionToken) -> Value {
    json!({"session": {"sessionId": session_id, "sessionToken": token.expose()}})
}

/// Protobuf JSON durations look like `"2592000s"`.
fn duration_seconds(value: &str) -> Option<u64> {
    let seconds: f64 = value.trim().strip_suffix('s')?.parse().ok()?;
    (seconds.is_finite() && seconds >= 0.0).then(|| seconds as u64)
}

/// Protobuf JSON encodes 64-bit integers as strings.
fn integer(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|text| text.parse().ok()))
}

fn auth_method(value: &str) -> Option<FactorKind> {
    match value {
        "AUTHENTICATION_METHOD_TYPE_PASSWORD" => Some(FactorKind::Password),
        "AUTHENTICATION_METHOD_TYPE_PASSKEY" => Some(FactorKind::Passkey),
        "AUTHENTICATION_METHOD_TYPE_IDP" => Some(FactorKind::IdentityProvider),
        "AUTHENTICATION_METHOD_TYPE_TOTP" => Some(FactorKind::Totp),
        "AUTHENTICATION_METHOD_TYPE_U2F" => Some(FactorKind::U2f),
        "AUTHENTICATION_METHOD_TYPE_OTP_SMS" => Some(FactorKind::OtpSms),
        "AUTHENTICATION_METHOD_TYPE_OTP_EMAIL" => Some(FactorKind::OtpEmail),
        _ => None,
    }
}

fn second_factor(value: &str) -> Option<FactorKind> {
    match value {
        "SECOND_FACTOR_TYPE_OTP" => Some(FactorKind::Totp),
        "SECOND_FACTOR_TYPE_U2F" => Some(FactorKind::U2f),
        "SECOND_FACTOR_TYPE_OTP_EMAIL" => Some(FactorKind::OtpEmail),
        "SECOND_FACTOR_TYPE_OTP_SMS" => Some(FactorKind::OtpSms),
        _ => None,
    }
}

fn multi_factor(value: &str) -> Option<FactorKind> {
    match value {
        "MULTI_FACTOR_TYPE_U2F_WITH_VERIFICATION" => Some(FactorKind::Passkey),
        _ => None,
    }
}

fn user_state(value: &str) -> UserState {
    match value {
        "USER_STATE_INACTIVE" => UserState::Inactive,
        "USER_STATE_LOCKED" => UserState::Locked,
        "USER_STATE_INITIAL" => UserState::Initial,
        _ => UserState::Active,
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetailsWire {
    change_date: Option<DateTime<Utc>>,
    creation_date: Option<DateTime<Utc>>,
    resource_owner: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionResponse {
    session_id: String,
    session_token: String,
    #[serde(default)]
    details: Option<DetailsWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetSessionResponse {
    session_token: String,
    #[serde(default)]
    details: Option<DetailsWire>,
    #[serde(default)]
    challenges: Option<ChallengesWire>,
}

#[derive(Debug, Deserialize)]
struct ChallengesWire {
    #[serde(rename = "webAuthN", default)]
    web_authn: Option<WebAuthnChallengeWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebAuthnChallengeWire {
    public_key_credential_request_options: Value,
}

#[derive(Debug, Deserialize)]
struct GetSessionResponse {
    session: SessionWire,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListSessionsResponse {
    #[serde(default)]
    sessions: Vec<SessionWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionWire {
    id: String,
    #[serde(default)]
    factors: FactorsWire,
    expiration_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FactorsWire {
    user: Option<UserFactorWire>,
    password: Option<VerifiedWire>,
    #[serde(rename = "webAuthN")]
    web_authn: Option<WebAuthnFactorWire>,
    totp: Option<VerifiedWire>,
    otp_email: Option<VerifiedWire>,
    otp_sms: Option<VerifiedWire>,
    intent: Option<VerifiedWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserFactorWire {
    id: String,
    #[serde(default)]
    login_name: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    organization_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifiedWire {
    verified_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebAuthnFactorWire {
    verified_at: DateTime<Utc>,
    #[serde(default)]
    user_verified: bool,
}

impl SessionWire {
    fn into_state(self) -> Result<SessionState, BackendError> {
        let FactorsWire {
            user,
            password,
            web_authn,
            totp,
            otp_email,
            otp_sms,
            intent,
        } = self.factors;
        let user = user.ok_or_else(|| {
            BackendError::InvalidResponse(format!("session {} has no user factor", self.id))
        })?;
        let verified =
            |wire: Option<VerifiedWire>| wire.map(|wire| VerifiedFactor::at(wire.verified_at));

        let mut factors = SessionFactors {
            password: verified(password),
            totp: verified(totp),
            otp_email: verified(otp_email),
            otp_sms: verified(otp_sms),
            identity_provider_intent: verified(intent),
            ..SessionFactors::default()
        };
        if let Some(web_authn) = web_authn {
            // User verification during the assertion distinguishes a passkey from U2F.
            let kind = if web_authn.user_verified {
                FactorKind::Passkey
            } else {
                FactorKind::U2f
            };
            factors.set(kind, VerifiedFactor::at(web_authn.verified_at));
        }

        Ok(SessionState {
            id: self.id,
            user: SessionUser {
                id: user.id,
                login_name: user.login_name,
                organization_id: user.organization_id,
                display_name: user.display_name,
            },
            factors,
            pending_challenges: Default::default(),
            expiration_date: self.expiration_date,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListUsersResponse {
    #[serde(default)]
    result: Vec<UserWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetUserResponse {
    #[serde(default)]
    details: Option<DetailsWire>,
    user: UserWire,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserWire {
    user_id: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    preferred_login_name: Option<String>,
    #[serde(default)]
    login_names: Vec<String>,
    #[serde(default)]
    details: Option<DetailsWire>,
    #[serde(default)]
    human: Option<HumanWire>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HumanWire {
    #[serde(default)]
    email: Option<ContactWire>,
    #[serde(default)]
    phone: Option<ContactWire>,
    #[serde(default)]
    mfa_init_skipped: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContactWire {
    #[serde(default)]
    is_verified: bool,
}

impl UserWire {
    fn into_profile(self, fallback_login_name: &str) -> UserProfile {
        let login_name = self
            .preferred_login_name
            .or_else(|| self.login_names.into_iter().next())
            .unwrap_or_else(|| fallback_login_name.to_string());
        UserProfile {
            id: self.user_id,
            login_name,
            organization_id: self
                .details
                .and_then(|details| details.resource_owner)
                .unwrap_or_default(),
            state: user_state(&self.state),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthMethodsResponse {
    #[serde(default)]
    auth_method_types: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SettingsResponse<T> {
    settings: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginSettingsWire {
    #[serde(default)]
    allow_username_password: bool,
    #[serde(default)]
    allow_register: bool,
    #[serde(default)]
    passkeys_type: String,
    #[serde(default)]
    second_factors: Vec<String>,
    #[serde(default)]
    multi_factors: Vec<String>,
    #[serde(default)]
    force_mfa: bool,
    #[serde(default)]
    force_mfa_local_only: bool,
    #[serde(default)]
    mfa_init_skip_lifetime: Option<String>,
    #[serde(default)]
    ignore_unknown_usernames: bool,
    #[serde(default)]
    default_redirect_uri: Option<String>,
}

impl From<LoginSettingsWire> for LoginPolicy {
    fn from(wire: LoginSettingsWire) -> Self {
        let defaults = Self::default();
        Self {
            allow_username_password: wire.allow_username_password,
            allow_passkey: wire.passkeys_type == "PASSKEYS_TYPE_ALLOWED",
            allow_register: wire.allow_register,
            required_second_factors: wire
                .second_factors
                .iter()
                .filter_map(|factor| second_factor(factor))
                .collect(),
            required_multi_factors: wire
                .multi_factors
                .iter()
                .filter_map(|factor| multi_factor(factor))
                .collect(),
            force_mfa: wire.force_mfa,
            force_mfa_for_local_users_only: wire.force_mfa_local_only,
            multi_factor_init_grace_seconds: wire
                .mfa_init_skip_lifetime
                .as_deref()
                .and_then(duration_seconds)
                .unwrap_or(defaults.multi_factor_init_grace_seconds),
            ignore_unknown_usernames: wire.ignore_unknown_usernames,
            default_redirect_uri: wire.default_redirect_uri.filter(|uri| !uri.is_empty()),
            require_email_verification: defaults.require_email_verification,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComplexityWire {
    #[serde(default)]
    min_length: Value,
    #[serde(default)]
    requires_uppercase: bool,
    #[serde(default)]
    requires_lowercase: bool,
    #[serde(default)]
    requires_number: bool,
    #[serde(default)]
    requires_symbol: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceAuthorizationResponse {
    device_authorization_request: DeviceAuthorizationWire,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceAuthorizationWire {
    id: String,
    #[serde(default)]
    app_name: String,
    #[serde(default)]
    scope: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallbackResponse {
    #[serde(alias = "url")]
    callback_url: String,
}

fn settings_query(organization_id: Option<&str>) -> Vec<(&'static str, String)> {
    match organization_id {
        Some(org) => vec![("ctx.orgId", org.to_string())],
        None => vec![("ctx.instance", "true".to_string())],
    }
}

#[async_trait]
impl IdentityBackend for HttpIdentityBackend {
    #[instrument(skip_all)]
    async fn create_session(
        &self,
        checks: &SessionChecks,
        lifetime: Duration,
    ) -> Result<CreatedSession, BackendError> {
        let body = json!({
            "checks": checks_body(checks),
            "lifetime": format!("{}s", lifetime.as_secs()),
        });
        let response: CreateSessionResponse = self
            .send(self.request(Method::POST, "v2/sessions").json(&body))
            .await?;
        Ok(CreatedSession {
            id: response.session_id,
            token: SessionToken::new(response.session_token),
            change_date: response
                .details
                .and_then(|details| details.change_date)
                .unwrap_or_else(Utc::now),
        })
    }

    #[instrument(skip(self, token))]
    async fn get_session(
        &self,
        session_id: &str,
        token: &SessionToken,
    ) -> Result<SessionState, BackendError> {
        let response: GetSessionResponse = self
            .send(
                self.request(Method::GET, &format!("v2/sessions/{session_id}"))
                    .query(&[("sessionToken", token.expose())]),
            )
            .await?;
        response.session.into_state()
    }

    #[instrument(skip_all, fields(count = ids.len()))]
    async fn list_sessions(&self, ids: &[String]) -> Result<Vec<SessionState>, BackendError> {
        let body = json!({"queries": [{"idsQuery": {"ids": ids}}]});
        let response: ListSessionsResponse = self
            .send(self.request(Method::POST, "v2/sessions/search").json(&body))
            .await?;
        response
            .sessions
            .into_iter()
            .map(SessionWire::into_state)
            .collect()
    }

    #[instrument(skip(self, token, checks, challenge))]
    async fn set_session(
        &self,
        session_id: &str,
        token: &SessionToken,
        checks: &SessionChecks,
        challenge: Option<&ChallengeRequest>,
    ) -> Result<SessionUpdate, BackendError> {
        let mut body = json!({
            "sessionToken": token.expose(),
            "checks": checks_body(checks),
        });
        if let Some(challenge) = challenge {
            body["challenges"] = challenges_body(challenge);
        }
        let response: SetSessionResponse = self
            .send(
                self.request(Method::PATCH, &format!("v2/sessions/{session_id}"))
                    .json(&body),
            )
            .await?;
        Ok(SessionUpdate {
            token: SessionToken::new(response.session_token),
            change_date: response
                .details
                .and_then(|details| details.change_date)
                .unwrap_or_else(Utc::now),
            web_authn: response
                .challenges
                .and_then(|challenges| challenges.web_authn)
                .map(|web_authn| web_authn.public_key_credential_request_options),
        })
    }

    #[instrument(skip(self, token))]
    async fn delete_session(
        &self,
        session_id: &str,
        token: &SessionToken,
    ) -> Result<(), BackendError> {
        let _: IgnoredAny = self
            .send(
                self.request(Method::DELETE, &format!("v2/sessions/{session_id}"))
                    .json(&json!({"sessionToken": token.expose()})),
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn search_user(
        &self,
        login_name: &str,
        organization_id: Option<&str>,
    ) -> Result<Option<UserProfile>, BackendError> {
        let mut queries = vec![json!({"loginNameQuery": {
            "loginName": login_name,
            "method": "TEXT_QUERY_METHOD_EQUALS",
        }})];
        if let Some(org) = organization_id {
            queries.push(json!({"organizationIdQuery": {"organizationId": org}}));
        }
        let response: ListUsersResponse = self
            .send(
                self.request(Method::POST, "v2/users")
                    .json(&json!({"queries": queries})),
            )
            .await?;
        let mut users = response.result.into_iter();
        match (users.next(), users.next()) {
            (Some(user), None) => Ok(Some(user.into_profile(login_name))),
            (None, _) => Ok(None),
            (Some(_), Some(_)) => Err(BackendError::FailedPrecondition(
                "login name matches more than one user".to_string(),
            )),
        }
    }

    #[instrument(skip(self))]
    async fn list_authentication_methods(
        &self,
        user_id: &str,
    ) -> Result<AuthenticationMethodInventory, BackendError> {
        let (methods, user) = tokio::try_join!(
            self.send::<AuthMethodsResponse>(self.request(
                Method::GET,
                &format!("v2/users/{user_id}/authentication_methods"),
            )),
            self.user(user_id)
        )?;
        let human = user.human.unwrap_or_default();
        Ok(AuthenticationMethodInventory {
            methods: methods
                .auth_method_types
                .iter()
                .filter_map(|method| auth_method(method))
                .collect(),
            email_verified: human.email.is_some_and(|email| email.is_verified),
            phone_verified: human.phone.is_some_and(|phone| phone.is_verified),
            registered_at: user.details.and_then(|details| details.creation_date),
            mfa_init_skipped_at: human.mfa_init_skipped,
        })
    }

    #[instrument(skip(self))]
    async fn get_login_policy(
        &self,
        organization_id: Option<&str>,
    ) -> Result<LoginPolicy, BackendError> {
        let response: SettingsResponse<LoginSettingsWire> = self
            .send(
                self.request(Method::GET, "v2/settings/login")
                    .query(&settings_query(organization_id)),
            )
            .await?;
        Ok(response.settings.into())
    }

    #[instrument(skip(self))]
    async fn get_password_complexity(
        &self,
        organization_id: Option<&str>,
    ) -> Result<PasswordComplexityPolicy, BackendError> {
        let response: SettingsResponse<ComplexityWire> = self
            .send(
                self.request(Method::GET, "v2/settings/password/complexity")
                    .query(&settings_query(organization_id)),
            )
            .await?;
        let wire = response.settings;
        let defaults = PasswordComplexityPolicy::default();
        Ok(PasswordComplexityPolicy {
            min_length: integer(&wire.min_length)
                .and_then(|length| u32::try_from(length).ok())
                .unwrap_or(defaults.min_length),
            requires_uppercase: wire.requires_uppercase,
            requires_lowercase: wire.requires_lowercase,
            requires_number: wire.requires_number,
            requires_symbol: wire.requires_symbol,
        })
    }

    #[instrument(skip(self))]
    async fn skip_mfa_init(&self, user_id: &str) -> Result<(), BackendError> {
        let _: IgnoredAny = self
            .send(
                self.request(Method::POST, &format!("v2/users/{user_id}/mfa_init_skipped"))
                    .json(&json!({})),
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_device_authorization(
        &self,
        user_code: &str,
    ) -> Result<DeviceAuthorizationRequest, BackendError> {
        let response: DeviceAuthorizationResponse = self
            .send(self.request(
                Method::GET,
                &format!("v2/oidc/device_authorization/{user_code}"),
            ))
            .await?;
        let wire = response.device_authorization_request;
        Ok(DeviceAuthorizationRequest {
            id: wire.id,
            user_code: user_code.to_string(),
            app_name: wire.app_name,
            requested_scopes: wire.scope,
        })
    }

    #[instrument(skip(self, token))]
    async fn complete_device_authorization(
        &self,
        device_request_id: &str,
        session_id: &str,
        token: &SessionToken,
    ) -> Result<(), BackendError> {
        let _: IgnoredAny = self
            .send(
                self.request(
                    Method::POST,
                    &format!("v2/oidc/device_authorization/{device_request_id}"),
                )
                .json(&session_binding(session_id, token)),
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self, token), fields(request_id = %request_id))]
    async fn create_callback(
        &self,
        request_id: &RequestId,
        session_id: &str,
        token: &SessionToken,
    ) -> Result<String, BackendError> {
        let path = match request_id.kind() {
            RequestKind::Oidc => format!("v2/oidc/auth_requests/{}", request_id.id()),
            RequestKind::Saml => format!("v2/saml/saml_requests/{}", request_id.id()),
            RequestKind::Device => {
                return Err(BackendError::FailedPrecondition(
                    "device requests complete through device authorization".to_string(),
                ));
            }
        };
        let response: CallbackResponse = self
            .send(
                self.request(Method::POST, &path)
                    .json(&session_binding(session_id, token)),
            )
            .await?;
        Ok(response.callback_url)
    }
}
