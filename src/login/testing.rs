//! In-memory [`IdentityBackend`] used by the flow tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use super::{
    backend::{
        BackendError, ChallengeRequest, CreatedSession, IdentityBackend, SessionChecks,
        SessionUpdate, UserCheck,
    },
    request::RequestId,
    types::{
        AuthenticationMethodInventory, DeviceAuthorizationRequest, FactorKind, LoginPolicy,
        PasswordComplexityPolicy, SessionReference, SessionState, SessionToken, SessionUser,
        UserProfile, UserState, VerifiedFactor,
    },
};

pub const VALID_TOTP: &str = "123456";
pub const VALID_OTP: &str = "654321";

#[derive(Clone, Debug)]
pub struct TestUser {
    pub profile: UserProfile,
    pub password: Option<String>,
    pub inventory: AuthenticationMethodInventory,
}

impl TestUser {
    pub fn with_password(id: &str, login_name: &str, org: &str, password: &str) -> Self {
        Self {
            profile: UserProfile {
                id: id.to_string(),
                login_name: login_name.to_string(),
                organization_id: org.to_string(),
                state: UserState::Active,
            },
            password: Some(password.to_string()),
            inventory: AuthenticationMethodInventory {
                methods: vec![FactorKind::Password],
                email_verified: true,
                phone_verified: true,
                ..Default::default()
            },
        }
    }

    pub fn with_methods(mut self, methods: &[FactorKind]) -> Self {
        self.inventory.methods = methods.to_vec();
        self
    }

    pub fn with_state(mut self, state: UserState) -> Self {
        self.profile.state = state;
        self
    }

    pub fn with_email_verified(mut self, verified: bool) -> Self {
        self.inventory.email_verified = verified;
        self
    }
}

struct FakeSession {
    token: String,
    state: SessionState,
}

#[derive(Default)]
struct FakeState {
    users: Vec<TestUser>,
    sessions: HashMap<String, FakeSession>,
    policy: LoginPolicy,
    complexity: PasswordComplexityPolicy,
    devices: HashMap<String, DeviceAuthorizationRequest>,
    completed_devices: HashSet<String>,
    device_completions: usize,
    web_authn_options: Option<serde_json::Value>,
    unavailable: bool,
    max_attempts: Option<u32>,
    failed_attempts: u32,
    challenges: Vec<ChallengeRequest>,
    skipped_mfa: Vec<String>,
    deleted: Vec<String>,
    next_id: u32,
}

impl FakeState {
    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn check_available(&self) -> Result<(), BackendError> {
        if self.unavailable {
            Err(BackendError::Unavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }

    fn session_mut(
        &mut self,
        session_id: &str,
        token: &SessionToken,
    ) -> Result<&mut FakeSession, BackendError> {
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or(BackendError::NotFound)?;
        if session.token != token.expose() {
            return Err(BackendError::Unauthenticated);
        }
        Ok(session)
    }

    fn user(&self, user_id: &str) -> Result<&TestUser, BackendError> {
        self.users
            .iter()
            .find(|user| user.profile.id == user_id)
            .ok_or(BackendError::NotFound)
    }

    fn fail_attempt(&mut self) -> BackendError {
        self.failed_attempts += 1;
        match self.max_attempts {
            Some(max) if self.failed_attempts >= max => BackendError::Locked,
            _ => BackendError::InvalidCredentials,
        }
    }
}

pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                web_authn_options: Some(json!({
                    "publicKey": {"challenge": "Y2hhbGxlbmdl", "timeout": 60000}
                })),
                ..FakeState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn add_user(&self, user: TestUser) {
        self.lock().users.push(user);
    }

    pub fn set_policy(&self, policy: LoginPolicy) {
        self.lock().policy = policy;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    pub fn set_max_attempts(&self, max_attempts: u32) {
        self.lock().max_attempts = Some(max_attempts);
    }

    pub fn set_web_authn_options(&self, options: Option<serde_json::Value>) {
        self.lock().web_authn_options = options;
    }

    pub fn add_device_request(&self, request: DeviceAuthorizationRequest) {
        self.lock()
            .devices
            .insert(request.user_code.clone(), request);
    }

    pub fn device_completions(&self) -> usize {
        self.lock().device_completions
    }

    pub fn challenges(&self) -> Vec<ChallengeRequest> {
        self.lock().challenges.clone()
    }

    pub fn skipped_mfa(&self) -> Vec<String> {
        self.lock().skipped_mfa.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.lock().deleted.clone()
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Create a backend session for `user_id` and return its reference.
    pub fn open_session(&self, user_id: &str) -> SessionReference {
        let mut state = self.lock();
        let id = state.next_id();
        let user = state
            .users
            .iter()
            .find(|user| user.profile.id == user_id)
            .map(|user| user.profile.clone())
            .unwrap_or_else(|| panic!("unknown test user {user_id}"));
        let session_id = format!("session-{id}");
        let token = format!("token-{id}");
        state.sessions.insert(
            session_id.clone(),
            FakeSession {
                token: token.clone(),
                state: session_state(&session_id, &user),
            },
        );
        SessionReference::new(
            session_id,
            SessionToken::new(token),
            user.login_name,
            user.organization_id,
            Utc::now(),
        )
    }

    pub fn verify_factor(&self, session_id: &str, factor: FactorKind) {
        if let Some(session) = self.lock().sessions.get_mut(session_id) {
            session
                .state
                .factors
                .set(factor, VerifiedFactor::at(Utc::now()));
        }
    }

    pub fn mark_otp_sent(&self, session_id: &str, factor: FactorKind, at: DateTime<Utc>) {
        if let Some(session) = self.lock().sessions.get_mut(session_id) {
            let pending = &mut session.state.pending_challenges;
            match factor {
                FactorKind::OtpSms => pending.otp_sms_sent_at = Some(at),
                _ => pending.otp_email_sent_at = Some(at),
            }
        }
    }

    pub fn forget_session(&self, session_id: &str) {
        self.lock().sessions.remove(session_id);
    }

    pub fn expire_session(&self, session_id: &str, at: DateTime<Utc>) {
        if let Some(session) = self.lock().sessions.get_mut(session_id) {
            session.state.expiration_date = Some(at);
        }
    }
}

fn session_state(session_id: &str, user: &UserProfile) -> SessionState {
    SessionState {
        id: session_id.to_string(),
        user: SessionUser {
            id: user.id.clone(),
            login_name: user.login_name.clone(),
            organization_id: user.organization_id.clone(),
            display_name: user.login_name.clone(),
        },
        factors: Default::default(),
        pending_challenges: Default::default(),
        expiration_date: None,
    }
}

fn matches_code(submitted: Option<&SecretString>, valid: &str) -> Option<bool> {
    submitted.map(|code| code.expose_secret() == valid)
}

#[async_trait]
impl IdentityBackend for FakeBackend {
    async fn create_session(
        &self,
        checks: &SessionChecks,
        _lifetime: Duration,
    ) -> Result<CreatedSession, BackendError> {
        let mut state = self.lock();
        state.check_available()?;
        let user = match &checks.user {
            Some(UserCheck::UserId(id)) => state.user(id)?.profile.clone(),
            Some(UserCheck::LoginName(name)) => state
                .users
                .iter()
                .find(|user| &user.profile.login_name == name)
                .map(|user| user.profile.clone())
                .ok_or(BackendError::NotFound)?,
            None => return Err(BackendError::FailedPrecondition("user check missing".into())),
        };
        let id = state.next_id();
        let session_id = format!("session-{id}");
        let token = format!("token-{id}");
        state.sessions.insert(
            session_id.clone(),
            FakeSession {
                token: token.clone(),
                state: session_state(&session_id, &user),
            },
        );
        Ok(CreatedSession {
            id: session_id,
            token: SessionToken::new(token),
            change_date: Utc::now(),
        })
    }

    async fn get_session(
        &self,
        session_id: &str,
        token: &SessionToken,
    ) -> Result<SessionState, BackendError> {
        let mut state = self.lock();
        state.check_available()?;
        Ok(state.session_mut(session_id, token)?.state.clone())
    }

    async fn list_sessions(&self, ids: &[String]) -> Result<Vec<SessionState>, BackendError> {
        let state = self.lock();
        state.check_available()?;
        Ok(ids
            .iter()
            .filter_map(|id| state.sessions.get(id).map(|session| session.state.clone()))
            .collect())
    }

    async fn set_session(
        &self,
        session_id: &str,
        token: &SessionToken,
        checks: &SessionChecks,
        challenge: Option<&ChallengeRequest>,
    ) -> Result<SessionUpdate, BackendError> {
        let mut state = self.lock();
        state.check_available()?;
        let user_id = state.session_mut(session_id, token)?.state.user.id.clone();
        let password = state.user(&user_id)?.password.clone();

        let mut verified = Vec::new();
        if let Some(submitted) = &checks.password {
            if password.as_deref() != Some(submitted.expose_secret()) {
                return Err(state.fail_attempt());
            }
            verified.push(FactorKind::Password);
        }
        for (factor, submitted, valid) in [
            (FactorKind::Totp, checks.totp.as_ref(), VALID_TOTP),
            (FactorKind::OtpEmail, checks.otp_email.as_ref(), VALID_OTP),
            (FactorKind::OtpSms, checks.otp_sms.as_ref(), VALID_OTP),
        ] {
            match matches_code(submitted, valid) {
                Some(true) => verified.push(factor),
                Some(false) => return Err(state.fail_attempt()),
                None => {}
            }
        }
        if let Some(credential) = &checks.web_authn {
            let factor = if credential["factor"] == "u2f" {
                FactorKind::U2f
            } else {
                FactorKind::Passkey
            };
            verified.push(factor);
        }

        let web_authn = match challenge {
            Some(ChallengeRequest::WebAuthn { .. }) => state.web_authn_options.clone(),
            _ => None,
        };
        if let Some(challenge) = challenge {
            state.challenges.push(challenge.clone());
        }

        let id = state.next_id();
        let now = Utc::now();
        let session = state.session_mut(session_id, token)?;
        for factor in verified {
            session.state.factors.set(factor, VerifiedFactor::at(now));
        }
        match challenge {
            Some(ChallengeRequest::OtpEmail) => {
                session.state.pending_challenges.otp_email_sent_at = Some(now);
            }
            Some(ChallengeRequest::OtpSms) => {
                session.state.pending_challenges.otp_sms_sent_at = Some(now);
            }
            _ => {}
        }
        session.token = format!("token-{id}");
        Ok(SessionUpdate {
            token: SessionToken::new(session.token.clone()),
            change_date: now,
            web_authn,
        })
    }

    async fn delete_session(
        &self,
        session_id: &str,
        token: &SessionToken,
    ) -> Result<(), BackendError> {
        let mut state = self.lock();
        state.check_available()?;
        state.session_mut(session_id, token)?;
        state.sessions.remove(session_id);
        state.deleted.push(session_id.to_string());
        Ok(())
    }

    async fn search_user(
        &self,
        login_name: &str,
        organization_id: Option<&str>,
    ) -> Result<Option<UserProfile>, BackendError> {
        let state = self.lock();
        state.check_available()?;
        Ok(state
            .users
            .iter()
            .find(|user| {
                user.profile.login_name == login_name
                    && organization_id.is_none_or(|org| org == user.profile.organization_id)
            })
            .map(|user| user.profile.clone()))
    }

    async fn list_authentication_methods(
        &self,
        user_id: &str,
    ) -> Result<AuthenticationMethodInventory, BackendError> {
        let state = self.lock();
        state.check_available()?;
        Ok(state.user(user_id)?.inventory.clone())
    }

    async fn get_login_policy(
        &self,
        _organization_id: Option<&str>,
    ) -> Result<LoginPolicy, BackendError> {
        let state = self.lock();
        state.check_available()?;
        Ok(state.policy.clone())
    }

    async fn get_password_complexity(
        &self,
        _organization_id: Option<&str>,
    ) -> Result<PasswordComplexityPolicy, BackendError> {
        let state = self.lock();
        state.check_available()?;
        Ok(state.complexity.clone())
    }

    async fn skip_mfa_init(&self, user_id: &str) -> Result<(), BackendError> {
        let mut state = self.lock();
        state.check_available()?;
        let now = Utc::now();
        let user = state
            .users
            .iter_mut()
            .find(|user| user.profile.id == user_id)
            .ok_or(BackendError::NotFound)?;
        user.inventory.mfa_init_skipped_at = Some(now);
        state.skipped_mfa.push(user_id.to_string());
        Ok(())
    }

    async fn get_device_authorization(
        &self,
        user_code: &str,
    ) -> Result<DeviceAuthorizationRequest, BackendError> {
        let state = self.lock();
        state.check_available()?;
        state
            .devices
            .get(user_code)
            .cloned()
            .ok_or(BackendError::NotFound)
    }

    async fn complete_device_authorization(
        &self,
        device_request_id: &str,
        session_id: &str,
        token: &SessionToken,
    ) -> Result<(), BackendError> {
        let mut state = self.lock();
        state.check_available()?;
        state.session_mut(session_id, token)?;
        if !state.completed_devices.insert(device_request_id.to_string()) {
            return Err(BackendError::AlreadyCompleted);
        }
        state.device_completions += 1;
        Ok(())
    }

    async fn create_callback(
        &self,
        request_id: &RequestId,
        session_id: &str,
        token: &SessionToken,
    ) -> Result<String, BackendError> {
        let mut state = self.lock();
        state.check_available()?;
        state.session_mut(session_id, token)?;
        Ok(format!(
            "https://app.example.com/callback?request={}",
            request_id.id()
        ))
    }
}
