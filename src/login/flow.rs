//! Login orchestration for one request.
//!
//! Flow Overview:
//! - `next` resolves the request's session and returns the page to render.
//! - `verify` submits a credential and re-renders the resulting step.
//! - `skip_setup` records a skipped MFA setup prompt.
//! - `confirm_device` links an authenticated session to a device request.
//! - `logout` deletes the session and its browser reference.
//!
//! Recoverable failures re-render the same step with an attached error;
//! terminal failures replace the step with an error step.

use chrono::Duration as ChronoDuration;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;

use super::{
    backend::{IdentityBackend, SessionChecks, UserCheck},
    challenge::{ChallengeBuilder, ChallengeContext, ChallengeParams, OtpResendPolicy},
    device::{DeviceAuthorizationLinker, DeviceSessionBinding},
    error::{FlowError, StepError},
    request::{RequestContext, RequestId},
    resolver::SessionResolver,
    router::{Completion, RouteInput, Step, StepRouter},
    store::{SessionCookieStore, SessionFilter},
    types::{
        AuthenticationMethodInventory, FactorKind, LoginPolicy, SessionReference, SessionState,
        UserState,
    },
};

const DEFAULT_SESSION_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_REGISTRATION_IDLE: Duration = Duration::from_secs(60 * 60);

#[derive(Clone, Copy, Debug)]
pub struct LoginConfig {
    session_lifetime: Duration,
    registration_idle: Duration,
    otp_resend: OtpResendPolicy,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            session_lifetime: DEFAULT_SESSION_LIFETIME,
            registration_idle: DEFAULT_REGISTRATION_IDLE,
            otp_resend: OtpResendPolicy::default(),
        }
    }
}

impl LoginConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_session_lifetime(mut self, session_lifetime: Duration) -> Self {
        self.session_lifetime = session_lifetime;
        self
    }

    /// References written by invitation or registration flows expire after this idle period.
    #[must_use]
    pub fn with_registration_idle(mut self, registration_idle: Duration) -> Self {
        self.registration_idle = registration_idle;
        self
    }

    #[must_use]
    pub fn with_otp_resend(mut self, otp_resend: OtpResendPolicy) -> Self {
        self.otp_resend = otp_resend;
        self
    }

    #[must_use]
    pub fn session_lifetime(&self) -> Duration {
        self.session_lifetime
    }

    #[must_use]
    pub fn registration_idle(&self) -> Duration {
        self.registration_idle
    }

    #[must_use]
    pub fn otp_resend(&self) -> OtpResendPolicy {
        self.otp_resend
    }
}

/// Everything the front end needs to render one step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginPage {
    pub step: Step,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge: Option<ChallengeParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl LoginPage {
    #[must_use]
    pub fn new(step: Step) -> Self {
        Self {
            step,
            challenge: None,
            error: None,
            session_id: None,
        }
    }

    #[must_use]
    pub fn failed(step: Step, err: &FlowError) -> Self {
        let mut page = Self::new(step);
        page.fail(err);
        page
    }

    /// Error page for a failure that leaves no step to render. Non-terminal
    /// errors let the user retry the same action.
    #[must_use]
    pub fn unavailable(err: &FlowError) -> Self {
        let mut page = Self::new(Step::error(err));
        if !err.is_terminal() {
            page.error = Some(StepError::from(err));
        }
        page
    }

    /// Attach `err`; terminal errors replace the step.
    pub fn fail(&mut self, err: &FlowError) {
        if err.is_terminal() {
            self.step = Step::error(err);
            self.challenge = None;
            self.error = None;
        } else {
            self.error = Some(StepError::from(err));
        }
    }
}

/// Credential submitted for the current step.
#[derive(Clone, Debug)]
pub enum FactorSubmission {
    Password(SecretString),
    WebAuthn {
        factor: FactorKind,
        credential: serde_json::Value,
    },
    Totp(SecretString),
    OtpEmail(SecretString),
    OtpSms(SecretString),
}

impl FactorSubmission {
    #[must_use]
    pub fn factor(&self) -> FactorKind {
        match self {
            Self::Password(_) => FactorKind::Password,
            Self::WebAuthn { factor, .. } => *factor,
            Self::Totp(_) => FactorKind::Totp,
            Self::OtpEmail(_) => FactorKind::OtpEmail,
            Self::OtpSms(_) => FactorKind::OtpSms,
        }
    }

    fn checks(&self) -> SessionChecks {
        let mut checks = SessionChecks::default();
        match self {
            Self::Password(password) => checks.password = Some(password.clone()),
            Self::WebAuthn { credential, .. } => checks.web_authn = Some(credential.clone()),
            Self::Totp(code) => checks.totp = Some(code.clone()),
            Self::OtpEmail(code) => checks.otp_email = Some(code.clone()),
            Self::OtpSms(code) => checks.otp_sms = Some(code.clone()),
        }
        checks
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConsentOutcome {
    pub signed_in: bool,
    pub linked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
}

/// Session listed on the account chooser.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub session_id: String,
    pub login_name: String,
    pub display_name: String,
    pub organization_id: String,
    pub authenticated: bool,
}

#[derive(Clone)]
pub struct LoginFlow {
    backend: Arc<dyn IdentityBackend>,
    resolver: SessionResolver,
    router: StepRouter,
    challenges: ChallengeBuilder,
    linker: Arc<DeviceAuthorizationLinker>,
    config: LoginConfig,
}

impl LoginFlow {
    #[must_use]
    pub fn new(backend: Arc<dyn IdentityBackend>, config: LoginConfig) -> Self {
        Self {
            resolver: SessionResolver::new(backend.clone()),
            router: StepRouter::new(),
            challenges: ChallengeBuilder::new(backend.clone(), config.otp_resend()),
            linker: Arc::new(DeviceAuthorizationLinker::new(backend.clone())),
            backend,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &LoginConfig {
        &self.config
    }

    /// Page to render for the request.
    #[instrument(
        skip_all,
        fields(request_id = ?context.request_id.as_ref().map(RequestId::as_str))
    )]
    pub async fn next(
        &self,
        store: &dyn SessionCookieStore,
        context: &RequestContext,
    ) -> LoginPage {
        let removed = store.cleanup_expired(context.now);
        if removed > 0 {
            debug!(removed, "dropped expired session references");
        }

        let reference = if context.is_identifier_submission() {
            match self.identify(store, context).await {
                Ok(Some(reference)) => reference,
                Ok(None) => return self.unknown_user(context).await,
                Err(err) => {
                    let mut page = self
                        .identifier_page(context, context.login_name.clone())
                        .await;
                    page.fail(&err);
                    return page;
                }
            }
        } else {
            match select_reference(store, context) {
                Some(reference) => reference,
                None => {
                    return self
                        .identifier_page(context, context.login_name.clone())
                        .await;
                }
            }
        };

        self.page_for(store, context, reference).await
    }

    /// Submit a credential for the selected session.
    #[instrument(skip_all, fields(factor = %submission.factor()))]
    pub async fn verify(
        &self,
        store: &dyn SessionCookieStore,
        context: &RequestContext,
        submission: &FactorSubmission,
    ) -> LoginPage {
        let Some(reference) = select_reference(store, context) else {
            // An outage must look the same for known and unknown login names.
            let policy = match self.policy(context.organization.as_deref()).await {
                Ok(policy) => policy,
                Err(err) => return LoginPage::unavailable(&err),
            };
            if policy.ignore_unknown_usernames
                && submission.factor() == FactorKind::Password
                && context.login_name.is_some()
            {
                // Same answer as a wrong password for an existing account.
                return LoginPage::failed(
                    Step::NeedPrimaryFactor {
                        login_name: context.login_name.clone().unwrap_or_default(),
                        method: FactorKind::Password,
                        alternatives: Vec::new(),
                    },
                    &FlowError::ValidationFailed,
                );
            }
            return LoginPage::failed(
                Step::identifier(context.login_name.clone(), &policy),
                &FlowError::NotFound,
            );
        };

        let mut follow_up = context.clone();
        follow_up.submit = false;
        follow_up.session_id = Some(reference.id.clone());
        follow_up.hints.selected_factor = Some(submission.factor());

        match self
            .backend
            .set_session(&reference.id, &reference.token, &submission.checks(), None)
            .await
        {
            Ok(update) => {
                let mut updated = reference;
                updated.token = update.token;
                updated.change_date = update.change_date;
                store.add(updated);
                self.next(store, &follow_up).await
            }
            Err(err) => {
                let err = FlowError::from(err);
                match err {
                    FlowError::NotFound | FlowError::Unauthenticated => {
                        store.remove(&reference.id);
                        self.identifier_page(context, Some(reference.login_name))
                            .await
                    }
                    err => {
                        info!("factor verification failed: {err}");
                        let mut page = self.next(store, &follow_up).await;
                        page.fail(&err);
                        page
                    }
                }
            }
        }
    }

    /// Record a skipped setup prompt and continue; forced prompts stay.
    pub async fn skip_setup(
        &self,
        store: &dyn SessionCookieStore,
        context: &RequestContext,
    ) -> LoginPage {
        let mut current = context.clone();
        current.submit = false;
        current.hints.skip_mfa_setup = false;
        let page = self.next(store, &current).await;
        if !matches!(
            page.step,
            Step::NeedMultiFactorSetupPrompt {
                skippable: true,
                ..
            }
        ) {
            return page;
        }

        let Some(reference) = select_reference(store, &current) else {
            return page;
        };
        let state = match self
            .resolver
            .resolve_and_prune(store, &reference, context.now)
            .await
        {
            Ok(state) => state,
            Err(err) => {
                let mut page = page;
                page.fail(&err);
                return page;
            }
        };
        if let Err(err) = self.backend.skip_mfa_init(&state.user.id).await {
            let mut page = page;
            page.fail(&FlowError::from(err));
            return page;
        }

        current.hints.skip_mfa_setup = true;
        current.session_id = Some(reference.id);
        self.next(store, &current).await
    }

    /// Link the authenticated session to the device request of `context`.
    #[instrument(skip_all)]
    pub async fn confirm_device(
        &self,
        store: &dyn SessionCookieStore,
        context: &RequestContext,
    ) -> DeviceConsentOutcome {
        let Some(request_id) = context.request_id.as_ref().filter(|id| id.is_device()) else {
            return DeviceConsentOutcome {
                signed_in: false,
                linked: false,
                error: Some(StepError::from(FlowError::NotFound)),
            };
        };

        let page = self.next(store, context).await;
        let reference = page
            .session_id
            .as_deref()
            .and_then(|id| store.get_by_id(id));
        let (true, Some(reference)) = (page.step.is_authenticated(), reference) else {
            return DeviceConsentOutcome {
                signed_in: false,
                linked: false,
                error: Some(StepError::from(FlowError::Unauthenticated)),
            };
        };

        let binding = DeviceSessionBinding {
            session_id: reference.id,
            session_token: reference.token,
        };
        match self.linker.complete(request_id.id(), &binding).await {
            Ok(_) => DeviceConsentOutcome {
                signed_in: true,
                linked: true,
                error: None,
            },
            Err(err) => DeviceConsentOutcome {
                signed_in: true,
                linked: false,
                error: Some(StepError::from(err)),
            },
        }
    }

    /// Delete the backend session and drop its reference; returns whether one was stored.
    #[instrument(skip(self, store))]
    pub async fn logout(&self, store: &dyn SessionCookieStore, session_id: &str) -> bool {
        let Some(reference) = store.get_by_id(session_id) else {
            return false;
        };
        match self
            .backend
            .delete_session(&reference.id, &reference.token)
            .await
        {
            Ok(()) => info!("session deleted"),
            Err(err) => warn!("failed to delete session, dropping reference anyway: {err}"),
        }
        store.remove(&reference.id);
        true
    }

    /// Sessions known to this browser, for the account chooser.
    ///
    /// # Errors
    ///
    /// `Transient` when the backend cannot list sessions.
    pub async fn accounts(
        &self,
        store: &dyn SessionCookieStore,
        context: &RequestContext,
    ) -> Result<Vec<AccountSummary>, FlowError> {
        store.cleanup_expired(context.now);
        let ids = store.get_all_ids();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sessions = self.backend.list_sessions(&ids).await?;
        for id in &ids {
            if !sessions.iter().any(|session| &session.id == id) {
                store.remove(id);
            }
        }
        Ok(sessions
            .into_iter()
            .filter(|session| {
                session
                    .expiration_date
                    .is_none_or(|expires| expires > context.now)
            })
            .map(|session| AccountSummary {
                authenticated: session.factors.has_primary(),
                session_id: session.id,
                login_name: session.user.login_name,
                display_name: session.user.display_name,
                organization_id: session.user.organization_id,
            })
            .collect())
    }

    async fn policy(&self, organization_id: Option<&str>) -> Result<LoginPolicy, FlowError> {
        Ok(self.backend.get_login_policy(organization_id).await?)
    }

    async fn identifier_page(
        &self,
        context: &RequestContext,
        login_name: Option<String>,
    ) -> LoginPage {
        match self.policy(context.organization.as_deref()).await {
            Ok(policy) => LoginPage::new(Step::identifier(login_name, &policy)),
            Err(err) => LoginPage::unavailable(&err),
        }
    }

    /// Create a backend session for the submitted login name, reusing a live one.
    async fn identify(
        &self,
        store: &dyn SessionCookieStore,
        context: &RequestContext,
    ) -> Result<Option<SessionReference>, FlowError> {
        let login_name = context.login_name.as_deref().unwrap_or_default();
        let Some(user) = self
            .backend
            .search_user(login_name, context.organization.as_deref())
            .await?
        else {
            debug!("no user for submitted login name");
            return Ok(None);
        };
        match user.state {
            UserState::Locked => return Err(FlowError::Locked),
            UserState::Inactive => {
                return Err(FlowError::PolicyUnsatisfiable(
                    "user is not active".to_string(),
                ));
            }
            UserState::Active | UserState::Initial => {}
        }

        let existing = store.get_by_login_name(&user.login_name, Some(&user.organization_id));
        if let Some(existing) = existing {
            if self
                .resolver
                .resolve_and_prune(store, &existing, context.now)
                .await
                .is_ok()
            {
                return Ok(Some(existing));
            }
        }

        let created = self
            .backend
            .create_session(
                &SessionChecks::user(UserCheck::UserId(user.id.clone())),
                self.config.session_lifetime,
            )
            .await?;
        let lifetime = if context.flow.requires_contact_verification() {
            self.config.registration_idle
        } else {
            self.config.session_lifetime
        };
        let mut reference = SessionReference::new(
            created.id,
            created.token,
            user.login_name,
            user.organization_id,
            created.change_date,
        );
        reference.creation_date = Some(context.now);
        reference.expiration_date = ChronoDuration::from_std(lifetime)
            .ok()
            .and_then(|lifetime| context.now.checked_add_signed(lifetime));
        info!(session_id = %reference.id, "session created");
        store.add(reference.clone());
        Ok(Some(reference))
    }

    async fn unknown_user(&self, context: &RequestContext) -> LoginPage {
        let policy = match self.policy(context.organization.as_deref()).await {
            Ok(policy) => policy,
            Err(err) => return LoginPage::unavailable(&err),
        };
        let step = self.router.next(&RouteInput {
            session: None,
            inventory: &AuthenticationMethodInventory::default(),
            policy: &policy,
            context,
        });
        if policy.ignore_unknown_usernames {
            LoginPage::new(step)
        } else {
            LoginPage::failed(step, &FlowError::NotFound)
        }
    }

    async fn page_for(
        &self,
        store: &dyn SessionCookieStore,
        context: &RequestContext,
        reference: SessionReference,
    ) -> LoginPage {
        let state = match self
            .resolver
            .resolve_and_prune(store, &reference, context.now)
            .await
        {
            Ok(state) => state,
            Err(FlowError::NotFound | FlowError::Unauthenticated) => {
                return self
                    .identifier_page(context, Some(reference.login_name))
                    .await;
            }
            Err(err) => return LoginPage::unavailable(&err),
        };

        let organization = context
            .organization
            .as_deref()
            .unwrap_or(&state.user.organization_id);
        let loaded = tokio::try_join!(
            self.policy(Some(organization)),
            async {
                self.backend
                    .list_authentication_methods(&state.user.id)
                    .await
                    .map_err(FlowError::from)
            }
        );
        let (policy, inventory) = match loaded {
            Ok(loaded) => loaded,
            Err(err) => return LoginPage::unavailable(&err),
        };

        let step = self.router.next(&RouteInput {
            session: Some(&state),
            inventory: &inventory,
            policy: &policy,
            context,
        });
        debug!(step = step.as_str(), "routed");

        let mut page = LoginPage::new(step);
        page.session_id = Some(state.id.clone());
        self.complete_page(store, context, &reference, &state, &mut page)
            .await;
        page
    }

    /// Resolve hand-off targets and prepare the challenge of the routed step.
    async fn complete_page(
        &self,
        store: &dyn SessionCookieStore,
        context: &RequestContext,
        reference: &SessionReference,
        state: &SessionState,
        page: &mut LoginPage,
    ) {
        if let Step::Authenticated { completion } = &mut page.step {
            match completion {
                Completion::Continue { request_id } => {
                    let Some(parsed) = RequestId::parse(request_id) else {
                        return;
                    };
                    match self
                        .backend
                        .create_callback(&parsed, &reference.id, &reference.token)
                        .await
                    {
                        Ok(uri) => *completion = Completion::Redirect { uri },
                        Err(err) => page.error = Some(StepError::from(FlowError::from(err))),
                    }
                }
                Completion::DeviceConsent { request, .. } => {
                    if let Some(user_code) = context.user_code.as_deref() {
                        match self.linker.lookup(user_code).await {
                            Ok(found) => *request = Some(found),
                            Err(err) => page.error = Some(StepError::from(err)),
                        }
                    }
                }
                Completion::Redirect { .. } | Completion::SignedIn => {}
            }
            return;
        }

        let Some(factor) = page.step.challenge_factor() else {
            return;
        };
        let challenge_context = ChallengeContext {
            request_origin: context.origin.as_ref(),
            user_id: &state.user.id,
            reference,
            session: state,
            initial: context.flow.requires_contact_verification(),
            now: context.now,
        };
        match self
            .challenges
            .build_challenge(factor, &challenge_context)
            .await
        {
            Ok(challenge) => {
                if let Some(refreshed) = challenge.refreshed {
                    store.add(refreshed);
                }
                page.challenge = Some(challenge.params);
            }
            Err(err) => page.fail(&err),
        }
    }
}

fn select_reference(
    store: &dyn SessionCookieStore,
    context: &RequestContext,
) -> Option<SessionReference> {
    if let Some(session_id) = context.session_id.as_deref() {
        return store.get_by_id(session_id);
    }
    if let Some(login_name) = context.login_name.as_deref() {
        return store.get_by_login_name(login_name, context.organization.as_deref());
    }
    let mut filter = SessionFilter::new();
    filter.organization_id = context.organization.clone();
    store.get_most_recent(&filter)
}
