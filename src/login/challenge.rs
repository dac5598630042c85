//! Step-specific challenge preparation.
//!
//! Security boundaries: WebAuthn options always carry an `rpId` before they
//! reach the browser. When the backend leaves it out, the host of the request
//! origin is injected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tracing::{debug, instrument};
use url::Url;
use utoipa::ToSchema;

use super::{
    backend::{ChallengeRequest, IdentityBackend, SessionChecks, UserVerification},
    error::FlowError,
    types::{
        ContactChannel, FactorKind, PasswordComplexityPolicy, SessionReference, SessionState,
    },
};

const DEFAULT_OTP_COOLDOWN: Duration = Duration::from_secs(60);

/// When an email/SMS one-time code is dispatched again.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OtpResendPolicy {
    cooldown: Duration,
    initial_bypass: bool,
}

impl Default for OtpResendPolicy {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_OTP_COOLDOWN,
            initial_bypass: true,
        }
    }
}

impl OtpResendPolicy {
    #[must_use]
    pub fn new(cooldown: Duration, initial_bypass: bool) -> Self {
        Self {
            cooldown,
            initial_bypass,
        }
    }

    #[must_use]
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    #[must_use]
    pub fn initial_bypass(&self) -> bool {
        self.initial_bypass
    }

    /// A code goes out when none was sent, the cooldown elapsed, or an initial
    /// verification bypasses the cooldown.
    #[must_use]
    pub fn should_send(
        &self,
        last_sent: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        initial: bool,
    ) -> bool {
        let Some(last_sent) = last_sent else {
            return true;
        };
        if initial && self.initial_bypass {
            return true;
        }
        (now - last_sent)
            .to_std()
            .is_ok_and(|elapsed| elapsed >= self.cooldown)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChallengeParams {
    Password {
        complexity: PasswordComplexityPolicy,
    },
    WebAuthn {
        factor: FactorKind,
        #[schema(value_type = Object)]
        options: Value,
    },
    Otp {
        factor: FactorKind,
        channel: ContactChannel,
        #[serde(rename = "codeSent")]
        code_sent: bool,
        #[serde(rename = "sentAt", default, skip_serializing_if = "Option::is_none")]
        sent_at: Option<DateTime<Utc>>,
    },
    Totp,
    /// Sign-in continues at the identity provider.
    IdentityProvider,
}

#[derive(Clone, Copy, Debug)]
pub struct ChallengeContext<'a> {
    pub request_origin: Option<&'a Url>,
    pub user_id: &'a str,
    pub reference: &'a SessionReference,
    pub session: &'a SessionState,
    /// First verification of a freshly registered contact.
    pub initial: bool,
    pub now: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct Challenge {
    pub params: ChallengeParams,
    /// Reference carrying the token rotated by the backend, if any.
    pub refreshed: Option<SessionReference>,
}

#[derive(Clone)]
pub struct ChallengeBuilder {
    backend: Arc<dyn IdentityBackend>,
    resend: OtpResendPolicy,
}

impl ChallengeBuilder {
    #[must_use]
    pub fn new(backend: Arc<dyn IdentityBackend>, resend: OtpResendPolicy) -> Self {
        Self { backend, resend }
    }

    /// # Errors
    ///
    /// Propagates backend failures and rejects origin-bound factors when no
    /// request origin is known.
    #[instrument(skip_all, fields(factor = %factor, user_id = %context.user_id))]
    pub async fn build_challenge(
        &self,
        factor: FactorKind,
        context: &ChallengeContext<'_>,
    ) -> Result<Challenge, FlowError> {
        match factor {
            FactorKind::Password => {
                let complexity = self
                    .backend
                    .get_password_complexity(Some(&context.session.user.organization_id))
                    .await?;
                Ok(Challenge {
                    params: ChallengeParams::Password { complexity },
                    refreshed: None,
                })
            }
            FactorKind::Passkey | FactorKind::U2f => self.web_authn(factor, context).await,
            FactorKind::OtpEmail | FactorKind::OtpSms => self.otp(factor, context).await,
            FactorKind::Totp => Ok(Challenge {
                params: ChallengeParams::Totp,
                refreshed: None,
            }),
            FactorKind::IdentityProvider => Ok(Challenge {
                params: ChallengeParams::IdentityProvider,
                refreshed: None,
            }),
        }
    }

    async fn web_authn(
        &self,
        factor: FactorKind,
        context: &ChallengeContext<'_>,
    ) -> Result<Challenge, FlowError> {
        let domain = context
            .request_origin
            .and_then(Url::host_str)
            .map(ToString::to_string)
            .ok_or_else(|| {
                FlowError::Transient("request origin unavailable for webauthn".to_string())
            })?;
        let user_verification = if factor == FactorKind::Passkey {
            UserVerification::Required
        } else {
            UserVerification::Discouraged
        };
        let request = ChallengeRequest::WebAuthn {
            domain: domain.clone(),
            user_verification,
        };
        let update = self
            .backend
            .set_session(
                &context.reference.id,
                &context.reference.token,
                &SessionChecks::default(),
                Some(&request),
            )
            .await?;
        let mut options = update.web_authn.ok_or_else(|| {
            FlowError::Transient("backend issued no webauthn challenge".to_string())
        })?;
        if inject_rp_id(&mut options, &domain) {
            debug!(rp_id = %domain, "injected relying party id into webauthn options");
        }

        let mut refreshed = context.reference.clone();
        refreshed.token = update.token;
        refreshed.change_date = update.change_date;
        Ok(Challenge {
            params: ChallengeParams::WebAuthn { factor, options },
            refreshed: Some(refreshed),
        })
    }

    async fn otp(
        &self,
        factor: FactorKind,
        context: &ChallengeContext<'_>,
    ) -> Result<Challenge, FlowError> {
        let pending = &context.session.pending_challenges;
        let (channel, last_sent, request) = match factor {
            FactorKind::OtpSms => (
                ContactChannel::Phone,
                context.reference.otp_sms_sent_at.max(pending.otp_sms_sent_at),
                ChallengeRequest::OtpSms,
            ),
            FactorKind::OtpEmail => (
                ContactChannel::Email,
                context
                    .reference
                    .otp_email_sent_at
                    .max(pending.otp_email_sent_at),
                ChallengeRequest::OtpEmail,
            ),
            other => {
                return Err(FlowError::PolicyUnsatisfiable(format!(
                    "{other} has no one-time code channel"
                )));
            }
        };

        if !self
            .resend
            .should_send(last_sent, context.now, context.initial)
        {
            debug!("one-time code already sent, waiting for cooldown");
            return Ok(Challenge {
                params: ChallengeParams::Otp {
                    factor,
                    channel,
                    code_sent: false,
                    sent_at: last_sent,
                },
                refreshed: None,
            });
        }

        let update = self
            .backend
            .set_session(
                &context.reference.id,
                &context.reference.token,
                &SessionChecks::default(),
                Some(&request),
            )
            .await?;
        let mut refreshed = context.reference.clone();
        refreshed.token = update.token;
        refreshed.change_date = update.change_date;
        match channel {
            ContactChannel::Phone => refreshed.otp_sms_sent_at = Some(context.now),
            ContactChannel::Email => refreshed.otp_email_sent_at = Some(context.now),
        }
        Ok(Challenge {
            params: ChallengeParams::Otp {
                factor,
                channel,
                code_sent: true,
                sent_at: Some(context.now),
            },
            refreshed: Some(refreshed),
        })
    }
}

/// Set `rpId` when missing, looking inside `publicKey` when present.
fn inject_rp_id(options: &mut Value, domain: &str) -> bool {
    let target = if options.get("publicKey").is_some_and(Value::is_object) {
        &mut options["publicKey"]
    } else {
        options
    };
    let Some(object) = target.as_object_mut() else {
        return false;
    };
    let present = object
        .get("rpId")
        .and_then(Value::as_str)
        .is_some_and(|rp_id| !rp_id.is_empty());
    if present {
        return false;
    }
    object.insert("rpId".to_string(), Value::String(domain.to_string()));
    true
}
