//! Step routing state machine.
//!
//! States are ordered:
//! `NEED_IDENTIFIER → NEED_PRIMARY_FACTOR → NEED_SECOND_FACTOR_CHOICE →
//! NEED_SECOND_FACTOR_VERIFY → NEED_MULTI_FACTOR_SETUP_PROMPT →
//! NEED_CONTACT_VERIFICATION → AUTHENTICATED`.
//! The router always returns the earliest state that is not satisfied yet.
//! It is a pure function of its inputs; time only enters through
//! [`RequestContext::now`] for the setup grace period.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{
    error::{FlowError, StepError},
    policy::{PolicyEvaluator, RequiredFactors},
    request::{FlowKind, RequestContext},
    types::{
        AuthenticationMethodInventory, ContactChannel, DeviceAuthorizationRequest, FactorKind,
        LoginPolicy, SessionState,
    },
};

/// How an authenticated login is handed off.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Completion {
    /// Continue the application's authorization request.
    Continue {
        #[serde(rename = "requestId")]
        request_id: String,
    },
    Redirect { uri: String },
    /// Nothing to continue; show the signed-in page.
    SignedIn,
    DeviceConsent {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request: Option<DeviceAuthorizationRequest>,
    },
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Step {
    NeedIdentifier {
        #[serde(rename = "loginName", default, skip_serializing_if = "Option::is_none")]
        login_name: Option<String>,
        #[serde(rename = "allowRegister")]
        allow_register: bool,
    },
    NeedPrimaryFactor {
        #[serde(rename = "loginName")]
        login_name: String,
        method: FactorKind,
        alternatives: Vec<FactorKind>,
    },
    NeedSecondFactorChoice { candidates: Vec<FactorKind> },
    NeedSecondFactorVerify { factor: FactorKind },
    NeedMultiFactorSetupPrompt {
        factors: Vec<FactorKind>,
        skippable: bool,
    },
    NeedContactVerification {
        channel: ContactChannel,
        invite: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    Authenticated { completion: Completion },
    Error { error: StepError },
}

impl Step {
    #[must_use]
    pub fn error(err: &FlowError) -> Self {
        Self::Error {
            error: StepError::from(err),
        }
    }

    #[must_use]
    pub fn identifier(login_name: Option<String>, policy: &LoginPolicy) -> Self {
        Self::NeedIdentifier {
            login_name,
            allow_register: policy.allow_register,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NeedIdentifier { .. } => "NEED_IDENTIFIER",
            Self::NeedPrimaryFactor { .. } => "NEED_PRIMARY_FACTOR",
            Self::NeedSecondFactorChoice { .. } => "NEED_SECOND_FACTOR_CHOICE",
            Self::NeedSecondFactorVerify { .. } => "NEED_SECOND_FACTOR_VERIFY",
            Self::NeedMultiFactorSetupPrompt { .. } => "NEED_MULTI_FACTOR_SETUP_PROMPT",
            Self::NeedContactVerification { .. } => "NEED_CONTACT_VERIFICATION",
            Self::Authenticated { .. } => "AUTHENTICATED",
            Self::Error { .. } => "ERROR",
        }
    }

    /// Factor whose verification form needs a prepared challenge.
    #[must_use]
    pub fn challenge_factor(&self) -> Option<FactorKind> {
        match self {
            Self::NeedPrimaryFactor { method, .. }
                if matches!(method, FactorKind::Password | FactorKind::Passkey) =>
            {
                Some(*method)
            }
            Self::NeedSecondFactorVerify { factor } => Some(*factor),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }
}

/// Everything the router looks at for one decision.
#[derive(Clone, Copy, Debug)]
pub struct RouteInput<'a> {
    pub session: Option<&'a SessionState>,
    pub inventory: &'a AuthenticationMethodInventory,
    pub policy: &'a LoginPolicy,
    pub context: &'a RequestContext,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct StepRouter;

impl StepRouter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    #[must_use]
    pub fn next(&self, input: &RouteInput<'_>) -> Step {
        let RouteInput {
            session,
            inventory,
            policy,
            context,
        } = *input;

        let Some(session) = session else {
            return without_session(policy, context);
        };

        if let Some(step) = primary_factor(session, inventory, policy, context) {
            return step;
        }

        let required = match PolicyEvaluator::at(context.now)
            .required_factors(policy, inventory, session)
        {
            Ok(required) => required,
            Err(err) => return Step::error(&err),
        };

        if let Some(step) = second_factor(session, policy, &required, context) {
            return step;
        }
        if let Some(step) = setup_prompt(session, &required, context) {
            return step;
        }
        if let Some(step) = contact_verification(inventory, policy, context) {
            return step;
        }

        Step::Authenticated {
            completion: completion(policy, context),
        }
    }
}

fn without_session(policy: &LoginPolicy, context: &RequestContext) -> Step {
    // Unknown names get the password form so the page does not reveal whether the account exists.
    if context.is_identifier_submission() && policy.ignore_unknown_usernames {
        return Step::NeedPrimaryFactor {
            login_name: context.login_name.clone().unwrap_or_default(),
            method: FactorKind::Password,
            alternatives: Vec::new(),
        };
    }
    Step::identifier(context.login_name.clone(), policy)
}

fn primary_factor(
    session: &SessionState,
    inventory: &AuthenticationMethodInventory,
    policy: &LoginPolicy,
    context: &RequestContext,
) -> Option<Step> {
    if session.factors.has_primary() {
        return None;
    }
    if inventory.is_empty() {
        return Some(Step::NeedContactVerification {
            channel: ContactChannel::Email,
            invite: true,
            code: context.code.clone(),
        });
    }

    let mut offered = Vec::new();
    if policy.allow_passkey && inventory.has(FactorKind::Passkey) {
        offered.push(FactorKind::Passkey);
    }
    if policy.allow_username_password && inventory.has(FactorKind::Password) {
        offered.push(FactorKind::Password);
    }
    if offered.is_empty() && inventory.has(FactorKind::IdentityProvider) {
        offered.push(FactorKind::IdentityProvider);
    }
    if offered.is_empty() {
        return Some(Step::error(&FlowError::PolicyUnsatisfiable(
            "no primary factor allowed by the login policy".to_string(),
        )));
    }

    let method = context
        .hints
        .selected_factor
        .filter(|selected| offered.contains(selected))
        .unwrap_or(offered[0]);
    offered.retain(|factor| *factor != method);
    Some(Step::NeedPrimaryFactor {
        login_name: session.user.login_name.clone(),
        method,
        alternatives: offered,
    })
}

fn second_factor(
    session: &SessionState,
    policy: &LoginPolicy,
    required: &RequiredFactors,
    context: &RequestContext,
) -> Option<Step> {
    if !required.second_factor_required
        || !required.second_factors_registered
        || session.factors.is_verified(FactorKind::Passkey)
    {
        return None;
    }
    let verified = policy
        .required_second_factors
        .iter()
        .chain(&required.candidate_second_factors)
        .any(|factor| session.factors.is_verified(*factor));
    if verified {
        return None;
    }

    let candidates = &required.candidate_second_factors;
    let selected = context
        .hints
        .selected_factor
        .filter(|selected| candidates.contains(selected));
    let single = match candidates.as_slice() {
        [only] => Some(*only),
        _ => None,
    };
    if let Some(factor) = selected.or(single) {
        return Some(Step::NeedSecondFactorVerify { factor });
    }
    if candidates.is_empty() {
        return Some(Step::error(&FlowError::PolicyUnsatisfiable(
            "no eligible second factor".to_string(),
        )));
    }
    Some(Step::NeedSecondFactorChoice {
        candidates: candidates.clone(),
    })
}

fn setup_prompt(
    session: &SessionState,
    required: &RequiredFactors,
    context: &RequestContext,
) -> Option<Step> {
    let second_setup = required.second_factor_required
        && !required.second_factors_registered
        && !session.factors.is_verified(FactorKind::Passkey);
    if !second_setup && !required.multi_factor_required {
        return None;
    }
    if context.hints.skip_mfa_setup && required.setup_skippable {
        return None;
    }

    let mut factors = Vec::new();
    if second_setup {
        factors.extend(required.candidate_second_factors.iter().copied());
    }
    if required.multi_factor_required {
        for factor in &required.candidate_multi_factors {
            if !factors.contains(factor) {
                factors.push(*factor);
            }
        }
    }
    if factors.is_empty() {
        return Some(Step::error(&FlowError::PolicyUnsatisfiable(
            "no eligible factor to set up".to_string(),
        )));
    }
    Some(Step::NeedMultiFactorSetupPrompt {
        factors,
        skippable: required.setup_skippable,
    })
}

fn contact_verification(
    inventory: &AuthenticationMethodInventory,
    policy: &LoginPolicy,
    context: &RequestContext,
) -> Option<Step> {
    let requested =
        context.flow.requires_contact_verification() || policy.require_email_verification;
    if !requested || inventory.email_verified {
        return None;
    }
    Some(Step::NeedContactVerification {
        channel: ContactChannel::Email,
        invite: context.flow == FlowKind::Invitation,
        code: context.code.clone(),
    })
}

fn completion(policy: &LoginPolicy, context: &RequestContext) -> Completion {
    match &context.request_id {
        Some(request_id) if request_id.is_device() => Completion::DeviceConsent {
            request_id: request_id.to_string(),
            request: None,
        },
        Some(request_id) => Completion::Continue {
            request_id: request_id.to_string(),
        },
        None => policy
            .default_redirect_uri
            .clone()
            .map_or(Completion::SignedIn, |uri| Completion::Redirect { uri }),
    }
}
