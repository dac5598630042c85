//! Required-factor evaluation.
//!
//! A second factor is required when the policy forces MFA, when the user has
//! registered one of the policy's second factors, or when the policy lists
//! second factors the user never set up and the setup grace period is over.
//! Candidate lists keep the policy's order and then drop OTP factors whose
//! contact channel is unverified.

use chrono::{DateTime, Duration, Utc};

use super::{
    error::FlowError,
    types::{AuthenticationMethodInventory, FactorKind, LoginPolicy, SessionState},
};

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RequiredFactors {
    pub second_factor_required: bool,
    pub candidate_second_factors: Vec<FactorKind>,
    /// Candidates are factors the user registered, not ones to set up.
    pub second_factors_registered: bool,
    pub multi_factor_required: bool,
    pub candidate_multi_factors: Vec<FactorKind>,
    pub forced: bool,
    pub setup_required: bool,
    pub setup_skippable: bool,
}

impl RequiredFactors {
    /// Factors offered by the setup prompt, second factors first.
    #[must_use]
    pub fn setup_candidates(&self) -> Vec<FactorKind> {
        let mut factors = Vec::new();
        if self.second_factor_required && !self.second_factors_registered {
            factors.extend(self.candidate_second_factors.iter().copied());
        }
        if self.multi_factor_required {
            for factor in &self.candidate_multi_factors {
                if !factors.contains(factor) {
                    factors.push(*factor);
                }
            }
        }
        factors
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PolicyEvaluator {
    now: DateTime<Utc>,
}

impl PolicyEvaluator {
    #[must_use]
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    /// # Errors
    ///
    /// `PolicyUnsatisfiable` when a factor is required but no eligible channel exists.
    pub fn required_factors(
        &self,
        policy: &LoginPolicy,
        inventory: &AuthenticationMethodInventory,
        session: &SessionState,
    ) -> Result<RequiredFactors, FlowError> {
        let forced = policy.force_mfa
            && (!policy.force_mfa_for_local_users_only || session.is_local_user());
        let grace_elapsed = self.grace_elapsed(policy, inventory);

        let registered_second = registered(&policy.required_second_factors, inventory);
        let second_factors_registered = !registered_second.is_empty();
        let second_factor_required = forced
            || second_factors_registered
            || (!policy.required_second_factors.is_empty() && grace_elapsed);
        let candidate_second_factors = contact_filter(
            if second_factors_registered {
                registered_second
            } else {
                policy.required_second_factors.clone()
            },
            inventory,
        );

        let registered_multi = registered(&policy.required_multi_factors, inventory);
        let multi_factor_required = !policy.required_multi_factors.is_empty()
            && registered_multi.is_empty()
            && (forced || grace_elapsed);
        let candidate_multi_factors = contact_filter(
            if registered_multi.is_empty() {
                policy.required_multi_factors.clone()
            } else {
                registered_multi
            },
            inventory,
        );

        let setup_required =
            (second_factor_required && !second_factors_registered) || multi_factor_required;
        let required = RequiredFactors {
            second_factor_required,
            candidate_second_factors,
            second_factors_registered,
            multi_factor_required,
            candidate_multi_factors,
            forced,
            setup_required,
            setup_skippable: !forced && policy.multi_factor_init_grace_seconds > 0,
        };

        if required.second_factor_required
            && required.candidate_second_factors.is_empty()
            && (required.second_factors_registered || required.setup_candidates().is_empty())
        {
            return Err(FlowError::PolicyUnsatisfiable(
                "no eligible second factor".to_string(),
            ));
        }
        Ok(required)
    }

    /// Grace starts at the later of registration and the last skip.
    fn grace_elapsed(
        &self,
        policy: &LoginPolicy,
        inventory: &AuthenticationMethodInventory,
    ) -> bool {
        if policy.multi_factor_init_grace_seconds == 0 {
            return true;
        }
        let start = match (inventory.registered_at, inventory.mfa_init_skipped_at) {
            (Some(registered), Some(skipped)) => Some(registered.max(skipped)),
            (registered, skipped) => registered.or(skipped),
        };
        let Some(start) = start else {
            return true;
        };
        let grace = Duration::seconds(
            i64::try_from(policy.multi_factor_init_grace_seconds).unwrap_or(i64::MAX),
        );
        start
            .checked_add_signed(grace)
            .is_none_or(|deadline| self.now >= deadline)
    }
}

fn registered(
    factors: &[FactorKind],
    inventory: &AuthenticationMethodInventory,
) -> Vec<FactorKind> {
    factors
        .iter()
        .copied()
        .filter(|factor| inventory.has(*factor))
        .collect()
}

fn contact_filter(
    factors: Vec<FactorKind>,
    inventory: &AuthenticationMethodInventory,
) -> Vec<FactorKind> {
    factors
        .into_iter()
        .filter(|factor| {
            factor
                .contact_channel()
                .is_none_or(|channel| inventory.contact_verified(channel))
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::login::types::{SessionFactors, SessionUser, VerifiedFactor};

    fn session() -> SessionState {
        SessionState {
            id: "s1".to_string(),
            user: SessionUser {
                id: "u1".to_string(),
                login_name: "a@org".to_string(),
                organization_id: "org1".to_string(),
                display_name: "A".to_string(),
            },
            factors: SessionFactors::default(),
            pending_challenges: Default::default(),
            expiration_date: None,
        }
    }

    fn inventory(methods: &[FactorKind]) -> AuthenticationMethodInventory {
        AuthenticationMethodInventory {
            methods: methods.to_vec(),
            email_verified: true,
            phone_verified: true,
            ..Default::default()
        }
    }

    fn policy(second: &[FactorKind]) -> LoginPolicy {
        LoginPolicy {
            required_second_factors: second.to_vec(),
            ..LoginPolicy::default()
        }
    }

    #[test]
    fn forced_mfa_without_registration_offers_policy_order() {
        let mut policy = policy(&[FactorKind::OtpSms, FactorKind::Totp, FactorKind::OtpEmail]);
        policy.force_mfa = true;
        policy.multi_factor_init_grace_seconds = 0;

        let required = PolicyEvaluator::at(Utc::now())
            .required_factors(&policy, &inventory(&[FactorKind::Password]), &session())
            .unwrap();
        assert!(required.second_factor_required);
        assert!(required.forced);
        assert!(required.setup_required);
        assert!(!required.setup_skippable);
        assert_eq!(
            required.candidate_second_factors,
            vec![FactorKind::OtpSms, FactorKind::Totp, FactorKind::OtpEmail]
        );
    }

    #[test]
    fn registered_second_factor_is_required_in_policy_order() {
        let policy = policy(&[FactorKind::Totp, FactorKind::U2f, FactorKind::OtpEmail]);
        let inventory = inventory(&[FactorKind::Password, FactorKind::OtpEmail, FactorKind::Totp]);

        let required = PolicyEvaluator::at(Utc::now())
            .required_factors(&policy, &inventory, &session())
            .unwrap();
        assert!(required.second_factor_required);
        assert!(required.second_factors_registered);
        assert!(!required.setup_required);
        assert_eq!(
            required.candidate_second_factors,
            vec![FactorKind::Totp, FactorKind::OtpEmail]
        );
    }

    #[test]
    fn unverified_contact_channels_are_filtered() {
        let policy = policy(&[FactorKind::OtpEmail, FactorKind::OtpSms, FactorKind::Totp]);
        let mut inventory = inventory(&[
            FactorKind::Password,
            FactorKind::OtpEmail,
            FactorKind::OtpSms,
            FactorKind::Totp,
        ]);
        inventory.phone_verified = false;

        let required = PolicyEvaluator::at(Utc::now())
            .required_factors(&policy, &inventory, &session())
            .unwrap();
        assert_eq!(
            required.candidate_second_factors,
            vec![FactorKind::OtpEmail, FactorKind::Totp]
        );
    }

    #[test]
    fn grace_period_defers_setup() {
        let now = Utc::now();
        let mut policy = policy(&[FactorKind::Totp]);
        policy.multi_factor_init_grace_seconds = 3600;
        let mut inventory = inventory(&[FactorKind::Password]);
        inventory.registered_at = Some(now - Duration::minutes(10));

        let required = PolicyEvaluator::at(now)
            .required_factors(&policy, &inventory, &session())
            .unwrap();
        assert!(!required.second_factor_required);
        assert!(!required.setup_required);

        inventory.registered_at = Some(now - Duration::hours(2));
        let required = PolicyEvaluator::at(now)
            .required_factors(&policy, &inventory, &session())
            .unwrap();
        assert!(required.second_factor_required);
        assert!(required.setup_required);
        assert!(required.setup_skippable);

        inventory.mfa_init_skipped_at = Some(now - Duration::minutes(5));
        let required = PolicyEvaluator::at(now)
            .required_factors(&policy, &inventory, &session())
            .unwrap();
        assert!(!required.second_factor_required);
    }

    #[test]
    fn local_only_forcing_exempts_identity_provider_users() {
        let mut policy = policy(&[FactorKind::Totp]);
        policy.force_mfa = true;
        policy.force_mfa_for_local_users_only = true;
        policy.multi_factor_init_grace_seconds = 3600;
        let mut inventory = inventory(&[FactorKind::IdentityProvider]);
        inventory.registered_at = Some(Utc::now());
        let mut session = session();
        session
            .factors
            .set(FactorKind::IdentityProvider, VerifiedFactor::at(Utc::now()));

        let required = PolicyEvaluator::at(Utc::now())
            .required_factors(&policy, &inventory, &session)
            .unwrap();
        assert!(!required.forced);
        assert!(!required.second_factor_required);
    }

    #[test]
    fn multi_factor_setup_after_grace() {
        let mut policy = LoginPolicy::default();
        policy.required_multi_factors = vec![FactorKind::Passkey];
        policy.multi_factor_init_grace_seconds = 0;

        let required = PolicyEvaluator::at(Utc::now())
            .required_factors(&policy, &inventory(&[FactorKind::Password]), &session())
            .unwrap();
        assert!(required.multi_factor_required);
        assert!(!required.second_factor_required);
        assert_eq!(required.setup_candidates(), vec![FactorKind::Passkey]);
    }

    #[test]
    fn forced_without_any_eligible_factor_is_unsatisfiable() {
        let mut policy = policy(&[FactorKind::OtpSms]);
        policy.force_mfa = true;
        let mut inventory = inventory(&[FactorKind::Password]);
        inventory.phone_verified = false;

        let err = PolicyEvaluator::at(Utc::now())
            .required_factors(&policy, &inventory, &session())
            .unwrap_err();
        assert!(matches!(err, FlowError::PolicyUnsatisfiable(_)));
    }

    #[test]
    fn default_policy_requires_nothing() {
        let required = PolicyEvaluator::at(Utc::now())
            .required_factors(
                &LoginPolicy::default(),
                &inventory(&[FactorKind::Password]),
                &session(),
            )
            .unwrap();
        assert_eq!(required.setup_candidates(), Vec::<FactorKind>::new());
        assert!(!required.second_factor_required);
        assert!(!required.multi_factor_required);
    }
}
