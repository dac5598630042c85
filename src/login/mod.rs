//! Hosted login session orchestration.
//!
//! This module holds the browser session store, the backend contract and the
//! pure step router, plus [`LoginFlow`], which wires them together for one
//! request.

pub mod backend;
pub mod challenge;
pub mod cookie;
pub mod device;
pub mod error;
pub mod flow;
pub mod http_backend;
pub mod policy;
pub mod request;
pub mod resolver;
pub mod router;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{BackendError, IdentityBackend};
pub use challenge::{ChallengeBuilder, ChallengeParams, OtpResendPolicy};
pub use cookie::{CookieOptions, CookieSessionStore, SESSION_COOKIE_NAME};
pub use device::{DeviceAuthorizationLinker, DeviceSessionBinding, LinkOutcome};
pub use error::{ErrorKind, FlowError, StepError};
pub use flow::{
    AccountSummary, DeviceConsentOutcome, FactorSubmission, LoginConfig, LoginFlow, LoginPage,
};
pub use http_backend::HttpIdentityBackend;
pub use policy::{PolicyEvaluator, RequiredFactors};
pub use request::{FlowKind, RequestContext, RequestId, RequestKind};
pub use resolver::SessionResolver;
pub use router::{Completion, RouteInput, Step, StepRouter};
pub use store::{InMemorySessionStore, SessionCookieStore, SessionFilter};
pub use types::{
    AuthenticationMethodInventory, FactorKind, LoginPolicy, SessionReference, SessionState,
    SessionToken,
};
