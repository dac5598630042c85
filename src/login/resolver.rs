//! Resolve browser-held session references into live backend state.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::{
    backend::IdentityBackend,
    error::FlowError,
    store::SessionCookieStore,
    types::{SessionReference, SessionState},
};

#[derive(Clone)]
pub struct SessionResolver {
    backend: Arc<dyn IdentityBackend>,
}

impl SessionResolver {
    #[must_use]
    pub fn new(backend: Arc<dyn IdentityBackend>) -> Self {
        Self { backend }
    }

    /// Fetch fresh state for `reference`.
    ///
    /// # Errors
    ///
    /// `NotFound` when the backend has no such session or it has expired,
    /// `Unauthenticated` when the token is rejected and `Transient` otherwise.
    #[instrument(skip_all, fields(session_id = %reference.id))]
    pub async fn resolve(
        &self,
        reference: &SessionReference,
        now: DateTime<Utc>,
    ) -> Result<SessionState, FlowError> {
        let state = self
            .backend
            .get_session(&reference.id, &reference.token)
            .await
            .map_err(FlowError::from)?;
        if state.expiration_date.is_some_and(|expires| expires <= now) {
            debug!("session expired");
            return Err(FlowError::NotFound);
        }
        Ok(state)
    }

    /// Like [`Self::resolve`], dropping the stored reference when it is stale.
    ///
    /// # Errors
    ///
    /// Same as [`Self::resolve`]; the store is left untouched on `Transient`.
    pub async fn resolve_and_prune(
        &self,
        store: &dyn SessionCookieStore,
        reference: &SessionReference,
        now: DateTime<Utc>,
    ) -> Result<SessionState, FlowError> {
        match self.resolve(reference, now).await {
            Err(err @ (FlowError::NotFound | FlowError::Unauthenticated)) => {
                debug!(session_id = %reference.id, "dropping stale session reference: {err}");
                store.remove(&reference.id);
                Err(err)
            }
            Err(err) => {
                warn!(session_id = %reference.id, "failed to resolve session: {err}");
                Err(err)
            }
            ok => ok,
        }
    }
}
