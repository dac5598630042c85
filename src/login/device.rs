//! Device-code authorization linking.

use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::{
    backend::{BackendError, IdentityBackend},
    error::FlowError,
    types::{DeviceAuthorizationRequest, SessionToken},
};

/// Session that authorizes the device.
#[derive(Clone, Debug)]
pub struct DeviceSessionBinding {
    pub session_id: String,
    pub session_token: SessionToken,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LinkOutcome {
    Linked,
    /// The backend reports the request as already completed.
    AlreadyLinked,
}

pub struct DeviceAuthorizationLinker {
    backend: Arc<dyn IdentityBackend>,
}

impl DeviceAuthorizationLinker {
    #[must_use]
    pub fn new(backend: Arc<dyn IdentityBackend>) -> Self {
        Self { backend }
    }

    /// Pending request shown on the consent page.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown user codes, `Transient` on backend failures.
    pub async fn lookup(&self, user_code: &str) -> Result<DeviceAuthorizationRequest, FlowError> {
        Ok(self.backend.get_device_authorization(user_code).await?)
    }

    /// Bind `binding` to the device request; completing twice is a success.
    ///
    /// # Errors
    ///
    /// Backend failures other than "already completed". The caller keeps the
    /// session signed in either way.
    #[instrument(skip(self, binding), fields(session_id = %binding.session_id))]
    pub async fn complete(
        &self,
        device_request_id: &str,
        binding: &DeviceSessionBinding,
    ) -> Result<LinkOutcome, FlowError> {
        match self
            .backend
            .complete_device_authorization(
                device_request_id,
                &binding.session_id,
                &binding.session_token,
            )
            .await
        {
            Ok(()) => {
                info!("device authorization completed");
                Ok(LinkOutcome::Linked)
            }
            Err(BackendError::AlreadyCompleted) => {
                info!("device authorization already completed");
                Ok(LinkOutcome::AlreadyLinked)
            }
            Err(err) => {
                warn!("failed to complete device authorization: {err}");
                Err(err.into())
            }
        }
    }
}
