//! Browser-scoped store of session references.
//!
//! Every read works on a fresh snapshot of the store. Other tabs may add or
//! remove references between two calls, so `None` is an ordinary answer that
//! sends the user back to the identifier step.

use chrono::{DateTime, Utc};
use std::{
    cmp::Ordering,
    sync::{Mutex, MutexGuard},
};

use super::types::SessionReference;

/// Optional login name and organization narrowing a most-recent lookup.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SessionFilter {
    pub login_name: Option<String>,
    pub organization_id: Option<String>,
}

impl SessionFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_login_name(mut self, login_name: impl Into<String>) -> Self {
        self.login_name = Some(login_name.into());
        self
    }

    #[must_use]
    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    #[must_use]
    pub fn matches(&self, reference: &SessionReference) -> bool {
        self.login_name
            .as_deref()
            .is_none_or(|name| name == reference.login_name)
            && self
                .organization_id
                .as_deref()
                .is_none_or(|org| org == reference.organization_id)
    }
}

/// Greatest change date wins; equal dates fall back to the smaller id.
pub(crate) fn recency(a: &SessionReference, b: &SessionReference) -> Ordering {
    a.change_date
        .cmp(&b.change_date)
        .then_with(|| b.id.cmp(&a.id))
}

/// Pick the most recent reference among `references` matching `filter`.
#[must_use]
pub fn most_recent<'a, I>(references: I, filter: &SessionFilter) -> Option<SessionReference>
where
    I: IntoIterator<Item = &'a SessionReference>,
{
    references
        .into_iter()
        .filter(|reference| filter.matches(reference))
        .max_by(|a, b| recency(a, b))
        .cloned()
}

pub trait SessionCookieStore: Send + Sync {
    /// Snapshot of every stored reference, newest first.
    fn all(&self) -> Vec<SessionReference>;

    /// Insert or replace the reference with the same id.
    fn add(&self, reference: SessionReference);

    /// Drop the reference with the given id; unknown ids are ignored.
    fn remove(&self, id: &str);

    fn get_by_id(&self, id: &str) -> Option<SessionReference> {
        self.all().into_iter().find(|reference| reference.id == id)
    }

    fn get_by_login_name(
        &self,
        login_name: &str,
        organization_id: Option<&str>,
    ) -> Option<SessionReference> {
        let mut filter = SessionFilter::new().with_login_name(login_name);
        filter.organization_id = organization_id.map(ToString::to_string);
        self.get_most_recent(&filter)
    }

    fn get_all_ids(&self) -> Vec<String> {
        self.all().into_iter().map(|reference| reference.id).collect()
    }

    fn get_most_recent(&self, filter: &SessionFilter) -> Option<SessionReference> {
        most_recent(&self.all(), filter)
    }

    /// Remove every reference whose expiration date has passed; returns how many went.
    fn cleanup_expired(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<String> = self
            .all()
            .into_iter()
            .filter(|reference| reference.is_expired(now))
            .map(|reference| reference.id)
            .collect();
        for id in &expired {
            self.remove(id);
        }
        expired.len()
    }
}

/// Process-local store, used for embedding and tests.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    references: Mutex<Vec<SessionReference>>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_references(references: Vec<SessionReference>) -> Self {
        let store = Self::new();
        for reference in references.into_iter().rev() {
            store.add(reference);
        }
        store
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SessionReference>> {
        // A poisoned lock still holds a consistent list; keep serving it.
        self.references
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl SessionCookieStore for InMemorySessionStore {
    fn all(&self) -> Vec<SessionReference> {
        self.lock().clone()
    }

    fn add(&self, reference: SessionReference) {
        let mut references = self.lock();
        references.retain(|existing| existing.id != reference.id);
        references.insert(0, reference);
    }

    fn remove(&self, id: &str) {
        self.lock().retain(|reference| reference.id != id);
    }
}
