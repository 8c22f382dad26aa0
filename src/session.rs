// Explicit session context. One context object carries the signed-in user
// and profile; every change goes through dispatch(), and interested scopes
// register a listener whose handle deregisters on drop. No module-level
// singleton.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::domain::{Profile, Role};
use crate::store::{DataStore, StoreError};

#[derive(Debug, Clone, PartialEq)]
pub struct SessionUser {
    pub user_id: String,
    pub profile: Profile,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SignedIn(SessionUser),
    SignedOut,
}

pub type SessionListener = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

struct ListenerEntry {
    id: u64,
    listener: SessionListener,
}

struct SessionInner {
    current: Mutex<Option<SessionUser>>,
    listeners: Mutex<Vec<ListenerEntry>>,
    next_listener_id: AtomicU64,
}

#[derive(Clone)]
pub struct SessionContext {
    inner: Arc<SessionInner>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionContext {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SessionInner {
                current: Mutex::new(None),
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(1),
            }),
        }
    }

    // The single entry point for session changes: updates state, then
    // notifies listeners synchronously in registration order.
    pub fn dispatch(&self, event: SessionEvent) {
        {
            let mut current = self.inner.current.lock();
            match &event {
                SessionEvent::SignedIn(user) => {
                    debug!(user_id = %user.user_id, "session signed in");
                    *current = Some(user.clone());
                }
                SessionEvent::SignedOut => {
                    debug!("session signed out");
                    *current = None;
                }
            }
        }

        let listeners = self.inner.listeners.lock();
        for entry in listeners.iter() {
            (entry.listener)(&event);
        }
    }

    pub fn current(&self) -> Option<SessionUser> {
        self.inner.current.lock().clone()
    }

    pub fn current_role(&self) -> Option<Role> {
        self.current().map(|user| user.profile.role)
    }

    // Registers a listener; dropping the returned handle deregisters it.
    pub fn on_change(&self, listener: SessionListener) -> ListenerHandle {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .listeners
            .lock()
            .push(ListenerEntry { id, listener });
        ListenerHandle {
            inner: Arc::downgrade(&self.inner),
            id,
        }
    }

    // Reads the backend's current identity and dispatches the matching
    // event. Called once on page load and again after an auth redirect.
    pub async fn load_from_store(&self, store: &dyn DataStore) -> Result<(), StoreError> {
        match store.current_user().await? {
            Some(user_id) => {
                let profile = store.get_profile(&user_id).await?;
                self.dispatch(SessionEvent::SignedIn(SessionUser { user_id, profile }));
            }
            None => self.dispatch(SessionEvent::SignedOut),
        }
        Ok(())
    }
}

// Deregisters its listener when dropped or when a sign-out-driven scope
// exit discards it.
pub struct ListenerHandle {
    inner: Weak<SessionInner>,
    id: u64,
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.listeners.lock().retain(|entry| entry.id != self.id);
        }
    }
}
