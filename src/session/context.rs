// Session context
// The process-wide authentication state machine. Composes the store, the
// identity client and the refresh coordinator; everything the rest of the
// application needs to know about the session is read from here or from
// the watch channel it publishes on.

use std::sync::{Arc, Weak};

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

use crate::identity::types::{
    AuthResponse, LoginRequest, PasswordResetConfirm, PasswordResetRequest, RegisterRequest,
    UserProfile,
};
use crate::identity::IdentityClient;
use crate::nav::{self, NavItem};
use crate::session::refresh::{RefreshCoordinator, RefreshTimer};
use crate::store::{SessionRecord, SessionStore};
use crate::token;

/// Authentication lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Storage has not been read yet
    Unknown,
    /// No valid session
    Unauthenticated,
    /// A renewal is in progress during initialization
    Authenticating,
    /// Valid session, proactive renewal armed
    Authenticated,
}

/// Point-in-time view of the session for consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub user: Option<UserProfile>,
    pub navigation: &'static [NavItem],
}

struct ContextInner {
    state: SessionState,
    user: Option<UserProfile>,
    refresh_timer: Option<RefreshTimer>,
    change_listener: Option<JoinHandle<()>>,
}

pub struct SessionContext {
    store: Arc<SessionStore>,
    identity: Arc<IdentityClient>,
    coordinator: Arc<RefreshCoordinator>,
    inner: Mutex<ContextInner>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    // handed to spawned tasks so a dropped context stops reacting
    weak: Weak<SessionContext>,
}

impl SessionContext {
    pub fn new(
        store: Arc<SessionStore>,
        identity: Arc<IdentityClient>,
        coordinator: Arc<RefreshCoordinator>,
    ) -> Arc<Self> {
        let (snapshot_tx, _) = watch::channel(SessionSnapshot {
            state: SessionState::Unknown,
            user: None,
            navigation: nav::BASE_NAVIGATION,
        });

        Arc::new_cyclic(|weak| Self {
            store,
            identity,
            coordinator,
            inner: Mutex::new(ContextInner {
                state: SessionState::Unknown,
                user: None,
                refresh_timer: None,
                change_listener: None,
            }),
            snapshot_tx,
            weak: weak.clone(),
        })
    }

    /// Read persisted state, renewing first if the stored access credential
    /// has expired, then start watching for writes from other contexts.
    pub async fn initialize(&self) {
        self.check_auth().await;
        self.spawn_change_listener().await;
    }

    /// Authenticate and establish a new session.
    pub async fn login(&self, request: &LoginRequest) -> AuthResponse {
        let response = self.identity.login(request).await;
        self.adopt_session(&response).await;
        response
    }

    /// Create an account and establish a new session.
    pub async fn register(&self, request: &RegisterRequest) -> AuthResponse {
        let response = self.identity.register(request).await;
        self.adopt_session(&response).await;
        response
    }

    /// End the session: revoke the refresh credential (best effort), clear
    /// storage, cancel the renewal timer. Local teardown happens whatever
    /// the revoke call returns.
    pub async fn logout(&self) -> AuthResponse {
        let refresh = self.store.load().map(|record| record.tokens.refresh);

        let response = match refresh {
            Some(refresh) => self.identity.logout(&refresh).await,
            None => AuthResponse::failure("no session to log out"),
        };

        self.store.clear();
        self.enter_unauthenticated().await;
        response
    }

    pub async fn request_password_reset(&self, request: &PasswordResetRequest) -> AuthResponse {
        self.identity.request_password_reset(request).await
    }

    pub async fn resend_reset_code(&self, request: &PasswordResetRequest) -> AuthResponse {
        self.identity.resend_reset_code(request).await
    }

    pub async fn confirm_password_reset(&self, request: &PasswordResetConfirm) -> AuthResponse {
        self.identity.confirm_password_reset(request).await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Watch the session as it changes state. Watchers are only woken on
    /// actual change; re-entering the current state is silent.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    pub async fn is_authenticated(&self) -> bool {
        self.state().await == SessionState::Authenticated
    }

    pub async fn user(&self) -> Option<UserProfile> {
        self.inner.lock().await.user.clone()
    }

    /// Re-derive the session state from storage. Runs at startup and again
    /// whenever another context writes the store.
    async fn check_auth(&self) {
        match self.store.load() {
            None => self.enter_unauthenticated().await,
            Some(record) => {
                if token::is_expired(&record.tokens.access) {
                    self.set_state_authenticating().await;
                    match self.coordinator.renew().await {
                        Ok(pair) => self.enter_authenticated(record.user, &pair.access).await,
                        Err(e) => {
                            tracing::warn!(error = %e, "could not renew stored session");
                            self.store.clear();
                            self.enter_unauthenticated().await;
                        }
                    }
                } else {
                    self.enter_authenticated(record.user, &record.tokens.access)
                        .await;
                }
            }
        }
    }

    async fn adopt_session(&self, response: &AuthResponse) {
        if !response.success {
            return;
        }
        let (Some(tokens), Some(user)) = (response.tokens.clone(), response.user.clone()) else {
            tracing::warn!("identity service omitted tokens or user from a successful response");
            return;
        };

        let record = SessionRecord { tokens, user };
        if let Err(e) = self.store.save(&record) {
            tracing::error!(error = %e, "failed to persist session");
            return;
        }

        let SessionRecord { tokens, user } = record;
        self.enter_authenticated(user, &tokens.access).await;
    }

    async fn enter_authenticated(&self, user: UserProfile, access_token: &str) {
        let mut inner = self.inner.lock().await;

        // supersede any armed timer before installing the new one
        inner.refresh_timer = None;
        let context = self.weak.clone();
        inner.refresh_timer = Some(Arc::clone(&self.coordinator).schedule_proactive(
            access_token,
            move || {
                if let Some(context) = context.upgrade() {
                    tokio::spawn(async move { context.handle_renewal_failure().await });
                }
            },
        ));

        inner.state = SessionState::Authenticated;
        inner.user = Some(user);
        self.publish(&inner);
    }

    async fn enter_unauthenticated(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == SessionState::Unauthenticated {
            // re-entry is a no-op: no timer to cancel twice, no extra notify
            return;
        }

        inner.refresh_timer = None;
        inner.user = None;
        inner.state = SessionState::Unauthenticated;
        self.publish(&inner);
    }

    async fn set_state_authenticating(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = SessionState::Authenticating;
        self.publish(&inner);
    }

    async fn handle_renewal_failure(&self) {
        tracing::warn!("session renewal failed, tearing session down");
        self.store.clear();
        self.enter_unauthenticated().await;
    }

    fn publish(&self, inner: &ContextInner) {
        let snapshot = SessionSnapshot {
            state: inner.state,
            user: inner.user.clone(),
            navigation: if inner.state == SessionState::Authenticated {
                nav::ELEVATED_NAVIGATION
            } else {
                nav::BASE_NAVIGATION
            },
        };
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    async fn spawn_change_listener(&self) {
        let mut rx = self.store.subscribe();
        let store = Arc::clone(&self.store);
        let context = self.weak.clone();

        let listener = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(change) => {
                        if !store.is_external(&change) {
                            continue;
                        }
                        let Some(context) = context.upgrade() else { break };
                        tracing::debug!(
                            writer = change.writer,
                            "storage changed in another context"
                        );
                        context.check_auth().await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "storage events lagged, re-reading state");
                        let Some(context) = context.upgrade() else { break };
                        context.check_auth().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let mut inner = self.inner.lock().await;
        if let Some(previous) = inner.change_listener.replace(listener) {
            previous.abort();
        }
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        if let Some(listener) = self.inner.get_mut().change_listener.take() {
            listener.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStorage;

    fn new_context() -> Arc<SessionContext> {
        let store = Arc::new(SessionStore::single(Arc::new(MemoryStorage::new())));
        let identity = Arc::new(IdentityClient::new("http://127.0.0.1:1").unwrap());
        let coordinator = Arc::new(RefreshCoordinator::new(
            Arc::clone(&identity),
            Arc::clone(&store),
        ));
        SessionContext::new(store, identity, coordinator)
    }

    #[tokio::test]
    async fn test_starts_unknown_with_base_navigation() {
        let context = new_context();
        let snapshot = context.snapshot();

        assert_eq!(snapshot.state, SessionState::Unknown);
        assert!(snapshot.user.is_none());
        assert_eq!(snapshot.navigation, nav::BASE_NAVIGATION);
    }

    #[tokio::test]
    async fn test_empty_storage_initializes_unauthenticated() {
        let context = new_context();
        context.initialize().await;

        assert_eq!(context.state().await, SessionState::Unauthenticated);
        assert!(!context.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_reentering_unauthenticated_does_not_renotify() {
        let context = new_context();
        context.initialize().await;

        let mut rx = context.subscribe();
        rx.borrow_and_update();

        // a second teardown observes the state unchanged
        context.logout().await;
        assert!(!rx.has_changed().unwrap());
    }
}
