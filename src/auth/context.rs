use std::sync::Arc;

use tokio::sync::watch;

use crate::auth::identity::{AuthError, IdentityProvider, Session};
use crate::issues::domain::UserId;

/// Process-wide view of who is signed in.
///
/// Built once from the identity provider and then only read by dependents;
/// clones share the same underlying state. Sign-out tears it down for every
/// holder at once.
#[derive(Clone)]
pub struct SessionContext {
    tx: Arc<watch::Sender<Option<Session>>>,
}

impl SessionContext {
    pub fn anonymous() -> Self {
        Self::from_session(None)
    }

    pub fn signed_in(session: Session) -> Self {
        Self::from_session(Some(session))
    }

    fn from_session(session: Option<Session>) -> Self {
        let (tx, _rx) = watch::channel(session);
        Self { tx: Arc::new(tx) }
    }

    /// Resolve a stored token into a context. An unknown or expired token
    /// yields an anonymous context.
    pub async fn initialize(
        provider: &dyn IdentityProvider,
        token: Option<&str>,
    ) -> Result<Self, AuthError> {
        let Some(token) = token else {
            return Ok(Self::anonymous());
        };
        match provider.current(token).await? {
            Some(session) => Ok(Self::signed_in(session)),
            None => {
                tracing::debug!("Stored session is no longer valid");
                Ok(Self::anonymous())
            }
        }
    }

    pub fn current(&self) -> Option<Session> {
        self.tx.borrow().clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.tx
            .borrow()
            .as_ref()
            .map(|s| UserId::new(s.user.user_id.clone()))
    }

    pub fn is_admin(&self) -> bool {
        self.tx.borrow().as_ref().is_some_and(|s| s.user.is_admin())
    }

    pub fn set(&self, session: Option<Session>) {
        self.tx.send_replace(session);
    }

    pub async fn sign_out(&self, provider: &dyn IdentityProvider) -> Result<(), AuthError> {
        let previous = self.tx.send_replace(None);
        if let Some(session) = previous {
            provider.sign_out(&session.token).await?;
        }
        Ok(())
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.tx.subscribe()
    }
}
