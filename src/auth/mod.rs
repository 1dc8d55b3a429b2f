//! Identity provider boundary
//!
//! Sign-in is delegated to an [`IdentityProvider`]. [`AuthSession`] wraps a
//! provider as an explicit value, tracks the [`AuthState`] the sign-in screen
//! renders, and reports every flow through a single [`AuthOutcome`].

mod firebase;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

pub use firebase::FirebaseIdentityProvider;

/// The signed-in account as reported by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

/// Details collected by the sign-up form
#[derive(Debug, Clone, Deserialize)]
pub struct SignUpProfile {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

impl SignUpProfile {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }
}

/// Request to send a one-time code by SMS
#[derive(Debug, Clone, Deserialize)]
pub struct PhoneVerification {
    pub phone_number: String,
    #[serde(default)]
    pub recaptcha_token: Option<String>,
}

/// Handle returned when a code has been sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VerificationId(pub String);

/// Verification handle plus the code the user typed
#[derive(Debug, Clone, Deserialize)]
pub struct PhoneCredential {
    pub verification_id: VerificationId,
    pub code: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Rejected(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Sign-in cancelled")]
    Cancelled,

    #[error("Invalid response from identity provider: {0}")]
    Decode(String),

    #[error("{0}")]
    Validation(String),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The signed-in user, if any
    fn current_user(&self) -> Option<AuthUser>;

    fn sign_out(&self);

    async fn sign_in_with_email(&self, email: &str, password: &str) -> Result<AuthUser, AuthError>;

    async fn sign_up_with_email(&self, profile: &SignUpProfile) -> Result<AuthUser, AuthError>;

    /// Exchange a Google id token. An empty token means the account picker
    /// was dismissed.
    async fn sign_in_with_google(&self, id_token: &str) -> Result<AuthUser, AuthError>;

    async fn start_phone_verification(
        &self,
        request: &PhoneVerification,
    ) -> Result<VerificationId, AuthError>;

    async fn sign_in_with_phone(&self, credential: &PhoneCredential) -> Result<AuthUser, AuthError>;
}

/// Terminal result of a sign-in flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum AuthOutcome {
    Success { user: AuthUser },
    #[serde(rename = "error")]
    Failed { message: String },
    Cancelled,
}

/// What the sign-in screen shows
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum AuthState {
    Idle,
    Loading,
    Success { user: AuthUser },
    Error { message: String },
}

pub struct AuthSession {
    provider: Arc<dyn IdentityProvider>,
    state: watch::Sender<AuthState>,
}

impl AuthSession {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        let initial = match provider.current_user() {
            Some(user) => AuthState::Success { user },
            None => AuthState::Idle,
        };
        let (state, _) = watch::channel(initial);
        Self { provider, state }
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn current_user(&self) -> Option<AuthUser> {
        self.provider.current_user()
    }

    pub async fn sign_in_with_email(&self, email: &str, password: &str) -> AuthOutcome {
        self.run("Email sign-in", self.provider.sign_in_with_email(email, password))
            .await
    }

    pub async fn sign_up_with_email(&self, profile: &SignUpProfile) -> AuthOutcome {
        self.run("Email sign-up", self.provider.sign_up_with_email(profile))
            .await
    }

    pub async fn sign_in_with_google(&self, id_token: &str) -> AuthOutcome {
        self.run("Google sign-in", self.provider.sign_in_with_google(id_token))
            .await
    }

    /// Send a one-time code. The auth state is left untouched.
    pub async fn start_phone_verification(
        &self,
        request: &PhoneVerification,
    ) -> Result<VerificationId, AuthError> {
        self.provider.start_phone_verification(request).await
    }

    pub async fn sign_in_with_phone(&self, credential: &PhoneCredential) -> AuthOutcome {
        self.run("Phone sign-in", self.provider.sign_in_with_phone(credential))
            .await
    }

    pub fn sign_out(&self) {
        self.provider.sign_out();
        self.state.send_replace(AuthState::Idle);
        tracing::info!("Signed out");
    }

    async fn run<F>(&self, flow: &'static str, attempt: F) -> AuthOutcome
    where
        F: Future<Output = Result<AuthUser, AuthError>>,
    {
        self.state.send_replace(AuthState::Loading);
        let mut pending = PendingFlow {
            state: &self.state,
            flow,
            settled: false,
        };

        let result = attempt.await;
        pending.settled = true;

        match result {
            Ok(user) => {
                tracing::info!(uid = %user.uid, "{flow} succeeded");
                self.state
                    .send_replace(AuthState::Success { user: user.clone() });
                AuthOutcome::Success { user }
            }
            Err(AuthError::Cancelled) => {
                tracing::debug!("{flow} cancelled");
                self.state.send_replace(AuthState::Idle);
                AuthOutcome::Cancelled
            }
            Err(e) => {
                let mut message = e.to_string();
                if message.is_empty() {
                    message = format!("{flow} failed");
                }
                tracing::warn!(error = %message, "{flow} failed");
                self.state.send_replace(AuthState::Error {
                    message: message.clone(),
                });
                AuthOutcome::Failed { message }
            }
        }
    }
}

/// Puts the state back to `Idle` when a flow is dropped before it settles,
/// e.g. when the HTTP client disconnects mid-request.
struct PendingFlow<'a> {
    state: &'a watch::Sender<AuthState>,
    flow: &'static str,
    settled: bool,
}

impl Drop for PendingFlow<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!("{} abandoned", self.flow);
            self.state.send_replace(AuthState::Idle);
        }
    }
}
