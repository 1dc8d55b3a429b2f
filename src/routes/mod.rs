//! API routes
//!
//! The presentation boundary: the live message sequence, `sendMessage`, and
//! the sign-in flows that gate them.

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::{
    AuthError, AuthOutcome, AuthState, AuthUser, PhoneCredential, PhoneVerification,
    SignUpProfile, VerificationId,
};
use crate::conversation::Message;
use crate::AppState;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct EmailSignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct GoogleSignInRequest {
    /// Empty when the user dismissed the account picker
    #[serde(default)]
    pub id_token: String,
}

#[derive(Debug, Serialize)]
pub struct VerificationResponse {
    pub verification_id: VerificationId,
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    BadRequest(String),
    Auth(AuthError),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Auth(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Sign in required".to_string()),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Auth(err) => {
                let status = match err {
                    AuthError::Validation(_) | AuthError::Cancelled => StatusCode::BAD_REQUEST,
                    AuthError::Rejected(_) => StatusCode::UNAUTHORIZED,
                    AuthError::Network(_) | AuthError::Decode(_) => StatusCode::BAD_GATEWAY,
                };
                (status, err.to_string())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl IntoResponse for AuthOutcome {
    fn into_response(self) -> Response {
        let status = match self {
            AuthOutcome::Failed { .. } => StatusCode::UNAUTHORIZED,
            AuthOutcome::Success { .. } | AuthOutcome::Cancelled => StatusCode::OK,
        };
        (status, Json(self)).into_response()
    }
}

fn require_user(state: &AppState) -> Result<AuthUser, ApiError> {
    state.auth.current_user().ok_or(ApiError::Unauthorized)
}

/// A successful sign-in opens a fresh conversation
fn after_sign_in(state: &AppState, outcome: AuthOutcome) -> AuthOutcome {
    if matches!(outcome, AuthOutcome::Success { .. }) {
        state.chats.reset();
    }
    outcome
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn list_messages(State(state): State<AppState>) -> Result<Json<Vec<Message>>, ApiError> {
    require_user(&state)?;
    Ok(Json(state.chats.current().messages().to_vec()))
}

async fn send_message(
    State(state): State<AppState>,
    Json(request): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let user = require_user(&state)?;

    if request.text.trim().is_empty() {
        return Err(ApiError::BadRequest("Message text is empty".into()));
    }

    let message = state.chats.current().send_message(request.text);
    tracing::debug!(
        uid = %user.uid,
        id = %message.id(),
        at = %message.created_at(),
        "Message submitted"
    );

    Ok((StatusCode::ACCEPTED, Json(message)))
}

async fn stream_messages(
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    require_user(&state)?;

    let events = state
        .chats
        .current()
        .observe()
        .map(|snapshot| Event::default().event("messages").json_data(&*snapshot));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn auth_state(State(state): State<AppState>) -> Json<AuthState> {
    Json(state.auth.state())
}

async fn sign_in_email(
    State(state): State<AppState>,
    Json(request): Json<EmailSignInRequest>,
) -> AuthOutcome {
    let outcome = state
        .auth
        .sign_in_with_email(&request.email, &request.password)
        .await;
    after_sign_in(&state, outcome)
}

async fn sign_up(
    State(state): State<AppState>,
    Json(profile): Json<SignUpProfile>,
) -> AuthOutcome {
    let outcome = state.auth.sign_up_with_email(&profile).await;
    after_sign_in(&state, outcome)
}

async fn sign_in_google(
    State(state): State<AppState>,
    Json(request): Json<GoogleSignInRequest>,
) -> AuthOutcome {
    let outcome = state.auth.sign_in_with_google(&request.id_token).await;
    after_sign_in(&state, outcome)
}

async fn send_phone_code(
    State(state): State<AppState>,
    Json(request): Json<PhoneVerification>,
) -> Result<Json<VerificationResponse>, ApiError> {
    let verification_id = state.auth.start_phone_verification(&request).await?;
    Ok(Json(VerificationResponse { verification_id }))
}

async fn sign_in_phone(
    State(state): State<AppState>,
    Json(credential): Json<PhoneCredential>,
) -> AuthOutcome {
    let outcome = state.auth.sign_in_with_phone(&credential).await;
    after_sign_in(&state, outcome)
}

async fn sign_out(State(state): State<AppState>) -> StatusCode {
    state.auth.sign_out();
    state.chats.reset();
    StatusCode::NO_CONTENT
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/v1/messages", get(list_messages).post(send_message))
        .route("/v1/messages/stream", get(stream_messages))
        .route("/v1/auth/user", get(auth_state))
        .route("/v1/auth/sign-in/email", post(sign_in_email))
        .route("/v1/auth/sign-up", post(sign_up))
        .route("/v1/auth/sign-in/google", post(sign_in_google))
        .route("/v1/auth/phone/code", post(send_phone_code))
        .route("/v1/auth/sign-in/phone", post(sign_in_phone))
        .route("/v1/auth/sign-out", post(sign_out))
}
