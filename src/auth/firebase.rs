//! Firebase Authentication over the Identity Toolkit REST API
//!
//! The signed-in user is kept in memory only; restarting the process signs
//! the user out.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::AuthConfig;

use super::{
    AuthError, AuthUser, IdentityProvider, PhoneCredential, PhoneVerification, SignUpProfile,
    VerificationId,
};

/// Account fields returned by the sign-in and sign-up methods
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    phone_number: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
}

impl From<AccountResponse> for AuthUser {
    fn from(account: AccountResponse) -> Self {
        Self {
            uid: account.local_id,
            email: account.email.filter(|e| !e.is_empty()),
            display_name: account.display_name.filter(|n| !n.is_empty()),
            phone_number: account.phone_number,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionInfoResponse {
    session_info: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

/// Human-readable text for Identity Toolkit error codes
fn describe_error_code(raw: &str) -> String {
    // Codes may carry detail after " : ", e.g. "WEAK_PASSWORD : Password should be..."
    let (code, detail) = match raw.split_once(" : ") {
        Some((code, detail)) => (code.trim(), Some(detail.trim())),
        None => (raw.trim(), None),
    };

    let message = match code {
        "EMAIL_NOT_FOUND" | "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" => {
            "The email address or password is incorrect."
        }
        "USER_DISABLED" => "This account has been disabled.",
        "EMAIL_EXISTS" => "The email address is already in use by another account.",
        "INVALID_EMAIL" => "The email address is badly formatted.",
        "WEAK_PASSWORD" => "The password must be at least 6 characters.",
        "INVALID_CODE" => "The verification code is invalid.",
        "SESSION_EXPIRED" | "INVALID_SESSION_INFO" => {
            "The verification code has expired. Request a new one."
        }
        "INVALID_PHONE_NUMBER" => "The phone number is invalid.",
        "INVALID_IDP_RESPONSE" => "The Google credential is invalid or has expired.",
        "TOO_MANY_ATTEMPTS_TRY_LATER" => "Too many attempts. Try again later.",
        _ => return detail.map_or_else(|| raw.to_string(), |d| format!("{code}: {d}")),
    };
    message.to_string()
}

pub struct FirebaseIdentityProvider {
    client: Client,
    base_url: String,
    api_key: String,
    current: RwLock<Option<AuthUser>>,
}

impl FirebaseIdentityProvider {
    pub fn new(base_url: &str, api_key: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            current: RwLock::new(None),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        let api_key = config
            .firebase_api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| AuthError::Validation("FIREBASE_API_KEY is not set".into()))?;
        Ok(Self::new(&config.base_url, api_key))
    }

    /// POST to `accounts:{method}` and decode the reply
    async fn call<B, R>(&self, method: &str, body: &B) -> Result<R, AuthError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self
            .client
            .post(format!("{}/accounts:{}", self.base_url, method))
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .send()
            .await
            .map_err(|e| AuthError::Network(e.without_url()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AuthError::Network(e.without_url()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .map(|envelope| describe_error_code(&envelope.error.message))
                .unwrap_or_else(|_| format!("Identity provider returned HTTP {}", status.as_u16()));
            tracing::debug!(method, status = status.as_u16(), %message, "Identity provider rejected request");
            return Err(AuthError::Rejected(message));
        }

        serde_json::from_str(&text).map_err(|e| AuthError::Decode(e.to_string()))
    }

    fn remember(&self, user: AuthUser) -> AuthUser {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(user.clone());
        user
    }
}

fn require_credentials(email: &str, password: &str) -> Result<(), AuthError> {
    if email.trim().is_empty() || password.is_empty() {
        return Err(AuthError::Validation(
            "Email and password are required.".into(),
        ));
    }
    Ok(())
}

#[async_trait]
impl IdentityProvider for FirebaseIdentityProvider {
    fn current_user(&self) -> Option<AuthUser> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn sign_out(&self) {
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    async fn sign_in_with_email(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        require_credentials(email, password)?;

        let account: AccountResponse = self
            .call(
                "signInWithPassword",
                &PasswordRequest {
                    email: email.trim(),
                    password,
                    return_secure_token: true,
                },
            )
            .await?;

        Ok(self.remember(account.into()))
    }

    async fn sign_up_with_email(&self, profile: &SignUpProfile) -> Result<AuthUser, AuthError> {
        require_credentials(&profile.email, &profile.password)?;

        let account: AccountResponse = self
            .call(
                "signUp",
                &PasswordRequest {
                    email: profile.email.trim(),
                    password: &profile.password,
                    return_secure_token: true,
                },
            )
            .await?;

        let display_name = profile.display_name();
        let id_token = account.id_token.clone();

        // The account exists from here on, whatever happens to the profile update.
        let mut user = self.remember(AuthUser::from(account));

        if let Some(id_token) = id_token.filter(|_| !display_name.is_empty()) {
            let update: Result<serde_json::Value, AuthError> = self
                .call(
                    "update",
                    &json!({
                        "idToken": id_token,
                        "displayName": display_name,
                        "returnSecureToken": false,
                    }),
                )
                .await;

            match update {
                Ok(_) => {
                    user.display_name = Some(display_name);
                    user = self.remember(user);
                }
                Err(e) => {
                    tracing::warn!(uid = %user.uid, error = %e, "Failed to set display name after sign-up");
                }
            }
        }

        Ok(user)
    }

    async fn sign_in_with_google(&self, id_token: &str) -> Result<AuthUser, AuthError> {
        if id_token.is_empty() {
            return Err(AuthError::Cancelled);
        }

        let account: AccountResponse = self
            .call(
                "signInWithIdp",
                &json!({
                    "postBody": format!("id_token={id_token}&providerId=google.com"),
                    "requestUri": "http://localhost",
                    "returnIdpCredential": true,
                    "returnSecureToken": true,
                }),
            )
            .await?;

        Ok(self.remember(account.into()))
    }

    async fn start_phone_verification(
        &self,
        request: &PhoneVerification,
    ) -> Result<VerificationId, AuthError> {
        let phone_number = request.phone_number.trim();
        if !phone_number.starts_with('+') {
            return Err(AuthError::Validation(
                "Phone numbers must be in E.164 format, e.g. +15555550100.".into(),
            ));
        }

        let mut body = json!({ "phoneNumber": phone_number });
        if let Some(token) = &request.recaptcha_token {
            body["recaptchaToken"] = json!(token);
        }

        let response: SessionInfoResponse = self.call("sendVerificationCode", &body).await?;
        Ok(VerificationId(response.session_info))
    }

    async fn sign_in_with_phone(&self, credential: &PhoneCredential) -> Result<AuthUser, AuthError> {
        if credential.code.trim().is_empty() {
            return Err(AuthError::Validation("Enter the verification code.".into()));
        }

        let account: AccountResponse = self
            .call(
                "signInWithPhoneNumber",
                &json!({
                    "sessionInfo": credential.verification_id.0,
                    "code": credential.code.trim(),
                }),
            )
            .await?;

        Ok(self.remember(account.into()))
    }
}
