//! `/v1/tokens` handlers: logging in with e-mail and password.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use cinegate_core::{RequestContext, TokenRecord, TokenScope, UserId};
use cinegate_middleware::{Response, ResponseExt};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::users::{validate_email, validate_password};
use crate::app::AppState;
use crate::error::{AppError, AppResult};
use crate::password;
use crate::validation::Validator;

const AUTHENTICATION_TTL_HOURS: i64 = 24;

/// Body of `POST /v1/tokens/authentication`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialsInput {
    /// E-mail address the account was registered with.
    pub email: Option<String>,
    /// Plaintext password.
    pub password: Option<String>,
}

/// A freshly issued bearer token as returned to the client.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    /// Plaintext; only ever shown once.
    pub token: String,
    /// When the token stops working.
    pub expiry: DateTime<Utc>,
}

/// Stores a new authentication token for `user_id`.
pub(crate) fn issue_authentication_token(state: &AppState, user_id: UserId) -> IssuedToken {
    let (plaintext, record) = TokenRecord::issue(
        user_id,
        Duration::hours(AUTHENTICATION_TTL_HOURS),
        TokenScope::Authentication,
    );
    let issued = IssuedToken {
        token: plaintext.as_str().to_string(),
        expiry: record.expiry,
    };
    state.store.insert_token(record);
    issued
}

/// `POST /v1/tokens/authentication`: trades e-mail and password for a new
/// authentication token.
///
/// Unknown addresses and wrong passwords get the same 401.
pub async fn create_authentication_token(
    state: Arc<AppState>,
    ctx: RequestContext,
    input: CredentialsInput,
) -> AppResult<Response> {
    let email = input.email.unwrap_or_default().trim().to_string();
    let password = input.password.unwrap_or_default();

    let mut v = Validator::new();
    validate_email(&mut v, &email);
    validate_password(&mut v, &password);
    v.finish()?;

    let Some(account) = state.accounts.find_by_email(&email) else {
        tracing::debug!(request_id = %ctx.request_id(), "login for unknown address");
        return Err(AppError::InvalidCredentials);
    };
    if !password::verify(password, account.password_hash).await? {
        tracing::debug!(
            request_id = %ctx.request_id(),
            user_id = %account.id,
            "login with wrong password"
        );
        return Err(AppError::InvalidCredentials);
    }

    let issued = issue_authentication_token(&state, account.id);
    tracing::info!(
        request_id = %ctx.request_id(),
        user_id = %account.id,
        "authentication token issued"
    );
    Ok(Response::json(
        StatusCode::CREATED,
        &json!({ "authentication_token": issued }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinegate_core::{PlaintextToken, RequestId, TokenStore};

    use crate::mailer::MemoryMailer;

    fn login(email: &str, password: &str) -> CredentialsInput {
        CredentialsInput {
            email: Some(email.to_string()),
            password: Some(password.to_string()),
        }
    }

    async fn state_with_erin() -> Arc<AppState> {
        let state = Arc::new(AppState::new("testing", Arc::new(MemoryMailer::new())));
        let hash = password::hash("pa55word1234".to_string()).await.unwrap();
        state
            .accounts
            .register("Erin", "erin@example.com", hash, || state.store.create_user(true))
            .unwrap();
        state
    }

    #[tokio::test]
    async fn test_wrong_password_and_unknown_address_look_alike() {
        let state = state_with_erin().await;
        let ctx = RequestContext::new(RequestId::new());

        let wrong = create_authentication_token(
            Arc::clone(&state),
            ctx.clone(),
            login("erin@example.com", "not-the-password"),
        )
        .await;
        assert!(matches!(wrong, Err(AppError::InvalidCredentials)));

        let unknown = create_authentication_token(
            Arc::clone(&state),
            ctx,
            login("nobody@example.com", "pa55word1234"),
        )
        .await;
        assert!(matches!(unknown, Err(AppError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_issued_token_is_stored() {
        let state = state_with_erin().await;
        let issued = issue_authentication_token(&state, UserId::new(1));
        assert!(issued.expiry > Utc::now() + Duration::hours(23));

        let plaintext = PlaintextToken::parse(&issued.token).unwrap();
        let record = state
            .store
            .find_active_token(&plaintext.hash(), TokenScope::Authentication)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.user_id, UserId::new(1));
    }
}
