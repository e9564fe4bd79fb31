//! `/v1/users` handlers: registration and activation.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use cinegate_core::{PlaintextToken, RequestContext, TokenScope, TokenStore, TOKEN_PLAINTEXT_LEN};
use cinegate_middleware::{Response, ResponseExt};
use http::StatusCode;
use serde::Deserialize;
use serde_json::json;

use super::tokens::issue_authentication_token;
use super::MOVIES_READ;
use crate::app::AppState;
use crate::error::{AppError, AppResult};
use crate::mailer::{send_with_retry, welcome_email};
use crate::password::{self, MAX_PASSWORD_BYTES, MIN_PASSWORD_BYTES};
use crate::validation::{looks_like_email, Validator};

const ACTIVATION_TTL_DAYS: i64 = 3;
const MAIL_ATTEMPTS: u32 = 3;
const MAIL_BACKOFF: StdDuration = StdDuration::from_millis(500);

/// Body of `POST /v1/users`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterInput {
    /// Display name.
    pub name: Option<String>,
    /// E-mail address.
    pub email: Option<String>,
    /// Plaintext password, hashed before it is stored.
    pub password: Option<String>,
}

/// Body of `PUT /v1/users/activated`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActivateInput {
    /// Plaintext activation token from the welcome e-mail.
    pub token: Option<String>,
}

/// `POST /v1/users`: creates an inactive account and mails its activation
/// token in the background.
///
/// If the welcome e-mail cannot be scheduled the account is rolled back, so
/// the address stays free for a retry.
pub async fn register(
    state: Arc<AppState>,
    ctx: RequestContext,
    input: RegisterInput,
) -> AppResult<Response> {
    let name = input.name.unwrap_or_default().trim().to_string();
    let email = input.email.unwrap_or_default().trim().to_string();
    let password = input.password.unwrap_or_default();

    let mut v = Validator::new();
    v.check(!name.is_empty(), "name", "must be provided");
    v.check(name.len() <= 500, "name", "must not be more than 500 bytes long");
    validate_email(&mut v, &email);
    validate_password(&mut v, &password);
    v.finish()?;

    let password_hash = password::hash(password).await?;
    let account = state.accounts.register(&name, &email, password_hash, || {
        state.store.create_user(false)
    })?;
    state.store.grant(account.id, [MOVIES_READ]);
    let token = state.store.issue_token(
        account.id,
        Duration::days(ACTIVATION_TTL_DAYS),
        TokenScope::Activation,
    );

    let message = welcome_email(&account.email, account.id, &token);
    let mailer = Arc::clone(&state.mailer);
    let scheduled = state.tasks.spawn("welcome-email", async move {
        send_with_retry(mailer.as_ref(), &message, MAIL_ATTEMPTS, MAIL_BACKOFF).await
    });
    if let Err(err) = scheduled {
        state.accounts.remove(account.id);
        state.store.delete_user(account.id);
        tracing::warn!(
            request_id = %ctx.request_id(),
            user_id = %account.id,
            "registration rolled back, welcome e-mail not scheduled"
        );
        return Err(err.into());
    }

    tracing::info!(
        request_id = %ctx.request_id(),
        user_id = %account.id,
        "user registered"
    );
    Ok(Response::json(
        StatusCode::ACCEPTED,
        &json!({ "user": account }),
    ))
}

pub(super) fn validate_email(v: &mut Validator, email: &str) {
    v.check(!email.is_empty(), "email", "must be provided");
    v.check(
        looks_like_email(email),
        "email",
        "must be a valid email address",
    );
}

pub(super) fn validate_password(v: &mut Validator, password: &str) {
    v.check(!password.is_empty(), "password", "must be provided");
    v.check(
        password.len() >= MIN_PASSWORD_BYTES,
        "password",
        "must be at least 8 bytes long",
    );
    v.check(
        password.len() <= MAX_PASSWORD_BYTES,
        "password",
        "must not be more than 72 bytes long",
    );
}

/// `PUT /v1/users/activated`: redeems an activation token and hands back an
/// authentication token.
pub async fn activate(
    state: Arc<AppState>,
    ctx: RequestContext,
    input: ActivateInput,
) -> AppResult<Response> {
    let token = input.token.unwrap_or_default();

    let mut v = Validator::new();
    v.check(!token.is_empty(), "token", "must be provided");
    v.check(
        token.len() == TOKEN_PLAINTEXT_LEN,
        "token",
        "must be 24 bytes long",
    );
    v.finish()?;

    let record = match PlaintextToken::parse(&token) {
        Some(plaintext) => {
            state
                .store
                .find_active_token(&plaintext.hash(), TokenScope::Activation)
                .await?
        }
        None => None,
    };
    let invalid = || AppError::invalid("token", "invalid or expired activation token");
    let record = record.ok_or_else(invalid)?;
    let account = state.accounts.activate(record.user_id).ok_or_else(invalid)?;

    state.store.set_activated(record.user_id, true)?;
    state
        .store
        .delete_tokens_for_user(record.user_id, TokenScope::Activation);

    let issued = issue_authentication_token(&state, record.user_id);

    tracing::info!(
        request_id = %ctx.request_id(),
        user_id = %record.user_id,
        "user activated"
    );
    Ok(Response::json(
        StatusCode::OK,
        &json!({
            "user": account,
            "authentication_token": issued,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinegate_core::{PermissionStore, RequestId, UserStore};

    use crate::mailer::MemoryMailer;

    fn dana() -> RegisterInput {
        RegisterInput {
            name: Some("Dana".to_string()),
            email: Some("dana@example.com".to_string()),
            password: Some("pa55word1234".to_string()),
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new(RequestId::new())
    }

    #[tokio::test]
    async fn test_registration_during_shutdown_leaves_nothing_behind() {
        let mailer = Arc::new(MemoryMailer::new());
        let state = Arc::new(AppState::new("testing", mailer.clone()));
        state.tasks.close();

        let err = register(Arc::clone(&state), ctx(), dana()).await.unwrap_err();
        assert!(matches!(err, AppError::Unavailable(_)));
        assert!(state.accounts.is_empty());
        assert!(state.accounts.find_by_email("dana@example.com").is_none());

        let first_id = cinegate_core::UserId::new(1);
        assert!(state.store.find_user(first_id).await.unwrap().is_none());
        assert!(state.store.permissions_for(first_id).await.unwrap().is_empty());
        assert_eq!(state.store.delete_tokens_for_user(first_id, TokenScope::Activation), 0);

        let retry = register(Arc::clone(&state), ctx(), dana()).await.unwrap_err();
        assert!(matches!(retry, AppError::Unavailable(_)));
        assert!(mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_password_rules() {
        let state = Arc::new(AppState::new("testing", Arc::new(MemoryMailer::new())));
        let long = "x".repeat(73);
        for (password, message) in [
            (None, "must be provided"),
            (Some("short"), "must be at least 8 bytes long"),
            (Some(long.as_str()), "must not be more than 72 bytes long"),
        ] {
            let input = RegisterInput {
                password: password.map(str::to_string),
                ..dana()
            };
            match register(Arc::clone(&state), ctx(), input).await {
                Err(AppError::Validation(fields)) => assert_eq!(fields["password"], message),
                other => panic!("unexpected result: {other:?}"),
            }
        }
        assert!(state.accounts.is_empty());
    }
}
