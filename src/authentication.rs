use std::sync::Arc;

use crate::db_helpers::get_user_by_id;
use crate::errors::RequestError;
use crate::models::{Role, User};
use crate::AppState;
use anyhow::{Context, Result};
use argon2::PasswordVerifier;
use argon2::{password_hash::SaltString, Argon2, PasswordHash};
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::errors::ErrorKind;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

const BEARER_PREFIX: &str = "Bearer ";

#[derive(Debug, Serialize, Deserialize)]
struct AuthClaim {
    sub: String,
    exp: i64,
}

/// Issues and verifies HS256 tokens whose subject is the user id.
#[derive(Clone)]
pub struct TokenService {
    secret: String,
    expiry: time::Duration,
}

impl TokenService {
    pub fn new(secret: impl Into<String>, expiry_days: i64) -> Self {
        Self {
            secret: secret.into(),
            expiry: time::Duration::days(expiry_days),
        }
    }

    pub fn issue(&self, user_id: i64) -> Result<String> {
        let expiry_date = OffsetDateTime::now_utc() + self.expiry;
        let claim = AuthClaim {
            sub: user_id.to_string(),
            exp: expiry_date.unix_timestamp(),
        };

        jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &claim,
            &jsonwebtoken::EncodingKey::from_secret(self.secret.as_ref()),
        )
        .context("Failed to generate jwt token")
    }

    pub fn verify(&self, token: &str) -> Result<i64, RequestError> {
        let token_data = jsonwebtoken::decode::<AuthClaim>(
            token,
            &jsonwebtoken::DecodingKey::from_secret(self.secret.as_ref()),
            &jsonwebtoken::Validation::default(),
        )
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => RequestError::NotAuthorized("Token expired"),
            _ => {
                tracing::debug!("Error verifying token: {}", e);
                RequestError::NotAuthorized("Invalid token")
            }
        })?;
        token_data
            .claims
            .sub
            .parse()
            .map_err(|_| RequestError::NotAuthorized("Invalid token"))
    }
}

/// The caller identified by a valid bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i64,
}

/// A caller whose account carries the admin role.
#[derive(Debug, Clone)]
pub struct AdminUser(pub User);

fn app_state(parts: &Parts) -> Result<Arc<AppState>, RequestError> {
    parts
        .extensions
        .get::<Arc<AppState>>()
        .cloned()
        .ok_or_else(|| RequestError::ServerError("application state is not installed".into()))
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync + 'static,
{
    type Rejection = RequestError;
    async fn from_request_parts(
        parts: &mut Parts,
        _: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get("Authorization")
            .ok_or(RequestError::NotAuthorized("Missing bearer token"))?;
        let header = header
            .to_str()
            .map_err(|_| RequestError::NotAuthorized("Invalid token"))?;
        let token = header
            .strip_prefix(BEARER_PREFIX)
            .ok_or(RequestError::NotAuthorized("Invalid token"))?;

        let state = app_state(parts)?;
        let id = state.tokens.verify(token)?;

        Ok(AuthUser { id })
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync + 'static,
{
    type Rejection = RequestError;
    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let AuthUser { id } = AuthUser::from_request_parts(parts, state).await?;
        let app = app_state(parts)?;
        let user = get_user_by_id(&app.pool, id)
            .await?
            .ok_or(RequestError::NotAuthorized("User no longer exists"))?;
        if !user.has_role(Role::Admin) {
            return Err(RequestError::Forbidden(
                "Only admins can perform this action",
            ));
        }
        Ok(AdminUser(user))
    }
}

pub async fn verify_password_argon2(password: String, hash: &str) -> Result<bool> {
    let hash = hash.to_owned();
    tokio::task::spawn_blocking(move || {
        let hash = PasswordHash::new(hash.as_str())
            .map_err(|_| anyhow::anyhow!("Failed to verify password"))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok())
    })
    .await
    .context("Failed to verify password")?
}

pub async fn hash_password_argon2(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(rand::thread_rng());
        let hash = PasswordHash::generate(Argon2::default(), password, salt.as_salt())
            .map_err(|_| anyhow::anyhow!("Failed to hash password"))?;
        Ok(hash.to_string())
    })
    .await
    .context("Failed to hash password")?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_carries_user_id() {
        let tokens = TokenService::new("secret", 1);
        let token = tokens.issue(42).unwrap();
        assert_eq!(tokens.verify(&token).unwrap(), 42);
    }

    #[test]
    fn token_signed_with_another_secret_is_rejected() {
        let token = TokenService::new("one", 1).issue(7).unwrap();
        let err = TokenService::new("two", 1).verify(&token).unwrap_err();
        assert!(matches!(err, RequestError::NotAuthorized("Invalid token")));
    }

    #[test]
    fn expired_token_is_rejected() {
        let tokens = TokenService::new("secret", -2);
        let token = tokens.issue(7).unwrap();
        assert!(matches!(
            tokens.verify(&token),
            Err(RequestError::NotAuthorized("Token expired"))
        ));
    }

    fn request_parts(authorization: Option<String>) -> Parts {
        let mut builder = axum::http::Request::builder().uri("/my-profile");
        if let Some(value) = authorization {
            builder = builder.header("Authorization", value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        parts.extensions.insert(Arc::new(AppState {
            pool: sqlx::SqlitePool::connect_lazy("sqlite::memory:").unwrap(),
            tokens: TokenService::new("secret", 1),
            images: crate::storage::ImageStore::new("unused-upload-dir"),
            request_timeout: std::time::Duration::from_secs(1),
        }));
        parts
    }

    #[tokio::test]
    async fn bearer_token_resolves_to_the_user_id() {
        let token = TokenService::new("secret", 1).issue(42).unwrap();
        let mut parts = request_parts(Some(format!("Bearer {token}")));

        let AuthUser { id } = AuthUser::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(id, 42);
    }

    #[tokio::test]
    async fn missing_or_malformed_header_is_unauthorized() {
        let mut parts = request_parts(None);
        assert!(matches!(
            AuthUser::from_request_parts(&mut parts, &()).await,
            Err(RequestError::NotAuthorized("Missing bearer token"))
        ));

        let mut parts = request_parts(Some("Token abc".to_owned()));
        assert!(matches!(
            AuthUser::from_request_parts(&mut parts, &()).await,
            Err(RequestError::NotAuthorized("Invalid token"))
        ));
    }

    #[tokio::test]
    async fn password_hash_verifies_only_the_original() {
        let hash = hash_password_argon2("correct horse".to_owned()).await.unwrap();
        assert!(verify_password_argon2("correct horse".to_owned(), &hash)
            .await
            .unwrap());
        assert!(!verify_password_argon2("battery staple".to_owned(), &hash)
            .await
            .unwrap());
    }
}
