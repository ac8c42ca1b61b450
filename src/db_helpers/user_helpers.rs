use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::SqlitePool;

use crate::{
    authentication::{hash_password_argon2, verify_password_argon2},
    config::BootstrapAdmin,
    data_formats::{ChangePasswordRequest, RegisterRequest, UpdateUserRequest},
    errors::RequestError,
    models::{Role, User},
};

use super::{get_user_by_email, get_user_by_id, USER_COLUMNS};

const MIN_PASSWORD_LENGTH: usize = 8;

static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9._%+\-]+@[a-z0-9.\-]+\.[a-z]{2,4}$").expect("email regex is valid")
});

pub fn is_email_valid(email: &str) -> bool {
    EMAIL_REGEX.is_match(email)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_password(password: &str, errors: &mut Vec<String>) {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        errors.push(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        ));
    }
}

/// Validates and stores a new account, collecting every problem before failing.
pub async fn register_user_in_db(
    pool: &SqlitePool,
    RegisterRequest {
        name,
        email,
        password,
    }: RegisterRequest,
    role: Role,
) -> Result<User, RequestError> {
    let name = name.trim().to_owned();
    let email = normalize_email(&email);

    let mut errors = Vec::new();
    if name.is_empty() {
        errors.push("name is required".to_owned());
    }
    if !is_email_valid(&email) {
        errors.push("email is not valid".to_owned());
    } else if get_user_by_email(pool, &email).await?.is_some() {
        errors.push("email is already used".to_owned());
    }
    validate_password(&password, &mut errors);
    if !errors.is_empty() {
        return Err(RequestError::Validation(errors));
    }

    let password = hash_password_argon2(password).await?;
    let query = format!(
        "INSERT INTO users (name, email, password, role) VALUES ($1, $2, $3, $4) RETURNING {USER_COLUMNS}"
    );
    let user = sqlx::query_as::<_, User>(&query)
        .bind(name)
        .bind(email)
        .bind(password)
        .bind(role)
        .fetch_one(pool)
        .await
        .map_err(|e| {
            if RequestError::is_unique_violation(&e) {
                RequestError::validation("email is already used")
            } else {
                e.into()
            }
        })?;
    tracing::info!(user_id = user.id, "Registered user");
    Ok(user)
}

pub async fn list_users_in_db(pool: &SqlitePool) -> Result<Vec<User>, RequestError> {
    let query = format!("SELECT {USER_COLUMNS} FROM users ORDER BY id");
    let users = sqlx::query_as::<_, User>(&query).fetch_all(pool).await?;
    Ok(users)
}

pub async fn update_user_in_db(
    pool: &SqlitePool,
    id: i64,
    UpdateUserRequest { name, email, role }: UpdateUserRequest,
) -> Result<User, RequestError> {
    let name = name.map(|name| name.trim().to_owned());
    let email = email.as_deref().map(normalize_email);

    let mut errors = Vec::new();
    if matches!(&name, Some(name) if name.is_empty()) {
        errors.push("name is required".to_owned());
    }
    if matches!(&email, Some(email) if !is_email_valid(email)) {
        errors.push("email is not valid".to_owned());
    }
    if !errors.is_empty() {
        return Err(RequestError::Validation(errors));
    }

    let result = sqlx::query(
        r#"
        UPDATE users
        SET name = COALESCE($1, name),
            email = COALESCE($2, email),
            role = COALESCE($3, role),
            updated_at = CURRENT_TIMESTAMP
        WHERE id = $4
        "#,
    )
    .bind(name)
    .bind(email)
    .bind(role)
    .bind(id)
    .execute(pool)
    .await
    .map_err(|e| {
        if RequestError::is_unique_violation(&e) {
            RequestError::validation("email is already used")
        } else {
            e.into()
        }
    })?;
    if result.rows_affected() == 0 {
        return Err(RequestError::NotFound("User not found"));
    }

    get_user_by_id(pool, id)
        .await?
        .ok_or(RequestError::NotFound("User not found"))
}

pub async fn change_password_in_db(
    pool: &SqlitePool,
    id: i64,
    ChangePasswordRequest {
        current_password,
        new_password,
    }: ChangePasswordRequest,
) -> Result<User, RequestError> {
    let user = get_user_by_id(pool, id)
        .await?
        .ok_or(RequestError::NotFound("User not found"))?;

    let mut errors = Vec::new();
    if !verify_password_argon2(current_password, &user.password).await? {
        errors.push("current password is incorrect".to_owned());
    }
    validate_password(&new_password, &mut errors);
    if !errors.is_empty() {
        return Err(RequestError::Validation(errors));
    }

    let password = hash_password_argon2(new_password).await?;
    sqlx::query("UPDATE users SET password = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2")
        .bind(password)
        .bind(id)
        .execute(pool)
        .await?;
    tracing::info!(user_id = id, "Password changed");

    get_user_by_id(pool, id)
        .await?
        .ok_or(RequestError::NotFound("User not found"))
}

/// Deletes an account that no longer owns any content.
pub async fn delete_user_in_db(pool: &SqlitePool, id: i64) -> Result<(), RequestError> {
    let mut tx = pool.begin().await?;
    let locked = sqlx::query("UPDATE users SET updated_at = updated_at WHERE id = $1")
        .bind(id)
        .execute(&mut tx)
        .await?;
    if locked.rows_affected() == 0 {
        return Err(RequestError::NotFound("User not found"));
    }

    let owned: i64 = sqlx::query_scalar(
        r#"
        SELECT (SELECT COUNT(*) FROM articles WHERE user_id = $1)
             + (SELECT COUNT(*) FROM comments WHERE user_id = $1)
        "#,
    )
    .bind(id)
    .fetch_one(&mut tx)
    .await?;
    if owned > 0 {
        return Err(RequestError::validation(
            "user still owns articles or comments",
        ));
    }

    let result = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(id)
        .execute(&mut tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(RequestError::NotFound("User not found"));
    }

    tx.commit().await?;
    Ok(())
}

/// Creates the configured admin account unless its email is already registered.
pub async fn ensure_admin(pool: &SqlitePool, admin: &BootstrapAdmin) -> Result<(), RequestError> {
    if let Some(user) = get_user_by_email(pool, &admin.email).await? {
        if !user.has_role(Role::Admin) {
            tracing::warn!(
                "Bootstrap admin {} exists without the admin role; leaving it untouched",
                user.email
            );
        }
        return Ok(());
    }
    let request = RegisterRequest {
        name: admin.name.clone(),
        email: admin.email.clone(),
        password: admin.password.clone(),
    };
    let user = register_user_in_db(pool, request, Role::Admin).await?;
    tracing::info!("Created bootstrap admin {}", user.email);
    Ok(())
}
