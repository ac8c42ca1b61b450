mod authentication;
mod config;
mod data_formats;
mod db_helpers;
mod errors;
mod handlers;
mod models;
mod storage;

use std::{
    net::{SocketAddr, TcpListener},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
pub use anyhow::Result;
use axum::{routing::*, Extension, Router};
pub use config::{BootstrapAdmin, Config};
pub use data_formats::*;
use handlers::*;
use models::{Category, Tag};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use tower_http::trace::TraceLayer;

use crate::{authentication::TokenService, storage::ImageStore};

const MAX_CONNECTIONS: u32 = 8;

/// Shared by every handler through an `Extension` layer.
pub struct AppState {
    pub pool: SqlitePool,
    pub tokens: TokenService,
    pub images: ImageStore,
    pub request_timeout: Duration,
}

impl AppState {
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = init_db(&config.database_url).await?;
        let images = ImageStore::new(config.upload_dir.clone());
        tokio::fs::create_dir_all(images.root())
            .await
            .with_context(|| format!("Failed to create {}", images.root().display()))?;
        Ok(Self {
            pool,
            tokens: TokenService::new(&config.jwt_secret, config.jwt_expiry_days),
            images,
            request_timeout: config.request_timeout,
        })
    }
}

pub async fn run_app(config: Config) -> Result<()> {
    let state = AppState::from_config(&config).await?;
    if let Some(admin) = &config.bootstrap_admin {
        db_helpers::ensure_admin(&state.pool, admin).await?;
    }

    let app = make_router()
        .layer(Extension(Arc::new(state)))
        .layer(TraceLayer::new_for_http());

    tracing::info!("Server started on {}", config.bind_address);
    axum::Server::bind(&config.bind_address)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}

pub async fn init_db(db_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("Invalid database url {}", db_url))?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await
        .context("Failed to open the database")?;

    tracing::debug!("Running migrations");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Database ready at {}", db_url);
    Ok(pool)
}

pub fn get_random_free_port() -> Result<(u16, SocketAddr)> {
    let listener = TcpListener::bind("127.0.0.1:0").context("Could not get a free port")?;
    let addr = listener.local_addr()?;
    Ok((addr.port(), addr))
}

pub fn make_router() -> Router {
    Router::new()
        .route("/check_health", get(alive))
        .route("/register", post(register_user))
        .route("/login", post(login_user))
        .route("/change-password", patch(change_password))
        .route("/my-profile", get(my_profile))
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route(
            "/categories",
            get(list_taxonomy::<Category>).post(create_taxonomy::<Category>),
        )
        .route(
            "/categories/:id",
            get(get_taxonomy::<Category>)
                .put(update_taxonomy::<Category>)
                .delete(delete_taxonomy::<Category>),
        )
        .route(
            "/tags",
            get(list_taxonomy::<Tag>).post(create_taxonomy::<Tag>),
        )
        .route(
            "/tags/:id",
            get(get_taxonomy::<Tag>)
                .put(update_taxonomy::<Tag>)
                .delete(delete_taxonomy::<Tag>),
        )
        .route("/articles", get(list_articles).post(create_article))
        .route(
            "/articles/:id",
            get(get_article).put(update_article).delete(delete_article),
        )
        .route("/articles/slug/:slug", get(get_article_by_slug))
        .route("/articles/publish/:id", patch(publish_article))
        .route("/articles/unpublish/:id", patch(unpublish_article))
        .route(
            "/articles/:id/comments",
            get(list_comments).post(create_comment),
        )
        .route("/articles/comments/:id", delete(delete_comment))
        .route(
            "/articles/comments/:id/replies",
            get(list_replies).post(create_reply),
        )
        .route("/articles/comments/replies/:id", delete(delete_reply))
        .fallback(not_found)
}

/// Lowercases the title and turns each space into a hyphen.
pub fn slugify(title: &str) -> String {
    title.to_lowercase().replace(' ', "-")
}

/// True when the value is an absolute URL rather than a path inside the upload directory.
pub fn is_external_url(value: &str) -> bool {
    url::Url::parse(value).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_keeps_everything_but_spaces_and_case() {
        assert_eq!(slugify("Hello World"), "hello-world");
        assert_eq!(slugify("First Post"), "first-post");
        assert_eq!(slugify("Rust 2021: Async"), "rust-2021:-async");
    }

    #[test]
    fn external_urls_are_absolute() {
        assert!(is_external_url("https://cdn.example.com/a.png"));
        assert!(!is_external_url("cover.png"));
        assert!(!is_external_url("upload/cover.png"));
    }
}
