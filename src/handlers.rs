use std::{future::Future, sync::Arc, time::Duration};

use axum::{
    extract::{Path, Query},
    http::{StatusCode, Uri},
    Extension, Json,
};
use serde::Serialize;

use crate::{
    authentication::{verify_password_argon2, AdminUser, AuthUser},
    data_formats::{
        ApiResponse, ArticleQueryParams, ArticleResponse, AuthorResponse, ChangePasswordRequest,
        CommentRequest, CommentResponse, CreateArticleRequest, CreateUserRequest, LoginRequest,
        RegisterRequest, ReplyResponse, TaxonomyRequest, TokenResponse, UpdateArticleRequest,
        UpdateUserRequest,
    },
    db_helpers::{self, TaxonomyEntity},
    errors::RequestError,
    models::{Role, User},
    AppState,
};

type JsonResult<T> = Result<ApiResponse<T>, RequestError>;

/// Bounds read paths that expand many rows by the configured request timeout.
async fn with_timeout<T>(
    limit: Duration,
    work: impl Future<Output = Result<T, RequestError>>,
) -> Result<T, RequestError> {
    tokio::time::timeout(limit, work)
        .await
        .map_err(|_| RequestError::Timeout)?
}

async fn load_user(state: &AppState, id: i64) -> Result<User, RequestError> {
    db_helpers::get_user_by_id(&state.pool, id)
        .await?
        .ok_or(RequestError::NotFound("User not found"))
}

// ----------------- Helper Handlers -----------------
pub async fn alive() -> &'static str {
    "alive"
}

pub async fn not_found(uri: Uri) -> ApiResponse<String> {
    ApiResponse::new(
        StatusCode::NOT_FOUND,
        format!("URL {} provided was not found", uri),
    )
}

// ----------------- Auth Handlers -----------------
pub async fn register_user(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> JsonResult<TokenResponse> {
    let user = db_helpers::register_user_in_db(&state.pool, request, Role::User).await?;
    let token = state.tokens.issue(user.id)?;
    Ok(ApiResponse::created(TokenResponse { token }))
}

pub async fn login_user(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> JsonResult<TokenResponse> {
    let user = db_helpers::get_user_by_email(&state.pool, &request.email)
        .await?
        .ok_or(RequestError::NotAuthorized("Invalid email or password"))?;
    if !verify_password_argon2(request.password, &user.password).await? {
        return Err(RequestError::NotAuthorized("Invalid email or password"));
    }
    let token = state.tokens.issue(user.id)?;
    tracing::info!(user_id = user.id, "User logged in");
    Ok(ApiResponse::ok(TokenResponse { token }))
}

pub async fn change_password(
    Extension(state): Extension<Arc<AppState>>,
    AuthUser { id }: AuthUser,
    Json(request): Json<ChangePasswordRequest>,
) -> JsonResult<User> {
    let user = db_helpers::change_password_in_db(&state.pool, id, request).await?;
    Ok(ApiResponse::ok(user))
}

pub async fn my_profile(
    Extension(state): Extension<Arc<AppState>>,
    AuthUser { id }: AuthUser,
) -> JsonResult<User> {
    Ok(ApiResponse::ok(load_user(&state, id).await?))
}

// ----------------- User Handlers -----------------
pub async fn list_users(
    Extension(state): Extension<Arc<AppState>>,
    _: AdminUser,
) -> JsonResult<Vec<User>> {
    Ok(ApiResponse::ok(db_helpers::list_users_in_db(&state.pool).await?))
}

pub async fn get_user(
    Extension(state): Extension<Arc<AppState>>,
    _: AdminUser,
    Path(id): Path<i64>,
) -> JsonResult<User> {
    Ok(ApiResponse::ok(load_user(&state, id).await?))
}

pub async fn create_user(
    Extension(state): Extension<Arc<AppState>>,
    _: AdminUser,
    Json(CreateUserRequest {
        name,
        email,
        password,
        role,
    }): Json<CreateUserRequest>,
) -> JsonResult<User> {
    let request = RegisterRequest {
        name,
        email,
        password,
    };
    let user =
        db_helpers::register_user_in_db(&state.pool, request, role.unwrap_or_default()).await?;
    Ok(ApiResponse::created(user))
}

pub async fn update_user(
    Extension(state): Extension<Arc<AppState>>,
    _: AdminUser,
    Path(id): Path<i64>,
    Json(request): Json<UpdateUserRequest>,
) -> JsonResult<User> {
    let user = db_helpers::update_user_in_db(&state.pool, id, request).await?;
    Ok(ApiResponse::ok(user))
}

pub async fn delete_user(
    Extension(state): Extension<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
) -> JsonResult<bool> {
    if admin.id == id {
        return Err(RequestError::Forbidden("Admins cannot delete themselves"));
    }
    db_helpers::delete_user_in_db(&state.pool, id).await?;
    Ok(ApiResponse::ok(true))
}

// ----------------- Category / Tag Handlers -----------------
pub async fn list_taxonomy<T: TaxonomyEntity + Serialize>(
    Extension(state): Extension<Arc<AppState>>,
) -> JsonResult<Vec<T>> {
    Ok(ApiResponse::ok(
        db_helpers::list_taxonomy_in_db::<T>(&state.pool).await?,
    ))
}

pub async fn get_taxonomy<T: TaxonomyEntity + Serialize>(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<i64>,
) -> JsonResult<T> {
    Ok(ApiResponse::ok(
        db_helpers::get_taxonomy_in_db::<T>(&state.pool, id).await?,
    ))
}

pub async fn create_taxonomy<T: TaxonomyEntity + Serialize>(
    Extension(state): Extension<Arc<AppState>>,
    _: AdminUser,
    Json(TaxonomyRequest { name }): Json<TaxonomyRequest>,
) -> JsonResult<T> {
    Ok(ApiResponse::created(
        db_helpers::create_taxonomy_in_db::<T>(&state.pool, &name).await?,
    ))
}

pub async fn update_taxonomy<T: TaxonomyEntity + Serialize>(
    Extension(state): Extension<Arc<AppState>>,
    _: AdminUser,
    Path(id): Path<i64>,
    Json(TaxonomyRequest { name }): Json<TaxonomyRequest>,
) -> JsonResult<T> {
    Ok(ApiResponse::ok(
        db_helpers::update_taxonomy_in_db::<T>(&state.pool, id, &name).await?,
    ))
}

pub async fn delete_taxonomy<T: TaxonomyEntity>(
    Extension(state): Extension<Arc<AppState>>,
    _: AdminUser,
    Path(id): Path<i64>,
) -> JsonResult<bool> {
    db_helpers::delete_taxonomy_in_db::<T>(&state.pool, id).await?;
    Ok(ApiResponse::ok(true))
}

// ----------------- Article Handlers -----------------
pub async fn list_articles(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<ArticleQueryParams>,
) -> JsonResult<Vec<ArticleResponse>> {
    let articles = with_timeout(
        state.request_timeout,
        db_helpers::list_articles_in_db(&state.pool, params),
    )
    .await?;
    Ok(ApiResponse::ok(
        articles.into_iter().map(ArticleResponse::new).collect(),
    ))
}

pub async fn get_article(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<i64>,
) -> JsonResult<ArticleResponse> {
    let article = with_timeout(
        state.request_timeout,
        db_helpers::get_article_by_id_in_db(&state.pool, id),
    )
    .await?;
    Ok(ApiResponse::ok(ArticleResponse::new(article)))
}

pub async fn get_article_by_slug(
    Extension(state): Extension<Arc<AppState>>,
    Path(slug): Path<String>,
) -> JsonResult<ArticleResponse> {
    let article = with_timeout(
        state.request_timeout,
        db_helpers::get_article_by_slug_in_db(&state.pool, &slug),
    )
    .await?;
    Ok(ApiResponse::ok(ArticleResponse::new(article)))
}

pub async fn create_article(
    Extension(state): Extension<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Json(request): Json<CreateArticleRequest>,
) -> JsonResult<ArticleResponse> {
    let article = db_helpers::create_article_in_db(&state.pool, admin.id, request).await?;
    Ok(ApiResponse::created(ArticleResponse::new(article)))
}

pub async fn update_article(
    Extension(state): Extension<Arc<AppState>>,
    _: AdminUser,
    Path(id): Path<i64>,
    Json(request): Json<UpdateArticleRequest>,
) -> JsonResult<ArticleResponse> {
    let article =
        db_helpers::update_article_in_db(&state.pool, &state.images, id, request).await?;
    Ok(ApiResponse::ok(ArticleResponse::new(article)))
}

pub async fn delete_article(
    Extension(state): Extension<Arc<AppState>>,
    _: AdminUser,
    Path(id): Path<i64>,
) -> JsonResult<bool> {
    db_helpers::delete_article_in_db(&state.pool, &state.images, id).await?;
    Ok(ApiResponse::ok(true))
}

pub async fn publish_article(
    Extension(state): Extension<Arc<AppState>>,
    _: AdminUser,
    Path(id): Path<i64>,
) -> JsonResult<ArticleResponse> {
    let article = db_helpers::set_article_published_in_db(&state.pool, id, true).await?;
    Ok(ApiResponse::ok(ArticleResponse::new(article)))
}

pub async fn unpublish_article(
    Extension(state): Extension<Arc<AppState>>,
    _: AdminUser,
    Path(id): Path<i64>,
) -> JsonResult<ArticleResponse> {
    let article = db_helpers::set_article_published_in_db(&state.pool, id, false).await?;
    Ok(ApiResponse::ok(ArticleResponse::new(article)))
}

// ----------------- Comment Handlers -----------------
pub async fn list_comments(
    Extension(state): Extension<Arc<AppState>>,
    _: AuthUser,
    Path(article_id): Path<i64>,
) -> JsonResult<Vec<CommentResponse>> {
    let comments = db_helpers::list_comments_for_article_in_db(&state.pool, article_id).await?;
    Ok(ApiResponse::ok(
        comments.into_iter().map(CommentResponse::from).collect(),
    ))
}

pub async fn create_comment(
    Extension(state): Extension<Arc<AppState>>,
    AuthUser { id }: AuthUser,
    Path(article_id): Path<i64>,
    Json(request): Json<CommentRequest>,
) -> JsonResult<CommentResponse> {
    let author = load_user(&state, id).await?;
    let comment =
        db_helpers::add_comment_to_article_in_db(&state.pool, article_id, id, request).await?;
    Ok(ApiResponse::created(CommentResponse::new(
        comment,
        AuthorResponse::from(&author),
    )))
}

pub async fn delete_comment(
    Extension(state): Extension<Arc<AppState>>,
    AuthUser { id }: AuthUser,
    Path(comment_id): Path<i64>,
) -> JsonResult<bool> {
    db_helpers::delete_comment_in_db(&state.pool, comment_id, id).await?;
    Ok(ApiResponse::ok(true))
}

pub async fn list_replies(
    Extension(state): Extension<Arc<AppState>>,
    _: AuthUser,
    Path(comment_id): Path<i64>,
) -> JsonResult<Vec<ReplyResponse>> {
    let replies = db_helpers::list_replies_in_db(&state.pool, comment_id).await?;
    Ok(ApiResponse::ok(
        replies.into_iter().map(ReplyResponse::from).collect(),
    ))
}

pub async fn create_reply(
    Extension(state): Extension<Arc<AppState>>,
    AuthUser { id }: AuthUser,
    Path(comment_id): Path<i64>,
    Json(request): Json<CommentRequest>,
) -> JsonResult<CommentResponse> {
    let author = load_user(&state, id).await?;
    let comment =
        db_helpers::add_reply_to_comment_in_db(&state.pool, comment_id, id, request).await?;
    Ok(ApiResponse::created(CommentResponse::new(
        comment,
        AuthorResponse::from(&author),
    )))
}

pub async fn delete_reply(
    Extension(state): Extension<Arc<AppState>>,
    AuthUser { id }: AuthUser,
    Path(reply_id): Path<i64>,
) -> JsonResult<bool> {
    db_helpers::delete_reply_in_db(&state.pool, reply_id, id).await?;
    Ok(ApiResponse::ok(true))
}
