use sqlx::SqlitePool;

use crate::{errors::RequestError, models::User};

mod article_helpers;
mod association_helpers;
mod comment_helpers;
mod taxonomy_helpers;
mod user_helpers;

pub use article_helpers::*;
pub use association_helpers::*;
pub use comment_helpers::*;
pub use taxonomy_helpers::*;
pub use user_helpers::*;

const USER_COLUMNS: &str = "id, name, email, password, role, created_at, updated_at";

// ----------------- Helper Functions -----------------

pub async fn get_user_by_email(pool: &SqlitePool, email: &str) -> Result<Option<User>, RequestError> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
    let result = sqlx::query_as::<_, User>(&query)
        .bind(email.trim().to_lowercase())
        .fetch_optional(pool)
        .await?;
    Ok(result)
}

pub async fn get_user_by_id(pool: &SqlitePool, id: i64) -> Result<Option<User>, RequestError> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
    let result = sqlx::query_as::<_, User>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(result)
}

#[cfg(test)]
pub(crate) mod test_support {
    use sqlx::SqlitePool;
    use tempfile::TempDir;

    use crate::data_formats::{CreateArticleRequest, RegisterRequest};
    use crate::models::{ArticleDetails, Category, Role, User};

    /// A migrated database living in a temporary directory; keep the `TempDir` alive.
    pub(crate) async fn test_pool() -> (TempDir, SqlitePool) {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("test.db").display());
        let pool = crate::init_db(&url).await.unwrap();
        (dir, pool)
    }

    pub(crate) async fn seed_user(pool: &SqlitePool, name: &str, role: Role) -> User {
        let request = RegisterRequest {
            name: name.to_owned(),
            email: format!("{}@example.com", name.to_lowercase()),
            password: "password123".to_owned(),
        };
        super::register_user_in_db(pool, request, role).await.unwrap()
    }

    pub(crate) async fn seed_category(pool: &SqlitePool, name: &str) -> Category {
        super::create_taxonomy_in_db::<Category>(pool, name)
            .await
            .unwrap()
    }

    pub(crate) async fn seed_article(pool: &SqlitePool, author: &User, title: &str) -> ArticleDetails {
        let request = CreateArticleRequest {
            title: title.to_owned(),
            content: format!("{title} body"),
            ..Default::default()
        };
        super::create_article_in_db(pool, author.id, request)
            .await
            .unwrap()
    }

    pub(crate) async fn count(pool: &SqlitePool, query: &str) -> i64 {
        sqlx::query_scalar::<_, i64>(query)
            .fetch_one(pool)
            .await
            .unwrap()
    }
}
