use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Default for Role {
    fn default() -> Self {
        Role::User
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub role: Role,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl User {
    pub fn has_role(&self, role: Role) -> bool {
        self.role == role
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub description: String,
    pub image: Option<String>,
    pub is_published: bool,
    pub user_id: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ArticleCategory {
    pub article_id: i64,
    pub category_id: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ArticleTag {
    pub article_id: i64,
    pub tag_id: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Comment {
    pub id: i64,
    pub user_id: i64,
    pub article_id: i64,
    pub content: String,
    pub is_reply: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Links a reply comment to the top-level comment it answers.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Reply {
    pub id: i64,
    pub parent_id: i64,
    pub article_id: i64,
    pub comment_id: i64,
    pub user_id: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// An article with its join rows resolved to the referenced entities.
#[derive(Debug, Clone)]
pub struct ArticleDetails {
    pub article: Article,
    pub author: Option<User>,
    pub categories: Vec<Category>,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuthoredComment {
    pub id: i64,
    pub user_id: i64,
    pub article_id: i64,
    pub content: String,
    pub is_reply: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub author_name: String,
}

/// A reply row joined with the reply comment, the parent comment and both authors.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReplyThread {
    pub id: i64,
    pub parent_id: i64,
    pub article_id: i64,
    pub comment_id: i64,
    pub user_id: i64,
    pub content: String,
    pub author_name: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub parent_user_id: i64,
    pub parent_content: String,
    pub parent_author_name: String,
    pub parent_created_at: NaiveDateTime,
    pub parent_updated_at: NaiveDateTime,
}
