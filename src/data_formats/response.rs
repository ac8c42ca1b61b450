use serde::{Deserialize, Serialize};

use crate::models::{
    Article, ArticleDetails, AuthoredComment, Category, Comment, ReplyThread, Tag, User,
};

#[derive(Deserialize, Serialize, Debug)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Deserialize, Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct AuthorResponse {
    pub id: i64,
    pub name: String,
}

#[derive(Serialize, Debug)]
pub struct ArticleResponse {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub description: String,
    pub image: Option<String>,
    pub is_published: bool,
    pub author: Option<AuthorResponse>,
    pub categories: Vec<Category>,
    pub tags: Vec<Tag>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize, Debug)]
pub struct CommentResponse {
    pub id: i64,
    pub article_id: i64,
    pub content: String,
    pub is_reply: bool,
    pub author: AuthorResponse,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize, Debug)]
pub struct ReplyResponse {
    pub id: i64,
    pub parent_id: i64,
    pub article_id: i64,
    pub comment: CommentResponse,
    pub parent: CommentResponse,
}

impl From<&User> for AuthorResponse {
    fn from(user: &User) -> Self {
        AuthorResponse {
            id: user.id,
            name: user.name.clone(),
        }
    }
}

impl ArticleResponse {
    pub fn new(
        ArticleDetails {
            article:
                Article {
                    id,
                    title,
                    slug,
                    content,
                    description,
                    image,
                    is_published,
                    created_at,
                    updated_at,
                    ..
                },
            author,
            categories,
            tags,
        }: ArticleDetails,
    ) -> Self {
        ArticleResponse {
            id,
            title,
            slug,
            content,
            description,
            image,
            is_published,
            author: author.as_ref().map(AuthorResponse::from),
            categories,
            tags,
            created_at: created_at.to_string(),
            updated_at: updated_at.to_string(),
        }
    }
}

impl CommentResponse {
    pub fn new(
        Comment {
            id,
            article_id,
            content,
            is_reply,
            created_at,
            updated_at,
            ..
        }: Comment,
        author: AuthorResponse,
    ) -> Self {
        CommentResponse {
            id,
            article_id,
            content,
            is_reply,
            author,
            created_at: created_at.to_string(),
            updated_at: updated_at.to_string(),
        }
    }
}

impl From<AuthoredComment> for CommentResponse {
    fn from(comment: AuthoredComment) -> Self {
        CommentResponse {
            id: comment.id,
            article_id: comment.article_id,
            content: comment.content,
            is_reply: comment.is_reply,
            author: AuthorResponse {
                id: comment.user_id,
                name: comment.author_name,
            },
            created_at: comment.created_at.to_string(),
            updated_at: comment.updated_at.to_string(),
        }
    }
}

impl From<ReplyThread> for ReplyResponse {
    fn from(reply: ReplyThread) -> Self {
        ReplyResponse {
            id: reply.id,
            parent_id: reply.parent_id,
            article_id: reply.article_id,
            comment: CommentResponse {
                id: reply.comment_id,
                article_id: reply.article_id,
                content: reply.content,
                is_reply: true,
                author: AuthorResponse {
                    id: reply.user_id,
                    name: reply.author_name,
                },
                created_at: reply.created_at.to_string(),
                updated_at: reply.updated_at.to_string(),
            },
            parent: CommentResponse {
                id: reply.parent_id,
                article_id: reply.article_id,
                content: reply.parent_content,
                is_reply: false,
                author: AuthorResponse {
                    id: reply.parent_user_id,
                    name: reply.parent_author_name,
                },
                created_at: reply.parent_created_at.to_string(),
                updated_at: reply.parent_updated_at.to_string(),
            },
        }
    }
}
