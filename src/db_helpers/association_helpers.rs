//! The only code that touches the `article_categories` and `article_tags` join tables.
//!
//! Attach functions collect a message per missing reference instead of failing on the
//! first one, so the caller can decide to roll the whole aggregate back once every
//! attempt is known. Store failures still abort immediately.

use sqlx::SqliteConnection;

use crate::{
    errors::RequestError,
    models::{ArticleCategory, ArticleTag},
};

#[derive(Debug, Clone, Copy)]
enum Link {
    Category,
    Tag,
}

impl Link {
    const fn noun(self) -> &'static str {
        match self {
            Link::Category => "category",
            Link::Tag => "tag",
        }
    }

    const fn exists_query(self) -> &'static str {
        match self {
            Link::Category => "SELECT id FROM categories WHERE id = $1",
            Link::Tag => "SELECT id FROM tags WHERE id = $1",
        }
    }

    // The composite primary key keeps at most one row per pair.
    const fn insert_query(self) -> &'static str {
        match self {
            Link::Category => {
                "INSERT OR IGNORE INTO article_categories (article_id, category_id) VALUES ($1, $2)"
            }
            Link::Tag => "INSERT OR IGNORE INTO article_tags (article_id, tag_id) VALUES ($1, $2)",
        }
    }
}

async fn insert_link(
    conn: &mut SqliteConnection,
    link: Link,
    article_id: i64,
    target_id: i64,
) -> Result<(), RequestError> {
    sqlx::query(link.insert_query())
        .bind(article_id)
        .bind(target_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn exists(conn: &mut SqliteConnection, link: Link, id: i64) -> Result<bool, RequestError> {
    let found = sqlx::query_scalar::<_, i64>(link.exists_query())
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(found.is_some())
}

fn not_found_message(link: Link, id: i64) -> String {
    format!("{} with id {} not found", link.noun(), id)
}

async fn attach_existing(
    conn: &mut SqliteConnection,
    link: Link,
    article_id: i64,
    ids: &[i64],
) -> Result<Vec<String>, RequestError> {
    let mut errors = Vec::new();
    for &id in ids {
        if !exists(conn, link, id).await? {
            errors.push(not_found_message(link, id));
            continue;
        }
        insert_link(conn, link, article_id, id).await?;
    }
    Ok(errors)
}

/// Reports the same missing-reference messages as the attach functions without linking anything.
///
/// Used when there is no article row to link against, so the caller can still return
/// every problem with the request at once.
pub async fn missing_references(
    conn: &mut SqliteConnection,
    category_ids: &[i64],
    tag_ids: &[i64],
) -> Result<Vec<String>, RequestError> {
    let mut errors = Vec::new();
    for (link, ids) in [(Link::Category, category_ids), (Link::Tag, tag_ids)] {
        for &id in ids {
            if !exists(conn, link, id).await? {
                errors.push(not_found_message(link, id));
            }
        }
    }
    Ok(errors)
}

/// Links each existing category to the article; unknown ids yield one message per occurrence.
pub async fn attach_categories(
    conn: &mut SqliteConnection,
    article_id: i64,
    category_ids: &[i64],
) -> Result<Vec<String>, RequestError> {
    attach_existing(conn, Link::Category, article_id, category_ids).await
}

/// Links existing tags by id, then resolves free-text names, creating tags that do not exist yet.
pub async fn attach_tags(
    conn: &mut SqliteConnection,
    article_id: i64,
    tag_ids: &[i64],
    new_tag_names: &[String],
) -> Result<Vec<String>, RequestError> {
    let errors = attach_existing(conn, Link::Tag, article_id, tag_ids).await?;

    for name in new_tag_names {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let existing = sqlx::query_scalar::<_, i64>("SELECT id FROM tags WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut *conn)
            .await?;
        let tag_id = match existing {
            Some(id) if tag_ids.contains(&id) => continue,
            Some(id) => id,
            None => {
                let id = sqlx::query_scalar::<_, i64>(
                    "INSERT INTO tags (name) VALUES ($1) RETURNING id",
                )
                .bind(name)
                .fetch_one(&mut *conn)
                .await?;
                tracing::debug!(tag_id = id, "Created tag {}", name);
                id
            }
        };
        insert_link(conn, Link::Tag, article_id, tag_id).await?;
    }

    Ok(errors)
}

/// Removes every category and tag link of the article.
pub async fn clear_associations(
    conn: &mut SqliteConnection,
    article_id: i64,
) -> Result<(), RequestError> {
    sqlx::query("DELETE FROM article_categories WHERE article_id = $1")
        .bind(article_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM article_tags WHERE article_id = $1")
        .bind(article_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// The article's current join rows, in insertion order.
pub async fn associations_of(
    conn: &mut SqliteConnection,
    article_id: i64,
) -> Result<(Vec<ArticleCategory>, Vec<ArticleTag>), RequestError> {
    let categories = sqlx::query_as::<_, ArticleCategory>(
        "SELECT article_id, category_id FROM article_categories WHERE article_id = $1 ORDER BY rowid",
    )
    .bind(article_id)
    .fetch_all(&mut *conn)
    .await?;
    let tags = sqlx::query_as::<_, ArticleTag>(
        "SELECT article_id, tag_id FROM article_tags WHERE article_id = $1 ORDER BY rowid",
    )
    .bind(article_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok((categories, tags))
}
