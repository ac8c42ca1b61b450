use std::collections::HashMap;

use chrono::NaiveDateTime;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

use crate::data_formats::{ArticleQueryParams, CreateArticleRequest, UpdateArticleRequest};
use crate::errors::RequestError;
use crate::models::{Article, ArticleDetails, Category, Tag, User};
use crate::storage::ImageStore;
use crate::slugify;

use super::{
    associations_of, attach_categories, attach_tags, clear_associations,
    delete_article_comments, missing_references, USER_COLUMNS,
};

const ARTICLE_COLUMNS: &str = "id, title, slug, content, description, image, is_published, user_id, created_at, updated_at";

const MAX_PAGE_SIZE: u32 = 100;

#[derive(sqlx::FromRow)]
struct CategoryLink {
    article_id: i64,
    id: i64,
    name: String,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

#[derive(sqlx::FromRow)]
struct TagLink {
    article_id: i64,
    id: i64,
    name: String,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

/// Field checks shared by create and update; returns every failing message.
pub fn validate_article_fields(title: &str, image: Option<&str>) -> Vec<String> {
    let mut errors = Vec::new();
    if title.trim().is_empty() {
        errors.push("title is required".to_owned());
    }
    if let Some(Ok(url)) = image.map(url::Url::parse) {
        if !matches!(url.scheme(), "http" | "https") {
            errors.push("image must be an http or https URL".to_owned());
        }
    }
    errors
}

/// Turns a title or slug uniqueness failure into its validation message; other errors pass through.
fn title_conflict(e: sqlx::Error) -> Result<String, RequestError> {
    if !RequestError::is_unique_violation(&e) {
        return Err(e.into());
    }
    let slug_conflict = matches!(&e, sqlx::Error::Database(db) if db.message().contains("articles.slug"));
    if slug_conflict {
        Ok("an article with the same slug already exists".to_owned())
    } else {
        Ok("an article with this title already exists".to_owned())
    }
}

fn push_id_list(query: &mut QueryBuilder<'_, Sqlite>, ids: &[i64]) {
    let mut separated = query.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");
}

/// Takes the write lock for the rest of the transaction by touching the article row.
async fn lock_article(conn: &mut SqliteConnection, id: i64) -> Result<(), RequestError> {
    let result = sqlx::query("UPDATE articles SET updated_at = updated_at WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(RequestError::NotFound("Article not found"));
    }
    Ok(())
}

async fn fetch_article(conn: &mut SqliteConnection, id: i64) -> Result<Article, RequestError> {
    let query = format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = $1");
    sqlx::query_as::<_, Article>(&query)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(RequestError::NotFound("Article not found"))
}

/// Resolves categories, tags and authors for a page of articles with one query per kind.
pub async fn expand_articles(
    pool: &SqlitePool,
    articles: Vec<Article>,
) -> Result<Vec<ArticleDetails>, RequestError> {
    if articles.is_empty() {
        return Ok(Vec::new());
    }
    let article_ids: Vec<i64> = articles.iter().map(|article| article.id).collect();
    let mut author_ids: Vec<i64> = articles.iter().map(|article| article.user_id).collect();
    author_ids.sort_unstable();
    author_ids.dedup();

    let mut query = QueryBuilder::<Sqlite>::new(
        r#"
        SELECT article_categories.article_id, categories.id, categories.name,
               categories.created_at, categories.updated_at
        FROM article_categories
            JOIN categories ON categories.id = article_categories.category_id
        WHERE article_categories.article_id IN ("#,
    );
    push_id_list(&mut query, &article_ids);
    query.push(" ORDER BY categories.name");
    let category_links = query.build_query_as::<CategoryLink>().fetch_all(pool).await?;

    let mut query = QueryBuilder::<Sqlite>::new(
        r#"
        SELECT article_tags.article_id, tags.id, tags.name, tags.created_at, tags.updated_at
        FROM article_tags
            JOIN tags ON tags.id = article_tags.tag_id
        WHERE article_tags.article_id IN ("#,
    );
    push_id_list(&mut query, &article_ids);
    query.push(" ORDER BY tags.name");
    let tag_links = query.build_query_as::<TagLink>().fetch_all(pool).await?;

    let mut query =
        QueryBuilder::<Sqlite>::new(format!("SELECT {USER_COLUMNS} FROM users WHERE id IN ("));
    push_id_list(&mut query, &author_ids);
    let authors: HashMap<i64, User> = query
        .build_query_as::<User>()
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(|user| (user.id, user))
        .collect();

    let mut categories: HashMap<i64, Vec<Category>> = HashMap::new();
    for link in category_links {
        categories.entry(link.article_id).or_default().push(Category {
            id: link.id,
            name: link.name,
            created_at: link.created_at,
            updated_at: link.updated_at,
        });
    }
    let mut tags: HashMap<i64, Vec<Tag>> = HashMap::new();
    for link in tag_links {
        tags.entry(link.article_id).or_default().push(Tag {
            id: link.id,
            name: link.name,
            created_at: link.created_at,
            updated_at: link.updated_at,
        });
    }

    let details = articles
        .into_iter()
        .map(|article| ArticleDetails {
            author: authors.get(&article.user_id).cloned(),
            categories: categories.remove(&article.id).unwrap_or_default(),
            tags: tags.remove(&article.id).unwrap_or_default(),
            article,
        })
        .collect();
    Ok(details)
}

pub async fn list_articles_in_db(
    pool: &SqlitePool,
    ArticleQueryParams {
        tag,
        category,
        author,
        published,
        limit,
        offset,
    }: ArticleQueryParams,
) -> Result<Vec<ArticleDetails>, RequestError> {
    let mut query = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {ARTICLE_COLUMNS} FROM articles WHERE 1 = 1"
    ));
    if let Some(tag) = tag {
        query
            .push(
                r#" AND EXISTS (SELECT 1 FROM article_tags
                    JOIN tags ON tags.id = article_tags.tag_id
                    WHERE article_tags.article_id = articles.id AND tags.name = "#,
            )
            .push_bind(tag)
            .push(")");
    }
    if let Some(category) = category {
        query
            .push(
                r#" AND EXISTS (SELECT 1 FROM article_categories
                    JOIN categories ON categories.id = article_categories.category_id
                    WHERE article_categories.article_id = articles.id AND categories.name = "#,
            )
            .push_bind(category)
            .push(")");
    }
    if let Some(author) = author {
        query.push(" AND user_id = ").push_bind(author);
    }
    if let Some(published) = published {
        query.push(" AND is_published = ").push_bind(published);
    }
    query
        .push(" ORDER BY created_at DESC, id DESC LIMIT ")
        .push_bind(i64::from(limit.min(MAX_PAGE_SIZE)))
        .push(" OFFSET ")
        .push_bind(i64::from(offset));

    let articles = query.build_query_as::<Article>().fetch_all(pool).await?;
    expand_articles(pool, articles).await
}

async fn expand_one(
    pool: &SqlitePool,
    article: Option<Article>,
) -> Result<ArticleDetails, RequestError> {
    let article = article.ok_or(RequestError::NotFound("Article not found"))?;
    expand_articles(pool, vec![article])
        .await?
        .pop()
        .ok_or(RequestError::NotFound("Article not found"))
}

pub async fn get_article_by_id_in_db(
    pool: &SqlitePool,
    id: i64,
) -> Result<ArticleDetails, RequestError> {
    let query = format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = $1");
    let article = sqlx::query_as::<_, Article>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    expand_one(pool, article).await
}

pub async fn get_article_by_slug_in_db(
    pool: &SqlitePool,
    slug: &str,
) -> Result<ArticleDetails, RequestError> {
    let query = format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE slug = $1");
    let article = sqlx::query_as::<_, Article>(&query)
        .bind(slug)
        .fetch_optional(pool)
        .await?;
    expand_one(pool, article).await
}

/// Inserts the article and its links in one transaction.
///
/// Field problems, title conflicts and missing references are reported together; any of
/// them rolls the whole insert back.
pub async fn create_article_in_db(
    pool: &SqlitePool,
    author_id: i64,
    CreateArticleRequest {
        title,
        content,
        description,
        image,
        category_ids,
        tag_ids,
        new_tags,
    }: CreateArticleRequest,
) -> Result<ArticleDetails, RequestError> {
    let image = image.filter(|image| !image.trim().is_empty());
    let mut errors = validate_article_fields(&title, image.as_deref());

    let slug = slugify(&title);
    let mut tx = pool.begin().await?;

    let mut article = None;
    if errors.is_empty() {
        let query = format!(
            r#"
            INSERT INTO articles (title, slug, content, description, image, user_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {ARTICLE_COLUMNS}
            "#
        );
        match sqlx::query_as::<_, Article>(&query)
            .bind(title)
            .bind(slug)
            .bind(content)
            .bind(description)
            .bind(image)
            .bind(author_id)
            .fetch_one(&mut tx)
            .await
        {
            Ok(row) => article = Some(row),
            Err(e) => errors.push(title_conflict(e)?),
        }
    }

    match &article {
        Some(article) => {
            errors.extend(attach_categories(&mut tx, article.id, &category_ids).await?);
            errors.extend(attach_tags(&mut tx, article.id, &tag_ids, &new_tags).await?);
        }
        None => errors.extend(missing_references(&mut tx, &category_ids, &tag_ids).await?),
    }

    match article {
        Some(article) if errors.is_empty() => {
            tx.commit().await?;
            tracing::info!(article_id = article.id, "Created article {}", article.slug);
            get_article_by_id_in_db(pool, article.id).await
        }
        _ => {
            tx.rollback().await?;
            Err(RequestError::Validation(errors))
        }
    }
}

/// Applies field changes and replaces the article's links atomically.
///
/// Omitted fields and omitted id lists keep their current values. An empty `image`
/// clears the image. The slug always follows the resulting title. A stored image that
/// the update replaces or clears is removed once the change is committed.
pub async fn update_article_in_db(
    pool: &SqlitePool,
    images: &ImageStore,
    id: i64,
    UpdateArticleRequest {
        title,
        content,
        description,
        image,
        category_ids,
        tag_ids,
        new_tags,
    }: UpdateArticleRequest,
) -> Result<ArticleDetails, RequestError> {
    let mut tx = pool.begin().await?;
    lock_article(&mut tx, id).await?;

    let current = fetch_article(&mut tx, id).await?;
    let (current_categories, current_tags) = associations_of(&mut tx, id).await?;

    let title = title.unwrap_or(current.title);
    let content = content.unwrap_or(current.content);
    let description = description.unwrap_or(current.description);
    let image = match image {
        Some(image) if image.trim().is_empty() => None,
        Some(image) => Some(image),
        None => current.image.clone(),
    };
    let replaced_image = current
        .image
        .filter(|previous| image.as_deref() != Some(previous.as_str()));
    let category_ids = category_ids.unwrap_or_else(|| {
        current_categories
            .iter()
            .map(|link| link.category_id)
            .collect()
    });
    let tag_ids = tag_ids
        .unwrap_or_else(|| current_tags.iter().map(|link| link.tag_id).collect());
    let new_tags = new_tags.unwrap_or_default();

    let mut errors = validate_article_fields(&title, image.as_deref());

    clear_associations(&mut tx, id).await?;

    if errors.is_empty() {
        let slug = slugify(&title);
        let updated = sqlx::query(
            r#"
            UPDATE articles
            SET title = $1, slug = $2, content = $3, description = $4, image = $5,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $6
            "#,
        )
        .bind(title)
        .bind(slug)
        .bind(content)
        .bind(description)
        .bind(image)
        .bind(id)
        .execute(&mut tx)
        .await;
        if let Err(e) = updated {
            errors.push(title_conflict(e)?);
        }
    }

    errors.extend(attach_categories(&mut tx, id, &category_ids).await?);
    errors.extend(attach_tags(&mut tx, id, &tag_ids, &new_tags).await?);
    if !errors.is_empty() {
        tx.rollback().await?;
        return Err(RequestError::Validation(errors));
    }

    tx.commit().await?;
    tracing::info!(article_id = id, "Updated article");

    if let Some(previous) = &replaced_image {
        if let Err(e) = images.remove(previous).await {
            tracing::warn!("Could not remove replaced image of article {}: {:#}", id, e);
        }
    }

    get_article_by_id_in_db(pool, id).await
}

/// Flips `is_published`; setting the value it already has changes nothing.
pub async fn set_article_published_in_db(
    pool: &SqlitePool,
    id: i64,
    published: bool,
) -> Result<ArticleDetails, RequestError> {
    let mut tx = pool.begin().await?;
    lock_article(&mut tx, id).await?;

    let result = sqlx::query(
        r#"
        UPDATE articles SET is_published = $1, updated_at = CURRENT_TIMESTAMP
        WHERE id = $2 AND is_published <> $1
        "#,
    )
    .bind(published)
    .bind(id)
    .execute(&mut tx)
    .await?;
    tx.commit().await?;

    if result.rows_affected() > 0 {
        tracing::info!(article_id = id, published, "Changed article visibility");
    }
    get_article_by_id_in_db(pool, id).await
}

/// Deletes the article with its links, comments and replies, then its stored image.
pub async fn delete_article_in_db(
    pool: &SqlitePool,
    images: &ImageStore,
    id: i64,
) -> Result<Article, RequestError> {
    let mut tx = pool.begin().await?;
    lock_article(&mut tx, id).await?;

    let article = fetch_article(&mut tx, id).await?;
    clear_associations(&mut tx, id).await?;
    delete_article_comments(&mut tx, id).await?;
    sqlx::query("DELETE FROM articles WHERE id = $1")
        .bind(id)
        .execute(&mut tx)
        .await?;

    tx.commit().await?;
    tracing::info!(article_id = id, "Deleted article {}", article.slug);

    if let Some(image) = &article.image {
        if let Err(e) = images.remove(image).await {
            tracing::warn!("Could not remove image of article {}: {:#}", id, e);
        }
    }
    Ok(article)
}
