use sqlx::{SqliteConnection, SqlitePool};

use crate::{
    data_formats::CommentRequest,
    errors::RequestError,
    models::{AuthoredComment, Comment, Reply, ReplyThread},
};

const COMMENT_COLUMNS: &str = "id, user_id, article_id, content, is_reply, created_at, updated_at";

fn validate_content(content: &str) -> Result<String, RequestError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(RequestError::validation("content is required"));
    }
    Ok(content.to_owned())
}

async fn fetch_comment(conn: &mut SqliteConnection, id: i64) -> Result<Comment, RequestError> {
    let query = format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE id = $1");
    sqlx::query_as::<_, Comment>(&query)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(RequestError::NotFound("Comment not found"))
}

/// Touches the comment row so the transaction holds the write lock before it reads anything.
async fn lock_comment(conn: &mut SqliteConnection, id: i64) -> Result<(), RequestError> {
    let result = sqlx::query("UPDATE comments SET updated_at = updated_at WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(RequestError::NotFound("Comment not found"));
    }
    Ok(())
}

async fn ensure_article_exists(pool: &SqlitePool, article_id: i64) -> Result<(), RequestError> {
    sqlx::query_scalar::<_, i64>("SELECT id FROM articles WHERE id = $1")
        .bind(article_id)
        .fetch_optional(pool)
        .await?
        .ok_or(RequestError::NotFound("Article not found"))?;
    Ok(())
}

/// Top-level comments of an article, oldest first, with their authors.
pub async fn list_comments_for_article_in_db(
    pool: &SqlitePool,
    article_id: i64,
) -> Result<Vec<AuthoredComment>, RequestError> {
    ensure_article_exists(pool, article_id).await?;
    let result = sqlx::query_as::<_, AuthoredComment>(
        r#"
        SELECT comments.id, comments.user_id, comments.article_id, comments.content,
               comments.is_reply, comments.created_at, comments.updated_at,
               users.name AS author_name
        FROM comments
            JOIN users ON users.id = comments.user_id
        WHERE comments.article_id = $1 AND comments.is_reply = FALSE
        ORDER BY comments.created_at, comments.id
        "#,
    )
    .bind(article_id)
    .fetch_all(pool)
    .await?;
    Ok(result)
}

pub async fn add_comment_to_article_in_db(
    pool: &SqlitePool,
    article_id: i64,
    user_id: i64,
    CommentRequest { content }: CommentRequest,
) -> Result<Comment, RequestError> {
    let content = validate_content(&content)?;

    // Inserting through a SELECT makes the missing-article case come back as no row.
    let query = format!(
        r#"
        INSERT INTO comments (user_id, article_id, content, is_reply)
        SELECT $1, id, $2, FALSE FROM articles WHERE id = $3
        RETURNING {COMMENT_COLUMNS}
        "#
    );
    let comment = sqlx::query_as::<_, Comment>(&query)
        .bind(user_id)
        .bind(content)
        .bind(article_id)
        .fetch_optional(pool)
        .await?
        .ok_or(RequestError::NotFound("Article not found"))?;
    tracing::debug!(comment_id = comment.id, article_id, "Added comment");
    Ok(comment)
}

/// Deletes a comment written by `user_id`, together with any replies to it.
pub async fn delete_comment_in_db(
    pool: &SqlitePool,
    comment_id: i64,
    user_id: i64,
) -> Result<(), RequestError> {
    let mut tx = pool.begin().await?;
    lock_comment(&mut tx, comment_id).await?;
    let comment = fetch_comment(&mut tx, comment_id).await?;
    if comment.user_id != user_id {
        return Err(RequestError::Forbidden(
            "Only the author can delete this comment",
        ));
    }

    sqlx::query("DELETE FROM comments WHERE id IN (SELECT comment_id FROM replies WHERE parent_id = $1)")
        .bind(comment_id)
        .execute(&mut tx)
        .await?;
    sqlx::query("DELETE FROM replies WHERE parent_id = $1 OR comment_id = $1")
        .bind(comment_id)
        .execute(&mut tx)
        .await?;
    sqlx::query("DELETE FROM comments WHERE id = $1")
        .bind(comment_id)
        .execute(&mut tx)
        .await?;

    tx.commit().await?;
    tracing::debug!(comment_id, "Deleted comment");
    Ok(())
}

/// Replies to a top-level comment, each with its author and the parent comment's author.
pub async fn list_replies_in_db(
    pool: &SqlitePool,
    parent_id: i64,
) -> Result<Vec<ReplyThread>, RequestError> {
    let mut conn = pool.acquire().await?;
    fetch_comment(&mut conn, parent_id).await?;

    let result = sqlx::query_as::<_, ReplyThread>(
        r#"
        SELECT replies.id, replies.parent_id, replies.article_id, replies.comment_id,
               replies.user_id,
               reply.content, author.name AS author_name,
               reply.created_at, reply.updated_at,
               parent.user_id AS parent_user_id, parent.content AS parent_content,
               parent_author.name AS parent_author_name,
               parent.created_at AS parent_created_at,
               parent.updated_at AS parent_updated_at
        FROM replies
            JOIN comments reply ON reply.id = replies.comment_id
            JOIN users author ON author.id = reply.user_id
            JOIN comments parent ON parent.id = replies.parent_id
            JOIN users parent_author ON parent_author.id = parent.user_id
        WHERE replies.parent_id = $1
        ORDER BY reply.created_at, reply.id
        "#,
    )
    .bind(parent_id)
    .fetch_all(&mut conn)
    .await?;
    Ok(result)
}

/// Stores the reply comment and the row linking it to its parent in one transaction.
pub async fn add_reply_to_comment_in_db(
    pool: &SqlitePool,
    parent_id: i64,
    user_id: i64,
    CommentRequest { content }: CommentRequest,
) -> Result<Comment, RequestError> {
    let content = validate_content(&content)?;

    let mut tx = pool.begin().await?;
    lock_comment(&mut tx, parent_id).await?;
    let parent = fetch_comment(&mut tx, parent_id).await?;
    if parent.is_reply {
        return Err(RequestError::validation(
            "replies can only be added to top-level comments",
        ));
    }

    let query = format!(
        r#"
        INSERT INTO comments (user_id, article_id, content, is_reply)
        VALUES ($1, $2, $3, TRUE)
        RETURNING {COMMENT_COLUMNS}
        "#
    );
    let comment = sqlx::query_as::<_, Comment>(&query)
        .bind(user_id)
        .bind(parent.article_id)
        .bind(content)
        .fetch_one(&mut tx)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO replies (parent_id, article_id, comment_id, user_id)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(parent.id)
    .bind(parent.article_id)
    .bind(comment.id)
    .bind(user_id)
    .execute(&mut tx)
    .await?;

    tx.commit().await?;
    tracing::debug!(comment_id = comment.id, parent_id, "Added reply");
    Ok(comment)
}

/// Deletes a reply; allowed for the reply's author and for the author of the parent comment.
pub async fn delete_reply_in_db(
    pool: &SqlitePool,
    reply_id: i64,
    user_id: i64,
) -> Result<(), RequestError> {
    let mut tx = pool.begin().await?;
    let locked = sqlx::query("UPDATE replies SET updated_at = updated_at WHERE id = $1")
        .bind(reply_id)
        .execute(&mut tx)
        .await?;
    if locked.rows_affected() == 0 {
        return Err(RequestError::NotFound("Reply not found"));
    }
    let reply = sqlx::query_as::<_, Reply>(
        r#"
        SELECT id, parent_id, article_id, comment_id, user_id, created_at, updated_at
        FROM replies WHERE id = $1
        "#,
    )
    .bind(reply_id)
    .fetch_optional(&mut tx)
    .await?
    .ok_or(RequestError::NotFound("Reply not found"))?;
    let parent = fetch_comment(&mut tx, reply.parent_id).await?;

    if user_id != reply.user_id && user_id != parent.user_id {
        return Err(RequestError::Forbidden(
            "Only the reply author or the comment author can delete this reply",
        ));
    }

    sqlx::query("DELETE FROM replies WHERE id = $1")
        .bind(reply.id)
        .execute(&mut tx)
        .await?;
    sqlx::query("DELETE FROM comments WHERE id = $1")
        .bind(reply.comment_id)
        .execute(&mut tx)
        .await?;

    tx.commit().await?;
    tracing::debug!(reply_id, "Deleted reply");
    Ok(())
}

/// Removes every reply and comment of an article; part of the article delete transaction.
pub(crate) async fn delete_article_comments(
    conn: &mut SqliteConnection,
    article_id: i64,
) -> Result<(), RequestError> {
    sqlx::query("DELETE FROM replies WHERE article_id = $1")
        .bind(article_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM comments WHERE article_id = $1")
        .bind(article_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_helpers::test_support::*;
    use crate::models::{Role, User};

    fn said(content: &str) -> CommentRequest {
        CommentRequest {
            content: content.to_owned(),
        }
    }

    async fn thread(pool: &SqlitePool) -> (User, User, i64, Comment) {
        let admin = seed_user(pool, "Pat", Role::Admin).await;
        let reader = seed_user(pool, "Quinn", Role::User).await;
        let article = seed_article(pool, &admin, "Discussed").await.article;
        let comment = add_comment_to_article_in_db(pool, article.id, reader.id, said("hello"))
            .await
            .unwrap();
        (admin, reader, article.id, comment)
    }

    #[tokio::test]
    async fn comments_on_missing_articles_are_not_found() {
        let (_dir, pool) = test_pool().await;
        let user = seed_user(&pool, "Rae", Role::User).await;

        assert!(matches!(
            add_comment_to_article_in_db(&pool, 12, user.id, said("hi")).await,
            Err(RequestError::NotFound("Article not found"))
        ));
        assert!(matches!(
            list_comments_for_article_in_db(&pool, 12).await,
            Err(RequestError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn blank_content_is_rejected() {
        let (_dir, pool) = test_pool().await;
        let (_, reader, article_id, _) = thread(&pool).await;

        assert!(matches!(
            add_comment_to_article_in_db(&pool, article_id, reader.id, said("  ")).await,
            Err(RequestError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn reply_creates_one_comment_and_one_link() {
        let (_dir, pool) = test_pool().await;
        let (admin, _, article_id, comment) = thread(&pool).await;

        let reply = add_reply_to_comment_in_db(&pool, comment.id, admin.id, said("thanks"))
            .await
            .unwrap();

        assert!(reply.is_reply);
        assert_eq!(reply.article_id, article_id);
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM comments").await, 2);
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM replies").await, 1);

        let replies = list_replies_in_db(&pool, comment.id).await.unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].parent_id, comment.id);
        assert_eq!(replies[0].article_id, comment.article_id);
        assert_eq!(replies[0].comment_id, reply.id);
        assert_eq!(replies[0].author_name, "Pat");
        assert_eq!(replies[0].parent_author_name, "Quinn");

        let top_level = list_comments_for_article_in_db(&pool, article_id)
            .await
            .unwrap();
        assert_eq!(top_level.len(), 1);
        assert_eq!(top_level[0].id, comment.id);
    }

    #[tokio::test]
    async fn replies_cannot_be_nested() {
        let (_dir, pool) = test_pool().await;
        let (admin, reader, _, comment) = thread(&pool).await;
        let reply = add_reply_to_comment_in_db(&pool, comment.id, admin.id, said("one"))
            .await
            .unwrap();

        assert!(matches!(
            add_reply_to_comment_in_db(&pool, reply.id, reader.id, said("two")).await,
            Err(RequestError::Validation(_))
        ));
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM comments").await, 2);
    }

    #[tokio::test]
    async fn only_the_author_deletes_a_comment() {
        let (_dir, pool) = test_pool().await;
        let (admin, reader, _, comment) = thread(&pool).await;

        assert!(matches!(
            delete_comment_in_db(&pool, comment.id, admin.id).await,
            Err(RequestError::Forbidden(_))
        ));
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM comments").await, 1);

        delete_comment_in_db(&pool, comment.id, reader.id)
            .await
            .unwrap();
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM comments").await, 0);
    }

    #[tokio::test]
    async fn deleting_a_comment_takes_its_replies_along() {
        let (_dir, pool) = test_pool().await;
        let (admin, reader, _, comment) = thread(&pool).await;
        add_reply_to_comment_in_db(&pool, comment.id, admin.id, said("a"))
            .await
            .unwrap();
        add_reply_to_comment_in_db(&pool, comment.id, admin.id, said("b"))
            .await
            .unwrap();

        delete_comment_in_db(&pool, comment.id, reader.id)
            .await
            .unwrap();

        assert_eq!(count(&pool, "SELECT COUNT(*) FROM comments").await, 0);
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM replies").await, 0);
    }

    #[tokio::test]
    async fn reply_deletion_rights() {
        let (_dir, pool) = test_pool().await;
        let (admin, reader, _, comment) = thread(&pool).await;
        let outsider = seed_user(&pool, "Sam", Role::User).await;

        add_reply_to_comment_in_db(&pool, comment.id, admin.id, said("first"))
            .await
            .unwrap();
        add_reply_to_comment_in_db(&pool, comment.id, admin.id, said("second"))
            .await
            .unwrap();
        let replies = list_replies_in_db(&pool, comment.id).await.unwrap();

        assert!(matches!(
            delete_reply_in_db(&pool, replies[0].id, outsider.id).await,
            Err(RequestError::Forbidden(_))
        ));
        // The reply author may delete it.
        delete_reply_in_db(&pool, replies[0].id, admin.id)
            .await
            .unwrap();
        // So may the author of the comment being replied to.
        delete_reply_in_db(&pool, replies[1].id, reader.id)
            .await
            .unwrap();

        assert_eq!(count(&pool, "SELECT COUNT(*) FROM replies").await, 0);
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM comments").await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_replies_and_deletes_all_succeed() {
        let (_dir, pool) = test_pool().await;
        let (admin, reader, _, comment) = thread(&pool).await;
        let parent_id = comment.id;

        let writers: Vec<_> = (0..32)
            .map(|i| {
                let pool = pool.clone();
                let author = if i % 2 == 0 { admin.id } else { reader.id };
                tokio::spawn(async move {
                    add_reply_to_comment_in_db(&pool, parent_id, author, said("racing")).await
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM replies").await, 32);

        let replies = list_replies_in_db(&pool, parent_id).await.unwrap();
        let deleters: Vec<_> = replies
            .into_iter()
            .map(|reply| {
                let pool = pool.clone();
                let reader = reader.id;
                tokio::spawn(async move { delete_reply_in_db(&pool, reply.id, reader).await })
            })
            .collect();
        for deleter in deleters {
            deleter.await.unwrap().unwrap();
        }

        assert_eq!(count(&pool, "SELECT COUNT(*) FROM replies").await, 0);
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM comments").await, 1);
    }

    #[tokio::test]
    async fn missing_targets_are_not_found() {
        let (_dir, pool) = test_pool().await;
        let (_, reader, _, _) = thread(&pool).await;

        assert!(matches!(
            add_reply_to_comment_in_db(&pool, 404, reader.id, said("hi")).await,
            Err(RequestError::NotFound("Comment not found"))
        ));
        assert!(matches!(
            delete_comment_in_db(&pool, 404, reader.id).await,
            Err(RequestError::NotFound("Comment not found"))
        ));
        assert!(matches!(
            delete_reply_in_db(&pool, 404, reader.id).await,
            Err(RequestError::NotFound("Reply not found"))
        ));
    }
}
