use sqlx::{sqlite::SqliteRow, SqlitePool};

use crate::{
    errors::RequestError,
    models::{Category, Tag},
};

const TAXONOMY_COLUMNS: &str = "id, name, created_at, updated_at";

/// Uniquely named reference data that articles point at through a join table.
pub trait TaxonomyEntity: for<'r> sqlx::FromRow<'r, SqliteRow> + Send + Unpin {
    const TABLE: &'static str;
    const NOUN: &'static str;
    const NOT_FOUND: &'static str;
}

impl TaxonomyEntity for Category {
    const TABLE: &'static str = "categories";
    const NOUN: &'static str = "category";
    const NOT_FOUND: &'static str = "Category not found";
}

impl TaxonomyEntity for Tag {
    const TABLE: &'static str = "tags";
    const NOUN: &'static str = "tag";
    const NOT_FOUND: &'static str = "Tag not found";
}

fn validate_name<T: TaxonomyEntity>(name: &str) -> Result<String, RequestError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(RequestError::validation(format!("{} name is required", T::NOUN)));
    }
    Ok(name.to_owned())
}

fn map_name_conflict<T: TaxonomyEntity>(e: sqlx::Error) -> RequestError {
    if RequestError::is_unique_violation(&e) {
        RequestError::validation(format!("{} name is already used", T::NOUN))
    } else {
        e.into()
    }
}

pub async fn list_taxonomy_in_db<T: TaxonomyEntity>(
    pool: &SqlitePool,
) -> Result<Vec<T>, RequestError> {
    let query = format!("SELECT {TAXONOMY_COLUMNS} FROM {} ORDER BY name", T::TABLE);
    let result = sqlx::query_as::<_, T>(&query).fetch_all(pool).await?;
    Ok(result)
}

pub async fn get_taxonomy_in_db<T: TaxonomyEntity>(
    pool: &SqlitePool,
    id: i64,
) -> Result<T, RequestError> {
    let query = format!("SELECT {TAXONOMY_COLUMNS} FROM {} WHERE id = $1", T::TABLE);
    sqlx::query_as::<_, T>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(RequestError::NotFound(T::NOT_FOUND))
}

pub async fn create_taxonomy_in_db<T: TaxonomyEntity>(
    pool: &SqlitePool,
    name: &str,
) -> Result<T, RequestError> {
    let name = validate_name::<T>(name)?;
    let query = format!(
        "INSERT INTO {} (name) VALUES ($1) RETURNING {TAXONOMY_COLUMNS}",
        T::TABLE
    );
    let result = sqlx::query_as::<_, T>(&query)
        .bind(name)
        .fetch_one(pool)
        .await
        .map_err(map_name_conflict::<T>)?;
    Ok(result)
}

pub async fn update_taxonomy_in_db<T: TaxonomyEntity>(
    pool: &SqlitePool,
    id: i64,
    name: &str,
) -> Result<T, RequestError> {
    let name = validate_name::<T>(name)?;
    let query = format!(
        "UPDATE {} SET name = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2 RETURNING {TAXONOMY_COLUMNS}",
        T::TABLE
    );
    sqlx::query_as::<_, T>(&query)
        .bind(name)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(map_name_conflict::<T>)?
        .ok_or(RequestError::NotFound(T::NOT_FOUND))
}

/// Deletes the entity; its join rows go with it through the foreign-key cascade.
pub async fn delete_taxonomy_in_db<T: TaxonomyEntity>(
    pool: &SqlitePool,
    id: i64,
) -> Result<(), RequestError> {
    let query = format!("DELETE FROM {} WHERE id = $1", T::TABLE);
    let result = sqlx::query(&query).bind(id).execute(pool).await?;
    if result.rows_affected() == 0 {
        return Err(RequestError::NotFound(T::NOT_FOUND));
    }
    tracing::info!("Deleted {} {}", T::NOUN, id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_helpers::test_support::*;

    #[tokio::test]
    async fn names_are_trimmed_and_unique() {
        let (_dir, pool) = test_pool().await;

        let tag = create_taxonomy_in_db::<Tag>(&pool, "  rust ").await.unwrap();
        assert_eq!(tag.name, "rust");

        let err = create_taxonomy_in_db::<Tag>(&pool, "rust").await.unwrap_err();
        assert!(
            matches!(err, RequestError::Validation(ref errors) if errors == &["tag name is already used"])
        );
    }

    #[tokio::test]
    async fn blank_name_is_rejected() {
        let (_dir, pool) = test_pool().await;
        assert!(matches!(
            create_taxonomy_in_db::<Category>(&pool, "   ").await,
            Err(RequestError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn update_and_delete_report_missing_rows() {
        let (_dir, pool) = test_pool().await;
        let category = seed_category(&pool, "News").await;

        let renamed = update_taxonomy_in_db::<Category>(&pool, category.id, "World News")
            .await
            .unwrap();
        assert_eq!(renamed.name, "World News");

        assert!(matches!(
            update_taxonomy_in_db::<Category>(&pool, 999, "Sports").await,
            Err(RequestError::NotFound("Category not found"))
        ));

        delete_taxonomy_in_db::<Category>(&pool, category.id)
            .await
            .unwrap();
        assert!(matches!(
            get_taxonomy_in_db::<Category>(&pool, category.id).await,
            Err(RequestError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn listing_is_sorted_by_name() {
        let (_dir, pool) = test_pool().await;
        seed_category(&pool, "Zebra").await;
        seed_category(&pool, "Apple").await;

        let names: Vec<_> = list_taxonomy_in_db::<Category>(&pool)
            .await
            .unwrap()
            .into_iter()
            .map(|category| category.name)
            .collect();
        assert_eq!(names, ["Apple", "Zebra"]);
    }
}
