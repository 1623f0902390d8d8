use sqlx::{Pool, Row, Sqlite};

use crate::{oci::ImageConfig, LayerpullResult};

use super::{ImageCache, RepositoryCache};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A [`RepositoryCache`] persisted in SQLite.
#[derive(Debug, Clone)]
pub struct SqliteRepositoryCache {
    pool: Pool<Sqlite>,
}

/// An [`ImageCache`] persisted in SQLite.
#[derive(Debug, Clone)]
pub struct SqliteImageCache {
    pool: Pool<Sqlite>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SqliteRepositoryCache {
    /// Creates a cache over a migrated pool. See [`super::init_db`].
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

impl SqliteImageCache {
    /// Creates a cache over a migrated pool. See [`super::init_db`].
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait::async_trait]
impl RepositoryCache for SqliteRepositoryCache {
    async fn add_reference(&self, reference: &str, image_id: &str) -> LayerpullResult<()> {
        sqlx::query(
            r#"
            INSERT INTO repository_references (reference, image_id)
            VALUES (?, ?)
            ON CONFLICT(reference) DO UPDATE SET
                image_id = excluded.image_id,
                modified_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(reference)
        .bind(image_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_image_id(&self, reference: &str) -> LayerpullResult<Option<String>> {
        let record = sqlx::query("SELECT image_id FROM repository_references WHERE reference = ?")
            .bind(reference)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record.map(|row| row.get::<String, _>("image_id")))
    }

    async fn bind_layer(&self, layer_id: &str, image_id: &str) -> LayerpullResult<()> {
        sqlx::query(
            r#"
            INSERT INTO layer_images (layer_id, image_id)
            VALUES (?, ?)
            ON CONFLICT(layer_id) DO UPDATE SET
                image_id = excluded.image_id,
                modified_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(layer_id)
        .bind(image_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_image_id_by_layer(&self, layer_id: &str) -> LayerpullResult<Option<String>> {
        let record = sqlx::query("SELECT image_id FROM layer_images WHERE layer_id = ?")
            .bind(layer_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record.map(|row| row.get::<String, _>("image_id")))
    }
}

#[async_trait::async_trait]
impl ImageCache for SqliteImageCache {
    async fn get(&self, image_id: &str) -> LayerpullResult<Option<ImageConfig>> {
        let record = sqlx::query("SELECT config_json FROM image_configs WHERE image_id = ?")
            .bind(image_id)
            .fetch_optional(&self.pool)
            .await?;

        match record {
            Some(row) => {
                let json = row.get::<String, _>("config_json");
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    async fn insert(&self, config: &ImageConfig) -> LayerpullResult<()> {
        let json = serde_json::to_string(config)?;
        sqlx::query(
            r#"
            INSERT INTO image_configs (image_id, config_json)
            VALUES (?, ?)
            ON CONFLICT(image_id) DO UPDATE SET config_json = excluded.config_json
            "#,
        )
        .bind(config.get_image_id())
        .bind(json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
