// db/notificationdb.rs
use async_trait::async_trait;
use uuid::Uuid;
use sqlx::Error;
use super::db::DBClient;

#[async_trait]
pub trait NotificationExt: Send + Sync {
    async fn store_notification(
        &self,
        user_id: Uuid,
        notification_type: &str,
        thread_id: Option<Uuid>,
        metadata: Option<serde_json::Value>,
        message: String,
    ) -> Result<(), Error>;
}

#[async_trait]
impl NotificationExt for DBClient {
    async fn store_notification(
        &self,
        user_id: Uuid,
        notification_type: &str,
        thread_id: Option<Uuid>,
        metadata: Option<serde_json::Value>,
        message: String,
    ) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO notifications
            (user_id, type, thread_id, metadata, message, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            "#
        )
        .bind(user_id)
        .bind(notification_type)
        .bind(thread_id)
        .bind(metadata)
        .bind(message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
