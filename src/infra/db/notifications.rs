use async_trait::async_trait;
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::{
    application::repos::{NewNotification, NotificationsRepo, RepoError, RowPage},
    domain::{
        entities::{NotificationRecord, RecordId},
        types::NotificationKind,
    },
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(FromRow)]
struct NotificationRow {
    id: i64,
    recipient_id: i64,
    actor_id: i64,
    kind: NotificationKind,
    subject_id: Option<i64>,
    is_read: bool,
    created_at: OffsetDateTime,
}

impl From<NotificationRow> for NotificationRecord {
    fn from(row: NotificationRow) -> Self {
        Self {
            id: row.id,
            recipient_id: row.recipient_id,
            actor_id: row.actor_id,
            kind: row.kind,
            subject_id: row.subject_id,
            is_read: row.is_read,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl NotificationsRepo for PostgresRepositories {
    async fn find_page(
        &self,
        recipient: RecordId,
        unread_only: bool,
        offset: i64,
        limit: i64,
    ) -> Result<RowPage<NotificationRecord>, RepoError> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = $1 AND (NOT $2 OR NOT is_read)",
        )
        .bind(recipient)
        .bind(unread_only)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT id, recipient_id, actor_id, kind, subject_id, is_read, created_at
            FROM notifications
            WHERE recipient_id = $1 AND (NOT $2 OR NOT is_read)
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(recipient)
        .bind(unread_only)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(RowPage::new(
            rows.into_iter().map(Into::into).collect(),
            u64::try_from(total).unwrap_or(0),
        ))
    }

    async fn create(
        &self,
        notification: NewNotification,
    ) -> Result<NotificationRecord, RepoError> {
        let row = sqlx::query_as::<_, NotificationRow>(
            r#"
            INSERT INTO notifications (recipient_id, actor_id, kind, subject_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id, recipient_id, actor_id, kind, subject_id, is_read, created_at
            "#,
        )
        .bind(notification.recipient_id)
        .bind(notification.actor_id)
        .bind(notification.kind)
        .bind(notification.subject_id)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn mark_read(&self, id: RecordId, recipient: RecordId) -> Result<bool, RepoError> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = TRUE WHERE id = $1 AND recipient_id = $2",
        )
        .bind(id)
        .bind(recipient)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: RecordId, recipient: RecordId) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = $1 AND recipient_id = $2")
            .bind(id)
            .bind(recipient)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }
}
