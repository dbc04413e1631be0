use std::sync::Arc;

use tracing::{instrument, warn};

use crate::application::access::require_actor;
use crate::application::error::ServiceError;
use crate::application::pagination::{PageEnvelope, PageParams};
use crate::application::repos::{NewNotification, NotificationsRepo};
use crate::cache::{CacheLayer, Entity, ListFilters};
use crate::domain::entities::{NotificationRecord, RecordId};
use crate::domain::types::NotificationKind;

/// Notification inbox. Records are only stored here; delivery happens
/// elsewhere.
pub struct NotificationsService {
    repo: Arc<dyn NotificationsRepo>,
    cache: CacheLayer,
}

impl NotificationsService {
    pub fn new(repo: Arc<dyn NotificationsRepo>, cache: CacheLayer) -> Self {
        Self { repo, cache }
    }

    /// The viewer's own notifications. `unread_only = false` and an absent
    /// flag share one cache entry.
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        viewer: Option<RecordId>,
        page: PageParams,
        unread_only: bool,
    ) -> Result<PageEnvelope<NotificationRecord>, ServiceError> {
        let recipient = require_actor(viewer)?;
        let filters = ListFilters::new().with("unread", unread_only.then_some(true));
        let key = self.cache.keys().scoped_list_key(
            Entity::Notifications,
            recipient,
            page,
            &filters,
            None,
        )?;

        self.cache
            .reads()
            .read_through(Entity::Notifications, &key, || async {
                let rows = self
                    .repo
                    .find_page(recipient, unread_only, page.offset(), page.limit())
                    .await?;
                Ok::<_, ServiceError>(PageEnvelope::for_page(page, rows.total, rows.rows))
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn mark_read(&self, viewer: Option<RecordId>, id: RecordId) -> Result<(), ServiceError> {
        let recipient = require_actor(viewer)?;
        if !self.repo.mark_read(id, recipient).await? {
            return Err(ServiceError::not_found("notification"));
        }
        self.cache
            .invalidator()
            .notifications_changed(recipient)
            .await;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, viewer: Option<RecordId>, id: RecordId) -> Result<(), ServiceError> {
        let recipient = require_actor(viewer)?;
        if !self.repo.delete(id, recipient).await? {
            return Err(ServiceError::not_found("notification"));
        }
        self.cache
            .invalidator()
            .notifications_changed(recipient)
            .await;
        Ok(())
    }

    /// Stores a notification for `recipient`. Runs after the triggering write
    /// has committed, so failures are logged rather than returned.
    #[instrument(skip(self))]
    pub async fn notify(
        &self,
        recipient: RecordId,
        actor: RecordId,
        kind: NotificationKind,
        subject: Option<RecordId>,
    ) {
        let notification = NewNotification {
            recipient_id: recipient,
            actor_id: actor,
            kind,
            subject_id: subject,
        };
        match self.repo.create(notification).await {
            Ok(_) => {
                self.cache
                    .invalidator()
                    .notifications_changed(recipient)
                    .await;
            }
            Err(err) => {
                warn!(
                    target: "encore::notifications",
                    recipient,
                    kind = kind.as_str(),
                    error = %err,
                    "failed to record notification"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use time::OffsetDateTime;

    use super::*;
    use crate::application::repos::{RepoError, RowPage};

    #[derive(Default)]
    struct StubNotificationsRepo {
        rows: Mutex<Vec<NotificationRecord>>,
    }

    #[async_trait]
    impl NotificationsRepo for StubNotificationsRepo {
        async fn find_page(
            &self,
            recipient: RecordId,
            unread_only: bool,
            _offset: i64,
            _limit: i64,
        ) -> Result<RowPage<NotificationRecord>, RepoError> {
            let rows: Vec<_> = self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|row| row.recipient_id == recipient && (!unread_only || !row.is_read))
                .cloned()
                .collect();
            let total = rows.len() as u64;
            Ok(RowPage::new(rows, total))
        }

        async fn create(
            &self,
            new: NewNotification,
        ) -> Result<NotificationRecord, RepoError> {
            let mut rows = self.rows.lock().unwrap();
            let record = NotificationRecord {
                id: rows.len() as RecordId + 1,
                recipient_id: new.recipient_id,
                actor_id: new.actor_id,
                kind: new.kind,
                subject_id: new.subject_id,
                is_read: false,
                created_at: OffsetDateTime::UNIX_EPOCH,
            };
            rows.push(record.clone());
            Ok(record)
        }

        async fn mark_read(&self, id: RecordId, recipient: RecordId) -> Result<bool, RepoError> {
            let mut rows = self.rows.lock().unwrap();
            match rows
                .iter_mut()
                .find(|row| row.id == id && row.recipient_id == recipient)
            {
                Some(row) => {
                    row.is_read = true;
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn delete(&self, id: RecordId, recipient: RecordId) -> Result<bool, RepoError> {
            let mut rows = self.rows.lock().unwrap();
            let before = rows.len();
            rows.retain(|row| !(row.id == id && row.recipient_id == recipient));
            Ok(before != rows.len())
        }
    }

    #[tokio::test]
    async fn new_notifications_appear_in_a_cached_inbox() {
        let service = NotificationsService::new(
            Arc::new(StubNotificationsRepo::default()),
            CacheLayer::in_memory(),
        );
        let page = PageParams::new(1, 10).unwrap();

        assert_eq!(service.list(Some(1), page, false).await.unwrap().total_records, 0);
        service
            .notify(1, 2, NotificationKind::Follow, None)
            .await;
        assert_eq!(service.list(Some(1), page, false).await.unwrap().total_records, 1);
        assert_eq!(service.list(Some(2), page, false).await.unwrap().total_records, 0);
    }

    #[tokio::test]
    async fn marking_read_refreshes_the_unread_view() {
        let service = NotificationsService::new(
            Arc::new(StubNotificationsRepo::default()),
            CacheLayer::in_memory(),
        );
        let page = PageParams::new(1, 10).unwrap();
        service.notify(1, 2, NotificationKind::Comment, Some(5)).await;

        assert_eq!(service.list(Some(1), page, true).await.unwrap().total_records, 1);
        service.mark_read(Some(1), 1).await.unwrap();
        assert_eq!(service.list(Some(1), page, true).await.unwrap().total_records, 0);
        assert_eq!(service.list(Some(1), page, false).await.unwrap().total_records, 1);

        assert!(matches!(
            service.mark_read(Some(2), 1).await,
            Err(ServiceError::Domain(_))
        ));
    }

    #[tokio::test]
    async fn anonymous_viewers_have_no_inbox() {
        let service = NotificationsService::new(
            Arc::new(StubNotificationsRepo::default()),
            CacheLayer::in_memory(),
        );
        let page = PageParams::new(1, 10).unwrap();
        assert!(matches!(
            service.list(None, page, false).await,
            Err(ServiceError::Unauthenticated)
        ));
    }
}
