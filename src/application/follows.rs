use std::sync::Arc;

use tracing::instrument;

use crate::application::access::require_actor;
use crate::application::error::ServiceError;
use crate::application::notifications::NotificationsService;
use crate::application::pagination::{PageEnvelope, PageParams};
use crate::application::repos::FollowsRepo;
use crate::cache::{CacheLayer, Entity, ListFilters};
use crate::domain::entities::{FollowRecord, RecordId, UserSummary};
use crate::domain::error::DomainError;
use crate::domain::types::NotificationKind;

/// Follow graph: who follows a user, and whom a user follows.
pub struct FollowsService {
    repo: Arc<dyn FollowsRepo>,
    notifications: Arc<NotificationsService>,
    cache: CacheLayer,
}

impl FollowsService {
    pub fn new(
        repo: Arc<dyn FollowsRepo>,
        notifications: Arc<NotificationsService>,
        cache: CacheLayer,
    ) -> Self {
        Self {
            repo,
            notifications,
            cache,
        }
    }

    #[instrument(skip(self))]
    pub async fn followers(
        &self,
        user_id: RecordId,
        page: PageParams,
    ) -> Result<PageEnvelope<UserSummary>, ServiceError> {
        self.page(Entity::Followers, user_id, page).await
    }

    #[instrument(skip(self))]
    pub async fn following(
        &self,
        user_id: RecordId,
        page: PageParams,
    ) -> Result<PageEnvelope<UserSummary>, ServiceError> {
        self.page(Entity::Following, user_id, page).await
    }

    async fn page(
        &self,
        entity: Entity,
        user_id: RecordId,
        page: PageParams,
    ) -> Result<PageEnvelope<UserSummary>, ServiceError> {
        let key = self.cache.keys().scoped_list_key(
            entity,
            user_id,
            page,
            &ListFilters::new(),
            None,
        )?;

        self.cache
            .reads()
            .read_through(entity, &key, || async {
                let rows = match entity {
                    Entity::Followers => {
                        self.repo
                            .followers(user_id, page.offset(), page.limit())
                            .await?
                    }
                    _ => {
                        self.repo
                            .following(user_id, page.offset(), page.limit())
                            .await?
                    }
                };
                Ok::<_, ServiceError>(PageEnvelope::for_page(page, rows.total, rows.rows))
            })
            .await
    }

    /// Follows `user_id` as the viewer. Following is idempotent; only the
    /// first follow notifies the followed user.
    #[instrument(skip(self))]
    pub async fn follow(
        &self,
        viewer: Option<RecordId>,
        user_id: RecordId,
    ) -> Result<Option<FollowRecord>, ServiceError> {
        let follower = require_actor(viewer)?;
        if follower == user_id {
            return Err(DomainError::validation("users cannot follow themselves").into());
        }
        if !self.repo.user_exists(user_id).await? {
            return Err(ServiceError::not_found("user"));
        }

        let created = self.repo.follow(follower, user_id).await?;
        if created.is_some() {
            self.cache
                .invalidator()
                .follow_changed(follower, user_id)
                .await;
            self.notifications
                .notify(user_id, follower, NotificationKind::Follow, None)
                .await;
        }
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn unfollow(
        &self,
        viewer: Option<RecordId>,
        user_id: RecordId,
    ) -> Result<(), ServiceError> {
        let follower = require_actor(viewer)?;
        if !self.repo.unfollow(follower, user_id).await? {
            return Err(ServiceError::not_found("follow"));
        }
        self.cache
            .invalidator()
            .follow_changed(follower, user_id)
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use time::OffsetDateTime;

    use super::*;
    use crate::application::repos::{
        NewNotification, NotificationsRepo, RepoError, RowPage,
    };
    use crate::domain::entities::NotificationRecord;

    #[derive(Default)]
    struct StubFollowsRepo {
        edges: Mutex<BTreeSet<(RecordId, RecordId)>>,
    }

    fn user(id: RecordId) -> UserSummary {
        UserSummary {
            id,
            username: format!("user{id}"),
            display_name: None,
        }
    }

    #[async_trait]
    impl FollowsRepo for StubFollowsRepo {
        async fn followers(
            &self,
            user_id: RecordId,
            _offset: i64,
            _limit: i64,
        ) -> Result<RowPage<UserSummary>, RepoError> {
            let rows: Vec<_> = self
                .edges
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, followed)| *followed == user_id)
                .map(|(follower, _)| user(*follower))
                .collect();
            let total = rows.len() as u64;
            Ok(RowPage::new(rows, total))
        }

        async fn following(
            &self,
            user_id: RecordId,
            _offset: i64,
            _limit: i64,
        ) -> Result<RowPage<UserSummary>, RepoError> {
            let rows: Vec<_> = self
                .edges
                .lock()
                .unwrap()
                .iter()
                .filter(|(follower, _)| *follower == user_id)
                .map(|(_, followed)| user(*followed))
                .collect();
            let total = rows.len() as u64;
            Ok(RowPage::new(rows, total))
        }

        async fn user_exists(&self, user_id: RecordId) -> Result<bool, RepoError> {
            Ok(user_id < 100)
        }

        async fn follow(
            &self,
            follower: RecordId,
            followed: RecordId,
        ) -> Result<Option<FollowRecord>, RepoError> {
            let inserted = self.edges.lock().unwrap().insert((follower, followed));
            Ok(inserted.then(|| FollowRecord {
                follower_id: follower,
                followed_id: followed,
                created_at: OffsetDateTime::UNIX_EPOCH,
            }))
        }

        async fn unfollow(&self, follower: RecordId, followed: RecordId) -> Result<bool, RepoError> {
            Ok(self.edges.lock().unwrap().remove(&(follower, followed)))
        }
    }

    #[derive(Default)]
    struct RecordingNotificationsRepo {
        created: Mutex<Vec<NewNotification>>,
    }

    #[async_trait]
    impl NotificationsRepo for RecordingNotificationsRepo {
        async fn find_page(
            &self,
            _recipient: RecordId,
            _unread_only: bool,
            _offset: i64,
            _limit: i64,
        ) -> Result<RowPage<NotificationRecord>, RepoError> {
            Ok(RowPage::new(Vec::new(), 0))
        }

        async fn create(
            &self,
            notification: NewNotification,
        ) -> Result<NotificationRecord, RepoError> {
            let record = NotificationRecord {
                id: 1,
                recipient_id: notification.recipient_id,
                actor_id: notification.actor_id,
                kind: notification.kind,
                subject_id: notification.subject_id,
                is_read: false,
                created_at: OffsetDateTime::UNIX_EPOCH,
            };
            self.created.lock().unwrap().push(notification);
            Ok(record)
        }

        async fn mark_read(&self, _id: RecordId, _recipient: RecordId) -> Result<bool, RepoError> {
            Ok(false)
        }

        async fn delete(&self, _id: RecordId, _recipient: RecordId) -> Result<bool, RepoError> {
            Ok(false)
        }
    }

    fn service() -> (FollowsService, Arc<RecordingNotificationsRepo>) {
        let cache = CacheLayer::in_memory();
        let notifications_repo = Arc::new(RecordingNotificationsRepo::default());
        let notifications = Arc::new(NotificationsService::new(
            notifications_repo.clone(),
            cache.clone(),
        ));
        (
            FollowsService::new(Arc::new(StubFollowsRepo::default()), notifications, cache),
            notifications_repo,
        )
    }

    #[tokio::test]
    async fn follow_refreshes_both_cached_pages_and_notifies_once() {
        let (service, notifications) = service();
        let page = PageParams::new(1, 10).unwrap();

        assert_eq!(service.followers(2, page).await.unwrap().total_records, 0);
        assert_eq!(service.following(1, page).await.unwrap().total_records, 0);

        assert!(service.follow(Some(1), 2).await.unwrap().is_some());
        assert!(service.follow(Some(1), 2).await.unwrap().is_none());

        assert_eq!(service.followers(2, page).await.unwrap().items, vec![user(1)]);
        assert_eq!(service.following(1, page).await.unwrap().items, vec![user(2)]);
        assert_eq!(notifications.created.lock().unwrap().len(), 1);

        service.unfollow(Some(1), 2).await.unwrap();
        assert_eq!(service.followers(2, page).await.unwrap().total_records, 0);
    }

    #[tokio::test]
    async fn self_follow_and_unknown_users_are_rejected() {
        let (service, _) = service();
        assert!(matches!(
            service.follow(Some(3), 3).await,
            Err(ServiceError::Domain(DomainError::Validation { .. }))
        ));
        assert!(matches!(
            service.follow(Some(3), 500).await,
            Err(ServiceError::Domain(DomainError::NotFound { entity: "user" }))
        ));
        assert!(matches!(
            service.follow(None, 3).await,
            Err(ServiceError::Unauthenticated)
        ));
    }
}
