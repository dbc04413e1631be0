use async_trait::async_trait;
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::{
    application::repos::{FollowsRepo, RepoError, RowPage},
    domain::entities::{FollowRecord, RecordId, UserSummary},
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(FromRow)]
struct UserRow {
    id: i64,
    username: String,
    display_name: Option<String>,
}

impl From<UserRow> for UserSummary {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            display_name: row.display_name,
        }
    }
}

#[derive(FromRow)]
struct FollowRow {
    follower_id: i64,
    followed_id: i64,
    created_at: OffsetDateTime,
}

impl From<FollowRow> for FollowRecord {
    fn from(row: FollowRow) -> Self {
        Self {
            follower_id: row.follower_id,
            followed_id: row.followed_id,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl FollowsRepo for PostgresRepositories {
    async fn followers(
        &self,
        user_id: RecordId,
        offset: i64,
        limit: i64,
    ) -> Result<RowPage<UserSummary>, RepoError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM follows WHERE followed_id = $1")
            .bind(user_id)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        let rows = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT u.id, u.username, u.display_name
            FROM follows f
            JOIN users u ON u.id = f.follower_id
            WHERE f.followed_id = $1
            ORDER BY f.created_at DESC, u.id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
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

    async fn following(
        &self,
        user_id: RecordId,
        offset: i64,
        limit: i64,
    ) -> Result<RowPage<UserSummary>, RepoError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM follows WHERE follower_id = $1")
            .bind(user_id)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        let rows = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT u.id, u.username, u.display_name
            FROM follows f
            JOIN users u ON u.id = f.followed_id
            WHERE f.follower_id = $1
            ORDER BY f.created_at DESC, u.id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
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

    async fn user_exists(&self, user_id: RecordId) -> Result<bool, RepoError> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
            .bind(user_id)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)
    }

    async fn follow(
        &self,
        follower: RecordId,
        followed: RecordId,
    ) -> Result<Option<FollowRecord>, RepoError> {
        let row = sqlx::query_as::<_, FollowRow>(
            r#"
            INSERT INTO follows (follower_id, followed_id)
            VALUES ($1, $2)
            ON CONFLICT (follower_id, followed_id) DO NOTHING
            RETURNING follower_id, followed_id, created_at
            "#,
        )
        .bind(follower)
        .bind(followed)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.map(Into::into))
    }

    async fn unfollow(&self, follower: RecordId, followed: RecordId) -> Result<bool, RepoError> {
        let result =
            sqlx::query("DELETE FROM follows WHERE follower_id = $1 AND followed_id = $2")
                .bind(follower)
                .bind(followed)
                .execute(self.pool())
                .await
                .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }
}
