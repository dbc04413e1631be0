use async_trait::async_trait;
use sqlx::{FromRow, Postgres, QueryBuilder};
use time::OffsetDateTime;

use crate::{
    application::repos::{
        NewPlaylist, PlaylistChanges, PlaylistFilter, PlaylistsRepo, RepoError, RowPage,
    },
    domain::entities::{MusicRecord, PlaylistRecord, RecordId},
};

use super::{PostgresRepositories, like_pattern, map_sqlx_error, music::MusicRow, push_page};

const PLAYLIST_COLUMNS: &str = r#"
    p.id, p.owner_id, p.name, p.description, p.is_public,
    (SELECT COUNT(*) FROM playlist_tracks pt WHERE pt.playlist_id = p.id) AS track_count,
    p.created_at, p.updated_at
"#;

#[derive(FromRow)]
struct PlaylistRow {
    id: i64,
    owner_id: i64,
    name: String,
    description: Option<String>,
    is_public: bool,
    track_count: i64,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<PlaylistRow> for PlaylistRecord {
    fn from(row: PlaylistRow) -> Self {
        Self {
            id: row.id,
            owner_id: row.owner_id,
            name: row.name,
            description: row.description,
            is_public: row.is_public,
            track_count: row.track_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn push_visibility(qb: &mut QueryBuilder<'_, Postgres>, viewer: Option<RecordId>) {
    qb.push(" AND (p.is_public OR p.owner_id = ")
        .push_bind(viewer)
        .push(")");
}

fn push_filter<'q>(
    qb: &mut QueryBuilder<'q, Postgres>,
    filter: &'q PlaylistFilter,
    viewer: Option<RecordId>,
) {
    push_visibility(qb, viewer);
    if let Some(owner) = filter.owner {
        qb.push(" AND p.owner_id = ").push_bind(owner);
    }
    if let Some(search) = filter.search.as_deref() {
        let pattern = like_pattern(search);
        qb.push(" AND (p.name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR p.description ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

#[async_trait]
impl PlaylistsRepo for PostgresRepositories {
    async fn find_page(
        &self,
        filter: &PlaylistFilter,
        viewer: Option<RecordId>,
        offset: i64,
        limit: i64,
    ) -> Result<RowPage<PlaylistRecord>, RepoError> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM playlists p WHERE TRUE");
        push_filter(&mut count, filter, viewer);
        let total = self.count(count).await?;

        let mut qb =
            QueryBuilder::new(format!("SELECT {PLAYLIST_COLUMNS} FROM playlists p WHERE TRUE"));
        push_filter(&mut qb, filter, viewer);
        qb.push(" ORDER BY p.updated_at DESC, p.id DESC");
        push_page(&mut qb, offset, limit);

        let rows = qb
            .build_query_as::<PlaylistRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(RowPage::new(rows.into_iter().map(Into::into).collect(), total))
    }

    async fn find_by_id(
        &self,
        id: RecordId,
        viewer: Option<RecordId>,
    ) -> Result<Option<PlaylistRecord>, RepoError> {
        let mut qb =
            QueryBuilder::new(format!("SELECT {PLAYLIST_COLUMNS} FROM playlists p WHERE p.id = "));
        qb.push_bind(id);
        push_visibility(&mut qb, viewer);

        let row = qb
            .build_query_as::<PlaylistRow>()
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(Into::into))
    }

    async fn tracks(&self, playlist_id: RecordId) -> Result<Vec<MusicRecord>, RepoError> {
        let rows = sqlx::query_as::<_, MusicRow>(
            r#"
            SELECT m.id, m.title, m.artist, m.album_id, m.duration_secs, m.audio_url,
                   m.created_at, m.updated_at
            FROM playlist_tracks pt
            JOIN music m ON m.id = pt.music_id
            WHERE pt.playlist_id = $1
            ORDER BY pt.added_at ASC, m.id ASC
            "#,
        )
        .bind(playlist_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn create(&self, playlist: NewPlaylist) -> Result<PlaylistRecord, RepoError> {
        let row = sqlx::query_as::<_, PlaylistRow>(
            r#"
            INSERT INTO playlists (owner_id, name, description, is_public)
            VALUES ($1, $2, $3, $4)
            RETURNING id, owner_id, name, description, is_public,
                0::BIGINT AS track_count, created_at, updated_at
            "#,
        )
        .bind(playlist.owner_id)
        .bind(playlist.name)
        .bind(playlist.description)
        .bind(playlist.is_public)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn update(
        &self,
        id: RecordId,
        changes: PlaylistChanges,
    ) -> Result<Option<PlaylistRecord>, RepoError> {
        let row = sqlx::query_as::<_, PlaylistRow>(
            r#"
            UPDATE playlists
            SET name = COALESCE($2, name),
                description = COALESCE($3, description),
                is_public = COALESCE($4, is_public),
                updated_at = now()
            WHERE id = $1
            RETURNING id, owner_id, name, description, is_public,
                (SELECT COUNT(*) FROM playlist_tracks pt WHERE pt.playlist_id = playlists.id)
                    AS track_count,
                created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(changes.name)
        .bind(changes.description)
        .bind(changes.is_public)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.map(Into::into))
    }

    async fn delete(&self, id: RecordId) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM playlists WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_track(
        &self,
        playlist_id: RecordId,
        music_id: RecordId,
    ) -> Result<bool, RepoError> {
        let result = sqlx::query(
            r#"
            INSERT INTO playlist_tracks (playlist_id, music_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(playlist_id)
        .bind(music_id)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() > 0 {
            self.touch_playlist(playlist_id).await?;
        }
        Ok(result.rows_affected() > 0)
    }

    async fn remove_track(
        &self,
        playlist_id: RecordId,
        music_id: RecordId,
    ) -> Result<bool, RepoError> {
        let result =
            sqlx::query("DELETE FROM playlist_tracks WHERE playlist_id = $1 AND music_id = $2")
                .bind(playlist_id)
                .bind(music_id)
                .execute(self.pool())
                .await
                .map_err(map_sqlx_error)?;

        if result.rows_affected() > 0 {
            self.touch_playlist(playlist_id).await?;
        }
        Ok(result.rows_affected() > 0)
    }
}

impl PostgresRepositories {
    async fn touch_playlist(&self, playlist_id: RecordId) -> Result<(), RepoError> {
        sqlx::query("UPDATE playlists SET updated_at = now() WHERE id = $1")
            .bind(playlist_id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}
