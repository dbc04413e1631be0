use async_trait::async_trait;
use sqlx::{FromRow, Postgres, QueryBuilder};
use time::OffsetDateTime;

use crate::{
    application::repos::{MusicChanges, MusicFilter, MusicRepo, NewMusic, RepoError, RowPage},
    domain::entities::{MusicRecord, RecordId},
};

use super::{PostgresRepositories, like_pattern, map_sqlx_error, push_page};

const MUSIC_COLUMNS: &str =
    "m.id, m.title, m.artist, m.album_id, m.duration_secs, m.audio_url, m.created_at, m.updated_at";

#[derive(FromRow)]
pub(super) struct MusicRow {
    id: i64,
    title: String,
    artist: String,
    album_id: Option<i64>,
    duration_secs: i32,
    audio_url: String,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<MusicRow> for MusicRecord {
    fn from(row: MusicRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            artist: row.artist,
            album_id: row.album_id,
            duration_secs: row.duration_secs,
            audio_url: row.audio_url,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn push_filter<'q>(qb: &mut QueryBuilder<'q, Postgres>, filter: &'q MusicFilter) {
    if let Some(album) = filter.album {
        qb.push(" AND m.album_id = ").push_bind(album);
    }
    if let Some(artist) = filter.artist.as_deref() {
        qb.push(" AND LOWER(m.artist) = LOWER(")
            .push_bind(artist)
            .push(")");
    }
    if let Some(search) = filter.search.as_deref() {
        let pattern = like_pattern(search);
        qb.push(" AND (m.title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR m.artist ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

#[async_trait]
impl MusicRepo for PostgresRepositories {
    async fn find_page(
        &self,
        filter: &MusicFilter,
        offset: i64,
        limit: i64,
    ) -> Result<RowPage<MusicRecord>, RepoError> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM music m WHERE TRUE");
        push_filter(&mut count, filter);
        let total = self.count(count).await?;

        let mut qb = QueryBuilder::new(format!("SELECT {MUSIC_COLUMNS} FROM music m WHERE TRUE"));
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY m.created_at DESC, m.id DESC");
        push_page(&mut qb, offset, limit);

        let rows = qb
            .build_query_as::<MusicRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(RowPage::new(rows.into_iter().map(Into::into).collect(), total))
    }

    async fn find_by_id(&self, id: RecordId) -> Result<Option<MusicRecord>, RepoError> {
        let sql = format!("SELECT {MUSIC_COLUMNS} FROM music m WHERE m.id = $1");
        let row = sqlx::query_as::<_, MusicRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(Into::into))
    }

    async fn create(&self, music: NewMusic) -> Result<MusicRecord, RepoError> {
        let row = sqlx::query_as::<_, MusicRow>(
            r#"
            INSERT INTO music (title, artist, album_id, duration_secs, audio_url)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, title, artist, album_id, duration_secs, audio_url, created_at, updated_at
            "#,
        )
        .bind(music.title)
        .bind(music.artist)
        .bind(music.album_id)
        .bind(music.duration_secs)
        .bind(music.audio_url)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn update(
        &self,
        id: RecordId,
        changes: MusicChanges,
    ) -> Result<Option<MusicRecord>, RepoError> {
        let row = sqlx::query_as::<_, MusicRow>(
            r#"
            UPDATE music
            SET title = COALESCE($2, title),
                artist = COALESCE($3, artist),
                album_id = COALESCE($4, album_id),
                duration_secs = COALESCE($5, duration_secs),
                audio_url = COALESCE($6, audio_url),
                updated_at = now()
            WHERE id = $1
            RETURNING id, title, artist, album_id, duration_secs, audio_url, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(changes.title)
        .bind(changes.artist)
        .bind(changes.album_id)
        .bind(changes.duration_secs)
        .bind(changes.audio_url)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.map(Into::into))
    }

    async fn delete(&self, id: RecordId) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM music WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }
}
