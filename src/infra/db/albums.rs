use async_trait::async_trait;
use sqlx::{FromRow, Postgres, QueryBuilder};
use time::OffsetDateTime;

use crate::{
    application::repos::{AlbumChanges, AlbumFilter, AlbumsRepo, NewAlbum, RepoError, RowPage},
    domain::entities::{AlbumRecord, RecordId},
};

use super::{PostgresRepositories, like_pattern, map_sqlx_error, push_page};

const ALBUM_COLUMNS: &str = r#"
    a.id, a.title, a.artist, a.cover_url,
    (SELECT COUNT(*) FROM music m WHERE m.album_id = a.id) AS track_count,
    a.created_at, a.updated_at
"#;

#[derive(FromRow)]
struct AlbumRow {
    id: i64,
    title: String,
    artist: String,
    cover_url: Option<String>,
    track_count: i64,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<AlbumRow> for AlbumRecord {
    fn from(row: AlbumRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            artist: row.artist,
            cover_url: row.cover_url,
            track_count: row.track_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn push_filter<'q>(qb: &mut QueryBuilder<'q, Postgres>, filter: &'q AlbumFilter) {
    if let Some(artist) = filter.artist.as_deref() {
        qb.push(" AND LOWER(a.artist) = LOWER(")
            .push_bind(artist)
            .push(")");
    }
    if let Some(search) = filter.search.as_deref() {
        let pattern = like_pattern(search);
        qb.push(" AND (a.title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR a.artist ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

#[async_trait]
impl AlbumsRepo for PostgresRepositories {
    async fn find_page(
        &self,
        filter: &AlbumFilter,
        offset: i64,
        limit: i64,
    ) -> Result<RowPage<AlbumRecord>, RepoError> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM albums a WHERE TRUE");
        push_filter(&mut count, filter);
        let total = self.count(count).await?;

        let mut qb = QueryBuilder::new(format!("SELECT {ALBUM_COLUMNS} FROM albums a WHERE TRUE"));
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY a.created_at DESC, a.id DESC");
        push_page(&mut qb, offset, limit);

        let rows = qb
            .build_query_as::<AlbumRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(RowPage::new(rows.into_iter().map(Into::into).collect(), total))
    }

    async fn find_by_id(&self, id: RecordId) -> Result<Option<AlbumRecord>, RepoError> {
        let sql = format!("SELECT {ALBUM_COLUMNS} FROM albums a WHERE a.id = $1");
        let row = sqlx::query_as::<_, AlbumRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(Into::into))
    }

    async fn create(&self, album: NewAlbum) -> Result<AlbumRecord, RepoError> {
        let row = sqlx::query_as::<_, AlbumRow>(
            r#"
            INSERT INTO albums (title, artist, cover_url)
            VALUES ($1, $2, $3)
            RETURNING id, title, artist, cover_url, 0::BIGINT AS track_count, created_at, updated_at
            "#,
        )
        .bind(album.title)
        .bind(album.artist)
        .bind(album.cover_url)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn update(
        &self,
        id: RecordId,
        changes: AlbumChanges,
    ) -> Result<Option<AlbumRecord>, RepoError> {
        let row = sqlx::query_as::<_, AlbumRow>(
            r#"
            UPDATE albums
            SET title = COALESCE($2, title),
                artist = COALESCE($3, artist),
                cover_url = COALESCE($4, cover_url),
                updated_at = now()
            WHERE id = $1
            RETURNING id, title, artist, cover_url,
                (SELECT COUNT(*) FROM music m WHERE m.album_id = albums.id) AS track_count,
                created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(changes.title)
        .bind(changes.artist)
        .bind(changes.cover_url)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.map(Into::into))
    }

    async fn delete(&self, id: RecordId) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM albums WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }
}
