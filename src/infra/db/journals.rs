use async_trait::async_trait;
use sqlx::{FromRow, Postgres, QueryBuilder};
use time::OffsetDateTime;

use crate::{
    application::repos::{
        JournalChanges, JournalFilter, JournalsRepo, NewJournal, RepoError, RowPage,
    },
    domain::entities::{JournalRecord, RecordId},
};

use super::{PostgresRepositories, like_pattern, map_sqlx_error, push_page};

const JOURNAL_COLUMNS: &str =
    "j.id, j.author_id, j.title, j.body, j.is_private, j.created_at, j.updated_at";

#[derive(FromRow)]
struct JournalRow {
    id: i64,
    author_id: i64,
    title: String,
    body: String,
    is_private: bool,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<JournalRow> for JournalRecord {
    fn from(row: JournalRow) -> Self {
        Self {
            id: row.id,
            author_id: row.author_id,
            title: row.title,
            body: row.body,
            is_private: row.is_private,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Private entries are only visible to their author.
fn push_visibility(qb: &mut QueryBuilder<'_, Postgres>, viewer: Option<RecordId>) {
    qb.push(" AND (NOT j.is_private OR j.author_id = ")
        .push_bind(viewer)
        .push(")");
}

fn push_filter<'q>(
    qb: &mut QueryBuilder<'q, Postgres>,
    filter: &'q JournalFilter,
    viewer: Option<RecordId>,
) {
    push_visibility(qb, viewer);
    if let Some(author) = filter.author {
        qb.push(" AND j.author_id = ").push_bind(author);
    }
    if let Some(search) = filter.search.as_deref() {
        let pattern = like_pattern(search);
        qb.push(" AND (j.title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR j.body ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

#[async_trait]
impl JournalsRepo for PostgresRepositories {
    async fn find_page(
        &self,
        filter: &JournalFilter,
        viewer: Option<RecordId>,
        offset: i64,
        limit: i64,
    ) -> Result<RowPage<JournalRecord>, RepoError> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM journals j WHERE TRUE");
        push_filter(&mut count, filter, viewer);
        let total = self.count(count).await?;

        let mut qb =
            QueryBuilder::new(format!("SELECT {JOURNAL_COLUMNS} FROM journals j WHERE TRUE"));
        push_filter(&mut qb, filter, viewer);
        qb.push(" ORDER BY j.created_at DESC, j.id DESC");
        push_page(&mut qb, offset, limit);

        let rows = qb
            .build_query_as::<JournalRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(RowPage::new(rows.into_iter().map(Into::into).collect(), total))
    }

    async fn find_by_id(
        &self,
        id: RecordId,
        viewer: Option<RecordId>,
    ) -> Result<Option<JournalRecord>, RepoError> {
        let mut qb = QueryBuilder::new(format!("SELECT {JOURNAL_COLUMNS} FROM journals j WHERE j.id = "));
        qb.push_bind(id);
        push_visibility(&mut qb, viewer);

        let row = qb
            .build_query_as::<JournalRow>()
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(Into::into))
    }

    async fn create(&self, journal: NewJournal) -> Result<JournalRecord, RepoError> {
        let row = sqlx::query_as::<_, JournalRow>(
            r#"
            INSERT INTO journals (author_id, title, body, is_private)
            VALUES ($1, $2, $3, $4)
            RETURNING id, author_id, title, body, is_private, created_at, updated_at
            "#,
        )
        .bind(journal.author_id)
        .bind(journal.title)
        .bind(journal.body)
        .bind(journal.is_private)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn update(
        &self,
        id: RecordId,
        changes: JournalChanges,
    ) -> Result<Option<JournalRecord>, RepoError> {
        let row = sqlx::query_as::<_, JournalRow>(
            r#"
            UPDATE journals
            SET title = COALESCE($2, title),
                body = COALESCE($3, body),
                is_private = COALESCE($4, is_private),
                updated_at = now()
            WHERE id = $1
            RETURNING id, author_id, title, body, is_private, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(changes.title)
        .bind(changes.body)
        .bind(changes.is_private)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.map(Into::into))
    }

    async fn delete(&self, id: RecordId) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM journals WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }
}
