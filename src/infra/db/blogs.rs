use async_trait::async_trait;
use sqlx::{FromRow, Postgres, QueryBuilder};
use time::OffsetDateTime;

use crate::{
    application::repos::{BlogChanges, BlogFilter, BlogsRepo, NewBlog, RepoError, RowPage},
    domain::entities::{BlogRecord, RecordId},
};

use super::{PostgresRepositories, like_pattern, map_sqlx_error, push_page};

const BLOG_COLUMNS: &str = "b.id, b.author_id, b.title, b.category, b.body, b.created_at, b.updated_at";

#[derive(FromRow)]
struct BlogRow {
    id: i64,
    author_id: i64,
    title: String,
    category: Option<String>,
    body: String,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<BlogRow> for BlogRecord {
    fn from(row: BlogRow) -> Self {
        Self {
            id: row.id,
            author_id: row.author_id,
            title: row.title,
            category: row.category,
            body: row.body,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn push_filter<'q>(qb: &mut QueryBuilder<'q, Postgres>, filter: &'q BlogFilter) {
    if let Some(author) = filter.author {
        qb.push(" AND b.author_id = ").push_bind(author);
    }
    if let Some(category) = filter.category.as_deref() {
        qb.push(" AND b.category = ").push_bind(category);
    }
    if let Some(search) = filter.search.as_deref() {
        let pattern = like_pattern(search);
        qb.push(" AND (b.title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR b.body ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

#[async_trait]
impl BlogsRepo for PostgresRepositories {
    async fn find_page(
        &self,
        filter: &BlogFilter,
        offset: i64,
        limit: i64,
    ) -> Result<RowPage<BlogRecord>, RepoError> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM blogs b WHERE TRUE");
        push_filter(&mut count, filter);
        let total = self.count(count).await?;

        let mut qb = QueryBuilder::new(format!("SELECT {BLOG_COLUMNS} FROM blogs b WHERE TRUE"));
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY b.created_at DESC, b.id DESC");
        push_page(&mut qb, offset, limit);

        let rows = qb
            .build_query_as::<BlogRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(RowPage::new(rows.into_iter().map(Into::into).collect(), total))
    }

    async fn find_by_id(&self, id: RecordId) -> Result<Option<BlogRecord>, RepoError> {
        let sql = format!("SELECT {BLOG_COLUMNS} FROM blogs b WHERE b.id = $1");
        let row = sqlx::query_as::<_, BlogRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(Into::into))
    }

    async fn create(&self, blog: NewBlog) -> Result<BlogRecord, RepoError> {
        let row = sqlx::query_as::<_, BlogRow>(
            r#"
            INSERT INTO blogs (author_id, title, category, body)
            VALUES ($1, $2, $3, $4)
            RETURNING id, author_id, title, category, body, created_at, updated_at
            "#,
        )
        .bind(blog.author_id)
        .bind(blog.title)
        .bind(blog.category)
        .bind(blog.body)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn update(
        &self,
        id: RecordId,
        changes: BlogChanges,
    ) -> Result<Option<BlogRecord>, RepoError> {
        let row = sqlx::query_as::<_, BlogRow>(
            r#"
            UPDATE blogs
            SET title = COALESCE($2, title),
                category = COALESCE($3, category),
                body = COALESCE($4, body),
                updated_at = now()
            WHERE id = $1
            RETURNING id, author_id, title, category, body, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(changes.title)
        .bind(changes.category)
        .bind(changes.body)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.map(Into::into))
    }

    async fn delete(&self, id: RecordId) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM blogs WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }
}
