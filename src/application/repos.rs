//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entities::{
    AlbumRecord, BlogRecord, CommentRecord, FollowRecord, JournalRecord, MusicRecord,
    NotificationRecord, PlaylistRecord, PostRecord, RecordId, ReplyRecord, UserSummary,
};
use crate::domain::types::{NotificationKind, PostVisibility};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// One page of rows plus the total matching the filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowPage<T> {
    pub rows: Vec<T>,
    pub total: u64,
}

impl<T> RowPage<T> {
    pub fn new(rows: Vec<T>, total: u64) -> Self {
        Self { rows, total }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlogFilter {
    pub author: Option<RecordId>,
    pub category: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewBlog {
    pub author_id: RecordId,
    pub title: String,
    pub category: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone, Default)]
pub struct BlogChanges {
    pub title: Option<String>,
    pub category: Option<String>,
    pub body: Option<String>,
}

#[async_trait]
pub trait BlogsRepo: Send + Sync {
    async fn find_page(
        &self,
        filter: &BlogFilter,
        offset: i64,
        limit: i64,
    ) -> Result<RowPage<BlogRecord>, RepoError>;

    async fn find_by_id(&self, id: RecordId) -> Result<Option<BlogRecord>, RepoError>;

    async fn create(&self, blog: NewBlog) -> Result<BlogRecord, RepoError>;

    async fn update(
        &self,
        id: RecordId,
        changes: BlogChanges,
    ) -> Result<Option<BlogRecord>, RepoError>;

    async fn delete(&self, id: RecordId) -> Result<bool, RepoError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalFilter {
    pub author: Option<RecordId>,
    pub search: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewJournal {
    pub author_id: RecordId,
    pub title: String,
    pub body: String,
    pub is_private: bool,
}

#[derive(Debug, Clone, Default)]
pub struct JournalChanges {
    pub title: Option<String>,
    pub body: Option<String>,
    pub is_private: Option<bool>,
}

/// Journal queries only return entries visible to `viewer`: public ones, and
/// private ones the viewer wrote.
#[async_trait]
pub trait JournalsRepo: Send + Sync {
    async fn find_page(
        &self,
        filter: &JournalFilter,
        viewer: Option<RecordId>,
        offset: i64,
        limit: i64,
    ) -> Result<RowPage<JournalRecord>, RepoError>;

    async fn find_by_id(
        &self,
        id: RecordId,
        viewer: Option<RecordId>,
    ) -> Result<Option<JournalRecord>, RepoError>;

    async fn create(&self, journal: NewJournal) -> Result<JournalRecord, RepoError>;

    async fn update(
        &self,
        id: RecordId,
        changes: JournalChanges,
    ) -> Result<Option<JournalRecord>, RepoError>;

    async fn delete(&self, id: RecordId) -> Result<bool, RepoError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlbumFilter {
    pub artist: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewAlbum {
    pub title: String,
    pub artist: String,
    pub cover_url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AlbumChanges {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub cover_url: Option<String>,
}

#[async_trait]
pub trait AlbumsRepo: Send + Sync {
    async fn find_page(
        &self,
        filter: &AlbumFilter,
        offset: i64,
        limit: i64,
    ) -> Result<RowPage<AlbumRecord>, RepoError>;

    async fn find_by_id(&self, id: RecordId) -> Result<Option<AlbumRecord>, RepoError>;

    async fn create(&self, album: NewAlbum) -> Result<AlbumRecord, RepoError>;

    async fn update(
        &self,
        id: RecordId,
        changes: AlbumChanges,
    ) -> Result<Option<AlbumRecord>, RepoError>;

    async fn delete(&self, id: RecordId) -> Result<bool, RepoError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MusicFilter {
    pub album: Option<RecordId>,
    pub artist: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewMusic {
    pub title: String,
    pub artist: String,
    pub album_id: Option<RecordId>,
    pub duration_secs: i32,
    pub audio_url: String,
}

#[derive(Debug, Clone, Default)]
pub struct MusicChanges {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album_id: Option<RecordId>,
    pub duration_secs: Option<i32>,
    pub audio_url: Option<String>,
}

#[async_trait]
pub trait MusicRepo: Send + Sync {
    async fn find_page(
        &self,
        filter: &MusicFilter,
        offset: i64,
        limit: i64,
    ) -> Result<RowPage<MusicRecord>, RepoError>;

    async fn find_by_id(&self, id: RecordId) -> Result<Option<MusicRecord>, RepoError>;

    async fn create(&self, music: NewMusic) -> Result<MusicRecord, RepoError>;

    async fn update(
        &self,
        id: RecordId,
        changes: MusicChanges,
    ) -> Result<Option<MusicRecord>, RepoError>;

    async fn delete(&self, id: RecordId) -> Result<bool, RepoError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistFilter {
    pub owner: Option<RecordId>,
    pub search: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewPlaylist {
    pub owner_id: RecordId,
    pub name: String,
    pub description: Option<String>,
    pub is_public: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PlaylistChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_public: Option<bool>,
}

/// Playlist queries return public playlists and those owned by `viewer`.
#[async_trait]
pub trait PlaylistsRepo: Send + Sync {
    async fn find_page(
        &self,
        filter: &PlaylistFilter,
        viewer: Option<RecordId>,
        offset: i64,
        limit: i64,
    ) -> Result<RowPage<PlaylistRecord>, RepoError>;

    async fn find_by_id(
        &self,
        id: RecordId,
        viewer: Option<RecordId>,
    ) -> Result<Option<PlaylistRecord>, RepoError>;

    async fn tracks(&self, playlist_id: RecordId) -> Result<Vec<MusicRecord>, RepoError>;

    async fn create(&self, playlist: NewPlaylist) -> Result<PlaylistRecord, RepoError>;

    async fn update(
        &self,
        id: RecordId,
        changes: PlaylistChanges,
    ) -> Result<Option<PlaylistRecord>, RepoError>;

    async fn delete(&self, id: RecordId) -> Result<bool, RepoError>;

    /// Returns false when the track was already present.
    async fn add_track(&self, playlist_id: RecordId, music_id: RecordId)
    -> Result<bool, RepoError>;

    async fn remove_track(
        &self,
        playlist_id: RecordId,
        music_id: RecordId,
    ) -> Result<bool, RepoError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostFilter {
    pub author: Option<RecordId>,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub author_id: RecordId,
    pub body: String,
    pub visibility: PostVisibility,
}

#[derive(Debug, Clone, Default)]
pub struct PostChanges {
    pub body: Option<String>,
    pub visibility: Option<PostVisibility>,
}

/// Post queries apply visibility: public posts, followers-only posts when the
/// viewer follows the author, and private posts only for their author.
#[async_trait]
pub trait PostsRepo: Send + Sync {
    async fn find_page(
        &self,
        filter: &PostFilter,
        viewer: Option<RecordId>,
        offset: i64,
        limit: i64,
    ) -> Result<RowPage<PostRecord>, RepoError>;

    async fn find_by_id(
        &self,
        id: RecordId,
        viewer: Option<RecordId>,
    ) -> Result<Option<PostRecord>, RepoError>;

    async fn create(&self, post: NewPost) -> Result<PostRecord, RepoError>;

    async fn update(
        &self,
        id: RecordId,
        changes: PostChanges,
    ) -> Result<Option<PostRecord>, RepoError>;

    async fn delete(&self, id: RecordId) -> Result<bool, RepoError>;
}

#[derive(Debug, Clone)]
pub struct NewComment {
    pub post_id: RecordId,
    pub author_id: RecordId,
    pub body: String,
}

#[async_trait]
pub trait CommentsRepo: Send + Sync {
    async fn find_page(
        &self,
        post_id: RecordId,
        offset: i64,
        limit: i64,
    ) -> Result<RowPage<CommentRecord>, RepoError>;

    async fn find_by_id(&self, id: RecordId) -> Result<Option<CommentRecord>, RepoError>;

    async fn create(&self, comment: NewComment) -> Result<CommentRecord, RepoError>;

    async fn delete(&self, id: RecordId) -> Result<bool, RepoError>;
}

#[derive(Debug, Clone)]
pub struct NewReply {
    pub comment_id: RecordId,
    pub author_id: RecordId,
    pub body: String,
}

#[async_trait]
pub trait RepliesRepo: Send + Sync {
    async fn find_page(
        &self,
        comment_id: RecordId,
        offset: i64,
        limit: i64,
    ) -> Result<RowPage<ReplyRecord>, RepoError>;

    async fn find_by_id(&self, id: RecordId) -> Result<Option<ReplyRecord>, RepoError>;

    async fn create(&self, reply: NewReply) -> Result<ReplyRecord, RepoError>;

    async fn delete(&self, id: RecordId) -> Result<bool, RepoError>;
}

#[async_trait]
pub trait FollowsRepo: Send + Sync {
    /// Users following `user_id`.
    async fn followers(
        &self,
        user_id: RecordId,
        offset: i64,
        limit: i64,
    ) -> Result<RowPage<UserSummary>, RepoError>;

    /// Users `user_id` follows.
    async fn following(
        &self,
        user_id: RecordId,
        offset: i64,
        limit: i64,
    ) -> Result<RowPage<UserSummary>, RepoError>;

    async fn user_exists(&self, user_id: RecordId) -> Result<bool, RepoError>;

    /// Returns `None` when the edge already existed.
    async fn follow(
        &self,
        follower: RecordId,
        followed: RecordId,
    ) -> Result<Option<FollowRecord>, RepoError>;

    async fn unfollow(&self, follower: RecordId, followed: RecordId) -> Result<bool, RepoError>;
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub recipient_id: RecordId,
    pub actor_id: RecordId,
    pub kind: NotificationKind,
    pub subject_id: Option<RecordId>,
}

#[async_trait]
pub trait NotificationsRepo: Send + Sync {
    async fn find_page(
        &self,
        recipient: RecordId,
        unread_only: bool,
        offset: i64,
        limit: i64,
    ) -> Result<RowPage<NotificationRecord>, RepoError>;

    async fn create(
        &self,
        notification: NewNotification,
    ) -> Result<NotificationRecord, RepoError>;

    /// Only the recipient may mark or delete their notifications; other ids
    /// behave as missing.
    async fn mark_read(&self, id: RecordId, recipient: RecordId) -> Result<bool, RepoError>;

    async fn delete(&self, id: RecordId, recipient: RecordId) -> Result<bool, RepoError>;
}
