use std::sync::Arc;

use async_trait::async_trait;

use crate::application::{
    albums::AlbumsService,
    blogs::BlogsService,
    comments::CommentsService,
    follows::FollowsService,
    journals::JournalsService,
    music::MusicService,
    notifications::NotificationsService,
    playlists::PlaylistsService,
    posts::PostsService,
    repos::{
        AlbumsRepo, BlogsRepo, CommentsRepo, FollowsRepo, JournalsRepo, MusicRepo,
        NotificationsRepo, PlaylistsRepo, PostsRepo, RepliesRepo,
    },
};
use crate::cache::CacheLayer;
use crate::infra::db::PostgresRepositories;

use super::middleware::OpsToken;

/// Database reachability as seen by `/health`.
#[async_trait]
pub trait DatabaseProbe: Send + Sync {
    async fn ping(&self) -> Result<(), String>;
}

#[async_trait]
impl DatabaseProbe for PostgresRepositories {
    async fn ping(&self) -> Result<(), String> {
        self.health_check().await.map_err(|err| err.to_string())
    }
}

/// Every persistence trait the services need, implemented by one adapter.
pub trait Repositories:
    BlogsRepo
    + JournalsRepo
    + AlbumsRepo
    + MusicRepo
    + PlaylistsRepo
    + PostsRepo
    + CommentsRepo
    + RepliesRepo
    + FollowsRepo
    + NotificationsRepo
    + DatabaseProbe
    + 'static
{
}

impl<T> Repositories for T where
    T: BlogsRepo
        + JournalsRepo
        + AlbumsRepo
        + MusicRepo
        + PlaylistsRepo
        + PostsRepo
        + CommentsRepo
        + RepliesRepo
        + FollowsRepo
        + NotificationsRepo
        + DatabaseProbe
        + 'static
{
}

#[derive(Clone)]
pub struct AppState {
    pub blogs: Arc<BlogsService>,
    pub journals: Arc<JournalsService>,
    pub albums: Arc<AlbumsService>,
    pub music: Arc<MusicService>,
    pub playlists: Arc<PlaylistsService>,
    pub posts: Arc<PostsService>,
    pub comments: Arc<CommentsService>,
    pub follows: Arc<FollowsService>,
    pub notifications: Arc<NotificationsService>,
    pub cache: CacheLayer,
    pub database: Arc<dyn DatabaseProbe>,
    pub max_page_size: u32,
    /// Operational routes are only mounted when a token is configured.
    pub ops_token: Option<OpsToken>,
}

impl AppState {
    /// Wires every service over `repos` and the shared cache layer.
    pub fn new<R: Repositories>(repos: Arc<R>, cache: CacheLayer, max_page_size: u32) -> Self {
        let notifications = Arc::new(NotificationsService::new(repos.clone(), cache.clone()));
        let posts = Arc::new(PostsService::new(repos.clone(), cache.clone()));

        Self {
            blogs: Arc::new(BlogsService::new(repos.clone(), cache.clone())),
            journals: Arc::new(JournalsService::new(repos.clone(), cache.clone())),
            albums: Arc::new(AlbumsService::new(repos.clone(), cache.clone())),
            music: Arc::new(MusicService::new(repos.clone(), cache.clone())),
            playlists: Arc::new(PlaylistsService::new(repos.clone(), cache.clone())),
            comments: Arc::new(CommentsService::new(
                repos.clone(),
                repos.clone(),
                Arc::clone(&posts),
                Arc::clone(&notifications),
                cache.clone(),
            )),
            follows: Arc::new(FollowsService::new(
                repos.clone(),
                Arc::clone(&notifications),
                cache.clone(),
            )),
            posts,
            notifications,
            database: repos,
            cache,
            max_page_size,
            ops_token: None,
        }
    }

    pub fn with_ops_token(mut self, token: impl Into<String>) -> Self {
        self.ops_token = Some(OpsToken::new(token));
        self
    }
}
