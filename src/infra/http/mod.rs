pub mod error;
pub mod extract;
mod handlers;
pub mod middleware;
pub mod response;
mod state;

pub use error::ApiError;
pub use state::{AppState, DatabaseProbe, Repositories};

use axum::Router;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{delete, get, post};

/// JSON API plus `/health`, with request ids and error logging applied to
/// every route. Manual invalidation is mounted behind the operator token,
/// and only when one is configured.
pub fn build_router(state: AppState) -> Router {
    let content = Router::new()
        .route(
            "/api/blogs",
            get(handlers::list_blogs).post(handlers::create_blog),
        )
        .route(
            "/api/blogs/{id}",
            get(handlers::get_blog)
                .patch(handlers::update_blog)
                .delete(handlers::delete_blog),
        )
        .route(
            "/api/journals",
            get(handlers::list_journals).post(handlers::create_journal),
        )
        .route(
            "/api/journals/{id}",
            get(handlers::get_journal)
                .patch(handlers::update_journal)
                .delete(handlers::delete_journal),
        )
        .route(
            "/api/albums",
            get(handlers::list_albums).post(handlers::create_album),
        )
        .route(
            "/api/albums/{id}",
            get(handlers::get_album)
                .patch(handlers::update_album)
                .delete(handlers::delete_album),
        )
        .route(
            "/api/music",
            get(handlers::list_music).post(handlers::create_music),
        )
        .route(
            "/api/music/{id}",
            get(handlers::get_music)
                .patch(handlers::update_music)
                .delete(handlers::delete_music),
        )
        .route(
            "/api/playlists",
            get(handlers::list_playlists).post(handlers::create_playlist),
        )
        .route(
            "/api/playlists/{id}",
            get(handlers::get_playlist)
                .patch(handlers::update_playlist)
                .delete(handlers::delete_playlist),
        )
        .route(
            "/api/playlists/{id}/tracks",
            post(handlers::add_playlist_track),
        )
        .route(
            "/api/playlists/{id}/tracks/{music_id}",
            delete(handlers::remove_playlist_track),
        );

    let social = Router::new()
        .route(
            "/api/posts",
            get(handlers::list_posts).post(handlers::create_post),
        )
        .route(
            "/api/posts/{id}",
            get(handlers::get_post)
                .patch(handlers::update_post)
                .delete(handlers::delete_post),
        )
        .route(
            "/api/posts/{id}/comments",
            get(handlers::list_comments).post(handlers::create_comment),
        )
        .route(
            "/api/comments/{id}",
            get(handlers::get_comment).delete(handlers::delete_comment),
        )
        .route(
            "/api/comments/{id}/replies",
            get(handlers::list_replies).post(handlers::create_reply),
        )
        .route(
            "/api/replies/{id}",
            get(handlers::get_reply).delete(handlers::delete_reply),
        )
        .route("/api/users/{id}/followers", get(handlers::list_followers))
        .route("/api/users/{id}/following", get(handlers::list_following))
        .route(
            "/api/users/{id}/follow",
            post(handlers::follow_user).delete(handlers::unfollow_user),
        )
        .route("/api/notifications", get(handlers::list_notifications))
        .route(
            "/api/notifications/{id}",
            delete(handlers::delete_notification),
        )
        .route(
            "/api/notifications/{id}/read",
            post(handlers::mark_notification_read),
        );

    let mut ops = Router::new().route("/health", get(handlers::health));
    if let Some(token) = state.ops_token.clone() {
        ops = ops.merge(
            Router::new()
                .route(
                    "/api/cache/invalidate/{entity}",
                    post(handlers::invalidate_entity),
                )
                .route_layer(from_fn_with_state(token, middleware::require_ops_token)),
        );
    }

    content
        .merge(social)
        .merge(ops)
        .layer(from_fn(middleware::log_responses))
        .layer(from_fn(middleware::set_request_context))
        .with_state(state)
}
