//! Application layer: use-case services over repositories and the cache.

pub mod access;
pub mod albums;
pub mod blogs;
pub mod comments;
pub mod error;
pub mod follows;
pub mod journals;
pub mod music;
pub mod notifications;
pub mod pagination;
pub mod playlists;
pub mod posts;
pub mod repos;
