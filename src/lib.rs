//! Encore community backend.
//!
//! Blogs, journals, albums, music, playlists and a social feed served over a
//! JSON API, with a cache-aside read path in front of Postgres.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
