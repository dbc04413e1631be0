//! Cache key schema.
//!
//! Every cached listing and detail payload lives under a key derived from the
//! entity, the query parameters and (for visibility-sensitive entities) the
//! viewer. Invalidation patterns are derived from the same table so that a
//! pattern always covers every key a write could have made stale.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::pagination::PageParams;
use crate::domain::entities::RecordId;

pub const DEFAULT_KEY_PREFIX: &str = "encore:";

const ANONYMOUS_VIEWER: &str = "vanon";

/// Cached resource families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Blogs,
    Journals,
    Music,
    Albums,
    Playlists,
    Followers,
    Following,
    Posts,
    Comments,
    Replies,
    Notifications,
}

impl Entity {
    pub const ALL: [Entity; 11] = [
        Entity::Blogs,
        Entity::Journals,
        Entity::Music,
        Entity::Albums,
        Entity::Playlists,
        Entity::Followers,
        Entity::Following,
        Entity::Posts,
        Entity::Comments,
        Entity::Replies,
        Entity::Notifications,
    ];

    pub fn namespace(self) -> &'static str {
        match self {
            Entity::Blogs => "blogs",
            Entity::Journals => "journals",
            Entity::Music => "music",
            Entity::Albums => "albums",
            Entity::Playlists => "playlists",
            Entity::Followers => "followers",
            Entity::Following => "following",
            Entity::Posts => "posts",
            Entity::Comments => "comments",
            Entity::Replies => "replies",
            Entity::Notifications => "notifications",
        }
    }

    /// Filter names accepted in list keys, in key order.
    pub fn filters(self) -> &'static [&'static str] {
        match self {
            Entity::Blogs => &["author", "category", "search"],
            Entity::Journals => &["author", "search"],
            Entity::Music => &["album", "artist", "search"],
            Entity::Albums => &["artist", "search"],
            Entity::Playlists => &["owner", "search"],
            Entity::Posts => &["author"],
            Entity::Notifications => &["unread"],
            Entity::Followers | Entity::Following | Entity::Comments | Entity::Replies => &[],
        }
    }

    /// Whether cached payloads differ per viewer.
    pub fn is_viewer_scoped(self) -> bool {
        matches!(self, Entity::Journals | Entity::Playlists | Entity::Posts)
    }

    pub fn has_detail_cache(self) -> bool {
        !matches!(
            self,
            Entity::Followers | Entity::Following | Entity::Notifications
        )
    }

    /// Whether list keys are partitioned by an owning record.
    pub fn is_scoped(self) -> bool {
        matches!(
            self,
            Entity::Followers
                | Entity::Following
                | Entity::Comments
                | Entity::Replies
                | Entity::Notifications
        )
    }

    /// Entities whose cached listings embed data derived from this one.
    pub fn dependents(self) -> &'static [Entity] {
        match self {
            Entity::Music => &[Entity::Albums],
            Entity::Comments => &[Entity::Posts],
            Entity::Replies => &[Entity::Comments],
            _ => &[],
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace())
    }
}

impl FromStr for Entity {
    type Err = KeyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Entity::ALL
            .into_iter()
            .find(|entity| entity.namespace() == value)
            .ok_or_else(|| KeyError::UnknownEntity(value.to_string()))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("unknown cache entity `{0}`")]
    UnknownEntity(String),
    #[error("entity `{entity}` has no filter named `{filter}`")]
    UnknownFilter {
        entity: Entity,
        filter: &'static str,
    },
    #[error("entity `{0}` lists are scoped to an owner; build the key with an owner id")]
    ScopeRequired(Entity),
    #[error("entity `{0}` lists are not scoped to an owner")]
    ScopeNotSupported(Entity),
    #[error("entity `{0}` has no detail cache")]
    NoDetailCache(Entity),
    #[error("entity `{0}` is not cached per viewer")]
    NotViewerScoped(Entity),
}

/// Cache key string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Glob pattern over cache keys (`*` matches any run of characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InvalidationPattern(String);

impl InvalidationPattern {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InvalidationPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Named filter values of a listing query. Absent filters are simply not set;
/// an empty string is a present value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilters {
    values: BTreeMap<&'static str, String>,
}

impl ListFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<V: ToString>(mut self, name: &'static str, value: Option<V>) -> Self {
        if let Some(value) = value {
            self.values.insert(name, value.to_string());
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Builds keys and patterns under a fixed prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchema {
    prefix: String,
}

impl Default for KeySchema {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}

impl KeySchema {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key of one page of an unscoped listing.
    pub fn list_key(
        &self,
        entity: Entity,
        page: PageParams,
        filters: &ListFilters,
        viewer: Option<RecordId>,
    ) -> Result<CacheKey, KeyError> {
        if entity.is_scoped() {
            return Err(KeyError::ScopeRequired(entity));
        }
        let mut key = format!("{}{}:list:", self.prefix, entity.namespace());
        self.push_page_tokens(&mut key, entity, page, filters, viewer)?;
        Ok(CacheKey(key))
    }

    /// Key of one page of a listing partitioned by `owner`.
    pub fn scoped_list_key(
        &self,
        entity: Entity,
        owner: RecordId,
        page: PageParams,
        filters: &ListFilters,
        viewer: Option<RecordId>,
    ) -> Result<CacheKey, KeyError> {
        if !entity.is_scoped() {
            return Err(KeyError::ScopeNotSupported(entity));
        }
        let mut key = format!("{}{}:list:u{owner}:", self.prefix, entity.namespace());
        self.push_page_tokens(&mut key, entity, page, filters, viewer)?;
        Ok(CacheKey(key))
    }

    pub fn detail_key(
        &self,
        entity: Entity,
        id: RecordId,
        viewer: Option<RecordId>,
    ) -> Result<CacheKey, KeyError> {
        if !entity.has_detail_cache() {
            return Err(KeyError::NoDetailCache(entity));
        }
        let mut key = format!("{}{}:detail:{id}", self.prefix, entity.namespace());
        push_viewer(&mut key, entity, viewer);
        Ok(CacheKey(key))
    }

    /// Pattern covering every cached page of the entity's listings.
    pub fn list_pattern(&self, entity: Entity) -> InvalidationPattern {
        InvalidationPattern(format!("{}{}:list:*", self.prefix, entity.namespace()))
    }

    pub fn scoped_list_pattern(
        &self,
        entity: Entity,
        owner: RecordId,
    ) -> Result<InvalidationPattern, KeyError> {
        if !entity.is_scoped() {
            return Err(KeyError::ScopeNotSupported(entity));
        }
        Ok(InvalidationPattern(format!(
            "{}{}:list:u{owner}:*",
            self.prefix,
            entity.namespace()
        )))
    }

    /// Patterns covering cached details. With an id the exact key and all of
    /// its viewer variants are covered; without one, every detail entry.
    pub fn detail_patterns(
        &self,
        entity: Entity,
        id: Option<RecordId>,
    ) -> Result<Vec<InvalidationPattern>, KeyError> {
        if !entity.has_detail_cache() {
            return Err(KeyError::NoDetailCache(entity));
        }
        let base = format!("{}{}:detail:", self.prefix, entity.namespace());
        let patterns = match id {
            Some(id) => vec![
                InvalidationPattern(format!("{base}{id}")),
                InvalidationPattern(format!("{base}{id}:*")),
            ],
            None => vec![InvalidationPattern(format!("{base}*"))],
        };
        Ok(patterns)
    }

    /// Patterns covering every entry cached for `viewer` (both listings and
    /// details) of a viewer-scoped entity.
    pub fn viewer_patterns(
        &self,
        entity: Entity,
        viewer: RecordId,
    ) -> Result<Vec<InvalidationPattern>, KeyError> {
        if !entity.is_viewer_scoped() {
            return Err(KeyError::NotViewerScoped(entity));
        }
        let namespace = entity.namespace();
        Ok(vec![
            InvalidationPattern(format!("{}{namespace}:list:*:v{viewer}", self.prefix)),
            InvalidationPattern(format!("{}{namespace}:detail:*:v{viewer}", self.prefix)),
        ])
    }

    /// Patterns a write to `entity` (optionally record `id`) must clear.
    ///
    /// For entities without a detail cache the id names the list owner and
    /// only that owner's partition is cleared. Otherwise the id names the
    /// record itself: all listings plus that record's details are cleared.
    pub fn invalidation_patterns(
        &self,
        entity: Entity,
        id: Option<RecordId>,
    ) -> Vec<InvalidationPattern> {
        let mut patterns = Vec::with_capacity(3);
        match id {
            Some(owner) if entity.is_scoped() && !entity.has_detail_cache() => {
                patterns.push(InvalidationPattern(format!(
                    "{}{}:list:u{owner}:*",
                    self.prefix,
                    entity.namespace()
                )));
            }
            _ => patterns.push(self.list_pattern(entity)),
        }
        if let Some(id) = id {
            if let Ok(details) = self.detail_patterns(entity, Some(id)) {
                patterns.extend(details);
            }
        }
        patterns
    }

    fn push_page_tokens(
        &self,
        key: &mut String,
        entity: Entity,
        page: PageParams,
        filters: &ListFilters,
        viewer: Option<RecordId>,
    ) -> Result<(), KeyError> {
        let allowed = entity.filters();
        if let Some(unknown) = filters.values.keys().find(|name| !allowed.contains(*name)) {
            return Err(KeyError::UnknownFilter {
                entity,
                filter: *unknown,
            });
        }

        key.push_str(&format!("p{}:s{}", page.index(), page.size()));
        for name in allowed {
            if let Some(value) = filters.values.get(name) {
                key.push(':');
                key.push_str(name);
                key.push('=');
                key.push_str(&URL_SAFE_NO_PAD.encode(value.as_bytes()));
            }
        }
        push_viewer(key, entity, viewer);
        Ok(())
    }
}

fn push_viewer(key: &mut String, entity: Entity, viewer: Option<RecordId>) {
    if !entity.is_viewer_scoped() {
        return;
    }
    match viewer {
        Some(viewer) => key.push_str(&format!(":v{viewer}")),
        None => {
            key.push(':');
            key.push_str(ANONYMOUS_VIEWER);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::glob_match;

    fn page(index: u32, size: u32) -> PageParams {
        PageParams::new(index, size).expect("valid page")
    }

    #[test]
    fn list_key_shapes_are_stable() {
        let schema = KeySchema::default();
        let filters = ListFilters::new()
            .with("search", Some("rock"))
            .with("author", Some(12));

        let blogs = schema
            .list_key(Entity::Blogs, page(2, 10), &filters, Some(7))
            .expect("blogs key");
        insta::assert_snapshot!(blogs.as_str(), @"encore:blogs:list:p2:s10:author=MTI:search=cm9jaw");

        let journals = schema
            .list_key(Entity::Journals, page(1, 20), &ListFilters::new(), None)
            .expect("journals key");
        insta::assert_snapshot!(journals.as_str(), @"encore:journals:list:p1:s20:vanon");

        let followers = schema
            .scoped_list_key(Entity::Followers, 42, page(3, 5), &ListFilters::new(), None)
            .expect("followers key");
        insta::assert_snapshot!(followers.as_str(), @"encore:followers:list:u42:p3:s5");

        let post = schema
            .detail_key(Entity::Posts, 9, Some(3))
            .expect("post detail key");
        insta::assert_snapshot!(post.as_str(), @"encore:posts:detail:9:v3");
    }

    #[test]
    fn identical_queries_share_a_key_regardless_of_filter_insertion_order() {
        let schema = KeySchema::default();
        let first = ListFilters::new()
            .with("artist", Some("a"))
            .with("album", Some(3));
        let second = ListFilters::new()
            .with("album", Some(3))
            .with("artist", Some("a"));

        assert_eq!(
            schema
                .list_key(Entity::Music, page(1, 10), &first, None)
                .unwrap(),
            schema
                .list_key(Entity::Music, page(1, 10), &second, None)
                .unwrap()
        );
    }

    #[test]
    fn absent_filter_differs_from_empty_filter() {
        let schema = KeySchema::default();
        let absent = schema
            .list_key(Entity::Blogs, page(1, 10), &ListFilters::new(), None)
            .unwrap();
        let empty = schema
            .list_key(
                Entity::Blogs,
                page(1, 10),
                &ListFilters::new().with("search", Some("")),
                None,
            )
            .unwrap();
        assert_ne!(absent, empty);
    }

    #[test]
    fn distinct_pages_and_viewers_get_distinct_keys() {
        let schema = KeySchema::default();
        let filters = ListFilters::new();
        let keys = [
            schema.list_key(Entity::Posts, page(1, 10), &filters, None),
            schema.list_key(Entity::Posts, page(2, 10), &filters, None),
            schema.list_key(Entity::Posts, page(1, 20), &filters, None),
            schema.list_key(Entity::Posts, page(1, 10), &filters, Some(1)),
            schema.list_key(Entity::Posts, page(1, 10), &filters, Some(2)),
        ]
        .into_iter()
        .collect::<Result<std::collections::HashSet<_>, _>>()
        .unwrap();
        assert_eq!(keys.len(), 5);
    }

    #[test]
    fn viewer_is_ignored_for_public_entities() {
        let schema = KeySchema::default();
        let anonymous = schema.detail_key(Entity::Blogs, 5, None).unwrap();
        let viewer = schema.detail_key(Entity::Blogs, 5, Some(77)).unwrap();
        assert_eq!(anonymous, viewer);
    }

    #[test]
    fn unknown_filters_and_missing_scope_fail_fast() {
        let schema = KeySchema::default();
        let err = schema
            .list_key(
                Entity::Albums,
                page(1, 10),
                &ListFilters::new().with("category", Some("x")),
                None,
            )
            .unwrap_err();
        assert_eq!(
            err,
            KeyError::UnknownFilter {
                entity: Entity::Albums,
                filter: "category"
            }
        );

        assert_eq!(
            schema
                .list_key(Entity::Followers, page(1, 10), &ListFilters::new(), None)
                .unwrap_err(),
            KeyError::ScopeRequired(Entity::Followers)
        );
        assert_eq!(
            schema
                .scoped_list_key(Entity::Blogs, 1, page(1, 10), &ListFilters::new(), None)
                .unwrap_err(),
            KeyError::ScopeNotSupported(Entity::Blogs)
        );
        assert_eq!(
            schema.detail_key(Entity::Notifications, 1, None).unwrap_err(),
            KeyError::NoDetailCache(Entity::Notifications)
        );
    }

    #[test]
    fn glob_metacharacters_in_filters_cannot_widen_patterns() {
        let schema = KeySchema::default();
        let key = schema
            .list_key(
                Entity::Blogs,
                page(1, 10),
                &ListFilters::new().with("search", Some("*:detail:5")),
                None,
            )
            .unwrap();
        assert!(!key.as_str().contains('*'));
        assert!(!key.as_str().contains(":detail:"));
        for pattern in schema.detail_patterns(Entity::Blogs, Some(5)).unwrap() {
            assert!(!glob_match(pattern.as_str(), key.as_str()));
        }
    }

    #[test]
    fn invalidation_patterns_cover_list_and_detail_keys() {
        let schema = KeySchema::default();
        let patterns = schema.invalidation_patterns(Entity::Posts, Some(9));
        let list = schema
            .list_key(Entity::Posts, page(4, 25), &ListFilters::new(), Some(2))
            .unwrap();
        let bare = schema.detail_key(Entity::Posts, 9, None).unwrap();
        let viewed = schema.detail_key(Entity::Posts, 9, Some(2)).unwrap();
        let other = schema.detail_key(Entity::Posts, 90, Some(2)).unwrap();

        let covered = |key: &CacheKey| {
            patterns
                .iter()
                .any(|pattern| glob_match(pattern.as_str(), key.as_str()))
        };
        assert!(covered(&list));
        assert!(covered(&bare));
        assert!(covered(&viewed));
        assert!(!covered(&other));
    }

    #[test]
    fn owner_partitions_are_invalidated_independently() {
        let schema = KeySchema::default();
        let patterns = schema.invalidation_patterns(Entity::Notifications, Some(4));
        assert_eq!(
            patterns,
            vec![schema.scoped_list_pattern(Entity::Notifications, 4).unwrap()]
        );

        let mine = schema
            .scoped_list_key(Entity::Notifications, 4, page(1, 10), &ListFilters::new(), None)
            .unwrap();
        let theirs = schema
            .scoped_list_key(Entity::Notifications, 40, page(1, 10), &ListFilters::new(), None)
            .unwrap();
        assert!(glob_match(patterns[0].as_str(), mine.as_str()));
        assert!(!glob_match(patterns[0].as_str(), theirs.as_str()));
    }

    #[test]
    fn viewer_patterns_select_one_viewer_exactly() {
        let schema = KeySchema::default();
        let patterns = schema.viewer_patterns(Entity::Posts, 1).unwrap();
        let covered = |key: &CacheKey| {
            patterns
                .iter()
                .any(|pattern| glob_match(pattern.as_str(), key.as_str()))
        };

        let none = ListFilters::new();
        let author = ListFilters::new().with("author", Some(1));
        assert!(covered(
            &schema.list_key(Entity::Posts, page(1, 10), &none, Some(1)).unwrap()
        ));
        assert!(covered(
            &schema.list_key(Entity::Posts, page(2, 10), &author, Some(1)).unwrap()
        ));
        assert!(covered(&schema.detail_key(Entity::Posts, 8, Some(1)).unwrap()));
        assert!(!covered(
            &schema.list_key(Entity::Posts, page(1, 10), &none, Some(11)).unwrap()
        ));
        assert!(!covered(
            &schema.list_key(Entity::Posts, page(1, 10), &author, None).unwrap()
        ));
        assert_eq!(
            schema.viewer_patterns(Entity::Blogs, 1).unwrap_err(),
            KeyError::NotViewerScoped(Entity::Blogs)
        );
    }

    #[test]
    fn entity_names_round_trip_through_from_str() {
        for entity in Entity::ALL {
            assert_eq!(entity.namespace().parse::<Entity>().unwrap(), entity);
        }
        assert!(matches!(
            "widgets".parse::<Entity>(),
            Err(KeyError::UnknownEntity(_))
        ));
    }
}
