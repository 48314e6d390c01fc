//! Database configuration.

use crate::codec::ObjId;

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address space reserved for each session's change-set arena.
    pub arena_capacity: usize,

    /// Granularity at which arena memory is committed.
    pub page_size: usize,

    /// Whether commits write history records.
    pub history_enabled: bool,

    /// Whether commits maintain the search index.
    pub search_enabled: bool,

    /// Default similarity cutoff for fuzzy string queries, in `0.0..=1.0`.
    pub fuzzy_cutoff: f64,

    /// Actor recorded in history when a session does not set its own.
    pub default_actor: ObjId,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            arena_capacity: 64 * 1024 * 1024, // 64 MB
            page_size: 4096,
            history_enabled: true,
            search_enabled: true,
            fuzzy_cutoff: 0.8,
            default_actor: ObjId::NIL,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the arena capacity.
    #[must_use]
    pub const fn arena_capacity(mut self, bytes: usize) -> Self {
        self.arena_capacity = bytes;
        self
    }

    /// Sets the arena page size.
    #[must_use]
    pub const fn page_size(mut self, bytes: usize) -> Self {
        self.page_size = bytes;
        self
    }

    /// Sets whether history is recorded.
    #[must_use]
    pub const fn history_enabled(mut self, value: bool) -> Self {
        self.history_enabled = value;
        self
    }

    /// Sets whether the search index is maintained.
    #[must_use]
    pub const fn search_enabled(mut self, value: bool) -> Self {
        self.search_enabled = value;
        self
    }

    /// Sets the default fuzzy cutoff.
    #[must_use]
    pub const fn fuzzy_cutoff(mut self, cutoff: f64) -> Self {
        self.fuzzy_cutoff = cutoff;
        self
    }

    /// Sets the default actor.
    #[must_use]
    pub const fn default_actor(mut self, actor: ObjId) -> Self {
        self.default_actor = actor;
        self
    }
}
