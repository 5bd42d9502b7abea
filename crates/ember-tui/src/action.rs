//! Work the session asks for, and the events that work reports back.
//!
//! The session never performs I/O.  Key handlers and completion handlers
//! return `Action`s; the task runner turns each one into a spawned task that
//! sends exactly one `Completion` back into the event loop.

use std::collections::HashMap;

use ember_proto::client::Credentials;
use ember_proto::model::{ItemPage, MediaDetail, MediaItem, ServerBook};

use crate::cache::Section;
use crate::cover::CoverArt;
use crate::probe::Latency;

/// Where a list of items comes from.  Kept on every view so refresh and
/// paging can re-issue the same request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListRequest {
    Resume,
    Favorites,
    Libraries,
    Search { term: String },
    Children { parent_id: String, page: usize },
    Seasons { series_id: String },
    Episodes { series_id: String, season_id: String },
    /// Episodes of the season owning `item_id`; ids are looked up when absent.
    SeasonOf {
        item_id: String,
        series_id: Option<String>,
        season_id: Option<String>,
    },
    /// Seasons of the series owning `item_id`.
    SeriesOf {
        item_id: String,
        series_id: Option<String>,
    },
}

impl ListRequest {
    /// True for the list a section shows before any drill-down.
    pub fn is_section_root(&self) -> bool {
        matches!(
            self,
            ListRequest::Resume
                | ListRequest::Favorites
                | ListRequest::Libraries
                | ListRequest::Search { .. }
        )
    }

    pub fn root_for(section: Section) -> Option<ListRequest> {
        match section {
            Section::Resume => Some(ListRequest::Resume),
            Section::Favorites => Some(ListRequest::Favorites),
            Section::Libraries => Some(ListRequest::Libraries),
            Section::Search => None,
        }
    }

    /// Page index for paginated sources, 0 otherwise.
    pub fn page(&self) -> usize {
        match self {
            ListRequest::Children { page, .. } => *page,
            _ => 0,
        }
    }

    pub fn is_paginated(&self) -> bool {
        matches!(self, ListRequest::Children { .. })
    }

    /// Same request at another page; non-paginated sources are returned as is.
    pub fn with_page(&self, page: usize) -> ListRequest {
        match self {
            ListRequest::Children { parent_id, .. } => ListRequest::Children {
                parent_id: parent_id.clone(),
                page,
            },
            other => other.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Action {
    // ── Server ───────────────────────────────────────────────────────────────
    /// Persist `servers`, then log in to its active profile.
    Connect {
        servers: ServerBook,
        same_prefix: bool,
    },
    ProbeGroup {
        prefix: String,
        servers: ServerBook,
    },
    PingActive,
    SaveServers(ServerBook),

    // ── Catalog ──────────────────────────────────────────────────────────────
    FetchList {
        seq: u64,
        section: Section,
        request: ListRequest,
    },
    FetchDetail {
        item_id: String,
    },
    RenderCover {
        url: String,
        size: (u16, u16),
    },
    SetFavorite {
        item_id: String,
        favorite: bool,
    },

    // ── Playback ─────────────────────────────────────────────────────────────
    Play {
        item: MediaItem,
    },
    PlayContinuous {
        episode: MediaItem,
    },

    // ── App ──────────────────────────────────────────────────────────────────
    SetVerboseLogging(bool),
    Quit,
}

/// What the player run amounted to, once reported and persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackReport {
    /// Item the position belongs to; `None` when nothing worth keeping was
    /// observed.
    pub item_id: Option<String>,
    pub position_secs: u64,
    pub report_ok: bool,
}

#[derive(Debug, Clone)]
pub enum Completion {
    Connected {
        index: usize,
        same_prefix: bool,
        result: Result<Credentials, String>,
    },
    ListLoaded {
        seq: u64,
        section: Section,
        request: ListRequest,
        result: Result<ItemPage, String>,
    },
    DetailLoaded {
        item_id: String,
        result: Result<Option<MediaDetail>, String>,
    },
    CoverRendered {
        url: String,
        size: (u16, u16),
        art: CoverArt,
    },
    FavoriteSet {
        item_id: String,
        result: Result<bool, String>,
    },
    PlaybackFinished {
        result: Result<PlaybackReport, String>,
    },
    Pinged(Latency),
    ProbeFinished(HashMap<usize, Latency>),
    ServersSaved(Result<(), String>),
}
