//! Session state machine.
//!
//! Everything the user sees is derived from `Session`.  It changes in exactly
//! two ways: a key press (`handle_key`) or a finished background task
//! (`on_completion`).  Both return the `Action`s to run next; the session
//! itself never performs I/O, so every transition is testable without a
//! terminal or a server.

use std::collections::{HashMap, HashSet};

use ember_proto::client::{self, Credentials};
use ember_proto::config::NetworkConfig;
use ember_proto::model::{
    secs_to_ticks, ItemKind, ItemPage, MediaDetail, MediaItem, ServerBook, ServerProfile,
};
use ratatui::crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tracing::{debug, info, warn};

use crate::action::{Action, Completion, ListRequest, PlaybackReport};
use crate::cache::{CoverCache, DetailCache, ItemArena, Section, SectionCache};
use crate::cover::CoverArt;
use crate::nav::{NavStack, NavState};
use crate::probe::Latency;
use crate::widgets::text_field::{FieldAction, TextField};

pub const SPINNER: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Covers are requested for the cursor item and this many neighbours on
/// each side.
pub const COVER_WINDOW: usize = 2;

// ── Layout ────────────────────────────────────────────────────────────────────

pub fn sidebar_width(term_width: u16) -> u16 {
    if term_width < 100 {
        28
    } else {
        32
    }
}

/// Cells available to a cover for a terminal of `width` x `height`.
pub fn cover_size(width: u16, height: u16) -> (u16, u16) {
    (
        width.saturating_sub(sidebar_width(width)).saturating_sub(4),
        height.saturating_sub(6),
    )
}

// ── Types ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Loading,
    Browsing,
    Searching,
    ServerManage,
    ServerEdit,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub page_size: usize,
    pub cover_width: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            page_size: 20,
            cover_width: 800,
        }
    }
}

impl From<&NetworkConfig> for SessionOptions {
    fn from(net: &NetworkConfig) -> Self {
        Self {
            page_size: net.page_size.max(1),
            cover_width: net.cover_width,
        }
    }
}

/// The list on screen.
#[derive(Debug, Clone, PartialEq)]
pub struct View {
    pub ids: Vec<String>,
    pub cursor: usize,
    pub title: String,
    pub source: ListRequest,
    pub total: usize,
}

impl View {
    fn empty(title: impl Into<String>, source: ListRequest) -> Self {
        Self {
            ids: Vec::new(),
            cursor: 0,
            title: title.into(),
            source,
            total: 0,
        }
    }

    fn current_id(&self) -> Option<&str> {
        self.ids.get(self.cursor).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastPlay {
    pub position_secs: u64,
    pub report_ok: bool,
}

#[derive(Debug, Clone)]
struct Connection {
    base_url: String,
    credentials: Credentials,
}

pub const FIELD_LABELS: [&str; 4] = ["Name", "URL", "Username", "Password"];

/// Add/edit form for one server profile.
#[derive(Debug, Clone)]
pub struct ServerEditor {
    pub fields: [TextField; 4],
    pub focus: usize,
    /// Index being edited; `None` when adding.
    pub editing: Option<usize>,
}

impl ServerEditor {
    fn new(editing: Option<usize>, profile: Option<&ServerProfile>) -> Self {
        let (name, url, username, password) = match profile {
            Some(p) => (
                p.name.as_str(),
                p.url.as_str(),
                p.username.as_str(),
                p.password.as_str(),
            ),
            None => ("", "", "", ""),
        };
        let mut fields = [
            TextField::new("Prefix Description (e.g. HomeNAS Main)").with_value(name),
            TextField::new("http://your-server:8096").with_value(url),
            TextField::new("Username").with_value(username),
            TextField::new("Password").masked().with_value(password),
        ];
        fields[0].focused = true;
        Self {
            fields,
            focus: 0,
            editing,
        }
    }

    fn set_focus(&mut self, focus: usize) {
        self.focus = focus % self.fields.len();
        for (i, field) in self.fields.iter_mut().enumerate() {
            field.focused = i == self.focus;
        }
    }

    fn to_profile(&self) -> Result<ServerProfile, &'static str> {
        let url = self.fields[1].value().trim().to_string();
        if url.is_empty() {
            return Err("URL is required");
        }
        let name = match self.fields[0].value().trim() {
            "" => url.clone(),
            name => name.to_string(),
        };
        Ok(ServerProfile {
            name,
            url,
            username: self.fields[2].value().trim().to_string(),
            password: self.fields[3].value().to_string(),
            ..ServerProfile::default()
        })
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

pub struct Session {
    mode: Mode,
    section: Section,
    view: View,
    arena: ItemArena,
    sections: SectionCache,
    nav: NavStack,
    details: DetailCache,
    covers: CoverCache,
    options: SessionOptions,

    servers: ServerBook,
    server_cursor: usize,
    server_latencies: HashMap<usize, Latency>,
    probing: bool,
    editor: Option<ServerEditor>,
    connection: Option<Connection>,
    connecting: bool,
    latency: Option<Latency>,

    search: TextField,
    search_term: String,

    last_play: Option<LastPlay>,
    playing: bool,
    player_available: bool,
    verbose: bool,
    status: String,

    /// List fetches are numbered; only `awaiting` may replace the view.
    next_seq: u64,
    awaiting: Option<u64>,
    loading_title: String,
    /// Section of the awaited fetch.  `section` keeps describing the view on
    /// screen until that fetch lands.
    loading_section: Section,
    /// Completions numbered below this belong to a previous server.
    epoch_seq: u64,

    spinner: usize,
    size: (u16, u16),
}

impl Session {
    pub fn new(servers: ServerBook, options: SessionOptions, player_available: bool) -> Self {
        let server_cursor = servers.active;
        Self {
            mode: if servers.is_empty() {
                Mode::ServerManage
            } else {
                Mode::Loading
            },
            section: Section::Resume,
            view: View::empty(Section::Resume.title(), ListRequest::Resume),
            arena: ItemArena::default(),
            sections: SectionCache::default(),
            nav: NavStack::default(),
            details: DetailCache::default(),
            covers: CoverCache::default(),
            options,
            servers,
            server_cursor,
            server_latencies: HashMap::new(),
            probing: false,
            editor: None,
            connection: None,
            connecting: false,
            latency: None,
            search: TextField::new("Search movies, series, episodes..."),
            search_term: String::new(),
            last_play: None,
            playing: false,
            player_available,
            verbose: false,
            status: String::new(),
            next_seq: 0,
            awaiting: None,
            loading_title: String::new(),
            loading_section: Section::Resume,
            epoch_seq: 0,
            spinner: 0,
            size: (0, 0),
        }
    }

    /// First actions after the terminal is up.
    pub fn start(&mut self) -> Vec<Action> {
        if self.servers.is_empty() {
            self.mode = Mode::ServerManage;
            self.status = "No servers configured, press 'a' to add one".to_string();
            return Vec::new();
        }
        self.status = "Connecting...".to_string();
        self.connect(false)
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Section of the view on screen.
    pub fn section(&self) -> Section {
        self.section
    }

    /// Section the sidebar marks: the one being loaded, if any.
    pub fn highlighted_section(&self) -> Section {
        if self.mode == Mode::Loading && self.awaiting.is_some() {
            self.loading_section
        } else {
            self.section
        }
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn cursor(&self) -> usize {
        self.view.cursor
    }

    pub fn items(&self) -> Vec<&MediaItem> {
        self.arena.resolve(&self.view.ids).collect()
    }

    pub fn current_item(&self) -> Option<&MediaItem> {
        self.view.current_id().and_then(|id| self.arena.get(id))
    }

    pub fn item(&self, id: &str) -> Option<&MediaItem> {
        self.arena.get(id)
    }

    pub fn current_detail(&self) -> Option<&MediaDetail> {
        self.view.current_id().and_then(|id| self.details.get(id))
    }

    /// Ids cached for a section root, if loaded.
    pub fn section_ids(&self, section: Section) -> Option<&[String]> {
        self.sections.get(section).map(|e| e.ids.as_slice())
    }

    pub fn nav_depth(&self) -> usize {
        self.nav.len()
    }

    pub fn nav_snapshots(&self) -> impl Iterator<Item = &NavState> {
        self.nav.iter()
    }

    pub fn details(&self) -> &DetailCache {
        &self.details
    }

    pub fn covers(&self) -> &CoverCache {
        &self.covers
    }

    /// Cache key for an item's cover on the connected server.
    pub fn cover_url(&self, item: &MediaItem) -> Option<String> {
        let conn = self.connection.as_ref()?;
        client::image_url(
            &conn.base_url,
            &conn.credentials.token,
            item,
            self.options.cover_width,
        )
    }

    pub fn cover_for(&self, item: &MediaItem) -> Option<&CoverArt> {
        self.cover_url(item).and_then(|url| self.covers.get(&url))
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn servers(&self) -> &ServerBook {
        &self.servers
    }

    pub fn server_cursor(&self) -> usize {
        self.server_cursor
    }

    pub fn server_latencies(&self) -> &HashMap<usize, Latency> {
        &self.server_latencies
    }

    pub fn is_probing(&self) -> bool {
        self.probing
    }

    pub fn editor(&self) -> Option<&ServerEditor> {
        self.editor.as_ref()
    }

    pub fn search_field(&self) -> &TextField {
        &self.search
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn latency(&self) -> Option<Latency> {
        self.latency
    }

    pub fn last_play(&self) -> Option<LastPlay> {
        self.last_play
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn player_available(&self) -> bool {
        self.player_available
    }

    pub fn verbose_logging(&self) -> bool {
        self.verbose
    }

    pub fn spinner(&self) -> &'static str {
        SPINNER[self.spinner % SPINNER.len()]
    }

    pub fn size(&self) -> (u16, u16) {
        self.size
    }

    /// (page, pages), 1-based, for paginated views.
    pub fn page_info(&self) -> Option<(usize, usize)> {
        if !self.view.source.is_paginated() {
            return None;
        }
        let pages = self.view.total.div_ceil(self.options.page_size).max(1);
        Some((self.view.source.page() + 1, pages))
    }

    // ── Events ────────────────────────────────────────────────────────────────

    pub fn handle_key(&mut self, key: KeyEvent) -> Vec<Action> {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            return vec![Action::Quit];
        }
        match self.mode {
            Mode::Browsing => self.browsing_key(key),
            Mode::Loading => self.loading_key(key),
            Mode::Searching => self.search_key(key),
            Mode::ServerManage => self.server_manage_key(key),
            Mode::ServerEdit => self.server_edit_key(key),
        }
    }

    pub fn on_completion(&mut self, completion: Completion) -> Vec<Action> {
        match completion {
            Completion::Connected {
                index,
                same_prefix,
                result,
            } => self.on_connected(index, same_prefix, result),
            Completion::ListLoaded {
                seq,
                section,
                request,
                result,
            } => self.on_list_loaded(seq, section, request, result),
            Completion::DetailLoaded { item_id, result } => {
                match result {
                    Ok(detail) => self.details.complete(&item_id, detail),
                    Err(e) => {
                        debug!("detail for {} failed: {}", item_id, e);
                        self.details.abandon(&item_id);
                    }
                }
                Vec::new()
            }
            Completion::CoverRendered { url, size, art } => {
                if !self.covers.complete(&url, size, art) {
                    debug!("dropping cover rendered for stale size {:?}", size);
                }
                Vec::new()
            }
            Completion::FavoriteSet { item_id, result } => self.on_favorite_set(item_id, result),
            Completion::PlaybackFinished { result } => self.on_playback_finished(result),
            Completion::Pinged(latency) => {
                self.latency = Some(latency);
                Vec::new()
            }
            Completion::ProbeFinished(latencies) => {
                self.probing = false;
                self.server_latencies = latencies;
                self.status = "Ping complete".to_string();
                Vec::new()
            }
            Completion::ServersSaved(result) => {
                if let Err(e) = result {
                    self.status = format!("Save failed: {}", e);
                }
                Vec::new()
            }
        }
    }

    /// Terminal resized: rendered covers are size-specific, so they all go and
    /// only the cursor window is requested again.
    pub fn on_resize(&mut self, width: u16, height: u16) -> Vec<Action> {
        self.size = (width, height);
        self.covers.resize(cover_size(width, height));
        self.window_actions()
    }

    pub fn tick(&mut self) {
        if self.mode == Mode::Loading || self.playing {
            self.spinner = self.spinner.wrapping_add(1);
        }
    }

    /// Periodic latency check of the active server.
    pub fn ping_due(&self) -> Vec<Action> {
        if self.connection.is_some() && !self.connecting {
            vec![Action::PingActive]
        } else {
            Vec::new()
        }
    }

    // ── Browsing ──────────────────────────────────────────────────────────────

    fn browsing_key(&mut self, key: KeyEvent) -> Vec<Action> {
        match key.code {
            KeyCode::Char('q') => vec![Action::Quit],
            KeyCode::Left | KeyCode::Char('h') => self.move_left(),
            KeyCode::Right | KeyCode::Char('l') => self.move_right(),
            KeyCode::Enter => self.select(),
            KeyCode::Esc | KeyCode::Backspace => self.go_back(),
            KeyCode::Char('1') => self.switch_section(Section::Resume),
            KeyCode::Char('2') => self.switch_section(Section::Favorites),
            KeyCode::Char('3') => self.switch_section(Section::Libraries),
            KeyCode::Char('4') => self.switch_section(Section::Search),
            KeyCode::Char('/') => self.open_search(),
            KeyCode::Char('f') => self.toggle_favorite(),
            KeyCode::Char('c') => self.play_continuous(),
            KeyCode::Char('s') => self.jump_to_season(),
            KeyCode::Char('S') => self.jump_to_series(),
            KeyCode::Char('r') => self.refresh(),
            KeyCode::Char('d') => self.toggle_verbose(),
            KeyCode::Char('m') => self.open_server_manage(),
            _ => Vec::new(),
        }
    }

    fn loading_key(&mut self, key: KeyEvent) -> Vec<Action> {
        match key.code {
            KeyCode::Char('q') => vec![Action::Quit],
            KeyCode::Esc | KeyCode::Backspace if !self.connecting => {
                self.awaiting = None;
                if self.nav.is_empty() {
                    self.mode = Mode::Browsing;
                    self.status = "Cancelled".to_string();
                    Vec::new()
                } else {
                    self.go_back()
                }
            }
            KeyCode::Char('1') if !self.connecting => self.switch_section(Section::Resume),
            KeyCode::Char('2') if !self.connecting => self.switch_section(Section::Favorites),
            KeyCode::Char('3') if !self.connecting => self.switch_section(Section::Libraries),
            KeyCode::Char('m') => self.open_server_manage(),
            _ => Vec::new(),
        }
    }

    fn move_left(&mut self) -> Vec<Action> {
        if self.view.cursor > 0 {
            self.view.cursor -= 1;
            return self.window_actions();
        }
        let page = self.view.source.page();
        if self.view.source.is_paginated() && page > 0 {
            let request = self.view.source.with_page(page - 1);
            let title = self.view.title.clone();
            return self.begin_load(self.section, request, title);
        }
        Vec::new()
    }

    fn move_right(&mut self) -> Vec<Action> {
        if self.view.cursor + 1 < self.view.ids.len() {
            self.view.cursor += 1;
            return self.window_actions();
        }
        let page = self.view.source.page();
        if self.view.source.is_paginated() && (page + 1) * self.options.page_size < self.view.total
        {
            let request = self.view.source.with_page(page + 1);
            let title = self.view.title.clone();
            return self.begin_load(self.section, request, title);
        }
        Vec::new()
    }

    fn select(&mut self) -> Vec<Action> {
        let Some(item) = self.current_item().cloned() else {
            return Vec::new();
        };
        match item.kind {
            ItemKind::Movie | ItemKind::Episode | ItemKind::Video => self.play(item),
            ItemKind::Series => self.drill(
                ListRequest::Seasons {
                    series_id: item.id.clone(),
                },
                item.name,
            ),
            ItemKind::Season => {
                let request = match item.owning_series_id() {
                    Some(series_id) => ListRequest::Episodes {
                        series_id: series_id.to_string(),
                        season_id: item.id.clone(),
                    },
                    None => ListRequest::SeasonOf {
                        item_id: item.id.clone(),
                        series_id: None,
                        season_id: Some(item.id.clone()),
                    },
                };
                let title = match &item.series_name {
                    Some(series) => format!("{} - {}", series, item.name),
                    None => item.name.clone(),
                };
                self.drill(request, title)
            }
            ItemKind::CollectionFolder | ItemKind::Folder | ItemKind::BoxSet => self.drill(
                ListRequest::Children {
                    parent_id: item.id.clone(),
                    page: 0,
                },
                item.name,
            ),
            ItemKind::Other => {
                debug!("no action for item {} of unknown type", item.id);
                Vec::new()
            }
        }
    }

    fn push_nav(&mut self) {
        self.nav.push(NavState {
            section: self.section,
            ids: self.view.ids.clone(),
            cursor: self.view.cursor,
            title: self.view.title.clone(),
            source: self.view.source.clone(),
            total: self.view.total,
        });
    }

    fn drill(&mut self, request: ListRequest, title: String) -> Vec<Action> {
        self.push_nav();
        self.begin_load(self.section, request, title)
    }

    fn go_back(&mut self) -> Vec<Action> {
        let Some(prev) = self.nav.pop() else {
            return Vec::new();
        };
        self.awaiting = None;
        self.section = prev.section;
        self.status = prev.title.clone();
        self.view = View {
            ids: prev.ids,
            cursor: prev.cursor,
            title: prev.title,
            source: prev.source,
            total: prev.total,
        };
        self.mode = Mode::Browsing;
        self.prune_arena();
        self.window_actions()
    }

    /// Shows a section.  A cached root replaces the view at once; otherwise
    /// the current view (and its back stack) stays until the fetch lands.
    fn switch_section(&mut self, target: Section) -> Vec<Action> {
        if self.nav.is_empty() && self.view.source.is_section_root() {
            self.sections.save_cursor(self.section, self.view.cursor);
        }
        self.awaiting = None;

        if let Some(entry) = self.sections.get(target).filter(|e| !e.ids.is_empty()) {
            let source = match target {
                Section::Search => ListRequest::Search {
                    term: self.search_term.clone(),
                },
                _ => ListRequest::root_for(target).unwrap_or(ListRequest::Resume),
            };
            self.view = View {
                ids: entry.ids.clone(),
                cursor: entry.cursor,
                title: section_title(target, &self.search_term),
                source,
                total: entry.ids.len(),
            };
            self.section = target;
            self.nav.clear();
            self.mode = Mode::Browsing;
            self.status = format!("{} items", self.view.ids.len());
            self.prune_arena();
            return self.window_actions();
        }

        match ListRequest::root_for(target) {
            Some(request) => self.begin_load(target, request, target.title().to_string()),
            None => self.open_search(),
        }
    }

    fn refresh(&mut self) -> Vec<Action> {
        if self.view.source.is_section_root() {
            self.sections.invalidate(self.section);
        }
        match &self.view.source {
            ListRequest::Search { term } if term.trim().is_empty() => self.open_search(),
            source => {
                let request = source.clone();
                let title = self.view.title.clone();
                self.begin_load(self.section, request, title)
            }
        }
    }

    fn begin_load(&mut self, section: Section, request: ListRequest, title: String) -> Vec<Action> {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.awaiting = Some(seq);
        self.loading_section = section;
        self.loading_title = title;
        self.mode = Mode::Loading;
        self.status = "Loading...".to_string();
        debug!("fetch #{} {:?} for {:?}", seq, request, section);
        vec![Action::FetchList {
            seq,
            section,
            request,
        }]
    }

    /// Cover renders for the cursor window and the detail of the cursor item.
    fn window_actions(&mut self) -> Vec<Action> {
        if self.view.ids.is_empty() {
            return Vec::new();
        }
        let cursor = self.view.cursor.min(self.view.ids.len() - 1);
        let start = cursor.saturating_sub(COVER_WINDOW);
        let end = (cursor + COVER_WINDOW + 1).min(self.view.ids.len());

        let urls: Vec<String> = self.view.ids[start..end]
            .iter()
            .filter_map(|id| self.arena.get(id))
            .filter_map(|item| self.cover_url(item))
            .collect();

        let size = self.covers.size();
        let mut actions: Vec<Action> = urls
            .into_iter()
            .filter(|url| self.covers.begin_render(url))
            .map(|url| Action::RenderCover { url, size })
            .collect();

        let current = self.view.ids[cursor].clone();
        if self.connection.is_some() && self.details.begin_fetch(&current) {
            actions.push(Action::FetchDetail { item_id: current });
        }
        actions
    }

    // ── Item actions ──────────────────────────────────────────────────────────

    fn toggle_favorite(&mut self) -> Vec<Action> {
        match self.current_item() {
            Some(item) => vec![Action::SetFavorite {
                item_id: item.id.clone(),
                favorite: !item.is_favorite(),
            }],
            None => Vec::new(),
        }
    }

    fn can_start_player(&mut self) -> bool {
        if self.playing {
            self.status = "Player already running".to_string();
            return false;
        }
        if !self.player_available {
            self.status = "Cannot play: mpv not found".to_string();
            return false;
        }
        true
    }

    fn play(&mut self, item: MediaItem) -> Vec<Action> {
        if !self.can_start_player() {
            return Vec::new();
        }
        self.playing = true;
        self.status = format!("Playing: {}", item.name);
        vec![Action::Play { item }]
    }

    fn play_continuous(&mut self) -> Vec<Action> {
        let Some(episode) = self
            .current_item()
            .filter(|i| i.kind == ItemKind::Episode)
            .cloned()
        else {
            return Vec::new();
        };
        if !self.can_start_player() {
            return Vec::new();
        }
        self.playing = true;
        self.status = "Loading playlist...".to_string();
        vec![Action::PlayContinuous { episode }]
    }

    fn jump_to_season(&mut self) -> Vec<Action> {
        let Some(item) = self
            .current_item()
            .filter(|i| i.kind == ItemKind::Episode)
            .cloned()
        else {
            return Vec::new();
        };
        let request = ListRequest::SeasonOf {
            item_id: item.id.clone(),
            series_id: item.series_id.clone(),
            season_id: item.season_id.clone().or(item.parent_id.clone()),
        };
        let title = item
            .season_name
            .clone()
            .unwrap_or_else(|| "Season".to_string());
        self.drill(request, title)
    }

    fn jump_to_series(&mut self) -> Vec<Action> {
        let Some(item) = self
            .current_item()
            .filter(|i| matches!(i.kind, ItemKind::Episode | ItemKind::Season))
            .cloned()
        else {
            return Vec::new();
        };
        let request = ListRequest::SeriesOf {
            item_id: item.id.clone(),
            series_id: item.owning_series_id().map(str::to_string),
        };
        let title = item
            .series_name
            .clone()
            .unwrap_or_else(|| "Series".to_string());
        self.drill(request, title)
    }

    fn toggle_verbose(&mut self) -> Vec<Action> {
        self.verbose = !self.verbose;
        self.status = format!(
            "Debug logging: {}",
            if self.verbose { "ON" } else { "OFF" }
        );
        vec![Action::SetVerboseLogging(self.verbose)]
    }

    // ── Search ────────────────────────────────────────────────────────────────

    fn open_search(&mut self) -> Vec<Action> {
        self.mode = Mode::Searching;
        self.search.focused = true;
        Vec::new()
    }

    fn search_key(&mut self, key: KeyEvent) -> Vec<Action> {
        match self.search.handle_key(key) {
            FieldAction::Cancelled => {
                self.search.focused = false;
                self.mode = Mode::Browsing;
                Vec::new()
            }
            FieldAction::Submitted => {
                let term = self.search.value().trim().to_string();
                if term.is_empty() {
                    return Vec::new();
                }
                self.search.focused = false;
                if self.nav.is_empty() && self.view.source.is_section_root() {
                    self.sections.save_cursor(self.section, self.view.cursor);
                }
                self.search_term = term.clone();
                let title = section_title(Section::Search, &term);
                self.begin_load(Section::Search, ListRequest::Search { term }, title)
            }
            FieldAction::Edited => Vec::new(),
        }
    }

    // ── Servers ───────────────────────────────────────────────────────────────

    fn open_server_manage(&mut self) -> Vec<Action> {
        self.server_cursor = self.servers.active;
        self.mode = Mode::ServerManage;
        Vec::new()
    }

    fn server_manage_key(&mut self, key: KeyEvent) -> Vec<Action> {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => {
                self.mode = Mode::Browsing;
                Vec::new()
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.server_cursor = self.server_cursor.saturating_sub(1);
                Vec::new()
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if self.server_cursor + 1 < self.servers.len() {
                    self.server_cursor += 1;
                }
                Vec::new()
            }
            KeyCode::Enter => self.switch_server(),
            KeyCode::Char('a') => {
                self.editor = Some(ServerEditor::new(None, None));
                self.mode = Mode::ServerEdit;
                Vec::new()
            }
            KeyCode::Char('e') => {
                if let Some(profile) = self.servers.get(self.server_cursor) {
                    self.editor = Some(ServerEditor::new(Some(self.server_cursor), Some(profile)));
                    self.mode = Mode::ServerEdit;
                }
                Vec::new()
            }
            KeyCode::Char('d') | KeyCode::Delete => self.delete_server(),
            KeyCode::Char('p') => self.probe_servers(),
            _ => Vec::new(),
        }
    }

    fn switch_server(&mut self) -> Vec<Action> {
        let Some(target) = self.servers.get(self.server_cursor) else {
            return Vec::new();
        };
        let same_prefix = self.connection.is_some()
            && self
                .servers
                .active_prefix()
                .is_some_and(|prev| !prev.is_empty() && prev == target.prefix());
        self.servers.active = self.server_cursor;
        self.status = "Switching server...".to_string();
        self.connect(same_prefix)
    }

    fn connect(&mut self, same_prefix: bool) -> Vec<Action> {
        let Some(profile) = self.servers.active_profile() else {
            return Vec::new();
        };
        info!(
            "connecting to {} (same prefix: {})",
            profile.display_name(),
            same_prefix
        );
        self.mode = Mode::Loading;
        self.connecting = true;
        self.awaiting = None;
        vec![Action::Connect {
            servers: self.servers.clone(),
            same_prefix,
        }]
    }

    fn delete_server(&mut self) -> Vec<Action> {
        let was_active = self.server_cursor == self.servers.active;
        let Some(removed) = self.servers.delete(self.server_cursor) else {
            return Vec::new();
        };
        info!("deleted server {}", removed.display_name());
        self.server_cursor = self
            .server_cursor
            .min(self.servers.len().saturating_sub(1));
        self.server_latencies.clear();
        self.status = format!("Deleted {}", removed.display_name());

        let mut actions = vec![Action::SaveServers(self.servers.clone())];
        if !was_active {
            return actions;
        }
        if self.servers.is_empty() {
            self.connection = None;
            self.latency = None;
            self.reset_for_server_switch(false);
            self.mode = Mode::ServerManage;
            return actions;
        }
        let same_prefix = self.connection.is_some()
            && self
                .servers
                .active_prefix()
                .is_some_and(|p| p == removed.prefix());
        actions.extend(self.connect(same_prefix));
        actions
    }

    fn probe_servers(&mut self) -> Vec<Action> {
        if self.probing {
            return Vec::new();
        }
        let Some(prefix) = self
            .servers
            .get(self.server_cursor)
            .map(|s| s.prefix().to_string())
        else {
            return Vec::new();
        };
        self.probing = true;
        self.server_latencies.clear();
        self.status = "Pinging servers...".to_string();
        vec![Action::ProbeGroup {
            prefix,
            servers: self.servers.clone(),
        }]
    }

    fn server_edit_key(&mut self, key: KeyEvent) -> Vec<Action> {
        let Some(editor) = self.editor.as_mut() else {
            self.mode = Mode::ServerManage;
            return Vec::new();
        };
        match key.code {
            KeyCode::Esc => {
                self.editor = None;
                self.mode = Mode::ServerManage;
                Vec::new()
            }
            KeyCode::Tab | KeyCode::Down => {
                editor.set_focus(editor.focus + 1);
                Vec::new()
            }
            KeyCode::BackTab | KeyCode::Up => {
                editor.set_focus(editor.focus + editor.fields.len() - 1);
                Vec::new()
            }
            KeyCode::Enter => self.save_server(),
            _ => {
                let focus = editor.focus;
                editor.fields[focus].handle_key(key);
                Vec::new()
            }
        }
    }

    fn save_server(&mut self) -> Vec<Action> {
        let Some(editor) = self.editor.as_ref() else {
            return Vec::new();
        };
        let profile = match editor.to_profile() {
            Ok(p) => p,
            Err(msg) => {
                self.status = msg.to_string();
                return Vec::new();
            }
        };
        let name = profile.display_name().to_string();
        match editor.editing {
            Some(idx) => {
                self.servers.update(idx, profile);
            }
            None => {
                self.server_cursor = self.servers.add(profile);
            }
        }
        self.editor = None;
        self.mode = Mode::ServerManage;
        self.status = format!("Saved {}", name);
        vec![Action::SaveServers(self.servers.clone())]
    }

    /// Drops per-server view state.  Detail and cover caches survive when the
    /// new server shares the old one's prefix.
    fn reset_for_server_switch(&mut self, same_prefix: bool) {
        self.arena.clear();
        self.sections.clear();
        self.nav.clear();
        self.section = Section::Resume;
        self.view = View::empty(Section::Resume.title(), ListRequest::Resume);
        self.awaiting = None;
        self.epoch_seq = self.next_seq;
        self.search_term.clear();
        self.search.clear();
        if !same_prefix {
            self.details.clear();
            self.covers.clear();
        }
    }

    // ── Completions ───────────────────────────────────────────────────────────

    fn on_connected(
        &mut self,
        index: usize,
        same_prefix: bool,
        result: Result<Credentials, String>,
    ) -> Vec<Action> {
        if index != self.servers.active {
            debug!("ignoring connect result for server {}", index);
            return Vec::new();
        }
        self.connecting = false;
        match result {
            Err(e) => {
                warn!("connect failed: {}", e);
                self.status = format!("Connect failed: {}", e);
                self.server_cursor = index;
                self.mode = Mode::ServerManage;
                Vec::new()
            }
            Ok(credentials) => {
                self.servers
                    .share_token(index, &credentials.user_id, &credentials.token);
                let base_url = self
                    .servers
                    .get(index)
                    .map(|s| s.url.clone())
                    .unwrap_or_default();
                self.connection = Some(Connection {
                    base_url,
                    credentials,
                });
                self.latency = None;
                self.reset_for_server_switch(same_prefix);
                let mut actions =
                    self.begin_load(Section::Resume, ListRequest::Resume, "Resume".to_string());
                actions.push(Action::PingActive);
                actions
            }
        }
    }

    fn on_list_loaded(
        &mut self,
        seq: u64,
        section: Section,
        request: ListRequest,
        result: Result<ItemPage, String>,
    ) -> Vec<Action> {
        if seq < self.epoch_seq {
            debug!("dropping list #{} from a previous server", seq);
            return Vec::new();
        }
        let awaited = self.awaiting == Some(seq);
        match result {
            Ok(page) => {
                let seeds_cache = match &request {
                    ListRequest::Search { term } => awaited || *term == self.search_term,
                    other => other.is_section_root(),
                };
                if !awaited && !seeds_cache {
                    debug!("list #{} arrived after the view moved on", seq);
                    return Vec::new();
                }
                let total = page.total.max(page.items.len());
                let ids = self.arena.insert_all(seq, page.items);
                if seeds_cache {
                    self.sections.store(section, ids.clone());
                }
                if !awaited {
                    debug!("list #{} cached after the view moved on", seq);
                    self.prune_arena();
                    return Vec::new();
                }
                self.awaiting = None;
                self.status = format!("{} items", total);
                if request.is_section_root() {
                    self.nav.clear();
                }
                self.section = section;
                self.view = View {
                    ids,
                    cursor: 0,
                    title: std::mem::take(&mut self.loading_title),
                    source: request,
                    total,
                };
                if self.mode == Mode::Loading {
                    self.mode = Mode::Browsing;
                }
                self.prune_arena();
                self.window_actions()
            }
            Err(e) => {
                if !awaited {
                    debug!("stale list #{} failed: {}", seq, e);
                    return Vec::new();
                }
                warn!("list fetch failed: {}", e);
                self.awaiting = None;
                self.status = format!("Error: {}", e);
                if request.is_section_root() {
                    self.nav.clear();
                }
                self.section = section;
                self.view = View::empty(std::mem::take(&mut self.loading_title), request);
                if self.mode == Mode::Loading {
                    self.mode = Mode::Browsing;
                }
                self.prune_arena();
                Vec::new()
            }
        }
    }

    fn on_favorite_set(&mut self, item_id: String, result: Result<bool, String>) -> Vec<Action> {
        let favorite = match result {
            Ok(f) => f,
            Err(e) => {
                self.status = format!("Favorite error: {}", e);
                return Vec::new();
            }
        };
        self.arena.apply(&item_id, self.next_seq, |item| {
            item.user_data_mut().is_favorite = favorite
        });
        self.status = if favorite {
            "Added to favorites".to_string()
        } else {
            "Removed from favorites".to_string()
        };
        if self.section == Section::Favorites && !favorite && self.mode == Mode::Browsing {
            self.sections.invalidate(Section::Favorites);
            return self.refresh();
        }
        Vec::new()
    }

    fn on_playback_finished(&mut self, result: Result<PlaybackReport, String>) -> Vec<Action> {
        self.playing = false;
        let report = match result {
            Ok(r) => r,
            Err(e) => {
                self.status = e;
                return Vec::new();
            }
        };
        self.last_play = Some(LastPlay {
            position_secs: report.position_secs,
            report_ok: report.report_ok,
        });
        self.status = "Playback finished".to_string();
        if let Some(id) = report.item_id {
            let ticks = secs_to_ticks(report.position_secs);
            self.arena.apply(&id, self.next_seq, |item| {
                item.user_data_mut().playback_position_ticks = ticks
            });
        }
        Vec::new()
    }

    /// Drops arena items that no view, section entry or back snapshot lists.
    fn prune_arena(&mut self) {
        let mut live: HashSet<&str> = self.view.ids.iter().map(String::as_str).collect();
        for (_, entry) in self.sections.iter() {
            live.extend(entry.ids.iter().map(String::as_str));
        }
        for snapshot in self.nav.iter() {
            live.extend(snapshot.ids.iter().map(String::as_str));
        }
        let dropped = self.arena.retain(&live);
        if dropped > 0 {
            debug!("pruned {} unreferenced items", dropped);
        }
    }
}

fn section_title(section: Section, search_term: &str) -> String {
    match section {
        Section::Search if !search_term.is_empty() => format!("Search: {}", search_term),
        other => other.title().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn book(names: &[&str]) -> ServerBook {
        ServerBook {
            servers: names
                .iter()
                .map(|n| ServerProfile {
                    name: n.to_string(),
                    url: format!("http://{}", n.to_lowercase()),
                    ..ServerProfile::default()
                })
                .collect(),
            active: 0,
        }
    }

    fn item(id: &str, kind: ItemKind) -> MediaItem {
        let mut item = MediaItem {
            id: id.to_string(),
            name: id.to_uppercase(),
            kind,
            ..MediaItem::default()
        };
        item.image_tags.insert("Primary".into(), "tag".into());
        item
    }

    fn connected(names: &[&str]) -> Session {
        let mut s = Session::new(book(names), SessionOptions::default(), true);
        s.start();
        s.on_completion(Completion::Connected {
            index: 0,
            same_prefix: false,
            result: Ok(Credentials {
                user_id: "u".into(),
                token: "t".into(),
            }),
        });
        s
    }

    fn fetch_seq(actions: &[Action]) -> (u64, Section, ListRequest) {
        actions
            .iter()
            .find_map(|a| match a {
                Action::FetchList {
                    seq,
                    section,
                    request,
                } => Some((*seq, *section, request.clone())),
                _ => None,
            })
            .expect("no fetch action")
    }

    fn deliver(s: &mut Session, actions: &[Action], page: ItemPage) -> Vec<Action> {
        let (seq, section, request) = fetch_seq(actions);
        s.on_completion(Completion::ListLoaded {
            seq,
            section,
            request,
            result: Ok(page),
        })
    }

    #[test]
    fn test_initial_mode_depends_on_servers() {
        let mut empty = Session::new(ServerBook::default(), SessionOptions::default(), true);
        assert!(empty.start().is_empty());
        assert_eq!(empty.mode(), Mode::ServerManage);

        let mut one = Session::new(book(&["Home"]), SessionOptions::default(), true);
        assert_eq!(one.mode(), Mode::Loading);
        let actions = one.start();
        assert!(matches!(actions.as_slice(), [Action::Connect { same_prefix: false, .. }]));
    }

    #[test]
    fn test_connect_failure_goes_to_server_manage() {
        let mut s = Session::new(book(&["Home"]), SessionOptions::default(), true);
        s.start();
        s.on_completion(Completion::Connected {
            index: 0,
            same_prefix: false,
            result: Err("timed out".into()),
        });
        assert_eq!(s.mode(), Mode::ServerManage);
        assert_eq!(s.status(), "Connect failed: timed out");
    }

    #[test]
    fn test_connect_loads_resume_and_pings() {
        let mut s = Session::new(book(&["Home"]), SessionOptions::default(), true);
        s.start();
        let actions = s.on_completion(Completion::Connected {
            index: 0,
            same_prefix: false,
            result: Ok(Credentials {
                user_id: "u".into(),
                token: "t".into(),
            }),
        });
        let (_, section, request) = fetch_seq(&actions);
        assert_eq!(section, Section::Resume);
        assert_eq!(request, ListRequest::Resume);
        assert!(actions.iter().any(|a| matches!(a, Action::PingActive)));
        assert_eq!(s.servers().get(0).unwrap().token, "t");
    }

    #[test]
    fn test_failed_list_fetch_leaves_empty_browsing_view() {
        let mut s = connected(&["Home"]);
        let actions = s.handle_key(key(KeyCode::Char('2')));
        let (seq, section, request) = fetch_seq(&actions);
        s.on_completion(Completion::ListLoaded {
            seq,
            section,
            request,
            result: Err("HTTP 500".into()),
        });
        assert_eq!(s.mode(), Mode::Browsing);
        assert!(s.items().is_empty());
        assert_eq!(s.status(), "Error: HTTP 500");
    }

    #[test]
    fn test_paging_requests_next_page_at_boundary() {
        let mut s = connected(&["Home"]);
        s.on_resize(120, 40);
        let actions = s.handle_key(key(KeyCode::Char('3')));
        deliver(
            &mut s,
            &actions,
            ItemPage::new(vec![item("lib", ItemKind::CollectionFolder)]),
        );
        let actions = s.handle_key(key(KeyCode::Enter));
        let page = ItemPage {
            items: vec![item("m1", ItemKind::Movie), item("m2", ItemKind::Movie)],
            total: 3,
        };
        let opts = SessionOptions {
            page_size: 2,
            ..SessionOptions::default()
        };
        s.options = opts;
        deliver(&mut s, &actions, page);
        assert_eq!(s.page_info(), Some((1, 2)));

        assert!(fetch_seq_opt(&s.handle_key(key(KeyCode::Right))).is_none());
        let actions = s.handle_key(key(KeyCode::Right));
        let (_, _, request) = fetch_seq(&actions);
        assert_eq!(
            request,
            ListRequest::Children {
                parent_id: "lib".into(),
                page: 1
            }
        );
        assert_eq!(s.nav_depth(), 1);
    }

    fn fetch_seq_opt(actions: &[Action]) -> Option<u64> {
        actions.iter().find_map(|a| match a {
            Action::FetchList { seq, .. } => Some(*seq),
            _ => None,
        })
    }

    #[test]
    fn test_stale_completion_seeds_cache_without_replacing_view() {
        let mut s = connected(&["Home"]);
        let resume = s.handle_key(key(KeyCode::Char('1')));
        let favorites = s.handle_key(key(KeyCode::Char('2')));

        deliver(&mut s, &resume, ItemPage::new(vec![item("r", ItemKind::Movie)]));
        assert_eq!(s.mode(), Mode::Loading);
        assert_eq!(s.section_ids(Section::Resume).map(<[String]>::len), Some(1));

        deliver(&mut s, &favorites, ItemPage::new(vec![item("f", ItemKind::Movie)]));
        assert_eq!(s.current_item().map(|i| i.id.as_str()), Some("f"));
    }

    #[test]
    fn test_section_switch_restores_cursor_from_cache() {
        let mut s = connected(&["Home"]);
        let actions = s.handle_key(key(KeyCode::Char('1')));
        deliver(
            &mut s,
            &actions,
            ItemPage::new(vec![item("a", ItemKind::Movie), item("b", ItemKind::Movie)]),
        );
        s.handle_key(key(KeyCode::Right));
        let actions = s.handle_key(key(KeyCode::Char('2')));
        deliver(&mut s, &actions, ItemPage::new(vec![item("c", ItemKind::Movie)]));

        let actions = s.handle_key(key(KeyCode::Char('1')));
        assert!(fetch_seq_opt(&actions).is_none());
        assert_eq!(s.cursor(), 1);
        assert_eq!(s.current_item().map(|i| i.id.as_str()), Some("b"));
    }

    #[test]
    fn test_refresh_invalidates_only_current_section() {
        let mut s = connected(&["Home"]);
        let actions = s.handle_key(key(KeyCode::Char('1')));
        deliver(&mut s, &actions, ItemPage::new(vec![item("a", ItemKind::Movie)]));
        let actions = s.handle_key(key(KeyCode::Char('2')));
        deliver(&mut s, &actions, ItemPage::new(vec![item("b", ItemKind::Movie)]));

        let actions = s.handle_key(key(KeyCode::Char('r')));
        assert_eq!(fetch_seq(&actions).2, ListRequest::Favorites);
        assert!(s.section_ids(Section::Favorites).is_none());
        assert!(s.section_ids(Section::Resume).is_some());
    }

    #[test]
    fn test_server_edit_requires_url_and_defaults_name() {
        let mut s = Session::new(ServerBook::default(), SessionOptions::default(), true);
        s.start();
        s.handle_key(key(KeyCode::Char('a')));
        assert_eq!(s.mode(), Mode::ServerEdit);

        assert!(s.handle_key(key(KeyCode::Enter)).is_empty());
        assert_eq!(s.status(), "URL is required");
        assert_eq!(s.mode(), Mode::ServerEdit);

        s.handle_key(key(KeyCode::Tab));
        for c in "http://nas:8096".chars() {
            s.handle_key(key(KeyCode::Char(c)));
        }
        let actions = s.handle_key(key(KeyCode::Enter));
        assert_eq!(s.mode(), Mode::ServerManage);
        match actions.as_slice() {
            [Action::SaveServers(book)] => {
                assert_eq!(book.servers[0].name, "http://nas:8096");
                assert_eq!(book.servers[0].url, "http://nas:8096");
            }
            other => panic!("unexpected actions {:?}", other),
        }
    }

    #[test]
    fn test_edit_keeps_cached_token() {
        let mut s = connected(&["Home A"]);
        s.handle_key(key(KeyCode::Char('m')));
        s.handle_key(key(KeyCode::Char('e')));
        s.handle_key(key(KeyCode::BackTab));
        s.handle_key(key(KeyCode::BackTab));
        s.handle_key(key(KeyCode::Char('x')));
        s.handle_key(key(KeyCode::Enter));
        let profile = s.servers().get(0).unwrap();
        assert_eq!(profile.username, "x");
        assert_eq!(profile.token, "t");
    }

    #[test]
    fn test_playback_without_player_is_reported() {
        let mut s = Session::new(book(&["Home"]), SessionOptions::default(), false);
        s.start();
        s.on_completion(Completion::Connected {
            index: 0,
            same_prefix: false,
            result: Ok(Credentials {
                user_id: "u".into(),
                token: "t".into(),
            }),
        });
        let actions = s.handle_key(key(KeyCode::Char('1')));
        deliver(&mut s, &actions, ItemPage::new(vec![item("m", ItemKind::Movie)]));
        assert!(s.handle_key(key(KeyCode::Enter)).is_empty());
        assert_eq!(s.status(), "Cannot play: mpv not found");
        assert_eq!(s.mode(), Mode::Browsing);
    }

    #[test]
    fn test_playback_result_updates_position() {
        let mut s = connected(&["Home"]);
        let actions = s.handle_key(key(KeyCode::Char('1')));
        deliver(&mut s, &actions, ItemPage::new(vec![item("m", ItemKind::Movie)]));
        let actions = s.handle_key(key(KeyCode::Enter));
        assert!(matches!(actions.as_slice(), [Action::Play { .. }]));
        assert!(s.handle_key(key(KeyCode::Enter)).is_empty());

        s.on_completion(Completion::PlaybackFinished {
            result: Ok(PlaybackReport {
                item_id: Some("m".into()),
                position_secs: 95,
                report_ok: false,
            }),
        });
        assert!(!s.is_playing());
        assert_eq!(s.current_item().unwrap().position_ticks(), 950_000_000);
        assert_eq!(
            s.last_play(),
            Some(LastPlay {
                position_secs: 95,
                report_ok: false
            })
        );
    }

    #[test]
    fn test_cover_size_follows_sidebar() {
        assert_eq!(cover_size(120, 40), (84, 34));
        assert_eq!(cover_size(90, 30), (58, 24));
        assert_eq!(cover_size(10, 3), (0, 0));
    }
}
