//! Catalog data model shared by the client, the store, and the TUI.
//!
//! Item types deserialize straight from the server's PascalCase JSON.  Local
//! records (`MediaDetail`, `PlaybackRecord`, `ServerBook`) use snake_case on
//! disk.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Remote positions and durations are expressed in 100ns ticks.
pub const TICKS_PER_SECOND: i64 = 10_000_000;

pub fn ticks_to_secs(ticks: i64) -> u64 {
    (ticks.max(0) / TICKS_PER_SECOND) as u64
}

pub fn secs_to_ticks(secs: u64) -> i64 {
    (secs as i64).saturating_mul(TICKS_PER_SECOND)
}

// ── Items ─────────────────────────────────────────────────────────────────────

/// Closed set of item types the session knows how to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ItemKind {
    Movie,
    Series,
    Season,
    Episode,
    CollectionFolder,
    Folder,
    BoxSet,
    Video,
    #[default]
    #[serde(other)]
    Other,
}

impl ItemKind {
    pub fn is_playable(self) -> bool {
        matches!(self, ItemKind::Movie | ItemKind::Episode | ItemKind::Video)
    }

    pub fn is_container(self) -> bool {
        matches!(
            self,
            ItemKind::CollectionFolder | ItemKind::Folder | ItemKind::BoxSet
        )
    }

    /// Short badge shown on placeholders and under titles.
    pub fn label(self) -> &'static str {
        match self {
            ItemKind::Movie => "MOVIE",
            ItemKind::Series => "SERIES",
            ItemKind::Season => "SEASON",
            ItemKind::Episode => "EP",
            ItemKind::CollectionFolder => "LIBRARY",
            ItemKind::Folder => "FOLDER",
            ItemKind::BoxSet => "BOXSET",
            ItemKind::Video => "VIDEO",
            ItemKind::Other => "ITEM",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct UserData {
    pub playback_position_ticks: i64,
    pub played: bool,
    pub is_favorite: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MediaStream {
    #[serde(rename = "Type")]
    pub kind: String,
    pub index: i32,
    pub language: Option<String>,
    pub title: Option<String>,
    pub is_external: bool,
    pub is_default: bool,
    pub codec: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MediaSource {
    pub id: String,
    pub container: String,
    pub media_streams: Vec<MediaStream>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MediaItem {
    pub id: String,
    pub name: String,
    #[serde(rename = "Type")]
    pub kind: ItemKind,
    pub production_year: Option<i32>,
    pub overview: Option<String>,
    pub series_id: Option<String>,
    pub series_name: Option<String>,
    pub season_id: Option<String>,
    pub season_name: Option<String>,
    pub parent_id: Option<String>,
    pub index_number: Option<u32>,
    pub run_time_ticks: Option<i64>,
    pub media_sources: Vec<MediaSource>,
    pub image_tags: HashMap<String, String>,
    pub user_data: Option<UserData>,
}

impl MediaItem {
    pub fn is_favorite(&self) -> bool {
        self.user_data.as_ref().is_some_and(|u| u.is_favorite)
    }

    pub fn position_ticks(&self) -> i64 {
        self.user_data
            .as_ref()
            .map(|u| u.playback_position_ticks)
            .unwrap_or(0)
    }

    pub fn duration_secs(&self) -> u64 {
        self.run_time_ticks.map(ticks_to_secs).unwrap_or(0)
    }

    /// Mutable access to user data, creating an empty record when the server
    /// sent none.
    pub fn user_data_mut(&mut self) -> &mut UserData {
        self.user_data.get_or_insert_with(UserData::default)
    }

    pub fn primary_image_tag(&self) -> Option<&str> {
        self.image_tags.get("Primary").map(String::as_str)
    }

    /// Id whose primary image represents this item: its own when tagged,
    /// else the owning series, season or parent.
    pub fn image_owner_id(&self) -> Option<&str> {
        if self.primary_image_tag().is_some() {
            return Some(&self.id);
        }
        self.series_id
            .as_deref()
            .or(self.season_id.as_deref())
            .or(self.parent_id.as_deref())
    }

    /// Series id for an episode or season; seasons sometimes only carry it
    /// as their parent.
    pub fn owning_series_id(&self) -> Option<&str> {
        self.series_id.as_deref().or(match self.kind {
            ItemKind::Season => self.parent_id.as_deref(),
            _ => None,
        })
    }
}

/// One page of a list endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemPage {
    #[serde(rename = "Items", default)]
    pub items: Vec<MediaItem>,
    #[serde(rename = "TotalRecordCount", default)]
    pub total: usize,
}

impl ItemPage {
    pub fn new(items: Vec<MediaItem>) -> Self {
        let total = items.len();
        Self { items, total }
    }
}

// ── Local records ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleTrack {
    pub index: i32,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub is_external: bool,
    #[serde(default)]
    pub is_default: bool,
}

/// Stream/subtitle information for one item, cached per server prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaDetail {
    pub item_id: String,
    pub source_id: String,
    pub container: String,
    #[serde(default)]
    pub subtitles: Vec<SubtitleTrack>,
    pub cached_at: DateTime<Utc>,
}

impl MediaDetail {
    /// Builds the detail from a fully fetched item.  `None` when the item has
    /// no playable source.
    pub fn from_item(item: &MediaItem) -> Option<Self> {
        let source = item.media_sources.first()?;
        let subtitles = source
            .media_streams
            .iter()
            .filter(|s| s.kind == "Subtitle")
            .map(|s| SubtitleTrack {
                index: s.index,
                language: s.language.clone().unwrap_or_default(),
                title: s.title.clone().unwrap_or_default(),
                is_external: s.is_external,
                is_default: s.is_default,
            })
            .collect();
        Some(Self {
            item_id: item.id.clone(),
            source_id: source.id.clone(),
            container: source.container.clone(),
            subtitles,
            cached_at: Utc::now(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackRecord {
    pub position_secs: u64,
    #[serde(default)]
    pub duration_secs: u64,
    pub updated_at: DateTime<Utc>,
}

// ── Server profiles ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ServerProfile {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub token: String,
}

impl ServerProfile {
    /// Grouping key: profiles sharing it point at the same library and share
    /// cached detail and playback data.
    pub fn prefix(&self) -> &str {
        let name = self.name.trim_start();
        name.split_whitespace().next().unwrap_or(name)
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.url
        } else {
            &self.name
        }
    }
}

/// All configured profiles plus the active index.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ServerBook {
    #[serde(default)]
    pub servers: Vec<ServerProfile>,
    #[serde(rename = "active_server", default)]
    pub active: usize,
}

impl ServerBook {
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn get(&self, idx: usize) -> Option<&ServerProfile> {
        self.servers.get(idx)
    }

    pub fn active_profile(&self) -> Option<&ServerProfile> {
        self.servers.get(self.active)
    }

    pub fn active_prefix(&self) -> Option<&str> {
        self.active_profile().map(ServerProfile::prefix)
    }

    pub fn add(&mut self, profile: ServerProfile) -> usize {
        self.servers.push(profile);
        self.servers.len() - 1
    }

    /// Replaces the editable fields of a profile, keeping its cached login.
    pub fn update(&mut self, idx: usize, edited: ServerProfile) -> bool {
        let Some(existing) = self.servers.get_mut(idx) else {
            return false;
        };
        existing.name = edited.name;
        existing.url = edited.url;
        existing.username = edited.username;
        existing.password = edited.password;
        true
    }

    /// Removes a profile and keeps `active` pointing at the same server where
    /// possible, otherwise clamped into range.
    pub fn delete(&mut self, idx: usize) -> Option<ServerProfile> {
        if idx >= self.servers.len() {
            return None;
        }
        let removed = self.servers.remove(idx);
        if idx < self.active {
            self.active -= 1;
        }
        self.active = self.active.min(self.servers.len().saturating_sub(1));
        Some(removed)
    }

    /// Stores a login on `idx` and every other profile with the same prefix.
    pub fn share_token(&mut self, idx: usize, user_id: &str, token: &str) {
        let Some(prefix) = self.servers.get(idx).map(|s| s.prefix().to_string()) else {
            return;
        };
        for server in self.servers.iter_mut().filter(|s| s.prefix() == prefix) {
            server.user_id = user_id.to_string();
            server.token = token.to_string();
        }
    }

    pub fn indices_with_prefix(&self, prefix: &str) -> Vec<usize> {
        self.servers
            .iter()
            .enumerate()
            .filter(|(_, s)| s.prefix() == prefix)
            .map(|(i, _)| i)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(name: &str) -> ServerProfile {
        ServerProfile {
            name: name.to_string(),
            url: format!("http://{}", name.replace(' ', "-")),
            ..ServerProfile::default()
        }
    }

    #[test]
    fn test_prefix_is_first_token() {
        assert_eq!(profile("HomeNAS Main").prefix(), "HomeNAS");
        assert_eq!(profile("HomeNAS").prefix(), "HomeNAS");
        assert_eq!(profile("  Remote  box").prefix(), "Remote");
    }

    #[test]
    fn test_item_deserializes_from_catalog_json() {
        let json = r#"{
            "Id": "ep1", "Name": "Pilot", "Type": "Episode",
            "SeriesId": "s1", "IndexNumber": 1, "RunTimeTicks": 26000000000,
            "UserData": {"PlaybackPositionTicks": 600000000, "IsFavorite": true},
            "MediaSources": [{"Id": "src", "Container": "mkv", "MediaStreams": [
                {"Type": "Subtitle", "Index": 3, "Language": "eng", "IsExternal": true}
            ]}]
        }"#;
        let item: MediaItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.kind, ItemKind::Episode);
        assert!(item.is_favorite());
        assert_eq!(ticks_to_secs(item.position_ticks()), 60);
        assert_eq!(item.duration_secs(), 2600);

        let detail = MediaDetail::from_item(&item).unwrap();
        assert_eq!(detail.source_id, "src");
        assert_eq!(detail.subtitles.len(), 1);
        assert_eq!(detail.subtitles[0].language, "eng");
    }

    #[test]
    fn test_unknown_type_maps_to_other() {
        let item: MediaItem =
            serde_json::from_str(r#"{"Id": "x", "Name": "Song", "Type": "Audio"}"#).unwrap();
        assert_eq!(item.kind, ItemKind::Other);
        assert!(!item.kind.is_playable());
    }

    #[test]
    fn test_image_owner_falls_back_to_series() {
        let mut item = MediaItem {
            id: "ep".into(),
            series_id: Some("series".into()),
            ..MediaItem::default()
        };
        assert_eq!(item.image_owner_id(), Some("series"));
        item.image_tags.insert("Primary".into(), "tag".into());
        assert_eq!(item.image_owner_id(), Some("ep"));
    }

    #[test]
    fn test_delete_keeps_active_in_range() {
        let mut book = ServerBook {
            servers: vec![profile("A"), profile("B"), profile("C")],
            active: 2,
        };
        book.delete(2);
        assert_eq!(book.active, 1);
        book.delete(0);
        assert_eq!(book.active, 0);
        assert_eq!(book.active_profile().unwrap().name, "B");
        book.delete(0);
        assert!(book.is_empty());
        assert_eq!(book.active, 0);
        assert!(book.delete(5).is_none());
    }

    #[test]
    fn test_share_token_covers_prefix_group() {
        let mut book = ServerBook {
            servers: vec![profile("HomeNAS A"), profile("HomeNAS B"), profile("Remote")],
            active: 0,
        };
        book.share_token(1, "uid", "tok");
        assert_eq!(book.servers[0].token, "tok");
        assert_eq!(book.servers[1].user_id, "uid");
        assert!(book.servers[2].token.is_empty());
        assert_eq!(book.indices_with_prefix("HomeNAS"), vec![0, 1]);
    }

    #[test]
    fn test_update_keeps_login() {
        let mut book = ServerBook::default();
        let idx = book.add(profile("Home"));
        book.share_token(idx, "uid", "tok");
        assert!(book.update(idx, profile("Home Renamed")));
        assert_eq!(book.servers[idx].name, "Home Renamed");
        assert_eq!(book.servers[idx].token, "tok");
    }
}
