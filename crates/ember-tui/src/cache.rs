//! Session caches.  All of them are owned by the `Session` and only touched
//! from the event loop, so none of them lock.
//!
//! Items live once in the `ItemArena`; the current view, section entries and
//! navigation snapshots hold ordered id lists into it.  A mutation applied
//! through `ItemArena::apply` is therefore visible in every container at once.

use std::collections::{HashMap, HashSet};

use ember_proto::model::{MediaDetail, MediaItem};

use crate::cover::CoverArt;

// ── Sections ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Resume,
    Favorites,
    Libraries,
    Search,
}

impl Section {
    pub const ALL: [Section; 4] = [
        Section::Resume,
        Section::Favorites,
        Section::Libraries,
        Section::Search,
    ];

    pub fn title(self) -> &'static str {
        match self {
            Section::Resume => "Resume",
            Section::Favorites => "Favorites",
            Section::Libraries => "Libraries",
            Section::Search => "Search",
        }
    }

    pub fn hotkey(self) -> char {
        match self {
            Section::Resume => '1',
            Section::Favorites => '2',
            Section::Libraries => '3',
            Section::Search => '4',
        }
    }
}

// ── Item arena ────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct ItemArena {
    items: HashMap<String, MediaItem>,
    /// Fetch sequence number that was next when an item's user data was last
    /// changed locally.  Lists fetched before that keep the local copy.
    changed_at: HashMap<String, u64>,
}

impl ItemArena {
    /// Stores the items of list fetch `seq` and returns their ids in order.
    /// A fetched copy replaces the stored one, but user data changed locally
    /// after `seq` was issued survives.
    pub fn insert_all(&mut self, seq: u64, items: Vec<MediaItem>) -> Vec<String> {
        items
            .into_iter()
            .map(|mut item| {
                let id = item.id.clone();
                match self.changed_at.get(&id).copied() {
                    Some(at) if seq < at => {
                        if let Some(local) = self.items.get_mut(&id) {
                            item.user_data = local.user_data.take();
                        }
                    }
                    Some(_) => {
                        self.changed_at.remove(&id);
                    }
                    None => {}
                }
                self.items.insert(id.clone(), item);
                id
            })
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&MediaItem> {
        self.items.get(id)
    }

    /// The single mutation path for item state shown in several views.
    /// `next_seq` is the sequence number the next list fetch will get.
    /// Returns false when the id is unknown.
    pub fn apply(&mut self, id: &str, next_seq: u64, mutate: impl FnOnce(&mut MediaItem)) -> bool {
        match self.items.get_mut(id) {
            Some(item) => {
                mutate(item);
                self.changed_at.insert(id.to_string(), next_seq);
                true
            }
            None => false,
        }
    }

    pub fn resolve<'a>(&'a self, ids: &'a [String]) -> impl Iterator<Item = &'a MediaItem> + 'a {
        ids.iter().filter_map(|id| self.items.get(id))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Keeps only the listed ids; returns how many items were dropped.
    pub fn retain(&mut self, live: &HashSet<&str>) -> usize {
        let before = self.items.len();
        self.items.retain(|id, _| live.contains(id.as_str()));
        self.changed_at.retain(|id, _| live.contains(id.as_str()));
        before - self.items.len()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.changed_at.clear();
    }
}

// ── Section cache ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SectionEntry {
    pub ids: Vec<String>,
    pub cursor: usize,
}

/// Root list of each section with the cursor the user left it at.  Entries
/// only go away on explicit refresh or server switch.
#[derive(Debug, Default)]
pub struct SectionCache {
    entries: HashMap<Section, SectionEntry>,
}

impl SectionCache {
    pub fn get(&self, section: Section) -> Option<&SectionEntry> {
        self.entries.get(&section)
    }

    pub fn contains(&self, section: Section) -> bool {
        self.entries.contains_key(&section)
    }

    /// Seeds (or reseeds) a section after a fetch; the cursor restarts at 0.
    pub fn store(&mut self, section: Section, ids: Vec<String>) {
        self.entries.insert(section, SectionEntry { ids, cursor: 0 });
    }

    pub fn save_cursor(&mut self, section: Section, cursor: usize) {
        if let Some(entry) = self.entries.get_mut(&section) {
            entry.cursor = cursor.min(entry.ids.len().saturating_sub(1));
        }
    }

    pub fn invalidate(&mut self, section: Section) {
        self.entries.remove(&section);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Section, &SectionEntry)> {
        self.entries.iter()
    }
}

// ── Detail cache ──────────────────────────────────────────────────────────────

/// Stream/subtitle details by item id.  Items without a playable source are
/// remembered as `None` so the cursor does not refetch them.
#[derive(Debug, Default)]
pub struct DetailCache {
    entries: HashMap<String, Option<MediaDetail>>,
    pending: HashSet<String>,
}

impl DetailCache {
    pub fn get(&self, item_id: &str) -> Option<&MediaDetail> {
        self.entries.get(item_id).and_then(Option::as_ref)
    }

    pub fn is_known(&self, item_id: &str) -> bool {
        self.entries.contains_key(item_id)
    }

    /// Returns true when the caller should start a fetch for `item_id`.
    pub fn begin_fetch(&mut self, item_id: &str) -> bool {
        if self.is_known(item_id) || self.pending.contains(item_id) {
            return false;
        }
        self.pending.insert(item_id.to_string());
        true
    }

    pub fn complete(&mut self, item_id: &str, detail: Option<MediaDetail>) {
        self.pending.remove(item_id);
        self.entries.insert(item_id.to_string(), detail);
    }

    /// Forgets a failed fetch so the next cursor visit retries.
    pub fn abandon(&mut self, item_id: &str) {
        self.pending.remove(item_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.pending.clear();
    }
}

// ── Cover cache ───────────────────────────────────────────────────────────────

/// Rendered covers keyed by image URL.  Output depends on the cover area, so
/// `resize` drops everything; renders that finish for an older size are
/// discarded on arrival.
#[derive(Debug, Default)]
pub struct CoverCache {
    entries: HashMap<String, CoverArt>,
    pending: HashSet<String>,
    size: (u16, u16),
}

impl CoverCache {
    pub fn size(&self) -> (u16, u16) {
        self.size
    }

    pub fn get(&self, url: &str) -> Option<&CoverArt> {
        self.entries.get(url)
    }

    /// Returns true when the caller should start a render for `url`.
    pub fn begin_render(&mut self, url: &str) -> bool {
        if self.size.0 == 0 || self.size.1 == 0 {
            return false;
        }
        if self.entries.contains_key(url) || self.pending.contains(url) {
            return false;
        }
        self.pending.insert(url.to_string());
        true
    }

    /// Stores a finished render if it was produced for the current size.
    pub fn complete(&mut self, url: &str, size: (u16, u16), art: CoverArt) -> bool {
        if size != self.size {
            return false;
        }
        self.pending.remove(url);
        self.entries.insert(url.to_string(), art);
        true
    }

    pub fn resize(&mut self, size: (u16, u16)) {
        self.size = size;
        self.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ember_proto::model::UserData;

    fn item(id: &str) -> MediaItem {
        MediaItem {
            id: id.to_string(),
            name: id.to_uppercase(),
            ..MediaItem::default()
        }
    }

    #[test]
    fn test_arena_apply_is_seen_by_every_list() {
        let mut arena = ItemArena::default();
        let view = arena.insert_all(0, vec![item("a"), item("b")]);
        let mut sections = SectionCache::default();
        sections.store(Section::Favorites, arena.insert_all(1, vec![item("b"), item("c")]));

        assert!(arena.apply("b", 2, |i| i.user_data_mut().is_favorite = true));

        let fav = |ids: &[String]| {
            arena
                .resolve(ids)
                .find(|i| i.id == "b")
                .map(MediaItem::is_favorite)
        };
        assert_eq!(fav(&view), Some(true));
        assert_eq!(fav(&sections.get(Section::Favorites).unwrap().ids), Some(true));
        assert!(!arena.apply("zzz", 2, |_| {}));
    }

    #[test]
    fn test_refetch_overwrites_arena_copy() {
        let mut arena = ItemArena::default();
        arena.insert_all(0, vec![item("a")]);
        let mut fresh = item("a");
        fresh.user_data = Some(UserData {
            playback_position_ticks: 42,
            ..UserData::default()
        });
        arena.insert_all(1, vec![fresh]);
        assert_eq!(arena.len(), 1);
        assert_eq!(arena.get("a").unwrap().position_ticks(), 42);
    }

    #[test]
    fn test_older_fetch_keeps_local_user_data() {
        let mut arena = ItemArena::default();
        arena.insert_all(3, vec![item("a")]);
        arena.apply("a", 4, |i| i.user_data_mut().is_favorite = true);

        // Issued before the change: the name updates, the flag stays.
        let mut old = item("a");
        old.name = "Renamed".into();
        arena.insert_all(2, vec![old]);
        let a = arena.get("a").unwrap();
        assert!(a.is_favorite());
        assert_eq!(a.name, "Renamed");

        // Issued after the change: the server copy wins.
        arena.insert_all(4, vec![item("a")]);
        assert!(!arena.get("a").unwrap().is_favorite());
        arena.insert_all(1, vec![item("a")]);
        assert!(!arena.get("a").unwrap().is_favorite());
    }

    #[test]
    fn test_retain_drops_unlisted_items() {
        let mut arena = ItemArena::default();
        arena.insert_all(0, vec![item("a"), item("b"), item("c")]);
        arena.apply("c", 1, |i| i.user_data_mut().is_favorite = true);

        let live: HashSet<&str> = ["a"].into_iter().collect();
        assert_eq!(arena.retain(&live), 2);
        assert_eq!(arena.len(), 1);
        assert!(arena.get("b").is_none());

        // A later copy of a dropped item carries no stale local state.
        arena.insert_all(0, vec![item("c")]);
        assert!(!arena.get("c").unwrap().is_favorite());
    }

    #[test]
    fn test_section_cache_invalidate_is_scoped() {
        let mut cache = SectionCache::default();
        cache.store(Section::Resume, vec!["a".into(), "b".into()]);
        cache.store(Section::Favorites, vec!["c".into()]);
        cache.save_cursor(Section::Resume, 7);
        assert_eq!(cache.get(Section::Resume).unwrap().cursor, 1);

        cache.invalidate(Section::Resume);
        assert!(!cache.contains(Section::Resume));
        assert!(cache.contains(Section::Favorites));
    }

    #[test]
    fn test_detail_cache_dedupes_fetches() {
        let mut cache = DetailCache::default();
        assert!(cache.begin_fetch("m"));
        assert!(!cache.begin_fetch("m"));
        let detail = MediaDetail {
            item_id: "m".into(),
            source_id: "s".into(),
            container: "mp4".into(),
            subtitles: Vec::new(),
            cached_at: Utc::now(),
        };
        cache.complete("m", Some(detail.clone()));
        cache.complete("m", Some(detail));
        assert_eq!(cache.len(), 1);
        assert!(!cache.begin_fetch("m"));

        cache.complete("series", None);
        assert!(cache.get("series").is_none());
        assert!(!cache.begin_fetch("series"));

        assert!(cache.begin_fetch("x"));
        cache.abandon("x");
        assert!(cache.begin_fetch("x"));
    }

    #[test]
    fn test_cover_cache_drops_stale_sizes() {
        let mut cache = CoverCache::default();
        assert!(!cache.begin_render("u"));
        cache.resize((40, 20));
        assert!(cache.begin_render("u"));
        assert!(!cache.begin_render("u"));

        cache.resize((60, 30));
        assert!(!cache.complete("u", (40, 20), CoverArt::Missing));
        assert!(cache.is_empty());

        // The resize cleared the pending render as well.
        assert!(cache.begin_render("u"));
        assert!(cache.complete("u", (60, 30), CoverArt::Missing));
        assert_eq!(cache.len(), 1);
        assert!(!cache.begin_render("u"));
    }
}
