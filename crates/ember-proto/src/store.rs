//! Durable state: server profiles plus per-prefix detail and playback data.
//!
//! Layout under the data directory:
//!
//! ```text
//!   servers.json            { servers: [...], active_server: N }
//!   data_<prefix>.json      { media_details: {id: ..}, playback: {id: ..} }
//! ```
//!
//! Only the partition of the active profile's prefix is held in memory.  It is
//! swapped whenever the active prefix changes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::model::{MediaDetail, PlaybackRecord, ServerBook, ServerProfile};

#[derive(Debug, Default, Serialize, Deserialize)]
struct PrefixData {
    #[serde(default)]
    media_details: HashMap<String, MediaDetail>,
    #[serde(default)]
    playback: HashMap<String, PlaybackRecord>,
}

#[derive(Debug)]
struct Inner {
    book: ServerBook,
    prefix: Option<String>,
    data: PrefixData,
}

pub struct Store {
    root: PathBuf,
    inner: RwLock<Inner>,
    /// Held from snapshot to rename so the last save always carries every
    /// earlier change.
    writes: Mutex<()>,
}

impl Store {
    /// Loads `servers.json` and the active prefix's partition.  Missing or
    /// unreadable files start empty.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let book: ServerBook = load_json(&root.join("servers.json")).unwrap_or_default();
        let prefix = book.active_prefix().map(str::to_string);
        let data = prefix
            .as_deref()
            .and_then(|p| load_json(&data_path(&root, p)))
            .unwrap_or_default();
        Self {
            root,
            inner: RwLock::new(Inner { book, prefix, data }),
            writes: Mutex::new(()),
        }
    }

    pub async fn server_book(&self) -> ServerBook {
        self.inner.read().await.book.clone()
    }

    /// Replaces the whole profile list (add/edit/delete all land here).
    pub async fn replace_servers(&self, book: ServerBook) -> anyhow::Result<()> {
        {
            let mut inner = self.inner.write().await;
            inner.book = book;
            self.select_partition(&mut inner);
        }
        self.save_servers().await
    }

    /// Marks `idx` active and switches the data partition if its prefix differs.
    pub async fn activate(&self, idx: usize) -> anyhow::Result<ServerProfile> {
        let profile = {
            let mut inner = self.inner.write().await;
            let profile = inner
                .book
                .get(idx)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no server at index {}", idx))?;
            inner.book.active = idx;
            self.select_partition(&mut inner);
            profile
        };
        self.save_servers().await?;
        Ok(profile)
    }

    pub async fn save_server_token(
        &self,
        idx: usize,
        user_id: &str,
        token: &str,
    ) -> anyhow::Result<()> {
        self.inner
            .write()
            .await
            .book
            .share_token(idx, user_id, token);
        self.save_servers().await
    }

    pub async fn media_detail(&self, item_id: &str) -> Option<MediaDetail> {
        self.inner.read().await.data.media_details.get(item_id).cloned()
    }

    pub async fn set_media_detail(&self, detail: MediaDetail) -> anyhow::Result<()> {
        self.inner
            .write()
            .await
            .data
            .media_details
            .insert(detail.item_id.clone(), detail);
        self.save_data().await
    }

    pub async fn playback(&self, item_id: &str) -> Option<PlaybackRecord> {
        self.inner.read().await.data.playback.get(item_id).cloned()
    }

    pub async fn set_playback(
        &self,
        item_id: &str,
        position_secs: u64,
        duration_secs: u64,
    ) -> anyhow::Result<()> {
        self.inner.write().await.data.playback.insert(
            item_id.to_string(),
            PlaybackRecord {
                position_secs,
                duration_secs,
                updated_at: Utc::now(),
            },
        );
        self.save_data().await
    }

    fn select_partition(&self, inner: &mut Inner) {
        let next = inner.book.active_prefix().map(str::to_string);
        if next == inner.prefix {
            return;
        }
        debug!("store: switching data partition {:?} -> {:?}", inner.prefix, next);
        inner.data = next
            .as_deref()
            .and_then(|p| load_json(&data_path(&self.root, p)))
            .unwrap_or_default();
        inner.prefix = next;
    }

    async fn save_servers(&self) -> anyhow::Result<()> {
        let _writing = self.writes.lock().await;
        let json = {
            let inner = self.inner.read().await;
            serde_json::to_string_pretty(&inner.book)?
        };
        write_file(&self.root.join("servers.json"), json).await
    }

    async fn save_data(&self) -> anyhow::Result<()> {
        let _writing = self.writes.lock().await;
        let (path, json) = {
            let inner = self.inner.read().await;
            let Some(prefix) = inner.prefix.as_deref() else {
                // No active server: nothing to partition by, keep in memory only.
                return Ok(());
            };
            (
                data_path(&self.root, prefix),
                serde_json::to_string_pretty(&inner.data)?,
            )
        };
        write_file(&path, json).await
    }
}

fn data_path(root: &Path, prefix: &str) -> PathBuf {
    let safe: String = prefix
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    root.join(format!("data_{}.json", safe))
}

fn load_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Option<T> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("store: ignoring unreadable {}: {}", path.display(), e);
            None
        }
    }
}

async fn write_file(path: &Path, json: String) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    // Readers see the old file or the new one, never a partial write.
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
