//! Task runner: every `Action` that needs I/O becomes one spawned task, and
//! every task sends exactly one `Completion` back to the event loop.
//!
//! Tasks never touch session state.  Shared handles are the store, the
//! current catalog client (swapped on connect), the player and the input gate
//! that pauses the key reader while mpv owns the terminal.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use ember_proto::client::{self, CatalogClient, ClientError, Credentials};
use ember_proto::config::NetworkConfig;
use ember_proto::model::{
    secs_to_ticks, ticks_to_secs, ItemPage, MediaDetail, MediaItem, MediaSource, ServerBook,
};
use ember_proto::store::Store;
use rand::Rng;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info, warn};

use crate::action::{Action, Completion, ListRequest, PlaybackReport};
use crate::app::AppMessage;
use crate::cover::{self, CoverArt};
use crate::player::{PlayOutcome, PlayRequest, Player};
use crate::probe::{self, Latency};

/// How often a running player's position is reported to the server.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(30);

type SharedClient = Arc<RwLock<Option<CatalogClient>>>;

#[derive(Clone)]
pub struct TaskRunner {
    store: Arc<Store>,
    http: reqwest::Client,
    image_http: reqwest::Client,
    client: SharedClient,
    player: Arc<Player>,
    network: NetworkConfig,
    input_gate: Arc<AtomicBool>,
    tx: mpsc::Sender<AppMessage>,
}

impl TaskRunner {
    pub fn new(
        store: Arc<Store>,
        player: Arc<Player>,
        network: NetworkConfig,
        input_gate: Arc<AtomicBool>,
        tx: mpsc::Sender<AppMessage>,
    ) -> anyhow::Result<Self> {
        let http = client::build_http(network.timeout()).context("building HTTP client")?;
        let image_http =
            client::build_http(network.image_timeout()).context("building image HTTP client")?;
        Ok(Self {
            store,
            http,
            image_http,
            client: Arc::new(RwLock::new(None)),
            player,
            network,
            input_gate,
            tx,
        })
    }

    /// Starts the task for `action`.  App-level actions (quit, log level) are
    /// handled by the event loop and ignored here.
    pub fn dispatch(&self, action: Action) {
        match action {
            Action::Connect {
                servers,
                same_prefix,
            } => {
                let index = servers.active;
                let (store, http, clients) =
                    (self.store.clone(), self.http.clone(), self.client.clone());
                self.spawn(async move {
                    let result = connect(&store, http, &clients, servers)
                        .await
                        .map_err(|e| format!("{:#}", e));
                    Completion::Connected {
                        index,
                        same_prefix,
                        result,
                    }
                });
            }
            Action::ProbeGroup { prefix, servers } => {
                let http = self.http.clone();
                self.spawn(async move {
                    let latencies = probe::probe_group(&servers, &prefix, |url| {
                        let http = http.clone();
                        async move { Ok(client::ping(&http, &url).await?) }
                    })
                    .await;
                    Completion::ProbeFinished(latencies)
                });
            }
            Action::PingActive => {
                let clients = self.client.clone();
                self.spawn(async move {
                    let latency = match current_client(&clients).await {
                        Ok(c) => Latency::from_result(client::ping(c.http(), c.base_url()).await),
                        Err(_) => Latency::Unreachable,
                    };
                    Completion::Pinged(latency)
                });
            }
            Action::SaveServers(book) => {
                let store = self.store.clone();
                self.spawn(async move {
                    let result = store
                        .replace_servers(book)
                        .await
                        .map_err(|e| format!("{:#}", e));
                    Completion::ServersSaved(result)
                });
            }
            Action::FetchList {
                seq,
                section,
                request,
            } => {
                let (clients, network) = (self.client.clone(), self.network.clone());
                self.spawn(async move {
                    let result = async {
                        let c = current_client(&clients).await?;
                        fetch_list(&c, &request, &network).await
                    }
                    .await
                    .map_err(|e| format!("{:#}", e));
                    Completion::ListLoaded {
                        seq,
                        section,
                        request,
                        result,
                    }
                });
            }
            Action::FetchDetail { item_id } => {
                let (store, clients) = (self.store.clone(), self.client.clone());
                self.spawn(async move {
                    let result = load_detail(&store, &clients, &item_id)
                        .await
                        .map_err(|e| format!("{:#}", e));
                    Completion::DetailLoaded { item_id, result }
                });
            }
            Action::RenderCover { url, size } => {
                let http = self.image_http.clone();
                self.spawn(async move {
                    let art = match render_cover(&http, &url, size).await {
                        Ok(text) => CoverArt::Rendered(text),
                        Err(e) => {
                            debug!("cover {} unavailable: {:#}", url, e);
                            CoverArt::Missing
                        }
                    };
                    Completion::CoverRendered { url, size, art }
                });
            }
            Action::SetFavorite { item_id, favorite } => {
                let clients = self.client.clone();
                self.spawn(async move {
                    let result = async {
                        let c = current_client(&clients).await?;
                        c.set_favorite(&item_id, favorite).await?;
                        anyhow::Ok(favorite)
                    }
                    .await
                    .map_err(|e| format!("{:#}", e));
                    Completion::FavoriteSet { item_id, result }
                });
            }
            Action::Play { item } => {
                let ctx = self.playback_context();
                self.spawn(async move {
                    let result = match current_client(&ctx.clients).await {
                        Ok(c) => ctx.play_item(&c, item).await,
                        Err(e) => Err(format!("Cannot play: {}", e)),
                    };
                    Completion::PlaybackFinished { result }
                });
            }
            Action::PlayContinuous { episode } => {
                let ctx = self.playback_context();
                self.spawn(async move {
                    let result = match current_client(&ctx.clients).await {
                        Ok(c) => ctx.play_season(&c, episode).await,
                        Err(e) => Err(format!("Cannot play continuously: {}", e)),
                    };
                    Completion::PlaybackFinished { result }
                });
            }
            Action::SetVerboseLogging(_) | Action::Quit => {
                debug!("runner: {:?} is handled by the event loop", action);
            }
        }
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let completion = task.await;
            if tx.send(AppMessage::Completion(completion)).await.is_err() {
                debug!("runner: event loop closed, completion dropped");
            }
        });
    }

    fn playback_context(&self) -> PlaybackContext {
        PlaybackContext {
            store: self.store.clone(),
            clients: self.client.clone(),
            player: self.player.clone(),
            input_gate: self.input_gate.clone(),
        }
    }
}

async fn current_client(clients: &SharedClient) -> Result<CatalogClient, ClientError> {
    clients
        .read()
        .await
        .clone()
        .ok_or(ClientError::NotAuthenticated)
}

// ── Catalog tasks ─────────────────────────────────────────────────────────────

async fn connect(
    store: &Store,
    http: reqwest::Client,
    clients: &SharedClient,
    servers: ServerBook,
) -> anyhow::Result<Credentials> {
    let index = servers.active;
    store.replace_servers(servers).await?;
    let profile = store.activate(index).await?;
    info!("connecting to {} at {}", profile.display_name(), profile.url);

    let mut catalog = CatalogClient::new(http, &profile);
    let credentials = catalog.connect().await?;
    if let Err(e) = store
        .save_server_token(index, &credentials.user_id, &credentials.token)
        .await
    {
        warn!("could not persist login for {}: {:#}", profile.display_name(), e);
    }
    *clients.write().await = Some(catalog);
    Ok(credentials)
}

async fn fetch_list(
    c: &CatalogClient,
    request: &ListRequest,
    network: &NetworkConfig,
) -> anyhow::Result<ItemPage> {
    let page = match request {
        ListRequest::Resume => c.resume(network.page_size).await?,
        ListRequest::Favorites => c.favorites(network.page_size).await?,
        ListRequest::Libraries => c.libraries().await?,
        ListRequest::Search { term } => c.search(term, network.search_limit).await?,
        ListRequest::Children { parent_id, page } => {
            c.children(parent_id, page * network.page_size, network.page_size)
                .await?
        }
        ListRequest::Seasons { series_id } => c.seasons(series_id).await?,
        ListRequest::Episodes {
            series_id,
            season_id,
        } => c.episodes(series_id, season_id).await?,
        ListRequest::SeasonOf {
            item_id,
            series_id,
            season_id,
        } => {
            let (series_id, season_id) = match (series_id, season_id) {
                (Some(series), Some(season)) => (series.clone(), season.clone()),
                _ => {
                    let item = c.item(item_id).await?;
                    let series = series_id
                        .clone()
                        .or(item.series_id.clone())
                        .or_else(|| item.owning_series_id().map(str::to_string))
                        .ok_or_else(|| anyhow!("no series info"))?;
                    let season = season_id
                        .clone()
                        .or(item.season_id.clone())
                        .or(item.parent_id.clone())
                        .ok_or_else(|| anyhow!("no season info"))?;
                    (series, season)
                }
            };
            c.episodes(&series_id, &season_id).await?
        }
        ListRequest::SeriesOf { item_id, series_id } => {
            let series_id = match series_id {
                Some(id) => id.clone(),
                None => {
                    let item = c.item(item_id).await?;
                    item.owning_series_id()
                        .map(str::to_string)
                        .ok_or_else(|| anyhow!("no series info"))?
                }
            };
            c.seasons(&series_id).await?
        }
    };
    Ok(page)
}

/// Store first, network second; a fetched detail is persisted.
async fn load_detail(
    store: &Store,
    clients: &SharedClient,
    item_id: &str,
) -> anyhow::Result<Option<MediaDetail>> {
    if let Some(detail) = store.media_detail(item_id).await {
        return Ok(Some(detail));
    }
    let c = current_client(clients).await?;
    let item = c.item(item_id).await?;
    let detail = MediaDetail::from_item(&item);
    if let Some(d) = &detail {
        if let Err(e) = store.set_media_detail(d.clone()).await {
            warn!("could not persist detail for {}: {:#}", item_id, e);
        }
    }
    Ok(detail)
}

async fn render_cover(
    http: &reqwest::Client,
    url: &str,
    size: (u16, u16),
) -> anyhow::Result<ratatui::text::Text<'static>> {
    let bytes = http.get(url).send().await?.error_for_status()?.bytes().await?;
    let text = tokio::task::spawn_blocking(move || {
        cover::decode_and_render(&bytes, size.0, size.1)
    })
    .await??;
    Ok(text)
}

// ── Playback ──────────────────────────────────────────────────────────────────

/// Pauses the terminal key reader for as long as it lives.
struct InputPause(Arc<AtomicBool>);

impl InputPause {
    fn engage(gate: Arc<AtomicBool>) -> Self {
        gate.store(true, Ordering::SeqCst);
        Self(gate)
    }
}

impl Drop for InputPause {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// One playable queue entry.
#[derive(Debug, Clone)]
struct Entry {
    item_id: String,
    source_id: String,
    duration_secs: u64,
}

struct PlaybackContext {
    store: Arc<Store>,
    clients: SharedClient,
    player: Arc<Player>,
    input_gate: Arc<AtomicBool>,
}

impl PlaybackContext {
    async fn play_item(&self, c: &CatalogClient, item: MediaItem) -> Result<PlaybackReport, String> {
        let full = c
            .item(&item.id)
            .await
            .map_err(|e| format!("Cannot play: {}", e))?;
        let source = full
            .media_sources
            .first()
            .cloned()
            .ok_or_else(|| format!("Cannot play: {}", ClientError::NoMediaSource))?;
        let entry = Entry {
            item_id: full.id.clone(),
            source_id: source.id.clone(),
            duration_secs: full.duration_secs(),
        };
        let start_secs = self.resume_position(&full).await;
        let request = PlayRequest {
            queue: vec![c.stream_url(&full.id, &source)],
            title: full.name.clone(),
            subtitles: external_subtitles(c, &full.id, &source),
            start_secs,
            start_index: 0,
        };

        let session_id = play_session_id();
        if let Err(e) = c
            .report_start(&entry.item_id, &entry.source_id, &session_id, secs_to_ticks(start_secs))
            .await
        {
            debug!("report start failed: {}", e);
        }

        let outcome = self
            .run(c, request, vec![entry.clone()], &session_id)
            .await
            .map_err(|e| format!("Playback error: {}", e))?;

        self.save_position(&entry, outcome.position_secs).await;
        let report_ok = self
            .report_stop(c, &entry, outcome.position_secs, &session_id)
            .await;
        Ok(PlaybackReport {
            item_id: Some(entry.item_id),
            position_secs: outcome.position_secs,
            report_ok,
        })
    }

    /// Queues the whole season, starting at `episode`.
    async fn play_season(
        &self,
        c: &CatalogClient,
        episode: MediaItem,
    ) -> Result<PlaybackReport, String> {
        let fail = |e: String| format!("Cannot play continuously: {}", e);
        let series_id = episode.series_id.clone().ok_or_else(|| fail("missing season info".into()))?;
        let season_id = episode
            .season_id
            .clone()
            .or(episode.parent_id.clone())
            .ok_or_else(|| fail("missing season info".into()))?;
        let episodes = c
            .episodes(&series_id, &season_id)
            .await
            .map_err(|e| fail(e.to_string()))?
            .items;

        let mut entries = Vec::new();
        let mut queue = Vec::new();
        let mut start = None;
        for ep in &episodes {
            let Some(source) = ep.media_sources.first() else {
                debug!("skipping {} without media source", ep.id);
                continue;
            };
            if ep.id == episode.id {
                start = Some((entries.len(), ep.clone(), source.clone()));
            }
            queue.push(c.stream_url(&ep.id, source));
            entries.push(Entry {
                item_id: ep.id.clone(),
                source_id: source.id.clone(),
                duration_secs: ep.duration_secs(),
            });
        }
        if entries.is_empty() {
            return Err(fail("no playable episodes".into()));
        }

        let (start_index, subtitles, start_secs) = match &start {
            Some((idx, ep, source)) => (
                *idx,
                external_subtitles(c, &ep.id, source),
                self.resume_position(ep).await,
            ),
            None => (0, Vec::new(), 0),
        };
        let title = episode
            .series_name
            .clone()
            .unwrap_or_else(|| episode.name.clone());
        let request = PlayRequest {
            queue,
            title,
            subtitles,
            start_secs,
            start_index,
        };

        let session_id = play_session_id();
        let first = &entries[start_index];
        if let Err(e) = c
            .report_start(&first.item_id, &first.source_id, &session_id, secs_to_ticks(start_secs))
            .await
        {
            debug!("report start failed: {}", e);
        }

        let outcome = self
            .run(c, request, entries.clone(), &session_id)
            .await
            .map_err(|e| format!("Playback error: {}", e))?;

        let (index, keep) = settle(entries.len(), start_index, &outcome);
        let entry = &entries[index];
        if keep {
            self.save_position(entry, outcome.position_secs).await;
        }
        let report_ok = self
            .report_stop(c, entry, outcome.position_secs, &session_id)
            .await;
        Ok(PlaybackReport {
            item_id: keep.then(|| entry.item_id.clone()),
            position_secs: outcome.position_secs,
            report_ok,
        })
    }

    /// Server position first, then the local record.
    async fn resume_position(&self, item: &MediaItem) -> u64 {
        let server = ticks_to_secs(item.position_ticks());
        if server > 0 {
            return server;
        }
        self.store
            .playback(&item.id)
            .await
            .map(|r| r.position_secs)
            .unwrap_or(0)
    }

    /// Runs mpv with the key reader paused, reporting progress while it plays.
    async fn run(
        &self,
        c: &CatalogClient,
        request: PlayRequest,
        entries: Vec<Entry>,
        session_id: &str,
    ) -> Result<PlayOutcome, crate::player::PlayerError> {
        let (tx, rx) = watch::channel(None);
        let reporter = tokio::spawn(report_progress(
            c.clone(),
            rx,
            entries,
            session_id.to_string(),
        ));
        let outcome = {
            let _pause = InputPause::engage(self.input_gate.clone());
            self.player.play_watched(request, tx).await
        };
        reporter.abort();
        outcome
    }

    async fn save_position(&self, entry: &Entry, position_secs: u64) {
        if let Err(e) = self
            .store
            .set_playback(&entry.item_id, position_secs, entry.duration_secs)
            .await
        {
            warn!("could not save position for {}: {:#}", entry.item_id, e);
        }
    }

    /// Closes the server-side play session.  Returns whether the report
    /// succeeded.
    async fn report_stop(
        &self,
        c: &CatalogClient,
        entry: &Entry,
        position_secs: u64,
        session_id: &str,
    ) -> bool {
        match c
            .report_stop(&entry.item_id, &entry.source_id, session_id, secs_to_ticks(position_secs))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!("report stop failed: {}", e);
                false
            }
        }
    }
}

async fn report_progress(
    c: CatalogClient,
    mut rx: watch::Receiver<Option<PlayOutcome>>,
    entries: Vec<Entry>,
    session_id: String,
) {
    let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;
    let mut last_sent: Option<PlayOutcome> = None;
    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let current = *rx.borrow();
                if let Some(outcome) = current.filter(|o| last_sent != Some(*o)) {
                    if let Some(entry) = entries.get(outcome.queue_index) {
                        let ticks = secs_to_ticks(outcome.position_secs);
                        if let Err(e) = c
                            .report_progress(&entry.item_id, &entry.source_id, &session_id, ticks, false)
                            .await
                        {
                            debug!("report progress failed: {}", e);
                        }
                    }
                    last_sent = Some(outcome);
                }
            }
        }
    }
}

/// Queue entry a finished season run is attributed to, and whether its
/// position is kept.  The stop report always goes to the returned entry.
fn settle(queue_len: usize, start_index: usize, outcome: &PlayOutcome) -> (usize, bool) {
    if outcome.queue_index < queue_len {
        return (outcome.queue_index, outcome.position_secs > 0);
    }
    warn!("player reported entry {} outside the queue", outcome.queue_index);
    (start_index.min(queue_len.saturating_sub(1)), false)
}

fn external_subtitles(c: &CatalogClient, item_id: &str, source: &MediaSource) -> Vec<String> {
    source
        .media_streams
        .iter()
        .filter(|s| s.kind == "Subtitle" && s.is_external)
        .map(|s| c.subtitle_url(item_id, &source.id, s.index))
        .collect()
}

/// 32 lowercase hex characters.
fn play_session_id() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
