//! mpv playback controller.
//!
//! ```text
//!   Player::play_multiple(request)
//!         │
//!         ├── spawn mpv  (stdin inherited, stdout piped)
//!         ├── read stdout chunks → StatusScanner  (last POS wins)
//!         └── wait for exit → PlayOutcome
//! ```
//!
//! mpv is told to print only its status line, formatted as
//! `POS:HH:MM:SS IDX:n`.  Whatever the process does on exit, the outcome is the
//! last position it reported, or the requested start when it never reported
//! one.

use std::path::PathBuf;
use std::process::Stdio;

use ember_proto::config::PlayerConfig;
use ember_proto::platform;
use regex::Regex;
use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const STATUS_MSG: &str = "POS:${time-pos} IDX:${playlist-pos}";
const STATUS_PATTERN: &str = r"POS:(\d+):(\d{2}):(\d{2})(?:\S*\s+IDX:(\d+))?";
/// Bytes kept when a status stream never emits a line break.
const MAX_PENDING: usize = 8 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("mpv not found")]
    NotFound,
    #[error("nothing to play")]
    EmptyQueue,
    #[error("failed to start mpv: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("bad status pattern: {0}")]
    Pattern(#[from] regex::Error),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayRequest {
    pub queue: Vec<String>,
    pub title: String,
    pub subtitles: Vec<String>,
    pub start_secs: u64,
    pub start_index: usize,
}

/// Where playback stopped.  `queue_index` is the playlist entry the position
/// belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayOutcome {
    pub position_secs: u64,
    pub queue_index: usize,
    pub observed: bool,
}

#[derive(Debug, Clone)]
pub struct Player {
    binary: Option<PathBuf>,
    config: PlayerConfig,
}

impl Player {
    pub fn new(binary: Option<PathBuf>, config: PlayerConfig) -> Self {
        Self { binary, config }
    }

    /// Resolves the binary once; later calls never search again.
    pub fn discover(config: &PlayerConfig) -> Self {
        let binary = platform::find_mpv_binary(config.binary.as_deref());
        match &binary {
            Some(p) => info!("player: using {}", p.display()),
            None => warn!("player: mpv not found, playback disabled"),
        }
        Self::new(binary, config.clone())
    }

    pub fn is_available(&self) -> bool {
        self.binary.is_some()
    }

    pub fn args(&self, req: &PlayRequest) -> Vec<String> {
        let mut args = vec!["--hwdec=auto".to_string(), "--vo=gpu".to_string()];
        if self.config.fullscreen {
            args.push("--fullscreen".to_string());
        }
        args.push(format!("--title={}", req.title));
        if !self.config.slang.is_empty() {
            args.push(format!("--slang={}", self.config.slang));
        }
        args.push("--term-playing-msg=".to_string());
        args.push(format!("--term-status-msg={}", STATUS_MSG));
        args.push("--msg-level=all=no,statusline=status".to_string());
        if req.start_secs > 0 {
            args.push(format!("--start={}", req.start_secs));
        }
        if req.start_index > 0 {
            args.push(format!("--playlist-start={}", req.start_index));
        }
        args.extend(req.subtitles.iter().map(|s| format!("--sub-file={}", s)));
        args.extend(self.config.extra_args.iter().cloned());
        args.extend(req.queue.iter().cloned());
        args
    }

    pub async fn play(
        &self,
        url: String,
        title: String,
        subtitles: Vec<String>,
        start_secs: u64,
    ) -> Result<PlayOutcome, PlayerError> {
        self.play_multiple(PlayRequest {
            queue: vec![url],
            title,
            subtitles,
            start_secs,
            start_index: 0,
        })
        .await
    }

    /// Runs mpv over `req.queue` until it exits.
    pub async fn play_multiple(&self, req: PlayRequest) -> Result<PlayOutcome, PlayerError> {
        self.run(req, None).await
    }

    /// Like `play_multiple`, publishing every newly observed position on
    /// `progress` while mpv runs.
    pub async fn play_watched(
        &self,
        req: PlayRequest,
        progress: watch::Sender<Option<PlayOutcome>>,
    ) -> Result<PlayOutcome, PlayerError> {
        self.run(req, Some(&progress)).await
    }

    async fn run(
        &self,
        req: PlayRequest,
        progress: Option<&watch::Sender<Option<PlayOutcome>>>,
    ) -> Result<PlayOutcome, PlayerError> {
        let binary = self.binary.as_ref().ok_or(PlayerError::NotFound)?;
        if req.queue.is_empty() {
            return Err(PlayerError::EmptyQueue);
        }
        let mut scanner = StatusScanner::new()?;

        let args = self.args(&req);
        debug!("player: {} {:?}", binary.display(), args);
        let mut child = tokio::process::Command::new(binary)
            .args(&args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdout) = child.stdout.take() {
            let mut buf = [0u8; 4096];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let before = scanner.last_position();
                        scanner.feed(&buf[..n]);
                        if let Some(tx) = progress {
                            if scanner.last_position() != before {
                                tx.send_replace(Some(scanner.outcome(req.start_secs, req.start_index)));
                            }
                        }
                    }
                    Err(e) => {
                        warn!("player: stdout read failed: {}", e);
                        break;
                    }
                }
            }
        }

        match child.wait().await {
            Ok(status) => debug!("player: exited with {}", status),
            Err(e) => warn!("player: wait failed: {}", e),
        }
        scanner.finish();

        let outcome = scanner.outcome(req.start_secs, req.start_index);
        info!(
            "player: stopped at {}s (entry {}, observed={})",
            outcome.position_secs, outcome.queue_index, outcome.observed
        );
        Ok(outcome)
    }
}

// ── Status line scanning ──────────────────────────────────────────────────────

/// Incremental scanner over mpv's stdout.  mpv redraws its status line with
/// `\r`, so both `\r` and `\n` terminate a record.  A record split across
/// reads is held back until its terminator arrives.
pub struct StatusScanner {
    pattern: Regex,
    pending: Vec<u8>,
    last: Option<(u64, Option<usize>)>,
}

impl StatusScanner {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(STATUS_PATTERN)?,
            pending: Vec::new(),
            last: None,
        })
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        while let Some(end) = self.pending.iter().position(|b| *b == b'\r' || *b == b'\n') {
            let record: Vec<u8> = self.pending.drain(..=end).collect();
            self.scan(&record[..end]);
        }
        if self.pending.len() > MAX_PENDING {
            let record = std::mem::take(&mut self.pending);
            self.scan(&record);
        }
    }

    /// Flushes a trailing record that had no terminator.
    pub fn finish(&mut self) {
        if !self.pending.is_empty() {
            let record = std::mem::take(&mut self.pending);
            self.scan(&record);
        }
    }

    pub fn last_position(&self) -> Option<u64> {
        self.last.map(|(secs, _)| secs)
    }

    pub fn outcome(&self, start_secs: u64, start_index: usize) -> PlayOutcome {
        match self.last {
            Some((secs, idx)) => PlayOutcome {
                position_secs: secs,
                queue_index: idx.unwrap_or(start_index),
                observed: true,
            },
            None => PlayOutcome {
                position_secs: start_secs,
                queue_index: start_index,
                observed: false,
            },
        }
    }

    fn scan(&mut self, record: &[u8]) {
        let text = String::from_utf8_lossy(record);
        for caps in self.pattern.captures_iter(&text) {
            let field = |i: usize| {
                caps.get(i)
                    .and_then(|m| m.as_str().parse::<u64>().ok())
                    .unwrap_or(0)
            };
            let secs = field(1) * 3600 + field(2) * 60 + field(3);
            // mpv prints 00:00:00 before the first frame; not a real position.
            if secs == 0 {
                continue;
            }
            let idx = caps.get(4).and_then(|m| m.as_str().parse::<usize>().ok());
            self.last = Some((secs, idx));
        }
    }
}
