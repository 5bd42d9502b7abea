//! App: terminal setup and the event loop.
//!
//! Architecture:
//! - `Session` owns all browsing state and never performs I/O.
//! - A `tokio::mpsc` channel carries `AppMessage`s in from the key reader and
//!   from background tasks.
//! - Every key and completion yields `Vec<Action>`; the app keeps quit and the
//!   log level for itself and hands everything else to the `TaskRunner`.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ember_proto::config::NetworkConfig;
use ember_proto::store::Store;
use ratatui::crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use tracing_subscriber::{reload, EnvFilter, Registry};

use crate::action::{Action, Completion};
use crate::player::Player;
use crate::session::Session;
use crate::tasks::TaskRunner;
use crate::ui;

/// Filter installed while verbose logging is on.
pub const VERBOSE_FILTER: &str = "debug,hyper_util=warn,reqwest=warn,hyper=warn";

const KEY_POLL: Duration = Duration::from_millis(100);
const GATE_SLEEP: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub enum AppMessage {
    Event(Event),
    Completion(Completion),
}

/// Swaps the live tracing filter between the configured one and
/// [`VERBOSE_FILTER`].
pub struct LogControl {
    handle: reload::Handle<EnvFilter, Registry>,
    base: String,
}

impl LogControl {
    pub fn new(handle: reload::Handle<EnvFilter, Registry>, base: impl Into<String>) -> Self {
        Self {
            handle,
            base: base.into(),
        }
    }

    fn set_verbose(&self, on: bool) {
        let directives = if on { VERBOSE_FILTER } else { self.base.as_str() };
        let filter = match EnvFilter::try_new(directives) {
            Ok(f) => f,
            Err(e) => {
                warn!("invalid log filter {:?}: {}", directives, e);
                return;
            }
        };
        match self.handle.reload(filter) {
            Ok(()) => info!("log filter set to {:?}", directives),
            Err(e) => warn!("log filter reload failed: {}", e),
        }
    }
}

pub struct App {
    session: Session,
    runner: TaskRunner,
    input_gate: Arc<AtomicBool>,
    log: Option<LogControl>,
    ping_interval: Duration,
    tx: mpsc::Sender<AppMessage>,
    rx: mpsc::Receiver<AppMessage>,
    should_quit: bool,
}

impl App {
    pub fn new(
        session: Session,
        store: Arc<Store>,
        player: Arc<Player>,
        network: NetworkConfig,
        log: Option<LogControl>,
    ) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::channel::<AppMessage>(1024);
        let input_gate = Arc::new(AtomicBool::new(false));
        let ping_interval = network.ping_interval();
        let runner = TaskRunner::new(store, player, network, input_gate.clone(), tx.clone())?;
        Ok(Self {
            session,
            runner,
            input_gate,
            log,
            ping_interval,
            tx,
            rx,
            should_quit: false,
        })
    }

    // ── Main run loop ─────────────────────────────────────────────────────────

    pub async fn run(mut self) -> anyhow::Result<()> {
        debug!("run(): enabling raw mode");
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        debug!("run(): terminal created, size={:?}", terminal.size());

        let result = self.event_loop(&mut terminal).await;

        // ── Teardown ──────────────────────────────────────────────────────────
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    async fn event_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    ) -> anyhow::Result<()> {
        // ── Background task: keyboard events ──────────────────────────────────
        // Paused while the player owns the terminal so mpv sees the keys.
        let event_tx = self.tx.clone();
        let gate = self.input_gate.clone();
        tokio::task::spawn_blocking(move || loop {
            if gate.load(Ordering::Acquire) {
                std::thread::sleep(GATE_SLEEP);
                continue;
            }
            match event::poll(KEY_POLL) {
                Ok(true) => match event::read() {
                    Ok(ev) => {
                        if event_tx.blocking_send(AppMessage::Event(ev)).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                Ok(false) => {
                    if event_tx.is_closed() {
                        break;
                    }
                }
                Err(_) => break,
            }
        });

        // ── Periodic timers ───────────────────────────────────────────────────
        // Spinner animation and status upkeep.
        let mut ui_tick = tokio::time::interval(Duration::from_millis(100));
        ui_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut ping_tick = tokio::time::interval(self.ping_interval);
        ping_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let size = terminal.size()?;
        let actions = self.session.on_resize(size.width, size.height);
        self.apply(actions);
        let actions = self.session.start();
        self.apply(actions);

        // ── Main loop ─────────────────────────────────────────────────────────
        let mut needs_redraw = true;
        loop {
            if needs_redraw {
                terminal.draw(|f| ui::draw(f, &self.session))?;
            }
            needs_redraw = false;

            if self.should_quit {
                break;
            }

            tokio::select! {
                Some(msg) = self.rx.recv() => {
                    const MAX_DRAIN: usize = 256;
                    let mut redraw = self.handle_message(msg);
                    let mut drained = 0usize;
                    while drained < MAX_DRAIN {
                        let Ok(next) = self.rx.try_recv() else {
                            break;
                        };
                        drained += 1;
                        redraw |= self.handle_message(next);
                    }
                    needs_redraw = redraw;
                }

                _ = ui_tick.tick() => {
                    self.session.tick();
                    needs_redraw = true;
                }

                _ = ping_tick.tick() => {
                    let actions = self.session.ping_due();
                    self.apply(actions);
                }
            }
        }

        Ok(())
    }

    // ── Message handler ───────────────────────────────────────────────────────

    /// Returns `true` when the message changed something on screen.
    fn handle_message(&mut self, msg: AppMessage) -> bool {
        let actions = match msg {
            AppMessage::Event(Event::Key(key)) => {
                if key.kind == KeyEventKind::Release {
                    return false;
                }
                self.session.handle_key(key)
            }
            AppMessage::Event(Event::Resize(w, h)) => self.session.on_resize(w, h),
            AppMessage::Event(_) => return false,
            AppMessage::Completion(completion) => self.session.on_completion(completion),
        };
        self.apply(actions);
        true
    }

    fn apply(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Quit => {
                    info!("quit requested");
                    self.should_quit = true;
                }
                Action::SetVerboseLogging(on) => match &self.log {
                    Some(log) => log.set_verbose(on),
                    None => debug!("no log control installed"),
                },
                other => self.runner.dispatch(other),
            }
        }
    }
}
