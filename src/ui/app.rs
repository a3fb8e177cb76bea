//! §4.6 UI event loop: owns the authoritative instance list in memory,
//! drives the reconciliation ticks, and renders the current mode. Grounded
//! on the pack dashboard's `run()` (terminal setup/teardown, tick-rate +
//! preview-refresh timer split, event::poll timeout calculation) and
//! `ui::dashboard::render_dashboard` (table/preview/footer layout), adapted
//! from a single agent-pane table to the category-grouped instance list.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ansi_to_tui::IntoText;
use anyhow::Result;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
};
use tracing::warn;

use crate::config::Config;
use crate::lifecycle::LifecycleEngine;
use crate::multiplexer::MultiplexerController;
use crate::reconcile::{self, WorkerMessage};
use crate::state::{Instance, OutputSnapshot, StateStore, Status};

use super::list::{ListView, group_by_category};
use super::nav::Debouncer;
use super::overlays::{PendingConfirmation, SessionSetupWizard, TextInput, TextOverlay};
use super::{Action, Mode, action_for_key, search_key};

const TICK_RATE: Duration = Duration::from_millis(250);
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// §5 concurrency model: requests the background worker thread can run.
/// Each carries whatever snapshot of state it needs so the worker never
/// touches `App`'s own fields directly.
enum WorkerCommand {
    Start { instance: Box<Instance> },
    MetadataTick { instances: Vec<Instance>, outputs: HashMap<String, OutputSnapshot> },
    PeerDetectionTick { instances: Vec<Instance> },
    HealthCheck { instances: Vec<Instance> },
}

/// Results posted back from the worker thread to the UI loop.
enum WorkerResult {
    Started { instance: Box<Instance> },
    StartFailed { title: String, error: String },
    MetadataDone {
        instances: Vec<Instance>,
        outputs: HashMap<String, OutputSnapshot>,
        messages: Vec<WorkerMessage>,
    },
    PeerDetectionDone { instances: Vec<Instance>, messages: Vec<WorkerMessage> },
    HealthDone { instances: Vec<Instance>, reports: Vec<reconcile::HealthReport> },
}

/// §5 "long external calls (git, tmux) are dispatched off the UI thread":
/// a single worker thread drains `cmd_rx` and posts each result back on
/// `result_tx`, so `git`/`tmux` subprocess latency never blocks rendering
/// or input handling.
fn run_worker(
    engine: LifecycleEngine,
    store: StateStore,
    mux: Arc<dyn MultiplexerController>,
    cmd_rx: mpsc::Receiver<WorkerCommand>,
    result_tx: mpsc::Sender<WorkerResult>,
) {
    for command in cmd_rx {
        let result = match command {
            WorkerCommand::Start { instance } => {
                let mut instance = *instance;
                match engine.start(&mut instance) {
                    Ok(()) => WorkerResult::Started { instance: Box::new(instance) },
                    Err(e) => WorkerResult::StartFailed { title: instance.title, error: e.to_string() },
                }
            }
            WorkerCommand::MetadataTick { mut instances, mut outputs } => {
                let messages = reconcile::metadata_tick(&engine, &mut instances, &mut outputs);
                WorkerResult::MetadataDone { instances, outputs, messages }
            }
            WorkerCommand::PeerDetectionTick { mut instances } => {
                let messages = reconcile::peer_detection_tick(&store, &mut instances);
                WorkerResult::PeerDetectionDone { instances, messages }
            }
            WorkerCommand::HealthCheck { mut instances } => {
                let reports = reconcile::health_check(&engine, mux.as_ref(), &mut instances);
                WorkerResult::HealthDone { instances, reports }
            }
        };
        if result_tx.send(result).is_err() {
            return;
        }
    }
}

pub struct App {
    pub instances: Vec<Instance>,
    pub outputs: HashMap<String, OutputSnapshot>,
    pub list: ListView,
    pub mode: Mode,
    pub status_line: Option<String>,
    pub should_quit: bool,

    pub title_input: TextInput,
    pub prompt_input: TextInput,
    pub wizard: SessionSetupWizard,
    pub pending_confirmation: Option<PendingConfirmation>,
    pub preview: TextOverlay,
    pub help_seen_this_run: bool,
    /// Set when the user requests Attach; the event loop suspends the
    /// alternate screen and raw mode before handing the terminal to the
    /// multiplexer, since attach (§5) blocks the whole UI until detach.
    pub pending_attach: bool,
    /// Seeded from `--auto-yes` (§0.4); every instance created this run
    /// starts with its auto-confirm flag set to this value.
    default_auto_yes: bool,

    store: StateStore,
    engine: LifecycleEngine,
    mux: Arc<dyn MultiplexerController>,
    config: Config,
    nav: Debouncer,

    last_metadata_tick: Instant,
    last_health_check: Instant,
    last_peer_detection: Instant,

    /// §5: Start and every reconciliation tick run on this worker thread;
    /// `*_in_flight` gates re-dispatch until the prior request of that kind
    /// has posted its result back.
    worker_tx: mpsc::Sender<WorkerCommand>,
    worker_rx: mpsc::Receiver<WorkerResult>,
    start_in_flight: bool,
    metadata_in_flight: bool,
    peer_detection_in_flight: bool,
    health_check_in_flight: bool,
}

impl App {
    pub fn new(
        config: Config,
        store: StateStore,
        engine: LifecycleEngine,
        mux: Arc<dyn MultiplexerController>,
        default_auto_yes: bool,
    ) -> Result<Self> {
        let instances = store.get_instances()?;
        let ui_state = store.get_ui_state()?;
        let help_screens_seen = store.get_help_screens_seen()?;

        let (worker_tx, cmd_rx) = mpsc::channel();
        let (result_tx, worker_rx) = mpsc::channel();
        {
            let worker_engine = engine.clone();
            let worker_store = store.clone();
            let worker_mux = mux.clone();
            std::thread::spawn(move || run_worker(worker_engine, worker_store, worker_mux, cmd_rx, result_tx));
        }

        Ok(Self {
            instances,
            outputs: HashMap::new(),
            list: ListView::from_ui_state(ui_state),
            mode: Mode::Default,
            status_line: None,
            should_quit: false,
            title_input: TextInput::new(false),
            prompt_input: TextInput::new(true),
            wizard: SessionSetupWizard::new(),
            pending_confirmation: None,
            preview: TextOverlay::default(),
            help_seen_this_run: help_screens_seen != 0,
            pending_attach: false,
            default_auto_yes,
            store,
            engine,
            mux,
            config,
            nav: Debouncer::new(),
            last_metadata_tick: Instant::now(),
            last_health_check: Instant::now(),
            last_peer_detection: Instant::now(),
            worker_tx,
            worker_rx,
            start_in_flight: false,
            metadata_in_flight: false,
            peer_detection_in_flight: false,
            health_check_in_flight: false,
        })
    }

    /// Replace (or adopt, for peer-detected titles not yet known locally)
    /// each returned instance by its stable title identity (§9), so a
    /// worker result never clobbers instances it didn't itself snapshot.
    fn apply_instance_snapshot(&mut self, updated: Vec<Instance>) {
        for instance in updated {
            if let Some(slot) = self.instances.iter_mut().find(|i| i.title == instance.title) {
                *slot = instance;
            } else {
                self.instances.push(instance);
            }
        }
    }

    /// Drain every worker result posted since the last frame (§5). Called
    /// once per loop iteration so Start and the reconciliation ticks never
    /// block rendering or input handling.
    fn drain_worker_results(&mut self) {
        while let Ok(result) = self.worker_rx.try_recv() {
            match result {
                WorkerResult::Started { instance } => {
                    self.start_in_flight = false;
                    let title = instance.title.clone();
                    self.instances.push(*instance);
                    self.persist_instances();
                    self.status_line = Some(format!("{title}: started"));
                    self.mode = Mode::Default;
                }
                WorkerResult::StartFailed { title, error } => {
                    self.start_in_flight = false;
                    self.status_line = Some(format!("{title}: failed to start ({error})"));
                    self.mode = Mode::Default;
                }
                WorkerResult::MetadataDone { instances, outputs, messages } => {
                    self.metadata_in_flight = false;
                    self.apply_instance_snapshot(instances);
                    self.outputs = outputs;
                    self.handle_worker_messages(messages);
                }
                WorkerResult::PeerDetectionDone { instances, messages } => {
                    self.peer_detection_in_flight = false;
                    self.apply_instance_snapshot(instances);
                    self.handle_worker_messages(messages);
                }
                WorkerResult::HealthDone { instances, reports } => {
                    self.health_check_in_flight = false;
                    self.apply_instance_snapshot(instances);
                    for report in reports {
                        if report.recovered {
                            self.handle_worker_messages(vec![WorkerMessage::HealthRecovered { title: report.title }]);
                        }
                    }
                }
            }
        }
    }

    fn persist_ui_state(&self) {
        if let Err(e) = self.store.set_ui_state(self.list.to_ui_state()) {
            warn!(error = %e, "failed to persist ui state");
        }
    }

    fn persist_instances(&self) {
        if let Err(e) = self.store.save_instances(self.instances.clone()) {
            warn!(error = %e, "failed to persist instances");
        }
    }

    fn selected_instance_idx(&self) -> Option<usize> {
        let visible = self.list.visible_indices(&self.instances);
        visible.get(self.list.selected_idx.max(0) as usize).copied()
    }

    fn refresh_preview(&mut self) {
        let Some(idx) = self.selected_instance_idx() else {
            return;
        };
        let Some(worktree) = self.instances[idx].worktree.clone() else {
            return;
        };
        if let Some(content) = self.mux.capture_pane_content(&worktree.session_name, 500) {
            self.preview.set_content(&content);
        }
    }

    /// One pass of every background reconciliation tick this loop owns
    /// (§4.5). Health checks run on a slower cadence than the metadata tick.
    /// Each due tick is dispatched to the worker thread (§5) rather than run
    /// inline; `*_in_flight` skips a tick whose prior dispatch hasn't posted
    /// its result back yet, so a slow `git`/`tmux` call doesn't pile up
    /// duplicate work on the worker.
    fn run_ticks(&mut self) {
        if !self.metadata_in_flight && self.last_metadata_tick.elapsed() >= reconcile::METADATA_TICK {
            self.last_metadata_tick = Instant::now();
            self.metadata_in_flight = true;
            let _ = self.worker_tx.send(WorkerCommand::MetadataTick {
                instances: self.instances.clone(),
                outputs: self.outputs.clone(),
            });
        }

        if self.config.detect_new_sessions
            && !self.peer_detection_in_flight
            && self.last_peer_detection.elapsed()
                >= Duration::from_millis(self.config.session_detection_interval_ms)
        {
            self.last_peer_detection = Instant::now();
            self.peer_detection_in_flight = true;
            let _ = self.worker_tx.send(WorkerCommand::PeerDetectionTick { instances: self.instances.clone() });
        }

        if !self.health_check_in_flight && self.last_health_check.elapsed() >= HEALTH_CHECK_INTERVAL {
            self.last_health_check = Instant::now();
            self.health_check_in_flight = true;
            let _ = self.worker_tx.send(WorkerCommand::HealthCheck { instances: self.instances.clone() });
        }
    }

    fn handle_worker_messages(&mut self, messages: Vec<WorkerMessage>) {
        for message in messages {
            match message {
                WorkerMessage::LayoutRefreshNeeded => self.persist_instances(),
                WorkerMessage::HealthRecovered { title } => {
                    self.status_line = Some(format!("{title}: session recovered"));
                    self.persist_instances();
                }
                WorkerMessage::Error { title, message } => {
                    warn!(title = ?title, error = %message, "reconciliation reported an error");
                    self.status_line = Some(message);
                }
            }
        }
    }

    fn apply_action(&mut self, action: Action) {
        match self.mode {
            Mode::Default if self.list.search_mode => self.apply_search_action(action),
            Mode::Default => self.apply_default_action(action),
            Mode::New | Mode::AdvancedNew => self.apply_new_action(action),
            Mode::Prompt => self.apply_prompt_action(action),
            Mode::Help => self.mode = Mode::Default,
            Mode::Confirm => self.apply_confirm_action(action),
            Mode::CreatingSession => {}
            Mode::Git => {
                if matches!(action, Action::Cancel) {
                    self.mode = Mode::Default;
                }
            }
        }
    }

    fn apply_default_action(&mut self, action: Action) {
        let visible_count = self.list.visible_indices(&self.instances).len();
        match action {
            Action::Quit => self.should_quit = true,
            Action::MoveSelection(delta) => {
                self.list.move_selection(delta, visible_count);
                self.nav.notify_navigation();
            }
            Action::ToggleCategory => {
                if let Some(idx) = self.selected_instance_idx() {
                    let label = self.instances[idx]
                        .category
                        .clone()
                        .unwrap_or_else(|| "Uncategorized".to_string());
                    self.list.toggle_category(&label);
                    self.persist_ui_state();
                }
            }
            Action::ToggleHidePaused => {
                self.list.hide_paused = !self.list.hide_paused;
                self.persist_ui_state();
            }
            Action::EnterSearch => {
                self.list.search_mode = true;
            }
            Action::ClearFilters => {
                self.list.clear_filters();
                self.persist_ui_state();
            }
            Action::EnterNew => {
                self.wizard = SessionSetupWizard::new();
                self.title_input = TextInput::new(false);
                self.mode = Mode::New;
            }
            Action::EnterAdvancedNew => {
                self.wizard = SessionSetupWizard::new();
                self.title_input = TextInput::new(false);
                self.mode = Mode::AdvancedNew;
            }
            Action::EnterPrompt => {
                if self.selected_instance_idx().is_some() {
                    self.prompt_input = TextInput::new(true);
                    self.mode = Mode::Prompt;
                }
            }
            Action::EnterHelp => self.mode = Mode::Help,
            Action::EnterGit => self.mode = Mode::Git,
            Action::Attach => {
                if self.selected_instance_idx().is_some() {
                    self.pending_attach = true;
                }
            }
            Action::Pause => self.pause_selected(),
            Action::Resume => self.resume_selected(),
            Action::RequestKill => self.request_confirmation(|title| PendingConfirmation::KillInstance { title }),
            Action::RequestPush => self.request_confirmation(|title| PendingConfirmation::PushInstance { title }),
            _ => {}
        }
    }

    fn apply_search_action(&mut self, action: Action) {
        match action {
            Action::SearchChar(c) => self.list.search_query.push(c),
            Action::SearchBackspace => {
                self.list.search_query.pop();
            }
            Action::ExitSearch => {
                self.list.search_mode = false;
                self.persist_ui_state();
            }
            _ => {}
        }
    }

    fn apply_new_action(&mut self, action: Action) {
        match action {
            Action::Cancel => self.mode = Mode::Default,
            Action::InputChar(c) => self.title_input.push_char(c),
            Action::InputBackspace => self.title_input.backspace(),
            Action::InputSubmit => {
                let title = self.title_input.buffer.trim().to_string();
                if !title.is_empty() {
                    self.start_new_instance(title);
                }
            }
            _ => {}
        }
    }

    fn apply_prompt_action(&mut self, action: Action) {
        match action {
            Action::Cancel => self.mode = Mode::Default,
            Action::InputChar(c) => self.prompt_input.push_char(c),
            Action::InputBackspace => self.prompt_input.backspace(),
            Action::InputSubmit => {
                let text = self.prompt_input.take();
                if let Some(idx) = self.selected_instance_idx() {
                    if let Err(e) = self.engine.send_prompt(&self.instances[idx], &text) {
                        self.status_line = Some(format!("send prompt failed: {e}"));
                    }
                }
                self.mode = Mode::Default;
            }
            _ => {}
        }
    }

    fn apply_confirm_action(&mut self, action: Action) {
        let Some(pending) = self.pending_confirmation.take() else {
            self.mode = Mode::Default;
            return;
        };
        match action {
            Action::ConfirmYes => match pending {
                PendingConfirmation::KillInstance { title } => self.kill_by_title(&title),
                PendingConfirmation::PushInstance { title } => self.push_by_title(&title),
            },
            _ => {}
        }
        self.mode = Mode::Default;
    }

    fn request_confirmation(&mut self, make: impl FnOnce(String) -> PendingConfirmation) {
        let Some(idx) = self.selected_instance_idx() else {
            return;
        };
        self.pending_confirmation = Some(make(self.instances[idx].title.clone()));
        self.mode = Mode::Confirm;
    }

    /// §4.6: `Start` of a new instance is dispatched to the worker thread
    /// (§5) so the UI transitions to `CreatingSession` and resumes on
    /// completion (via [`App::drain_worker_results`]), rather than blocking
    /// the event loop on the worktree + multiplexer setup.
    fn start_new_instance(&mut self, title: String) {
        if let Err(e) = crate::lifecycle::validate_title(&title) {
            self.status_line = Some(e.to_string());
            return;
        }
        if let Err(e) = crate::lifecycle::validate_instance_count(self.instances.len()) {
            self.status_line = Some(e.to_string());
            return;
        }
        if self.start_in_flight {
            return;
        }

        let branch = crate::lifecycle::derive_branch_name(&title);
        let program = self
            .config
            .resolve_program(None)
            .unwrap_or_else(|_| self.config.default_program.clone());

        let instance = Instance {
            title: title.clone(),
            path: Default::default(),
            working_dir: Default::default(),
            branch,
            status: Status::Running,
            height: 24,
            width: 80,
            created_at: 0,
            updated_at: 0,
            auto_yes: self.default_auto_yes,
            prompt: None,
            program,
            existing_worktree: None,
            category: self.wizard.category.clone(),
            tags: Vec::new(),
            worktree: None,
            diff_stats: Default::default(),
        };

        self.mode = Mode::CreatingSession;
        self.start_in_flight = true;
        let _ = self.worker_tx.send(WorkerCommand::Start { instance: Box::new(instance) });
    }

    /// §4.1 `Attach`, §5 "blocks the whole UI": the caller is responsible
    /// for suspending the alternate screen and raw mode around this call.
    pub fn attach_selected(&mut self) {
        let Some(idx) = self.selected_instance_idx() else {
            return;
        };
        if let Err(e) = self.engine.attach(&self.instances[idx]) {
            self.status_line = Some(format!("attach failed: {e}"));
        }
    }

    fn pause_selected(&mut self) {
        let Some(idx) = self.selected_instance_idx() else {
            return;
        };
        match self.engine.pause(&mut self.instances[idx]) {
            Ok(()) => self.persist_instances(),
            Err(e) => self.status_line = Some(format!("pause failed: {e}")),
        }
    }

    fn resume_selected(&mut self) {
        let Some(idx) = self.selected_instance_idx() else {
            return;
        };
        match self.engine.resume(&mut self.instances[idx]) {
            Ok(()) => self.persist_instances(),
            Err(e) => self.status_line = Some(format!("resume failed: {e}")),
        }
    }

    fn kill_by_title(&mut self, title: &str) {
        let Some(idx) = self.instances.iter().position(|i| i.title == title) else {
            return;
        };
        match self.engine.kill(&mut self.instances[idx]) {
            Ok(()) => {
                self.instances.remove(idx);
                self.outputs.remove(title);
                self.persist_instances();
            }
            Err(e) => self.status_line = Some(format!("kill failed: {e}")),
        }
    }

    fn push_by_title(&mut self, title: &str) {
        let Some(instance) = self.instances.iter().find(|i| i.title == title) else {
            return;
        };
        let Some(worktree) = &instance.worktree else {
            return;
        };
        if let Err(e) = crate::git::push(&worktree.worktree_path, &instance.branch) {
            self.status_line = Some(format!("push failed: {e}"));
        }
    }
}

fn render(f: &mut ratatui::Frame, app: &mut App) {
    let area = f.area();
    let chunks = Layout::vertical([
        Constraint::Percentage(60),
        Constraint::Min(5),
        Constraint::Length(1),
    ])
    .split(area);

    render_list(f, app, chunks[0]);
    render_preview(f, app, chunks[1]);
    render_footer(f, app, chunks[2]);

    match app.mode {
        Mode::Help => render_help_overlay(f),
        Mode::New | Mode::AdvancedNew => render_text_overlay(f, "New session", &app.title_input.buffer),
        Mode::Prompt => render_text_overlay(f, "Prompt", &app.prompt_input.buffer),
        Mode::Confirm => render_confirm_overlay(f, app),
        Mode::CreatingSession => render_text_overlay(f, "Creating session…", ""),
        Mode::Git => render_text_overlay(f, "Git status", "(no staged changes to show)"),
        Mode::Default => {}
    }
}

fn render_list(f: &mut ratatui::Frame, app: &App, area: ratatui::layout::Rect) {
    let categories = group_by_category(&app.instances);
    let visible = app.list.visible_indices(&app.instances);
    let selected = visible.get(app.list.selected_idx.max(0) as usize).copied();
    let mut items = Vec::new();
    for category in categories {
        let shown: Vec<usize> = category.indices.into_iter().filter(|i| visible.contains(i)).collect();
        if shown.is_empty() {
            continue;
        }
        items.push(ListItem::new(Line::from(Span::styled(
            format!("── {} ──", category.label),
            Style::default().add_modifier(Modifier::BOLD),
        ))));
        for idx in shown {
            let instance = &app.instances[idx];
            let style = if Some(idx) == selected {
                Style::default().bg(Color::Blue)
            } else {
                status_style(instance.status)
            };
            items.push(ListItem::new(Line::from(Span::styled(
                format!(
                    "  {:<24} {:?}  +{}/-{}",
                    instance.title, instance.status, instance.diff_stats.added, instance.diff_stats.removed
                ),
                style,
            ))));
        }
    }
    let title = if app.list.search_mode {
        format!("Sessions (search: {})", app.list.search_query)
    } else {
        "Sessions".to_string()
    };
    f.render_widget(List::new(items).block(Block::default().borders(Borders::ALL).title(title)), area);
}

fn status_style(status: Status) -> Style {
    match status {
        Status::Running => Style::default().fg(Color::Yellow),
        Status::Ready => Style::default().fg(Color::Green),
        Status::NeedsApproval => Style::default().fg(Color::Magenta),
        Status::Paused => Style::default().fg(Color::DarkGray),
        Status::Stopped => Style::default().fg(Color::Red),
    }
}

fn render_preview(f: &mut ratatui::Frame, app: &App, area: ratatui::layout::Rect) {
    let text = strip_ansi_escapes::strip_str(app.preview.lines.join("\n"));
    let rendered = text.into_text().unwrap_or_default();
    f.render_widget(Paragraph::new(rendered).block(Block::default().borders(Borders::ALL).title("Preview")), area);
}

fn render_footer(f: &mut ratatui::Frame, app: &App, area: ratatui::layout::Rect) {
    let msg = app
        .status_line
        .clone()
        .unwrap_or_else(|| "[n]ew [p]rompt [z]pause [r]esume [x]kill [P]ush [g]it [?]help [q]uit".to_string());
    f.render_widget(Paragraph::new(msg), area);
}

const HELP_TEXT: &str = "j/k move, space toggle category, h hide paused, / search, n new, N advanced new, p prompt, enter attach, z pause, r resume, x kill, P push, g git, ? help, q quit";

fn render_help_overlay(f: &mut ratatui::Frame) {
    let area = centered(f.area());
    // Help text is authored as one flowing sentence; wrap it to the
    // overlay's inner width rather than hand-breaking it into fixed lines.
    let wrapped = textwrap::wrap(HELP_TEXT, area.width.saturating_sub(2).max(1) as usize).join("\n");
    f.render_widget(
        Paragraph::new(wrapped).block(Block::default().borders(Borders::ALL).title("Help")),
        area,
    );
}

fn render_text_overlay(f: &mut ratatui::Frame, title: &str, content: &str) {
    f.render_widget(
        Paragraph::new(content).block(Block::default().borders(Borders::ALL).title(title.to_string())),
        centered(f.area()),
    );
}

fn render_confirm_overlay(f: &mut ratatui::Frame, app: &App) {
    let text = match &app.pending_confirmation {
        Some(PendingConfirmation::KillInstance { title }) => format!("Kill '{title}'? (y/n)"),
        Some(PendingConfirmation::PushInstance { title }) => format!("Push '{title}'? (y/n)"),
        None => "Confirm? (y/n)".to_string(),
    };
    f.render_widget(
        Paragraph::new(text).block(Block::default().borders(Borders::ALL).title("Confirm")),
        centered(f.area()),
    );
}

fn centered(area: ratatui::layout::Rect) -> ratatui::layout::Rect {
    let width = area.width.min(60);
    let height = area.height.min(8);
    ratatui::layout::Rect {
        x: area.x + (area.width.saturating_sub(width)) / 2,
        y: area.y + (area.height.saturating_sub(height)) / 2,
        width,
        height,
    }
}

/// §4.6 main event loop. Mirrors the pack dashboard's timer-split
/// (`tick_rate` for animation-equivalent bookkeeping, a faster preview
/// refresh, a slower background-tick sweep) generalized to this spec's own
/// named intervals, plus the navigation debouncer gating the preview
/// refresh specifically (Open Question 1).
pub fn run(
    config: Config,
    store: StateStore,
    engine: LifecycleEngine,
    mux: Arc<dyn MultiplexerController>,
    default_auto_yes: bool,
) -> Result<()> {
    let mut app = App::new(config, store, engine, mux, default_auto_yes)?;

    // §5 cancellation: a process-scope flag propagated into the loop so a
    // SIGINT (e.g. while blocked in a subprocess call, outside raw mode
    // during Attach) still results in instances and UI state being
    // persisted rather than the process dying mid-write.
    let interrupted = Arc::new(AtomicBool::new(false));
    let handler_flag = interrupted.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "failed to install Ctrl+C handler");
    }

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_loop(&mut terminal, &mut app, &interrupted);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    app.persist_ui_state();
    app.persist_instances();
    app.store.close();

    result
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    interrupted: &Arc<AtomicBool>,
) -> Result<()> {
    let mut last_tick = Instant::now();

    loop {
        if interrupted.load(Ordering::SeqCst) {
            break;
        }

        app.drain_worker_results();

        terminal.draw(|f| render(f, app))?;

        if app.nav.poll_due() {
            app.refresh_preview();
        }

        let timeout = TICK_RATE.saturating_sub(last_tick.elapsed());
        if event::poll(timeout)? {
            let event = event::read()?;
            let Event::Key(key) = event else { continue };
            if key.kind != KeyEventKind::Press {
                continue;
            }

            let action = if app.mode == Mode::Default && app.list.search_mode {
                search_key(key)
            } else {
                action_for_key(app.mode, key)
            };
            if let Some(action) = action {
                app.apply_action(action);
            }
        }

        if last_tick.elapsed() >= TICK_RATE {
            last_tick = Instant::now();
            app.run_ticks();
        }

        if app.pending_attach {
            app.pending_attach = false;
            suspend_for_attach(terminal, app)?;
        }

        if app.should_quit {
            break;
        }
    }
    Ok(())
}

/// Leave the alternate screen and raw mode, hand the terminal to the
/// multiplexer (§4.1 `Attach` / §5 "blocks the whole UI"), then restore the
/// UI's own screen once the user detaches.
fn suspend_for_attach(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, app: &mut App) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;

    app.attach_selected();

    enable_raw_mode()?;
    execute!(terminal.backend_mut(), EnterAlternateScreen, EnableMouseCapture)?;
    terminal.clear()?;
    Ok(())
}
