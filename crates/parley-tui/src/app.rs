use std::sync::Arc;
use std::time::{Duration, Instant};

use ratatui::layout::Rect;
use ratatui::widgets::ListState;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use parley_core::transcript::MEMORY_CLEARED_STATUS;
use parley_core::{
    AgentRegistry, ConnectionStatus, ConnectionTester, ConversationDriver, ConversationEvent,
    HttpBackend, KeyValueStore, MemoryClear, Provider, Settings, SettingsField, SettingsStore,
    StartError, StartRequest, Transcript,
};

use crate::config::{ClientConfig, MAX_TURNS};
use crate::tui::{AppEvent, BackendEvent};

/// How long a banner stays up.
pub const BANNER_TTL: Duration = Duration::from_secs(5);

/// Prefix `detail` with `context` unless the backend already reported the
/// same endpoint fallback.
pub fn failure_message(context: &str, detail: &str) -> String {
    let detail = detail.trim();
    if detail.is_empty() || detail == context {
        context.to_string()
    } else {
        format!("{}: {}", context, detail)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusPane {
    Agents,
    Prompt,
    Transcript,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BannerKind {
    Error,
    Success,
}

#[derive(Debug, Clone)]
pub struct Banner {
    pub kind: BannerKind,
    pub message: String,
    pub expires_at: Instant,
}

/// Draft of the settings modal; only written to the store on save.
#[derive(Debug, Clone)]
pub struct SettingsForm {
    pub draft: Settings,
    pub field_state: ListState,
    pub editing: bool,
    pub input: String,
    pub cursor: usize,
}

impl SettingsForm {
    fn new(draft: Settings) -> Self {
        let mut field_state = ListState::default();
        field_state.select(Some(0));
        Self {
            draft,
            field_state,
            editing: false,
            input: String::new(),
            cursor: 0,
        }
    }

    pub fn selected_field(&self) -> SettingsField {
        let fields = SettingsField::all();
        let i = self.field_state.selected().unwrap_or(0).min(fields.len() - 1);
        fields[i]
    }

    pub fn nav_down(&mut self) {
        let len = SettingsField::all().len();
        let i = self.field_state.selected().unwrap_or(0);
        self.field_state.select(Some((i + 1).min(len - 1)));
    }

    pub fn nav_up(&mut self) {
        let i = self.field_state.selected().unwrap_or(0);
        self.field_state.select(Some(i.saturating_sub(1)));
    }

    pub fn begin_edit(&mut self) {
        self.input = self.selected_field().get(&self.draft).to_string();
        self.cursor = self.input.chars().count();
        self.editing = true;
    }

    pub fn commit_edit(&mut self) {
        let field = self.selected_field();
        field.set(&mut self.draft, std::mem::take(&mut self.input));
        self.cursor = 0;
        self.editing = false;
    }

    pub fn cancel_edit(&mut self) {
        self.input.clear();
        self.cursor = 0;
        self.editing = false;
    }
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,
    pub focus: FocusPane,

    // Agent roster
    pub registry: AgentRegistry,
    pub roster_state: ListState,
    pub agents_loading: bool,

    // Run controls
    pub prompt_input: String,
    pub prompt_cursor: usize,
    pub turns: u32,
    pub api: Provider,

    // Transcript
    pub transcript: Transcript,
    pub transcript_scroll: u16,
    pub transcript_height: u16,
    pub transcript_width: u16,
    /// Wrapped line count from the last render
    pub transcript_lines: u16,

    // Status
    pub banner: Option<Banner>,
    pub animation_frame: u8,
    pub memory_clearing: bool,
    pub testing_provider: Option<Provider>,

    // Settings modal
    pub settings: Settings,
    pub show_settings: bool,
    pub settings_form: SettingsForm,
    pub show_reset_confirm: bool,

    // Panel areas for mouse hit-testing (updated during render)
    pub roster_area: Option<Rect>,
    pub prompt_area: Option<Rect>,
    pub transcript_area: Option<Rect>,

    pub backend_url: String,
    driver: ConversationDriver<HttpBackend>,
    store: Arc<dyn KeyValueStore>,
    settings_store: SettingsStore<Arc<dyn KeyValueStore>>,
    config: ClientConfig,
    events: UnboundedSender<AppEvent>,
}

impl App {
    pub fn new(
        backend: Arc<HttpBackend>,
        store: Arc<dyn KeyValueStore>,
        events: UnboundedSender<AppEvent>,
    ) -> Self {
        let settings_store = SettingsStore::new(Arc::clone(&store));
        let settings = settings_store.load();
        let config = ClientConfig::load(store.as_ref());

        Self {
            should_quit: false,
            input_mode: InputMode::Normal,
            focus: FocusPane::Prompt,

            registry: AgentRegistry::new(),
            roster_state: ListState::default(),
            agents_loading: false,

            prompt_input: String::new(),
            prompt_cursor: 0,
            turns: config.clamped_turns(),
            api: config.provider(),

            transcript: Transcript::new(),
            transcript_scroll: 0,
            transcript_height: 0,
            transcript_width: 0,
            transcript_lines: 0,

            banner: None,
            animation_frame: 0,
            memory_clearing: false,
            testing_provider: None,

            settings_form: SettingsForm::new(settings.clone()),
            settings,
            show_settings: false,
            show_reset_confirm: false,

            roster_area: None,
            prompt_area: None,
            transcript_area: None,

            backend_url: backend.base_url().to_string(),
            driver: ConversationDriver::new(backend),
            store,
            settings_store,
            config,
            events,
        }
    }

    pub fn is_running(&self) -> bool {
        self.driver.is_running()
    }

    /// Spinner state shown in the footer and transcript title.
    pub fn is_busy(&self) -> bool {
        self.is_running() || self.memory_clearing || self.agents_loading
    }

    // Banners
    pub fn show_error(&mut self, message: impl Into<String>) {
        self.show_banner(BannerKind::Error, message.into());
    }

    pub fn show_success(&mut self, message: impl Into<String>) {
        self.show_banner(BannerKind::Success, message.into());
    }

    fn show_banner(&mut self, kind: BannerKind, message: String) {
        self.banner = Some(Banner {
            kind,
            message,
            expires_at: Instant::now() + BANNER_TTL,
        });
    }

    /// Tick animation frame and drop an expired banner (called by Tick event)
    pub fn tick(&mut self) {
        if self.is_busy() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
        if let Some(banner) = &self.banner {
            if Instant::now() >= banner.expires_at {
                self.banner = None;
            }
        }
    }

    // Agent roster
    pub fn load_agents(&mut self) {
        if self.agents_loading {
            return;
        }
        self.agents_loading = true;
        let backend = Arc::clone(self.driver.backend());
        let tx = self.events.clone();
        tokio::spawn(async move {
            let mut registry = AgentRegistry::new();
            let result = registry
                .refresh(backend.as_ref())
                .await
                .map(|_| registry)
                .map_err(|e| e.to_string());
            let _ = tx.send(AppEvent::Backend(BackendEvent::AgentsLoaded(result)));
        });
    }

    pub fn roster_nav_down(&mut self) {
        let len = self.registry.len();
        if len > 0 {
            let i = self.roster_state.selected().unwrap_or(0);
            self.roster_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn roster_nav_up(&mut self) {
        let i = self.roster_state.selected().unwrap_or(0);
        self.roster_state.select(Some(i.saturating_sub(1)));
    }

    pub fn toggle_selected_agent(&mut self) {
        if let Some(i) = self.roster_state.selected() {
            self.registry.toggle(i);
        }
    }

    /// Shift the highlighted agent up (-1) or down (+1) in speaking order.
    pub fn move_selected_agent(&mut self, delta: isize) {
        let Some(i) = self.roster_state.selected() else {
            return;
        };
        let target = i as isize + delta;
        if target < 0 || target as usize >= self.registry.len() {
            return;
        }
        self.registry.move_entry(i, target as usize);
        self.roster_state.select(Some(target as usize));
    }

    // Run controls
    pub fn increase_turns(&mut self) {
        self.turns = (self.turns + 1).min(MAX_TURNS);
    }

    pub fn decrease_turns(&mut self) {
        self.turns = self.turns.saturating_sub(1).max(1);
    }

    pub fn cycle_api(&mut self) {
        self.api = self.api.next();
    }

    pub fn start_conversation(&mut self) {
        if self.is_running() {
            return;
        }

        let request = StartRequest {
            agents: self.registry.selected(),
            prompt: self.prompt_input.clone(),
            turns: self.turns,
            api: Some(self.api),
        };

        let run = match self.driver.begin(request) {
            Ok(run) => run,
            Err(StartError::AlreadyRunning) => return,
            Err(e) => {
                debug!(error = %e, "conversation not started");
                self.show_error(e.to_string());
                return;
            }
        };

        self.transcript.clear();
        self.transcript_scroll = 0;
        self.persist_run_preferences();

        let settings = self.settings.with_env_credentials();
        let tx = self.events.clone();
        tokio::spawn(async move {
            run.execute(settings, move |event| {
                let _ = tx.send(AppEvent::Backend(BackendEvent::Conversation(event)));
            })
            .await;
        });
    }

    pub fn clear_memory(&mut self) {
        if self.is_running() || self.memory_clearing {
            return;
        }
        self.memory_clearing = true;
        let driver = self.driver.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            let result = driver.clear_memory().await.map_err(|e| e.to_string());
            let _ = tx.send(AppEvent::Backend(BackendEvent::MemoryCleared(result)));
        });
    }

    fn persist_run_preferences(&mut self) {
        self.config.api = Some(self.api.as_str().to_string());
        self.config.turns = self.turns;
        if let Err(e) = self.config.save(self.store.as_ref()) {
            warn!(error = %e, "could not save client config");
        }
    }

    // Settings modal
    pub fn open_settings(&mut self) {
        self.settings = self.settings_store.load();
        self.settings_form = SettingsForm::new(self.settings.clone());
        self.show_settings = true;
    }

    pub fn close_settings(&mut self) {
        self.show_settings = false;
        self.show_reset_confirm = false;
        self.settings_form.cancel_edit();
    }

    pub fn save_settings(&mut self) {
        match self.settings_store.save(&self.settings_form.draft) {
            Ok(saved) => {
                self.settings = saved.clone();
                self.settings_form.draft = saved;
                self.show_success("Settings saved successfully!");
            }
            Err(e) => self.show_error(format!("Failed to save settings: {}", e)),
        }
    }

    pub fn request_reset(&mut self) {
        self.show_reset_confirm = true;
    }

    pub fn confirm_reset(&mut self, confirmed: bool) {
        self.show_reset_confirm = false;
        match self.settings_store.reset(|| confirmed) {
            Ok(true) => {
                self.settings = self.settings_store.load();
                self.settings_form = SettingsForm::new(self.settings.clone());
                self.show_success("Settings reset to defaults");
            }
            Ok(false) => {}
            Err(e) => self.show_error(format!("Failed to reset settings: {}", e)),
        }
    }

    /// Test the provider owning the highlighted field, using the unsaved draft.
    pub fn test_selected_provider(&mut self) {
        let provider = self.settings_form.selected_field().provider();
        if self.testing_provider.is_some() {
            return;
        }
        self.testing_provider = Some(provider);
        let draft = self.settings_form.draft.clone();
        let backend = Arc::clone(self.driver.backend());
        let tx = self.events.clone();
        tokio::spawn(async move {
            let status = ConnectionTester::new(backend.as_ref()).test(provider, &draft).await;
            let _ = tx.send(AppEvent::Backend(BackendEvent::ConnectionTested(provider, status)));
        });
    }

    // Background results
    pub fn handle_backend_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::AgentsLoaded(result) => {
                self.agents_loading = false;
                match result {
                    Ok(registry) => {
                        info!(count = registry.len(), "roster updated");
                        self.registry = registry;
                        self.roster_state
                            .select(if self.registry.is_empty() { None } else { Some(0) });
                    }
                    Err(e) => {
                        self.registry = AgentRegistry::new();
                        self.roster_state.select(None);
                        self.show_error(failure_message("Failed to load agents", &e));
                    }
                }
            }
            BackendEvent::Conversation(event) => {
                self.transcript.apply(&event);
                if let ConversationEvent::Started { .. } = event {
                    self.transcript_scroll = 0;
                }
            }
            BackendEvent::ConnectionTested(provider, status) => {
                if self.testing_provider == Some(provider) {
                    self.testing_provider = None;
                }
                match status {
                    ConnectionStatus::Connected(_) => self.show_success(status.message()),
                    _ => self.show_error(status.message()),
                }
            }
            BackendEvent::MemoryCleared(result) => {
                self.memory_clearing = false;
                match result {
                    Ok(MemoryClear::Cleared) => {
                        self.transcript.replace_with_status(MEMORY_CLEARED_STATUS);
                        self.transcript_scroll = 0;
                    }
                    Ok(MemoryClear::Skipped) => {}
                    Err(e) => self.show_error(failure_message("Failed to clear memory", &e)),
                }
            }
        }
    }

    // Transcript scrolling
    /// Offset that puts the last wrapped line at the bottom of the pane.
    pub fn max_transcript_scroll(&self) -> u16 {
        self.transcript_lines.saturating_sub(self.transcript_height)
    }

    pub fn scroll_transcript_down(&mut self) {
        self.transcript.detach();
        self.transcript_scroll = (self.transcript_scroll + 1).min(self.max_transcript_scroll());
    }

    pub fn scroll_transcript_up(&mut self) {
        self.transcript.detach();
        self.transcript_scroll = self.transcript_scroll.saturating_sub(1);
    }

    pub fn scroll_transcript_page_down(&mut self) {
        self.transcript.detach();
        let half = (self.transcript_height / 2).max(1);
        self.transcript_scroll = self
            .transcript_scroll
            .saturating_add(half)
            .min(self.max_transcript_scroll());
    }

    pub fn scroll_transcript_page_up(&mut self) {
        self.transcript.detach();
        let half = (self.transcript_height / 2).max(1);
        self.transcript_scroll = self.transcript_scroll.saturating_sub(half);
    }
}
