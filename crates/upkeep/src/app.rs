//! Application state for the tabbed run view.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use tracing::warn;
use upkeep_runner::Orchestrator;
use upkeep_tui::{Action, InputRouter, KeyEvent, RouteDecision, TabRegistry};

/// What the main loop should do after a keystroke.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AppFlow {
    /// Nothing changed.
    None,
    /// Redraw the UI.
    Redraw,
    /// Exit the application, cancelling the run.
    Quit,
}

/// State for one interactive run.
pub struct App {
    /// Per-plugin tabs, shared with the event flusher.
    pub tabs: TabRegistry,
    /// Tab order (admission order).
    pub order: Vec<String>,
    /// Index of the focused tab.
    pub focused: usize,
    /// Whether the help overlay is visible.
    pub show_help: bool,
    router: InputRouter,
    orchestrator: Arc<Orchestrator>,
    log_dir: PathBuf,
}

impl App {
    /// Create the app over a tab registry and the running orchestrator.
    pub fn new(
        tabs: TabRegistry,
        order: Vec<String>,
        router: InputRouter,
        orchestrator: Arc<Orchestrator>,
        log_dir: PathBuf,
    ) -> Self {
        Self {
            tabs,
            order,
            focused: 0,
            show_help: false,
            router,
            orchestrator,
            log_dir,
        }
    }

    /// The focused plugin name, if any tabs exist.
    pub fn focused_plugin(&self) -> Option<&str> {
        self.order.get(self.focused).map(String::as_str)
    }

    /// Route one keystroke: either a navigation action handled here, or
    /// bytes forwarded to the focused tab's PTY.
    pub fn handle_key(&mut self, event: &KeyEvent) -> AppFlow {
        match self.router.route(event) {
            RouteDecision::Navigate(action) => self.handle_action(action),
            RouteDecision::Forward(bytes) => {
                if let Some(plugin) = self.focused_plugin() {
                    self.orchestrator.write_input(plugin, bytes);
                }
                AppFlow::None
            }
            RouteDecision::Ignored => AppFlow::None,
        }
    }

    /// Forward pasted text to the focused PTY.
    pub fn handle_paste(&mut self, text: &str) -> AppFlow {
        if let Some(plugin) = self.focused_plugin() {
            let bytes = self.router.encode_paste(text);
            self.orchestrator.write_input(plugin, bytes);
        }
        AppFlow::None
    }

    fn handle_action(&mut self, action: Action) -> AppFlow {
        match action {
            Action::Quit => {
                self.orchestrator.cancel_token().cancel();
                return AppFlow::Quit;
            }
            Action::NextTab => {
                if !self.order.is_empty() {
                    self.focused = (self.focused + 1) % self.order.len();
                }
            }
            Action::PrevTab => {
                if !self.order.is_empty() {
                    self.focused = (self.focused + self.order.len() - 1) % self.order.len();
                }
            }
            Action::Tab(n) => {
                let index = usize::from(n) - 1;
                if index < self.order.len() {
                    self.focused = index;
                }
            }
            Action::Help | Action::ShowHelp => {
                self.show_help = !self.show_help;
            }
            Action::ScrollUp => self.with_focused_screen(|tab| {
                let page = tab.screen.rows();
                tab.screen.scroll_up(page);
            }),
            Action::ScrollDown => self.with_focused_screen(|tab| {
                let page = tab.screen.rows();
                tab.screen.scroll_down(page);
            }),
            Action::ScrollTop => self.with_focused_screen(|tab| tab.screen.scroll_to_top()),
            Action::ScrollBottom => self.with_focused_screen(|tab| tab.screen.scroll_to_bottom()),
            Action::PauseResume => {
                if let Some(plugin) = self.focused_plugin() {
                    self.orchestrator.release_pause(plugin);
                }
            }
            Action::RetryPhase => {
                if let Some(plugin) = self.focused_plugin() {
                    self.orchestrator.retry(plugin);
                }
            }
            Action::SaveLogs => self.save_focused_logs(),
            _ => {}
        }
        AppFlow::Redraw
    }

    fn with_focused_screen(&mut self, f: impl FnOnce(&mut upkeep_tui::TabState)) {
        if let Some(plugin) = self.focused_plugin() {
            let plugin = plugin.to_string();
            self.tabs.with_tab(&plugin, f);
        }
    }

    fn save_focused_logs(&mut self) {
        let Some(plugin) = self.focused_plugin().map(str::to_string) else {
            return;
        };
        let Some(text) = self.tabs.with_tab(&plugin, |tab| tab.dump_text()) else {
            return;
        };
        let stamp = Local::now().format("%Y%m%d-%H%M%S");
        let path = self.log_dir.join(format!("{plugin}-{stamp}.log"));
        if let Err(e) = std::fs::create_dir_all(&self.log_dir)
            .and_then(|()| std::fs::write(&path, text))
        {
            warn!(error = %e, path = %path.display(), "failed to save logs");
        }
    }
}
