//! §4.7 Overlays: thin, passive I/O collaborators. Each exchanges key
//! events for state-change events with the state machine in
//! [`crate::ui::app`]; none owns state essential to the core invariants,
//! so these stay minimal rather than growing their own sub-state-machines.

/// Single or multi-line text input (used for title entry, prompt entry,
/// search).
#[derive(Debug, Clone, Default)]
pub struct TextInput {
    pub buffer: String,
    pub multiline: bool,
}

impl TextInput {
    pub fn new(multiline: bool) -> Self {
        Self {
            buffer: String::new(),
            multiline,
        }
    }

    pub fn push_char(&mut self, c: char) {
        self.buffer.push(c);
    }

    pub fn backspace(&mut self) {
        self.buffer.pop();
    }

    pub fn newline(&mut self) {
        if self.multiline {
            self.buffer.push('\n');
        }
    }

    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.buffer)
    }
}

/// Read-only scrollback viewer (used for the Git diff overlay's content pane).
#[derive(Debug, Clone, Default)]
pub struct TextOverlay {
    pub lines: Vec<String>,
    pub scroll: usize,
}

impl TextOverlay {
    pub fn set_content(&mut self, content: &str) {
        self.lines = content.lines().map(String::from).collect();
        self.scroll = 0;
    }

    pub fn scroll_down(&mut self, n: usize) {
        let max = self.lines.len().saturating_sub(1);
        self.scroll = (self.scroll + n).min(max);
    }

    pub fn scroll_up(&mut self, n: usize) {
        self.scroll = self.scroll.saturating_sub(n);
    }
}

/// Yes/no confirmation, keyed to the action the Confirm state is guarding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingConfirmation {
    KillInstance { title: String },
    PushInstance { title: String },
}

/// §4.7 SessionSetup: the multi-step "New" wizard. Each variant is one step;
/// the wizard advances step-by-step and never skips backward past a step
/// whose answer would invalidate a later one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupStep {
    Title,
    Program,
    Category,
}

#[derive(Debug, Clone)]
pub struct SessionSetupWizard {
    pub step: SetupStep,
    pub title: String,
    pub program: Option<String>,
    pub category: Option<String>,
}

impl SessionSetupWizard {
    pub fn new() -> Self {
        Self {
            step: SetupStep::Title,
            title: String::new(),
            program: None,
            category: None,
        }
    }

    pub fn advance(&mut self) {
        self.step = match self.step {
            SetupStep::Title => SetupStep::Program,
            SetupStep::Program => SetupStep::Category,
            SetupStep::Category => SetupStep::Category,
        };
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.step, SetupStep::Category) && !self.title.is_empty()
    }
}

impl Default for SessionSetupWizard {
    fn default() -> Self {
        Self::new()
    }
}

/// §4.7 GitStatus: fugitive-style file-level stage/unstage view. The core
/// spec's git module only ever produces whole-worktree diffs (§4.2 has no
/// per-file stage/unstage operation), so this stays a display-only list
/// until such an operation exists to back it.
#[derive(Debug, Clone, Default)]
pub struct GitStatusView {
    pub files: Vec<String>,
    pub selected: usize,
}

impl GitStatusView {
    pub fn set_files(&mut self, files: Vec<String>) {
        self.files = files;
        self.selected = 0;
    }

    pub fn move_selection(&mut self, delta: i64) {
        if self.files.is_empty() {
            return;
        }
        let len = self.files.len() as i64;
        self.selected = (self.selected as i64 + delta).rem_euclid(len) as usize;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_input_single_line_ignores_newline() {
        let mut input = TextInput::new(false);
        input.push_char('a');
        input.newline();
        input.push_char('b');
        assert_eq!(input.buffer, "ab");
    }

    #[test]
    fn wizard_advances_through_steps_and_completes() {
        let mut wizard = SessionSetupWizard::new();
        assert_eq!(wizard.step, SetupStep::Title);
        wizard.title = "fix-auth".to_string();
        wizard.advance();
        assert_eq!(wizard.step, SetupStep::Program);
        wizard.advance();
        assert_eq!(wizard.step, SetupStep::Category);
        assert!(wizard.is_complete());
    }

    #[test]
    fn git_status_selection_wraps() {
        let mut view = GitStatusView::default();
        view.set_files(vec!["a.rs".into(), "b.rs".into()]);
        view.move_selection(-1);
        assert_eq!(view.selected, 1);
    }
}
