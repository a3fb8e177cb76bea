//! §4.6 Event-driven UI state machine: the finite state set, its key-to-
//! action mapping per state, and (in [`app`]) the event loop that drives it.
//! Grounded on the pack dashboard's `keymap`/`actions` split: a pure
//! key-to-action mapping kept separate from the stateful `apply` step, so
//! the mapping itself can be unit tested without a terminal.

pub mod app;
pub mod list;
pub mod nav;
pub mod overlays;

pub use app::{App, run};

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// §4.6 finite state set. Strictly modal: while in a non-`Default` state,
/// only that state's key handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Default,
    New,
    Prompt,
    Help,
    Confirm,
    CreatingSession,
    AdvancedNew,
    Git,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Quit,
    MoveSelection(i64),
    ToggleCategory,
    ToggleHidePaused,
    EnterSearch,
    ClearFilters,
    SearchChar(char),
    SearchBackspace,
    ExitSearch,
    EnterNew,
    EnterAdvancedNew,
    EnterPrompt,
    EnterHelp,
    EnterGit,
    Attach,
    Pause,
    Resume,
    RequestKill,
    RequestPush,
    ConfirmYes,
    ConfirmNo,
    InputChar(char),
    InputBackspace,
    InputSubmit,
    Cancel,
}

/// Map a key event to an action for the given mode. Returns `None` for keys
/// the mode doesn't bind; the caller simply ignores the event.
pub fn action_for_key(mode: Mode, key: KeyEvent) -> Option<Action> {
    match mode {
        Mode::Default => default_key(key),
        Mode::New | Mode::AdvancedNew => new_key(key),
        Mode::Prompt => prompt_key(key),
        Mode::Help => help_key(key),
        Mode::Confirm => confirm_key(key),
        Mode::CreatingSession => None,
        Mode::Git => git_key(key),
    }
}

fn default_key(key: KeyEvent) -> Option<Action> {
    match key.code {
        KeyCode::Char('q') => Some(Action::Quit),
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Action::Quit),
        KeyCode::Char('j') | KeyCode::Down => Some(Action::MoveSelection(1)),
        KeyCode::Char('k') | KeyCode::Up => Some(Action::MoveSelection(-1)),
        KeyCode::Char(' ') => Some(Action::ToggleCategory),
        KeyCode::Char('h') => Some(Action::ToggleHidePaused),
        KeyCode::Char('/') => Some(Action::EnterSearch),
        KeyCode::Esc => Some(Action::ClearFilters),
        KeyCode::Char('n') => Some(Action::EnterNew),
        KeyCode::Char('N') => Some(Action::EnterAdvancedNew),
        KeyCode::Char('p') => Some(Action::EnterPrompt),
        KeyCode::Char('?') => Some(Action::EnterHelp),
        KeyCode::Char('g') => Some(Action::EnterGit),
        KeyCode::Enter => Some(Action::Attach),
        KeyCode::Char('z') => Some(Action::Pause),
        KeyCode::Char('r') => Some(Action::Resume),
        KeyCode::Char('x') => Some(Action::RequestKill),
        KeyCode::Char('P') => Some(Action::RequestPush),
        _ => None,
    }
}

/// Search is a sub-mode of `Default` in practice (the instance list stays
/// visible behind it), so its keys are mapped from the same `Default`
/// dispatch rather than a distinct `Mode` variant, matching §4.6's stated
/// finite state set, which does not list a separate Search state.
pub fn search_key(key: KeyEvent) -> Option<Action> {
    match key.code {
        KeyCode::Esc => Some(Action::ExitSearch),
        KeyCode::Enter => Some(Action::ExitSearch),
        KeyCode::Backspace => Some(Action::SearchBackspace),
        KeyCode::Char(c) => Some(Action::SearchChar(c)),
        _ => None,
    }
}

fn new_key(key: KeyEvent) -> Option<Action> {
    match key.code {
        KeyCode::Esc => Some(Action::Cancel),
        KeyCode::Enter => Some(Action::InputSubmit),
        KeyCode::Backspace => Some(Action::InputBackspace),
        KeyCode::Char(c) => Some(Action::InputChar(c)),
        _ => None,
    }
}

fn prompt_key(key: KeyEvent) -> Option<Action> {
    match key.code {
        KeyCode::Esc => Some(Action::Cancel),
        KeyCode::Enter => Some(Action::InputSubmit),
        KeyCode::Backspace => Some(Action::InputBackspace),
        KeyCode::Char(c) => Some(Action::InputChar(c)),
        _ => None,
    }
}

/// Help owns escape (and any other key) only to dismiss itself. §4.6's
/// "any modal→Default on escape unless the modal owns escape" describes
/// modals that do something else with escape; Help has nothing else to do
/// with input, so every key dismisses it.
fn help_key(_key: KeyEvent) -> Option<Action> {
    Some(Action::Cancel)
}

fn confirm_key(key: KeyEvent) -> Option<Action> {
    match key.code {
        KeyCode::Char('y') | KeyCode::Enter => Some(Action::ConfirmYes),
        KeyCode::Char('n') | KeyCode::Esc => Some(Action::ConfirmNo),
        _ => None,
    }
}

fn git_key(key: KeyEvent) -> Option<Action> {
    match key.code {
        KeyCode::Esc | KeyCode::Char('q') => Some(Action::Cancel),
        KeyCode::Char('j') | KeyCode::Down => Some(Action::MoveSelection(1)),
        KeyCode::Char('k') | KeyCode::Up => Some(Action::MoveSelection(-1)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEventKind;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn default_mode_maps_navigation_and_quit() {
        assert_eq!(action_for_key(Mode::Default, key(KeyCode::Char('q'))), Some(Action::Quit));
        assert_eq!(
            action_for_key(Mode::Default, key(KeyCode::Char('j'))),
            Some(Action::MoveSelection(1))
        );
    }

    #[test]
    fn help_mode_dismisses_on_any_key() {
        assert_eq!(action_for_key(Mode::Help, key(KeyCode::Char('x'))), Some(Action::Cancel));
        assert_eq!(action_for_key(Mode::Help, key(KeyCode::Enter)), Some(Action::Cancel));
    }

    #[test]
    fn confirm_mode_only_binds_yes_no() {
        assert_eq!(action_for_key(Mode::Confirm, key(KeyCode::Char('y'))), Some(Action::ConfirmYes));
        assert_eq!(action_for_key(Mode::Confirm, key(KeyCode::Char('n'))), Some(Action::ConfirmNo));
        assert_eq!(action_for_key(Mode::Confirm, key(KeyCode::Char('z'))), None);
    }

    #[test]
    fn creating_session_mode_ignores_all_keys() {
        assert_eq!(action_for_key(Mode::CreatingSession, key(KeyCode::Char('q'))), None);
        assert_eq!(action_for_key(Mode::CreatingSession, key(KeyCode::Enter)), None);
    }

    #[test]
    fn unused_key_event_kind_field_is_accepted() {
        let k = KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE);
        assert_eq!(k.kind, KeyEventKind::Press);
    }
}
