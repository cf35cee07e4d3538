use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use ratatui::layout::Rect;

use crate::app::{App, FocusPane, InputMode};
use crate::tui::AppEvent;

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

/// Apply a line-editing key to `input`. Returns false for keys it doesn't handle.
fn edit_text(input: &mut String, cursor: &mut usize, key: KeyEvent) -> bool {
    match key.code {
        KeyCode::Backspace => {
            if *cursor > 0 {
                *cursor -= 1;
                let byte_pos = char_to_byte_index(input, *cursor);
                input.remove(byte_pos);
            }
        }
        KeyCode::Delete => {
            let char_count = input.chars().count();
            if *cursor < char_count {
                let byte_pos = char_to_byte_index(input, *cursor);
                input.remove(byte_pos);
            }
        }
        KeyCode::Left => {
            *cursor = cursor.saturating_sub(1);
        }
        KeyCode::Right => {
            let char_count = input.chars().count();
            *cursor = (*cursor + 1).min(char_count);
        }
        KeyCode::Home => {
            *cursor = 0;
        }
        KeyCode::End => {
            *cursor = input.chars().count();
        }
        KeyCode::Char(c) => {
            let byte_pos = char_to_byte_index(input, *cursor);
            input.insert(byte_pos, c);
            *cursor += 1;
        }
        _ => return false,
    }
    true
}

pub fn handle_event(app: &mut App, event: AppEvent) {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => app.tick(),
        AppEvent::Backend(event) => app.handle_backend_event(event),
    }
}

fn handle_key(app: &mut App, key: KeyEvent) {
    // Global keys that work in any mode
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return;
    }

    if app.show_settings {
        handle_settings_key(app, key);
        return;
    }

    match app.input_mode {
        InputMode::Normal => handle_normal_mode(app, key),
        InputMode::Editing => handle_prompt_editing(app, key),
    }
}

fn handle_normal_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') => app.should_quit = true,
        KeyCode::Esc => app.banner = None,

        // Focus
        KeyCode::Tab => {
            app.focus = match app.focus {
                FocusPane::Agents => FocusPane::Prompt,
                FocusPane::Prompt => FocusPane::Transcript,
                FocusPane::Transcript => FocusPane::Agents,
            };
            if app.focus == FocusPane::Agents
                && app.roster_state.selected().is_none()
                && !app.registry.is_empty()
            {
                app.roster_state.select(Some(0));
            }
        }
        KeyCode::BackTab => {
            app.focus = match app.focus {
                FocusPane::Agents => FocusPane::Transcript,
                FocusPane::Prompt => FocusPane::Agents,
                FocusPane::Transcript => FocusPane::Prompt,
            };
        }

        // Half-page scroll
        KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.scroll_transcript_page_down();
        }
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.scroll_transcript_page_up();
        }

        // Navigation
        KeyCode::Char('j') | KeyCode::Down => match app.focus {
            FocusPane::Agents => app.roster_nav_down(),
            FocusPane::Transcript => app.scroll_transcript_down(),
            FocusPane::Prompt => {}
        },
        KeyCode::Char('k') | KeyCode::Up => match app.focus {
            FocusPane::Agents => app.roster_nav_up(),
            FocusPane::Transcript => app.scroll_transcript_up(),
            FocusPane::Prompt => {}
        },
        KeyCode::Char('J') if app.focus == FocusPane::Agents => app.move_selected_agent(1),
        KeyCode::Char('K') if app.focus == FocusPane::Agents => app.move_selected_agent(-1),

        KeyCode::Char(' ') if app.focus == FocusPane::Agents => app.toggle_selected_agent(),
        KeyCode::Enter | KeyCode::Char('i') => match app.focus {
            FocusPane::Agents => app.toggle_selected_agent(),
            FocusPane::Prompt => {
                app.prompt_cursor = app.prompt_input.chars().count();
                app.input_mode = InputMode::Editing;
            }
            FocusPane::Transcript => {}
        },

        // Run controls
        KeyCode::F(5) | KeyCode::Char('s') => app.start_conversation(),
        KeyCode::Char('m') => app.clear_memory(),
        KeyCode::Char('a') => app.cycle_api(),
        KeyCode::Char('+') | KeyCode::Char('=') => app.increase_turns(),
        KeyCode::Char('-') => app.decrease_turns(),
        KeyCode::Char('r') => app.load_agents(),

        KeyCode::Char('S') | KeyCode::Char(',') => app.open_settings(),
        _ => {}
    }
}

fn handle_prompt_editing(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.input_mode = InputMode::Normal;
        }
        KeyCode::Enter if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.input_mode = InputMode::Normal;
            app.start_conversation();
        }
        KeyCode::F(5) => {
            app.input_mode = InputMode::Normal;
            app.start_conversation();
        }
        KeyCode::Enter => {
            let byte_pos = char_to_byte_index(&app.prompt_input, app.prompt_cursor);
            app.prompt_input.insert(byte_pos, '\n');
            app.prompt_cursor += 1;
        }
        _ => {
            edit_text(&mut app.prompt_input, &mut app.prompt_cursor, key);
        }
    }
}

fn handle_settings_key(app: &mut App, key: KeyEvent) {
    if app.show_reset_confirm {
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => app.confirm_reset(true),
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => app.confirm_reset(false),
            _ => {}
        }
        return;
    }

    let form = &mut app.settings_form;
    if form.editing {
        match key.code {
            KeyCode::Enter => form.commit_edit(),
            KeyCode::Esc => form.cancel_edit(),
            _ => {
                edit_text(&mut form.input, &mut form.cursor, key);
            }
        }
        return;
    }

    match key.code {
        KeyCode::Esc | KeyCode::Char('q') => app.close_settings(),
        KeyCode::Char('j') | KeyCode::Down => app.settings_form.nav_down(),
        KeyCode::Char('k') | KeyCode::Up => app.settings_form.nav_up(),
        KeyCode::Enter | KeyCode::Char('e') => app.settings_form.begin_edit(),
        KeyCode::Char('w') => app.save_settings(),
        KeyCode::Char('t') => app.test_selected_provider(),
        KeyCode::Char('R') => app.request_reset(),
        _ => {}
    }
}

fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    if app.show_settings {
        return;
    }

    let x = mouse.column;
    let y = mouse.row;

    let in_roster = app.roster_area.map(|r| point_in_rect(x, y, r)).unwrap_or(false);
    let in_prompt = app.prompt_area.map(|r| point_in_rect(x, y, r)).unwrap_or(false);
    let in_transcript = app.transcript_area.map(|r| point_in_rect(x, y, r)).unwrap_or(false);

    match mouse.kind {
        MouseEventKind::ScrollDown => {
            if in_transcript {
                for _ in 0..3 {
                    app.scroll_transcript_down();
                }
            } else if in_roster {
                app.roster_nav_down();
            }
        }
        MouseEventKind::ScrollUp => {
            if in_transcript {
                for _ in 0..3 {
                    app.scroll_transcript_up();
                }
            } else if in_roster {
                app.roster_nav_up();
            }
        }
        MouseEventKind::Down(_) => {
            if in_roster {
                app.focus = FocusPane::Agents;
            } else if in_prompt {
                app.focus = FocusPane::Prompt;
            } else if in_transcript {
                app.focus = FocusPane::Transcript;
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::BannerKind;
    use crate::tui::BackendEvent;
    use parley_core::{AgentDescriptor, AgentRegistry, HttpBackend, KeyValueStore, MemoryStore, Provider, SettingsField};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn app() -> App {
        let (tx, _rx) = mpsc::unbounded_channel();
        let backend = Arc::new(HttpBackend::new("http://127.0.0.1:9").unwrap());
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        App::new(backend, store, tx)
    }

    fn press(app: &mut App, code: KeyCode) {
        handle_event(app, AppEvent::Key(KeyEvent::new(code, KeyModifiers::NONE)));
    }

    fn type_str(app: &mut App, text: &str) {
        for c in text.chars() {
            press(app, KeyCode::Char(c));
        }
    }

    #[test]
    fn char_to_byte_index_handles_multibyte() {
        let s = "héllo";
        assert_eq!(char_to_byte_index(s, 0), 0);
        assert_eq!(char_to_byte_index(s, 2), 3);
        assert_eq!(char_to_byte_index(s, 10), s.len());
    }

    #[test]
    fn ctrl_c_quits_from_anywhere() {
        let mut app = app();
        app.open_settings();
        handle_event(
            &mut app,
            AppEvent::Key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
        );
        assert!(app.should_quit);
    }

    #[test]
    fn prompt_editing_inserts_and_deletes() {
        let mut app = app();
        app.focus = FocusPane::Prompt;
        press(&mut app, KeyCode::Enter);
        assert_eq!(app.input_mode, InputMode::Editing);

        type_str(&mut app, "Tavern at dusk");
        press(&mut app, KeyCode::Backspace);
        press(&mut app, KeyCode::Home);
        press(&mut app, KeyCode::Delete);
        assert_eq!(app.prompt_input, "avern at dus");

        press(&mut app, KeyCode::Esc);
        assert_eq!(app.input_mode, InputMode::Normal);
    }

    #[test]
    fn start_from_prompt_without_agents_reports_error() {
        let mut app = app();
        app.focus = FocusPane::Prompt;
        press(&mut app, KeyCode::Enter);
        type_str(&mut app, "hello");
        press(&mut app, KeyCode::Enter);
        type_str(&mut app, "world");
        assert_eq!(app.prompt_input, "hello\nworld");
        assert_eq!(app.input_mode, InputMode::Editing);

        handle_event(
            &mut app,
            AppEvent::Key(KeyEvent::new(KeyCode::Enter, KeyModifiers::CONTROL)),
        );

        assert_eq!(app.input_mode, InputMode::Normal);
        let banner = app.banner.as_ref().unwrap();
        assert_eq!(banner.kind, BannerKind::Error);
        assert_eq!(banner.message, "Please select at least 2 agents for a conversation");
    }

    #[test]
    fn space_toggles_focused_agent() {
        let mut app = app();
        let mut registry = AgentRegistry::new();
        registry.render(vec![AgentDescriptor::new("Alice"), AgentDescriptor::new("Bob")]);
        app.handle_backend_event(BackendEvent::AgentsLoaded(Ok(registry)));

        app.focus = FocusPane::Transcript;
        press(&mut app, KeyCode::Tab);
        assert_eq!(app.focus, FocusPane::Agents);

        // Everyone starts checked
        press(&mut app, KeyCode::Char(' '));
        assert_eq!(app.registry.selected(), vec!["Bob"]);
        press(&mut app, KeyCode::Char(' '));
        assert_eq!(app.registry.selected(), vec!["Alice", "Bob"]);

        press(&mut app, KeyCode::Char('j'));
        press(&mut app, KeyCode::Char(' '));
        assert_eq!(app.registry.selected(), vec!["Alice"]);
    }

    #[test]
    fn run_control_keys() {
        let mut app = app();
        let turns = app.turns;
        press(&mut app, KeyCode::Char('+'));
        assert_eq!(app.turns, turns + 1);
        press(&mut app, KeyCode::Char('-'));
        assert_eq!(app.turns, turns);

        assert_eq!(app.api, Provider::Ollama);
        press(&mut app, KeyCode::Char('a'));
        assert_eq!(app.api, Provider::OpenAI);
    }

    #[test]
    fn settings_modal_edit_and_save() {
        let mut app = app();
        press(&mut app, KeyCode::Char('S'));
        assert!(app.show_settings);

        press(&mut app, KeyCode::Char('j'));
        assert_eq!(app.settings_form.selected_field(), SettingsField::OllamaModel);
        press(&mut app, KeyCode::Enter);
        assert!(app.settings_form.editing);

        for _ in 0.."mythomax:latest".len() {
            press(&mut app, KeyCode::Backspace);
        }
        type_str(&mut app, "qwen2.5");
        press(&mut app, KeyCode::Enter);
        assert!(!app.settings_form.editing);

        // 'q' while not editing closes; save first
        press(&mut app, KeyCode::Char('w'));
        assert_eq!(app.settings.ollama_model, "qwen2.5");
        press(&mut app, KeyCode::Char('q'));
        assert!(!app.show_settings);
    }

    #[test]
    fn reset_waits_for_answer() {
        let mut app = app();
        press(&mut app, KeyCode::Char(','));
        app.settings_form.draft.ollama_model = "custom".to_string();
        press(&mut app, KeyCode::Char('w'));

        press(&mut app, KeyCode::Char('R'));
        assert!(app.show_reset_confirm);
        press(&mut app, KeyCode::Char('x'));
        assert!(app.show_reset_confirm);
        press(&mut app, KeyCode::Char('n'));
        assert!(!app.show_reset_confirm);
        assert_eq!(app.settings.ollama_model, "custom");

        press(&mut app, KeyCode::Char('R'));
        press(&mut app, KeyCode::Char('y'));
        assert_eq!(app.settings.ollama_model, "mythomax:latest");
    }
}
