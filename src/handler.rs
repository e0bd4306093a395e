use std::path::PathBuf;

use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tokio::sync::mpsc::UnboundedSender;

use crate::app::{App, Prompt};
use crate::attachment;
use crate::tui::AppEvent;

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub async fn handle_event(
    app: &mut App,
    event: AppEvent,
    tx: &UnboundedSender<AppEvent>,
) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key, tx).await?,
        AppEvent::Paste(text) => handle_paste(app, &text),
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => app.on_tick(),
        AppEvent::Stream(stream_event) => app.on_stream_event(stream_event),
    }
    Ok(())
}

async fn handle_key(app: &mut App, key: KeyEvent, tx: &UnboundedSender<AppEvent>) -> Result<()> {
    // Global keys that work in any prompt
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return Ok(());
    }

    match app.prompt {
        Prompt::Message => handle_message_key(app, key, tx),
        Prompt::AttachPath => handle_attach_key(app, key).await,
    }
    Ok(())
}

fn handle_message_key(app: &mut App, key: KeyEvent, tx: &UnboundedSender<AppEvent>) {
    match key.code {
        // Enter sends immediately; newlines are not part of the composer.
        KeyCode::Enter => app.submit(tx),

        // Attachment lifecycle
        KeyCode::Char('o') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.open_attach_prompt();
        }
        KeyCode::Char('x') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.clear_attachment();
        }

        // Chat scrolling
        KeyCode::Up => app.scroll_chat_up(1),
        KeyCode::Down => app.scroll_chat_down(1),
        KeyCode::PageUp => {
            let half = (app.chat_height / 2).max(1);
            app.scroll_chat_up(half);
        }
        KeyCode::PageDown => {
            let half = (app.chat_height / 2).max(1);
            app.scroll_chat_down(half);
        }

        KeyCode::Esc => {
            app.input.clear();
            app.cursor = 0;
        }

        _ => edit_line(&mut app.input, &mut app.cursor, key),
    }
}

async fn handle_attach_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => app.close_attach_prompt(),
        KeyCode::Enter => {
            let path = PathBuf::from(app.attach_input.trim());
            if path.as_os_str().is_empty() {
                app.close_attach_prompt();
                return;
            }
            match attachment::encode(&path).await {
                Ok(pending) => {
                    app.status = None;
                    app.pending_attachment = Some(pending);
                    app.close_attach_prompt();
                }
                Err(err) => {
                    app.status = Some(format!("{err:#}"));
                    app.close_attach_prompt();
                }
            }
        }
        _ => edit_line(&mut app.attach_input, &mut app.attach_cursor, key),
    }
}

fn handle_paste(app: &mut App, text: &str) {
    // Pasted newlines would otherwise submit or corrupt the single-line input
    let text: String = text.chars().filter(|c| *c != '\n' && *c != '\r').collect();
    match app.prompt {
        Prompt::Message => {
            let byte_pos = char_to_byte_index(&app.input, app.cursor);
            app.input.insert_str(byte_pos, &text);
            app.cursor += text.chars().count();
        }
        Prompt::AttachPath => {
            let byte_pos = char_to_byte_index(&app.attach_input, app.attach_cursor);
            app.attach_input.insert_str(byte_pos, &text);
            app.attach_cursor += text.chars().count();
        }
    }
}

/// Cursor-aware single-line editing shared by both prompts.
fn edit_line(input: &mut String, cursor: &mut usize, key: KeyEvent) {
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
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEvent;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn edit_line_inserts_at_cursor() {
        let mut input = "hllo".to_string();
        let mut cursor = 1;
        edit_line(&mut input, &mut cursor, key(KeyCode::Char('e')));
        assert_eq!(input, "hello");
        assert_eq!(cursor, 2);
    }

    #[test]
    fn edit_line_is_utf8_safe() {
        let mut input = "héllo".to_string();
        let mut cursor = 2;
        edit_line(&mut input, &mut cursor, key(KeyCode::Backspace));
        assert_eq!(input, "hllo");
        assert_eq!(cursor, 1);

        let mut cursor = 0;
        edit_line(&mut input, &mut cursor, key(KeyCode::End));
        assert_eq!(cursor, 4);
        edit_line(&mut input, &mut cursor, key(KeyCode::Delete));
        assert_eq!(input, "hllo");
    }

    #[test]
    fn cursor_stays_in_bounds() {
        let mut input = "ab".to_string();
        let mut cursor = 2;
        edit_line(&mut input, &mut cursor, key(KeyCode::Right));
        assert_eq!(cursor, 2);
        edit_line(&mut input, &mut cursor, key(KeyCode::Home));
        assert_eq!(cursor, 0);
        edit_line(&mut input, &mut cursor, key(KeyCode::Left));
        assert_eq!(cursor, 0);
    }

    #[test]
    fn paste_strips_newlines() {
        let mut app =
            crate::app::App::new(crate::client::AgentClient::new("http://x:1"), None, None);
        handle_paste(&mut app, "one\ntwo\r\nthree");
        assert_eq!(app.input, "onetwothree");
        assert_eq!(app.cursor, 11);
    }
}
