use ratatui::{
    Frame,
    layout::{Constraint, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph, Wrap},
};

use crate::app::{App, Prompt};
use crate::conversation::{Role, TurnState};
use crate::markdown;

pub fn draw(frame: &mut Frame, app: &mut App) {
    let [chat_area, status_area, input_area] = Layout::vertical([
        Constraint::Min(1),
        Constraint::Length(1),
        Constraint::Length(3),
    ])
    .areas(frame.area());

    // Store chat dimensions for scroll calculations (inner size minus borders)
    app.chat_height = chat_area.height.saturating_sub(2);
    app.chat_width = chat_area.width.saturating_sub(2);

    render_chat(frame, app, chat_area);
    render_status(frame, app, status_area);
    render_input(frame, app, input_area);
}

fn render_chat(frame: &mut Frame, app: &App, area: ratatui::layout::Rect) {
    let title = match &app.model {
        Some(model) => format!(" {} \u{2014} {} ", app.client.base_url(), model),
        None => format!(" {} ", app.client.base_url()),
    };
    let chat_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(title);

    let chat_text = if app.conversation.is_empty() && !app.busy {
        Text::from(Span::styled(
            "Ask the agent anything...",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        Text::from(chat_lines(app))
    };

    let chat = Paragraph::new(chat_text)
        .block(chat_block)
        .wrap(Wrap { trim: false })
        .scroll((app.chat_scroll, 0));

    frame.render_widget(chat, area);
}

/// The chat transcript exactly as drawn. `App` runs its scroll math over the
/// same lines, so the height estimate cannot drift from the render.
pub fn chat_lines(app: &App) -> Vec<Line<'static>> {
    let mut lines: Vec<Line<'static>> = Vec::new();

    for turn in app.conversation.turns() {
        match turn.role {
            Role::User => {
                lines.push(Line::from(Span::styled(
                    "You:",
                    Style::default()
                        .fg(Color::Cyan)
                        .add_modifier(Modifier::BOLD),
                )));
                for line in turn.content.lines() {
                    lines.push(Line::from(line.to_string()));
                }
                if turn.attachment.is_some() {
                    lines.push(Line::from(Span::styled(
                        "[image attached]",
                        Style::default().fg(Color::DarkGray),
                    )));
                }
                lines.push(Line::default());
            }
            Role::Assistant => {
                let header_color = if turn.state == TurnState::ClosedWithError {
                    Color::Red
                } else {
                    Color::Yellow
                };
                lines.push(Line::from(Span::styled(
                    "Agent:",
                    Style::default()
                        .fg(header_color)
                        .add_modifier(Modifier::BOLD),
                )));
                lines.extend(markdown::render(&turn.content));
                if turn.is_open() && app.busy {
                    // Animated ellipsis: cycles through ".", "..", "..."
                    let dots = ".".repeat((app.animation_frame as usize) + 1);
                    lines.push(Line::from(Span::styled(
                        format!("Thinking{dots}"),
                        Style::default()
                            .fg(Color::DarkGray)
                            .add_modifier(Modifier::ITALIC),
                    )));
                }
                lines.push(Line::default());
            }
            Role::System => {
                lines.push(Line::from(Span::styled(
                    "System:",
                    Style::default()
                        .fg(Color::Magenta)
                        .add_modifier(Modifier::BOLD),
                )));
                for line in turn.content.lines() {
                    lines.push(Line::from(Span::styled(
                        line.to_string(),
                        Style::default().fg(Color::DarkGray),
                    )));
                }
                lines.push(Line::default());
            }
        }
    }

    lines
}

/// Greedy word-wrap height of one line at `width` columns, mirroring how the
/// chat `Paragraph` wraps: break at whitespace, hard-break words wider than
/// the viewport. A plain character count undercounts whenever a word is
/// carried whole onto the next row.
pub fn wrapped_height(line: &Line<'_>, width: usize) -> usize {
    if width == 0 {
        return 1;
    }
    let text: String = line.spans.iter().map(|s| s.content.as_ref()).collect();
    if text.trim().is_empty() {
        return 1;
    }

    let mut rows = 1usize;
    let mut col = 0usize;
    for word in text.split_whitespace() {
        let len = word.chars().count();
        let needed = if col == 0 { len } else { len + 1 };
        if col + needed <= width {
            col += needed;
        } else if len <= width {
            rows += 1;
            col = len;
        } else {
            // Word wider than the viewport: fill whole rows, keep the rest.
            let mut remaining = len;
            if col > 0 {
                rows += 1;
            }
            while remaining > width {
                rows += 1;
                remaining -= width;
            }
            col = remaining;
        }
    }
    rows
}

fn render_status(frame: &mut Frame, app: &App, area: ratatui::layout::Rect) {
    let mut spans: Vec<Span> = Vec::new();

    if app.busy {
        spans.push(Span::styled(
            " streaming ",
            Style::default()
                .fg(Color::Black)
                .bg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ));
    } else {
        spans.push(Span::styled(
            " ready ",
            Style::default().fg(Color::Black).bg(Color::Green),
        ));
    }

    if let Some(pending) = &app.pending_attachment {
        spans.push(Span::raw(" "));
        spans.push(Span::styled(
            format!("\u{1f4ce} {}", pending.file_name),
            Style::default().fg(Color::Cyan),
        ));
        spans.push(Span::styled(
            " (Ctrl+X to remove)",
            Style::default().fg(Color::DarkGray),
        ));
    }

    if let Some(status) = &app.status {
        spans.push(Span::raw(" "));
        spans.push(Span::styled(
            status.clone(),
            Style::default().fg(Color::Red),
        ));
    } else {
        spans.push(Span::styled(
            "  Enter send \u{2022} Ctrl+O attach \u{2022} \u{2191}\u{2193} scroll \u{2022} Ctrl+C quit",
            Style::default().fg(Color::DarkGray),
        ));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_input(frame: &mut Frame, app: &App, area: ratatui::layout::Rect) {
    let (text, cursor_pos, title, border_color) = match app.prompt {
        Prompt::Message => {
            let title = if app.pending_attachment.is_some() {
                " Message (+ image) "
            } else {
                " Message "
            };
            (&app.input, app.cursor, title, Color::Yellow)
        }
        Prompt::AttachPath => (
            &app.attach_input,
            app.attach_cursor,
            " Image path (Enter to attach, Esc to cancel) ",
            Color::Cyan,
        ),
    };

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    // Horizontal scrolling: keep the cursor inside the inner width
    let inner_width = area.width.saturating_sub(2) as usize;
    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    let visible_text: String = text.chars().skip(scroll_offset).take(inner_width).collect();

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(input_block);

    frame.render_widget(input, area);

    let cursor_x = (cursor_pos - scroll_offset) as u16;
    frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::AgentClient;
    use crate::conversation::Turn;

    #[test]
    fn word_wrap_height_exceeds_the_character_count() {
        // 14 chars at width 7: a character count says 2 rows, but wrapping
        // at word boundaries needs 3.
        let line = Line::from("abcd efgh ijkl");
        assert_eq!(wrapped_height(&line, 7), 3);
        assert_eq!(wrapped_height(&line, 14), 1);
    }

    #[test]
    fn blank_and_overlong_lines_wrap_sanely() {
        assert_eq!(wrapped_height(&Line::default(), 10), 1);
        assert_eq!(wrapped_height(&Line::from("abcdefghij"), 4), 3);
        assert_eq!(wrapped_height(&Line::from("x abcdefghij"), 4), 4);
        assert_eq!(wrapped_height(&Line::from("hi"), 0), 1);
    }

    #[test]
    fn chat_lines_cover_the_whole_transcript() {
        let mut app = App::new(AgentClient::new("http://127.0.0.1:1"), None, None);
        app.conversation
            .push_exchange(Turn::user("hi".to_string(), None));
        app.conversation.append_fragment("hello").unwrap();
        app.conversation.close_open_turn().unwrap();

        let lines = chat_lines(&app);
        let text: String = lines
            .iter()
            .flat_map(|l| l.spans.iter())
            .map(|s| s.content.as_ref())
            .collect();
        assert!(text.contains("You:"));
        assert!(text.contains("hi"));
        assert!(text.contains("Agent:"));
        assert!(text.contains("hello"));
    }
}
