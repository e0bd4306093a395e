use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};

/// Render untrusted markdown into styled terminal lines. Pure and
/// deterministic; never fails — anything the parser cannot make sense of
/// falls through as plain text. Raw HTML in the input (the agent's output is
/// attacker-controlled) is shown as literal text, never interpreted.
pub fn render(text: &str) -> Vec<Line<'static>> {
    let mut renderer = Renderer::new();
    let parser = Parser::new_ext(text, Options::ENABLE_STRIKETHROUGH);
    for event in parser {
        renderer.process(event);
    }
    renderer.flush_line();
    if renderer.lines.is_empty() && !text.is_empty() {
        renderer.lines.push(Line::from(text.to_string()));
    }
    renderer.lines
}

fn base_style() -> Style {
    Style::default()
}

fn heading_style() -> Style {
    Style::default()
        .fg(Color::Green)
        .add_modifier(Modifier::BOLD)
}

fn code_style() -> Style {
    Style::default().fg(Color::Magenta)
}

fn chrome_style() -> Style {
    Style::default().fg(Color::DarkGray)
}

struct Renderer {
    lines: Vec<Line<'static>>,
    spans: Vec<Span<'static>>,
    style_stack: Vec<Style>,
    in_code_block: bool,
    in_item: bool,
}

impl Renderer {
    fn new() -> Self {
        Self {
            lines: Vec::new(),
            spans: Vec::new(),
            style_stack: vec![base_style()],
            in_code_block: false,
            in_item: false,
        }
    }

    fn current_style(&self) -> Style {
        self.style_stack.last().copied().unwrap_or_else(base_style)
    }

    fn push_style(&mut self, style: Style) {
        self.style_stack.push(style);
    }

    fn pop_style(&mut self) {
        if self.style_stack.len() > 1 {
            self.style_stack.pop();
        }
    }

    fn flush_line(&mut self) {
        if !self.spans.is_empty() {
            let spans = std::mem::take(&mut self.spans);
            self.lines.push(Line::from(spans));
        }
    }

    fn blank_line(&mut self) {
        self.lines.push(Line::from(""));
    }

    fn push_text(&mut self, text: &str) {
        if self.in_code_block {
            for line in text.lines() {
                self.lines.push(Line::from(vec![
                    Span::styled("\u{2502} ", chrome_style()),
                    Span::styled(line.to_string(), code_style()),
                ]));
            }
        } else if self.in_item && self.spans.is_empty() {
            self.spans
                .push(Span::styled("  \u{2022} ", self.current_style()));
            self.spans
                .push(Span::styled(text.to_string(), self.current_style()));
        } else {
            self.spans
                .push(Span::styled(text.to_string(), self.current_style()));
        }
    }

    fn process(&mut self, event: Event<'_>) {
        match event {
            Event::Start(Tag::Heading { .. }) => {
                self.flush_line();
                self.push_style(heading_style());
            }
            Event::End(TagEnd::Heading(_)) => {
                self.flush_line();
                self.pop_style();
                self.blank_line();
            }

            Event::Start(Tag::Paragraph) => {}
            Event::End(TagEnd::Paragraph) => {
                self.flush_line();
                self.blank_line();
            }

            Event::Start(Tag::Strong) => {
                let base = self.current_style();
                self.push_style(base.add_modifier(Modifier::BOLD));
            }
            Event::End(TagEnd::Strong) => self.pop_style(),
            Event::Start(Tag::Emphasis) => {
                let base = self.current_style();
                self.push_style(base.add_modifier(Modifier::ITALIC));
            }
            Event::End(TagEnd::Emphasis) => self.pop_style(),

            Event::Start(Tag::Link { .. }) => {
                let base = self.current_style();
                self.push_style(base.add_modifier(Modifier::UNDERLINED));
            }
            Event::End(TagEnd::Link) => self.pop_style(),

            Event::Code(code) => {
                self.spans
                    .push(Span::styled(code.to_string(), code_style()));
            }

            Event::Start(Tag::CodeBlock(_)) => {
                self.flush_line();
                self.in_code_block = true;
            }
            Event::End(TagEnd::CodeBlock) => {
                self.in_code_block = false;
                self.blank_line();
            }

            Event::Start(Tag::List(_)) => {}
            Event::End(TagEnd::List(_)) => self.blank_line(),
            Event::Start(Tag::Item) => {
                self.flush_line();
                self.in_item = true;
            }
            Event::End(TagEnd::Item) => {
                self.flush_line();
                self.in_item = false;
            }

            // Raw HTML is never interpreted; surface it as visible text so
            // nothing the agent emits can smuggle live markup through.
            Event::Html(html) | Event::InlineHtml(html) => {
                for line in html.lines() {
                    if !self.spans.is_empty() {
                        self.flush_line();
                    }
                    self.spans
                        .push(Span::styled(line.to_string(), chrome_style()));
                    self.flush_line();
                }
            }

            Event::Text(text) => self.push_text(&text),
            Event::SoftBreak => self.spans.push(Span::raw(" ")),
            Event::HardBreak => self.flush_line(),

            Event::Rule => {
                self.flush_line();
                self.lines.push(Line::from(Span::styled(
                    "\u{2500}".repeat(40),
                    chrome_style(),
                )));
                self.blank_line();
            }

            _ => {}
        }
    }
}
