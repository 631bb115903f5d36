use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
};

use crate::core::api::{MessageStatus, Role};
use crate::core::session::{ChatMessage, StreamPhase, ViewState};

use super::{COMMANDS, CliInterface, CommandInfo};

const SPINNER: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

impl CliInterface {
    pub(super) fn prompt_label(&self) -> String {
        let mut flags = Vec::new();
        if self.options.thinking {
            flags.push("think".to_string());
        }
        if let Some(label) = self.retrieval_label() {
            flags.push(label);
        }
        if let Some(model) = self.coordinator.model_override() {
            flags.push(model);
        }
        if flags.is_empty() {
            "> ".to_string()
        } else {
            format!("[{}] > ", flags.join(" "))
        }
    }

    pub(super) fn render_messages(
        &self,
        view: &ViewState,
        title: &str,
        area: Rect,
    ) -> (Paragraph<'static>, u16) {
        let mut lines: Vec<Line<'static>> = Vec::new();

        for msg in &view.messages {
            render_message(msg, &mut lines);
            lines.push(Line::from("")); // spacing between messages
        }

        match view.phase {
            StreamPhase::AwaitingJob | StreamPhase::Streaming => {
                let frame = SPINNER[self.spinner_tick % SPINNER.len()];
                let label = match (&self.queue, view.phase) {
                    (Some(queue), StreamPhase::AwaitingJob) if queue.pending_count > 0 => {
                        format!("Queued ({} waiting)...", queue.pending_count)
                    }
                    (_, StreamPhase::AwaitingJob) => "Waiting for the model...".to_string(),
                    _ => "Generating...".to_string(),
                };
                lines.push(Line::from(vec![
                    Span::raw("  "),
                    Span::styled(
                        format!("{} {}", frame, label),
                        Style::default().fg(Color::Yellow),
                    ),
                ]));
            }
            _ => {}
        }
        if let Some(error) = &view.error {
            lines.push(Line::from(Span::styled(
                format!("  ! {}", error),
                Style::default().fg(Color::Red),
            )));
        }

        let total_lines = lines.len() as u16;
        let visible_height = area.height.saturating_sub(2); // borders
        let max_scroll = total_lines.saturating_sub(visible_height);
        let scroll = if self.scroll_offset == u16::MAX {
            max_scroll
        } else {
            self.scroll_offset.min(max_scroll)
        };

        let queue_note = match &self.queue {
            Some(queue) if queue.pending_count > 0 => format!(" · {} queued", queue.pending_count),
            _ => String::new(),
        };
        let paragraph = Paragraph::new(lines)
            .block(
                Block::default()
                    .title(format!(" convoy [{}]{} ", title, queue_note))
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::DarkGray)),
            )
            .wrap(Wrap { trim: false })
            .scroll((scroll, 0));

        (paragraph, max_scroll)
    }

    pub(super) fn render_cmd_output(&self) -> Paragraph<'_> {
        let lines: Vec<Line> = self
            .cmd_output_lines
            .iter()
            .map(|l| {
                Line::from(vec![
                    Span::raw("  "),
                    Span::styled(l.as_str(), Style::default().fg(Color::Cyan)),
                ])
            })
            .collect();

        Paragraph::new(lines)
            .block(
                Block::default()
                    .title(" Command Output (Esc to dismiss) ")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::Magenta)),
            )
            .wrap(Wrap { trim: false })
    }

    pub(super) fn render_activity(&self, area: Rect) -> Paragraph<'_> {
        let visible = area.height.saturating_sub(2) as usize;
        let start = self.activity_lines.len().saturating_sub(visible);
        let lines: Vec<Line> = self.activity_lines[start..]
            .iter()
            .map(|l| Line::from(Span::styled(l.as_str(), Style::default().fg(Color::DarkGray))))
            .collect();
        Paragraph::new(lines).block(
            Block::default()
                .title(" Activity ")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::DarkGray)),
        )
    }

    pub(super) fn render_autocomplete(&self, input_area: Rect) -> (Paragraph<'_>, Rect) {
        let num_items = self.autocomplete_candidates.len() as u16;
        let popup_height = num_items + 2; // +2 for borders
        let popup_width = 52;

        let popup_area = Rect {
            x: input_area.x + 1,
            y: input_area.y.saturating_sub(popup_height),
            width: popup_width.min(input_area.width.saturating_sub(2)),
            height: popup_height,
        };

        let lines: Vec<Line> = self
            .autocomplete_candidates
            .iter()
            .enumerate()
            .map(|(i, &cmd_idx)| {
                let cmd: &CommandInfo = &COMMANDS[cmd_idx];
                let is_selected = i == self.autocomplete_selected;
                let style = if is_selected {
                    Style::default()
                        .fg(Color::Black)
                        .bg(Color::Cyan)
                        .add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(Color::White)
                };
                let desc_style = if is_selected {
                    Style::default().fg(Color::DarkGray).bg(Color::Cyan)
                } else {
                    Style::default().fg(Color::DarkGray)
                };
                Line::from(vec![
                    Span::styled(format!(" {:<10}", cmd.name), style),
                    Span::styled(format!(" {}", cmd.description), desc_style),
                ])
            })
            .collect();

        let widget = Paragraph::new(lines).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan)),
        );

        (widget, popup_area)
    }
}

fn render_message(msg: &ChatMessage, lines: &mut Vec<Line<'static>>) {
    let (prefix, prefix_style, content_style) = match msg.role {
        Role::User => (
            "  > ",
            Style::default().fg(Color::Cyan),
            Style::default().fg(Color::White),
        ),
        Role::Assistant => (
            "  ",
            Style::default().fg(Color::Green),
            Style::default().fg(Color::Green),
        ),
        Role::System => (
            "  ",
            Style::default().fg(Color::DarkGray),
            Style::default().fg(Color::DarkGray),
        ),
    };
    let dim = Style::default().fg(Color::DarkGray);

    if !msg.matched_spaces.is_empty() {
        let names: Vec<&str> = msg.matched_spaces.iter().map(|s| s.name.as_str()).collect();
        lines.push(Line::from(Span::styled(
            format!("  ⌕ searched {}", names.join(", ")),
            dim,
        )));
    }
    if msg.has_thinking {
        if msg.thinking_collapsed {
            lines.push(Line::from(Span::styled(
                format!("  ▸ thought ({} chars)", msg.thinking.chars().count()),
                dim,
            )));
        } else {
            for text_line in msg.thinking.lines() {
                lines.push(Line::from(Span::styled(
                    format!("  │ {}", text_line),
                    dim.add_modifier(Modifier::ITALIC),
                )));
            }
        }
    }

    for text_line in msg.content.lines() {
        let mut spans = vec![Span::styled(prefix, prefix_style)];
        spans.extend(parse_inline_markdown(text_line, content_style));
        lines.push(Line::from(spans));
    }

    if !msg.sources.is_empty() {
        if msg.sources_collapsed {
            lines.push(Line::from(Span::styled(
                format!("  ▸ {} sources", msg.sources.len()),
                dim,
            )));
        } else {
            for source in &msg.sources {
                lines.push(Line::from(Span::styled(format!("  • {}", source.title), dim)));
            }
        }
    }
    if msg.status == MessageStatus::Error
        && let Some(error) = &msg.error
    {
        lines.push(Line::from(Span::styled(
            format!("  ✗ {}", error),
            Style::default().fg(Color::Red),
        )));
    }
}

/// Parse basic inline markdown: **bold**, `code`
pub(super) fn parse_inline_markdown(text: &str, base_style: Style) -> Vec<Span<'static>> {
    let mut spans = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if let Some(pos) = remaining.find("**") {
            if pos > 0 {
                spans.push(Span::styled(remaining[..pos].to_string(), base_style));
            }
            let after = &remaining[pos + 2..];
            if let Some(end) = after.find("**") {
                spans.push(Span::styled(
                    after[..end].to_string(),
                    base_style.add_modifier(Modifier::BOLD),
                ));
                remaining = &after[end + 2..];
            } else {
                spans.push(Span::styled(remaining[pos..].to_string(), base_style));
                break;
            }
        } else if let Some(pos) = remaining.find('`') {
            if pos > 0 {
                spans.push(Span::styled(remaining[..pos].to_string(), base_style));
            }
            let after = &remaining[pos + 1..];
            if let Some(end) = after.find('`') {
                spans.push(Span::styled(
                    after[..end].to_string(),
                    Style::default().fg(Color::Yellow),
                ));
                remaining = &after[end + 1..];
            } else {
                spans.push(Span::styled(remaining[pos..].to_string(), base_style));
                break;
            }
        } else {
            spans.push(Span::styled(remaining.to_string(), base_style));
            break;
        }
    }

    if spans.is_empty() {
        spans.push(Span::styled(String::new(), base_style));
    }

    spans
}
