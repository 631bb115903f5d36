use anyhow::Result;
use crossterm::{
    event::{
        self, DisableBracketedPaste, DisableMouseCapture, EnableBracketedPaste, EnableMouseCapture,
        Event, KeyCode, KeyModifiers,
    },
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Terminal,
    backend::Backend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Style},
    widgets::{Block, Borders, Clear, Paragraph},
};
use std::{io, time::Duration};

use super::CliInterface;

/// Longer input (usually a paste) is shown as a placeholder so it cannot
/// overflow the input line.
const PASTE_DISPLAY_THRESHOLD: usize = 100;
const ACTIVITY_HEIGHT: u16 = 5;

impl CliInterface {
    pub async fn run_tui(&mut self) -> Result<()> {
        self.scroll_to_bottom();

        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(
            stdout,
            EnterAlternateScreen,
            EnableMouseCapture,
            EnableBracketedPaste
        )?;
        let backend = ratatui::backend::CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let res = self.run_app(&mut terminal).await;

        disable_raw_mode()?;
        execute!(
            terminal.backend_mut(),
            LeaveAlternateScreen,
            DisableMouseCapture,
            DisableBracketedPaste
        )?;
        terminal.show_cursor()?;

        res
    }

    async fn run_app<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<()>
    where
        <B as Backend>::Error: std::error::Error + Send + Sync + 'static,
    {
        loop {
            if self.should_quit {
                return Ok(());
            }

            self.drain_events();

            let view = self.coordinator.view();
            let busy = view.phase.is_busy();
            if busy {
                self.spinner_tick = self.spinner_tick.wrapping_add(1);
            }

            let input_buf = self.input_buffer.clone();
            let cursor_pos = self.cursor_pos;
            let cmd_output_visible = self.cmd_output_visible;
            let activity_visible = !self.activity_lines.is_empty();
            let autocomplete_visible = self.autocomplete_visible;
            let title = self.focused_title();

            terminal.draw(|f| {
                let mut constraints = vec![Constraint::Min(1)];
                if cmd_output_visible {
                    let output_height = (self.cmd_output_lines.len() as u16 + 2).min(12);
                    constraints.push(Constraint::Length(output_height));
                }
                if activity_visible {
                    constraints.push(Constraint::Length(ACTIVITY_HEIGHT));
                }
                constraints.push(Constraint::Length(3));

                let chunks = Layout::default()
                    .direction(Direction::Vertical)
                    .constraints(constraints)
                    .split(f.area());

                let mut next = 1;
                let cmd_idx = cmd_output_visible.then(|| {
                    next += 1;
                    next - 1
                });
                let activity_idx = activity_visible.then(|| {
                    next += 1;
                    next - 1
                });
                let input_idx = next;

                let (chat_widget, _max_scroll) =
                    self.render_messages(&view, &title, chunks[0]);
                f.render_widget(chat_widget, chunks[0]);

                if let Some(idx) = cmd_idx {
                    f.render_widget(self.render_cmd_output(), chunks[idx]);
                }
                if let Some(idx) = activity_idx {
                    f.render_widget(self.render_activity(chunks[idx]), chunks[idx]);
                }

                let prompt_label = self.prompt_label();
                let displayed_input = if input_buf.len() > PASTE_DISPLAY_THRESHOLD {
                    format!("[Pasted content - {} chars]", input_buf.chars().count())
                } else {
                    input_buf.clone()
                };
                let input_text = format!("{}{}", prompt_label, displayed_input);
                let input_style = if busy {
                    Style::default().fg(Color::DarkGray)
                } else {
                    Style::default().fg(Color::White)
                };
                let input_widget = Paragraph::new(input_text)
                    .block(
                        Block::default()
                            .borders(Borders::ALL)
                            .border_style(Style::default().fg(Color::DarkGray)),
                    )
                    .style(input_style);
                f.render_widget(input_widget, chunks[input_idx]);

                if autocomplete_visible && !self.autocomplete_candidates.is_empty() {
                    let (popup_widget, popup_area) = self.render_autocomplete(chunks[input_idx]);
                    f.render_widget(Clear, popup_area);
                    f.render_widget(popup_widget, popup_area);
                }

                let cursor_display_len = if input_buf.len() > PASTE_DISPLAY_THRESHOLD {
                    displayed_input.chars().count()
                } else {
                    input_buf[..cursor_pos].chars().count()
                };
                let cursor_x = chunks[input_idx].x
                    + 1
                    + prompt_label.chars().count() as u16
                    + cursor_display_len as u16;
                let cursor_y = chunks[input_idx].y + 1;
                f.set_cursor_position((cursor_x, cursor_y));
            })?;

            // Short poll keeps the spinner moving
            if crossterm::event::poll(Duration::from_millis(80))? {
                match event::read()? {
                    Event::Key(key) => {
                        if key.modifiers.contains(KeyModifiers::CONTROL)
                            && key.code == KeyCode::Char('c')
                        {
                            self.should_quit = true;
                            continue;
                        }

                        match key.code {
                            KeyCode::Enter => {
                                if self.autocomplete_visible {
                                    self.accept_autocomplete();
                                } else if !self.input_buffer.trim().is_empty() {
                                    self.submit_input().await;
                                }
                            }
                            KeyCode::Tab => {
                                if self.autocomplete_visible {
                                    self.accept_autocomplete();
                                }
                            }
                            KeyCode::Backspace => {
                                if let Some(c) = self.input_buffer[..self.cursor_pos].chars().last()
                                {
                                    self.cursor_pos -= c.len_utf8();
                                    self.input_buffer.remove(self.cursor_pos);
                                    self.update_autocomplete();
                                }
                            }
                            KeyCode::Delete => {
                                if self.cursor_pos < self.input_buffer.len() {
                                    self.input_buffer.remove(self.cursor_pos);
                                    self.update_autocomplete();
                                }
                            }
                            KeyCode::Left => {
                                if let Some(c) = self.input_buffer[..self.cursor_pos].chars().last()
                                {
                                    self.cursor_pos -= c.len_utf8();
                                }
                            }
                            KeyCode::Right => {
                                if let Some(c) = self.input_buffer[self.cursor_pos..].chars().next()
                                {
                                    self.cursor_pos += c.len_utf8();
                                }
                            }
                            KeyCode::Up => {
                                if self.autocomplete_visible {
                                    self.autocomplete_selected =
                                        self.autocomplete_selected.saturating_sub(1);
                                } else {
                                    self.scroll_up(3, view.messages.len());
                                }
                            }
                            KeyCode::Down => {
                                if self.autocomplete_visible {
                                    if self.autocomplete_selected + 1
                                        < self.autocomplete_candidates.len()
                                    {
                                        self.autocomplete_selected += 1;
                                    }
                                } else if self.scroll_offset != u16::MAX {
                                    self.scroll_offset = self.scroll_offset.saturating_add(3);
                                }
                            }
                            KeyCode::Home => {
                                self.cursor_pos = 0;
                            }
                            KeyCode::End => {
                                self.cursor_pos = self.input_buffer.len();
                            }
                            KeyCode::Esc => {
                                if self.autocomplete_visible {
                                    self.autocomplete_visible = false;
                                    self.autocomplete_candidates.clear();
                                } else if self.cmd_output_visible {
                                    self.cmd_output_visible = false;
                                    self.cmd_output_lines.clear();
                                } else {
                                    self.input_buffer.clear();
                                    self.cursor_pos = 0;
                                }
                            }
                            KeyCode::PageUp => {
                                self.scroll_up(10, view.messages.len());
                            }
                            KeyCode::PageDown => {
                                if self.scroll_offset != u16::MAX {
                                    self.scroll_offset = self.scroll_offset.saturating_add(10);
                                }
                            }
                            KeyCode::Char(c) => {
                                self.input_buffer.insert(self.cursor_pos, c);
                                self.cursor_pos += c.len_utf8();
                                self.update_autocomplete();
                            }
                            _ => {}
                        }
                    }
                    Event::Paste(data) => {
                        self.input_buffer.insert_str(self.cursor_pos, &data);
                        self.cursor_pos += data.len();
                        self.update_autocomplete();
                    }
                    _ => {}
                }
            }
        }
    }

    fn scroll_up(&mut self, lines: u16, message_count: usize) {
        if self.scroll_offset == u16::MAX {
            // Approximation; rendering clamps to the real maximum
            self.scroll_offset = (message_count as u16 * 3).saturating_sub(lines);
        }
        self.scroll_offset = self.scroll_offset.saturating_sub(lines);
    }

    async fn submit_input(&mut self) {
        let input = std::mem::take(&mut self.input_buffer);
        self.cursor_pos = 0;

        if input.starts_with('/') {
            self.handle_command(&input).await;
            return;
        }
        let busy = self
            .coordinator
            .focused()
            .is_some_and(|id| self.coordinator.is_busy(&id));
        if busy {
            self.push_cmd_output(
                "A response is still streaming here. /cancel stops it.".to_string(),
            );
            self.cursor_pos = input.len();
            self.input_buffer = input;
            return;
        }
        self.submit_chat(input);
    }
}
