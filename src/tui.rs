#![cfg(feature = "tui")]

use crate::config::Settings;
use crate::controller::{ActiveRequest, Controller, HostEvent, ResponseSink};
use crate::error::AskError;
use crate::provider::Ask;
use crate::shortcut::Shortcut;
use anyhow::Context;
use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Modifier, Style};
use ratatui::text::Text;
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Terminal;
use std::io;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Idle,
    Streaming,
    Done,
    Cancelled,
    Failed,
}

/// Response pane; the only thing request output is allowed to touch.
#[derive(Debug)]
struct Response {
    text: String,
    status: Status,
}

impl ResponseSink for Response {
    fn on_delta(&mut self, text: &str) {
        self.text.push_str(text);
    }

    fn on_done(&mut self, _full_text: &str) {
        self.status = Status::Done;
    }

    fn on_error(&mut self, err: &AskError) {
        if !self.text.is_empty() && !self.text.ends_with('\n') {
            self.text.push('\n');
        }
        self.text.push_str(&format!("[error] {err}"));
        self.status = Status::Failed;
    }
}

struct Dialog {
    controller: Controller,
    settings: Settings,
    shortcut: Option<Shortcut>,
    context: String,
    input: String,
    response: Response,
    active: Option<ActiveRequest>,
    copy_on_exit: bool,
}

enum Action {
    Continue,
    Quit,
}

impl Dialog {
    fn new(controller: Controller, settings: Settings, context: String, prompt: String) -> Self {
        let shortcut = match settings.shortcut.parse::<Shortcut>() {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!(shortcut = %settings.shortcut, error = %e, "ignoring unusable shortcut");
                None
            }
        };
        Self {
            controller,
            settings,
            shortcut,
            context,
            input: prompt,
            response: Response {
                text: String::new(),
                status: Status::Idle,
            },
            active: None,
            copy_on_exit: false,
        }
    }

    /// Start a request, superseding any that is still running.
    fn submit(&mut self) {
        let prompt = self.input.trim().to_string();
        match prompt.as_str() {
            "" => return,
            "/clear" => {
                self.active = None;
                self.input.clear();
                self.response.text.clear();
                self.response.status = Status::Idle;
                return;
            }
            _ => {}
        }

        // Dropping the old request cancels it before the new one starts.
        if self.active.take().is_some() {
            tracing::info!("superseding in-flight request");
        }
        self.response.text.clear();
        self.response.status = Status::Streaming;
        self.active = Some(ActiveRequest::spawn(
            self.controller.clone(),
            self.settings.clone(),
            Ask::new(prompt, self.context.clone()),
        ));
    }

    fn cancel(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel();
            self.response.status = Status::Cancelled;
        }
    }

    fn handle_event(&mut self, ev: HostEvent) {
        let terminal = matches!(ev, HostEvent::Done(_) | HostEvent::Error(_));
        ev.dispatch(&mut self.response);
        if terminal {
            self.active = None;
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> Action {
        if key.kind == KeyEventKind::Release {
            return Action::Continue;
        }
        if self.shortcut.as_ref().is_some_and(|s| s.matches(&key)) {
            self.submit();
            return Action::Continue;
        }

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('c') if ctrl => return Action::Quit,
            KeyCode::Char('y') if ctrl => self.copy_on_exit = true,
            KeyCode::Char('j') if ctrl => self.input.push('\n'),
            KeyCode::Esc => {
                if self.active.is_some() {
                    self.cancel();
                } else {
                    return Action::Quit;
                }
            }
            KeyCode::Enter => {
                if self.input.trim() == "/quit" {
                    return Action::Quit;
                }
                self.submit();
            }
            KeyCode::Backspace => {
                self.input.pop();
            }
            KeyCode::Char(c) if !ctrl => self.input.push(c),
            _ => {}
        }
        Action::Continue
    }
}

/// Run the ask dialog until the user closes it.
///
/// Returns the response text when the user asked to copy it.
pub async fn run_tui(
    controller: Controller,
    settings: Settings,
    context: String,
    prompt: String,
) -> anyhow::Result<Option<String>> {
    let mut dialog = Dialog::new(controller, settings, context, prompt);

    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("enter alt screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;

    let (ev_tx, mut ev_rx) = mpsc::unbounded_channel::<Event>();
    std::thread::spawn(move || {
        while let Ok(ev) = crossterm::event::read() {
            if ev_tx.send(ev).is_err() {
                break;
            }
        }
    });

    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(33));

    let res = loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = draw(&mut terminal, &dialog) {
                    break Err(e);
                }
            }
            Some(ev) = ev_rx.recv() => {
                if let Event::Key(key) = ev {
                    if let Action::Quit = dialog.handle_key(key) {
                        break Ok(());
                    }
                }
            }
            Some(msg) = async {
                match &mut dialog.active {
                    Some(active) => active.recv().await,
                    None => None,
                }
            } => {
                dialog.handle_event(msg);
            }
        }
    };

    // Closing the dialog aborts whatever is still in flight.
    dialog.cancel();

    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();

    res?;
    Ok(dialog.copy_on_exit.then(|| dialog.response.text.clone()))
}

fn draw(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, dialog: &Dialog) -> anyhow::Result<()> {
    terminal.draw(|f| {
        let context_height = if dialog.context.is_empty() { 3 } else { 8 };
        let input_height = (dialog.input.lines().count().max(1) as u16 + 2).min(8);
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(context_height),
                Constraint::Min(3),
                Constraint::Length(input_height),
            ])
            .split(f.area());

        let context = if dialog.context.is_empty() {
            Text::styled("(no selection)", Style::default().add_modifier(Modifier::DIM))
        } else {
            Text::from(dialog.context.as_str())
        };
        let context_w = Paragraph::new(context)
            .block(Block::default().borders(Borders::ALL).title("Selected text"))
            .wrap(Wrap { trim: false });

        let status = match dialog.response.status {
            Status::Idle => "",
            Status::Streaming => " (streaming, Esc to cancel)",
            Status::Done => " (done, Ctrl-Y to copy on exit)",
            Status::Cancelled => " (cancelled)",
            Status::Failed => " (failed)",
        };
        let response = Paragraph::new(dialog.response.text.as_str())
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!("LLM Response [{}]{status}", dialog.settings.model)),
            )
            .wrap(Wrap { trim: false });

        let hint = match &dialog.shortcut {
            Some(s) => format!("Additional instruction / question (Enter or {s} to ask, Ctrl-J newline)"),
            None => "Additional instruction / question (Enter to ask, Ctrl-J newline)".to_string(),
        };
        let input_w = Paragraph::new(dialog.input.as_str())
            .block(Block::default().borders(Borders::ALL).title(hint))
            .wrap(Wrap { trim: false });

        f.render_widget(context_w, chunks[0]);
        f.render_widget(response, chunks[1]);
        f.render_widget(input_w, chunks[2]);

        let last = dialog.input.rsplit('\n').next().unwrap_or_default();
        let row = dialog.input.matches('\n').count() as u16;
        let area = chunks[2];
        let x = area.x + 1 + last.chars().count() as u16;
        let y = area.y + 1 + row;
        f.set_cursor_position((
            x.min(area.x + area.width.saturating_sub(2)),
            y.min(area.y + area.height.saturating_sub(2)),
        ));
    })?;
    Ok(())
}
