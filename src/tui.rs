// TUI Module - Terminal status view and keyboard volume buttons
use anyhow::Result;
use crossterm::event::{poll, read, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Sparkline};
use ratatui::Terminal;
use std::io::{self, Stdout};
use std::time::Duration;

use crate::controller::ButtonInput;
use crate::spectrum::{Bands, LOW_BAND_CAP};
use crate::types::ColorChannel;
use crate::volume::ButtonState;

/// Puts the terminal in raw mode for as long as it lives
pub struct RawMode;

impl RawMode {
    pub fn enable() -> Result<Self> {
        enable_raw_mode()?;
        Ok(RawMode)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

/// What a key press means to the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    VolumeUp,
    VolumeDown,
    Quit,
}

pub fn key_action(code: KeyCode, modifiers: KeyModifiers) -> Option<KeyAction> {
    match code {
        KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => Some(KeyAction::Quit),
        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => Some(KeyAction::Quit),
        KeyCode::Char('+') | KeyCode::Char('=') | KeyCode::Up => Some(KeyAction::VolumeUp),
        KeyCode::Char('-') | KeyCode::Char('_') | KeyCode::Down => Some(KeyAction::VolumeDown),
        _ => None,
    }
}

/// Keyboard stand-in for the volume buttons.
///
/// Terminals only report presses, so each press reads as held for one poll and
/// released on the next. Holding a key steps once per key repeat.
#[derive(Debug, Default)]
pub struct KeyboardButtons {
    pending: ButtonState,
    quit: bool,
}

impl KeyboardButtons {
    pub fn new() -> Self {
        KeyboardButtons::default()
    }

    /// Drain queued terminal events without blocking
    pub fn poll(&mut self) -> Result<()> {
        while poll(Duration::from_millis(0))? {
            if let Event::Key(key) = read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                if let Some(action) = key_action(key.code, key.modifiers) {
                    self.apply(action);
                }
            }
        }
        Ok(())
    }

    pub fn apply(&mut self, action: KeyAction) {
        match action {
            KeyAction::VolumeUp => self.pending.increase = true,
            KeyAction::VolumeDown => self.pending.decrease = true,
            KeyAction::Quit => self.quit = true,
        }
    }

    pub fn quit_requested(&self) -> bool {
        self.quit
    }
}

impl ButtonInput for KeyboardButtons {
    fn read(&mut self) -> ButtonState {
        std::mem::take(&mut self.pending)
    }
}

/// Everything the status view shows for one redraw
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub bands: Option<Bands>,
    pub color: ColorChannel,
    pub volume: f32,
    pub volume_held: bool,
    pub rotated_this_silence: bool,
    pub frames: u64,
    pub rotations: u64,
    pub frame_rate: f64,
    pub source_label: String,
    pub sink_label: String,
}

fn channel_color(color: ColorChannel) -> Color {
    match color {
        ColorChannel::Red => Color::Red,
        ColorChannel::Blue => Color::Blue,
        ColorChannel::Green => Color::Green,
    }
}

fn band_data(values: &[u16]) -> Vec<u64> {
    values.iter().map(|&v| v as u64).collect()
}

/// Sparkline ceiling and title for the unclamped high band. The scale grows
/// past 255 so overflowing bins stay distinguishable.
fn high_band_scale(values: &[u64]) -> (u64, String) {
    let cap = LOW_BAND_CAP as u64;
    let peak = values.iter().copied().max().unwrap_or(0);
    if peak > cap {
        (peak, format!("Strips 3 & 4 - bins 29..53 (peak {} over {})", peak, cap))
    } else {
        (cap, "Strips 3 & 4 - bins 29..53".to_string())
    }
}

pub struct StatusView {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl StatusView {
    /// Switch to the alternate screen. Raw mode is managed by `RawMode`.
    pub fn open() -> Result<Self> {
        let mut stdout = io::stdout();
        stdout.execute(EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;
        terminal.hide_cursor()?;
        Ok(StatusView { terminal })
    }

    pub fn draw(&mut self, status: &StatusSnapshot) -> Result<()> {
        let accent = channel_color(status.color);
        let (high, low, total) = match &status.bands {
            Some(bands) => (band_data(&bands.high), band_data(&bands.low), bands.low_total()),
            None => (Vec::new(), Vec::new(), 0),
        };

        let (high_max, high_title) = high_band_scale(&high);

        self.terminal.draw(|f| {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Length(3),  // Header
                    Constraint::Min(5),     // Strips 3/4
                    Constraint::Min(5),     // Strips 1/2/5
                    Constraint::Length(3),  // Footer
                ])
                .split(f.size());

            let silence = match (status.bands.is_some() && total == 0, status.rotated_this_silence) {
                (true, true) => "(silent, color changed) ",
                (true, false) => "(silent) ",
                _ => "",
            };
            let header = Paragraph::new(Line::from(vec![
                Span::raw("Color: "),
                Span::styled(
                    status.color.name(),
                    Style::default().fg(accent).add_modifier(Modifier::BOLD),
                ),
                Span::raw(format!(
                    " | Volume: {:.2}{} | Low total: {} {}| Rotations: {}",
                    status.volume,
                    if status.volume_held { " (held)" } else { "" },
                    total,
                    silence,
                    status.rotations
                )),
            ]))
            .block(Block::default().borders(Borders::ALL).title("discolight"));
            f.render_widget(header, chunks[0]);

            let high_widget = Sparkline::default()
                .block(Block::default().borders(Borders::ALL).title(high_title.as_str()))
                .data(&high)
                .max(high_max)
                .style(Style::default().fg(accent));
            f.render_widget(high_widget, chunks[1]);

            let low_widget = Sparkline::default()
                .block(Block::default().borders(Borders::ALL).title("Strips 1, 2 & 5 - 4:1 groups"))
                .data(&low)
                .max(LOW_BAND_CAP as u64)
                .style(Style::default().fg(accent));
            f.render_widget(low_widget, chunks[2]);

            let footer_text = format!(
                "Source: {} | Sink: {} | Frames: {} | {:.0} fps | +/- volume, 'q' or Ctrl+C to quit",
                status.source_label, status.sink_label, status.frames, status.frame_rate
            );
            let footer = Paragraph::new(footer_text).block(Block::default().borders(Borders::ALL));
            f.render_widget(footer, chunks[3]);
        })?;
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        self.terminal.show_cursor()?;
        self.terminal.backend_mut().execute(LeaveAlternateScreen)?;
        Ok(())
    }
}
