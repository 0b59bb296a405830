use std::io::{self, Stdout};
use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, MouseButton,
    MouseEvent, MouseEventKind,
};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use textwrap::{wrap, Options as WrapOptions};
use unicode_width::UnicodeWidthStr;

use crate::coordinator::{ClipPhase, TapOutcome};
use crate::feed::Clip;
use crate::session::FeedSession;
use crate::viewport::Geometry;

const COLOR_BG: Color = Color::Rgb(30, 30, 46);
const COLOR_PANEL_BG: Color = Color::Rgb(24, 24, 36);
const COLOR_PANEL_FOCUSED_BG: Color = Color::Rgb(49, 50, 68);
const COLOR_BORDER_IDLE: Color = Color::Rgb(49, 50, 68);
const COLOR_BORDER_FOCUSED: Color = Color::Rgb(137, 180, 250);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
const COLOR_SUCCESS: Color = Color::Rgb(166, 227, 161);
const COLOR_ERROR: Color = Color::Rgb(243, 139, 168);

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const WHEEL_STEP: u32 = 3;
const PROGRESS_WIDTH: usize = 30;

pub struct Options {
    pub session: FeedSession,
    pub status_message: String,
    pub config_path: String,
}

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_tick) >= Duration::from_millis(120) {
            self.index = (self.index + 1) % SPINNER_FRAMES.len();
            self.last_tick = now;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.last_tick = Instant::now();
    }
}

/// Rows of one card that land inside the feed area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CardSlice {
    y: u16,
    height: u16,
    hidden_above: u16,
    top_visible: bool,
    bottom_visible: bool,
}

fn card_slice(index: usize, offset: u32, extent: u32, area_height: u16) -> Option<CardSlice> {
    if extent == 0 || area_height == 0 {
        return None;
    }
    let top = index as i64 * i64::from(extent) - i64::from(offset);
    let bottom = top + i64::from(extent);
    let visible_top = top.max(0);
    let visible_bottom = bottom.min(i64::from(area_height));
    if visible_bottom <= visible_top {
        return None;
    }
    Some(CardSlice {
        y: visible_top as u16,
        height: (visible_bottom - visible_top) as u16,
        hidden_above: (visible_top - top) as u16,
        top_visible: top >= 0,
        bottom_visible: bottom <= i64::from(area_height),
    })
}

/// Index of the item the offset is closest to snapping onto.
fn snap_index(offset: u32, extent: u32) -> usize {
    if extent == 0 {
        return 0;
    }
    ((offset + extent / 2) / extent) as usize
}

fn progress_bar(elapsed: f64, duration: Option<u32>, width: usize) -> String {
    let total = duration.map(f64::from).filter(|d| *d > 0.0);
    let ratio = total.map(|t| (elapsed / t).clamp(0.0, 1.0)).unwrap_or(0.0);
    let filled = (ratio * width as f64).round() as usize;
    let bar = format!(
        "{}{}",
        "━".repeat(filled.min(width)),
        "─".repeat(width - filled.min(width))
    );
    match total {
        Some(t) => format!("{bar} {elapsed:.1}s / {t:.0}s"),
        None => format!("{bar} {elapsed:.1}s"),
    }
}

fn phase_label(phase: ClipPhase) -> (&'static str, &'static str, Color) {
    match phase {
        ClipPhase::Playing => ("II", "playing · space to pause", COLOR_SUCCESS),
        ClipPhase::Paused => ("▶", "paused · space to resume", COLOR_ACCENT),
        ClipPhase::Ended => ("⟳", "ended · space to replay", COLOR_ACCENT),
        ClipPhase::Inactive => ("·", "", COLOR_TEXT_SECONDARY),
        ClipPhase::Unavailable => ("×", "media unavailable", COLOR_ERROR),
    }
}

fn truncate_to_width(text: &str, width: usize) -> String {
    if text.width() <= width {
        return text.to_string();
    }
    let mut out = String::new();
    for ch in text.chars() {
        if out.width() + 1 >= width {
            break;
        }
        out.push(ch);
    }
    out.push('…');
    out
}

pub struct Model {
    session: FeedSession,
    status_message: String,
    config_path: String,
    offset: u32,
    item_extent: u32,
    viewport_extent: u32,
    spinner: Spinner,
    show_help: bool,
    needs_redraw: bool,
}

impl Model {
    pub fn new(options: Options) -> Self {
        Self {
            session: options.session,
            status_message: options.status_message,
            config_path: options.config_path,
            offset: 0,
            item_extent: 0,
            viewport_extent: 0,
            spinner: Spinner::new(),
            show_help: false,
            needs_redraw: true,
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        stdout.execute(EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        terminal.backend_mut().execute(DisableMouseCapture)?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        let tick_rate = Duration::from_millis(120);
        self.session.start();

        loop {
            let size = terminal.size()?;
            self.resize(size.height);

            if self.session.poll() {
                self.mark_dirty();
            }
            if self.sync_viewport() {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            let timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));

            if event::poll(timeout)? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        if self.handle_key(key.code) {
                            break;
                        }
                    }
                    Event::Mouse(mouse) => self.handle_mouse(mouse),
                    Event::Resize(_, _) => self.mark_dirty(),
                    _ => {}
                }
            }

            if last_tick.elapsed() >= tick_rate {
                last_tick = Instant::now();
                if self.session.feed().is_loading() {
                    if self.spinner.advance() {
                        self.mark_dirty();
                    }
                } else {
                    self.spinner.reset();
                }
            }
        }

        Ok(())
    }

    /// Two rows are reserved for the status and key hint lines.
    fn resize(&mut self, height: u16) {
        let viewport = u32::from(height.saturating_sub(2)).max(1);
        if viewport == self.viewport_extent {
            return;
        }
        let index = snap_index(self.offset, self.item_extent);
        self.viewport_extent = viewport;
        self.item_extent = viewport;
        self.offset = index as u32 * viewport;
        self.clamp_offset();
        self.mark_dirty();
    }

    fn geometry(&self) -> Geometry {
        Geometry {
            offset: self.offset,
            item_extent: self.item_extent,
            viewport_extent: self.viewport_extent,
            item_count: self.session.clips().len(),
        }
    }

    fn sync_viewport(&mut self) -> bool {
        let geometry = self.geometry();
        self.session.observe_viewport(&geometry);
        self.session.settle()
    }

    fn clamp_offset(&mut self) {
        self.offset = self.offset.min(self.geometry().max_offset());
    }

    fn scroll_by(&mut self, delta: i64) {
        let next = (i64::from(self.offset) + delta).max(0);
        self.offset = next.min(i64::from(u32::MAX)) as u32;
        self.clamp_offset();
        self.mark_dirty();
    }

    fn page_to(&mut self, index: usize) {
        self.offset = (index as u64 * u64::from(self.item_extent)).min(u64::from(u32::MAX)) as u32;
        self.clamp_offset();
        self.mark_dirty();
    }

    fn page_by(&mut self, delta: i64) {
        let index = snap_index(self.offset, self.item_extent) as i64;
        self.page_to((index + delta).max(0) as usize);
    }

    fn tap(&mut self) {
        let title = self
            .session
            .current_clip()
            .map(|clip| clip.descriptor.title())
            .unwrap_or_default();
        self.status_message = match self.session.tap_current() {
            TapOutcome::Paused => format!("Paused {title}"),
            TapOutcome::Resumed => format!("Playing {title}"),
            TapOutcome::Replayed => format!("Replaying {title}"),
            TapOutcome::Ignored => "Nothing to play here.".to_string(),
        };
        self.mark_dirty();
    }

    fn handle_key(&mut self, code: KeyCode) -> bool {
        if self.show_help {
            self.show_help = false;
            self.mark_dirty();
            return matches!(code, KeyCode::Char('q'));
        }

        match code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Char('j') | KeyCode::Down | KeyCode::PageDown => self.page_by(1),
            KeyCode::Char('k') | KeyCode::Up | KeyCode::PageUp => self.page_by(-1),
            KeyCode::Char('J') => self.scroll_by(1),
            KeyCode::Char('K') => self.scroll_by(-1),
            KeyCode::Char('g') | KeyCode::Home => self.page_to(0),
            KeyCode::Char('G') | KeyCode::End => {
                let last = self.session.clips().len().saturating_sub(1);
                self.page_to(last);
            }
            KeyCode::Char(' ') | KeyCode::Enter => self.tap(),
            KeyCode::Char('r') => {
                self.status_message = if self.session.feed().error().is_some() {
                    if self.session.retry() {
                        "Retrying…".to_string()
                    } else {
                        "Already loading.".to_string()
                    }
                } else {
                    "Nothing to retry.".to_string()
                };
                self.mark_dirty();
            }
            KeyCode::Char('R') => {
                self.offset = 0;
                self.session.reload();
                self.status_message = "Reloading feed…".to_string();
                self.mark_dirty();
            }
            KeyCode::Char('?') => {
                self.show_help = true;
                self.mark_dirty();
            }
            _ => {}
        }
        false
    }

    fn handle_mouse(&mut self, mouse: MouseEvent) {
        match mouse.kind {
            MouseEventKind::ScrollDown => self.scroll_by(i64::from(WHEEL_STEP)),
            MouseEventKind::ScrollUp => self.scroll_by(-i64::from(WHEEL_STEP)),
            MouseEventKind::Down(MouseButton::Left) => {
                if u32::from(mouse.row) < self.viewport_extent {
                    self.tap();
                }
            }
            _ => {}
        }
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let area = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(COLOR_BG)), area);

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(1),
                Constraint::Length(1),
                Constraint::Length(1),
            ])
            .split(area);

        self.draw_feed(frame, chunks[0]);
        self.draw_status(frame, chunks[1]);
        self.draw_hints(frame, chunks[2]);
        if self.show_help {
            self.draw_help(frame, area);
        }
    }

    fn draw_feed(&self, frame: &mut Frame<'_>, area: Rect) {
        let clips = self.session.clips();
        if clips.is_empty() {
            self.draw_empty(frame, area);
            return;
        }

        let geometry = self.geometry();
        let current = self.session.current_index();
        for index in geometry.overlapping() {
            let Some(slice) = card_slice(index, self.offset, self.item_extent, area.height) else {
                continue;
            };
            let rect = Rect {
                x: area.x,
                y: area.y + slice.y,
                width: area.width,
                height: slice.height,
            };
            self.draw_card(frame, rect, &clips[index], index, current == Some(index), slice);
        }
    }

    fn draw_empty(&self, frame: &mut Frame<'_>, area: Rect) {
        let cursor = self.session.cursor();
        let (message, color) = match cursor.error {
            Some(err) => (
                format!("Could not load clips: {err}\n\nPress r to retry."),
                COLOR_ERROR,
            ),
            None if cursor.loading => (
                format!("{} Loading clips…", self.spinner.frame()),
                COLOR_TEXT_SECONDARY,
            ),
            None => ("No clips to show.".to_string(), COLOR_TEXT_SECONDARY),
        };
        let top_pad = area.height / 2;
        let mut lines: Vec<Line> = (0..top_pad.saturating_sub(1)).map(|_| Line::from("")).collect();
        lines.extend(message.lines().map(|line| {
            Line::from(Span::styled(line.to_string(), Style::default().fg(color)))
        }));
        frame.render_widget(
            Paragraph::new(lines)
                .alignment(Alignment::Center)
                .wrap(Wrap { trim: false }),
            area,
        );
    }

    fn draw_card(
        &self,
        frame: &mut Frame<'_>,
        rect: Rect,
        clip: &Clip,
        index: usize,
        focused: bool,
        slice: CardSlice,
    ) {
        let mut borders = Borders::LEFT | Borders::RIGHT;
        if slice.top_visible {
            borders |= Borders::TOP;
        }
        if slice.bottom_visible {
            borders |= Borders::BOTTOM;
        }
        let (border, background) = if focused {
            (COLOR_BORDER_FOCUSED, COLOR_PANEL_FOCUSED_BG)
        } else {
            (COLOR_BORDER_IDLE, COLOR_PANEL_BG)
        };
        let mut block = Block::default()
            .borders(borders)
            .border_style(Style::default().fg(border))
            .style(Style::default().bg(background));
        if slice.top_visible {
            block = block.title(Span::styled(
                format!(" {} / {} ", index + 1, self.session.clips().len()),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            ));
        }

        let inner_width = usize::from(rect.width.saturating_sub(4)).max(10);
        let inner_height = usize::try_from(self.item_extent.saturating_sub(2)).unwrap_or(0);
        let lines = self.card_lines(clip, inner_width, inner_height);
        let skip = if slice.top_visible {
            0
        } else {
            slice.hidden_above.saturating_sub(1)
        };

        frame.render_widget(
            Paragraph::new(lines)
                .block(block)
                .alignment(Alignment::Center)
                .scroll((skip, 0)),
            rect,
        );
    }

    fn card_lines(&self, clip: &Clip, width: usize, height: usize) -> Vec<Line<'static>> {
        let id = clip.id();
        let descriptor = &clip.descriptor;
        let phase = self.session.phase(id);
        let state = self.session.state(id);

        let mut body: Vec<Line<'static>> = Vec::new();
        let title = descriptor.title();
        for row in wrap(&title, WrapOptions::new(width)) {
            body.push(Line::from(Span::styled(
                row.into_owned(),
                Style::default()
                    .fg(COLOR_TEXT_PRIMARY)
                    .add_modifier(Modifier::BOLD),
            )));
        }

        let mut meta = Vec::new();
        if !descriptor.user.name.trim().is_empty() {
            meta.push(format!("by {}", descriptor.user.name.trim()));
        }
        if let Some(duration) = descriptor.duration {
            meta.push(format!("{duration}s"));
        }
        if let Some(source) = clip.resolution.source() {
            meta.push(source.label.clone());
        }
        body.push(Line::from(Span::styled(
            truncate_to_width(&meta.join(" · "), width),
            Style::default().fg(COLOR_TEXT_SECONDARY),
        )));
        body.push(Line::from(""));

        let (glyph, hint, color) = phase_label(phase);
        body.push(Line::from(Span::styled(
            glyph.to_string(),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        )));
        if !hint.is_empty() {
            body.push(Line::from(Span::styled(
                hint.to_string(),
                Style::default().fg(color),
            )));
        }
        if clip.resolution.is_playable() {
            body.push(Line::from(""));
            body.push(Line::from(Span::styled(
                progress_bar(state.elapsed, descriptor.duration, PROGRESS_WIDTH.min(width)),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )));
        }

        let pad = height.saturating_sub(body.len()) / 2;
        let mut lines: Vec<Line<'static>> = (0..pad).map(|_| Line::from("")).collect();
        lines.extend(body);
        lines
    }

    fn draw_status(&self, frame: &mut Frame<'_>, area: Rect) {
        let cursor = self.session.cursor();
        let mut spans = Vec::new();
        if cursor.loading {
            spans.push(Span::styled(
                format!("{} ", self.spinner.frame()),
                Style::default().fg(COLOR_ACCENT),
            ));
        }
        let more = if cursor.has_more { "" } else { " · end of feed" };
        spans.push(Span::styled(
            format!(
                "{} clips · next page {}{} ",
                self.session.clips().len(),
                cursor.page,
                more
            ),
            Style::default().fg(COLOR_TEXT_SECONDARY),
        ));
        let (message, color) = match &cursor.error {
            Some(err) => (format!("Error: {err} (r to retry)"), COLOR_ERROR),
            None => (self.status_message.clone(), COLOR_TEXT_PRIMARY),
        };
        let used: usize = spans.iter().map(|span| span.content.width()).sum();
        let room = usize::from(area.width).saturating_sub(used);
        spans.push(Span::styled(
            truncate_to_width(&message, room),
            Style::default().fg(color),
        ));
        frame.render_widget(Paragraph::new(Line::from(spans)), area);
    }

    fn draw_hints(&self, frame: &mut Frame<'_>, area: Rect) {
        let hint = "j/k next/prev · J/K scroll · space play/pause · r retry · R reload · ? help · q quit";
        frame.render_widget(
            Paragraph::new(Span::styled(
                truncate_to_width(hint, usize::from(area.width)),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )),
            area,
        );
    }

    fn draw_help(&self, frame: &mut Frame<'_>, area: Rect) {
        let width = area.width.min(60);
        let height = area.height.min(14);
        let popup = Rect {
            x: area.x + (area.width - width) / 2,
            y: area.y + (area.height - height) / 2,
            width,
            height,
        };
        let lines = vec![
            Line::from("j / ↓        next clip"),
            Line::from("k / ↑        previous clip"),
            Line::from("J / K        scroll one row"),
            Line::from("g / G        first / last clip"),
            Line::from("space        play · pause · replay"),
            Line::from("r            retry failed page"),
            Line::from("R            reload feed"),
            Line::from("q            quit"),
            Line::from(""),
            Line::from(Span::styled(
                format!("config: {}", self.config_path),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )),
        ];
        frame.render_widget(Clear, popup);
        frame.render_widget(
            Paragraph::new(lines).block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(" clip-feed ")
                    .border_style(Style::default().fg(COLOR_BORDER_FOCUSED))
                    .style(Style::default().bg(COLOR_PANEL_BG).fg(COLOR_TEXT_PRIMARY)),
            ),
            popup,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_slices_clip_partially_visible_cards() {
        assert_eq!(
            card_slice(0, 0, 10, 10),
            Some(CardSlice {
                y: 0,
                height: 10,
                hidden_above: 0,
                top_visible: true,
                bottom_visible: true,
            })
        );
        assert_eq!(
            card_slice(0, 3, 10, 10),
            Some(CardSlice {
                y: 0,
                height: 7,
                hidden_above: 3,
                top_visible: false,
                bottom_visible: true,
            })
        );
        assert_eq!(
            card_slice(1, 3, 10, 10),
            Some(CardSlice {
                y: 7,
                height: 3,
                hidden_above: 0,
                top_visible: true,
                bottom_visible: false,
            })
        );
        assert_eq!(card_slice(2, 3, 10, 10), None);
    }

    #[test]
    fn snap_rounds_to_nearest_item() {
        assert_eq!(snap_index(0, 10), 0);
        assert_eq!(snap_index(4, 10), 0);
        assert_eq!(snap_index(5, 10), 1);
        assert_eq!(snap_index(27, 10), 3);
        assert_eq!(snap_index(27, 0), 0);
    }

    #[test]
    fn progress_bar_fills_by_ratio() {
        let bar = progress_bar(5.0, Some(10), 10);
        assert!(bar.starts_with("━━━━━─────"));
        assert!(bar.ends_with("5.0s / 10s"));
        assert!(progress_bar(3.0, None, 4).ends_with("3.0s"));
        assert!(progress_bar(99.0, Some(10), 4).starts_with("━━━━ "));
    }

    #[test]
    fn truncation_respects_display_width() {
        assert_eq!(truncate_to_width("short", 10), "short");
        let cut = truncate_to_width("a very long status message", 10);
        assert!(cut.width() <= 10);
        assert!(cut.ends_with('…'));
    }
}
