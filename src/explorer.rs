//! Terminal map explorer using ratatui
//!
//! The map fills the left of the screen and the details panel the right, with
//! a status bar along the bottom. Move the pointer over the map to inspect
//! features, Enter to lock onto them, Esc to release.
//!
//! Descriptions and exports run as local tasks and report back over a channel,
//! so the interface keeps responding while records are fetched.

use std::io::{self, stdout};

use crossterm::{
    event::{
        DisableMouseCapture, EnableMouseCapture, Event, EventStream, KeyCode, KeyEvent, KeyEventKind, MouseButton,
        MouseEvent, MouseEventKind,
    },
    execute,
    terminal::{self, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures::StreamExt;
use ratatui::{
    prelude::*,
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};
use tokio::sync::mpsc;
use tokio::task::{spawn_local, LocalSet};

use crate::config::ViewConfig;
use crate::controller::{DescribeRequest, LockState};
use crate::describe::{Composite, DetailLine};
use crate::export::{ExportError, ExportSummary};
use crate::format::Tone;
use crate::index::GeoSurface;
use crate::records::RecordFetcher;
use crate::session::Session;
use crate::surface::{LngLat, MapSurface, ScreenPoint};

const PANEL_WIDTH: u16 = 46;
const ZOOM_STEP: f64 = 0.5;
const PAN_STEP: i32 = 4;

/// Work finished by a background task
enum Update {
    Described { seq: u64, composite: Composite },
    Exported(Result<ExportSummary, ExportError>),
}

struct Explorer<F> {
    surface: GeoSurface,
    session: Session<F>,
    start: ViewConfig,
    pointer: ScreenPoint,
    /// Map area of the last frame, for translating mouse positions
    map_area: Rect,
    show_help: bool,
    /// Message to display until the next key press
    message: Option<String>,
    /// Text typed into the fly-to prompt, while it is open
    prompt: Option<String>,
    exporting: bool,
    updates: mpsc::UnboundedSender<Update>,
}

impl<F: RecordFetcher + 'static> Explorer<F> {
    fn new(surface: GeoSurface, session: Session<F>, start: ViewConfig, updates: mpsc::UnboundedSender<Update>) -> Self {
        let viewport = surface.viewport();
        let pointer = ScreenPoint::new(viewport.cols / 2, viewport.rows / 2);
        let message = match surface.load_errors().first() {
            Some((source, err)) => Some(format!("{} failed to load: {}", source, err)),
            None => None,
        };
        Explorer {
            surface,
            session,
            start,
            pointer,
            map_area: Rect::default(),
            show_help: false,
            message,
            prompt: None,
            exporting: false,
            updates,
        }
    }

    fn spawn_describe(&self, request: DescribeRequest) {
        let describer = self.session.describer();
        let updates = self.updates.clone();
        spawn_local(async move {
            let composite = describer.describe_all(&request.grouped).await;
            // The receiver is gone only when the explorer is shutting down
            let _ = updates.send(Update::Described {
                seq: request.seq,
                composite,
            });
        });
    }

    fn move_pointer(&mut self, to: ScreenPoint) {
        let viewport = self.surface.viewport();
        self.pointer = ScreenPoint::new(
            to.col.min(viewport.cols.saturating_sub(1)),
            to.row.min(viewport.rows.saturating_sub(1)),
        );
        if let Some(request) = self.session.pointer_moved(&mut self.surface, self.pointer) {
            self.spawn_describe(request);
        }
    }

    fn nudge_pointer(&mut self, dx: i32, dy: i32) {
        let col = (self.pointer.col as i32 + dx).max(0) as u16;
        let row = (self.pointer.row as i32 + dy).max(0) as u16;
        self.move_pointer(ScreenPoint::new(col, row));
    }

    fn click(&mut self) {
        let request = self.session.clicked(&mut self.surface, self.pointer);
        self.spawn_describe(request);
    }

    fn zoom(&mut self, delta: f64) {
        self.surface.zoom_by(delta);
        self.message = Some(format!("Zoom: {:.1}", self.surface.zoom()));
    }

    fn go_to_start(&mut self) {
        self.surface.fly_to(self.start.center, self.start.zoom);
        self.message = Some(format!("Back to {} z{:.1}", self.start.center, self.start.zoom));
    }

    fn fly_to_typed(&mut self, input: &str) {
        match parse_fly_to(input, self.surface.zoom()) {
            Ok((center, zoom)) => {
                self.surface.fly_to(center, zoom);
                self.message = Some(format!("Flew to {} z{:.1}", self.surface.center(), self.surface.zoom()));
            }
            Err(err) => self.message = Some(format!("Fly to: {}", err)),
        }
    }

    /// Keys while the fly-to prompt is open
    fn handle_prompt_key(&mut self, code: KeyCode) {
        let Some(input) = self.prompt.as_mut() else {
            return;
        };
        match code {
            KeyCode::Enter => {
                if let Some(input) = self.prompt.take() {
                    self.fly_to_typed(&input);
                }
            }
            KeyCode::Esc => self.prompt = None,
            KeyCode::Backspace => {
                input.pop();
            }
            KeyCode::Char(c) => input.push(c),
            _ => {}
        }
    }

    fn export(&mut self) {
        if self.exporting {
            self.message = Some("Export already running".to_string());
            return;
        }
        match self.session.start_export(&self.surface) {
            Ok(job) => {
                self.exporting = true;
                self.message = Some("Exporting view...".to_string());
                let updates = self.updates.clone();
                spawn_local(async move {
                    let _ = updates.send(Update::Exported(job.await));
                });
            }
            Err(reason) => {
                tracing::warn!(%reason, "export refused");
                self.message = Some(format!("Cannot export: {}", reason));
            }
        }
    }

    fn apply(&mut self, update: Update) {
        match update {
            Update::Described { seq, composite } => {
                self.session.settle(seq, composite);
            }
            Update::Exported(result) => {
                self.exporting = false;
                self.message = Some(match result {
                    Ok(summary) => {
                        let rows: usize = summary.rows.values().sum();
                        format!("Exported {} rows to {}", rows, summary.path.display())
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "export failed");
                        format!("Export failed: {}", err)
                    }
                });
            }
        }
    }

    /// Returns false when the explorer should quit
    fn handle_key(&mut self, key: KeyEvent) -> bool {
        if key.kind != KeyEventKind::Press {
            return true;
        }
        self.message = None;
        if self.prompt.is_some() {
            self.handle_prompt_key(key.code);
            return true;
        }
        if self.show_help {
            self.show_help = false;
            return true;
        }

        match key.code {
            KeyCode::Char('q') => return false,
            KeyCode::Char('?') => self.show_help = true,
            KeyCode::Esc => self.session.escape(),
            KeyCode::Enter | KeyCode::Char(' ') => self.click(),

            // Pointer
            KeyCode::Up | KeyCode::Char('k') => self.nudge_pointer(0, -1),
            KeyCode::Down | KeyCode::Char('j') => self.nudge_pointer(0, 1),
            KeyCode::Left | KeyCode::Char('h') => self.nudge_pointer(-1, 0),
            KeyCode::Right | KeyCode::Char('l') => self.nudge_pointer(1, 0),

            // View
            KeyCode::Char('w') => self.surface.pan(0, -PAN_STEP),
            KeyCode::Char('s') => self.surface.pan(0, PAN_STEP),
            KeyCode::Char('a') => self.surface.pan(-PAN_STEP, 0),
            KeyCode::Char('d') => self.surface.pan(PAN_STEP, 0),
            KeyCode::Char('+') | KeyCode::Char('=') => self.zoom(ZOOM_STEP),
            KeyCode::Char('-') | KeyCode::Char('_') => self.zoom(-ZOOM_STEP),
            KeyCode::Char('g') => self.go_to_start(),
            KeyCode::Char('f') => self.prompt = Some(String::new()),

            KeyCode::Char('x') => self.export(),
            _ => {}
        }
        true
    }

    fn handle_mouse(&mut self, mouse: MouseEvent) {
        let Some(point) = map_point(self.map_area, mouse.column, mouse.row) else {
            return;
        };
        match mouse.kind {
            MouseEventKind::Moved => self.move_pointer(point),
            MouseEventKind::Down(MouseButton::Left) => {
                self.move_pointer(point);
                self.click();
            }
            MouseEventKind::ScrollUp => self.zoom(ZOOM_STEP),
            MouseEventKind::ScrollDown => self.zoom(-ZOOM_STEP),
            _ => {}
        }
    }

    fn draw(&mut self, frame: &mut Frame) {
        let main_chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(1)])
            .split(frame.area());
        let content_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Min(1), Constraint::Length(PANEL_WIDTH)])
            .split(main_chunks[0]);
        let map_area = content_chunks[0];

        let viewport = self.surface.viewport();
        if (viewport.cols, viewport.rows) != (map_area.width, map_area.height) {
            self.surface.resize(map_area.width, map_area.height);
            let viewport = self.surface.viewport();
            self.pointer = ScreenPoint::new(
                self.pointer.col.min(viewport.cols.saturating_sub(1)),
                self.pointer.row.min(viewport.rows.saturating_sub(1)),
            );
        }
        self.map_area = map_area;

        self.render_map(map_area, frame.buffer_mut());
        self.render_panel(content_chunks[1], frame);

        let status = Paragraph::new(self.status_line()).style(Style::default().bg(Color::DarkGray).fg(Color::White));
        frame.render_widget(status, main_chunks[1]);

        if self.show_help {
            render_help(map_area, frame.buffer_mut());
        }
    }

    fn render_map(&self, area: Rect, buf: &mut Buffer) {
        for row in 0..area.height {
            for col in 0..area.width {
                let p = ScreenPoint::new(col, row);
                let paint = self.surface.paint_cell(p);
                let (r, g, b) = paint.bg.unwrap_or((16, 16, 24));
                let mut style = Style::default().bg(Color::Rgb(r, g, b));
                if let Some((r, g, b)) = paint.fg {
                    style = style.fg(Color::Rgb(r, g, b));
                }
                let mut ch = paint.ch;
                if p == self.pointer {
                    style = Style::default().fg(Color::Black).bg(Color::Yellow);
                    if ch == ' ' {
                        ch = '+';
                    }
                }
                if let Some(cell) = buf.cell_mut((area.x + col, area.y + row)) {
                    cell.set_char(ch).set_style(style);
                }
            }
        }

        let label_style = Style::default().fg(Color::White).add_modifier(Modifier::BOLD);
        for (p, text) in self.surface.labels() {
            let room = area.width.saturating_sub(p.col) as usize;
            buf.set_stringn(area.x + p.col, area.y + p.row, &text, room, label_style);
        }
    }

    fn render_panel(&self, area: Rect, frame: &mut Frame) {
        let title = match self.session.controller().state() {
            LockState::Locked => " Details [locked] ",
            LockState::Unlocked => " Details ",
        };
        let block = Block::default().title(title).borders(Borders::ALL);
        let lines = match self.session.panel() {
            Some(composite) if !composite.is_empty() => panel_lines(composite),
            _ => vec![Line::from(Span::styled(
                "Move over the map to inspect features",
                Style::default().fg(Color::DarkGray),
            ))],
        };
        let panel = Paragraph::new(lines).block(block).wrap(Wrap { trim: false });
        frame.render_widget(panel, area);
    }

    fn status_line(&self) -> String {
        if let Some(input) = &self.prompt {
            return format!(" Fly to (LNG,LAT [ZOOM]): {}_", input);
        }
        let at = self.surface.viewport().to_lnglat(self.pointer);
        let tip = self
            .session
            .controller()
            .tip()
            .map(|t| format!(" | {}", t))
            .unwrap_or_default();
        let msg = self.message.as_ref().map(|m| format!(" | {}", m)).unwrap_or_default();
        let export_hint = if self.session.controller().can_export(&self.surface) {
            "  X:Export"
        } else {
            ""
        };
        format!(
            " {} z{:.2} | {}{}{} | ?:Help{}  Q:Quit",
            self.surface.center(),
            self.surface.zoom(),
            at,
            tip,
            msg,
            export_hint,
        )
    }
}

/// Parse "LNG,LAT" with an optional zoom after a space, e.g. "-73.9,40.7 9".
fn parse_fly_to(input: &str, current_zoom: f64) -> Result<(LngLat, f64), String> {
    let mut parts = input.split_whitespace();
    let center: LngLat = parts.next().ok_or("expected LNG,LAT [ZOOM]")?.parse()?;
    let zoom = match parts.next() {
        Some(z) => z
            .trim_start_matches('z')
            .parse::<f64>()
            .map_err(|e| format!("{:?}: {}", z, e))?,
        None => current_zoom,
    };
    if parts.next().is_some() {
        return Err("expected LNG,LAT [ZOOM]".to_string());
    }
    Ok((center, zoom))
}

/// Map-relative cell for an absolute terminal position
fn map_point(area: Rect, column: u16, row: u16) -> Option<ScreenPoint> {
    if column < area.x || row < area.y || column >= area.x + area.width || row >= area.y + area.height {
        return None;
    }
    Some(ScreenPoint::new(column - area.x, row - area.y))
}

fn tone_color(tone: Tone) -> Color {
    match tone {
        Tone::Good => Color::Green,
        Tone::Bad => Color::Red,
        Tone::Neutral => Color::Gray,
    }
}

/// Details panel text: one block per source, in layout order
fn panel_lines(composite: &Composite) -> Vec<Line<'static>> {
    let source_style = Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD);
    let mut lines = Vec::new();

    for section in &composite.sections {
        if !lines.is_empty() {
            lines.push(Line::default());
        }
        lines.push(Line::from(Span::styled(section.source.clone(), source_style)));
        for (i, item) in section.items.iter().enumerate() {
            if i > 0 {
                lines.push(Line::from(Span::styled("  ---", Style::default().fg(Color::DarkGray))));
            }
            for detail in item {
                lines.push(detail_line(detail));
            }
        }
    }
    lines
}

fn detail_line(detail: &DetailLine) -> Line<'static> {
    match detail {
        DetailLine::Heading(text) => Line::from(Span::styled(
            format!("  {}", text),
            Style::default().add_modifier(Modifier::BOLD),
        )),
        DetailLine::Field { label, value, diff } => {
            let mut spans = vec![
                Span::styled(format!("  {}: ", label), Style::default().fg(Color::Gray)),
                Span::raw(value.clone()),
            ];
            if let Some(diff) = diff {
                spans.push(Span::styled(
                    format!(" {}", diff.label()),
                    Style::default().fg(tone_color(diff.tone)),
                ));
                spans.push(Span::raw("*"));
            }
            Line::from(spans)
        }
        DetailLine::Flag(text) => Line::from(Span::styled(format!("  {}", text), Style::default().fg(Color::Green))),
        DetailLine::Text(text) => Line::from(format!("  {}", text)),
    }
}

fn render_help(area: Rect, buf: &mut Buffer) {
    let help_text = [
        "=== District Explorer ===",
        "",
        "Pointer:",
        "  Arrow keys / HJKL / mouse - Move pointer",
        "  Enter / Space / click - Lock onto features",
        "  Esc - Release lock",
        "",
        "View:",
        "  WASD - Pan",
        "  +/- / scroll - Zoom in/out",
        "  G - Back to start view",
        "  F - Fly to LNG,LAT [ZOOM]",
        "",
        "Other:",
        "  X - Export view as CSV (zoom 7.5+)",
        "  ? - Toggle this help",
        "  Q - Quit",
        "",
        "Press any key to close",
    ];

    let width = 46;
    let height = help_text.len() as u16 + 2;
    let x = area.x + (area.width.saturating_sub(width)) / 2;
    let y = area.y + (area.height.saturating_sub(height)) / 2;
    let help_area = Rect::new(x, y, width.min(area.width), height.min(area.height));

    Clear.render(help_area, buf);
    let block = Block::default()
        .title(" Help ")
        .borders(Borders::ALL)
        .style(Style::default().bg(Color::DarkGray));
    let inner = block.inner(help_area);
    block.render(help_area, buf);

    for (i, line) in help_text.iter().enumerate() {
        if i as u16 >= inner.height {
            break;
        }
        buf.set_string(inner.x, inner.y + i as u16, line, Style::default().fg(Color::White));
    }
}

async fn event_loop<B: Backend, F: RecordFetcher + 'static>(
    terminal: &mut Terminal<B>,
    mut explorer: Explorer<F>,
    mut updates: mpsc::UnboundedReceiver<Update>,
) -> io::Result<()> {
    let mut events = EventStream::new();
    loop {
        terminal.draw(|f| explorer.draw(f))?;

        tokio::select! {
            event = events.next() => match event {
                Some(Ok(Event::Key(key))) => {
                    if !explorer.handle_key(key) {
                        break;
                    }
                }
                Some(Ok(Event::Mouse(mouse))) => explorer.handle_mouse(mouse),
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(err),
                None => break,
            },
            Some(update) = updates.recv() => explorer.apply(update),
        }
    }

    let stats = explorer.session.cache_stats();
    tracing::info!(records = stats.entries, fetches = stats.fetches, "explorer closed");
    Ok(())
}

/// Run the interactive explorer until the user quits.
///
/// Must be called from within a tokio runtime; background work runs on a
/// `LocalSet` owned by this call.
pub async fn run_explorer<F: RecordFetcher + 'static>(
    surface: GeoSurface,
    session: Session<F>,
    start: ViewConfig,
) -> io::Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let (tx, rx) = mpsc::unbounded_channel();
    let explorer = Explorer::new(surface, session, start, tx);
    let result = LocalSet::new()
        .run_until(event_loop(&mut terminal, explorer, rx))
        .await;

    // Cleanup
    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::describe::SourceDescription;
    use crate::format::PctDiff;
    use crate::controller::Gates;
    use crate::index::Viewport;
    use crate::records::fake::FakeFetcher;
    use crate::sources::{Placement, SourceRegistry};
    use crossterm::event::KeyModifiers;

    fn explorer() -> Explorer<FakeFetcher> {
        let start = ViewConfig::default();
        let surface = GeoSurface::new(Viewport {
            center: start.center,
            zoom: start.zoom,
            cols: 40,
            rows: 20,
            min_zoom: start.min_zoom,
            max_zoom: start.max_zoom,
        });
        let session = Session::new(SourceRegistry::standard(), FakeFetcher::default(), Gates::default(), ".");
        let (tx, _rx) = mpsc::unbounded_channel();
        Explorer::new(surface, session, start, tx)
    }

    fn type_keys(explorer: &mut Explorer<FakeFetcher>, keys: &str) {
        for c in keys.chars() {
            assert!(explorer.handle_key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE)));
        }
    }

    #[test]
    fn test_parse_fly_to() {
        let (center, zoom) = parse_fly_to("-73.9,40.7 9", 5.8).unwrap();
        assert_eq!(center, LngLat::new(-73.9, 40.7));
        assert_eq!(zoom, 9.0);

        assert_eq!(parse_fly_to(" -76,43 ", 5.8).unwrap().1, 5.8);
        assert_eq!(parse_fly_to("-76,43 z7.5", 5.8).unwrap().1, 7.5);
        assert!(parse_fly_to("", 5.8).is_err());
        assert!(parse_fly_to("-76 43", 5.8).is_err());
        assert!(parse_fly_to("-76,43 9 extra", 5.8).is_err());
    }

    #[test]
    fn test_fly_to_prompt_moves_view() {
        let mut explorer = explorer();
        type_keys(&mut explorer, "f-73.9,40.7 99");
        assert!(explorer.status_line().contains("-73.9,40.7 99_"));
        // Typed keys go to the prompt, not the view bindings
        assert_eq!(explorer.surface.zoom(), 5.8);

        explorer.handle_key(KeyEvent::new(KeyCode::Backspace, KeyModifiers::NONE));
        explorer.handle_key(KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE));
        assert!(explorer.prompt.is_none());
        assert_eq!(explorer.surface.center(), LngLat::new(-73.9, 40.7));
        assert_eq!(explorer.surface.zoom(), 9.0);

        type_keys(&mut explorer, "fnowhere");
        explorer.handle_key(KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE));
        assert!(explorer.message.as_deref().unwrap_or("").starts_with("Fly to:"));
        assert_eq!(explorer.surface.zoom(), 9.0);
    }

    #[test]
    fn test_map_point_inside_area_only() {
        let area = Rect::new(2, 1, 10, 5);
        assert_eq!(map_point(area, 2, 1), Some(ScreenPoint::new(0, 0)));
        assert_eq!(map_point(area, 11, 5), Some(ScreenPoint::new(9, 4)));
        assert_eq!(map_point(area, 12, 3), None);
        assert_eq!(map_point(area, 1, 3), None);
    }

    #[test]
    fn test_panel_lines_follow_sections() {
        let composite = Composite {
            sections: vec![
                SourceDescription {
                    source: "con_districts".to_string(),
                    placement: Placement::Primary,
                    enriched: false,
                    items: vec![vec![DetailLine::Text("New York 20".to_string())]],
                },
                SourceDescription {
                    source: "school_districts".to_string(),
                    placement: Placement::Secondary,
                    enriched: true,
                    items: vec![vec![DetailLine::compared(
                        "Funding Gap",
                        "$1,200.00".to_string(),
                        Some(PctDiff::new(-0.25, false)),
                    )]],
                },
            ],
        };

        let lines = panel_lines(&composite);
        let text: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
        assert_eq!(
            text,
            vec![
                "con_districts",
                "  New York 20",
                "",
                "school_districts",
                "  Funding Gap: $1,200.00 -25.00%*",
            ]
        );
        assert_eq!(lines[4].spans[2].style.fg, Some(Color::Red));
    }
}
