use std::collections::VecDeque;
use std::io;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};

use crate::app::{App, LoadOptions, LoadResult, ProgressEvent, ProgressSink};
use crate::error::ExplorerError;
use crate::export::{ExportDelimiter, default_destination};
use crate::fetch::ArchiveClient;
use crate::filter::{
    ALL, PREVIEW_ROWS, acronym_column, acronym_options, matching_rows, organization_options,
};
use crate::session::Session;
use crate::table::Table;

const EVENTS_MAX: usize = 6;
const SPINNER: &[char] = &['|', '/', '-', '\\'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Explore,
    Projects,
    Publications,
    Help,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Acronym,
    Organization,
    Query,
}

impl Control {
    fn next(self) -> Self {
        match self {
            Control::Acronym => Control::Organization,
            Control::Organization => Control::Query,
            Control::Query => Control::Acronym,
        }
    }

    fn previous(self) -> Self {
        match self {
            Control::Acronym => Control::Query,
            Control::Organization => Control::Acronym,
            Control::Query => Control::Organization,
        }
    }
}

#[derive(Debug)]
struct ViewState {
    status: String,
    phase: String,
    busy: bool,
    events: VecDeque<String>,
}

struct TuiProgress {
    state: Arc<Mutex<ViewState>>,
}

impl ProgressSink for TuiProgress {
    fn event(&self, event: ProgressEvent) {
        if let Ok(mut state) = self.state.lock() {
            let message = event.message.trim().to_string();
            if let Some((phase, payload)) = parse_phase(&message) {
                state.phase = phase.to_string();
                state.status = payload.to_string();
            } else {
                state.status = message.clone();
            }
            if state.events.len() >= EVENTS_MAX {
                state.events.pop_front();
            }
            state.events.push_back(message);
        }
    }
}

fn parse_phase(message: &str) -> Option<(&str, &str)> {
    let rest = message.strip_prefix("phase=")?;
    let (phase, payload) = rest.split_once(';')?;
    Some((phase.trim(), payload.trim()))
}

type LoadOutcome = (Session, Result<LoadResult, ExplorerError>);

pub struct Explorer<C: ArchiveClient + Clone + Send + 'static> {
    app: App<C>,
    session: Session,
    state: Arc<Mutex<ViewState>>,
    view: View,
    control: Control,
    editing_query: bool,
    query_input: String,
    acronyms: Vec<String>,
    organizations: Vec<String>,
    acronym_cursor: usize,
    organization_cursor: usize,
    matches: Vec<usize>,
    preview_scroll: usize,
    raw_scroll: usize,
    pending: Option<Receiver<LoadOutcome>>,
}

impl<C: ArchiveClient + Clone + Send + 'static> Explorer<C> {
    pub fn new(app: App<C>) -> Self {
        Self {
            app,
            session: Session::default(),
            state: Arc::new(Mutex::new(ViewState {
                status: "press f to fetch projects and publications".to_string(),
                phase: "Idle".to_string(),
                busy: false,
                events: VecDeque::new(),
            })),
            view: View::Explore,
            control: Control::Acronym,
            editing_query: false,
            query_input: String::new(),
            acronyms: Vec::new(),
            organizations: Vec::new(),
            acronym_cursor: 0,
            organization_cursor: 0,
            matches: Vec::new(),
            preview_scroll: 0,
            raw_scroll: 0,
            pending: None,
        }
    }

    pub fn run(mut self) -> miette::Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;
        terminal.clear().into_diagnostic()?;

        let mut tick = 0usize;
        loop {
            if let Ok(state) = self.state.lock() {
                terminal
                    .draw(|frame| draw_ui(frame, &self, &state, tick))
                    .into_diagnostic()?;
            }

            self.poll_pending();

            if event::poll(Duration::from_millis(120)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    if self.handle_key(key) {
                        break;
                    }
                }
            }

            tick = tick.wrapping_add(1);
        }

        disable_raw_mode().into_diagnostic()?;
        let mut stdout = io::stdout();
        stdout.execute(LeaveAlternateScreen).into_diagnostic()?;
        Ok(())
    }

    fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    fn poll_pending(&mut self) {
        let Some(rx) = &self.pending else {
            return;
        };
        let (session, result) = match rx.try_recv() {
            Ok(outcome) => outcome,
            Err(mpsc::TryRecvError::Empty) => return,
            Err(mpsc::TryRecvError::Disconnected) => {
                self.pending = None;
                if let Ok(mut state) = self.state.lock() {
                    state.busy = false;
                    state.status = "fetch worker stopped unexpectedly".to_string();
                }
                return;
            }
        };
        self.pending = None;
        self.session = session;
        if let Ok(mut state) = self.state.lock() {
            state.busy = false;
            match &result {
                Ok(load) => {
                    state.phase = "Ready".to_string();
                    state.status = match load.combined_rows {
                        Some(rows) => format!("data loaded, {rows} combined publications"),
                        None => load
                            .merge_note
                            .clone()
                            .unwrap_or_else(|| "data loaded, nothing to combine".to_string()),
                    };
                }
                Err(err) => {
                    state.phase = "Failed".to_string();
                    state.status = err.to_string();
                }
            }
        }
        self.refresh_options();
        self.refilter();
    }

    fn start_load(&mut self, force: bool) {
        if self.is_busy() {
            return;
        }
        if let Ok(mut state) = self.state.lock() {
            state.busy = true;
            state.phase = "Fetch".to_string();
            state.status = "downloading and extracting data".to_string();
        }

        let (tx, rx) = mpsc::channel();
        let app = self.app.clone();
        let mut session = self.session.clone();
        let sink = TuiProgress {
            state: self.state.clone(),
        };
        thread::spawn(move || {
            let result = app.load(&mut session, LoadOptions { force }, &sink);
            let _ = tx.send((session, result));
        });
        self.pending = Some(rx);
    }

    // Selector options come from the combined table, "All" is index zero.
    fn refresh_options(&mut self) {
        let (acronyms, organizations) = match &self.session.combined {
            Some(table) => (acronym_options(table), organization_options(table)),
            None => (Vec::new(), Vec::new()),
        };
        self.acronyms = acronyms;
        self.organizations = organizations;
        self.acronym_cursor = position_for(&self.acronyms, &self.session.selection.acronym);
        self.organization_cursor =
            position_for(&self.organizations, &self.session.selection.organization);
        self.query_input = self.session.selection.project_id.clone();
    }

    fn refilter(&mut self) {
        self.matches = match &self.session.combined {
            Some(table) => matching_rows(table, &self.session.selection),
            None => Vec::new(),
        };
        self.preview_scroll = 0;
    }

    fn set_status(&self, message: impl Into<String>) {
        if let Ok(mut state) = self.state.lock() {
            state.status = message.into();
        }
    }

    fn cycle(&mut self, step: isize) {
        match self.control {
            Control::Acronym => {
                self.acronym_cursor = cycle_cursor(self.acronym_cursor, self.acronyms.len(), step);
                self.session.selection.acronym = match self.acronym_cursor {
                    0 => ALL.to_string(),
                    index => self.acronyms[index - 1].clone(),
                };
            }
            Control::Organization => {
                self.organization_cursor =
                    cycle_cursor(self.organization_cursor, self.organizations.len(), step);
                self.session.selection.organization = match self.organization_cursor {
                    0 => ALL.to_string(),
                    index => self.organizations[index - 1].clone(),
                };
            }
            Control::Query => return,
        }
        self.refilter();
    }

    fn export(&mut self) {
        let destination = default_destination();
        let result = self.app.export(
            &self.session,
            &self.session.selection,
            &destination,
            ExportDelimiter::Comma,
            &NopSink,
        );
        match result {
            Ok(export) => self.set_status(format!("exported {} rows to {}", export.rows, export.path)),
            Err(err) => self.set_status(err.to_string()),
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> bool {
        if key.kind != KeyEventKind::Press {
            return false;
        }

        if self.view != View::Explore {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => self.view = View::Explore,
                KeyCode::Up => self.raw_scroll = self.raw_scroll.saturating_sub(1),
                KeyCode::Down => self.raw_scroll = self.raw_scroll.saturating_add(1),
                KeyCode::PageUp => self.raw_scroll = self.raw_scroll.saturating_sub(10),
                KeyCode::PageDown => self.raw_scroll = self.raw_scroll.saturating_add(10),
                _ => {}
            }
            return false;
        }

        if self.editing_query {
            match key.code {
                KeyCode::Enter => {
                    self.editing_query = false;
                    self.session.selection.project_id = self.query_input.clone();
                    self.refilter();
                }
                KeyCode::Esc => {
                    self.editing_query = false;
                    self.query_input = self.session.selection.project_id.clone();
                }
                KeyCode::Backspace => {
                    self.query_input.pop();
                }
                KeyCode::Char(ch) => self.query_input.push(ch),
                _ => {}
            }
            return false;
        }

        // While a fetch is in flight the worker owns a session copy; block
        // state-changing keys so nothing is silently overwritten on return.
        if self.is_busy()
            && matches!(
                key.code,
                KeyCode::Char('f')
                    | KeyCode::Char('r')
                    | KeyCode::Char('x')
                    | KeyCode::Char('e')
                    | KeyCode::Left
                    | KeyCode::Right
                    | KeyCode::Enter
            )
        {
            return false;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => {
                if self.is_busy() {
                    return false;
                }
                return true;
            }
            KeyCode::Char('f') => self.start_load(false),
            KeyCode::Char('r') => {
                self.session.force_refresh = !self.session.force_refresh;
                let flag = if self.session.force_refresh { "on" } else { "off" };
                self.set_status(format!("force fresh download {flag}"));
            }
            KeyCode::Char('x') => {
                self.app.reset(&mut self.session);
                self.refresh_options();
                self.refilter();
                self.set_status("filters reset");
            }
            KeyCode::Char('e') => self.export(),
            KeyCode::Char('p') => {
                self.view = View::Projects;
                self.raw_scroll = 0;
            }
            KeyCode::Char('u') => {
                self.view = View::Publications;
                self.raw_scroll = 0;
            }
            KeyCode::Char('h') | KeyCode::Char('?') => self.view = View::Help,
            KeyCode::Tab | KeyCode::Down => self.control = self.control.next(),
            KeyCode::BackTab | KeyCode::Up => self.control = self.control.previous(),
            KeyCode::Left => self.cycle(-1),
            KeyCode::Right => self.cycle(1),
            KeyCode::Enter => {
                if self.control == Control::Query {
                    self.editing_query = true;
                }
            }
            KeyCode::PageUp => self.preview_scroll = self.preview_scroll.saturating_sub(10),
            KeyCode::PageDown => {
                let cap = self.matches.len().min(PREVIEW_ROWS).saturating_sub(1);
                self.preview_scroll = (self.preview_scroll + 10).min(cap);
            }
            _ => {}
        }
        false
    }
}

struct NopSink;

impl ProgressSink for NopSink {
    fn event(&self, _event: ProgressEvent) {}
}

fn position_for(options: &[String], selected: &str) -> usize {
    if selected == ALL {
        return 0;
    }
    options
        .iter()
        .position(|option| option == selected)
        .map(|index| index + 1)
        .unwrap_or(0)
}

fn cycle_cursor(cursor: usize, options: usize, step: isize) -> usize {
    let total = options + 1;
    let position = cursor as isize + step;
    position.rem_euclid(total as isize) as usize
}

fn draw_ui<C: ArchiveClient + Clone + Send + 'static>(
    frame: &mut ratatui::Frame,
    explorer: &Explorer<C>,
    state: &ViewState,
    tick: usize,
) {
    match explorer.view {
        View::Explore => draw_explore(frame, explorer, state, tick),
        View::Projects => draw_raw_table(
            frame,
            "Projects dataset",
            explorer.session.aggregated.as_ref(),
            explorer.raw_scroll,
        ),
        View::Publications => draw_raw_table(
            frame,
            "Publications dataset",
            explorer.session.publications.as_ref(),
            explorer.raw_scroll,
        ),
        View::Help => draw_help(frame),
    }
}

fn draw_explore<C: ArchiveClient + Clone + Send + 'static>(
    frame: &mut ratatui::Frame,
    explorer: &Explorer<C>,
    state: &ViewState,
    tick: usize,
) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(6),
            Constraint::Min(5),
            Constraint::Length(5),
        ])
        .split(frame.area());

    draw_header(frame, explorer, state, tick, chunks[0]);
    draw_filters(frame, explorer, chunks[1]);
    draw_results(frame, explorer, chunks[2]);
    draw_status(frame, state, chunks[3]);
}

fn draw_header<C: ArchiveClient + Clone + Send + 'static>(
    frame: &mut ratatui::Frame,
    explorer: &Explorer<C>,
    state: &ViewState,
    tick: usize,
    area: Rect,
) {
    let mut spans = vec![Span::styled(
        "CORDIS EXPLORER",
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    )];
    if state.busy {
        spans.push(Span::raw(format!(
            "  {} {}",
            SPINNER[tick % SPINNER.len()],
            state.phase
        )));
    }
    if explorer.session.force_refresh {
        spans.push(Span::styled(
            "  [force refresh]",
            Style::default().fg(Color::Yellow),
        ));
    }
    if let Some(fetched) = &explorer.session.last_fetch {
        spans.push(Span::styled(
            format!("  last updated {}", fetched.format("%Y-%m-%d %H:%M:%S")),
            Style::default().fg(Color::DarkGray),
        ));
    }

    let header = Paragraph::new(Line::from(spans))
        .block(Block::default().borders(Borders::ALL))
        .alignment(Alignment::Left);
    frame.render_widget(header, area);
}

fn draw_filters<C: ArchiveClient + Clone + Send + 'static>(
    frame: &mut ratatui::Frame,
    explorer: &Explorer<C>,
    area: Rect,
) {
    let selection = &explorer.session.selection;
    let query = if explorer.editing_query {
        format!("{}_", explorer.query_input)
    } else if selection.project_id.is_empty() {
        "(none)".to_string()
    } else {
        selection.project_id.clone()
    };

    let lines = vec![
        control_line(
            "Acronym     ",
            &selection.acronym,
            explorer.control == Control::Acronym,
        ),
        control_line(
            "Organization",
            &selection.organization,
            explorer.control == Control::Organization,
        ),
        control_line("Project ID  ", &query, explorer.control == Control::Query),
        Line::from(Span::styled(
            "tab select, left/right cycle, enter edit project id",
            Style::default().fg(Color::DarkGray),
        )),
    ];

    let block = Block::default().borders(Borders::ALL).title("Filters");
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn control_line(label: &str, value: &str, focused: bool) -> Line<'static> {
    let marker = if focused { "> " } else { "  " };
    let style = if focused {
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    };
    Line::from(vec![
        Span::styled(format!("{marker}{label}  "), style),
        Span::styled(value.to_string(), style),
    ])
}

fn draw_results<C: ArchiveClient + Clone + Send + 'static>(
    frame: &mut ratatui::Frame,
    explorer: &Explorer<C>,
    area: Rect,
) {
    let block = Block::default().borders(Borders::ALL);

    let Some(table) = explorer.session.combined.as_ref() else {
        let hint = match &explorer.session.merge_note {
            Some(note) => format!("could not combine datasets: {note}"),
            None => "no data loaded, press f to fetch".to_string(),
        };
        let empty = Paragraph::new(hint)
            .block(block.title("Publications"))
            .wrap(Wrap { trim: true })
            .alignment(Alignment::Center);
        frame.render_widget(empty, area);
        return;
    };

    let columns = display_columns(table);
    let shown = explorer.matches.len().min(PREVIEW_ROWS);
    let title = if explorer.matches.len() > shown {
        format!(
            "Publications ({} matching, first {shown} shown)",
            explorer.matches.len()
        )
    } else {
        format!("Publications ({} matching)", explorer.matches.len())
    };

    let mut lines = vec![Line::from(Span::styled(
        row_text(
            &columns
                .iter()
                .map(|(_, name)| name.as_str())
                .collect::<Vec<_>>(),
        ),
        Style::default().add_modifier(Modifier::BOLD),
    ))];
    let visible_rows = area.height.saturating_sub(3) as usize;
    for &row_index in explorer
        .matches
        .iter()
        .take(shown)
        .skip(explorer.preview_scroll)
        .take(visible_rows)
    {
        let row = &table.rows()[row_index];
        let cells: Vec<&str> = columns
            .iter()
            .map(|&(index, _)| row[index].as_str())
            .collect();
        lines.push(Line::from(row_text(&cells)));
    }

    let results = Paragraph::new(lines).block(block.title(title));
    frame.render_widget(results, area);
}

// A handful of well-known columns keeps the preview readable; fall back to
// the first few when the upstream schema shifts.
fn display_columns(table: &Table) -> Vec<(usize, String)> {
    let mut columns = Vec::new();
    for name in ["id", "title", "projectID", "Organizations"] {
        if let Some(index) = table.column_index(name) {
            columns.push((index, name.to_string()));
        }
    }
    if let Some(index) = acronym_column(table) {
        columns.insert(columns.len().min(3), (index, "acronym".to_string()));
    }
    if columns.is_empty() {
        columns = table
            .columns()
            .iter()
            .take(5)
            .enumerate()
            .map(|(index, name)| (index, name.clone()))
            .collect();
    }
    columns
}

fn row_text(cells: &[&str]) -> String {
    cells
        .iter()
        .map(|cell| truncate(cell, 36))
        .collect::<Vec<_>>()
        .join(" | ")
}

fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }
    let mut out: String = value.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

fn draw_status(frame: &mut ratatui::Frame, state: &ViewState, area: Rect) {
    let last_event = state.events.back().cloned().unwrap_or_default();
    let lines = vec![
        Line::from(state.status.clone()),
        Line::from(Span::styled(last_event, Style::default().fg(Color::DarkGray))),
        Line::from(Span::styled(
            "f fetch  r force-refresh  x reset  e export  p projects  u publications  h help  q quit",
            Style::default().fg(Color::DarkGray),
        )),
    ];
    let block = Block::default().borders(Borders::ALL).title("Status");
    frame.render_widget(Paragraph::new(lines).block(block).wrap(Wrap { trim: true }), area);
}

fn draw_raw_table(
    frame: &mut ratatui::Frame,
    title: &str,
    table: Option<&Table>,
    scroll: usize,
) {
    let block = Block::default().borders(Borders::ALL);
    let Some(table) = table else {
        let empty = Paragraph::new("nothing loaded yet")
            .block(block.title(title.to_string()))
            .alignment(Alignment::Center);
        frame.render_widget(empty, frame.area());
        return;
    };

    let title = format!(
        "{title} ({} rows x {} columns, q to close)",
        table.row_count(),
        table.columns().len()
    );
    let names: Vec<&str> = table
        .columns()
        .iter()
        .take(6)
        .map(String::as_str)
        .collect();
    let mut lines = vec![Line::from(Span::styled(
        row_text(&names),
        Style::default().add_modifier(Modifier::BOLD),
    ))];
    let visible_rows = frame.area().height.saturating_sub(3) as usize;
    for row in table.rows().iter().skip(scroll).take(visible_rows) {
        let cells: Vec<&str> = row.iter().take(6).map(String::as_str).collect();
        lines.push(Line::from(row_text(&cells)));
    }

    frame.render_widget(Paragraph::new(lines).block(block.title(title)), frame.area());
}

fn draw_help(frame: &mut ratatui::Frame) {
    let lines = vec![
        Line::from("f        fetch projects and publications"),
        Line::from("r        toggle force fresh download"),
        Line::from("tab/up/down   move between filter controls"),
        Line::from("left/right    cycle acronym or organization"),
        Line::from("enter    edit the project id query"),
        Line::from("x        reset all filters"),
        Line::from("e        export filtered rows"),
        Line::from("p / u    raw projects / publications view"),
        Line::from("q        back / quit"),
    ];
    let block = Block::default().borders(Borders::ALL).title("Help");
    frame.render_widget(
        Paragraph::new(lines).block(block).wrap(Wrap { trim: true }),
        frame.area(),
    );
}
