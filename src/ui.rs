use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use merchant_batch_archive::report::{MonthlyReport, Report};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::io;

/// Monthly report browser: one page per Year-Month
pub struct App {
    pub report: Report,
    pub month: usize,
    pub state: TableState,
    pub live_rows: i64,
}

impl App {
    pub fn new(report: Report, live_rows: i64) -> Self {
        let mut app = Self {
            report,
            month: 0,
            state: TableState::default(),
            live_rows,
        };
        app.reset_selection();
        app
    }

    pub fn current(&self) -> Option<&MonthlyReport> {
        self.report.months.get(self.month)
    }

    fn row_count(&self) -> usize {
        self.current().map(|m| m.rows.len()).unwrap_or(0)
    }

    fn reset_selection(&mut self) {
        let selected = if self.row_count() > 0 { Some(0) } else { None };
        self.state.select(selected);
    }

    pub fn next_month(&mut self) {
        let months = self.report.months.len();
        if months == 0 {
            return;
        }
        self.month = (self.month + 1) % months;
        self.reset_selection();
    }

    pub fn previous_month(&mut self) {
        let months = self.report.months.len();
        if months == 0 {
            return;
        }
        self.month = if self.month == 0 { months - 1 } else { self.month - 1 };
        self.reset_selection();
    }

    pub fn next(&mut self) {
        let len = self.row_count();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(i) if i + 1 < len => i + 1,
            _ => 0,
        };
        self.state.select(Some(i));
    }

    pub fn previous(&mut self) {
        let len = self.row_count();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.state.select(Some(i));
    }
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res?;
    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(terminal: &mut Terminal<B>, app: &mut App) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Tab if key.modifiers.contains(KeyModifiers::SHIFT) => app.previous_month(),
                KeyCode::Tab | KeyCode::Right => app.next_month(),
                KeyCode::BackTab | KeyCode::Left => app.previous_month(),
                KeyCode::Down | KeyCode::Char('j') => app.next(),
                KeyCode::Up | KeyCode::Char('k') => app.previous(),
                _ => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Month tabs
            Constraint::Min(0),    // Report table
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);
    render_table(f, chunks[1], app);
    render_status_bar(f, chunks[2], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let mut tab_spans = vec![];
    for (i, month) in app.report.months.iter().enumerate() {
        if i > 0 {
            tab_spans.push(Span::raw(" │ "));
        }

        let style = if i == app.month {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        tab_spans.push(Span::styled(month.year_month.clone(), style));
    }

    if tab_spans.is_empty() {
        tab_spans.push(Span::styled("No Data", Style::default().fg(Color::DarkGray)));
    }

    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("Live rows: {}", app.live_rows),
        Style::default().fg(Color::White),
    ));

    let header = Paragraph::new(vec![Line::from(tab_spans)])
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));

    f.render_widget(header, area);
}

fn render_table(f: &mut Frame, area: Rect, app: &mut App) {
    let header_style = Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD);
    let mut header_cells = vec![
        Cell::from("Merchant Name").style(header_style),
        Cell::from("Total Count").style(header_style),
        Cell::from("Sale Amount").style(header_style),
    ];
    header_cells.extend(
        app.report
            .card_schemes
            .iter()
            .map(|s| Cell::from(s.clone()).style(header_style)),
    );
    let header = Row::new(header_cells)
        .style(Style::default().bg(Color::DarkGray))
        .height(1);

    let schemes = &app.report.card_schemes;
    let rows: Vec<Row> = app
        .current()
        .map(|month| {
            month
                .rows
                .iter()
                .map(|row| {
                    let mut cells = vec![
                        Cell::from(truncate(&row.merchant_name, 30)),
                        Cell::from(row.total_count.to_string()),
                        Cell::from(format!("{:.2}", row.sale_amount)).style(Style::default().fg(Color::Green)),
                    ];
                    cells.extend(schemes.iter().map(|s| {
                        Cell::from(row.scheme_counts.get(s).copied().unwrap_or(0).to_string())
                    }));
                    Row::new(cells).height(1)
                })
                .collect()
        })
        .unwrap_or_default();

    let mut widths = vec![Constraint::Length(32), Constraint::Length(12), Constraint::Length(14)];
    widths.extend(schemes.iter().map(|s| Constraint::Length(s.chars().count().max(6) as u16 + 2)));

    let title = app
        .current()
        .map(|m| format!(" {} ", m.year_month))
        .unwrap_or_else(|| " Report ".to_string());

    let table = Table::new(rows, widths)
        .header(header)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::White))
                .title(title),
        )
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.state);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let selected = app.state.selected().map(|i| i + 1).unwrap_or(0);

    let status_spans = vec![
        Span::styled(
            format!(" Row: {}/{} ", selected, app.row_count()),
            Style::default().fg(Color::Cyan),
        ),
        Span::raw(" | "),
        Span::styled("Tab/Shift-Tab", Style::default().fg(Color::Yellow)),
        Span::raw(" Month | "),
        Span::styled("↑/↓", Style::default().fg(Color::Yellow)),
        Span::raw(" Nav | "),
        Span::styled("q", Style::default().fg(Color::Red)),
        Span::raw(" Quit"),
    ];

    let status_bar = Paragraph::new(vec![Line::from(status_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
