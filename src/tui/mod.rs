//! TUI module - Workout screen with ratatui

use std::io::{Stdout, stdout};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use crossterm::{
    ExecutableCommand,
    event::{self, Event, KeyCode, KeyEventKind},
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Cell, Gauge, Paragraph, Row, Table, TableState},
};

use crate::db::Database;
use crate::notify::{Notifier, REST_ELAPSED_PATTERN, TerminalBell};
use crate::routine::{ElementRef, Routine};
use crate::session::{Clock, ROUTINE_COMPLETE_LABEL, RoutineSession, Transition};
use crate::storage::KeyValueStore;

type Tui = Terminal<CrosstermBackend<Stdout>>;

const TICK: Duration = Duration::from_millis(250);

/// App state for TUI
pub struct App<S, C> {
    session: RoutineSession<S, C>,
    db: Arc<Mutex<Database>>,
    student_id: String,
    rows: Vec<ElementRef>,
    selected: usize,
    status: String,
    notifier: TerminalBell,
    should_quit: bool,
}

impl<S: KeyValueStore, C: Clock> App<S, C> {
    pub fn new(session: RoutineSession<S, C>, db: Arc<Mutex<Database>>, student_id: &str) -> Self {
        let rows = display_rows(session.routine());
        let selected = session
            .active()
            .and_then(|active| rows.iter().position(|el| el == active))
            .unwrap_or(0);

        Self {
            session,
            db,
            student_id: student_id.to_string(),
            rows,
            selected,
            status: String::new(),
            notifier: TerminalBell,
            should_quit: false,
        }
    }

    /// Run the TUI application
    pub fn run(&mut self) -> Result<()> {
        let mut terminal = init_terminal()?;

        while !self.should_quit {
            if let Some(transition) = self.session.tick() {
                self.notifier.vibrate(REST_ELAPSED_PATTERN);
                self.apply(transition);
            }
            terminal.draw(|frame| self.render(frame))?;
            self.handle_events()?;
        }

        restore_terminal()?;
        Ok(())
    }

    fn render(&self, frame: &mut Frame) {
        let area = frame.area();

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Min(10),
                Constraint::Length(3),
                Constraint::Length(3),
            ])
            .split(area);

        // Header
        let progress = self.session.progress();
        let header = Paragraph::new(format!(
            "{} | {} | {}%",
            self.session.routine().name,
            format_clock(self.session.elapsed_secs()),
            progress.global_percent
        ))
        .style(Style::default().fg(Color::Cyan).bold())
        .block(Block::default().borders(Borders::ALL));
        frame.render_widget(header, chunks[0]);

        // Element table
        let active = self.session.active();
        let table_rows: Vec<Row> = self
            .rows
            .iter()
            .map(|el| {
                let resolved = self.session.routine().resolve(el);
                let done = self.session.completion().is_completed(el);
                let marker = if active == Some(el) { "▶" } else { " " };
                let check = if done { "[x]" } else { "[ ]" };
                let input = self.session.default_input(el);
                let target = match resolved {
                    Some(r) if r.execution_type().is_timed() => format!("{}s", input.duration_secs),
                    _ => format!("{} reps", input.reps),
                };

                let row = Row::new(vec![
                    Cell::from(format!("{} {}", marker, check)),
                    Cell::from(resolved.map(|r| r.sub_block.name.clone()).unwrap_or_default()),
                    Cell::from(resolved.map(|r| r.exercise_name().to_string()).unwrap_or_default()),
                    Cell::from(element_label(el)),
                    Cell::from(target),
                    Cell::from(input.load),
                ]);
                if done {
                    row.style(Style::default().fg(Color::DarkGray))
                } else if active == Some(el) {
                    row.style(Style::default().fg(Color::Green))
                } else {
                    row
                }
            })
            .collect();

        let table = Table::new(
            table_rows,
            [
                Constraint::Length(6),
                Constraint::Length(18),
                Constraint::Min(18),
                Constraint::Length(9),
                Constraint::Length(9),
                Constraint::Length(8),
            ],
        )
        .header(
            Row::new(vec!["", "Bloque", "Ejercicio", "Serie", "Objetivo", "Carga"])
                .style(Style::default().bold()),
        )
        .row_highlight_style(Style::default().reversed())
        .block(Block::default().borders(Borders::ALL).title("Rutina"));

        let mut state = TableState::default().with_selected(Some(self.selected));
        frame.render_stateful_widget(table, chunks[1], &mut state);

        // Rest countdown or status line
        match self.session.rest_snapshot() {
            Some(rest) => {
                let ratio = if rest.original_secs == 0 {
                    0.0
                } else {
                    (rest.time_left_secs as f64 / f64::from(rest.original_secs)).clamp(0.0, 1.0)
                };
                let gauge = Gauge::default()
                    .block(Block::default().borders(Borders::ALL).title("Descanso"))
                    .gauge_style(Style::default().fg(Color::Yellow))
                    .ratio(ratio)
                    .label(format!("{}s | Siguiente: {}", rest.time_left_secs, rest.next_name));
                frame.render_widget(gauge, chunks[2]);
            }
            None => {
                let status = Paragraph::new(self.status.as_str())
                    .block(Block::default().borders(Borders::ALL).title("Estado"));
                frame.render_widget(status, chunks[2]);
            }
        }

        // Footer
        let footer = Paragraph::new(
            "q: salir | ↑↓: mover | espacio: marcar | enter: marcar activo | r: ronda | s: saltar descanso | f: terminar",
        )
        .style(Style::default().fg(Color::DarkGray))
        .block(Block::default().borders(Borders::ALL));
        frame.render_widget(footer, chunks[3]);
    }

    fn handle_events(&mut self) -> Result<()> {
        if event::poll(TICK)?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
        {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
                KeyCode::Up | KeyCode::Char('k') => {
                    self.selected = self.selected.saturating_sub(1);
                }
                KeyCode::Down | KeyCode::Char('j') => {
                    if self.selected + 1 < self.rows.len() {
                        self.selected += 1;
                    }
                }
                KeyCode::Char(' ') => {
                    if let Some(el) = self.rows.get(self.selected).cloned() {
                        self.toggle(&el);
                    }
                }
                KeyCode::Enter => {
                    if let Some(el) = self.session.active().cloned() {
                        self.toggle(&el);
                    }
                }
                KeyCode::Char('r') => {
                    if let Some(ElementRef::SupersetRound { sub_block_id, round, .. }) =
                        self.rows.get(self.selected).cloned()
                        && let Some(t) = self.session.toggle_round(&sub_block_id, round)
                    {
                        self.apply(t);
                    }
                }
                KeyCode::Char('s') => {
                    if let Some(t) = self.session.skip_rest() {
                        self.apply(t);
                    }
                }
                KeyCode::Char('f') => self.finish()?,
                _ => {}
            }
        }
        Ok(())
    }

    fn toggle(&mut self, element: &ElementRef) {
        if let Some(t) = self.session.toggle(element, None) {
            self.apply(t);
        }
    }

    fn finish(&mut self) -> Result<()> {
        let db = self.db.lock().map_err(|_| anyhow!("database lock poisoned"))?;
        self.status = match self.session.finish(&*db, &self.student_id) {
            Ok(saved) => format!("Sesión guardada ({} series)", saved.series_count),
            Err(e) => {
                tracing::error!("Finish failed: {}", e);
                e.user_message().to_string()
            }
        };
        Ok(())
    }

    fn apply(&mut self, transition: Transition) {
        self.status = describe(&transition);
        let active = match &transition {
            Transition::Advanced { active } | Transition::RestFinished { active } => active.as_ref(),
            Transition::Revisit { active } => Some(active),
            Transition::RestStarted { .. } => None,
        };
        if let Some(pos) = active.and_then(|a| self.rows.iter().position(|el| el == a)) {
            self.selected = pos;
        }
    }
}

/// Elements in the order they are shown: blocks by order, warm-up sub-blocks first
fn display_rows(routine: &Routine) -> Vec<ElementRef> {
    routine
        .blocks
        .iter()
        .flat_map(|block| block.display_order())
        .flat_map(|sub_block| sub_block.elements())
        .collect()
}

fn element_label(element: &ElementRef) -> String {
    match element {
        ElementRef::Simple { set_number, .. } => format!("Serie {}", set_number),
        ElementRef::SupersetRound { round, .. } => format!("Ronda {}", round),
    }
}

/// One-line text for a coordinator transition
pub fn describe(transition: &Transition) -> String {
    match transition {
        Transition::RestStarted {
            duration_secs,
            next_name,
            ..
        } => format!("Descanso de {}s, luego {}", duration_secs, next_name),
        Transition::Advanced { active: None } | Transition::RestFinished { active: None } => {
            ROUTINE_COMPLETE_LABEL.to_string()
        }
        Transition::Advanced { active: Some(el) } | Transition::RestFinished { active: Some(el) } => {
            format!("Siguiente: {}", el)
        }
        Transition::Revisit { active } => format!("Repitiendo {}", active),
    }
}

pub fn format_clock(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{:02}:{:02}", m, s)
    }
}

fn init_terminal() -> Result<Tui> {
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    Ok(terminal)
}

fn restore_terminal() -> Result<()> {
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routine::SubBlockKind;
    use crate::routine::tests::{block, routine, series, slot, sub_block};

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(0), "00:00");
        assert_eq!(format_clock(754), "12:34");
        assert_eq!(format_clock(3_725), "1:02:05");
    }

    #[test]
    fn test_display_rows_put_warm_up_first() {
        let routine = routine(vec![block(
            "b1",
            1,
            vec![
                sub_block(
                    "main",
                    1,
                    "Principal",
                    SubBlockKind::Simple,
                    vec![slot("m", "ex-m", "Peso muerto", vec![series(1, 5, 0)])],
                ),
                sub_block(
                    "warm",
                    2,
                    "Calentamiento",
                    SubBlockKind::Simple,
                    vec![slot("w", "ex-w", "Movilidad", vec![series(1, 10, 0)])],
                ),
            ],
        )]);
        let rows = display_rows(&routine);
        assert_eq!(rows[0], ElementRef::simple("warm", "w", 1));
        assert_eq!(rows[1], ElementRef::simple("main", "m", 1));
    }

    #[test]
    fn test_describe_completion() {
        assert_eq!(describe(&Transition::Advanced { active: None }), "¡Rutina Completada!");
        assert_eq!(element_label(&ElementRef::superset_round("ss", "a", 2)), "Ronda 2");
    }
}
