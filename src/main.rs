//! rutina - Workout session progress engine
//!
//! Train a coached routine set by set from the terminal.

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Result, anyhow, bail};
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use rutina::db::{DataStore, Database, RoutineLoader};
use rutina::notify::TerminalBell;
use rutina::progress::CompletionStore;
use rutina::routine::{ElementRef, RawRoutine, Routine, RoutineKind};
use rutina::session::{ElementInput, RoutineSession, SystemClock};
use rutina::storage::SqliteStorage;
use rutina::tui::{App, describe, format_clock};

type Session = RoutineSession<SqliteStorage, SystemClock>;

#[derive(Parser)]
#[command(name = "rutina")]
#[command(author, version, about = "Workout session progress engine")]
struct Cli {
    /// Routine store
    #[arg(long, env = "RUTINA_DB", default_value = "rutina.db", global = true)]
    db: String,

    /// Local progress and timer state
    #[arg(long, env = "RUTINA_STATE", default_value = "rutina-state.db", global = true)]
    state: String,

    /// Current student id
    #[arg(long, env = "RUTINA_STUDENT", default_value = "local", global = true)]
    student: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a routine from a JSON file
    Import {
        file: String,

        /// Routine kind (base or personalizada)
        #[arg(short, long, default_value = "base")]
        kind: RoutineKind,
    },

    /// List stored routines
    List,

    /// Show a routine with its progress
    Show {
        routine: String,

        #[arg(short, long, default_value = "base")]
        kind: RoutineKind,

        /// Only this block
        #[arg(short, long)]
        block: Option<String>,
    },

    /// Mark or unmark one element
    Toggle {
        routine: String,

        /// Element id, e.g. "simple/<sub-block>/<exercise>/set1"
        element: String,

        #[arg(short, long, default_value = "base")]
        kind: RoutineKind,

        /// Reps performed
        #[arg(long)]
        reps: Option<u32>,

        /// Load used (e.g. "20", "20kg")
        #[arg(long)]
        load: Option<String>,

        /// Seconds performed, for timed sets
        #[arg(long)]
        duration: Option<u32>,
    },

    /// Mark or unmark a whole superset round
    Round {
        routine: String,
        sub_block: String,
        round: u32,

        #[arg(short, long, default_value = "base")]
        kind: RoutineKind,
    },

    /// End the running rest now
    SkipRest {
        routine: String,

        #[arg(short, long, default_value = "base")]
        kind: RoutineKind,
    },

    /// Current element, rest and elapsed time
    Status {
        routine: String,

        #[arg(short, long, default_value = "base")]
        kind: RoutineKind,
    },

    /// Save the session and clear local progress
    Finish {
        routine: String,

        #[arg(short, long, default_value = "base")]
        kind: RoutineKind,
    },

    /// Series from the last saved session
    History {
        routine: String,

        #[arg(short, long, default_value = "base")]
        kind: RoutineKind,
    },

    /// Open the workout screen
    Train {
        routine: String,

        #[arg(short, long, default_value = "base")]
        kind: RoutineKind,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db = Arc::new(Mutex::new(Database::open(&cli.db)?));
    let loader = RoutineLoader::new(Arc::clone(&db));

    match cli.command {
        Some(Commands::Import { ref file, kind }) => {
            let raw: RawRoutine = serde_json::from_str(&std::fs::read_to_string(file)?)?;
            lock(&db)?.import_routine(&raw, kind)?;
            println!("Imported: {} ({}, id: {})", raw.nombre, kind, raw.id);
        }

        Some(Commands::List) => {
            println!("Routines:");
            println!("{:-<60}", "");
            for (id, kind, name) in lock(&db)?.list_routines()? {
                println!("{:36} | {:13} | {}", id, kind, name);
            }
        }

        Some(Commands::Show { ref routine, kind, ref block }) => {
            let routine = load_routine(&loader, routine, kind).await?;
            let routine = match block {
                Some(block_id) => routine
                    .filtered_to_block(block_id)
                    .ok_or_else(|| anyhow!("block {} not in routine", block_id))?,
                None => routine,
            };
            let mut storage = SqliteStorage::open(&cli.state)?;
            let completion = CompletionStore::load(&mut storage, &routine.id, chrono::Utc::now().timestamp_millis());
            print_routine(&routine, &completion);
        }

        Some(Commands::Toggle {
            ref routine,
            ref element,
            kind,
            reps,
            ref load,
            duration,
        }) => {
            let mut session = open_session(&cli, &db, &loader, routine, kind).await?;
            let element = ElementRef::decode(element)?;

            let input = if reps.is_some() || load.is_some() || duration.is_some() {
                let defaults = session.default_input(&element);
                Some(ElementInput {
                    load: load.clone().unwrap_or(defaults.load),
                    reps: reps.unwrap_or(defaults.reps),
                    duration_secs: duration.unwrap_or(defaults.duration_secs),
                })
            } else {
                None
            };

            match session.toggle(&element, input) {
                Some(t) => println!("{}", describe(&t)),
                None => bail!("element {} is not part of routine {}", element, routine),
            }
            print_status(&session);
        }

        Some(Commands::Round {
            ref routine,
            ref sub_block,
            round,
            kind,
        }) => {
            let mut session = open_session(&cli, &db, &loader, routine, kind).await?;
            match session.toggle_round(sub_block, round) {
                Some(t) => println!("{}", describe(&t)),
                None => bail!("no superset round {} in sub-block {}", round, sub_block),
            }
            print_status(&session);
        }

        Some(Commands::SkipRest { ref routine, kind }) => {
            let mut session = open_session(&cli, &db, &loader, routine, kind).await?;
            match session.skip_rest() {
                Some(t) => println!("{}", describe(&t)),
                None => println!("No rest running"),
            }
        }

        Some(Commands::Status { ref routine, kind }) => {
            // read-only: does not start the workout clock
            let routine = load_routine(&loader, routine, kind).await?;
            let storage = SqliteStorage::open(&cli.state)?;
            let session = RoutineSession::peek(routine, kind, storage, SystemClock);
            print_status(&session);
        }

        Some(Commands::Finish { ref routine, kind }) => {
            let mut session = open_session(&cli, &db, &loader, routine, kind).await?;
            let elapsed = session.elapsed_secs();
            let result = session.finish(&*lock(&db)?, &cli.student);
            match result {
                Ok(saved) => println!(
                    "Sesión guardada (id: {}, {} series, {})",
                    saved.session_id,
                    saved.series_count,
                    format_clock(elapsed)
                ),
                Err(e) => {
                    warn!("Finish failed: {}", e);
                    bail!(e.user_message());
                }
            }
        }

        Some(Commands::History { ref routine, kind }) => {
            let last = lock(&db)?.fetch_last_session(routine, kind, &cli.student)?;
            let Some(last) = last else {
                println!("No saved sessions yet");
                return Ok(());
            };

            println!("Session {} - {}", last.session_id, last.created_at.format("%Y-%m-%d %H:%M"));
            println!("{:-<60}", "");
            for s in &last.series {
                let amount = match (s.reps_performed, s.duration_performed_secs) {
                    (_, Some(secs)) => format!("{}s", secs),
                    (Some(reps), None) => format!("{} reps", reps),
                    (None, None) => "-".to_string(),
                };
                println!("{:24} | set {:2} | {:10} | {}", s.exercise_id, s.set_number, amount, s.load_performed);
            }
        }

        Some(Commands::Train { ref routine, kind }) => {
            let session = open_session(&cli, &db, &loader, routine, kind).await?;
            let mut app = App::new(session, Arc::clone(&db), &cli.student);
            app.run()?;
        }

        None => {
            // Default: train the first stored routine
            let first = lock(&db)?.list_routines()?.into_iter().next();
            let Some((id, kind, _)) = first else {
                println!("No routines stored. Import one with `rutina import <file.json>`");
                return Ok(());
            };
            let session = open_session(&cli, &db, &loader, &id, kind).await?;
            let mut app = App::new(session, Arc::clone(&db), &cli.student);
            app.run()?;
        }
    }

    Ok(())
}

fn lock(db: &Arc<Mutex<Database>>) -> Result<MutexGuard<'_, Database>> {
    db.lock().map_err(|_| anyhow!("database lock poisoned"))
}

async fn load_routine(loader: &RoutineLoader<Database>, routine_id: &str, kind: RoutineKind) -> Result<Routine> {
    loader.load(routine_id, kind).await.map_err(|e| {
        warn!("{}", e);
        anyhow!(e.user_message())
    })
}

async fn open_session(
    cli: &Cli,
    db: &Arc<Mutex<Database>>,
    loader: &RoutineLoader<Database>,
    routine_id: &str,
    kind: RoutineKind,
) -> Result<Session> {
    let routine = load_routine(loader, routine_id, kind).await?;
    let storage = SqliteStorage::open(&cli.state)?;
    let (mut session, transition) = RoutineSession::open(routine, kind, storage, SystemClock, &TerminalBell);
    if let Some(t) = transition {
        println!("{}", describe(&t));
    }

    if let Err(e) = session.load_last_session(&*lock(db)?, &cli.student) {
        warn!("No previous performance: {}", e);
    }
    Ok(session)
}

fn print_routine(routine: &Routine, completion: &CompletionStore) {
    let progress = rutina::progress::aggregate(routine, completion);
    println!("{} - {}%", routine.name, progress.global_percent);
    println!("{:-<60}", "");

    for block in &routine.blocks {
        println!("Block {} ({}%)", block.id, progress.block_percent(&block.id));
        for sub_block in block.display_order() {
            let sp = progress.sub_block(&sub_block.id);
            println!("  {} [{}/{}]", sub_block.name, sp.completed, sp.total);
            for el in sub_block.elements() {
                let check = if completion.is_completed(&el) { "x" } else { " " };
                let name = routine.resolve(&el).map(|r| r.exercise_name().to_string()).unwrap_or_default();
                println!("    [{}] {:20} {}", check, name, el);
            }
        }
    }
}

fn print_status(session: &Session) {
    let progress = session.progress();
    println!(
        "{} | {} | {}%",
        session.routine().name,
        format_clock(session.elapsed_secs()),
        progress.global_percent
    );

    match session.active() {
        Some(active) => println!("Active: {}", active),
        None if progress.is_routine_completed() => println!("{}", rutina::session::ROUTINE_COMPLETE_LABEL),
        None => println!("Active: -"),
    }
    if let Some(rest) = session.rest_snapshot() {
        println!("Rest: {}s left, next {}", rest.time_left_secs, rest.next_name);
    }
}
