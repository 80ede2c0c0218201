//! rutina - Workout session progress engine
//!
//! Tracks which sets of a training routine are done, how far along each
//! block is, which element comes next and when the rest between them ends.

pub mod db;
pub mod error;
pub mod notify;
pub mod progress;
pub mod routine;
pub mod session;
pub mod storage;
pub mod tui;

pub use db::{Database, DataStore, RoutineLoader};
pub use routine::{ElementRef, Routine, RoutineKind};
pub use session::RoutineSession;
