//! Progress module - completion state and the percentages derived from it

pub mod aggregate;
pub mod store;

pub use aggregate::{Progress, SubBlockProgress, aggregate};
pub use store::{Completion, CompletionDetail, CompletionStore, SESSION_TIMEOUT_MS};
