//! Pure domain logic for the encounter tracker: clock utilities, cadence
//! normalization, the respawn scheduler, and the bulk-import line parser.
//!
//! Nothing in this crate touches persistence; every function receives the
//! occurrence history and the current instant as inputs, which keeps the
//! scheduler deterministic and trivially testable.

pub mod cadence;
pub mod clock;
pub mod import;
pub mod schedule;

pub use cadence::{parse_cadence_spec, parse_truthy};
pub use import::{parse_history, ImportIssue, ImportedLine};
pub use schedule::{
    classify, next_occurrence, roll_forward, NextSpawn, Outlook, DEFAULT_FORGOTTEN_THRESHOLD,
};
