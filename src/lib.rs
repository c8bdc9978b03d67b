//! Structural parser for MuseScore 3 MSCX files.
//!
//! The parser builds a master table with one row per measure node, derives
//! displayed measure numbers, analyzes the repeat and volta structure,
//! partitions the score into sections with a playback successor relation,
//! and compiles a flat, queryable note list with exact rational onsets and
//! durations.
//!
//! Measure count `mc` is the zero-based ordinal of a measure node in
//! document order; measure number `mn` is the number shown in the score and
//! can span several nodes (split measures) or skip excluded ones.

pub mod duration;
pub mod error;
pub mod pitch;
pub mod score;

pub use error::{Error, Result};
pub use score::{NoteQuery, ParseOptions, Score};
