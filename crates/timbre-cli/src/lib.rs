//! Shared helpers for the timbre command-line tools

pub mod library;
pub mod output;
