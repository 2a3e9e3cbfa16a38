//! CLI command implementations

pub mod classify;
pub mod context;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod tasks;
