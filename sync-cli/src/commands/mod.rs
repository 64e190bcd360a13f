//! CLI command implementations.

pub mod jobs;
pub mod redrive;
pub mod reset;
pub mod status;
