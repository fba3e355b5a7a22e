pub mod cli;
pub mod commands;
pub mod output;
pub mod runtime;

pub use facelock_core::errors;
