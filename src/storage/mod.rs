//! Durable retention logs.
//!
//! Each granularity has its own append-only CSV file. Appends are flushed
//! immediately; trimming rewrites the retained tail through a temporary file
//! and an atomic rename, so a crash at any point leaves either the old or
//! the new log, never a mix.

pub mod log_file;
mod record;
pub mod retention_logger;

pub use log_file::LogFile;
pub use retention_logger::RetentionLogger;
