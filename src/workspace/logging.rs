//! Logger construction.
//!
//! Runs log through an owned `slog::Logger`. The default drops every record;
//! [`terminal_logger`] gives asynchronous, human-readable terminal output.
use slog::{Drain, Logger, o};

/// Logger that discards every record.
pub fn discard_logger() -> Logger {
    Logger::root(slog::Discard, o!())
}

/// Full-format terminal logger behind an async drain.
pub fn terminal_logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!("crate" => "rust_l2ws"))
}
