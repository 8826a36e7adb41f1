//! Database layer for the Solace session core.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! embedded SQL migrations, and runtime settings. Every table used by the
//! session core is created through versioned migrations managed by this
//! crate.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: the session core is single-process by design
//!   (a conversation's live state is owned by exactly one process), so an
//!   embedded database with concurrent readers and a single writer matches
//!   the access pattern without an external database server.
//! - **`r2d2` connection pool**: bounded connection reuse without manual
//!   lifetime management. Async callers check connections out inside
//!   `tokio::task::spawn_blocking`.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!`, ensuring migrations ship with the server and cannot
//!   drift from the code that depends on them.

mod migrations;
mod pool;

pub use migrations::run_migrations;
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
