//! Database backend.
//!
//! Currently SQLite only. The store is written for sqlx's SQLite driver; a
//! second backend would get its own pool wrapper with the same interface.

mod sqlite;

pub use sqlite::SqlitePool;
