/// PostgreSQL implementation of the per-kind tables.
///
/// This module provides `PgKindTables`, a PostgreSQL-backed
/// implementation of the [`KindTables`](crate::store::KindTables) trait.
pub mod postgres;

pub use postgres::{PgKindTables, MIGRATION};
