//! Test support for kiln: in-memory per-kind tables, scripted generators
//! and fixtures.

mod fixtures;
mod generator;
mod tables;

pub use fixtures::*;
pub use generator::ScriptedGenerator;
pub use tables::InMemoryTables;
