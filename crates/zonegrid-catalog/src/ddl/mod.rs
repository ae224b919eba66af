//! DDL front-end.
//!
//! Parses the zone and table statements into [`Statement`] values that
//! [`crate::Catalog::execute`] applies. Parsing is purely syntactic:
//! schema validation happens when a statement is executed.

pub mod lexer;
pub mod parser;

use crate::registry::{ZoneAlter, ZoneSpec};
use crate::schema::TableSchemaBuilder;

pub use parser::{Parser, parse};

/// One parsed DDL statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    CreateZone {
        spec: ZoneSpec,
        if_not_exists: bool,
    },
    AlterZone {
        name: String,
        alter: ZoneAlter,
        if_exists: bool,
    },
    DropZone {
        name: String,
        if_exists: bool,
    },
    CreateTable {
        table: TableSchemaBuilder,
        if_not_exists: bool,
    },
    CreateIndex {
        name: String,
        table: String,
        columns: Vec<String>,
        if_not_exists: bool,
    },
    DropTable {
        name: String,
        if_exists: bool,
    },
}
