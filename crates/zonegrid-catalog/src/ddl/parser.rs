//! Recursive-descent parser for DDL scripts.

use zonegrid_core::{ColumnType, ConsistencyMode};
use zonegrid_state::ColumnDef;

use super::Statement;
use super::lexer::{Lexer, Token, TokenKind};
use crate::error::ParseError;
use crate::registry::{DEFAULT_ZONE, ZoneAlter, ZoneSpec};
use crate::schema::TableSchemaBuilder;

const DEFAULT_REPLICAS: u32 = 1;
const DEFAULT_PARTITIONS: u32 = 25;

/// Parse a `;`-separated script.
pub fn parse(source: &str) -> Result<Vec<Statement>, ParseError> {
    let tokens = Lexer::new(source).tokenize();
    Parser::new(tokens).parse_script()
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    pub fn parse_script(&mut self) -> Result<Vec<Statement>, ParseError> {
        let mut statements = Vec::new();
        loop {
            while self.eat(&TokenKind::Semicolon) {}
            if self.check(&TokenKind::Eof) {
                return Ok(statements);
            }
            statements.push(self.parse_statement()?);
            if !self.check(&TokenKind::Eof) {
                self.expect(&TokenKind::Semicolon, "';'")?;
            }
        }
    }

    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        if self.eat_keyword("CREATE") {
            if self.eat_keyword("ZONE") {
                return self.parse_create_zone();
            }
            if self.eat_keyword("TABLE") {
                return self.parse_create_table();
            }
            if self.eat_keyword("INDEX") {
                return self.parse_create_index();
            }
            return Err(self.error("expected ZONE, TABLE or INDEX after CREATE"));
        }
        if self.eat_keyword("ALTER") {
            self.expect_keyword("ZONE")?;
            return self.parse_alter_zone();
        }
        if self.eat_keyword("DROP") {
            if self.eat_keyword("ZONE") {
                let if_exists = self.parse_if_exists()?;
                let name = self.expect_ident()?;
                return Ok(Statement::DropZone { name, if_exists });
            }
            if self.eat_keyword("TABLE") {
                let if_exists = self.parse_if_exists()?;
                let name = self.expect_ident()?;
                return Ok(Statement::DropTable { name, if_exists });
            }
            return Err(self.error("expected ZONE or TABLE after DROP"));
        }
        Err(self.error("expected CREATE, ALTER or DROP"))
    }

    // ── Zones ─────────────────────────────────────────────────────

    fn parse_create_zone(&mut self) -> Result<Statement, ParseError> {
        let if_not_exists = self.parse_if_not_exists()?;
        let name = self.expect_ident()?;
        let mut spec = ZoneSpec::new(&name, DEFAULT_REPLICAS, DEFAULT_PARTITIONS);

        if self.eat_keyword("WITH") {
            let alter = self.parse_zone_options()?;
            if let Some(n) = alter.replicas {
                spec.replicas = n;
            }
            if let Some(n) = alter.partitions {
                spec.partitions = n;
            }
            if let Some(p) = alter.storage_profile {
                spec.storage_profile = p;
            }
            if let Some(m) = alter.consistency_mode {
                spec.consistency_mode = m;
            }
        }

        Ok(Statement::CreateZone {
            spec,
            if_not_exists,
        })
    }

    fn parse_alter_zone(&mut self) -> Result<Statement, ParseError> {
        let if_exists = self.parse_if_exists()?;
        let name = self.expect_ident()?;
        self.expect_keyword("SET")?;
        let alter = self.parse_zone_options()?;
        Ok(Statement::AlterZone {
            name,
            alter,
            if_exists,
        })
    }

    /// `OPTION=value [, OPTION=value]*`, rejecting repeats.
    fn parse_zone_options(&mut self) -> Result<ZoneAlter, ParseError> {
        let mut alter = ZoneAlter::default();
        loop {
            let option = self.expect_ident()?.to_ascii_uppercase();
            self.expect(&TokenKind::Eq, "'='")?;
            let repeated = match option.as_str() {
                "REPLICAS" => alter.replicas.replace(self.expect_u32()?).is_some(),
                "PARTITIONS" => alter.partitions.replace(self.expect_u32()?).is_some(),
                "STORAGE_PROFILES" => alter
                    .storage_profile
                    .replace(self.expect_text()?)
                    .is_some(),
                "CONSISTENCY_MODE" => {
                    let text = self.expect_text()?;
                    let mode = ConsistencyMode::parse(&text).ok_or_else(|| {
                        self.error_before(&format!("unknown consistency mode '{text}'"))
                    })?;
                    alter.consistency_mode.replace(mode).is_some()
                }
                other => return Err(self.error_before(&format!("unknown zone option {other}"))),
            };
            if repeated {
                return Err(self.error_before(&format!("zone option {option} given twice")));
            }
            if !self.eat(&TokenKind::Comma) {
                return Ok(alter);
            }
        }
    }

    // ── Tables ────────────────────────────────────────────────────

    fn parse_create_table(&mut self) -> Result<Statement, ParseError> {
        let if_not_exists = self.parse_if_not_exists()?;
        let name = self.expect_ident()?;
        let mut table = TableSchemaBuilder::new(&name);
        let mut primary_key: Option<Vec<String>> = None;

        self.expect(&TokenKind::LParen, "'('")?;
        loop {
            if self.eat_keyword("PRIMARY") {
                self.expect_keyword("KEY")?;
                let cols = self.parse_column_list()?;
                if primary_key.replace(cols).is_some() {
                    return Err(self.error_before("primary key declared twice"));
                }
            } else {
                let (column, inline_pk) = self.parse_column()?;
                if inline_pk && primary_key.replace(vec![column.name.clone()]).is_some() {
                    return Err(self.error_before("primary key declared twice"));
                }
                table = table.column_def(column);
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;

        if let Some(pk) = &primary_key {
            table.require_non_null(pk);
            table = table.primary_key(&as_strs(pk));
        }

        if self.eat_keyword("COLOCATE") {
            self.expect_keyword("BY")?;
            let cols = self.parse_column_list()?;
            table = table.colocate_by(&as_strs(&cols));
        }

        let mut zone = None;
        if self.eat_keyword("WITH") {
            loop {
                let option = self.expect_ident()?.to_ascii_uppercase();
                self.expect(&TokenKind::Eq, "'='")?;
                match option.as_str() {
                    "ZONE" | "PRIMARY_ZONE" => zone = Some(self.expect_text()?),
                    "COLOCATE_BY" => {
                        let cols = self.parse_column_list()?;
                        table = table.colocate_by(&as_strs(&cols));
                    }
                    "COLOCATE_WITH" => {
                        let parent = self.expect_ident()?;
                        table = table.colocate_with(&parent);
                    }
                    other => {
                        return Err(self.error_before(&format!("unknown table option {other}")));
                    }
                }
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        table = table.zone(zone.as_deref().unwrap_or(DEFAULT_ZONE));

        Ok(Statement::CreateTable {
            table,
            if_not_exists,
        })
    }

    /// `name TYPE [(n)] [NOT NULL | NULL] [PRIMARY KEY]`.
    fn parse_column(&mut self) -> Result<(ColumnDef, bool), ParseError> {
        let name = self.expect_ident()?;
        let type_name = self.expect_ident()?.to_ascii_uppercase();
        let ty = match type_name.as_str() {
            "BOOLEAN" | "BOOL" => ColumnType::Boolean,
            "INT" | "INTEGER" => ColumnType::Int32,
            "BIGINT" => ColumnType::Int64,
            "DOUBLE" => ColumnType::Double,
            "VARCHAR" => ColumnType::Varchar,
            "VARBINARY" => ColumnType::Varbinary,
            "TIMESTAMP" => ColumnType::Timestamp,
            other => return Err(self.error_before(&format!("unknown column type {other}"))),
        };

        let mut length = None;
        if self.eat(&TokenKind::LParen) {
            if !matches!(ty, ColumnType::Varchar | ColumnType::Varbinary) {
                return Err(self.error_before(&format!("type {ty} takes no length")));
            }
            length = Some(self.expect_u32()?);
            self.expect(&TokenKind::RParen, "')'")?;
        }

        let mut nullable = true;
        let mut primary = false;
        loop {
            if self.eat_keyword("NOT") {
                self.expect_keyword("NULL")?;
                nullable = false;
            } else if self.eat_keyword("NULL") {
                nullable = true;
            } else if self.eat_keyword("PRIMARY") {
                self.expect_keyword("KEY")?;
                primary = true;
                nullable = false;
            } else {
                break;
            }
        }

        Ok((
            ColumnDef {
                name,
                ty,
                nullable,
                length,
            },
            primary,
        ))
    }

    fn parse_create_index(&mut self) -> Result<Statement, ParseError> {
        let if_not_exists = self.parse_if_not_exists()?;
        let name = self.expect_ident()?;
        self.expect_keyword("ON")?;
        let table = self.expect_ident()?;
        let columns = self.parse_column_list()?;
        Ok(Statement::CreateIndex {
            name,
            table,
            columns,
            if_not_exists,
        })
    }

    fn parse_column_list(&mut self) -> Result<Vec<String>, ParseError> {
        self.expect(&TokenKind::LParen, "'('")?;
        let mut cols = vec![self.expect_ident()?];
        while self.eat(&TokenKind::Comma) {
            cols.push(self.expect_ident()?);
        }
        self.expect(&TokenKind::RParen, "')'")?;
        Ok(cols)
    }

    // ── Helpers ───────────────────────────────────────────────────

    fn parse_if_not_exists(&mut self) -> Result<bool, ParseError> {
        if self.eat_keyword("IF") {
            self.expect_keyword("NOT")?;
            self.expect_keyword("EXISTS")?;
            return Ok(true);
        }
        Ok(false)
    }

    fn parse_if_exists(&mut self) -> Result<bool, ParseError> {
        if self.eat_keyword("IF") {
            self.expect_keyword("EXISTS")?;
            return Ok(true);
        }
        Ok(false)
    }

    fn peek(&self) -> &Token {
        // The lexer always terminates the stream with Eof.
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn bump(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        match &self.peek().kind {
            TokenKind::Ident(s) if s.eq_ignore_ascii_case(keyword) => {
                self.bump();
                true
            }
            _ => false,
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<(), ParseError> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {what}")))
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), ParseError> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {keyword}")))
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match &self.peek().kind {
            TokenKind::Ident(s) => {
                let s = s.clone();
                self.bump();
                Ok(s)
            }
            _ => Err(self.error("expected identifier")),
        }
    }

    fn expect_u32(&mut self) -> Result<u32, ParseError> {
        match self.peek().kind {
            TokenKind::Number(n) => {
                let n = u32::try_from(n).map_err(|_| self.error("number out of range"))?;
                self.bump();
                Ok(n)
            }
            _ => Err(self.error("expected number")),
        }
    }

    /// A string literal or a bare identifier.
    fn expect_text(&mut self) -> Result<String, ParseError> {
        match &self.peek().kind {
            TokenKind::String(s) | TokenKind::Ident(s) => {
                let s = s.clone();
                self.bump();
                Ok(s)
            }
            _ => Err(self.error("expected string")),
        }
    }

    fn error(&self, message: &str) -> ParseError {
        let token = self.peek();
        let found = match &token.kind {
            TokenKind::Error(e) => e.clone(),
            TokenKind::Eof => "end of input".to_string(),
            other => format!("{other:?}"),
        };
        ParseError {
            line: token.line,
            column: token.column,
            message: format!("{message}, found {found}"),
        }
    }

    /// Error positioned at the previously consumed token.
    fn error_before(&self, message: &str) -> ParseError {
        let token = &self.tokens[self.pos.saturating_sub(1).min(self.tokens.len().saturating_sub(1))];
        ParseError {
            line: token.line,
            column: token.column,
            message: message.to_string(),
        }
    }
}

fn as_strs(names: &[String]) -> Vec<&str> {
    names.iter().map(String::as_str).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableSchemaExt;
    use zonegrid_state::TableSchema;

    #[test]
    fn parses_create_zone() {
        let stmts = parse(
            "CREATE ZONE IF NOT EXISTS MusicStore WITH REPLICAS=2, PARTITIONS=25, \
             STORAGE_PROFILES='default', CONSISTENCY_MODE='EVENTUAL';",
        )
        .unwrap();

        let expected = ZoneSpec::new("MusicStore", 2, 25).with_consistency(ConsistencyMode::Eventual);
        assert_eq!(
            stmts,
            vec![Statement::CreateZone {
                spec: expected,
                if_not_exists: true,
            }]
        );
    }

    #[test]
    fn zone_defaults_apply() {
        let stmts = parse("create zone z").unwrap();
        match &stmts[0] {
            Statement::CreateZone { spec, .. } => {
                assert_eq!((spec.replicas, spec.partitions), (1, 25));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_alter_and_drop_zone() {
        let stmts = parse("ALTER ZONE z SET PARTITIONS=50; DROP ZONE IF EXISTS z").unwrap();
        assert_eq!(
            stmts[0],
            Statement::AlterZone {
                name: "z".into(),
                alter: ZoneAlter {
                    partitions: Some(50),
                    ..ZoneAlter::default()
                },
                if_exists: false,
            }
        );
        assert_eq!(
            stmts[1],
            Statement::DropZone {
                name: "z".into(),
                if_exists: true,
            }
        );
    }

    #[test]
    fn parses_colocated_table() {
        let stmts = parse(
            "CREATE TABLE Album (
                AlbumId INT NOT NULL,
                Title VARCHAR(160),
                ArtistId INT,
                PRIMARY KEY (AlbumId, ArtistId)
            ) WITH ZONE=MusicStore, COLOCATE_BY=(ArtistId), COLOCATE_WITH=Artist;",
        )
        .unwrap();

        let Statement::CreateTable { table, if_not_exists } = &stmts[0] else {
            panic!("expected CREATE TABLE");
        };
        assert!(!if_not_exists);

        let schema = table.clone().build().unwrap();
        let expected = TableSchema::builder("Album")
            .column("AlbumId", ColumnType::Int32)
            .varchar("Title", 160)
            .column("ArtistId", ColumnType::Int32)
            .primary_key(&["AlbumId", "ArtistId"])
            .colocate_by(&["ArtistId"])
            .colocate_with("Artist")
            .zone("MusicStore")
            .build()
            .unwrap();
        assert_eq!(schema, expected);
    }

    #[test]
    fn inline_primary_key_and_colocate_by_clause() {
        let stmts = parse(
            "CREATE TABLE IF NOT EXISTS t (id BIGINT PRIMARY KEY, v DOUBLE) COLOCATE BY (id)",
        )
        .unwrap();
        let Statement::CreateTable { table, if_not_exists } = &stmts[0] else {
            panic!("expected CREATE TABLE");
        };
        assert!(if_not_exists);
        let schema = table.clone().build().unwrap();
        assert_eq!(schema.primary_key, vec!["ID"]);
        assert_eq!(schema.zone, DEFAULT_ZONE);
        assert!(!schema.columns[0].nullable);
    }

    #[test]
    fn parses_index_and_drop_table() {
        let stmts = parse("CREATE INDEX idx ON Album (ArtistId); DROP TABLE IF EXISTS Album;").unwrap();
        assert_eq!(
            stmts[0],
            Statement::CreateIndex {
                name: "idx".into(),
                table: "Album".into(),
                columns: vec!["ArtistId".into()],
                if_not_exists: false,
            }
        );
        assert_eq!(
            stmts[1],
            Statement::DropTable {
                name: "Album".into(),
                if_exists: true,
            }
        );
    }

    #[test]
    fn reports_errors_with_position() {
        let err = parse("CREATE ZONE z WITH REPLICAS=two").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("expected number"));

        assert!(parse("CREATE ZONE z WITH REPLICAS=1, REPLICAS=2").is_err());
        assert!(parse("CREATE ZONE z WITH SHARDS=2").is_err());
        assert!(parse("CREATE TABLE t (id UUID)").is_err());
        assert!(parse("CREATE TABLE t (id INT PRIMARY KEY, PRIMARY KEY (id))").is_err());
        assert!(parse("SELECT 1").is_err());
        assert!(parse("DROP ZONE a DROP ZONE b").is_err());
    }

    #[test]
    fn empty_statements_are_skipped() {
        assert!(parse(";; -- nothing\n;").unwrap().is_empty());
    }
}
