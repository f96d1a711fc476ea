//! Migration script parsing
//!
//! Shared by the catalog (files on disk) and rollback recovery (scripts stored in
//! the version table), so both sources split statements and detect the
//! transaction opt-out the same way.
//!
//! ```text
//! -- Up migration
//! CREATE TABLE users (id BIGINT PRIMARY KEY);
//! -- Down migration
//! DROP TABLE users;
//! ```
//!
//! `-- no transaction` anywhere in the file disables transactional wrapping.
//! `-- statement begin` / `-- statement end` keep a multi-statement body such as
//! a function definition together as one statement.

use sqlparser::parser::Parser;
use tracing::warn;

use crate::definitions::Direction;
use crate::dialect::Dialect;
use crate::error::{MigrateError, MigrateResult};

pub const UP_MARKER: &str = "-- Up migration";
pub const DOWN_MARKER: &str = "-- Down migration";
pub const NO_TRANSACTION: &str = "-- no transaction";
pub const BLOCK_BEGIN: &str = "-- statement begin";
pub const BLOCK_END: &str = "-- statement end";

/// Statements of a parsed script
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedScript {
    pub up: Vec<String>,
    pub down: Vec<String>,
    pub use_transaction: bool,
}

impl ParsedScript {
    pub fn statements(&self, direction: Direction) -> &[String] {
        match direction {
            Direction::Up => &self.up,
            Direction::Down => &self.down,
            Direction::None => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Up,
    Down,
}

enum Directive {
    Up,
    Down,
    NoTransaction,
    BlockBegin,
    BlockEnd,
}

fn directive(line: &str) -> Option<Directive> {
    let body = line.strip_prefix("--")?.trim().to_lowercase();
    if body == "up migration" {
        Some(Directive::Up)
    } else if body == "down migration" {
        Some(Directive::Down)
    } else if body == "no transaction" {
        Some(Directive::NoTransaction)
    } else if body == "statement begin" {
        Some(Directive::BlockBegin)
    } else if body == "statement end" {
        Some(Directive::BlockEnd)
    } else {
        None
    }
}

struct ScriptBuilder {
    dialect: Dialect,
    script: ParsedScript,
    section: Section,
    pending: String,
    block_start: Option<usize>,
}

impl ScriptBuilder {
    fn push_statement(&mut self, statement: Vec<String>) {
        match self.section {
            Section::Up => self.script.up.extend(statement),
            Section::Down => self.script.down.extend(statement),
            Section::Preamble => {}
        }
    }

    fn ensure_no_pending(&self, line_no: usize) -> MigrateResult<()> {
        if !self.pending.trim().is_empty() {
            return Err(MigrateError::parse(format!(
                "line {}: previous statement is missing its terminating semicolon",
                line_no
            )));
        }
        Ok(())
    }

    fn line(&mut self, line_no: usize, line: &str) -> MigrateResult<()> {
        let trimmed = line.trim();

        if let Some(directive) = directive(trimmed) {
            match directive {
                Directive::Up | Directive::Down => {
                    if self.block_start.is_some() {
                        return Err(MigrateError::parse(format!(
                            "line {}: section marker inside a statement block",
                            line_no
                        )));
                    }
                    self.ensure_no_pending(line_no)?;
                    self.section = match directive {
                        Directive::Up => Section::Up,
                        _ => Section::Down,
                    };
                }
                Directive::NoTransaction => self.script.use_transaction = false,
                Directive::BlockBegin => {
                    if let Some(start) = self.block_start {
                        return Err(MigrateError::parse(format!(
                            "line {}: nested statement block (opened at line {})",
                            line_no, start
                        )));
                    }
                    if self.section == Section::Preamble {
                        return Err(MigrateError::parse(format!(
                            "line {}: statement block before any section marker",
                            line_no
                        )));
                    }
                    self.ensure_no_pending(line_no)?;
                    self.block_start = Some(line_no);
                }
                Directive::BlockEnd => {
                    if self.block_start.take().is_none() {
                        return Err(MigrateError::parse(format!(
                            "line {}: statement end without a matching begin",
                            line_no
                        )));
                    }
                    let body = std::mem::take(&mut self.pending);
                    let body = body.trim();
                    if !body.is_empty() {
                        self.push_statement(vec![body.to_string()]);
                    }
                }
            }
            return Ok(());
        }

        if self.block_start.is_some() {
            self.pending.push_str(line);
            self.pending.push('\n');
            return Ok(());
        }

        if trimmed.is_empty() || trimmed.starts_with("--") {
            return Ok(());
        }

        if self.section == Section::Preamble {
            return Err(MigrateError::parse(format!(
                "line {}: statement before the '{}' or '{}' marker",
                line_no, UP_MARKER, DOWN_MARKER
            )));
        }

        self.pending.push_str(line);
        self.pending.push('\n');
        if trimmed.ends_with(';') {
            let statement = std::mem::take(&mut self.pending);
            let statements = check_statement(self.dialect, statement.trim());
            self.push_statement(statements);
        }
        Ok(())
    }

    fn finish(self) -> MigrateResult<ParsedScript> {
        if let Some(start) = self.block_start {
            return Err(MigrateError::parse(format!(
                "statement block opened at line {} is never closed",
                start
            )));
        }
        if !self.pending.trim().is_empty() {
            return Err(MigrateError::parse(
                "last statement is missing its terminating semicolon",
            ));
        }
        Ok(self.script)
    }
}

/// Parse a migration script into up and down statements
pub fn parse_script(source: &str, dialect: Dialect) -> MigrateResult<ParsedScript> {
    parse_from(source, dialect, Section::Preamble)
}

/// Parse a rollback script recorded in the version table.
///
/// A payload without any section marker is taken as a bare down section.
pub fn parse_rollback_script(source: &str, dialect: Dialect) -> MigrateResult<ParsedScript> {
    let has_marker = source.lines().any(|line| {
        matches!(
            directive(line.trim()),
            Some(Directive::Up) | Some(Directive::Down)
        )
    });
    let section = if has_marker {
        Section::Preamble
    } else {
        Section::Down
    };
    parse_from(source, dialect, section)
}

fn parse_from(source: &str, dialect: Dialect, section: Section) -> MigrateResult<ParsedScript> {
    let mut builder = ScriptBuilder {
        dialect,
        script: ParsedScript {
            use_transaction: true,
            ..Default::default()
        },
        section,
        pending: String::new(),
        block_start: None,
    };

    for (index, line) in source.lines().enumerate() {
        builder.line(index + 1, line)?;
    }

    builder.finish()
}

/// Check a statement against the dialect grammar, splitting lines holding several.
fn check_statement(dialect: Dialect, statement: &str) -> Vec<String> {
    let grammar = dialect.parser_dialect();
    match Parser::parse_sql(grammar.as_ref(), statement) {
        Ok(parsed) if parsed.len() > 1 => parsed.iter().map(|s| format!("{};", s)).collect(),
        Ok(_) => vec![statement.to_string()],
        Err(e) => {
            warn!(
                "SQL parsing failed under {} grammar, keeping statement verbatim: {}",
                dialect, e
            );
            vec![statement.to_string()]
        }
    }
}
