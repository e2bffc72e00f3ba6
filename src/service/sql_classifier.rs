//! Classification of user-submitted SQL for role gating and execution mode.
//!
//! Uses [sqlparser](https://docs.rs/sqlparser/) with the connection's dialect,
//! so formatting tricks cannot make a write look like a read. Statements the
//! parser does not understand are still run (the engine reports its own
//! errors) but require the write role.
//!
//! Transaction control and session state changes are rejected outright: every
//! request borrows a pooled session, and state left on it would leak into the
//! next request on the same connection.

use sqlparser::ast::{Query, SetExpr, Statement};
use sqlparser::dialect::{Dialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::keywords::Keyword;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};

use crate::auth::Action;
use crate::db::ExecutionMode;
use crate::error::{CoreError, CoreResult};
use crate::models::EngineType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// SELECT and other read-only statements
    Read,
    /// DML, DDL and administrative statements
    Write,
    /// Not understood by the parser, or row-returning but not provably read-only
    Other,
}

impl StatementKind {
    pub fn required_action(self) -> Action {
        match self {
            Self::Read => Action::RunReadQuery,
            Self::Write | Self::Other => Action::RunWriteQuery,
        }
    }

    pub fn execution_mode(self) -> ExecutionMode {
        match self {
            Self::Read => ExecutionMode::ReadOnly,
            Self::Other => ExecutionMode::Fetch,
            Self::Write => ExecutionMode::Execute,
        }
    }
}

fn get_dialect(engine: EngineType) -> Box<dyn Dialect> {
    match engine {
        EngineType::Postgres => Box::new(PostgreSqlDialect {}),
        EngineType::MySql => Box::new(MySqlDialect {}),
        EngineType::Sqlite => Box::new(SQLiteDialect {}),
    }
}

/// Classify `sql`. A script is `Read` only if every statement is.
///
/// Fails with `InvalidInput` when any statement would change transaction or
/// session state.
pub fn classify(sql: &str, engine: EngineType) -> CoreResult<StatementKind> {
    if sql.trim().trim_matches(';').trim().is_empty() {
        return Err(CoreError::invalid_input("Empty SQL statement"));
    }

    let dialect = get_dialect(engine);
    let Ok(statements) = Parser::parse_sql(dialect.as_ref(), sql) else {
        if let Some(name) = leading_session_keyword(dialect.as_ref(), sql) {
            return Err(session_state_error(name));
        }
        return Ok(StatementKind::Other);
    };
    if statements.is_empty() {
        return Err(CoreError::invalid_input("Empty SQL statement"));
    }

    let mut kind = StatementKind::Read;
    for stmt in &statements {
        kind = match (kind, classify_statement(stmt)?) {
            (StatementKind::Other, _) | (_, StatementKind::Other) => StatementKind::Other,
            (StatementKind::Write, _) | (_, StatementKind::Write) => StatementKind::Write,
            _ => StatementKind::Read,
        };
    }
    Ok(kind)
}

fn session_state_error(name: &str) -> CoreError {
    CoreError::invalid_input(format!(
        "{} is not allowed: each query runs on a shared pooled session, so transaction \
         and session state cannot be kept between requests",
        name
    ))
}

fn classify_statement(stmt: &Statement) -> CoreResult<StatementKind> {
    let kind = match stmt {
        Statement::Query(query) => {
            if query_writes(query) {
                // Still returns rows (RETURNING, FOR UPDATE), but needs the write role
                StatementKind::Other
            } else {
                StatementKind::Read
            }
        }

        Statement::ShowTables { .. }
        | Statement::ShowColumns { .. }
        | Statement::ShowDatabases { .. }
        | Statement::ShowSchemas { .. }
        | Statement::ShowCreate { .. }
        | Statement::ShowFunctions { .. }
        | Statement::ShowVariable { .. }
        | Statement::ShowVariables { .. }
        | Statement::ShowStatus { .. }
        | Statement::ShowCollation { .. }
        | Statement::ExplainTable { .. } => StatementKind::Read,

        // EXPLAIN ANALYZE runs the statement, so it is only as safe as its target
        Statement::Explain { statement, .. } => classify_statement(statement)?,

        // Returns rows but may change settings
        Statement::Pragma { .. } => StatementKind::Other,

        Statement::StartTransaction { .. } => return Err(session_state_error("BEGIN")),
        Statement::Commit { .. } => return Err(session_state_error("COMMIT")),
        Statement::Rollback { .. } => return Err(session_state_error("ROLLBACK")),
        Statement::Savepoint { .. } => return Err(session_state_error("SAVEPOINT")),
        Statement::ReleaseSavepoint { .. } => return Err(session_state_error("RELEASE SAVEPOINT")),
        Statement::Set(_) => return Err(session_state_error("SET")),
        Statement::Reset(_) => return Err(session_state_error("RESET")),
        Statement::Discard { .. } => return Err(session_state_error("DISCARD")),
        Statement::Use(_) => return Err(session_state_error("USE")),
        Statement::LockTables { .. } => return Err(session_state_error("LOCK TABLES")),
        Statement::UnlockTables => return Err(session_state_error("UNLOCK TABLES")),

        _ => StatementKind::Write,
    };
    Ok(kind)
}

/// Whether a query can modify data: a data-modifying CTE or body, `SELECT
/// INTO`, or a row-locking clause.
fn query_writes(query: &Query) -> bool {
    if !query.locks.is_empty() {
        return true;
    }
    let cte_writes = query
        .with
        .as_ref()
        .is_some_and(|with| with.cte_tables.iter().any(|cte| query_writes(&cte.query)));
    cte_writes || set_expr_writes(&query.body)
}

fn set_expr_writes(body: &SetExpr) -> bool {
    match body {
        SetExpr::Select(select) => select.into.is_some(),
        SetExpr::Query(query) => query_writes(query),
        SetExpr::SetOperation { left, right, .. } => {
            set_expr_writes(left) || set_expr_writes(right)
        }
        SetExpr::Insert(_) | SetExpr::Update(_) | SetExpr::Delete(_) | SetExpr::Merge(_) => true,
        SetExpr::Values(_) | SetExpr::Table(_) => false,
    }
}

/// First keyword of SQL the parser rejected, if it opens a transaction or
/// session statement.
fn leading_session_keyword(dialect: &dyn Dialect, sql: &str) -> Option<&'static str> {
    let tokens = Tokenizer::new(dialect, sql).tokenize().ok()?;
    let first = tokens
        .iter()
        .find(|token| !matches!(token, Token::Whitespace(_) | Token::SemiColon))?;
    let Token::Word(word) = first else {
        return None;
    };
    match word.keyword {
        Keyword::BEGIN | Keyword::START => Some("BEGIN"),
        Keyword::COMMIT | Keyword::END => Some("COMMIT"),
        Keyword::ROLLBACK | Keyword::ABORT => Some("ROLLBACK"),
        Keyword::SAVEPOINT => Some("SAVEPOINT"),
        Keyword::RELEASE => Some("RELEASE SAVEPOINT"),
        Keyword::SET => Some("SET"),
        Keyword::RESET => Some("RESET"),
        Keyword::DISCARD => Some("DISCARD"),
        Keyword::USE => Some("USE"),
        Keyword::LOCK | Keyword::UNLOCK => Some("LOCK TABLES"),
        _ => None,
    }
}
