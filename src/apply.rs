// ABOUTME: Best-effort execution of translated statements against a destination
// ABOUTME: A failing statement is recorded and skipped; committing is left to the caller

use thiserror::Error;

use crate::destination::Destination;
use crate::sql::SqlStatement;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Duplicate key, foreign key or not-null violation.
    Constraint,
    /// Unknown table or column.
    MissingObject,
    Syntax,
    Connectivity,
    Other,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct ExecError {
    pub kind: FailureKind,
    pub message: String,
}

impl ExecError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Result of one statement.
#[derive(Debug)]
pub struct Outcome<'a> {
    pub statement: &'a SqlStatement,
    pub result: Result<u64, ExecError>,
}

#[derive(Debug, Default)]
pub struct ApplyReport<'a> {
    pub outcomes: Vec<Outcome<'a>>,
}

impl<'a> ApplyReport<'a> {
    pub fn applied(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&'a SqlStatement, &ExecError)> + '_ {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.statement, e)))
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.applied()
    }
}

/// Execute every statement in order. Never aborts and never commits.
pub async fn apply<'a, D>(statements: &'a [SqlStatement], destination: &mut D) -> ApplyReport<'a>
where
    D: Destination + ?Sized,
{
    let mut report = ApplyReport {
        outcomes: Vec::with_capacity(statements.len()),
    };
    for statement in statements {
        let result = destination.execute(statement).await;
        report.outcomes.push(Outcome { statement, result });
    }
    report
}
