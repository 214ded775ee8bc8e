//! The error type produced when a command line cannot be parsed.

use derive_more::Display;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ParseError>;

#[derive(Debug, Error)]
#[error("parse error: {kind}")]
pub struct ParseError {
    kind: ParseErrorKind,
}

#[derive(Debug, PartialEq, Eq, Display)]
pub enum ParseErrorKind {
    /// The client issued a command we don't know.
    #[display("Unknown command: {}", command)]
    UnknownCommand { command: String },
    /// Invalid UTF-8 in the command or its argument.
    #[display("Invalid UTF8 in command")]
    InvalidUtf8,
    /// Known command, malformed or missing argument.
    #[display("Invalid command")]
    InvalidCommand,
    /// The line did not end in CR LF.
    #[display("Invalid end-of-line")]
    InvalidEol,
    /// The line exceeds the configured maximum.
    #[display("Line too long")]
    LineTooLong,
}

impl ParseError {
    pub fn kind(&self) -> &ParseErrorKind {
        &self.kind
    }
}

impl From<ParseErrorKind> for ParseError {
    fn from(kind: ParseErrorKind) -> ParseError {
        ParseError { kind }
    }
}
