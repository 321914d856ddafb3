use crate::language::ast::Kind;
use crate::runtime::context::{Frame, ProgramPoint};
use std::fmt;
use thiserror::Error;

pub type EvalResult<T> = Result<T, EvalError>;

/// The error families evaluation can produce. Positions and backtraces are
/// attached by the surrounding `EvalError`.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum EvalErrorKind {
    #[error("Undefined identifier `{name}`")]
    UndefinedIdent { name: String },
    #[error("Target `{name}` is not defined in {filename}")]
    UndefinedTarget { name: String, filename: String },
    #[error("Expected kind `{expected}` but found `{found}`")]
    KindMismatch { expected: Kind, found: Kind },
    #[error("Bad cast: expected {expected} but value holds {found}")]
    BadCast { expected: Kind, found: Kind },
    #[error("`{name}` expected {expected} args, got {received}")]
    Arity {
        name: String,
        expected: usize,
        received: usize,
    },
    #[error("Import path `{filename}` does not exist")]
    ImportPathNotExist { filename: String },
    #[error("Import cycle through `{filename}`")]
    ImportCycle { filename: String },
    #[error("Imported module `{filename}` failed to parse: {message}")]
    ImportParse { filename: String, message: String },
    #[error("Imported module `{filename}` failed checking: {message}")]
    ImportCheck { filename: String, message: String },
    #[error("{message}")]
    InvalidArgument { message: String },
    #[error("{message}")]
    Io { message: String },
    #[error("Context cancelled")]
    Cancelled,
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// An evaluation error enriched with the originating position and the call
/// frame backtrace accumulated on the way down.
#[derive(Clone, Debug)]
pub struct EvalError {
    pub kind: EvalErrorKind,
    pub point: Option<ProgramPoint>,
    pub frames: Vec<Frame>,
}

impl EvalError {
    pub fn new(kind: EvalErrorKind) -> Self {
        Self {
            kind,
            point: None,
            frames: Vec::new(),
        }
    }

    pub fn at(kind: EvalErrorKind, point: ProgramPoint) -> Self {
        Self {
            kind,
            point: Some(point),
            frames: Vec::new(),
        }
    }

    pub fn with_point(mut self, point: ProgramPoint) -> Self {
        if self.point.is_none() {
            self.point = Some(point);
        }
        self
    }

    pub fn with_frames(mut self, frames: &[Frame]) -> Self {
        if self.frames.is_empty() {
            self.frames = frames.to_vec();
        }
        self
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::Internal {
            message: message.into(),
        })
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.point {
            Some(point) => write!(f, "{}: {}", point, self.kind)?,
            None => write!(f, "{}", self.kind)?,
        }
        if let Some(point) = &self.point {
            if let Some(line) = point.source_line() {
                write!(f, "\n\t{}", line.trim_end())?;
            }
        }
        for frame in &self.frames {
            write!(f, "\n\tin {}", frame)?;
        }
        Ok(())
    }
}

impl std::error::Error for EvalError {}
