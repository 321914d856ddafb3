use crate::language::span::Span;
use miette::SourceSpan;

#[derive(Clone, Debug)]
pub struct SyntaxError {
    pub message: String,
    pub span: Span,
    pub help: Option<String>,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            help: None,
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn to_source_span(&self) -> SourceSpan {
        (self.span.start, self.span.len().max(1)).into()
    }
}

#[derive(Clone, Debug)]
pub struct SyntaxErrors {
    pub errors: Vec<SyntaxError>,
}

impl SyntaxErrors {
    pub fn new(errors: Vec<SyntaxError>) -> Self {
        Self { errors }
    }
}

/// Families of checker findings, kept separate so tests and tooling can
/// match on them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckErrorKind {
    DuplicateName,
    UndefinedIdent,
    KindMismatch,
    Arity,
    InvalidWith,
    InvalidBind,
    InvalidImport,
    NotExported,
}

#[derive(Clone, Debug)]
pub struct CheckError {
    pub kind: CheckErrorKind,
    pub message: String,
    pub span: Span,
}

impl CheckError {
    pub fn new(kind: CheckErrorKind, message: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            message: message.into(),
            span,
        }
    }

    pub fn to_source_span(&self) -> SourceSpan {
        (self.span.start, self.span.len().max(1)).into()
    }
}

#[derive(Clone, Debug)]
pub struct CheckErrors {
    pub errors: Vec<CheckError>,
}

impl CheckErrors {
    pub fn new(errors: Vec<CheckError>) -> Self {
        Self { errors }
    }
}
