use crate::language::errors::{CheckError, SyntaxError};
use crate::runtime::error::EvalError;
use miette::{Diagnostic, NamedSource, Report, SourceSpan};
use thiserror::Error;

#[derive(Debug, Error, Diagnostic, Clone)]
#[error("{message}")]
#[diagnostic(code(hlb::syntax))]
pub struct SyntaxDiagnostic {
    #[source_code]
    src: NamedSource<String>,
    #[label("{message}")]
    span: SourceSpan,
    #[help]
    help: Option<String>,
    message: String,
}

impl SyntaxDiagnostic {
    pub fn from_error(src: NamedSource<String>, err: &SyntaxError) -> Self {
        Self {
            src,
            span: err.to_source_span(),
            help: err.help.clone(),
            message: err.message.clone(),
        }
    }
}

#[derive(Debug, Error, Diagnostic, Clone)]
#[error("{message}")]
#[diagnostic(code(hlb::check))]
pub struct CheckDiagnostic {
    #[source_code]
    src: NamedSource<String>,
    #[label("{message}")]
    span: SourceSpan,
    message: String,
}

impl CheckDiagnostic {
    pub fn from_error(src: NamedSource<String>, err: &CheckError) -> Self {
        Self {
            src,
            span: err.to_source_span(),
            message: err.message.clone(),
        }
    }
}

pub fn emit_syntax_errors(filename: &str, source: &str, errors: &[SyntaxError]) {
    let src = NamedSource::new(filename, source.to_string());
    for err in errors {
        let diagnostic = SyntaxDiagnostic::from_error(src.clone(), err);
        eprintln!("{:?}", Report::new(diagnostic));
    }
}

pub fn emit_check_errors(filename: &str, source: &str, errors: &[CheckError]) {
    let src = NamedSource::new(filename, source.to_string());
    for err in errors {
        let diagnostic = CheckDiagnostic::from_error(src.clone(), err);
        eprintln!("{:?}", Report::new(diagnostic));
    }
}

/// Evaluation errors already render their position, source line, and frame
/// backtrace.
pub fn report_eval_error(error: &EvalError) {
    eprintln!("{error}");
}

#[cfg(test)]
mod tests {
    use crate::language::parser::parse_module;
    use crate::language::span::Span;
    use crate::runtime::context::ProgramPoint;
    use crate::runtime::error::{EvalError, EvalErrorKind};

    #[test]
    fn eval_error_renders_position_and_line() {
        let source = "fs a() {\n\tnope\n}\n";
        let module = parse_module("main.hlb", source).unwrap();
        let offset = source.find("nope").unwrap();
        let err = EvalError::at(
            EvalErrorKind::UndefinedIdent {
                name: "nope".into(),
            },
            ProgramPoint {
                filename: module.filename.clone(),
                source: module.source.clone(),
                span: Span::new(offset, offset + 4),
            },
        );
        let rendered = err.to_string();
        assert!(rendered.starts_with("main.hlb:2:2: "), "got {rendered:?}");
        assert!(rendered.contains("Undefined identifier `nope`"));
        assert!(rendered.contains("\tnope"));
    }
}
