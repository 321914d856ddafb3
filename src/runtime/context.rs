use crate::language::ast::Kind;
use crate::language::span::{line_col, source_line, Span};
use crate::runtime::codegen::BindingHandle;
use crate::runtime::error::{EvalError, EvalErrorKind, EvalResult};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation shared between the caller and the evaluator.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// A position within a module's source. Line and column derive lazily from
/// the retained source text.
#[derive(Clone)]
pub struct ProgramPoint {
    pub filename: Rc<str>,
    pub source: Rc<str>,
    pub span: Span,
}

impl ProgramPoint {
    pub fn source_line(&self) -> Option<&str> {
        if self.source.is_empty() {
            return None;
        }
        Some(source_line(&self.source, self.span.start))
    }
}

impl fmt::Display for ProgramPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lc = line_col(&self.source, self.span.start);
        write!(f, "{}:{}", self.filename, lc)
    }
}

impl fmt::Debug for ProgramPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

/// A diagnostic call frame; a stack of these forms a backtrace.
#[derive(Clone, Debug)]
pub struct Frame {
    pub name: String,
    pub point: Option<ProgramPoint>,
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.point {
            Some(point) => write!(f, "{} at {}", self.name, point),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Evaluation context threaded through every dispatch. Cloning is cheap and
/// scoped additions (frames, return kind, program counter, binding) follow
/// the call structure.
#[derive(Clone, Default)]
pub struct Context {
    cancel: CancelToken,
    frames: Vec<Frame>,
    return_kind: Kind,
    pc: Option<ProgramPoint>,
    binding: Option<BindingHandle>,
}

impl Context {
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_cancel(token: CancelToken) -> Self {
        Self {
            cancel: token,
            ..Self::default()
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn check_cancelled(&self) -> EvalResult<()> {
        if self.cancel.is_cancelled() {
            return Err(self.error(EvalErrorKind::Cancelled));
        }
        Ok(())
    }

    pub fn with_frame(&self, frame: Frame) -> Self {
        let mut ctx = self.clone();
        ctx.frames.push(frame);
        ctx
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn with_return_kind(&self, kind: Kind) -> Self {
        let mut ctx = self.clone();
        ctx.return_kind = kind;
        ctx
    }

    pub fn return_kind(&self) -> &Kind {
        &self.return_kind
    }

    pub fn with_program_counter(&self, point: ProgramPoint) -> Self {
        let mut ctx = self.clone();
        ctx.pc = Some(point);
        ctx
    }

    pub fn program_counter(&self) -> Option<&ProgramPoint> {
        self.pc.as_ref()
    }

    pub fn with_binding(&self, handle: BindingHandle) -> Self {
        let mut ctx = self.clone();
        ctx.binding = Some(handle);
        ctx
    }

    /// The binding routed to the current call, if any. Consumed by callables
    /// that support effect sub-closures.
    pub fn binding(&self) -> Option<&BindingHandle> {
        self.binding.as_ref()
    }

    /// Build an error carrying this context's position and backtrace.
    pub fn error(&self, kind: EvalErrorKind) -> EvalError {
        let mut err = EvalError::new(kind).with_frames(&self.frames);
        if let Some(pc) = &self.pc {
            err = err.with_point(pc.clone());
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_propagates() {
        let token = CancelToken::new();
        let ctx = Context::with_cancel(token.clone());
        assert!(ctx.check_cancelled().is_ok());
        token.cancel();
        let err = ctx.check_cancelled().unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::Cancelled);
    }

    #[test]
    fn frames_accumulate_in_order() {
        let ctx = Context::background()
            .with_frame(Frame {
                name: "outer".into(),
                point: None,
            })
            .with_frame(Frame {
                name: "inner".into(),
                point: None,
            });
        let names: Vec<&str> = ctx.frames().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["outer", "inner"]);
    }
}
