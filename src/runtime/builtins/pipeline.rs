use crate::language::ast::Kind;
use crate::runtime::builtin::{Callable, Signature};
use crate::runtime::builtins::fs_args;
use crate::runtime::codegen::BuildClient;
use crate::runtime::context::Context;
use crate::runtime::error::EvalResult;
use crate::runtime::solver::Request;
use crate::runtime::value::{OptFragment, Value};

/// Append a stage of concurrently-solvable filesystems to the pipeline.
/// Registered under both `stage` and `parallel`.
pub struct Stage;

impl Callable for Stage {
    fn signature(&self) -> Signature {
        Signature::with_variadic(&[], Kind::Filesystem)
    }

    fn call(
        &self,
        _ctx: &Context,
        _client: &dyn BuildClient,
        incoming: Value,
        _options: &[OptFragment],
        args: &[Value],
    ) -> EvalResult<Value> {
        let mut stages = match &incoming {
            Value::Unit => Vec::new(),
            other => other.as_pipeline()?,
        };
        let requests = fs_args(args)?
            .into_iter()
            .map(Request::solve)
            .collect::<Vec<_>>();
        stages.push(Request::parallel(requests));
        Ok(Value::Pipeline(stages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::codegen::NoClient;
    use crate::runtime::value::{Filesystem, FsOp};

    #[test]
    fn stages_accumulate_in_order() {
        let ctx = Context::background();
        let a = Value::Filesystem(Filesystem::new().push(FsOp::Scratch));
        let b = Value::Filesystem(Filesystem::new().push(FsOp::Image {
            reference: "alpine".into(),
            options: vec![],
        }));

        let first = Stage
            .call(&ctx, &NoClient, Value::Unit, &[], &[a.clone(), b.clone()])
            .unwrap();
        let second = Stage.call(&ctx, &NoClient, first, &[], &[b]).unwrap();

        let stages = second.as_pipeline().unwrap();
        assert_eq!(stages.len(), 2);
        let Request::Parallel { requests } = &stages[0] else {
            panic!("expected parallel stage");
        };
        assert_eq!(requests.len(), 2);
    }
}
