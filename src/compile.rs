use crate::language::ast::Module;
use crate::language::checker;
use crate::language::errors::{CheckErrors, SyntaxErrors};
use crate::language::parser::parse_module;
use crate::runtime::codegen::{BuildClient, CodeGen, Target};
use crate::runtime::context::Context;
use crate::runtime::error::EvalError;
use crate::runtime::resolver::{Directory, Resolver};
use crate::runtime::solver::Request;
use std::rc::Rc;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("syntax errors in {filename}")]
    Syntax {
        filename: String,
        errors: SyntaxErrors,
    },
    #[error("check errors in {filename}")]
    Check {
        filename: String,
        errors: CheckErrors,
    },
    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// Parse and check a module rooted at the given directory.
pub fn load(
    filename: &str,
    source: &str,
    directory: Arc<dyn Directory>,
) -> Result<Rc<Module>, CompileError> {
    let module = parse_module(filename, source).map_err(|errors| CompileError::Syntax {
        filename: filename.to_string(),
        errors,
    })?;
    module.directory.replace(Some(directory));

    checker::semantic_pass(&module).map_err(|errors| CompileError::Check {
        filename: filename.to_string(),
        errors,
    })?;
    checker::check(&module).map_err(|errors| CompileError::Check {
        filename: filename.to_string(),
        errors,
    })?;
    Ok(module)
}

/// The whole pipeline: parse, check, and generate a request for the targets.
pub fn compile(
    ctx: &Context,
    client: Arc<dyn BuildClient>,
    resolver: Arc<dyn Resolver>,
    directory: Arc<dyn Directory>,
    filename: &str,
    source: &str,
    targets: &[Target],
) -> Result<Request, CompileError> {
    let module = load(filename, source, directory)?;
    let cg = CodeGen::new(client, resolver)?;
    Ok(cg.generate(ctx, &module, targets)?)
}
