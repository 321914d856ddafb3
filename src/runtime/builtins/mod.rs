pub mod filesystem;
pub mod option;
pub mod pipeline;
pub mod string;

use crate::language::ast::Kind;
use crate::runtime::error::{EvalError, EvalErrorKind, EvalResult};
use crate::runtime::value::{Filesystem, OptFragment, Value};

/// The incoming value of a filesystem op must already be a filesystem; only
/// source callables (`scratch`, `image`, ...) start fresh chains.
pub(crate) fn incoming_fs(incoming: &Value) -> EvalResult<Filesystem> {
    match incoming {
        Value::Filesystem(fs) => Ok(fs.clone()),
        other => Err(EvalError::new(EvalErrorKind::BadCast {
            expected: Kind::Filesystem,
            found: other.kind(),
        })),
    }
}

/// Option constructors extend the option list flowing through their block.
pub(crate) fn append_fragment(incoming: Value, fragment: OptFragment) -> EvalResult<Value> {
    let mut fragments = incoming.as_option()?;
    fragments.push(fragment);
    Ok(Value::Option(fragments))
}

pub(crate) fn string_args(args: &[Value]) -> EvalResult<Vec<String>> {
    args.iter().map(|v| Ok(v.as_str()?.to_string())).collect()
}

pub(crate) fn fs_args(args: &[Value]) -> EvalResult<Vec<Filesystem>> {
    args.iter().map(|v| v.as_filesystem()).collect()
}
