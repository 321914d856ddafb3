use crate::language::ast::Kind;
use crate::runtime::error::{EvalError, EvalErrorKind, EvalResult};
use crate::runtime::solver::Request;
use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// The evaluator's tagged value union. `Unit` is the initial content of a
/// register before any statement has run; it has kind `None`.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    #[default]
    Unit,
    Int(i64),
    Bool(bool),
    Str(String),
    Filesystem(Filesystem),
    Option(Vec<OptFragment>),
    Pipeline(Vec<Request>),
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Unit => Kind::None,
            Value::Int(_) => Kind::Int,
            Value::Bool(_) => Kind::Bool,
            Value::Str(_) => Kind::String,
            Value::Filesystem(_) => Kind::Filesystem,
            Value::Option(_) => Kind::Option(None),
            Value::Pipeline(_) => Kind::Pipeline,
        }
    }

    fn bad_cast(&self, expected: Kind) -> EvalError {
        EvalError::new(EvalErrorKind::BadCast {
            expected,
            found: self.kind(),
        })
    }

    pub fn as_int(&self) -> EvalResult<i64> {
        match self {
            Value::Int(value) => Ok(*value),
            _ => Err(self.bad_cast(Kind::Int)),
        }
    }

    pub fn as_bool(&self) -> EvalResult<bool> {
        match self {
            Value::Bool(value) => Ok(*value),
            _ => Err(self.bad_cast(Kind::Bool)),
        }
    }

    pub fn as_str(&self) -> EvalResult<&str> {
        match self {
            Value::Str(value) => Ok(value),
            _ => Err(self.bad_cast(Kind::String)),
        }
    }

    pub fn as_filesystem(&self) -> EvalResult<Filesystem> {
        match self {
            Value::Filesystem(fs) => Ok(fs.clone()),
            _ => Err(self.bad_cast(Kind::Filesystem)),
        }
    }

    pub fn as_option(&self) -> EvalResult<Vec<OptFragment>> {
        match self {
            Value::Option(fragments) => Ok(fragments.clone()),
            Value::Unit => Ok(Vec::new()),
            _ => Err(self.bad_cast(Kind::Option(None))),
        }
    }

    pub fn as_pipeline(&self) -> EvalResult<Vec<Request>> {
        match self {
            Value::Pipeline(stages) => Ok(stages.clone()),
            _ => Err(self.bad_cast(Kind::Pipeline)),
        }
    }

    /// String coercion used by interpolation: scalars display, everything
    /// else is a bad cast.
    pub fn coerce_string(&self) -> EvalResult<String> {
        match self {
            Value::Str(value) => Ok(value.clone()),
            Value::Int(value) => Ok(value.to_string()),
            Value::Bool(value) => Ok(value.to_string()),
            _ => Err(self.bad_cast(Kind::String)),
        }
    }

    /// Convert the final value of a target register into a build request.
    pub fn request(&self) -> EvalResult<Request> {
        match self {
            Value::Filesystem(fs) => Ok(Request::Solve {
                definition: fs.clone(),
            }),
            Value::Pipeline(stages) => Ok(Request::Sequence {
                requests: stages.clone(),
            }),
            _ => Err(self.bad_cast(Kind::Filesystem)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => write!(f, "()"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Str(value) => write!(f, "{value}"),
            Value::Filesystem(fs) => write!(f, "fs({} ops)", fs.len()),
            Value::Option(fragments) => write!(f, "option({} fragments)", fragments.len()),
            Value::Pipeline(stages) => write!(f, "pipeline({} stages)", stages.len()),
        }
    }
}

/// An immutable handle to a deferred chain of build operations. Appending an
/// op shares the existing chain; no construction ever mutates a previously
/// observed filesystem.
#[derive(Clone, Default)]
pub struct Filesystem {
    node: Option<Arc<FsNode>>,
}

struct FsNode {
    prev: Option<Arc<FsNode>>,
    op: FsOp,
}

impl Filesystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, op: FsOp) -> Filesystem {
        Filesystem {
            node: Some(Arc::new(FsNode {
                prev: self.node.clone(),
                op,
            })),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.node.is_none()
    }

    pub fn len(&self) -> usize {
        let mut len = 0;
        let mut node = self.node.as_deref();
        while let Some(n) = node {
            len += 1;
            node = n.prev.as_deref();
        }
        len
    }

    /// Ops in construction order.
    pub fn ops(&self) -> Vec<FsOp> {
        let mut ops = Vec::new();
        let mut node = self.node.as_deref();
        while let Some(n) = node {
            ops.push(n.op.clone());
            node = n.prev.as_deref();
        }
        ops.reverse();
        ops
    }

    pub fn last_op(&self) -> Option<FsOp> {
        self.node.as_deref().map(|n| n.op.clone())
    }
}

impl PartialEq for Filesystem {
    fn eq(&self, other: &Self) -> bool {
        self.ops() == other.ops()
    }
}

impl fmt::Debug for Filesystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.ops()).finish()
    }
}

impl Serialize for Filesystem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let ops = self.ops();
        let mut seq = serializer.serialize_seq(Some(ops.len()))?;
        for op in ops {
            seq.serialize_element(&op)?;
        }
        seq.end()
    }
}

/// One deferred build operation. The external engine interprets these; the
/// core only constructs and serializes them.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum FsOp {
    Scratch,
    Image {
        reference: String,
        options: Vec<OptFragment>,
    },
    Http {
        url: String,
        options: Vec<OptFragment>,
    },
    Git {
        remote: String,
        reference: String,
        options: Vec<OptFragment>,
    },
    Local {
        path: String,
        options: Vec<OptFragment>,
    },
    Frontend {
        source: String,
        options: Vec<OptFragment>,
    },
    Run {
        command: Vec<String>,
        options: Vec<OptFragment>,
    },
    Env {
        key: String,
        value: String,
    },
    Dir {
        path: String,
    },
    User {
        name: String,
    },
    Mkdir {
        path: String,
        mode: i64,
        options: Vec<OptFragment>,
    },
    Mkfile {
        path: String,
        mode: i64,
        content: String,
        options: Vec<OptFragment>,
    },
    Rm {
        path: String,
        options: Vec<OptFragment>,
    },
    Copy {
        input: Filesystem,
        src: String,
        dst: String,
        options: Vec<OptFragment>,
    },
    Merge {
        inputs: Vec<Filesystem>,
    },
    Diff {
        lower: Filesystem,
    },
    Entrypoint {
        command: Vec<String>,
    },
    Cmd {
        command: Vec<String>,
    },
    Label {
        key: String,
        value: String,
    },
    Expose {
        ports: Vec<String>,
    },
    Volumes {
        mountpoints: Vec<String>,
    },
    StopSignal {
        signal: String,
    },
    DockerPush {
        reference: String,
        options: Vec<OptFragment>,
    },
    DockerLoad {
        reference: String,
    },
    Download {
        local_path: String,
    },
    DownloadTarball {
        local_path: String,
    },
    DownloadOciTarball {
        local_path: String,
    },
    DownloadDockerTarball {
        local_path: String,
        reference: String,
    },
}

/// An option fragment produced by an `option::<callee>` constructor and
/// consumed by its callee. Fragments are ordered; append semantics preserve
/// source order.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "option", rename_all = "camelCase")]
pub enum OptFragment {
    Resolve,
    Platform { platform: String },
    Checksum { digest: String },
    Chmod { mode: i64 },
    Filename { name: String },
    KeepGitDir,
    IncludePatterns { patterns: Vec<String> },
    ExcludePatterns { patterns: Vec<String> },
    FrontendInput { key: String, value: Filesystem },
    FrontendOpt { key: String, value: String },
    ReadonlyRootfs,
    RunEnv { key: String, value: String },
    RunDir { path: String },
    RunUser { name: String },
    IgnoreCache,
    Network { mode: String },
    Security { mode: String },
    Shlex,
    Host { name: String, address: String },
    Ssh { options: Vec<OptFragment> },
    Forward { src: String, dest: String },
    Secret { source: String, target: String, options: Vec<OptFragment> },
    Mount { input: Filesystem, target: String, options: Vec<OptFragment> },
    MountTarget { path: String },
    Uid { id: i64 },
    Gid { id: i64 },
    Mode { mode: i64 },
    LocalPaths { paths: Vec<String> },
    Readonly,
    Tmpfs,
    SourcePath { path: String },
    Cache { id: String, sharing: String },
    CreateParents,
    Chown { owner: String },
    CreatedTime { created: String },
    FollowSymlinks,
    ContentsOnly,
    Unpack,
    CreateDestPath,
    AllowWildcard,
    AllowEmptyWildcard,
    AllowNotFound,
    IgnoreError,
    OnlyStderr,
    IncludeStderr,
    StringField { name: String, value: String },
    Stargz,
    BreakpointCommand { command: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filesystem_push_shares_history() {
        let base = Filesystem::new().push(FsOp::Scratch);
        let a = base.push(FsOp::Dir {
            path: "/a".into(),
        });
        let b = base.push(FsOp::Dir {
            path: "/b".into(),
        });
        assert_eq!(base.len(), 1);
        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 2);
        assert_ne!(a, b);
        assert_eq!(a.ops()[0], FsOp::Scratch);
    }

    #[test]
    fn bad_cast_reports_both_kinds() {
        let err = Value::Int(3).as_str().unwrap_err();
        assert_eq!(
            err.kind,
            EvalErrorKind::BadCast {
                expected: Kind::String,
                found: Kind::Int
            }
        );
    }

    #[test]
    fn coerce_string_displays_scalars() {
        assert_eq!(Value::Int(7).coerce_string().unwrap(), "7");
        assert_eq!(Value::Bool(true).coerce_string().unwrap(), "true");
        assert!(Value::Unit.coerce_string().is_err());
    }

    #[test]
    fn filesystem_serializes_as_op_list() {
        let fs = Filesystem::new().push(FsOp::Scratch).push(FsOp::Env {
            key: "K".into(),
            value: "V".into(),
        });
        let json = serde_json::to_value(&fs).unwrap();
        assert_eq!(json[0]["op"], "scratch");
        assert_eq!(json[1]["op"], "env");
        assert_eq!(json[1]["key"], "K");
    }
}
