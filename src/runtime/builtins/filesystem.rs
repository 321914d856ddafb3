use crate::language::ast::Kind;
use crate::runtime::builtin::{Callable, Signature};
use crate::runtime::builtins::{fs_args, incoming_fs, string_args};
use crate::runtime::codegen::BuildClient;
use crate::runtime::context::Context;
use crate::runtime::error::EvalResult;
use crate::runtime::value::{Filesystem, FsOp, OptFragment, Value};

pub struct Scratch;

impl Callable for Scratch {
    fn signature(&self) -> Signature {
        Signature::new(&[])
    }

    fn call(
        &self,
        _ctx: &Context,
        _client: &dyn BuildClient,
        _incoming: Value,
        _options: &[OptFragment],
        _args: &[Value],
    ) -> EvalResult<Value> {
        Ok(Value::Filesystem(Filesystem::new().push(FsOp::Scratch)))
    }
}

pub struct Image;

impl Callable for Image {
    fn signature(&self) -> Signature {
        Signature::new(&[Kind::String])
    }

    fn call(
        &self,
        _ctx: &Context,
        _client: &dyn BuildClient,
        _incoming: Value,
        options: &[OptFragment],
        args: &[Value],
    ) -> EvalResult<Value> {
        Ok(Value::Filesystem(Filesystem::new().push(FsOp::Image {
            reference: args[0].as_str()?.to_string(),
            options: options.to_vec(),
        })))
    }
}

pub struct Http;

impl Callable for Http {
    fn signature(&self) -> Signature {
        Signature::new(&[Kind::String])
    }

    fn call(
        &self,
        _ctx: &Context,
        _client: &dyn BuildClient,
        _incoming: Value,
        options: &[OptFragment],
        args: &[Value],
    ) -> EvalResult<Value> {
        Ok(Value::Filesystem(Filesystem::new().push(FsOp::Http {
            url: args[0].as_str()?.to_string(),
            options: options.to_vec(),
        })))
    }
}

pub struct Git;

impl Callable for Git {
    fn signature(&self) -> Signature {
        Signature::new(&[Kind::String, Kind::String])
    }

    fn call(
        &self,
        _ctx: &Context,
        _client: &dyn BuildClient,
        _incoming: Value,
        options: &[OptFragment],
        args: &[Value],
    ) -> EvalResult<Value> {
        Ok(Value::Filesystem(Filesystem::new().push(FsOp::Git {
            remote: args[0].as_str()?.to_string(),
            reference: args[1].as_str()?.to_string(),
            options: options.to_vec(),
        })))
    }
}

pub struct Local;

impl Callable for Local {
    fn signature(&self) -> Signature {
        Signature::new(&[Kind::String])
    }

    fn call(
        &self,
        _ctx: &Context,
        _client: &dyn BuildClient,
        _incoming: Value,
        options: &[OptFragment],
        args: &[Value],
    ) -> EvalResult<Value> {
        Ok(Value::Filesystem(Filesystem::new().push(FsOp::Local {
            path: args[0].as_str()?.to_string(),
            options: options.to_vec(),
        })))
    }
}

pub struct Frontend;

impl Callable for Frontend {
    fn signature(&self) -> Signature {
        Signature::new(&[Kind::String])
    }

    fn call(
        &self,
        _ctx: &Context,
        _client: &dyn BuildClient,
        _incoming: Value,
        options: &[OptFragment],
        args: &[Value],
    ) -> EvalResult<Value> {
        Ok(Value::Filesystem(Filesystem::new().push(FsOp::Frontend {
            source: args[0].as_str()?.to_string(),
            options: options.to_vec(),
        })))
    }
}

pub struct Run;

impl Callable for Run {
    fn signature(&self) -> Signature {
        Signature::with_variadic(&[], Kind::String)
    }

    fn call(
        &self,
        ctx: &Context,
        _client: &dyn BuildClient,
        incoming: Value,
        options: &[OptFragment],
        args: &[Value],
    ) -> EvalResult<Value> {
        let fs = incoming_fs(&incoming)?;
        let mut options = options.to_vec();

        // A bind sub-closure supplies late-bound options (mounts and the
        // like); invoking it here is the binding re-entry point.
        if let Some(handle) = ctx.binding() {
            if handle.has_closure_block() {
                let value = handle.invoke(ctx)?;
                options.extend(value.as_option()?);
            }
        }

        Ok(Value::Filesystem(fs.push(FsOp::Run {
            command: string_args(args)?,
            options,
        })))
    }
}

pub struct Env;

impl Callable for Env {
    fn signature(&self) -> Signature {
        Signature::new(&[Kind::String, Kind::String])
    }

    fn call(
        &self,
        _ctx: &Context,
        _client: &dyn BuildClient,
        incoming: Value,
        _options: &[OptFragment],
        args: &[Value],
    ) -> EvalResult<Value> {
        Ok(Value::Filesystem(incoming_fs(&incoming)?.push(FsOp::Env {
            key: args[0].as_str()?.to_string(),
            value: args[1].as_str()?.to_string(),
        })))
    }
}

pub struct Dir;

impl Callable for Dir {
    fn signature(&self) -> Signature {
        Signature::new(&[Kind::String])
    }

    fn call(
        &self,
        _ctx: &Context,
        _client: &dyn BuildClient,
        incoming: Value,
        _options: &[OptFragment],
        args: &[Value],
    ) -> EvalResult<Value> {
        Ok(Value::Filesystem(incoming_fs(&incoming)?.push(FsOp::Dir {
            path: args[0].as_str()?.to_string(),
        })))
    }
}

pub struct User;

impl Callable for User {
    fn signature(&self) -> Signature {
        Signature::new(&[Kind::String])
    }

    fn call(
        &self,
        _ctx: &Context,
        _client: &dyn BuildClient,
        incoming: Value,
        _options: &[OptFragment],
        args: &[Value],
    ) -> EvalResult<Value> {
        Ok(Value::Filesystem(incoming_fs(&incoming)?.push(FsOp::User {
            name: args[0].as_str()?.to_string(),
        })))
    }
}

pub struct Mkdir;

impl Callable for Mkdir {
    fn signature(&self) -> Signature {
        Signature::new(&[Kind::String, Kind::Int])
    }

    fn call(
        &self,
        _ctx: &Context,
        _client: &dyn BuildClient,
        incoming: Value,
        options: &[OptFragment],
        args: &[Value],
    ) -> EvalResult<Value> {
        Ok(Value::Filesystem(incoming_fs(&incoming)?.push(FsOp::Mkdir {
            path: args[0].as_str()?.to_string(),
            mode: args[1].as_int()?,
            options: options.to_vec(),
        })))
    }
}

pub struct Mkfile;

impl Callable for Mkfile {
    fn signature(&self) -> Signature {
        Signature::new(&[Kind::String, Kind::Int, Kind::String])
    }

    fn call(
        &self,
        _ctx: &Context,
        _client: &dyn BuildClient,
        incoming: Value,
        options: &[OptFragment],
        args: &[Value],
    ) -> EvalResult<Value> {
        Ok(Value::Filesystem(incoming_fs(&incoming)?.push(FsOp::Mkfile {
            path: args[0].as_str()?.to_string(),
            mode: args[1].as_int()?,
            content: args[2].as_str()?.to_string(),
            options: options.to_vec(),
        })))
    }
}

pub struct Rm;

impl Callable for Rm {
    fn signature(&self) -> Signature {
        Signature::new(&[Kind::String])
    }

    fn call(
        &self,
        _ctx: &Context,
        _client: &dyn BuildClient,
        incoming: Value,
        options: &[OptFragment],
        args: &[Value],
    ) -> EvalResult<Value> {
        Ok(Value::Filesystem(incoming_fs(&incoming)?.push(FsOp::Rm {
            path: args[0].as_str()?.to_string(),
            options: options.to_vec(),
        })))
    }
}

pub struct Copy;

impl Callable for Copy {
    fn signature(&self) -> Signature {
        Signature::new(&[Kind::Filesystem, Kind::String, Kind::String])
    }

    fn call(
        &self,
        _ctx: &Context,
        _client: &dyn BuildClient,
        incoming: Value,
        options: &[OptFragment],
        args: &[Value],
    ) -> EvalResult<Value> {
        Ok(Value::Filesystem(incoming_fs(&incoming)?.push(FsOp::Copy {
            input: args[0].as_filesystem()?,
            src: args[1].as_str()?.to_string(),
            dst: args[2].as_str()?.to_string(),
            options: options.to_vec(),
        })))
    }
}

pub struct Merge;

impl Callable for Merge {
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
        Ok(Value::Filesystem(incoming_fs(&incoming)?.push(FsOp::Merge {
            inputs: fs_args(args)?,
        })))
    }
}

pub struct Diff;

impl Callable for Diff {
    fn signature(&self) -> Signature {
        Signature::new(&[Kind::Filesystem])
    }

    fn call(
        &self,
        _ctx: &Context,
        _client: &dyn BuildClient,
        incoming: Value,
        _options: &[OptFragment],
        args: &[Value],
    ) -> EvalResult<Value> {
        Ok(Value::Filesystem(incoming_fs(&incoming)?.push(FsOp::Diff {
            lower: args[0].as_filesystem()?,
        })))
    }
}

pub struct Entrypoint;

impl Callable for Entrypoint {
    fn signature(&self) -> Signature {
        Signature::with_variadic(&[], Kind::String)
    }

    fn call(
        &self,
        _ctx: &Context,
        _client: &dyn BuildClient,
        incoming: Value,
        _options: &[OptFragment],
        args: &[Value],
    ) -> EvalResult<Value> {
        Ok(Value::Filesystem(incoming_fs(&incoming)?.push(
            FsOp::Entrypoint {
                command: string_args(args)?,
            },
        )))
    }
}

pub struct Cmd;

impl Callable for Cmd {
    fn signature(&self) -> Signature {
        Signature::with_variadic(&[], Kind::String)
    }

    fn call(
        &self,
        _ctx: &Context,
        _client: &dyn BuildClient,
        incoming: Value,
        _options: &[OptFragment],
        args: &[Value],
    ) -> EvalResult<Value> {
        Ok(Value::Filesystem(incoming_fs(&incoming)?.push(FsOp::Cmd {
            command: string_args(args)?,
        })))
    }
}

pub struct Label;

impl Callable for Label {
    fn signature(&self) -> Signature {
        Signature::new(&[Kind::String, Kind::String])
    }

    fn call(
        &self,
        _ctx: &Context,
        _client: &dyn BuildClient,
        incoming: Value,
        _options: &[OptFragment],
        args: &[Value],
    ) -> EvalResult<Value> {
        Ok(Value::Filesystem(incoming_fs(&incoming)?.push(FsOp::Label {
            key: args[0].as_str()?.to_string(),
            value: args[1].as_str()?.to_string(),
        })))
    }
}

pub struct Expose;

impl Callable for Expose {
    fn signature(&self) -> Signature {
        Signature::with_variadic(&[], Kind::String)
    }

    fn call(
        &self,
        _ctx: &Context,
        _client: &dyn BuildClient,
        incoming: Value,
        _options: &[OptFragment],
        args: &[Value],
    ) -> EvalResult<Value> {
        Ok(Value::Filesystem(incoming_fs(&incoming)?.push(FsOp::Expose {
            ports: string_args(args)?,
        })))
    }
}

pub struct Volumes;

impl Callable for Volumes {
    fn signature(&self) -> Signature {
        Signature::with_variadic(&[], Kind::String)
    }

    fn call(
        &self,
        _ctx: &Context,
        _client: &dyn BuildClient,
        incoming: Value,
        _options: &[OptFragment],
        args: &[Value],
    ) -> EvalResult<Value> {
        Ok(Value::Filesystem(incoming_fs(&incoming)?.push(FsOp::Volumes {
            mountpoints: string_args(args)?,
        })))
    }
}

pub struct StopSignal;

impl Callable for StopSignal {
    fn signature(&self) -> Signature {
        Signature::new(&[Kind::String])
    }

    fn call(
        &self,
        _ctx: &Context,
        _client: &dyn BuildClient,
        incoming: Value,
        _options: &[OptFragment],
        args: &[Value],
    ) -> EvalResult<Value> {
        Ok(Value::Filesystem(incoming_fs(&incoming)?.push(
            FsOp::StopSignal {
                signal: args[0].as_str()?.to_string(),
            },
        )))
    }
}

pub struct DockerPush;

impl Callable for DockerPush {
    fn signature(&self) -> Signature {
        Signature::new(&[Kind::String])
    }

    fn call(
        &self,
        _ctx: &Context,
        _client: &dyn BuildClient,
        incoming: Value,
        options: &[OptFragment],
        args: &[Value],
    ) -> EvalResult<Value> {
        Ok(Value::Filesystem(incoming_fs(&incoming)?.push(
            FsOp::DockerPush {
                reference: args[0].as_str()?.to_string(),
                options: options.to_vec(),
            },
        )))
    }
}

pub struct DockerLoad;

impl Callable for DockerLoad {
    fn signature(&self) -> Signature {
        Signature::new(&[Kind::String])
    }

    fn call(
        &self,
        _ctx: &Context,
        _client: &dyn BuildClient,
        incoming: Value,
        _options: &[OptFragment],
        args: &[Value],
    ) -> EvalResult<Value> {
        Ok(Value::Filesystem(incoming_fs(&incoming)?.push(
            FsOp::DockerLoad {
                reference: args[0].as_str()?.to_string(),
            },
        )))
    }
}

pub struct Download;

impl Callable for Download {
    fn signature(&self) -> Signature {
        Signature::new(&[Kind::String])
    }

    fn call(
        &self,
        _ctx: &Context,
        _client: &dyn BuildClient,
        incoming: Value,
        _options: &[OptFragment],
        args: &[Value],
    ) -> EvalResult<Value> {
        Ok(Value::Filesystem(incoming_fs(&incoming)?.push(
            FsOp::Download {
                local_path: args[0].as_str()?.to_string(),
            },
        )))
    }
}

pub struct DownloadTarball;

impl Callable for DownloadTarball {
    fn signature(&self) -> Signature {
        Signature::new(&[Kind::String])
    }

    fn call(
        &self,
        _ctx: &Context,
        _client: &dyn BuildClient,
        incoming: Value,
        _options: &[OptFragment],
        args: &[Value],
    ) -> EvalResult<Value> {
        Ok(Value::Filesystem(incoming_fs(&incoming)?.push(
            FsOp::DownloadTarball {
                local_path: args[0].as_str()?.to_string(),
            },
        )))
    }
}

pub struct DownloadOciTarball;

impl Callable for DownloadOciTarball {
    fn signature(&self) -> Signature {
        Signature::new(&[Kind::String])
    }

    fn call(
        &self,
        _ctx: &Context,
        _client: &dyn BuildClient,
        incoming: Value,
        _options: &[OptFragment],
        args: &[Value],
    ) -> EvalResult<Value> {
        Ok(Value::Filesystem(incoming_fs(&incoming)?.push(
            FsOp::DownloadOciTarball {
                local_path: args[0].as_str()?.to_string(),
            },
        )))
    }
}

pub struct DownloadDockerTarball;

impl Callable for DownloadDockerTarball {
    fn signature(&self) -> Signature {
        Signature::new(&[Kind::String, Kind::String])
    }

    fn call(
        &self,
        _ctx: &Context,
        _client: &dyn BuildClient,
        incoming: Value,
        _options: &[OptFragment],
        args: &[Value],
    ) -> EvalResult<Value> {
        Ok(Value::Filesystem(incoming_fs(&incoming)?.push(
            FsOp::DownloadDockerTarball {
                local_path: args[0].as_str()?.to_string(),
                reference: args[1].as_str()?.to_string(),
            },
        )))
    }
}

/// Debugger yield point; the attached command travels as an option on the
/// surrounding call, so the op chain is left untouched.
pub struct Breakpoint;

impl Callable for Breakpoint {
    fn signature(&self) -> Signature {
        Signature::with_variadic(&[], Kind::String)
    }

    fn call(
        &self,
        _ctx: &Context,
        _client: &dyn BuildClient,
        incoming: Value,
        _options: &[OptFragment],
        _args: &[Value],
    ) -> EvalResult<Value> {
        Ok(incoming)
    }
}
