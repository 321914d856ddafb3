use crate::language::ast::Kind;
use crate::runtime::builtin::{Callable, Signature};
use crate::runtime::builtins::{append_fragment, string_args};
use crate::runtime::codegen::BuildClient;
use crate::runtime::context::Context;
use crate::runtime::error::{EvalError, EvalErrorKind, EvalResult};
use crate::runtime::value::{OptFragment, Value};

/// Most option constructors translate their arguments into a single
/// fragment appended to the option list flowing through the block; the
/// macro spells out that shape once.
macro_rules! option_callable {
    ($(#[$meta:meta])* $name:ident, [$($param:expr),*], |$args:ident| $fragment:expr) => {
        $(#[$meta])*
        pub struct $name;

        impl Callable for $name {
            fn signature(&self) -> Signature {
                Signature::new(&[$($param),*])
            }

            fn call(
                &self,
                _ctx: &Context,
                _client: &dyn BuildClient,
                incoming: Value,
                _options: &[OptFragment],
                $args: &[Value],
            ) -> EvalResult<Value> {
                let fragment = $fragment;
                append_fragment(incoming, fragment)
            }
        }
    };
    ($(#[$meta:meta])* $name:ident, variadic $tail:expr, |$args:ident| $fragment:expr) => {
        $(#[$meta])*
        pub struct $name;

        impl Callable for $name {
            fn signature(&self) -> Signature {
                Signature::with_variadic(&[], $tail)
            }

            fn call(
                &self,
                _ctx: &Context,
                _client: &dyn BuildClient,
                incoming: Value,
                _options: &[OptFragment],
                $args: &[Value],
            ) -> EvalResult<Value> {
                let fragment = $fragment;
                append_fragment(incoming, fragment)
            }
        }
    };
}

option_callable!(Resolve, [], |_args| OptFragment::Resolve);
option_callable!(Platform, [Kind::String], |args| OptFragment::Platform {
    platform: args[0].as_str()?.to_string(),
});
option_callable!(Checksum, [Kind::String], |args| OptFragment::Checksum {
    digest: args[0].as_str()?.to_string(),
});
option_callable!(Chmod, [Kind::Int], |args| OptFragment::Chmod {
    mode: args[0].as_int()?,
});
option_callable!(Filename, [Kind::String], |args| OptFragment::Filename {
    name: args[0].as_str()?.to_string(),
});
option_callable!(KeepGitDir, [], |_args| OptFragment::KeepGitDir);
option_callable!(IncludePatterns, variadic Kind::String, |args| {
    OptFragment::IncludePatterns {
        patterns: string_args(args)?,
    }
});
option_callable!(ExcludePatterns, variadic Kind::String, |args| {
    OptFragment::ExcludePatterns {
        patterns: string_args(args)?,
    }
});
option_callable!(FrontendInput, [Kind::String, Kind::Filesystem], |args| {
    OptFragment::FrontendInput {
        key: args[0].as_str()?.to_string(),
        value: args[1].as_filesystem()?,
    }
});
option_callable!(FrontendOpt, [Kind::String, Kind::String], |args| {
    OptFragment::FrontendOpt {
        key: args[0].as_str()?.to_string(),
        value: args[1].as_str()?.to_string(),
    }
});
option_callable!(ReadonlyRootfs, [], |_args| OptFragment::ReadonlyRootfs);
option_callable!(RunEnv, [Kind::String, Kind::String], |args| {
    OptFragment::RunEnv {
        key: args[0].as_str()?.to_string(),
        value: args[1].as_str()?.to_string(),
    }
});
option_callable!(RunDir, [Kind::String], |args| OptFragment::RunDir {
    path: args[0].as_str()?.to_string(),
});
option_callable!(RunUser, [Kind::String], |args| OptFragment::RunUser {
    name: args[0].as_str()?.to_string(),
});
option_callable!(IgnoreCache, [], |_args| OptFragment::IgnoreCache);
option_callable!(Shlex, [], |_args| OptFragment::Shlex);
option_callable!(Host, [Kind::String, Kind::String], |args| OptFragment::Host {
    name: args[0].as_str()?.to_string(),
    address: args[1].as_str()?.to_string(),
});
option_callable!(Forward, [Kind::String, Kind::String], |args| {
    OptFragment::Forward {
        src: args[0].as_str()?.to_string(),
        dest: args[1].as_str()?.to_string(),
    }
});
option_callable!(MountTarget, [Kind::String], |args| OptFragment::MountTarget {
    path: args[0].as_str()?.to_string(),
});
option_callable!(Uid, [Kind::Int], |args| OptFragment::Uid {
    id: args[0].as_int()?,
});
option_callable!(Gid, [Kind::Int], |args| OptFragment::Gid {
    id: args[0].as_int()?,
});
option_callable!(Mode, [Kind::Int], |args| OptFragment::Mode {
    mode: args[0].as_int()?,
});
option_callable!(LocalPaths, variadic Kind::String, |args| {
    OptFragment::LocalPaths {
        paths: string_args(args)?,
    }
});
option_callable!(Readonly, [], |_args| OptFragment::Readonly);
option_callable!(Tmpfs, [], |_args| OptFragment::Tmpfs);
option_callable!(SourcePath, [Kind::String], |args| OptFragment::SourcePath {
    path: args[0].as_str()?.to_string(),
});
option_callable!(CreateParents, [], |_args| OptFragment::CreateParents);
option_callable!(Chown, [Kind::String], |args| OptFragment::Chown {
    owner: args[0].as_str()?.to_string(),
});
option_callable!(CreatedTime, [Kind::String], |args| OptFragment::CreatedTime {
    created: args[0].as_str()?.to_string(),
});
option_callable!(FollowSymlinks, [], |_args| OptFragment::FollowSymlinks);
option_callable!(ContentsOnly, [], |_args| OptFragment::ContentsOnly);
option_callable!(Unpack, [], |_args| OptFragment::Unpack);
option_callable!(CreateDestPath, [], |_args| OptFragment::CreateDestPath);
option_callable!(AllowWildcard, [], |_args| OptFragment::AllowWildcard);
option_callable!(AllowEmptyWildcard, [], |_args| OptFragment::AllowEmptyWildcard);
option_callable!(AllowNotFound, [], |_args| OptFragment::AllowNotFound);
option_callable!(IgnoreError, [], |_args| OptFragment::IgnoreError);
option_callable!(OnlyStderr, [], |_args| OptFragment::OnlyStderr);
option_callable!(IncludeStderr, [], |_args| OptFragment::IncludeStderr);
option_callable!(StringField, [Kind::String, Kind::String], |args| {
    OptFragment::StringField {
        name: args[0].as_str()?.to_string(),
        value: args[1].as_str()?.to_string(),
    }
});
option_callable!(Stargz, [], |_args| OptFragment::Stargz);

pub struct Network;

impl Callable for Network {
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
        let mode = args[0].as_str()?;
        if !matches!(mode, "unset" | "host" | "none") {
            return Err(invalid(format!(
                "network mode must be unset, host, or none; got `{mode}`"
            )));
        }
        append_fragment(
            incoming,
            OptFragment::Network {
                mode: mode.to_string(),
            },
        )
    }
}

pub struct Security;

impl Callable for Security {
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
        let mode = args[0].as_str()?;
        if !matches!(mode, "sandbox" | "insecure") {
            return Err(invalid(format!(
                "security mode must be sandbox or insecure; got `{mode}`"
            )));
        }
        append_fragment(
            incoming,
            OptFragment::Security {
                mode: mode.to_string(),
            },
        )
    }
}

pub struct Cache;

impl Callable for Cache {
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
        let sharing = args[1].as_str()?;
        if !matches!(sharing, "shared" | "private" | "locked") {
            return Err(invalid(format!(
                "cache sharing must be shared, private, or locked; got `{sharing}`"
            )));
        }
        append_fragment(
            incoming,
            OptFragment::Cache {
                id: args[0].as_str()?.to_string(),
                sharing: sharing.to_string(),
            },
        )
    }
}

/// `ssh`, `secret`, and `mount` carry their own `with` options inside the
/// fragment they produce.
pub struct Ssh;

impl Callable for Ssh {
    fn signature(&self) -> Signature {
        Signature::new(&[])
    }

    fn call(
        &self,
        _ctx: &Context,
        _client: &dyn BuildClient,
        incoming: Value,
        options: &[OptFragment],
        _args: &[Value],
    ) -> EvalResult<Value> {
        append_fragment(
            incoming,
            OptFragment::Ssh {
                options: options.to_vec(),
            },
        )
    }
}

pub struct Secret;

impl Callable for Secret {
    fn signature(&self) -> Signature {
        Signature::new(&[Kind::String, Kind::String])
    }

    fn call(
        &self,
        _ctx: &Context,
        _client: &dyn BuildClient,
        incoming: Value,
        options: &[OptFragment],
        args: &[Value],
    ) -> EvalResult<Value> {
        append_fragment(
            incoming,
            OptFragment::Secret {
                source: args[0].as_str()?.to_string(),
                target: args[1].as_str()?.to_string(),
                options: options.to_vec(),
            },
        )
    }
}

pub struct Mount;

impl Callable for Mount {
    fn signature(&self) -> Signature {
        Signature::new(&[Kind::Filesystem, Kind::String])
    }

    fn call(
        &self,
        _ctx: &Context,
        _client: &dyn BuildClient,
        incoming: Value,
        options: &[OptFragment],
        args: &[Value],
    ) -> EvalResult<Value> {
        append_fragment(
            incoming,
            OptFragment::Mount {
                input: args[0].as_filesystem()?,
                target: args[1].as_str()?.to_string(),
                options: options.to_vec(),
            },
        )
    }
}

fn invalid(message: String) -> EvalError {
    EvalError::new(EvalErrorKind::InvalidArgument { message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::codegen::NoClient;

    fn call(callable: &dyn Callable, incoming: Value, args: &[Value]) -> EvalResult<Value> {
        callable.call(&Context::background(), &NoClient, incoming, &[], args)
    }

    #[test]
    fn fragments_append_in_source_order() {
        let first = call(&ReadonlyRootfs, Value::Unit, &[]).unwrap();
        let second = call(
            &RunEnv,
            first,
            &[Value::Str("K".into()), Value::Str("V".into())],
        )
        .unwrap();
        let fragments = second.as_option().unwrap();
        assert_eq!(fragments[0], OptFragment::ReadonlyRootfs);
        assert_eq!(
            fragments[1],
            OptFragment::RunEnv {
                key: "K".into(),
                value: "V".into()
            }
        );
    }

    #[test]
    fn network_mode_is_validated() {
        assert!(call(&Network, Value::Unit, &[Value::Str("host".into())]).is_ok());
        let err = call(&Network, Value::Unit, &[Value::Str("bridged".into())]).unwrap_err();
        assert!(matches!(err.kind, EvalErrorKind::InvalidArgument { .. }));
    }

    #[test]
    fn cache_sharing_is_validated() {
        assert!(call(
            &Cache,
            Value::Unit,
            &[Value::Str("id".into()), Value::Str("locked".into())]
        )
        .is_ok());
        assert!(call(
            &Cache,
            Value::Unit,
            &[Value::Str("id".into()), Value::Str("exclusive".into())]
        )
        .is_err());
    }

    #[test]
    fn non_option_incoming_is_a_bad_cast() {
        let err = call(&ReadonlyRootfs, Value::Int(1), &[]).unwrap_err();
        assert!(matches!(err.kind, EvalErrorKind::BadCast { .. }));
    }
}
