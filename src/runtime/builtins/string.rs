use crate::language::ast::Kind;
use crate::runtime::builtin::{Callable, Signature};
use crate::runtime::builtins::string_args;
use crate::runtime::codegen::BuildClient;
use crate::runtime::context::Context;
use crate::runtime::error::{EvalError, EvalErrorKind, EvalResult};
use crate::runtime::value::{OptFragment, Value};
use std::process::Command;

pub struct Format;

impl Callable for Format {
    fn signature(&self) -> Signature {
        Signature::with_variadic(&[Kind::String], Kind::String)
    }

    fn call(
        &self,
        _ctx: &Context,
        _client: &dyn BuildClient,
        _incoming: Value,
        _options: &[OptFragment],
        args: &[Value],
    ) -> EvalResult<Value> {
        let template = args[0].as_str()?;
        let mut values = args[1..].iter();
        let mut out = String::new();
        let mut chars = template.chars().peekable();
        while let Some(ch) = chars.next() {
            if ch != '%' {
                out.push(ch);
                continue;
            }
            match chars.next() {
                Some('%') => out.push('%'),
                Some('s') | Some('d') | Some('v') => match values.next() {
                    Some(value) => out.push_str(&value.coerce_string()?),
                    None => {
                        return Err(invalid(format!(
                            "format `{template}` has more verbs than arguments"
                        )))
                    }
                },
                Some(other) => {
                    return Err(invalid(format!("unsupported format verb `%{other}`")))
                }
                None => return Err(invalid("format string ends with `%`".to_string())),
            }
        }
        Ok(Value::Str(out))
    }
}

pub struct Template;

impl Callable for Template {
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
        let mut out = args[0].as_str()?.to_string();
        for option in options {
            if let OptFragment::StringField { name, value } = option {
                out = out.replace(&format!("{{{{{name}}}}}"), value);
            }
        }
        Ok(Value::Str(out))
    }
}

/// Render the serialized definition of a filesystem. The engine-backed image
/// manifest needs a build session; the definition is the engine-free
/// equivalent.
pub struct Manifest;

impl Callable for Manifest {
    fn signature(&self) -> Signature {
        Signature::new(&[Kind::Filesystem])
    }

    fn call(
        &self,
        _ctx: &Context,
        _client: &dyn BuildClient,
        _incoming: Value,
        options: &[OptFragment],
        args: &[Value],
    ) -> EvalResult<Value> {
        let fs = args[0].as_filesystem()?;
        let platform = options.iter().find_map(|o| match o {
            OptFragment::Platform { platform } => Some(platform.clone()),
            _ => None,
        });
        let manifest = serde_json::json!({
            "platform": platform,
            "definition": fs,
        });
        serde_json::to_string_pretty(&manifest)
            .map(Value::Str)
            .map_err(|err| EvalError::internal(format!("manifest serialization: {err}")))
    }
}

pub struct LocalArch;

impl Callable for LocalArch {
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
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            other => other,
        };
        Ok(Value::Str(arch.to_string()))
    }
}

pub struct LocalOs;

impl Callable for LocalOs {
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
        Ok(Value::Str(std::env::consts::OS.to_string()))
    }
}

pub struct LocalCwd;

impl Callable for LocalCwd {
    fn signature(&self) -> Signature {
        Signature::new(&[])
    }

    fn call(
        &self,
        ctx: &Context,
        _client: &dyn BuildClient,
        _incoming: Value,
        _options: &[OptFragment],
        _args: &[Value],
    ) -> EvalResult<Value> {
        ctx.check_cancelled()?;
        std::env::current_dir()
            .map(|dir| Value::Str(dir.display().to_string()))
            .map_err(|err| {
                EvalError::new(EvalErrorKind::Io {
                    message: format!("localCwd: {err}"),
                })
            })
    }
}

pub struct LocalEnv;

impl Callable for LocalEnv {
    fn signature(&self) -> Signature {
        Signature::new(&[Kind::String])
    }

    fn call(
        &self,
        _ctx: &Context,
        _client: &dyn BuildClient,
        _incoming: Value,
        _options: &[OptFragment],
        args: &[Value],
    ) -> EvalResult<Value> {
        let key = args[0].as_str()?;
        Ok(Value::Str(std::env::var(key).unwrap_or_default()))
    }
}

pub struct LocalRun;

impl Callable for LocalRun {
    fn signature(&self) -> Signature {
        Signature::with_variadic(&[], Kind::String)
    }

    fn call(
        &self,
        ctx: &Context,
        _client: &dyn BuildClient,
        _incoming: Value,
        options: &[OptFragment],
        args: &[Value],
    ) -> EvalResult<Value> {
        ctx.check_cancelled()?;

        let parts = string_args(args)?;
        let command_line = parts.join(" ");
        let shlex = options.iter().any(|o| matches!(o, OptFragment::Shlex));
        let ignore_error = options.iter().any(|o| matches!(o, OptFragment::IgnoreError));
        let only_stderr = options.iter().any(|o| matches!(o, OptFragment::OnlyStderr));
        let include_stderr = options
            .iter()
            .any(|o| matches!(o, OptFragment::IncludeStderr));

        let mut command = if shlex {
            let argv = shell_split(&command_line);
            let Some((program, rest)) = argv.split_first() else {
                return Err(invalid("localRun: empty command".to_string()));
            };
            let mut command = Command::new(program);
            command.args(rest);
            command
        } else {
            let mut command = Command::new("sh");
            command.arg("-c").arg(&command_line);
            command
        };

        let output = command.output().map_err(|err| {
            EvalError::new(EvalErrorKind::Io {
                message: format!("localRun `{command_line}`: {err}"),
            })
        })?;

        if !output.status.success() && !ignore_error {
            return Err(invalid(format!(
                "localRun `{}` exited with {}: {}",
                command_line,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim_end()
            )));
        }

        let mut captured = Vec::new();
        if only_stderr {
            captured.extend_from_slice(&output.stderr);
        } else {
            captured.extend_from_slice(&output.stdout);
            if include_stderr {
                captured.extend_from_slice(&output.stderr);
            }
        }

        let text = String::from_utf8_lossy(&captured)
            .trim_end_matches('\n')
            .to_string();
        Ok(Value::Str(text))
    }
}

fn invalid(message: String) -> EvalError {
    EvalError::new(EvalErrorKind::InvalidArgument { message })
}

/// Minimal shell-style splitting: whitespace separates words, single and
/// double quotes group them.
fn shell_split(input: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut quote: Option<char> = None;
    let mut has_word = false;

    for ch in input.chars() {
        match quote {
            Some(q) => {
                if ch == q {
                    quote = None;
                } else {
                    word.push(ch);
                }
            }
            None => match ch {
                '\'' | '"' => {
                    quote = Some(ch);
                    has_word = true;
                }
                c if c.is_whitespace() => {
                    if has_word || !word.is_empty() {
                        words.push(std::mem::take(&mut word));
                        has_word = false;
                    }
                }
                c => {
                    word.push(c);
                    has_word = true;
                }
            },
        }
    }
    if has_word || !word.is_empty() {
        words.push(word);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::codegen::NoClient;
    use crate::runtime::value::{Filesystem, FsOp};

    fn call(callable: &dyn Callable, options: &[OptFragment], args: &[Value]) -> EvalResult<Value> {
        callable.call(
            &Context::background(),
            &NoClient,
            Value::Unit,
            options,
            args,
        )
    }

    #[test]
    fn format_substitutes_verbs_in_order() {
        let out = call(
            &Format,
            &[],
            &[
                Value::Str("%s-%d%%".into()),
                Value::Str("a".into()),
                Value::Int(3),
            ],
        )
        .unwrap();
        assert_eq!(out, Value::Str("a-3%".into()));
    }

    #[test]
    fn format_rejects_missing_arguments() {
        let err = call(&Format, &[], &[Value::Str("%s %s".into()), Value::Str("x".into())])
            .unwrap_err();
        assert!(matches!(err.kind, EvalErrorKind::InvalidArgument { .. }));
    }

    #[test]
    fn template_replaces_string_fields() {
        let out = call(
            &Template,
            &[OptFragment::StringField {
                name: "name".into(),
                value: "hlb".into(),
            }],
            &[Value::Str("hi {{name}}!".into())],
        )
        .unwrap();
        assert_eq!(out, Value::Str("hi hlb!".into()));
    }

    #[test]
    fn manifest_renders_definition() {
        let fs = Filesystem::new().push(FsOp::Scratch);
        let out = call(&Manifest, &[], &[Value::Filesystem(fs)]).unwrap();
        let text = out.as_str().unwrap().to_string();
        assert!(text.contains("\"op\": \"scratch\""));
    }

    #[test]
    fn local_run_captures_stdout() {
        let out = call(&LocalRun, &[], &[Value::Str("echo hlb".into())]).unwrap();
        assert_eq!(out, Value::Str("hlb".into()));
    }

    #[test]
    fn local_run_failure_respects_ignore_error() {
        let args = [Value::Str("exit 7".into())];
        assert!(call(&LocalRun, &[], &args).is_err());
        let out = call(&LocalRun, &[OptFragment::IgnoreError], &args).unwrap();
        assert_eq!(out, Value::Str(String::new()));
    }

    #[test]
    fn shell_split_honours_quotes() {
        assert_eq!(
            shell_split("echo 'a b' \"c\" d"),
            vec!["echo", "a b", "c", "d"]
        );
    }
}
