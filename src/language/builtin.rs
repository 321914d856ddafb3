use crate::language::ast::{BuiltinDecl, Ident, Kind};
use crate::language::span::Span;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::OnceLock;

/// Declared parameter kinds for builtin prototypes. Builtins never take
/// option-kinded parameters; options arrive through `with` clauses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtoKind {
    Fs,
    Str,
    Int,
    Bool,
    Pipeline,
}

impl ProtoKind {
    pub fn kind(self) -> Kind {
        match self {
            ProtoKind::Fs => Kind::Filesystem,
            ProtoKind::Str => Kind::String,
            ProtoKind::Int => Kind::Int,
            ProtoKind::Bool => Kind::Bool,
            ProtoKind::Pipeline => Kind::Pipeline,
        }
    }
}

#[derive(Debug)]
pub struct ParamProto {
    pub kind: ProtoKind,
    pub name: &'static str,
    pub variadic: bool,
}

#[derive(Debug)]
pub struct BuiltinProto {
    pub name: &'static str,
    pub params: &'static [ParamProto],
    pub effects: &'static [ParamProto],
}

impl BuiltinProto {
    /// Minimum argument count; variadic tails accept zero or more.
    pub fn min_args(&self) -> usize {
        self.params.iter().filter(|p| !p.variadic).count()
    }

    pub fn is_variadic(&self) -> bool {
        self.params.last().is_some_and(|p| p.variadic)
    }

    /// The declared kind of the argument at `index`, with the variadic tail
    /// kind repeating.
    pub fn param_kind(&self, index: usize) -> Option<Kind> {
        if index < self.params.len() {
            return Some(self.params[index].kind.kind());
        }
        self.params
            .last()
            .filter(|p| p.variadic)
            .map(|p| p.kind.kind())
    }
}

const fn param(kind: ProtoKind, name: &'static str) -> ParamProto {
    ParamProto {
        kind,
        name,
        variadic: false,
    }
}

const fn variadic(kind: ProtoKind, name: &'static str) -> ParamProto {
    ParamProto {
        kind,
        name,
        variadic: true,
    }
}

const fn proto(
    name: &'static str,
    params: &'static [ParamProto],
    effects: &'static [ParamProto],
) -> BuiltinProto {
    BuiltinProto {
        name,
        params,
        effects,
    }
}

pub const FS_BUILTINS: &[BuiltinProto] = &[
    proto("scratch", &[], &[]),
    proto("image", &[param(ProtoKind::Str, "ref")], &[]),
    proto("http", &[param(ProtoKind::Str, "url")], &[]),
    proto(
        "git",
        &[param(ProtoKind::Str, "remote"), param(ProtoKind::Str, "ref")],
        &[],
    ),
    proto("local", &[param(ProtoKind::Str, "path")], &[]),
    proto("frontend", &[param(ProtoKind::Str, "source")], &[]),
    proto("run", &[variadic(ProtoKind::Str, "args")], &[]),
    proto(
        "env",
        &[param(ProtoKind::Str, "key"), param(ProtoKind::Str, "value")],
        &[],
    ),
    proto("dir", &[param(ProtoKind::Str, "path")], &[]),
    proto("user", &[param(ProtoKind::Str, "name")], &[]),
    proto(
        "mkdir",
        &[param(ProtoKind::Str, "path"), param(ProtoKind::Int, "mode")],
        &[],
    ),
    proto(
        "mkfile",
        &[
            param(ProtoKind::Str, "path"),
            param(ProtoKind::Int, "mode"),
            param(ProtoKind::Str, "content"),
        ],
        &[],
    ),
    proto("rm", &[param(ProtoKind::Str, "path")], &[]),
    proto(
        "copy",
        &[
            param(ProtoKind::Fs, "input"),
            param(ProtoKind::Str, "src"),
            param(ProtoKind::Str, "dst"),
        ],
        &[],
    ),
    proto("merge", &[variadic(ProtoKind::Fs, "inputs")], &[]),
    proto("diff", &[param(ProtoKind::Fs, "lower")], &[]),
    proto("entrypoint", &[variadic(ProtoKind::Str, "command")], &[]),
    proto("cmd", &[variadic(ProtoKind::Str, "command")], &[]),
    proto(
        "label",
        &[param(ProtoKind::Str, "key"), param(ProtoKind::Str, "value")],
        &[],
    ),
    proto("expose", &[variadic(ProtoKind::Str, "ports")], &[]),
    proto("volumes", &[variadic(ProtoKind::Str, "mountpoints")], &[]),
    proto("stopSignal", &[param(ProtoKind::Str, "signal")], &[]),
    proto("dockerPush", &[param(ProtoKind::Str, "ref")], &[]),
    proto("dockerLoad", &[param(ProtoKind::Str, "ref")], &[]),
    proto("download", &[param(ProtoKind::Str, "localPath")], &[]),
    proto("downloadTarball", &[param(ProtoKind::Str, "localPath")], &[]),
    proto(
        "downloadOCITarball",
        &[param(ProtoKind::Str, "localPath")],
        &[],
    ),
    proto(
        "downloadDockerTarball",
        &[
            param(ProtoKind::Str, "localPath"),
            param(ProtoKind::Str, "ref"),
        ],
        &[],
    ),
    proto("breakpoint", &[variadic(ProtoKind::Str, "command")], &[]),
];

pub const STRING_BUILTINS: &[BuiltinProto] = &[
    proto(
        "format",
        &[
            param(ProtoKind::Str, "format"),
            variadic(ProtoKind::Str, "values"),
        ],
        &[],
    ),
    proto("template", &[param(ProtoKind::Str, "text")], &[]),
    proto("manifest", &[param(ProtoKind::Fs, "input")], &[]),
    proto("localArch", &[], &[]),
    proto("localOs", &[], &[]),
    proto("localCwd", &[], &[]),
    proto("localEnv", &[param(ProtoKind::Str, "key")], &[]),
    proto("localRun", &[variadic(ProtoKind::Str, "args")], &[]),
];

pub const PIPELINE_BUILTINS: &[BuiltinProto] = &[
    proto("stage", &[variadic(ProtoKind::Fs, "inputs")], &[]),
    proto("parallel", &[variadic(ProtoKind::Fs, "inputs")], &[]),
];

/// Option constructors grouped by the callee whose `with` clause consumes
/// them.
pub const OPTION_BUILTINS: &[(&str, &[BuiltinProto])] = &[
    (
        "image",
        &[
            proto("resolve", &[], &[]),
            proto("platform", &[param(ProtoKind::Str, "platform")], &[]),
        ],
    ),
    (
        "http",
        &[
            proto("checksum", &[param(ProtoKind::Str, "digest")], &[]),
            proto("chmod", &[param(ProtoKind::Int, "mode")], &[]),
            proto("filename", &[param(ProtoKind::Str, "name")], &[]),
        ],
    ),
    ("git", &[proto("keepGitDir", &[], &[])]),
    (
        "local",
        &[
            proto(
                "includePatterns",
                &[variadic(ProtoKind::Str, "patterns")],
                &[],
            ),
            proto(
                "excludePatterns",
                &[variadic(ProtoKind::Str, "patterns")],
                &[],
            ),
        ],
    ),
    (
        "frontend",
        &[
            proto(
                "input",
                &[param(ProtoKind::Str, "key"), param(ProtoKind::Fs, "value")],
                &[],
            ),
            proto(
                "opt",
                &[param(ProtoKind::Str, "key"), param(ProtoKind::Str, "value")],
                &[],
            ),
        ],
    ),
    (
        "run",
        &[
            proto("readonlyRootfs", &[], &[]),
            proto(
                "env",
                &[param(ProtoKind::Str, "key"), param(ProtoKind::Str, "value")],
                &[],
            ),
            proto("dir", &[param(ProtoKind::Str, "path")], &[]),
            proto("user", &[param(ProtoKind::Str, "name")], &[]),
            proto("ignoreCache", &[], &[]),
            proto("network", &[param(ProtoKind::Str, "mode")], &[]),
            proto("security", &[param(ProtoKind::Str, "mode")], &[]),
            proto("shlex", &[], &[]),
            proto(
                "host",
                &[
                    param(ProtoKind::Str, "name"),
                    param(ProtoKind::Str, "address"),
                ],
                &[],
            ),
            proto("ssh", &[], &[]),
            proto(
                "forward",
                &[param(ProtoKind::Str, "src"), param(ProtoKind::Str, "dest")],
                &[],
            ),
            proto(
                "secret",
                &[
                    param(ProtoKind::Str, "source"),
                    param(ProtoKind::Str, "target"),
                ],
                &[],
            ),
            proto(
                "mount",
                &[
                    param(ProtoKind::Fs, "input"),
                    param(ProtoKind::Str, "target"),
                ],
                &[param(ProtoKind::Fs, "target")],
            ),
        ],
    ),
    (
        "ssh",
        &[
            proto("target", &[param(ProtoKind::Str, "path")], &[]),
            proto("uid", &[param(ProtoKind::Int, "id")], &[]),
            proto("gid", &[param(ProtoKind::Int, "id")], &[]),
            proto("mode", &[param(ProtoKind::Int, "filemode")], &[]),
            proto("localPaths", &[variadic(ProtoKind::Str, "paths")], &[]),
        ],
    ),
    (
        "secret",
        &[
            proto("uid", &[param(ProtoKind::Int, "id")], &[]),
            proto("gid", &[param(ProtoKind::Int, "id")], &[]),
            proto("mode", &[param(ProtoKind::Int, "filemode")], &[]),
            proto(
                "includePatterns",
                &[variadic(ProtoKind::Str, "patterns")],
                &[],
            ),
            proto(
                "excludePatterns",
                &[variadic(ProtoKind::Str, "patterns")],
                &[],
            ),
        ],
    ),
    (
        "mount",
        &[
            proto("readonly", &[], &[]),
            proto("tmpfs", &[], &[]),
            proto("sourcePath", &[param(ProtoKind::Str, "path")], &[]),
            proto(
                "cache",
                &[param(ProtoKind::Str, "id"), param(ProtoKind::Str, "sharing")],
                &[],
            ),
        ],
    ),
    (
        "mkdir",
        &[
            proto("createParents", &[], &[]),
            proto("chown", &[param(ProtoKind::Str, "owner")], &[]),
            proto("createdTime", &[param(ProtoKind::Str, "created")], &[]),
        ],
    ),
    (
        "mkfile",
        &[
            proto("chown", &[param(ProtoKind::Str, "owner")], &[]),
            proto("createdTime", &[param(ProtoKind::Str, "created")], &[]),
        ],
    ),
    (
        "rm",
        &[
            proto("allowNotFound", &[], &[]),
            proto("allowWildcard", &[], &[]),
        ],
    ),
    (
        "copy",
        &[
            proto("followSymlinks", &[], &[]),
            proto("contentsOnly", &[], &[]),
            proto("unpack", &[], &[]),
            proto("createDestPath", &[], &[]),
            proto("allowWildcard", &[], &[]),
            proto("allowEmptyWildcard", &[], &[]),
            proto("chown", &[param(ProtoKind::Str, "owner")], &[]),
            proto("chmod", &[param(ProtoKind::Int, "mode")], &[]),
            proto("createdTime", &[param(ProtoKind::Str, "created")], &[]),
            proto(
                "includePatterns",
                &[variadic(ProtoKind::Str, "patterns")],
                &[],
            ),
            proto(
                "excludePatterns",
                &[variadic(ProtoKind::Str, "patterns")],
                &[],
            ),
        ],
    ),
    (
        "localRun",
        &[
            proto("ignoreError", &[], &[]),
            proto("onlyStderr", &[], &[]),
            proto("includeStderr", &[], &[]),
            proto("shlex", &[], &[]),
        ],
    ),
    (
        "template",
        &[proto(
            "stringField",
            &[param(ProtoKind::Str, "name"), param(ProtoKind::Str, "value")],
            &[],
        )],
    ),
    (
        "manifest",
        &[proto("platform", &[param(ProtoKind::Str, "platform")], &[])],
    ),
    ("dockerPush", &[proto("stargz", &[], &[])]),
];

/// Two-level lookup `Kind → name → prototype`, mirroring the callable
/// registry shape.
pub struct BuiltinLookup {
    by_kind: HashMap<Kind, HashMap<&'static str, &'static BuiltinProto>>,
}

impl BuiltinLookup {
    fn build() -> Self {
        let mut by_kind: HashMap<Kind, HashMap<&'static str, &'static BuiltinProto>> =
            HashMap::new();
        let mut insert = |kind: Kind, protos: &'static [BuiltinProto]| {
            let entry = by_kind.entry(kind).or_default();
            for proto in protos {
                entry.insert(proto.name, proto);
            }
        };
        insert(Kind::Filesystem, FS_BUILTINS);
        insert(Kind::String, STRING_BUILTINS);
        insert(Kind::Pipeline, PIPELINE_BUILTINS);
        for (callee, protos) in OPTION_BUILTINS {
            insert(Kind::option_of(callee), protos);
        }
        Self { by_kind }
    }

    pub fn get(&self, kind: &Kind, name: &str) -> Option<&'static BuiltinProto> {
        self.by_kind.get(kind).and_then(|m| m.get(name)).copied()
    }

    /// Every kind the name is registered under, in a stable order.
    pub fn kinds_of(&self, name: &str) -> Vec<Kind> {
        let mut kinds: Vec<Kind> = self
            .by_kind
            .iter()
            .filter(|(_, m)| m.contains_key(name))
            .map(|(k, _)| k.clone())
            .collect();
        kinds.sort_by_key(|k| k.to_string());
        kinds
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Kind, &'static BuiltinProto)> {
        self.by_kind
            .iter()
            .flat_map(|(kind, m)| m.values().map(move |proto| (kind, *proto)))
    }
}

pub fn lookup() -> &'static BuiltinLookup {
    static LOOKUP: OnceLock<BuiltinLookup> = OnceLock::new();
    LOOKUP.get_or_init(BuiltinLookup::build)
}

/// Synthesise one `BuiltinDecl` per registered name, collecting all kinds a
/// name is registered under. These are inserted into every module scope.
pub fn builtin_decls() -> Vec<Rc<BuiltinDecl>> {
    let lookup = lookup();
    let mut names: Vec<&'static str> = lookup.entries().map(|(_, proto)| proto.name).collect();
    names.sort_unstable();
    names.dedup();

    names
        .into_iter()
        .map(|name| {
            let kinds = lookup.kinds_of(name);
            let protos = kinds
                .iter()
                .filter_map(|kind| lookup.get(kind, name).map(|p| (kind.clone(), p)))
                .collect();
            Rc::new(BuiltinDecl {
                name: name.to_string(),
                kinds,
                protos,
            })
        })
        .collect()
}

/// The ident a synthesised builtin object is registered under.
pub fn builtin_ident(name: &str) -> Ident {
    Ident::new(name, Span::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_finds_fs_builtins() {
        let lk = lookup();
        assert!(lk.get(&Kind::Filesystem, "scratch").is_some());
        assert!(lk.get(&Kind::Filesystem, "run").is_some());
        assert!(lk.get(&Kind::String, "scratch").is_none());
    }

    #[test]
    fn env_registers_under_two_kinds() {
        let kinds = lookup().kinds_of("env");
        assert!(kinds.contains(&Kind::Filesystem));
        assert!(kinds.contains(&Kind::option_of("run")));
    }

    #[test]
    fn variadic_param_kind_repeats() {
        let run = lookup().get(&Kind::Filesystem, "run").unwrap();
        assert_eq!(run.min_args(), 0);
        assert!(run.is_variadic());
        assert_eq!(run.param_kind(0), Some(Kind::String));
        assert_eq!(run.param_kind(7), Some(Kind::String));

        let copy = lookup().get(&Kind::Filesystem, "copy").unwrap();
        assert_eq!(copy.min_args(), 3);
        assert_eq!(copy.param_kind(0), Some(Kind::Filesystem));
        assert_eq!(copy.param_kind(3), None);
    }

    #[test]
    fn builtin_decls_group_kinds_by_name() {
        let decls = builtin_decls();
        let env = decls.iter().find(|d| d.name == "env").unwrap();
        assert_eq!(env.kinds.len(), env.protos.len());
        assert!(env.kinds.len() >= 2);
    }
}
