use crate::language::ast::Kind;
use crate::language::builtin::{self, BuiltinProto};
use crate::runtime::builtins::{filesystem as fs, option as opt, pipeline as pl, string as st};
use crate::runtime::codegen::BuildClient;
use crate::runtime::context::Context;
use crate::runtime::error::EvalResult;
use crate::runtime::value::{OptFragment, Value};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// The declared argument shape of a callable; validated against the builtin
/// prototype table at registry initialisation.
#[derive(Clone, Debug, PartialEq)]
pub struct Signature {
    pub params: Vec<Kind>,
    pub variadic: Option<Kind>,
}

impl Signature {
    pub fn new(params: &[Kind]) -> Self {
        Self {
            params: params.to_vec(),
            variadic: None,
        }
    }

    pub fn with_variadic(params: &[Kind], tail: Kind) -> Self {
        Self {
            params: params.to_vec(),
            variadic: Some(tail),
        }
    }

    pub fn min_args(&self) -> usize {
        self.params.len()
    }

    pub fn accepts(&self, count: usize) -> bool {
        count >= self.params.len() && (self.variadic.is_some() || count == self.params.len())
    }
}

/// A host operation implementing a named builtin. Every callable matches the
/// fixed prototype: `(ctx, client, incoming, options, args) → value`.
pub trait Callable: Send + Sync {
    fn signature(&self) -> Signature;

    fn call(
        &self,
        ctx: &Context,
        client: &dyn BuildClient,
        incoming: Value,
        options: &[OptFragment],
        args: &[Value],
    ) -> EvalResult<Value>;
}

#[derive(Clone, Debug, Error)]
#[error("callable registry mismatch:\n{0}")]
pub struct RegistryError(pub String);

/// The static two-level table `(Kind, Name) → Callable`. Read-only after
/// initialisation.
pub struct Registry {
    by_kind: HashMap<Kind, HashMap<&'static str, Arc<dyn Callable>>>,
}

impl Registry {
    pub fn new() -> Result<Registry, RegistryError> {
        let registry = Self::build();
        registry.validate()?;
        Ok(registry)
    }

    /// The process-wide registry; initialisation failures are sticky.
    pub fn global() -> Result<&'static Registry, RegistryError> {
        static REGISTRY: OnceLock<Result<Registry, RegistryError>> = OnceLock::new();
        REGISTRY.get_or_init(Registry::new).as_ref().map_err(Clone::clone)
    }

    pub fn get(&self, kind: &Kind, name: &str) -> Option<Arc<dyn Callable>> {
        self.by_kind.get(kind).and_then(|m| m.get(name)).cloned()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Kind, &'static str, &Arc<dyn Callable>)> {
        self.by_kind
            .iter()
            .flat_map(|(kind, m)| m.iter().map(move |(name, c)| (kind, *name, c)))
    }

    fn build() -> Registry {
        let mut by_kind: HashMap<Kind, HashMap<&'static str, Arc<dyn Callable>>> = HashMap::new();
        let mut insert = |kind: Kind, entries: Vec<(&'static str, Arc<dyn Callable>)>| {
            by_kind.entry(kind).or_default().extend(entries);
        };

        insert(
            Kind::Filesystem,
            vec![
                ("scratch", Arc::new(fs::Scratch)),
                ("image", Arc::new(fs::Image)),
                ("http", Arc::new(fs::Http)),
                ("git", Arc::new(fs::Git)),
                ("local", Arc::new(fs::Local)),
                ("frontend", Arc::new(fs::Frontend)),
                ("run", Arc::new(fs::Run)),
                ("env", Arc::new(fs::Env)),
                ("dir", Arc::new(fs::Dir)),
                ("user", Arc::new(fs::User)),
                ("mkdir", Arc::new(fs::Mkdir)),
                ("mkfile", Arc::new(fs::Mkfile)),
                ("rm", Arc::new(fs::Rm)),
                ("copy", Arc::new(fs::Copy)),
                ("merge", Arc::new(fs::Merge)),
                ("diff", Arc::new(fs::Diff)),
                ("entrypoint", Arc::new(fs::Entrypoint)),
                ("cmd", Arc::new(fs::Cmd)),
                ("label", Arc::new(fs::Label)),
                ("expose", Arc::new(fs::Expose)),
                ("volumes", Arc::new(fs::Volumes)),
                ("stopSignal", Arc::new(fs::StopSignal)),
                ("dockerPush", Arc::new(fs::DockerPush)),
                ("dockerLoad", Arc::new(fs::DockerLoad)),
                ("download", Arc::new(fs::Download)),
                ("downloadTarball", Arc::new(fs::DownloadTarball)),
                ("downloadOCITarball", Arc::new(fs::DownloadOciTarball)),
                ("downloadDockerTarball", Arc::new(fs::DownloadDockerTarball)),
                ("breakpoint", Arc::new(fs::Breakpoint)),
            ],
        );
        insert(
            Kind::String,
            vec![
                ("format", Arc::new(st::Format)),
                ("template", Arc::new(st::Template)),
                ("manifest", Arc::new(st::Manifest)),
                ("localArch", Arc::new(st::LocalArch)),
                ("localOs", Arc::new(st::LocalOs)),
                ("localCwd", Arc::new(st::LocalCwd)),
                ("localEnv", Arc::new(st::LocalEnv)),
                ("localRun", Arc::new(st::LocalRun)),
            ],
        );
        insert(
            Kind::Pipeline,
            vec![
                ("stage", Arc::new(pl::Stage)),
                ("parallel", Arc::new(pl::Stage)),
            ],
        );
        insert(
            Kind::option_of("image"),
            vec![
                ("resolve", Arc::new(opt::Resolve)),
                ("platform", Arc::new(opt::Platform)),
            ],
        );
        insert(
            Kind::option_of("http"),
            vec![
                ("checksum", Arc::new(opt::Checksum)),
                ("chmod", Arc::new(opt::Chmod)),
                ("filename", Arc::new(opt::Filename)),
            ],
        );
        insert(
            Kind::option_of("git"),
            vec![("keepGitDir", Arc::new(opt::KeepGitDir))],
        );
        insert(
            Kind::option_of("local"),
            vec![
                ("includePatterns", Arc::new(opt::IncludePatterns)),
                ("excludePatterns", Arc::new(opt::ExcludePatterns)),
            ],
        );
        insert(
            Kind::option_of("frontend"),
            vec![
                ("input", Arc::new(opt::FrontendInput)),
                ("opt", Arc::new(opt::FrontendOpt)),
            ],
        );
        insert(
            Kind::option_of("run"),
            vec![
                ("readonlyRootfs", Arc::new(opt::ReadonlyRootfs)),
                ("env", Arc::new(opt::RunEnv)),
                ("dir", Arc::new(opt::RunDir)),
                ("user", Arc::new(opt::RunUser)),
                ("ignoreCache", Arc::new(opt::IgnoreCache)),
                ("network", Arc::new(opt::Network)),
                ("security", Arc::new(opt::Security)),
                ("shlex", Arc::new(opt::Shlex)),
                ("host", Arc::new(opt::Host)),
                ("ssh", Arc::new(opt::Ssh)),
                ("forward", Arc::new(opt::Forward)),
                ("secret", Arc::new(opt::Secret)),
                ("mount", Arc::new(opt::Mount)),
            ],
        );
        insert(
            Kind::option_of("ssh"),
            vec![
                ("target", Arc::new(opt::MountTarget)),
                ("uid", Arc::new(opt::Uid)),
                ("gid", Arc::new(opt::Gid)),
                ("mode", Arc::new(opt::Mode)),
                ("localPaths", Arc::new(opt::LocalPaths)),
            ],
        );
        insert(
            Kind::option_of("secret"),
            vec![
                ("uid", Arc::new(opt::Uid)),
                ("gid", Arc::new(opt::Gid)),
                ("mode", Arc::new(opt::Mode)),
                ("includePatterns", Arc::new(opt::IncludePatterns)),
                ("excludePatterns", Arc::new(opt::ExcludePatterns)),
            ],
        );
        insert(
            Kind::option_of("mount"),
            vec![
                ("readonly", Arc::new(opt::Readonly)),
                ("tmpfs", Arc::new(opt::Tmpfs)),
                ("sourcePath", Arc::new(opt::SourcePath)),
                ("cache", Arc::new(opt::Cache)),
            ],
        );
        insert(
            Kind::option_of("mkdir"),
            vec![
                ("createParents", Arc::new(opt::CreateParents)),
                ("chown", Arc::new(opt::Chown)),
                ("createdTime", Arc::new(opt::CreatedTime)),
            ],
        );
        insert(
            Kind::option_of("mkfile"),
            vec![
                ("chown", Arc::new(opt::Chown)),
                ("createdTime", Arc::new(opt::CreatedTime)),
            ],
        );
        insert(
            Kind::option_of("rm"),
            vec![
                ("allowNotFound", Arc::new(opt::AllowNotFound)),
                ("allowWildcard", Arc::new(opt::AllowWildcard)),
            ],
        );
        insert(
            Kind::option_of("copy"),
            vec![
                ("followSymlinks", Arc::new(opt::FollowSymlinks)),
                ("contentsOnly", Arc::new(opt::ContentsOnly)),
                ("unpack", Arc::new(opt::Unpack)),
                ("createDestPath", Arc::new(opt::CreateDestPath)),
                ("allowWildcard", Arc::new(opt::AllowWildcard)),
                ("allowEmptyWildcard", Arc::new(opt::AllowEmptyWildcard)),
                ("chown", Arc::new(opt::Chown)),
                ("chmod", Arc::new(opt::Chmod)),
                ("createdTime", Arc::new(opt::CreatedTime)),
                ("includePatterns", Arc::new(opt::IncludePatterns)),
                ("excludePatterns", Arc::new(opt::ExcludePatterns)),
            ],
        );
        insert(
            Kind::option_of("localRun"),
            vec![
                ("ignoreError", Arc::new(opt::IgnoreError)),
                ("onlyStderr", Arc::new(opt::OnlyStderr)),
                ("includeStderr", Arc::new(opt::IncludeStderr)),
                ("shlex", Arc::new(opt::Shlex)),
            ],
        );
        insert(
            Kind::option_of("template"),
            vec![("stringField", Arc::new(opt::StringField))],
        );
        insert(
            Kind::option_of("manifest"),
            vec![("platform", Arc::new(opt::Platform))],
        );
        insert(
            Kind::option_of("dockerPush"),
            vec![("stargz", Arc::new(opt::Stargz))],
        );

        Registry { by_kind }
    }

    /// Validate every callable against its declared prototype and every
    /// prototype against the registry, reporting all mismatches at once.
    fn validate(&self) -> Result<(), RegistryError> {
        let lookup = builtin::lookup();
        let mut problems = Vec::new();

        for (kind, name, callable) in self.entries() {
            match lookup.get(kind, name) {
                None => problems.push(format!("`{kind}::{name}` has no declared prototype")),
                Some(proto) => {
                    if let Err(message) = check_prototype(proto, callable.as_ref()) {
                        problems.push(format!("`{kind}::{name}` {message}"));
                    }
                }
            }
        }

        for (kind, proto) in lookup.entries() {
            if self.get(kind, proto.name).is_none() {
                problems.push(format!("`{kind}::{}` is declared but not registered", proto.name));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            problems.sort();
            Err(RegistryError(problems.join("\n")))
        }
    }
}

/// Compare a callable's declared signature with the builtin prototype.
pub fn check_prototype(proto: &BuiltinProto, callable: &dyn Callable) -> Result<(), String> {
    let sig = callable.signature();

    let expected_fixed: Vec<Kind> = proto
        .params
        .iter()
        .filter(|p| !p.variadic)
        .map(|p| p.kind.kind())
        .collect();
    let expected_variadic = proto
        .params
        .last()
        .filter(|p| p.variadic)
        .map(|p| p.kind.kind());

    if sig.params != expected_fixed || sig.variadic != expected_variadic {
        return Err(format!(
            "signature {:?} variadic {:?} does not match prototype {:?} variadic {:?}",
            sig.params, sig.variadic, expected_fixed, expected_variadic
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_initialises_cleanly() {
        Registry::new().expect("registry");
    }

    #[test]
    fn every_callable_passes_prototype_check() {
        let registry = Registry::new().unwrap();
        let lookup = builtin::lookup();
        for (kind, name, callable) in registry.entries() {
            let proto = lookup
                .get(kind, name)
                .unwrap_or_else(|| panic!("missing prototype for {kind}::{name}"));
            check_prototype(proto, callable.as_ref())
                .unwrap_or_else(|e| panic!("{kind}::{name}: {e}"));
        }
    }

    #[test]
    fn every_declared_builtin_is_registered() {
        let registry = Registry::new().unwrap();
        for (kind, proto) in builtin::lookup().entries() {
            assert!(
                registry.get(kind, proto.name).is_some(),
                "{kind}::{} unregistered",
                proto.name
            );
        }
    }

    #[test]
    fn signature_accepts_counts() {
        let sig = Signature::with_variadic(&[Kind::String], Kind::String);
        assert!(!sig.accepts(0));
        assert!(sig.accepts(1));
        assert!(sig.accepts(5));
        let fixed = Signature::new(&[Kind::String, Kind::Int]);
        assert!(fixed.accepts(2));
        assert!(!fixed.accepts(3));
    }
}
