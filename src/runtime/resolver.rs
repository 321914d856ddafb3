use crate::language::ast::ImportDecl;
use crate::runtime::context::Context;
use crate::runtime::error::{EvalError, EvalResult};
use crate::runtime::value::Filesystem;
use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// A rooted filesystem view used to open module sources. `NotExist` must be
/// distinguishable so imports can report missing paths precisely.
pub trait Directory {
    fn open(&self, filename: &str) -> Result<Box<dyn Read>, DirectoryError>;

    /// A stable description of the directory root, used in diagnostics and
    /// for import-cycle detection.
    fn locate(&self) -> String;
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("`{0}` does not exist")]
    NotExist(String),
    #[error("{0}")]
    Io(String),
}

impl DirectoryError {
    pub fn is_not_exist(&self) -> bool {
        matches!(self, DirectoryError::NotExist(_))
    }
}

/// Resolves an import whose expression evaluated to a filesystem into a
/// directory the importer can open files from. The network-backed
/// implementation lives outside the core.
pub trait Resolver {
    fn resolve(
        &self,
        ctx: &Context,
        import: &ImportDecl,
        fs: &Filesystem,
    ) -> EvalResult<Arc<dyn Directory>>;
}

/// A resolver for callers that only use string-path imports.
pub struct NoResolver;

impl Resolver for NoResolver {
    fn resolve(
        &self,
        _ctx: &Context,
        import: &ImportDecl,
        _fs: &Filesystem,
    ) -> EvalResult<Arc<dyn Directory>> {
        Err(EvalError::internal(format!(
            "no resolver configured for filesystem import `{}`",
            import.name.text
        )))
    }
}

/// A directory rooted at a local path.
pub struct OsDirectory {
    root: PathBuf,
}

impl OsDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Directory for OsDirectory {
    fn open(&self, filename: &str) -> Result<Box<dyn Read>, DirectoryError> {
        let path = self.root.join(filename);
        match std::fs::File::open(&path) {
            Ok(file) => Ok(Box::new(file)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(DirectoryError::NotExist(path.display().to_string()))
            }
            Err(err) => Err(DirectoryError::Io(format!(
                "failed to open {}: {}",
                path.display(),
                err
            ))),
        }
    }

    fn locate(&self) -> String {
        self.root.display().to_string()
    }
}

/// An in-memory directory, used by tests and by embedders that synthesise
/// modules.
#[derive(Default)]
pub struct MemDirectory {
    name: String,
    files: HashMap<String, String>,
}

impl MemDirectory {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            files: HashMap::new(),
        }
    }

    pub fn insert(mut self, filename: impl Into<String>, source: impl Into<String>) -> Self {
        self.files.insert(filename.into(), source.into());
        self
    }
}

impl Directory for MemDirectory {
    fn open(&self, filename: &str) -> Result<Box<dyn Read>, DirectoryError> {
        let filename = filename.strip_prefix("./").unwrap_or(filename);
        match self.files.get(filename) {
            Some(source) => Ok(Box::new(std::io::Cursor::new(source.clone().into_bytes()))),
            None => Err(DirectoryError::NotExist(filename.to_string())),
        }
    }

    fn locate(&self) -> String {
        format!("mem:{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn mem_directory_distinguishes_not_exist() {
        let dir = MemDirectory::new("t").insert("a.hlb", "fs a() { scratch; }\n");
        assert!(dir.open("a.hlb").is_ok());
        assert!(match dir.open("b.hlb") {
            Err(e) => e.is_not_exist(),
            Ok(_) => false,
        });
    }

    #[test]
    fn os_directory_opens_relative_files() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("m.hlb");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"fs m() { scratch; }\n").unwrap();

        let dir = OsDirectory::new(tmp.path());
        let mut out = String::new();
        dir.open("m.hlb").unwrap().read_to_string(&mut out).unwrap();
        assert!(out.contains("scratch"));
        assert!(match dir.open("missing.hlb") {
            Err(e) => e.is_not_exist(),
            Ok(_) => false,
        });
    }
}
