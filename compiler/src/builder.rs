use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::debug;
use urpc_schema::Schema;

use crate::{
    error::{Location, UrpcError},
    parser::parse_schema,
    tokenizer::tokenize_schema,
    types::SchemaFile,
    verifier::verify_schema,
    vfs::FileSystem,
};

/// A parsed file together with its absolute path.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub ast:  SchemaFile,
}

/// Resolves the import graph of an entry file and turns it into a
/// [`Schema`].
///
/// Files are loaded depth-first in import order; the resulting file list
/// (entry first) is the merge order of declarations.
pub struct Builder<'fs> {
    fs:     &'fs FileSystem,
    files:  Vec<SourceFile>,
    loaded: HashSet<PathBuf>,
    stack:  Vec<PathBuf>,
    errors: Vec<UrpcError>,
}

impl<'fs> Builder<'fs> {
    pub fn new(fs: &'fs FileSystem) -> Self {
        Builder {
            fs,
            files:  Vec::new(),
            loaded: HashSet::new(),
            stack:  Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn build(mut self, entry: impl AsRef<Path>) -> Result<Schema, UrpcError> {
        let entry = self.fs.resolve("", entry);
        debug!(entry = %entry.display(), "building schema");

        self.load(entry, None);

        if let Some(err) = UrpcError::from_many(std::mem::take(&mut self.errors)) {
            debug!(errors = err.diagnostics().len(), "import resolution failed");
            return Err(err);
        }

        debug!(files = self.files.len(), "imports resolved");
        verify_schema(&self.files)
    }

    /// Loads and parses every file reachable from `entry` without verifying
    /// declarations.
    pub fn resolve_files(mut self, entry: impl AsRef<Path>) -> Result<Vec<SourceFile>, UrpcError> {
        let entry = self.fs.resolve("", entry);
        self.load(entry, None);
        match UrpcError::from_many(self.errors) {
            Some(err) => Err(err),
            None => Ok(self.files),
        }
    }

    fn load(&mut self, path: PathBuf, imported_at: Option<Location>) {
        if let Some(pos) = self.stack.iter().position(|p| *p == path) {
            let mut cycle: Vec<PathBuf> = self.stack[pos..].to_vec();
            cycle.push(path.clone());
            let location = imported_at.unwrap_or_else(|| Location::new(&path, 1, 1));
            self.errors.push(UrpcError::ImportCycle { cycle, location });
            return;
        }
        if !self.loaded.insert(path.clone()) {
            return;
        }

        let text = match self.fs.read_to_string(&path) {
            Ok(text) => text,
            Err(source) => {
                self.errors.push(UrpcError::Io { path, imported_at, source });
                return;
            }
        };
        debug!(path = %path.display(), "parsing");

        let ast = match tokenize_schema(&text).and_then(|tokens| parse_schema(&tokens)) {
            Ok(ast) => ast,
            Err(err) => {
                self.errors.push(err.in_file(&path));
                return;
            }
        };

        let imports: Vec<(String, Location)> = ast
            .imports
            .iter()
            .map(|i| (i.path.clone(), Location::new(&path, i.span.start.line, i.span.start.column)))
            .collect();

        self.files.push(SourceFile { path: path.clone(), ast });

        self.stack.push(path.clone());
        for (import, location) in imports {
            let target = self.fs.resolve(&path, &import);
            self.load(target, Some(location));
        }
        self.stack.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_fs(files: &[(&str, &str)]) -> FileSystem {
        let fs = FileSystem::new();
        for (path, text) in files {
            fs.write_file_cache(path, *text);
        }
        fs
    }

    #[test]
    fn test_depth_first_pre_order() {
        let fs = memory_fs(&[
            ("/p/main.urpc", "import \"a.urpc\"\nimport \"b.urpc\"\ntype Main { x: int }"),
            ("/p/a.urpc", "import \"c.urpc\"\ntype A { x: int }"),
            ("/p/b.urpc", "import \"c.urpc\"\ntype B { x: int }"),
            ("/p/c.urpc", "type C { x: int }"),
        ]);
        let files = Builder::new(&fs).resolve_files("/p/main.urpc").unwrap();
        let order: Vec<&Path> = files.iter().map(|f| f.path.as_path()).collect();
        assert_eq!(
            order,
            vec![
                Path::new("/p/main.urpc"),
                Path::new("/p/a.urpc"),
                Path::new("/p/c.urpc"),
                Path::new("/p/b.urpc"),
            ]
        );
    }

    #[test]
    fn test_import_cycle() {
        let fs = memory_fs(&[
            ("/p/a.urpc", "import \"b.urpc\"\ntype A { x: int }"),
            ("/p/b.urpc", "import \"a.urpc\"\ntype B { x: int }"),
        ]);
        match Builder::new(&fs).build("/p/a.urpc") {
            Err(UrpcError::ImportCycle { cycle, location }) => {
                assert_eq!(
                    cycle,
                    vec![PathBuf::from("/p/a.urpc"), PathBuf::from("/p/b.urpc"), PathBuf::from("/p/a.urpc")]
                );
                assert_eq!(location.file, Some(PathBuf::from("/p/b.urpc")));
                assert_eq!(location.line, 1);
            }
            other => panic!("expected an import cycle but got {:?}", other),
        }
    }

    #[test]
    fn test_missing_import() {
        let fs = memory_fs(&[("/p/main.urpc", "type A { x: int }\nimport \"nope/missing.urpc\"")]);
        match Builder::new(&fs).build("/p/main.urpc") {
            Err(UrpcError::Io { path, imported_at, .. }) => {
                assert_eq!(path, PathBuf::from("/p/nope/missing.urpc"));
                assert_eq!(imported_at.map(|l| l.line), Some(2));
            }
            other => panic!("expected an I/O error but got {:?}", other),
        }
    }

    #[test]
    fn test_resolution_errors_are_collected() {
        let fs = memory_fs(&[
            ("/p/main.urpc", "import \"bad1.urpc\"\nimport \"bad2.urpc\""),
            ("/p/bad1.urpc", "type {"),
            ("/p/bad2.urpc", "type A { x: int @ }"),
        ]);
        let err = Builder::new(&fs).build("/p/main.urpc").unwrap_err();
        let all = err.diagnostics();
        assert_eq!(all.len(), 2);
        assert!(matches!(all[0], UrpcError::ParseError { .. }));
        assert!(matches!(all[1], UrpcError::LexError { .. }));
        assert!(err.to_string().contains("/p/bad1.urpc:1:6"), "{}", err);
    }
}
