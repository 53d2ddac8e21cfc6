use std::path::Path;

use urpc_schema::Schema;

use crate::{
    builder::Builder,
    error::UrpcError,
    parser::parse_schema,
    tokenizer::tokenize_schema,
    types::SchemaFile,
    vfs::FileSystem,
};

/// Name of the in-memory entry file used by [`compile_schema`].
pub const INLINE_SCHEMA_NAME: &str = "schema.urpc";

/// Tokenize and parse a single schema text without resolving imports.
pub fn parse_file(text: &str) -> Result<SchemaFile, UrpcError> {
    let tokens = tokenize_schema(text)?;
    parse_schema(&tokens)
}

/// Compile the schema rooted at `path`, reading files through `fs`.
pub fn compile_file(fs: &FileSystem, path: impl AsRef<Path>) -> Result<Schema, UrpcError> {
    Builder::new(fs).build(path)
}

/// Compile a schema given as text. Relative imports resolve against the
/// working directory.
pub fn compile_schema(text: &str) -> Result<Schema, UrpcError> {
    let fs = FileSystem::new();
    let entry = fs.resolve("", INLINE_SCHEMA_NAME);
    fs.write_file_cache(&entry, text);
    compile_file(&fs, &entry)
}
