//! urpc-compiler
//!
//! This crate implements:
//!  1) A tokenizer + parser for `.urpc` schema files,
//!  2) A virtual file system that overlays unsaved buffers on the disk,
//!  3) Import resolution and merging (`Builder`),
//!  4) Validation and lowering to the `urpc_schema` IR (`verify_schema`),
//!  5) The pattern template compiler, and the `UrpcError` diagnostics type.

pub mod error;
pub mod types;
pub mod utils;
pub mod tokenizer;
pub mod doc;
pub mod parser;
pub mod vfs;
pub mod pattern;
pub mod naming;
pub mod builder;
pub mod verifier;
pub mod compiler;

pub use builder::Builder;
pub use compiler::{compile_file, compile_schema, parse_file};
pub use error::{Location, UrpcError};
pub use vfs::FileSystem;
