use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::naming::Convention;

/// Where a diagnostic points: a file (when known) and a 1-based line/column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file:   Option<PathBuf>,
    pub line:   usize,
    pub column: usize,
}

impl Location {
    pub fn new(file: &Path, line: usize, column: usize) -> Self {
        Location { file: Some(file.to_path_buf()), line, column }
    }

    pub fn at(line: usize, column: usize) -> Self {
        Location { file: None, line, column }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}:{}:{}", file.display(), self.line, self.column),
            None       => write!(f, "{}:{}", self.line, self.column),
        }
    }
}

#[derive(Debug, Error)]
pub enum UrpcError {
    #[error("I/O error reading {}: {source}", .path.display())]
    Io {
        path:        PathBuf,
        imported_at: Option<Location>,
        #[source]
        source:      std::io::Error,
    },

    #[error("{location}: lex error: {msg}")]
    LexError {
        msg:      String,
        location: Location,
    },

    #[error("{location}: parse error: expected {expected} but found {found}")]
    ParseError {
        expected: String,
        found:    String,
        location: Location,
    },

    #[error("{location}: import cycle detected: {}", format_cycle(.cycle))]
    ImportCycle {
        cycle:    Vec<PathBuf>,
        location: Location,
    },

    #[error("{second}: {kind} \"{name}\" is already declared at {first}")]
    DuplicateDeclaration {
        name:   String,
        kind:   String,
        first:  Location,
        second: Location,
    },

    #[error("{location}: unknown type \"{name}\"")]
    UnknownType {
        name:     String,
        location: Location,
    },

    #[error("{location}: invalid pattern \"{name}\": {msg}")]
    InvalidPattern {
        name:     String,
        msg:      String,
        location: Location,
    },

    #[error("{location}: {subject} must be in {}", .convention.as_str())]
    InvalidName {
        subject:    String,
        name:       String,
        convention: Convention,
        location:   Location,
    },

    #[error("{location}: spread references undefined type \"{spread}\"")]
    SpreadTypeNotFound {
        spread:   String,
        location: Location,
    },

    #[error("{location}: field \"{field}\" from spread \"{spread}\" conflicts with an existing field in \"{owner}\"")]
    SpreadFieldConflict {
        owner:    String,
        spread:   String,
        field:    String,
        location: Location,
    },

    #[error("{location}: circular spread dependency detected: {}", .cycle.join(" -> "))]
    SpreadCycle {
        cycle:    Vec<String>,
        location: Location,
    },

    #[error("{location}: field \"{field}\" is declared twice in type \"{type_name}\"")]
    DuplicateField {
        type_name: String,
        field:     String,
        location:  Location,
    },

    #[error("{location}: enum member \"{member}\" is declared twice in enum \"{enum_name}\"")]
    DuplicateEnumMember {
        enum_name: String,
        member:    String,
        location:  Location,
    },

    #[error("{location}: enum member \"{member}\" reuses value {value} of \"{other}\" in enum \"{enum_name}\"")]
    DuplicateEnumValue {
        enum_name: String,
        member:    String,
        other:     String,
        value:     String,
        location:  Location,
    },

    #[error("{location}: invalid enum \"{name}\": {msg}")]
    InvalidEnum {
        name:     String,
        msg:      String,
        location: Location,
    },

    #[error("{location}: invalid constant \"{name}\": {msg}")]
    InvalidConstant {
        name:     String,
        msg:      String,
        location: Location,
    },

    #[error("{location}: operation \"{operation}\" is declared twice in rpc \"{rpc}\"")]
    DuplicateOperation {
        rpc:       String,
        operation: String,
        location:  Location,
    },

    #[error("{location}: {rpc}.{operation} must use a type declaration for its {role}, found \"{found}\"")]
    InvalidOperationType {
        rpc:       String,
        operation: String,
        role:      String,
        found:     String,
        location:  Location,
    },

    #[error("{location}: recursive type without an optional field: {}", .cycle.join(" -> "))]
    RecursiveType {
        cycle:    Vec<String>,
        location: Location,
    },

    #[error("{}", format_diagnostics(.0))]
    Diagnostics(Vec<UrpcError>),

    #[error("IR encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl UrpcError {
    /// Fills in the file of a lex/parse error raised before the file was known.
    pub fn in_file(self, path: &Path) -> Self {
        match self {
            UrpcError::LexError { msg, mut location } => {
                location.file.get_or_insert_with(|| path.to_path_buf());
                UrpcError::LexError { msg, location }
            }
            UrpcError::ParseError { expected, found, mut location } => {
                location.file.get_or_insert_with(|| path.to_path_buf());
                UrpcError::ParseError { expected, found, location }
            }
            other => other,
        }
    }

    /// Stable diagnostic code, e.g. `E202` for a spread of an unknown type.
    pub fn code(&self) -> Option<&'static str> {
        Some(match self {
            UrpcError::Io { .. }                  => "E001",
            UrpcError::ImportCycle { .. }         => "E002",
            UrpcError::LexError { .. }            => "E005",
            UrpcError::ParseError { .. }          => "E005",
            UrpcError::InvalidName { convention, subject, .. } => match convention {
                Convention::PascalCase if subject.starts_with("enum member") => "E104",
                Convention::PascalCase     => "E101",
                Convention::CamelCase      => "E102",
                Convention::UpperSnakeCase => "E103",
            },
            UrpcError::UnknownType { .. }         => "E201",
            UrpcError::SpreadTypeNotFound { .. }  => "E202",
            UrpcError::SpreadFieldConflict { .. } => "E203",
            UrpcError::SpreadCycle { .. }         => "E204",
            UrpcError::InvalidEnum { msg, .. } if msg.contains("explicit values") => "E302",
            UrpcError::InvalidEnum { .. }         => "E301",
            UrpcError::DuplicateEnumValue { .. }  => "E303",
            UrpcError::DuplicateEnumMember { .. } => "E304",
            UrpcError::InvalidPattern { .. }      => "E401",
            UrpcError::DuplicateOperation { .. }  => "E501",
            UrpcError::RecursiveType { .. }       => "E601",
            UrpcError::DuplicateField { .. }      => "E703",
            UrpcError::DuplicateDeclaration { kind, .. } => match kind.as_str() {
                "type"    => "E801",
                "enum"    => "E802",
                "const"   => "E803",
                "pattern" => "E804",
                _ => return None,
            },
            _ => return None,
        })
    }

    /// All individual errors, flattening `Diagnostics`.
    pub fn diagnostics(&self) -> Vec<&UrpcError> {
        match self {
            UrpcError::Diagnostics(all) => all.iter().flat_map(|e| e.diagnostics()).collect(),
            single => vec![single],
        }
    }

    /// Collapses a list of errors: one error stays itself, several become
    /// `Diagnostics`.
    pub fn from_many(mut errors: Vec<UrpcError>) -> Option<UrpcError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(UrpcError::Diagnostics(errors)),
        }
    }
}

fn format_cycle(cycle: &[PathBuf]) -> String {
    cycle
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn format_diagnostics(errors: &[UrpcError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}
