use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("pattern \"{pattern}\" expects {expected} argument(s) but got {got}")]
    ArgumentCount {
        pattern:  String,
        expected: usize,
        got:      usize,
    },

    #[error("pattern \"{pattern}\" has no value for placeholder \"{placeholder}\"")]
    MissingValue {
        pattern:     String,
        placeholder: String,
    },
}
