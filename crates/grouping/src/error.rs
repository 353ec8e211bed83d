use std::fmt;

#[derive(Debug)]
pub enum GroupingError {
    /// TOML parse / deserialization error.
    ConfigParse(String),
    /// Config validation error (empty pipeline, rule-less strategy, etc.).
    ConfigValidation(String),
    /// Missing required column in user input.
    MissingColumn { column: String },
    /// Two input rows share the same identity.
    DuplicateUser { id: String },
    /// IO error (file read/write, CSV decoding).
    Io(String),
    /// Persistence sink rejected a group.
    Sink(String),
}

impl fmt::Display for GroupingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigParse(msg) => write!(f, "config parse error: {msg}"),
            Self::ConfigValidation(msg) => write!(f, "config validation error: {msg}"),
            Self::MissingColumn { column } => write!(f, "user input: missing column '{column}'"),
            Self::DuplicateUser { id } => write!(f, "user input: duplicate user id '{id}'"),
            Self::Io(msg) => write!(f, "IO error: {msg}"),
            Self::Sink(msg) => write!(f, "persistence error: {msg}"),
        }
    }
}

impl std::error::Error for GroupingError {}
