use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Syntax error on line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("Log version not specified")]
    MissingVersion,

    #[error("Unsupported log version: {version}")]
    UnsupportedVersion { version: String },
}

impl ParseError {
    pub fn syntax(line: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            line,
            message: message.into(),
        }
    }
}

pub type ParseResult<T> = Result<T, ParseError>;
