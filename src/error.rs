use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JSONError(#[from] serde_json::Error),
    #[error("invalid regular expression: {0}")]
    RegexError(#[from] regex::Error),
    #[error("failed to parse mail: {0}")]
    MailParseError(#[from] mailparse::MailParseError),
    #[cfg(feature = "standalone")]
    #[error("failed to read configuration file: {0}")]
    IniError(#[from] ini::Error),
    /// Raw input is not a well-formed RFC 5322 message
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("cannot parse {0:?} as a time")]
    InvalidDate(String),
    #[error("invalid media type {0:?}")]
    InvalidMediaType(String),
    #[error("{0}")]
    UnsupportedValue(String),
    #[error("{0}")]
    RegexUncompiled(String),
    #[error("script {0} failed: {1}")]
    ScriptError(String, String),
    #[error("{0}")]
    ConfigError(String),
    #[error("{0}")]
    ProcessorError(String),
    #[error("processor panicked: {0}")]
    Panicked(String),
    /// The processor took responsibility for the message and then failed.
    /// The pipeline must stop instead of handing the message on.
    #[error("{0}")]
    Consumed(Box<Error>),
}

pub type Result<T> = std::result::Result<T, Error>;
