use thiserror::Error;

/// Missing or unusable document structure. Aborts the whole run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("document has no comment blocks")]
    MissingComments,
    #[error("document has no UsingTask element")]
    MissingUsingTask,
    #[error("document has no Target element")]
    MissingTarget,
    #[error("{element} element is missing the '{attribute}' attribute")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },
    #[error("primary UsingTask '{0}' has no Code element")]
    MissingCode(String),
    #[error("task '{0}' is declared more than once")]
    DuplicateTask(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("symbol {symbol:?} at offset {offset} is not in the substitution alphabet")]
    InvalidSymbol { symbol: char, offset: usize },
    #[error("invalid hex string: {0}")]
    InvalidHex(String),
    #[error("xor key is empty")]
    EmptyKey,
    #[error("task '{0}' has encrypted parameters but no 32-character key")]
    MissingKey(String),
    #[error("task '{task}' has {count} candidate 32-character keys")]
    AmbiguousKey { task: String, count: usize },
}

impl From<hex::FromHexError> for CipherError {
    fn from(e: hex::FromHexError) -> Self {
        CipherError::InvalidHex(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("blob splits into {colon_parts} ':' parts and {hash_parts} '#' parts")]
    Shape {
        colon_parts: usize,
        hash_parts: usize,
    },
    #[error("invalid substitution key {0:?}")]
    InvalidKey(String),
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error("base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("declared path is not valid UTF-8")]
    PathNotUtf8,
    #[error("not a .NET module: {0}")]
    Metadata(String),
}
