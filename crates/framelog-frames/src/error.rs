use thiserror::Error;

/// Boxed error from the message stream feeding the extractor
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A tag handler could not decode its scalar
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TagError(pub String);

impl TagError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// A document was syntactically valid YAML but could not be built
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComposeError {
    #[error("no handler registered for tag {0}")]
    UnknownTag(String),

    #[error("cannot decode {tag} value {value:?}: {source}")]
    Tag {
        tag: String,
        value: String,
        #[source]
        source: TagError,
    },

    #[error("alias refers to unknown anchor {0}")]
    UnknownAnchor(usize),

    #[error("unbalanced {0} event")]
    Unbalanced(&'static str),
}

/// Errors surfaced by the frame extractor
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The YAML scanner or parser rejected the input
    #[error("malformed document: {0}")]
    Syntax(#[from] yaml_rust2::scanner::ScanError),

    /// The document parsed but a tagged value could not be built
    #[error("malformed document: {0}")]
    Compose(#[from] ComposeError),

    /// The message stream itself failed
    #[error("message stream failed: {0}")]
    Source(#[source] BoxError),
}

impl ExtractError {
    /// Whether persistent mode may skip past this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Source(_))
    }
}
