//! Error types for pail operations

use std::error::Error;
use std::fmt;

use cid::Cid as IpldCid;

/// Boxed error type for error sources
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Result type alias for pail operations
pub type Result<T> = std::result::Result<T, PailError>;

/// Pail operation error with rich diagnostics
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub struct PailError {
    kind: PailErrorKind,
    #[source]
    source: Option<BoxError>,
    #[help]
    help: Option<String>,
    context: Option<String>,
}

/// Error categories for pail operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PailErrorKind {
    /// Block fetcher failed
    Storage,
    /// A block reachable from a root or head is not available
    MissingBlock,
    /// Block bytes do not decode to the expected structure
    MalformedBlock,
    /// A shard could not be split to fit under the size limit
    ShardLimitReached,
    /// Clock heads do not share a causal history
    NoCommonAncestor,
    /// Operation needs at least one head event
    HeadlessClock,
    /// Event carries an operation type this version does not know
    UnknownEventType,
    /// Key is not representable in the shard key alphabet
    InvalidKey,
    /// Encoding a block failed
    Serialization,
}

impl PailError {
    /// Create a new error with the given kind and optional source
    pub fn new(kind: PailErrorKind, source: Option<BoxError>) -> Self {
        Self {
            kind,
            source,
            help: None,
            context: None,
        }
    }

    /// Add a help message to the error
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Add context information to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> &PailErrorKind {
        &self.kind
    }

    /// Create a storage error
    pub fn storage(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(PailErrorKind::Storage, Some(Box::new(source)))
    }

    /// Create a missing block error
    pub fn missing_block(what: &str, cid: &IpldCid) -> Self {
        Self::new(PailErrorKind::MissingBlock, None)
            .with_context(format!("{} not found: {}", what, cid))
            .with_help("every block reachable from a root or head must be retrievable")
    }

    /// Create a malformed block error
    pub fn malformed(msg: impl Into<String>) -> Self {
        let msg: String = msg.into();
        Self::new(PailErrorKind::MalformedBlock, Some(msg.into()))
    }

    /// Create a malformed block error from a decode failure
    pub fn decode(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(PailErrorKind::MalformedBlock, Some(Box::new(source)))
    }

    /// Create a serialization error
    pub fn serialization(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(PailErrorKind::Serialization, Some(Box::new(source)))
    }

    /// Create an invalid key error
    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::new(PailErrorKind::InvalidKey, None)
            .with_help("keys must be non-empty printable ASCII (0x20..=0x7e)")
            .with_context(format!("key: {:?}", key.into()))
    }
}

impl fmt::Display for PailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;

        if let Some(ctx) = &self.context {
            write!(f, ": {}", ctx)?;
        }

        if let Some(src) = &self.source {
            write!(f, ": {}", src)?;
        }

        Ok(())
    }
}

// Internal granular errors

/// Shard-specific errors
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum ShardError {
    /// Empty key not allowed
    #[error("Empty key not allowed")]
    EmptyKey,

    /// Key contains characters outside the shard alphabet
    #[error("Invalid key characters: {key:?}")]
    InvalidKeyChars {
        /// The invalid key
        key: String,
    },

    /// Shard version not understood by this implementation
    #[error("Unsupported shard version: {0}")]
    UnsupportedVersion(u64),

    /// Entry value is not one of value, link or link+value
    #[error("Invalid entry value for key {key:?}")]
    InvalidEntry {
        /// Key of the offending entry
        key: String,
    },

    /// An ancestor entry on a traversal path is not a shard link
    #[error("{key:?} is not a shard link in: {cid}")]
    NotALink {
        /// Key expected to carry a link
        key: String,
        /// Shard containing the entry
        cid: IpldCid,
    },

    /// Split prefix is already occupied by a shard link
    #[error("expected {prefix:?} to be a shard value but found a shard link")]
    #[diagnostic(help("entries sharing a linked prefix belong inside that shard"))]
    PrefixIsLink {
        /// The split prefix
        prefix: String,
    },

    /// No common prefix is available to split an oversized shard
    #[error("Shard limit reached: {size} bytes (max {max})")]
    #[diagnostic(help("no entries in the shard share a prefix that could be split out"))]
    LimitReached {
        /// Encoded shard size
        size: usize,
        /// Configured maximum
        max: usize,
    },
}

impl From<ShardError> for PailError {
    fn from(e: ShardError) -> Self {
        match e {
            ShardError::EmptyKey => PailError::invalid_key(""),
            ShardError::InvalidKeyChars { key } => PailError::invalid_key(key),
            ShardError::UnsupportedVersion(_) | ShardError::InvalidEntry { .. } => {
                PailError::new(PailErrorKind::MalformedBlock, Some(Box::new(e)))
            }
            ShardError::NotALink { .. } | ShardError::PrefixIsLink { .. } => {
                PailError::new(PailErrorKind::MalformedBlock, Some(Box::new(e)))
                    .with_help("shard structure is inconsistent with its parent links")
            }
            ShardError::LimitReached { .. } => {
                PailError::new(PailErrorKind::ShardLimitReached, Some(Box::new(e)))
            }
        }
    }
}

/// Merkle clock errors
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum ClockError {
    /// Operation requires a non-empty head
    #[error("cannot determine root of headless clock")]
    #[diagnostic(code(clock::headless))]
    Headless,

    /// Heads do not share an ancestor
    #[error("failed to find common ancestor event")]
    #[diagnostic(
        code(clock::no_common_ancestor),
        help("all heads must descend from a single causal history")
    )]
    NoCommonAncestor,

    /// Event type is not put or del
    #[error("unknown event type: {0}")]
    #[diagnostic(code(clock::unknown_event_type))]
    UnknownEventType(String),

    /// A put event without a value
    #[error("put event for {key:?} has no value")]
    #[diagnostic(code(clock::missing_value))]
    MissingValue {
        /// Key of the event
        key: String,
    },
}

impl From<ClockError> for PailError {
    fn from(e: ClockError) -> Self {
        let kind = match &e {
            ClockError::Headless => PailErrorKind::HeadlessClock,
            ClockError::NoCommonAncestor => PailErrorKind::NoCommonAncestor,
            ClockError::UnknownEventType(_) => PailErrorKind::UnknownEventType,
            ClockError::MissingValue { .. } => PailErrorKind::MalformedBlock,
        };
        PailError::new(kind, Some(Box::new(e)))
    }
}
