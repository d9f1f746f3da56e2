//! Error types.
//!
//! Only `ImageError` is fatal to a session. Everything else is recoverable at
//! the granularity of one constant, one layout, or one object, and callers
//! decide how much of it to tolerate.

use thiserror::Error;

/// Failure to load a debug-info image. These end the session.
#[derive(Error, Debug)]
pub enum ImageError {
    #[error("can't read image: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a usable object file: {0}")]
    Object(#[from] object::Error),

    #[error("malformed DWARF: {0}")]
    Dwarf(#[from] gimli::Error),

    #[error("image has no {0} section")]
    MissingSection(&'static str),

    #[error("image is inconsistent: {0}")]
    Inconsistent(String),
}

/// A type or constant is absent from the debug info.
///
/// This is the `NotFound` result of every lookup; it is never fatal by
/// itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("not found in debug info: {0}")]
pub struct MissingDebugInfo(pub String);

/// Failure to compile or evaluate a layout.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error(transparent)]
    Missing(#[from] MissingDebugInfo),

    #[error("layout {layout} has no field named {field}")]
    UnknownField { layout: String, field: String },

    #[error("field {field} of {layout} is not readable as {wanted}")]
    WrongKind {
        layout: String,
        field: String,
        wanted: &'static str,
    },

    #[error("index {index} out of bounds for {field} (length {length})")]
    OutOfBounds {
        field: String,
        index: u64,
        length: u64,
    },

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error("unusable configuration: {0}")]
    Config(String),
}

/// Per-object failures while decoding target memory.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ObjectError {
    #[error("memory unavailable at {addr:#x} (+{len})")]
    MemoryUnavailable { addr: u64, len: u64 },

    #[error("corrupt object at {addr:#x}: {reason}")]
    CorruptObject { addr: u64, reason: String },

    #[error("object at {addr:#x} has instance type {instance_type} with no decoder")]
    UnknownInstanceType { addr: u64, instance_type: u16 },

    #[error("word {word:#x} is not a heap reference")]
    NotAReference { word: u64 },
}

impl ObjectError {
    /// Short stable name for summaries.
    pub fn reason_name(&self) -> &'static str {
        match self {
            Self::MemoryUnavailable { .. } => "memory unavailable",
            Self::CorruptObject { .. } => "corrupt object",
            Self::UnknownInstanceType { .. } => "unknown instance type",
            Self::NotAReference { .. } => "not a reference",
        }
    }
}

impl LayoutError {
    /// Attributes a layout failure to the object at `addr`. Failures that
    /// aren't about memory mean the object doesn't fit its layout.
    pub fn at(self, addr: u64) -> ObjectError {
        match self {
            LayoutError::Object(o) => o,
            other => ObjectError::CorruptObject {
                addr,
                reason: other.to_string(),
            },
        }
    }
}

/// Failure of a whole traversal. Only produced under the abort policy, or when
/// a root provider cannot enumerate its roots at all.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("traversal aborted: {0}")]
    Aborted(#[source] ObjectError),

    #[error("root category {category} unavailable: {source}")]
    Roots {
        category: String,
        #[source]
        source: ObjectError,
    },

    #[error("can't write snapshot: {0}")]
    Write(#[from] std::io::Error),

    #[error("can't encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failure to load session configuration or a roots file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("can't read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("can't parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("bad base allow-list pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("bad address {text:?} in roots file: {reason}")]
    Address { text: String, reason: String },

    #[error("bad value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
