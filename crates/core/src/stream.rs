//! Stream identity.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EventStoreError, EventStoreResult};

/// Name reserved for the implicit stream that receives every persisted event.
pub const GLOBAL_STREAM_NAME: &str = "all";

/// Target of an append, link or read.
///
/// Named streams are validated on construction, so a `Stream` value can never carry an
/// empty name or the reserved global name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Stream {
    Global,
    Named(String),
}

impl Stream {
    /// A named stream.
    ///
    /// Fails with `IncorrectStreamData` for an empty name and `ReservedInternalName` for
    /// the global stream's name.
    pub fn new(name: impl Into<String>) -> EventStoreResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(EventStoreError::IncorrectStreamData);
        }
        if name == GLOBAL_STREAM_NAME {
            return Err(EventStoreError::ReservedInternalName(name));
        }
        Ok(Self::Named(name))
    }

    pub fn global() -> Self {
        Self::Global
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Self::Global)
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Global => GLOBAL_STREAM_NAME,
            Self::Named(name) => name,
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<Stream> for String {
    fn from(value: Stream) -> Self {
        value.name().to_string()
    }
}

/// Parses a stream as it appears on the wire, where `"all"` means the global stream.
impl TryFrom<String> for Stream {
    type Error = EventStoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == GLOBAL_STREAM_NAME {
            Ok(Self::Global)
        } else {
            Self::new(value)
        }
    }
}
