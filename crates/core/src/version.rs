//! Optimistic concurrency expectations and position assignment.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EventStoreError, EventStoreResult};
use crate::stream::Stream;

/// Expectation about a stream's last position at write time.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedVersion {
    /// Skip version checking entirely.
    #[default]
    Any,
    /// Resolve to whatever the stream's last position currently is.
    Auto,
    /// The stream must not exist yet (`none`).
    NoStream,
    /// The stream's last position must equal this value.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn none() -> Self {
        Self::NoStream
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// Resolve the expectation for `stream`.
    ///
    /// Returns the position the stream is expected to end at before the write, or `None`
    /// when the stream is expected to be empty. `last_position` is only invoked for
    /// `Auto`. `Any` never resolves to a position; callers check [`is_any`] first and
    /// skip the version constraint.
    ///
    /// The global stream only accepts `Any`.
    ///
    /// [`is_any`]: ExpectedVersion::is_any
    pub fn resolve_for<F>(&self, stream: &Stream, last_position: F) -> EventStoreResult<Option<u64>>
    where
        F: FnOnce(&Stream) -> EventStoreResult<Option<u64>>,
    {
        if stream.is_global() && !self.is_any() {
            return Err(EventStoreError::InvalidExpectedVersion(format!(
                "{self} is not allowed for the global stream"
            )));
        }
        match self {
            Self::Any | Self::NoStream => Ok(None),
            Self::Auto => last_position(stream),
            Self::Exact(version) => Ok(Some(*version)),
        }
    }
}

/// Position of the `index`-th record of a batch written after `resolved`.
pub fn compute_position(resolved: Option<u64>, index: usize) -> u64 {
    match resolved {
        Some(last) => last + index as u64 + 1,
        None => index as u64,
    }
}

impl fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::Auto => f.write_str("auto"),
            Self::NoStream => f.write_str("none"),
            Self::Exact(version) => write!(f, "{version}"),
        }
    }
}

impl From<u64> for ExpectedVersion {
    fn from(value: u64) -> Self {
        Self::Exact(value)
    }
}

impl TryFrom<i64> for ExpectedVersion {
    type Error = EventStoreError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u64::try_from(value)
            .map(Self::Exact)
            .map_err(|_| EventStoreError::InvalidExpectedVersion(value.to_string()))
    }
}
