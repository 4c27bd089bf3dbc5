use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Slash-delimited location in the task tree, e.g. `/contexts/ctx-1/bench`.
///
/// Always absolute and canonical: no empty segments, no trailing slash, the root is `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskTreeAddress(String);

impl TaskTreeAddress {
    pub const SEPARATOR: char = '/';

    pub fn root() -> Self {
        Self("/".to_string())
    }

    pub fn parse(raw: &str) -> Result<Self, ModelError> {
        if raw == "/" {
            return Ok(Self::root());
        }
        let Some(rest) = raw.strip_prefix(Self::SEPARATOR) else {
            return Err(ModelError::MalformedAddress(raw.to_string()));
        };
        if rest.split(Self::SEPARATOR).any(|s| Self::validate_segment(s).is_err()) {
            return Err(ModelError::MalformedAddress(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    /// Build an address from individual segments.
    pub fn from_segments<I, S>(segments: I) -> Result<Self, ModelError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        segments
            .into_iter()
            .try_fold(Self::root(), |addr, s| addr.child(s.as_ref()))
    }

    /// A segment is non-empty, contains no separator and is not `.` or `..`.
    pub fn validate_segment(segment: &str) -> Result<(), ModelError> {
        if segment.is_empty()
            || segment.contains(Self::SEPARATOR)
            || segment == "."
            || segment == ".."
        {
            return Err(ModelError::InvalidSegment(segment.to_string()));
        }
        Ok(())
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(Self::SEPARATOR).filter(|s| !s.is_empty())
    }

    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// Last segment; `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.segments().last()
    }

    pub fn parent(&self) -> Option<TaskTreeAddress> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind(Self::SEPARATOR) {
            Some(0) | None => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
        }
    }

    pub fn child(&self, name: &str) -> Result<TaskTreeAddress, ModelError> {
        Self::validate_segment(name)?;
        if self.is_root() {
            Ok(Self(format!("/{name}")))
        } else {
            Ok(Self(format!("{}/{name}", self.0)))
        }
    }

    /// Ancestors from the root down to the parent, excluding `self`.
    pub fn ancestors(&self) -> Vec<TaskTreeAddress> {
        let mut out = Vec::with_capacity(self.depth());
        let mut cur = self.parent();
        while let Some(a) = cur {
            cur = a.parent();
            out.push(a);
        }
        out.reverse();
        out
    }
}

impl fmt::Display for TaskTreeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TaskTreeAddress {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TaskTreeAddress> for String {
    fn from(a: TaskTreeAddress) -> Self {
        a.0
    }
}
