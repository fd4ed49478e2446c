//! Addressing of nodes inside a value graph.
//!
//! A path is a sequence of segments from the root. Its string form joins the
//! segments with `.`; a literal `.` or `\` inside a segment is escaped with `\`.
//! The root path renders as the empty string. An empty segment renders as
//! [`EMPTY_SEGMENT`], so no other path renders the same as the root.

use std::fmt;

/// Rendering of a zero-length segment.
pub const EMPTY_SEGMENT: &str = "\\_";

/// Location of a node within a value graph.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path(Vec<String>);

impl Path {
    /// The root path.
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    /// Build a path from segments.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Parse the dotted string form.
    pub fn parse(s: &str) -> Self {
        if s.is_empty() {
            return Self::root();
        }

        let mut segments = Vec::new();
        let mut current = String::new();
        let mut chars = s.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    // Marks an empty segment; contributes no characters.
                    Some('_') | None => {}
                    Some(escaped) => current.push(escaped),
                },
                '.' => segments.push(std::mem::take(&mut current)),
                other => current.push(other),
            }
        }
        segments.push(current);
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a segment in place.
    pub fn push(&mut self, segment: impl Into<String>) {
        self.0.push(segment.into());
    }

    /// Remove the last segment in place.
    pub fn pop(&mut self) -> Option<String> {
        self.0.pop()
    }

    /// A new path one level deeper.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.push(segment);
        next
    }

    /// True if `self` is a proper prefix of `other`.
    pub fn is_strict_ancestor_of(&self, other: &Path) -> bool {
        self.0.len() < other.0.len() && other.0.starts_with(&self.0)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            if segment.is_empty() {
                f.write_str(EMPTY_SEGMENT)?;
                continue;
            }
            for c in segment.chars() {
                if c == '.' || c == '\\' {
                    f.write_str("\\")?;
                }
                write!(f, "{}", c)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({:?})", self.to_string())
    }
}
