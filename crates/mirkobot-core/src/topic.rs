use std::fmt;
use std::str::FromStr;

use crate::error::MirkobotError;

/// Separator between topic segments, e.g. `channel::general::send`.
pub const DELIMITER: &str = "::";

/// Pattern segment matching exactly one topic segment.
pub const WILDCARD: &str = "*";

/// One position of a [`TopicPattern`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Literal(String),
    Wildcard,
}

impl Segment {
    fn parse(raw: &str) -> Self {
        if raw == WILDCARD {
            Segment::Wildcard
        } else {
            Segment::Literal(raw.to_string())
        }
    }

    /// Whether this pattern segment accepts the given topic segment.
    pub fn accepts(&self, segment: &str) -> bool {
        match self {
            Segment::Wildcard => true,
            Segment::Literal(lit) => lit == segment,
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Literal(lit) => f.write_str(lit),
            Segment::Wildcard => f.write_str(WILDCARD),
        }
    }
}

/// A precompiled subscription pattern.
///
/// A pattern matches a topic when both have the same number of segments and
/// every pattern segment accepts the topic segment at the same position.
/// There is no multi-segment wildcard and matching is case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPattern {
    segments: Vec<Segment>,
}

impl TopicPattern {
    /// Compile a pattern. Fails on an empty string or an empty segment.
    pub fn parse(pattern: &str) -> crate::Result<Self> {
        if pattern.is_empty() {
            return Err(MirkobotError::InvalidTopic {
                topic: pattern.to_string(),
                reason: "topic pattern is empty".into(),
            });
        }
        if split(pattern).any(str::is_empty) {
            return Err(MirkobotError::InvalidTopic {
                topic: pattern.to_string(),
                reason: "topic pattern has an empty segment".into(),
            });
        }
        Ok(Self {
            segments: split(pattern).map(Segment::parse).collect(),
        })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// True when the pattern contains no wildcard.
    pub fn is_exact(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Literal(_)))
    }

    pub fn matches(&self, topic: &str) -> bool {
        let mut parts = split(topic);
        for segment in &self.segments {
            match parts.next() {
                Some(part) if segment.accepts(part) => {}
                _ => return false,
            }
        }
        parts.next().is_none()
    }
}

impl FromStr for TopicPattern {
    type Err = MirkobotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(DELIMITER)?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

/// Split a topic into its segments.
pub fn split(topic: &str) -> std::str::Split<'_, &'static str> {
    topic.split(DELIMITER)
}
