//! Compiled dot-notation JSON paths.
//!
//! Manifests address provider payloads with JSONPath-like selectors
//! (`$.choices[0].delta.content`). Paths are compiled once at manifest
//! validation time, so a syntactically bad selector is a load-time error
//! with a field path, never a silent runtime miss.
//!
//! Supported syntax: optional `$.` prefix, dot-separated keys, `[N]` array
//! indices, `[*]` wildcard (first element), and bare numeric segments as
//! indices (`choices.0.delta`).

use serde_json::{Map, Value};
use thiserror::Error;

/// Path compilation error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("empty path")]
    Empty,
    #[error("empty segment at position {0}")]
    EmptySegment(usize),
    #[error("invalid index '{index}' in segment '{segment}'")]
    InvalidIndex { segment: String, index: String },
    #[error("unterminated '[' in segment '{0}'")]
    Unterminated(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
    /// `[*]`: first element of an array.
    First,
}

/// A pre-parsed selector over an opaque JSON tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    raw: String,
    segments: Vec<Segment>,
}

impl JsonPath {
    /// Compile a selector, validating its syntax.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let trimmed = raw.trim();
        let body = trimmed.strip_prefix("$.").unwrap_or(trimmed);
        if body.is_empty() {
            return Err(PathError::Empty);
        }

        let mut segments = Vec::new();
        for (pos, part) in body.split('.').enumerate() {
            if part.is_empty() {
                return Err(PathError::EmptySegment(pos));
            }
            let mut rest = part;
            // Leading key (may be absent for segments like "[0]").
            if let Some(bracket) = rest.find('[') {
                let key = &rest[..bracket];
                if !key.is_empty() {
                    segments.push(Segment::Key(key.to_string()));
                }
                rest = &rest[bracket..];
                while !rest.is_empty() {
                    let Some(stripped) = rest.strip_prefix('[') else {
                        return Err(PathError::Unterminated(part.to_string()));
                    };
                    let Some(end) = stripped.find(']') else {
                        return Err(PathError::Unterminated(part.to_string()));
                    };
                    let idx = &stripped[..end];
                    if idx == "*" {
                        segments.push(Segment::First);
                    } else {
                        let parsed = idx.parse::<usize>().map_err(|_| PathError::InvalidIndex {
                            segment: part.to_string(),
                            index: idx.to_string(),
                        })?;
                        segments.push(Segment::Index(parsed));
                    }
                    rest = &stripped[end + 1..];
                }
            } else if let Ok(idx) = rest.parse::<usize>() {
                segments.push(Segment::Index(idx));
            } else if rest == "*" {
                segments.push(Segment::First);
            } else {
                segments.push(Segment::Key(rest.to_string()));
            }
        }

        Ok(Self {
            raw: trimmed.to_string(),
            segments,
        })
    }

    /// The selector as written.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Resolve the path against a value.
    pub fn get<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        let mut current = value;
        for segment in &self.segments {
            current = match (segment, current) {
                (Segment::Key(k), Value::Object(map)) => map.get(k)?,
                (Segment::Index(i), Value::Array(arr)) => arr.get(*i)?,
                (Segment::First, Value::Array(arr)) => arr.first()?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Resolve to a string. Non-string scalars are rendered via JSON so
    /// numeric finish codes and the like still come through.
    pub fn get_string(&self, value: &Value) -> Option<String> {
        match self.get(value)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => serde_json::to_string(other).ok(),
        }
    }

    /// Whether the path resolves to a non-null value.
    pub fn hits(&self, value: &Value) -> bool {
        matches!(self.get(value), Some(v) if !v.is_null())
    }

    /// Write `new` at this path inside `target`, creating intermediate
    /// objects. Index segments are not supported for writes; compilers only
    /// place fields at plain key paths.
    pub fn set(&self, target: &mut Value, new: Value) -> Result<(), PathError> {
        if !target.is_object() {
            *target = Value::Object(Map::new());
        }
        let mut current = target;
        for (i, segment) in self.segments.iter().enumerate() {
            let Segment::Key(key) = segment else {
                return Err(PathError::InvalidIndex {
                    segment: self.raw.clone(),
                    index: "write through index".to_string(),
                });
            };
            let map = current.as_object_mut().expect("write cursor is an object");
            if i + 1 == self.segments.len() {
                map.insert(key.clone(), new);
                return Ok(());
            }
            let entry = map
                .entry(key.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            current = entry;
        }
        Err(PathError::Empty)
    }
}
