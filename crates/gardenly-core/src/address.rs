// ── Addresses and the path codec ──
//
// An `Address` is the segment vector locating one node in the state tree.
// `PathCodec` maps addresses to descriptor keys (segments joined by the
// configurable separator) and to positions inside cloud JSON documents.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

/// Delimiter used when rendering an address as a tree key.
pub const TREE_DELIMITER: char = '.';

/// Default descriptor key separator.
pub const DEFAULT_SEPARATOR: &str = "___";

// ── Address ─────────────────────────────────────────────────────────

/// Ordered path segments uniquely identifying a node in the state tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(Vec<String>);

impl Address {
    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Sub-address over `range`, clamped to the available segments.
    pub fn slice(&self, range: Range<usize>) -> Self {
        let end = range.end.min(self.0.len());
        let start = range.start.min(end);
        Self(self.0[start..end].to_vec())
    }

    /// The address one level up, or `None` for the empty address.
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(self.slice(0..self.0.len() - 1))
        }
    }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    pub fn join(&self, other: &Address) -> Self {
        let mut segments = self.0.clone();
        segments.extend(other.0.iter().cloned());
        Self(segments)
    }

    /// Segment-wise prefix test (`a.b` is a prefix of `a.b.c`, not of `a.bc`).
    pub fn starts_with(&self, prefix: &Address) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    pub fn strip_prefix(&self, prefix: &Address) -> Option<Self> {
        self.starts_with(prefix)
            .then(|| self.slice(prefix.len()..self.len()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "{TREE_DELIMITER}")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

impl FromStr for Address {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::default());
        }
        let segments: Vec<String> = s.split(TREE_DELIMITER).map(str::to_owned).collect();
        if segments.iter().any(String::is_empty) {
            return Err(CoreError::MalformedAddress { address: s.into() });
        }
        Ok(Self(segments))
    }
}

impl TryFrom<String> for Address {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Address> for String {
    fn from(a: Address) -> Self {
        a.to_string()
    }
}

// ── Decoded addresses ───────────────────────────────────────────────

/// An address split into its location, device and property parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedAddress {
    pub location_id: String,
    pub device_id: String,
    pub property_path: Vec<String>,
}

// ── PathCodec ───────────────────────────────────────────────────────

/// Bidirectional mapping between addresses, descriptor keys and JSON
/// positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathCodec {
    separator: String,
}

impl Default for PathCodec {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR.into(),
        }
    }
}

impl PathCodec {
    /// Create a codec, rejecting separators that would collide with the
    /// tree delimiter.
    pub fn new(separator: impl Into<String>) -> Result<Self, CoreError> {
        let separator = separator.into();
        if separator.is_empty() {
            return Err(CoreError::config("datapoint separator must not be empty"));
        }
        if separator.contains(TREE_DELIMITER) {
            return Err(CoreError::config(format!(
                "datapoint separator '{separator}' must not contain '{TREE_DELIMITER}'"
            )));
        }
        Ok(Self { separator })
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Fail with `InvalidSegment` if `segment` contains the separator.
    pub fn check_segment(&self, segment: &str) -> Result<(), CoreError> {
        if segment.contains(self.separator.as_str()) {
            return Err(CoreError::InvalidSegment {
                segment: segment.into(),
                separator: self.separator.clone(),
            });
        }
        Ok(())
    }

    pub fn encode<S: AsRef<str>>(
        &self,
        location_id: &str,
        device_id: &str,
        property_path: &[S],
    ) -> Result<Address, CoreError> {
        let mut segments = Vec::with_capacity(property_path.len() + 2);
        for segment in [location_id, device_id]
            .into_iter()
            .chain(property_path.iter().map(|s| s.as_ref()))
        {
            self.check_segment(segment)?;
            segments.push(segment.to_owned());
        }
        Ok(Address(segments))
    }

    pub fn decode(&self, address: &Address) -> Result<DecodedAddress, CoreError> {
        match address.segments() {
            [location_id, device_id, rest @ ..] => Ok(DecodedAddress {
                location_id: location_id.clone(),
                device_id: device_id.clone(),
                property_path: rest.to_vec(),
            }),
            _ => Err(CoreError::MalformedAddress {
                address: address.to_string(),
            }),
        }
    }

    /// Render an address as a descriptor key.
    pub fn flatten(&self, address: &Address) -> String {
        address.segments().join(&self.separator)
    }

    /// Split a descriptor key into an address.
    pub fn parse_key(&self, key: &str) -> Address {
        Address(key.split(self.separator.as_str()).map(str::to_owned).collect())
    }

    // ── JSON positions ───────────────────────────────────────────────

    /// Human name for an opaque id: the `name` of the first object in
    /// `document` whose `id` equals `id`, or the id itself.
    pub fn resolve_name(document: &Value, id: &str) -> String {
        find_entity(document, id)
            .and_then(|entity| entity.get("name"))
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map_or_else(|| id.to_owned(), str::to_owned)
    }

    /// Walk `path` down from `document`, matching each segment against
    /// nested entity ids first and plain object fields second.
    pub fn locate<'a, S: AsRef<str>>(document: &'a Value, path: &[S]) -> Option<&'a Value> {
        let mut current = document;
        for segment in path {
            let segment = segment.as_ref();
            current = find_entity_within(current, segment)
                .or_else(|| current.as_object().and_then(|o| o.get(segment)))?;
        }
        Some(current)
    }

    /// The value carried by a property entity (`{"id", "value", ...}`),
    /// or the position itself when it has no `value` field.
    pub fn leaf_value(position: &Value) -> &Value {
        position
            .as_object()
            .and_then(|o| o.get("value"))
            .unwrap_or(position)
    }
}

// ── JSON helpers ────────────────────────────────────────────────────

/// The `id` of a cloud entity as a string, if it has a usable one.
pub fn entity_id(entity: &Value) -> Option<String> {
    match entity.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn id_matches(entity: &Value, id: &str) -> bool {
    match entity.get("id") {
        Some(Value::String(s)) => s == id,
        Some(Value::Number(n)) => n.to_string() == id,
        _ => false,
    }
}

/// Depth-first search including `document` itself. First match wins.
pub fn find_entity<'a>(document: &'a Value, id: &str) -> Option<&'a Value> {
    if document.is_object() && id_matches(document, id) {
        return Some(document);
    }
    find_entity_within(document, id)
}

/// Depth-first search over the children of `document` only.
pub fn find_entity_within<'a>(document: &'a Value, id: &str) -> Option<&'a Value> {
    match document {
        Value::Object(map) => map.values().find_map(|child| find_entity(child, id)),
        Value::Array(items) => items.iter().find_map(|child| find_entity(child, id)),
        _ => None,
    }
}
