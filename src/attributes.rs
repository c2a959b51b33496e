//! # Node Attributes
//!
//! Tagged attribute values and the per-node attribute bag filled by
//! enrichment. Derived values (centralities, community ids) never go in here;
//! they live in [`crate::derived::DerivedStore`].

use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Well-known attribute keys written by the name-table join and enrichment.
pub mod keys {
    pub const TRACK_NAME: &str = "track_name";
    pub const ARTIST_NAME: &str = "artist_name";
    pub const ALBUM_NAME: &str = "album_name";
    pub const ARTIST_URI: &str = "artist_uri";
    pub const ALBUM_URI: &str = "album_uri";

    pub const POPULARITY: &str = "popularity";
    pub const DURATION_MS: &str = "duration_ms";

    pub const ACOUSTICNESS: &str = "acousticness";
    pub const DANCEABILITY: &str = "danceability";
    pub const ENERGY: &str = "energy";
    pub const INSTRUMENTALNESS: &str = "instrumentalness";
    pub const KEY: &str = "key";
    pub const LIVENESS: &str = "liveness";
    pub const LOUDNESS: &str = "loudness";
    pub const MODE: &str = "mode";
    pub const SPEECHINESS: &str = "speechiness";
    pub const TEMPO: &str = "tempo";
    pub const TIME_SIGNATURE: &str = "time_signature";
    pub const VALENCE: &str = "valence";

    pub const ARTIST_POPULARITY: &str = "artist_popularity";
    pub const GENRES: &str = "genres";

    /// Audio features in the order the catalog reports them.
    pub const AUDIO_FEATURES: [&str; 12] = [
        ACOUSTICNESS,
        DANCEABILITY,
        ENERGY,
        INSTRUMENTALNESS,
        KEY,
        LIVENESS,
        LOUDNESS,
        MODE,
        SPEECHINESS,
        TEMPO,
        TIME_SIGNATURE,
        VALENCE,
    ];
}

/// A single typed attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Int(i64),
    Float(f64),
    Text(String),
    Vector(Vec<f64>),
}

impl AttributeValue {
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Vector(_) => "vector",
        }
    }

    /// Numeric view; integers widen to floats.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Text(_) | Self::Vector(_) => None,
        }
    }

    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Renders the value as a scalar string for graph-interchange exporters,
    /// which cannot carry list-valued attributes.
    #[must_use]
    pub fn flatten_for_export(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
            Self::Vector(values) => {
                let parts: Vec<String> = values.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<f64>> for AttributeValue {
    fn from(v: Vec<f64>) -> Self {
        Self::Vector(v)
    }
}

/// Attribute bag attached to one node.
///
/// Keys are kept sorted so snapshots print and serialize in a stable order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeBag {
    values: BTreeMap<String, AttributeValue>,
}

impl AttributeBag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.values.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Set a field only if it has never been set.
    ///
    /// Returns `false` (leaving the existing value) when the field is taken.
    pub fn set_once(&mut self, key: &str, value: impl Into<AttributeValue>) -> bool {
        if self.values.contains_key(key) {
            return false;
        }
        self.values.insert(key.to_string(), value.into());
        true
    }

    /// Unconditional write, used when layering derived values into a view.
    pub fn overwrite(&mut self, key: &str, value: impl Into<AttributeValue>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Typed numeric accessor.
    ///
    /// # Errors
    ///
    /// `MissingAttribute` if unset, `AttributeType` if the value is not numeric.
    pub fn numeric(&self, node: &str, key: &str) -> Result<f64> {
        let value = self.values.get(key).ok_or_else(|| GraphError::MissingAttribute {
            node: node.to_string(),
            key: key.to_string(),
        })?;
        value.as_f64().ok_or_else(|| GraphError::AttributeType {
            node: node.to_string(),
            key: key.to_string(),
            expected: "numeric",
            found: value.type_name(),
        })
    }

    /// Typed text accessor.
    ///
    /// # Errors
    ///
    /// `MissingAttribute` if unset, `AttributeType` if the value is not text.
    pub fn text(&self, node: &str, key: &str) -> Result<&str> {
        let value = self.values.get(key).ok_or_else(|| GraphError::MissingAttribute {
            node: node.to_string(),
            key: key.to_string(),
        })?;
        value.as_str().ok_or_else(|| GraphError::AttributeType {
            node: node.to_string(),
            key: key.to_string(),
            expected: "text",
            found: value.type_name(),
        })
    }

    /// Build the numeric vector for `keys`, in the given order.
    ///
    /// # Errors
    ///
    /// Fails on the first missing or non-numeric key.
    pub fn numeric_vector(&self, node: &str, keys: &[String]) -> Result<Vec<f64>> {
        keys.iter().map(|key| self.numeric(node, key)).collect()
    }
}
