//! Stable identifiers: [`FeatureId`] for flags and [`HexId`] for stable/session ids.

use std::fmt;

/// Globally unique identifier of a declared feature, of the form
/// `feature::<namespace-seed>::<property-name>`.
///
/// `FeatureId`s are only ever minted by [`crate::schema::SchemaBuilder`] at
/// registration time, or by the codec resolving a wire key against a
/// trusted, in-memory [`crate::schema::Schema`], never by trusting a
/// payload-provided class name (data-model invariant 5).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeatureId(Box<str>);

impl FeatureId {
    const PREFIX: &'static str = "feature";

    /// Derive a `FeatureId` from a namespace seed and a property name.
    /// Deterministic: identical inputs always produce byte-identical ids.
    pub fn new(namespace_seed: &str, property_name: &str) -> Self {
        FeatureId(format!("{}::{namespace_seed}::{property_name}", Self::PREFIX).into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse a wire-format key of the expected `feature::<seed>::<name>` shape.
    /// Used only by the codec to validate incoming keys before looking them
    /// up in the schema's feature index; the parsed id is never trusted on
    /// its own to locate a feature (see [`Self`] docs).
    pub fn parse(key: &str) -> Option<Self> {
        let mut parts = key.splitn(3, "::");
        let prefix = parts.next()?;
        let seed = parts.next()?;
        let name = parts.next()?;
        if prefix != Self::PREFIX || seed.is_empty() || name.is_empty() {
            return None;
        }
        Some(FeatureId(key.into()))
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Display>::fmt(self, f)
    }
}

impl serde::Serialize for FeatureId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

/// A hex-encoded stable/session identifier.
///
/// Invariant: `HexId::from_hex(s)?.to_string()` always round-trips through
/// hex-decode/hex-encode to the same canonical lowercase form; construction
/// fails rather than storing an un-normalized value.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HexId(Box<str>);

#[derive(thiserror::Error, Debug)]
#[error("invalid hex id {input:?}: {source}")]
pub struct HexIdError {
    pub input: String,
    #[source]
    pub source: hex::FromHexError,
}

impl HexId {
    pub fn from_hex(s: &str) -> Result<Self, HexIdError> {
        let bytes = hex::decode(s).map_err(|source| HexIdError {
            input: s.to_string(),
            source,
        })?;
        Ok(HexId(hex::encode(bytes).into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for HexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Display>::fmt(self, f)
    }
}

impl serde::Serialize for HexId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for HexId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;
        let s = std::borrow::Cow::<'de, str>::deserialize(deserializer)?;
        HexId::from_hex(s.as_ref()).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_id_shape() {
        let id = FeatureId::new("acme", "darkMode");
        assert_eq!(id.as_str(), "feature::acme::darkMode");
    }

    #[test]
    fn feature_id_parse_roundtrip() {
        let id = FeatureId::new("acme", "darkMode");
        let parsed = FeatureId::parse(id.as_str()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn feature_id_parse_rejects_malformed() {
        assert!(FeatureId::parse("darkMode").is_none());
        assert!(FeatureId::parse("feature::only-seed").is_none());
    }

    #[test]
    fn hex_id_round_trips() {
        let id = HexId::from_hex("DEADBEEF").unwrap();
        assert_eq!(id.as_str(), "deadbeef");
        let reencoded = HexId::from_hex(id.as_str()).unwrap();
        assert_eq!(id, reencoded);
    }

    #[test]
    fn hex_id_rejects_invalid() {
        assert!(HexId::from_hex("not-hex!").is_err());
        assert!(HexId::from_hex("abc").is_err());
    }
}
