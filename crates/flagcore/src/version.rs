//! Application [`Version`] and [`VersionRange`] targeting.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Version { major, minor, patch }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Display>::fmt(self, f)
    }
}

#[derive(thiserror::Error, Debug)]
#[error("invalid version {input:?}: {reason}")]
pub struct VersionParseError {
    pub input: String,
    pub reason: String,
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = |reason: &str| VersionParseError {
            input: s.to_string(),
            reason: reason.to_string(),
        };
        let mut parts = s.split('.');
        let major = parts
            .next()
            .ok_or_else(|| bad("missing major component"))?
            .parse()
            .map_err(|_| bad("major component is not a number"))?;
        let minor = parts
            .next()
            .ok_or_else(|| bad("missing minor component"))?
            .parse()
            .map_err(|_| bad("minor component is not a number"))?;
        let patch = parts
            .next()
            .ok_or_else(|| bad("missing patch component"))?
            .parse()
            .map_err(|_| bad("patch component is not a number"))?;
        if parts.next().is_some() {
            return Err(bad("too many components"));
        }
        Ok(Version { major, minor, patch })
    }
}

impl serde::Serialize for Version {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Version {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;
        let s = std::borrow::Cow::<'de, str>::deserialize(deserializer)?;
        Version::from_str(s.as_ref()).map_err(D::Error::custom)
    }
}

/// A version range, with inclusive endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VersionRange {
    Unbounded,
    MinBound(Version),
    MaxBound(Version),
    FullyBound(Version, Version),
}

impl VersionRange {
    pub fn contains(&self, v: Version) -> bool {
        match self {
            VersionRange::Unbounded => true,
            VersionRange::MinBound(min) => v >= *min,
            VersionRange::MaxBound(max) => v <= *max,
            VersionRange::FullyBound(min, max) => v >= *min && v <= *max,
        }
    }

    /// Whether this range contributes a non-empty clause to rule specificity:
    /// the unbounded range is the "empty" case.
    pub fn is_bounded(&self) -> bool {
        !matches!(self, VersionRange::Unbounded)
    }
}
