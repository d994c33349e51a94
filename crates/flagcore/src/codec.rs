//! Schema-aware, trust-boundary JSON decode/encode and patch application
//! (C7). Decode never trusts a payload's class/type name: it resolves
//! every value against the already-known, compile-time-declared
//! [`crate::value::ValueKindTag`] of the feature (scenario S6).

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::erased::{EncodeError as ErasedEncodeError, ErasedFlagDefinition};
use crate::id::{FeatureId, HexId};
use crate::registry::{ConfigurationSnapshot, SnapshotMeta};
use crate::rule::Rule;
use crate::schema::{DecodedFlagShape, Schema};
use crate::value::{ValueKind, ValueKindTag};
use crate::version::{Version, VersionRange};

/// The parse-boundary error taxonomy. Never thrown; always returned.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("invalid json: {0}")]
    InvalidJson(String),
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
    #[error("feature not found: {0}")]
    FeatureNotFound(String),
    #[error("invalid hex id {input:?}: {reason}")]
    InvalidHexId { input: String, reason: String },
    #[error("invalid rollout {value}: {reason}")]
    InvalidRollout { value: f64, reason: String },
    #[error("invalid version {input:?}: {reason}")]
    InvalidVersion { input: String, reason: String },
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("schema violation: {0}")]
    SchemaViolation(String),
}

#[derive(thiserror::Error, Debug)]
pub enum EncodeError {
    #[error(transparent)]
    ContextualValue(#[from] ErasedEncodeError),
    #[error("failed to serialize snapshot: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum UnknownFeatureKeyStrategy {
    #[default]
    Fail,
    Skip,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MissingFeaturePolicy {
    #[default]
    Reject,
    FillFromDeclaredDefaults,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DecodeOptions {
    pub unknown_feature_key_strategy: UnknownFeatureKeyStrategy,
    pub missing_feature_policy: MissingFeaturePolicy,
}

/// A snapshot that has passed schema-directed decode, witnessing it was
/// produced from a trusted schema rather than ad-hoc construction.
#[derive(Debug)]
pub struct MaterializedSnapshot(ConfigurationSnapshot);

impl MaterializedSnapshot {
    pub fn into_inner(self) -> ConfigurationSnapshot {
        self.0
    }

    pub fn as_snapshot(&self) -> &ConfigurationSnapshot {
        &self.0
    }
}

// --- wire format -----------------------------------------------------------

#[derive(Deserialize, Serialize, Default)]
struct WireMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "generatedAtEpochMillis")]
    generated_at_epoch_millis: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<String>,
}

#[derive(Deserialize)]
struct WireSnapshot {
    #[serde(default)]
    meta: Option<WireMeta>,
    #[serde(default)]
    flags: Vec<WireFlag>,
}

#[derive(Deserialize)]
struct WirePatch {
    #[serde(default)]
    meta: Option<WireMeta>,
    #[serde(default)]
    flags: Vec<WireFlag>,
    #[serde(default, rename = "removeKeys")]
    remove_keys: Vec<String>,
}

fn default_salt() -> String {
    "v1".to_string()
}

fn default_true() -> bool {
    true
}

fn default_hundred() -> f64 {
    100.0
}

#[derive(Deserialize)]
struct WireFlag {
    key: String,
    #[serde(rename = "defaultValue")]
    default_value: WireValue,
    #[serde(default = "default_salt")]
    salt: String,
    #[serde(default = "default_true", rename = "isActive")]
    is_active: bool,
    #[serde(default, rename = "rampUpAllowlist")]
    ramp_up_allowlist: Vec<String>,
    #[serde(default)]
    rules: Vec<WireRule>,
}

#[derive(Deserialize)]
struct WireRule {
    value: WireValue,
    #[serde(default = "default_hundred", rename = "rampUp")]
    ramp_up: f64,
    #[serde(default, rename = "rampUpAllowlist")]
    ramp_up_allowlist: Vec<String>,
    #[serde(default)]
    note: Option<String>,
    #[serde(default)]
    locales: Vec<String>,
    #[serde(default)]
    platforms: Vec<String>,
    #[serde(default, rename = "versionRange")]
    version_range: Option<WireVersionRange>,
    #[serde(default)]
    axes: BTreeMap<String, Vec<String>>,
}

#[derive(Deserialize, Serialize)]
#[serde(tag = "type")]
enum WireVersionRange {
    #[serde(rename = "UNBOUNDED")]
    Unbounded,
    #[serde(rename = "MIN_BOUND")]
    MinBound { min: String },
    #[serde(rename = "MAX_BOUND")]
    MaxBound { max: String },
    #[serde(rename = "MIN_AND_MAX_BOUND")]
    FullyBound { min: String, max: String },
}

#[derive(Deserialize, Serialize, Clone)]
#[serde(tag = "type")]
enum WireValue {
    #[serde(rename = "BOOLEAN")]
    Boolean { value: bool },
    #[serde(rename = "STRING")]
    String { value: String },
    #[serde(rename = "INT")]
    Int { value: i64 },
    #[serde(rename = "DOUBLE")]
    Double { value: f64 },
    #[serde(rename = "ENUM")]
    Enum {
        value: String,
        #[serde(default, rename = "enumClassName", skip_serializing_if = "Option::is_none")]
        enum_class_name: Option<String>,
    },
    #[serde(rename = "DATA_CLASS")]
    DataClass {
        value: serde_json::Value,
        #[serde(default, rename = "dataClassName", skip_serializing_if = "Option::is_none")]
        data_class_name: Option<String>,
    },
}

/// Resolve a wire value against the feature's declared kind, ignoring any
/// payload-supplied class name entirely (scenario S6: a forged
/// `enumClassName` has no effect on behavior).
fn wire_value_to_value_kind(wire: &WireValue, expected: &ValueKindTag) -> Result<ValueKind, ParseError> {
    match (wire, expected) {
        (WireValue::Boolean { value }, ValueKindTag::Bool) => Ok(ValueKind::Bool(*value)),
        (WireValue::Int { value }, ValueKindTag::Int) => Ok(ValueKind::Int(*value)),
        (WireValue::Double { value }, ValueKindTag::Double) => Ok(ValueKind::Double(*value)),
        (WireValue::String { value }, ValueKindTag::String) => Ok(ValueKind::String(value.clone())),
        (WireValue::Enum { value, .. }, ValueKindTag::Enum(type_id)) => Ok(ValueKind::Enum {
            type_id: type_id.to_string(),
            variant: value.clone(),
        }),
        (WireValue::DataClass { value, .. }, ValueKindTag::Struct(type_id)) => {
            let fields = match value {
                serde_json::Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                _ => {
                    return Err(ParseError::SchemaViolation(format!(
                        "expected an object for struct feature of type {type_id}"
                    )))
                }
            };
            Ok(ValueKind::Struct {
                type_id: type_id.to_string(),
                fields,
            })
        }
        (wire, expected) => Err(ParseError::TypeMismatch(format!(
            "expected a value of kind {expected}, found {}",
            wire_kind_name(wire)
        ))),
    }
}

fn wire_kind_name(wire: &WireValue) -> &'static str {
    match wire {
        WireValue::Boolean { .. } => "BOOLEAN",
        WireValue::String { .. } => "STRING",
        WireValue::Int { .. } => "INT",
        WireValue::Double { .. } => "DOUBLE",
        WireValue::Enum { .. } => "ENUM",
        WireValue::DataClass { .. } => "DATA_CLASS",
    }
}

fn value_kind_to_wire(kind: &ValueKind) -> WireValue {
    match kind {
        ValueKind::Bool(v) => WireValue::Boolean { value: *v },
        ValueKind::Int(v) => WireValue::Int { value: *v },
        ValueKind::Double(v) => WireValue::Double { value: *v },
        ValueKind::String(v) => WireValue::String { value: v.clone() },
        ValueKind::Enum { variant, .. } => WireValue::Enum {
            value: variant.clone(),
            enum_class_name: None,
        },
        ValueKind::Struct { fields, .. } => WireValue::DataClass {
            value: serde_json::Value::Object(fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            data_class_name: None,
        },
    }
}

fn parse_hex_allowlist(raw: &[String]) -> Result<BTreeSet<HexId>, ParseError> {
    raw.iter()
        .map(|s| {
            HexId::from_hex(s).map_err(|err| ParseError::InvalidHexId {
                input: s.clone(),
                reason: err.source.to_string(),
            })
        })
        .collect()
}

fn parse_version(input: &str) -> Result<Version, ParseError> {
    Version::from_str(input).map_err(|err| ParseError::InvalidVersion {
        input: input.to_string(),
        reason: err.reason,
    })
}

fn check_ramp_up(value: f64) -> Result<f64, ParseError> {
    if (0.0..=100.0).contains(&value) {
        Ok(value)
    } else {
        Err(ParseError::InvalidRollout {
            value,
            reason: "must be within [0, 100]".to_string(),
        })
    }
}

fn wire_rule_to_rule(wire: WireRule, expected: &ValueKindTag) -> Result<(Rule, ValueKind), ParseError> {
    let value = wire_value_to_value_kind(&wire.value, expected)?;
    let ramp_up = check_ramp_up(wire.ramp_up)?;
    let allowlist = parse_hex_allowlist(&wire.ramp_up_allowlist)?;
    let version_range = match wire.version_range {
        None | Some(WireVersionRange::Unbounded) => VersionRange::Unbounded,
        Some(WireVersionRange::MinBound { min }) => VersionRange::MinBound(parse_version(&min)?),
        Some(WireVersionRange::MaxBound { max }) => VersionRange::MaxBound(parse_version(&max)?),
        Some(WireVersionRange::FullyBound { min, max }) => {
            VersionRange::FullyBound(parse_version(&min)?, parse_version(&max)?)
        }
    };
    let axes = wire
        .axes
        .into_iter()
        .map(|(axis, values)| (axis, values.into_iter().collect::<BTreeSet<_>>()))
        .collect();
    let rule = Rule {
        ramp_up,
        note: wire.note,
        allowlist,
        locales: wire.locales.into_iter().collect(),
        platforms: wire.platforms.into_iter().collect(),
        version_range,
        axis_constraints: axes,
        extension: None,
    };
    Ok((rule, value))
}

fn decode_flag(wire: WireFlag, schema: &Schema, options: DecodeOptions) -> Result<Option<Box<dyn ErasedFlagDefinition>>, ParseError> {
    let Some(entry) = schema.resolve(&wire.key) else {
        return match options.unknown_feature_key_strategy {
            UnknownFeatureKeyStrategy::Fail => Err(ParseError::FeatureNotFound(wire.key)),
            UnknownFeatureKeyStrategy::Skip => {
                tracing::warn!(key = %wire.key, "skipping unknown feature key");
                Ok(None)
            }
        };
    };

    let default = wire_value_to_value_kind(&wire.default_value, &entry.kind)?;
    let ramp_up_allowlist = parse_hex_allowlist(&wire.ramp_up_allowlist)?;
    let rules = wire
        .rules
        .into_iter()
        .map(|r| wire_rule_to_rule(r, &entry.kind))
        .collect::<Result<Vec<_>, _>>()?;

    let shape = DecodedFlagShape {
        feature: entry.feature.clone(),
        default,
        rules,
        salt: wire.salt,
        is_active: wire.is_active,
        ramp_up_allowlist,
    };

    let erased = entry
        .decode(shape)
        .map_err(|mismatch| ParseError::TypeMismatch(mismatch.to_string()))?;
    Ok(Some(erased))
}

fn materialize(
    schema: &Schema,
    mut flags: BTreeMap<FeatureId, Box<dyn ErasedFlagDefinition>>,
    meta: SnapshotMeta,
    options: DecodeOptions,
) -> Result<MaterializedSnapshot, ParseError> {
    if options.missing_feature_policy == MissingFeaturePolicy::FillFromDeclaredDefaults {
        for entry in schema.declared_features() {
            if !flags.contains_key(&entry.feature) {
                let shape = DecodedFlagShape {
                    feature: entry.feature.clone(),
                    default: entry.default.clone(),
                    rules: vec![],
                    salt: "v1".to_string(),
                    is_active: true,
                    ramp_up_allowlist: BTreeSet::new(),
                };
                let erased = entry
                    .decode(shape)
                    .map_err(|mismatch| ParseError::TypeMismatch(mismatch.to_string()))?;
                flags.insert(entry.feature.clone(), erased);
            }
        }
    } else {
        let missing: Vec<&str> = schema
            .declared_features()
            .filter(|entry| !flags.contains_key(&entry.feature))
            .map(|entry| entry.feature.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(ParseError::InvalidSnapshot(format!(
                "missing declared feature(s): {}",
                missing.join(", ")
            )));
        }
    }

    let mut builder = ConfigurationSnapshot::builder().meta(meta);
    for (_, erased) in flags {
        builder = builder.insert_erased(erased);
    }
    Ok(MaterializedSnapshot(builder.build()))
}

fn wire_meta_to_snapshot_meta(meta: Option<WireMeta>) -> SnapshotMeta {
    match meta {
        None => SnapshotMeta::default(),
        Some(m) => SnapshotMeta {
            version: m.version,
            generated_at_epoch_millis: m.generated_at_epoch_millis,
            source: m.source,
        },
    }
}

/// Decode a JSON snapshot against `schema`, per the C7 algorithm.
pub fn decode(json: &str, schema: &Schema, options: DecodeOptions) -> Result<MaterializedSnapshot, ParseError> {
    let wire: WireSnapshot = serde_json::from_str(json).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    let mut flags = BTreeMap::new();
    for wire_flag in wire.flags {
        if let Some(erased) = decode_flag(wire_flag, schema, options)? {
            flags.insert(erased.feature().clone(), erased);
        }
    }
    materialize(schema, flags, wire_meta_to_snapshot_meta(wire.meta), options)
}

/// Apply a patch envelope (upserts plus `removeKeys`) onto `current`,
/// producing a fully re-validated, materialized successor.
pub fn apply_patch_json(
    current: &ConfigurationSnapshot,
    schema: &Schema,
    patch_json: &str,
    options: DecodeOptions,
) -> Result<MaterializedSnapshot, ParseError> {
    let wire: WirePatch = serde_json::from_str(patch_json).map_err(|e| ParseError::InvalidJson(e.to_string()))?;

    let mut flags: BTreeMap<FeatureId, Box<dyn ErasedFlagDefinition>> = current
        .feature_ids()
        .cloned()
        .filter_map(|id| current.find_flag(&id).map(|f| (id, f.clone_box())))
        .collect();

    for key in &wire.remove_keys {
        if let Some(entry) = schema.resolve(key) {
            flags.remove(&entry.feature);
        } else if options.unknown_feature_key_strategy == UnknownFeatureKeyStrategy::Fail {
            return Err(ParseError::FeatureNotFound(key.clone()));
        }
    }

    for wire_flag in wire.flags {
        if let Some(erased) = decode_flag(wire_flag, schema, options)? {
            flags.insert(erased.feature().clone(), erased);
        }
    }

    materialize(schema, flags, wire_meta_to_snapshot_meta(wire.meta), options)
}

/// Encode a snapshot to stable, deterministic JSON bytes. Rejects
/// contextual rule values, which cannot be serialized (edge case iii).
pub fn encode(snapshot: &ConfigurationSnapshot) -> Result<String, EncodeError> {
    let mut flags = Vec::with_capacity(snapshot.len());
    for feature in snapshot.feature_ids() {
        let flag = snapshot.find_flag(feature).expect("feature_ids() keys exist in the map");
        let rules = flag
            .encode_rules()?
            .into_iter()
            .map(|encoded| {
                let mut locales: Vec<String> = encoded.rule.locales.iter().cloned().collect();
                locales.sort();
                let mut platforms: Vec<String> = encoded.rule.platforms.iter().cloned().collect();
                platforms.sort();
                let mut ramp_up_allowlist: Vec<String> =
                    encoded.rule.allowlist.iter().map(|h| h.to_string()).collect();
                ramp_up_allowlist.sort();
                let axes = encoded
                    .rule
                    .axis_constraints
                    .iter()
                    .map(|(axis, values)| {
                        let mut values: Vec<String> = values.iter().cloned().collect();
                        values.sort();
                        (axis.clone(), values)
                    })
                    .collect();
                let version_range = match encoded.rule.version_range {
                    VersionRange::Unbounded => WireVersionRange::Unbounded,
                    VersionRange::MinBound(min) => WireVersionRange::MinBound { min: min.to_string() },
                    VersionRange::MaxBound(max) => WireVersionRange::MaxBound { max: max.to_string() },
                    VersionRange::FullyBound(min, max) => WireVersionRange::FullyBound {
                        min: min.to_string(),
                        max: max.to_string(),
                    },
                };
                WireRule {
                    value: value_kind_to_wire(&encoded.value),
                    ramp_up: encoded.rule.ramp_up,
                    ramp_up_allowlist,
                    note: encoded.rule.note.clone(),
                    locales,
                    platforms,
                    version_range: Some(version_range),
                    axes,
                }
            })
            .collect();

        let mut ramp_up_allowlist: Vec<String> = flag.ramp_up_allowlist().iter().map(|h| h.to_string()).collect();
        ramp_up_allowlist.sort();

        flags.push(WireFlag {
            key: feature.as_str().to_string(),
            default_value: value_kind_to_wire(&flag.default_value_kind()),
            salt: flag.salt().to_string(),
            is_active: flag.is_active(),
            ramp_up_allowlist,
            rules,
        });
    }

    let wire = WireSnapshotOut {
        meta: WireMeta {
            version: snapshot.meta.version.clone(),
            generated_at_epoch_millis: snapshot.meta.generated_at_epoch_millis,
            source: snapshot.meta.source.clone(),
        },
        flags,
    };
    Ok(serde_json::to_string(&wire)?)
}

#[derive(Serialize)]
struct WireSnapshotOut {
    meta: WireMeta,
    flags: Vec<WireFlag>,
}

impl Serialize for WireFlag {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("WireFlag", 6)?;
        s.serialize_field("key", &self.key)?;
        s.serialize_field("defaultValue", &self.default_value)?;
        s.serialize_field("salt", &self.salt)?;
        s.serialize_field("isActive", &self.is_active)?;
        s.serialize_field("rampUpAllowlist", &self.ramp_up_allowlist)?;
        s.serialize_field("rules", &self.rules)?;
        s.end()
    }
}

impl Serialize for WireRule {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("WireRule", 8)?;
        s.serialize_field("value", &self.value)?;
        s.serialize_field("rampUp", &self.ramp_up)?;
        s.serialize_field("rampUpAllowlist", &self.ramp_up_allowlist)?;
        s.serialize_field("note", &self.note)?;
        s.serialize_field("locales", &self.locales)?;
        s.serialize_field("platforms", &self.platforms)?;
        s.serialize_field("versionRange", &self.version_range)?;
        s.serialize_field("axes", &self.axes)?;
        s.end()
    }
}
