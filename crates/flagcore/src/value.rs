//! [`ValueKind`]: the tagged-union runtime representation of a flag value,
//! and [`FlagValue`]: the trait connecting a compile-time Rust type to it.
//!
//! The codec never trusts a payload's class/type name to pick a Rust type
//! (data-model invariant 5 / scenario S6): it always decodes against the
//! declared [`ValueKindTag`] of the already-known feature, and `FlagValue`
//! impls are exhaustive pattern matches rather than reflection.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value as Json;

/// The declared type of a feature, as registered at build time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValueKindTag {
    Bool,
    Int,
    Double,
    String,
    Enum(Box<str>),
    Struct(Box<str>),
}

impl fmt::Display for ValueKindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKindTag::Bool => f.write_str("BOOLEAN"),
            ValueKindTag::Int => f.write_str("INT"),
            ValueKindTag::Double => f.write_str("DOUBLE"),
            ValueKindTag::String => f.write_str("STRING"),
            ValueKindTag::Enum(type_id) => write!(f, "ENUM({type_id})"),
            ValueKindTag::Struct(type_id) => write!(f, "DATA_CLASS({type_id})"),
        }
    }
}

/// A decoded or pre-encode runtime value, tagged by kind.
#[derive(Clone, Debug, PartialEq)]
pub enum ValueKind {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Enum { type_id: String, variant: String },
    Struct { type_id: String, fields: BTreeMap<String, Json> },
}

impl ValueKind {
    pub fn kind_tag(&self) -> ValueKindTag {
        match self {
            ValueKind::Bool(_) => ValueKindTag::Bool,
            ValueKind::Int(_) => ValueKindTag::Int,
            ValueKind::Double(_) => ValueKindTag::Double,
            ValueKind::String(_) => ValueKindTag::String,
            ValueKind::Enum { type_id, .. } => ValueKindTag::Enum(type_id.as_str().into()),
            ValueKind::Struct { type_id, .. } => ValueKindTag::Struct(type_id.as_str().into()),
        }
    }
}

/// A mismatch between a feature's declared kind and the kind encountered at
/// a codec boundary.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("type mismatch: expected {expected}, found {found}")]
pub struct TypeMismatch {
    pub expected: String,
    pub found: String,
}

/// Connects a compile-time Rust type `T` to the runtime [`ValueKind`]
/// tagged union, so the codec can decode/encode without reflection.
pub trait FlagValue: Clone + fmt::Debug + Send + Sync + 'static {
    fn declared_kind() -> ValueKindTag;
    fn to_value_kind(&self) -> ValueKind;
    fn from_value_kind(kind: ValueKind) -> Result<Self, TypeMismatch>;
}

macro_rules! impl_flag_value_primitive {
    ($ty:ty, $tag:ident, $variant:ident) => {
        impl FlagValue for $ty {
            fn declared_kind() -> ValueKindTag {
                ValueKindTag::$tag
            }

            fn to_value_kind(&self) -> ValueKind {
                ValueKind::$variant(self.clone())
            }

            fn from_value_kind(kind: ValueKind) -> Result<Self, TypeMismatch> {
                match kind {
                    ValueKind::$variant(v) => Ok(v),
                    other => Err(TypeMismatch {
                        expected: ValueKindTag::$tag.to_string(),
                        found: other.kind_tag().to_string(),
                    }),
                }
            }
        }
    };
}

impl_flag_value_primitive!(bool, Bool, Bool);
impl_flag_value_primitive!(i64, Int, Int);
impl_flag_value_primitive!(f64, Double, Double);
impl_flag_value_primitive!(String, String, String);

/// Implemented by plain Rust enums that are decoded as [`ValueKind::Enum`].
/// Typically derived by hand (or by a small `#[derive]` in a host crate);
/// here expressed as an exhaustive-match trait rather than reflection.
pub trait FlagEnum: Clone + fmt::Debug + PartialEq + Send + Sync + 'static {
    fn type_id() -> &'static str;
    fn variant_name(&self) -> &'static str;
    fn from_variant_name(name: &str) -> Option<Self>
    where
        Self: Sized;
}

/// Wraps a [`FlagEnum`] so it can serve as a [`FlagValue`].
#[derive(Clone, Debug, PartialEq)]
pub struct EnumValue<E: FlagEnum>(pub E);

impl<E: FlagEnum> FlagValue for EnumValue<E> {
    fn declared_kind() -> ValueKindTag {
        ValueKindTag::Enum(E::type_id().into())
    }

    fn to_value_kind(&self) -> ValueKind {
        ValueKind::Enum {
            type_id: E::type_id().to_string(),
            variant: self.0.variant_name().to_string(),
        }
    }

    fn from_value_kind(kind: ValueKind) -> Result<Self, TypeMismatch> {
        match kind {
            ValueKind::Enum { type_id, variant } if type_id == E::type_id() => {
                E::from_variant_name(&variant)
                    .map(EnumValue)
                    .ok_or_else(|| TypeMismatch {
                        expected: format!("ENUM({})", E::type_id()),
                        found: format!("ENUM({type_id})::{variant}"),
                    })
            }
            other => Err(TypeMismatch {
                expected: format!("ENUM({})", E::type_id()),
                found: other.kind_tag().to_string(),
            }),
        }
    }
}

/// Implemented by plain Rust structs decoded as [`ValueKind::Struct`].
pub trait FlagStruct:
    Clone + fmt::Debug + serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static
{
    fn type_id() -> &'static str;
}

/// Wraps a [`FlagStruct`] so it can serve as a [`FlagValue`].
#[derive(Clone, Debug)]
pub struct StructValue<S: FlagStruct>(pub S);

impl<S: FlagStruct> FlagValue for StructValue<S> {
    fn declared_kind() -> ValueKindTag {
        ValueKindTag::Struct(S::type_id().into())
    }

    fn to_value_kind(&self) -> ValueKind {
        let fields = match serde_json::to_value(&self.0) {
            Ok(Json::Object(map)) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        };
        ValueKind::Struct {
            type_id: S::type_id().to_string(),
            fields,
        }
    }

    fn from_value_kind(kind: ValueKind) -> Result<Self, TypeMismatch> {
        match kind {
            ValueKind::Struct { type_id, fields } if type_id == S::type_id() => {
                let obj = Json::Object(fields.into_iter().collect());
                serde_json::from_value(obj)
                    .map(StructValue)
                    .map_err(|err| TypeMismatch {
                        expected: format!("DATA_CLASS({})", S::type_id()),
                        found: format!("DATA_CLASS({type_id}): {err}"),
                    })
            }
            other => Err(TypeMismatch {
                expected: format!("DATA_CLASS({})", S::type_id()),
                found: other.kind_tag().to_string(),
            }),
        }
    }
}
