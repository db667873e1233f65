use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use indexmap::IndexMap;

use super::Model;
use crate::schema::{ScalarKind, ValueType, WellKnownType};

/// A value held in one model field slot.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelValue {
    /// `bool`
    Bool(bool),
    /// `int32`, `sint32`, `sfixed32`
    I32(i32),
    /// `int64`, `sint64`, `sfixed64`
    I64(i64),
    /// `uint32`, `fixed32`
    U32(u32),
    /// `uint64`, `fixed64`
    U64(u64),
    /// `float`
    F32(f32),
    /// `double`
    F64(f64),
    /// `string`
    String(String),
    /// `bytes`
    Bytes(Vec<u8>),
    /// An enum number; unknown numbers are kept as-is.
    Enum(i32),
    /// A nested model.
    Message(Box<Model>),
    /// `google.protobuf.Timestamp`
    Timestamp(DateTime<Utc>),
    /// `google.protobuf.Duration`
    Duration(TimeDelta),
    /// `google.protobuf.FieldMask` paths, in protobuf field-name form.
    FieldMask(Vec<String>),
    /// `google.protobuf.Struct`, `Value` or `ListValue`.
    Json(serde_json::Value),
    /// Repeated field elements.
    List(Vec<ModelValue>),
    /// Map field entries in insertion order.
    Map(IndexMap<MapKey, ModelValue>),
}

/// Key of a map field entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum MapKey {
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    String(String),
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
        }
    }
}

impl MapKey {
    /// Parse a JSON object key for a map with `kind` keys.
    pub(crate) fn parse(kind: ScalarKind, text: &str) -> Option<Self> {
        match kind {
            ScalarKind::Bool => match text {
                "true" => Some(Self::Bool(true)),
                "false" => Some(Self::Bool(false)),
                _ => None,
            },
            ScalarKind::Int32 | ScalarKind::Sint32 | ScalarKind::Sfixed32 => {
                text.parse().ok().map(Self::I32)
            }
            ScalarKind::Int64 | ScalarKind::Sint64 | ScalarKind::Sfixed64 => {
                text.parse().ok().map(Self::I64)
            }
            ScalarKind::Uint32 | ScalarKind::Fixed32 => text.parse().ok().map(Self::U32),
            ScalarKind::Uint64 | ScalarKind::Fixed64 => text.parse().ok().map(Self::U64),
            ScalarKind::String => Some(Self::String(text.to_string())),
            ScalarKind::Double | ScalarKind::Float | ScalarKind::Bytes => None,
        }
    }

    pub(crate) fn conforms(&self, kind: ScalarKind) -> bool {
        matches!(
            (self, kind),
            (Self::Bool(_), ScalarKind::Bool)
                | (
                    Self::I32(_),
                    ScalarKind::Int32 | ScalarKind::Sint32 | ScalarKind::Sfixed32
                )
                | (
                    Self::I64(_),
                    ScalarKind::Int64 | ScalarKind::Sint64 | ScalarKind::Sfixed64
                )
                | (Self::U32(_), ScalarKind::Uint32 | ScalarKind::Fixed32)
                | (Self::U64(_), ScalarKind::Uint64 | ScalarKind::Fixed64)
                | (Self::String(_), ScalarKind::String)
        )
    }
}

impl ModelValue {
    /// Zero value of a scalar kind.
    #[must_use]
    pub fn zero(kind: ScalarKind) -> Self {
        match kind {
            ScalarKind::Double => Self::F64(0.0),
            ScalarKind::Float => Self::F32(0.0),
            ScalarKind::Int32 | ScalarKind::Sint32 | ScalarKind::Sfixed32 => Self::I32(0),
            ScalarKind::Int64 | ScalarKind::Sint64 | ScalarKind::Sfixed64 => Self::I64(0),
            ScalarKind::Uint32 | ScalarKind::Fixed32 => Self::U32(0),
            ScalarKind::Uint64 | ScalarKind::Fixed64 => Self::U64(0),
            ScalarKind::Bool => Self::Bool(false),
            ScalarKind::String => Self::String(String::new()),
            ScalarKind::Bytes => Self::Bytes(Vec::new()),
        }
    }

    /// True when this value can be stored in a slot of type `ty`.
    #[must_use]
    pub fn conforms(&self, ty: &ValueType) -> bool {
        match (self, ty) {
            (
                value,
                ValueType::Scalar(kind) | ValueType::WellKnown(WellKnownType::Wrapper(kind)),
            ) => value.conforms_scalar(*kind),
            (Self::Enum(_), ValueType::Enum(_)) => true,
            (Self::Message(model), ValueType::Message(reference)) => {
                model.schema().descriptor == reference.descriptor
            }
            (Self::Timestamp(_), ValueType::WellKnown(WellKnownType::Timestamp))
            | (Self::Duration(_), ValueType::WellKnown(WellKnownType::Duration))
            | (Self::FieldMask(_), ValueType::WellKnown(WellKnownType::FieldMask))
            | (Self::Json(_), ValueType::WellKnown(WellKnownType::Value)) => true,
            (Self::Json(json), ValueType::WellKnown(WellKnownType::Struct)) => json.is_object(),
            (Self::Json(json), ValueType::WellKnown(WellKnownType::ListValue)) => json.is_array(),
            (Self::List(items), ValueType::List(element)) => {
                items.iter().all(|item| item.conforms(element))
            }
            (Self::Map(entries), ValueType::Map { key, value }) => entries
                .iter()
                .all(|(k, v)| k.conforms(*key) && v.conforms(value)),
            _ => false,
        }
    }

    fn conforms_scalar(&self, kind: ScalarKind) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(&Self::zero(kind))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn map_keys_parse_per_kind() {
        let cases: &[(ScalarKind, &str, Option<MapKey>)] = &[
            (ScalarKind::Bool, "true", Some(MapKey::Bool(true))),
            (ScalarKind::Bool, "yes", None),
            (ScalarKind::Int32, "-7", Some(MapKey::I32(-7))),
            (ScalarKind::Int32, "4294967296", None),
            (ScalarKind::Sfixed64, "-9", Some(MapKey::I64(-9))),
            (ScalarKind::Fixed32, "7", Some(MapKey::U32(7))),
            (ScalarKind::Uint64, "18446744073709551615", Some(MapKey::U64(u64::MAX))),
            (ScalarKind::String, "k", Some(MapKey::String("k".into()))),
            (ScalarKind::Double, "1.5", None),
        ];
        for (kind, text, expected) in cases {
            assert_eq!(&MapKey::parse(*kind, text), expected, "{kind:?} {text}");
        }
    }

    #[test]
    fn scalar_values_conform_to_their_kind_family() {
        assert!(ModelValue::I32(1).conforms(&ValueType::Scalar(ScalarKind::Sint32)));
        assert!(!ModelValue::I32(1).conforms(&ValueType::Scalar(ScalarKind::Int64)));
        assert!(ModelValue::U64(1).conforms(&ValueType::WellKnown(WellKnownType::Wrapper(
            ScalarKind::Uint64
        ))));
        assert!(
            ModelValue::List(vec![ModelValue::F64(1.0)])
                .conforms(&ValueType::List(Box::new(ValueType::Scalar(ScalarKind::Double))))
        );
        assert!(
            !ModelValue::Json(serde_json::json!([1]))
                .conforms(&ValueType::WellKnown(WellKnownType::Struct))
        );
        let map = ModelValue::Map(IndexMap::from([(MapKey::Bool(true), ModelValue::I32(1))]));
        assert!(map.conforms(&ValueType::Map {
            key: ScalarKind::Bool,
            value: Box::new(ValueType::Scalar(ScalarKind::Int32)),
        }));
        assert!(!map.conforms(&ValueType::Map {
            key: ScalarKind::String,
            value: Box::new(ValueType::Scalar(ScalarKind::Int32)),
        }));
    }
}
