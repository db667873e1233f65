use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use prost_reflect::{EnumDescriptor, MessageDescriptor};

use super::lookups::well_known_type;
use super::walker::{RawField, RawKind};
use crate::error::CompilationError;
use crate::schema::{
    DefaultFactory, DefaultPolicy, EnumSchema, Label, Presence, ScalarKind, SchemaRef, ValueType,
    WellKnownType, WireKind,
};

/// Resolves message and enum references encountered while mapping types.
pub(crate) trait TypeResolver {
    /// Reference to the schema of `target`, building it if needed.
    fn message_ref(&mut self, target: &MessageDescriptor) -> Result<SchemaRef, CompilationError>;

    /// Schema of an enum.
    fn enum_schema(&mut self, target: &EnumDescriptor) -> Arc<EnumSchema>;
}

/// Type-mapper output for one field.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MappedField {
    pub wire_kind: WireKind,
    pub value_type: ValueType,
    pub presence: Presence,
    pub default: DefaultPolicy,
}

/// Map a raw field to its model type, presence and computed default.
pub(crate) fn map_field(
    raw: &RawField,
    resolver: &mut dyn TypeResolver,
) -> Result<MappedField, CompilationError> {
    match raw.label {
        Label::Map => {
            let RawKind::Map { key, value } = &raw.kind else {
                return Err(CompilationError::resolution(format!(
                    "map field {} has no entry type",
                    raw.full_name
                )));
            };
            Ok(MappedField {
                wire_kind: WireKind::Map,
                value_type: ValueType::Map {
                    key: *key,
                    value: Box::new(element_type(value, resolver)?),
                },
                presence: Presence::Implicit,
                default: DefaultPolicy::Factory(DefaultFactory::EmptyMap),
            })
        }
        Label::Repeated => Ok(MappedField {
            wire_kind: WireKind::Repeated,
            value_type: ValueType::List(Box::new(element_type(&raw.kind, resolver)?)),
            presence: Presence::Implicit,
            default: DefaultPolicy::Factory(DefaultFactory::EmptyList),
        }),
        Label::Singular => map_singular(raw, resolver),
    }
}

fn map_singular(
    raw: &RawField,
    resolver: &mut dyn TypeResolver,
) -> Result<MappedField, CompilationError> {
    let value_type = element_type(&raw.kind, resolver)?;
    let wire_kind = match &value_type {
        ValueType::Scalar(kind) => WireKind::Scalar(*kind),
        ValueType::Enum(_) => WireKind::Enum,
        ValueType::WellKnown(wkt) => WireKind::WellKnown(*wkt),
        _ => WireKind::Message,
    };

    let legacy = raw
        .legacy_default
        .as_deref()
        .map(|text| legacy_default_literal(&value_type, text))
        .transpose()
        .map_err(|cause| {
            CompilationError::resolution(format!(
                "default value of {} cannot be read: {cause}",
                raw.full_name
            ))
        })?;

    let presence = if raw.oneof.is_some() {
        Presence::OneofMember
    } else if legacy.is_some() || raw.legacy_required {
        Presence::Implicit
    } else {
        match &value_type {
            ValueType::WellKnown(WellKnownType::Wrapper(_)) => Presence::ExplicitOptional,
            ValueType::Message(_) | ValueType::WellKnown(_) if raw.proto3_optional => {
                Presence::ExplicitOptional
            }
            ValueType::Message(_) | ValueType::WellKnown(_) => Presence::Implicit,
            _ if raw.has_presence => Presence::ExplicitOptional,
            _ => Presence::Implicit,
        }
    };

    let default = match (presence, legacy) {
        (Presence::Implicit, Some(literal)) => DefaultPolicy::Literal(literal),
        (Presence::Implicit, None) => match &value_type {
            ValueType::Message(_) => DefaultPolicy::Factory(DefaultFactory::Model),
            _ => DefaultPolicy::Zero,
        },
        _ => DefaultPolicy::Absent,
    };

    Ok(MappedField {
        wire_kind,
        value_type,
        presence,
        default,
    })
}

fn element_type(
    kind: &RawKind,
    resolver: &mut dyn TypeResolver,
) -> Result<ValueType, CompilationError> {
    Ok(match kind {
        RawKind::Scalar(scalar) => ValueType::Scalar(*scalar),
        RawKind::Enum(enumeration) => ValueType::Enum(resolver.enum_schema(enumeration)),
        RawKind::Message(message) => match well_known_type(message.full_name()) {
            Some(wkt) => ValueType::WellKnown(wkt),
            None => ValueType::Message(resolver.message_ref(message)?),
        },
        RawKind::Map { .. } => {
            return Err(CompilationError::resolution(
                "map entries cannot be nested as element types",
            ));
        }
    })
}

/// Convert proto2 default text into the field's JSON form.
fn legacy_default_literal(value_type: &ValueType, text: &str) -> Result<serde_json::Value, String> {
    let ValueType::Scalar(kind) = value_type else {
        return match value_type {
            ValueType::Enum(_) => Ok(serde_json::Value::String(text.to_string())),
            _ => Err("only scalar and enum fields carry defaults".to_string()),
        };
    };
    Ok(match kind {
        ScalarKind::Bool => match text {
            "true" => serde_json::Value::Bool(true),
            "false" => serde_json::Value::Bool(false),
            other => return Err(format!("`{other}` is not a bool")),
        },
        ScalarKind::String => serde_json::Value::String(text.to_string()),
        ScalarKind::Bytes => serde_json::Value::String(STANDARD.encode(unescape_bytes(text)?)),
        ScalarKind::Double | ScalarKind::Float => match text {
            "inf" => "Infinity".into(),
            "-inf" => "-Infinity".into(),
            "nan" => "NaN".into(),
            _ => text
                .parse::<f64>()
                .map_err(|err| err.to_string())
                .map(serde_json::Value::from)?,
        },
        ScalarKind::Uint32 | ScalarKind::Uint64 | ScalarKind::Fixed32 | ScalarKind::Fixed64 => {
            text.parse::<u64>().map_err(|err| err.to_string())?.into()
        }
        _ => text.parse::<i64>().map_err(|err| err.to_string())?.into(),
    })
}

/// Decode the C-style escaping protoc applies to bytes defaults.
fn unescape_bytes(text: &str) -> Result<Vec<u8>, String> {
    let mut out = Vec::with_capacity(text.len());
    let mut rest = text.as_bytes();
    while let Some((&byte, tail)) = rest.split_first() {
        rest = tail;
        if byte != b'\\' {
            out.push(byte);
            continue;
        }
        let Some((&escape, tail)) = rest.split_first() else {
            return Err("trailing `\\` in bytes default".to_string());
        };
        rest = tail;
        let decoded = match escape {
            b'n' => b'\n',
            b'r' => b'\r',
            b't' => b'\t',
            b'a' => 0x07,
            b'b' => 0x08,
            b'f' => 0x0c,
            b'v' => 0x0b,
            b'\\' | b'\'' | b'"' | b'?' => escape,
            b'0'..=b'7' => {
                let mut value = u32::from(escape - b'0');
                for _ in 0..2 {
                    match rest.split_first() {
                        Some((&digit @ b'0'..=b'7', tail)) => {
                            value = value * 8 + u32::from(digit - b'0');
                            rest = tail;
                        }
                        _ => break,
                    }
                }
                u8::try_from(value)
                    .map_err(|_| format!("octal escape {value:o} exceeds a byte"))?
            }
            b'x' | b'X' => {
                let digits = rest
                    .iter()
                    .take(2)
                    .take_while(|d| d.is_ascii_hexdigit())
                    .count();
                if digits == 0 {
                    return Err("`\\x` without hex digits in bytes default".to_string());
                }
                let (hex, tail) = rest.split_at(digits);
                rest = tail;
                let hex = std::str::from_utf8(hex).map_err(|err| err.to_string())?;
                u8::from_str_radix(hex, 16).map_err(|err| err.to_string())?
            }
            other => return Err(format!("unknown escape `\\{}`", char::from(other))),
        };
        out.push(decoded);
    }
    Ok(out)
}
