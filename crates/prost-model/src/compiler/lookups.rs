use prost_reflect::Kind;

use crate::schema::{ScalarKind, WellKnownType};

/// Maps a proto field kind to its scalar kind. Enums and messages have none.
pub(crate) fn scalar_kind(kind: &Kind) -> Option<ScalarKind> {
    match kind {
        Kind::Double => Some(ScalarKind::Double),
        Kind::Float => Some(ScalarKind::Float),
        Kind::Int32 => Some(ScalarKind::Int32),
        Kind::Int64 => Some(ScalarKind::Int64),
        Kind::Uint32 => Some(ScalarKind::Uint32),
        Kind::Uint64 => Some(ScalarKind::Uint64),
        Kind::Sint32 => Some(ScalarKind::Sint32),
        Kind::Sint64 => Some(ScalarKind::Sint64),
        Kind::Fixed32 => Some(ScalarKind::Fixed32),
        Kind::Fixed64 => Some(ScalarKind::Fixed64),
        Kind::Sfixed32 => Some(ScalarKind::Sfixed32),
        Kind::Sfixed64 => Some(ScalarKind::Sfixed64),
        Kind::Bool => Some(ScalarKind::Bool),
        Kind::String => Some(ScalarKind::String),
        Kind::Bytes => Some(ScalarKind::Bytes),
        Kind::Enum(_) | Kind::Message(_) => None,
    }
}

/// Maps a well-known type full name to its model representation.
pub(crate) fn well_known_type(full_name: &str) -> Option<WellKnownType> {
    match full_name {
        "google.protobuf.Timestamp" => Some(WellKnownType::Timestamp),
        "google.protobuf.Duration" => Some(WellKnownType::Duration),
        "google.protobuf.Struct" => Some(WellKnownType::Struct),
        "google.protobuf.Value" => Some(WellKnownType::Value),
        "google.protobuf.ListValue" => Some(WellKnownType::ListValue),
        "google.protobuf.FieldMask" => Some(WellKnownType::FieldMask),
        _ => wrapper_scalar(full_name).map(WellKnownType::Wrapper),
    }
}

/// Maps a wrapper type full name to the wrapped scalar kind.
pub(crate) fn wrapper_scalar(full_name: &str) -> Option<ScalarKind> {
    match full_name {
        "google.protobuf.BoolValue" => Some(ScalarKind::Bool),
        "google.protobuf.BytesValue" => Some(ScalarKind::Bytes),
        "google.protobuf.DoubleValue" => Some(ScalarKind::Double),
        "google.protobuf.FloatValue" => Some(ScalarKind::Float),
        "google.protobuf.Int32Value" => Some(ScalarKind::Int32),
        "google.protobuf.Int64Value" => Some(ScalarKind::Int64),
        "google.protobuf.StringValue" => Some(ScalarKind::String),
        "google.protobuf.UInt32Value" => Some(ScalarKind::Uint32),
        "google.protobuf.UInt64Value" => Some(ScalarKind::Uint64),
        _ => None,
    }
}
