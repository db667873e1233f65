use prost::encoding::WireType;
use prost_reflect::{Cardinality, EnumDescriptor, FieldDescriptor, Kind, MessageDescriptor};
use prost_model_types::FieldPresenceExt;
use tracing::trace;

use super::lookups::scalar_kind;
use crate::error::CompilationError;
use crate::schema::{Label, ScalarKind};

/// Element kind of a raw field, before type mapping.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RawKind {
    Scalar(ScalarKind),
    Enum(EnumDescriptor),
    Message(MessageDescriptor),
    Map {
        key: ScalarKind,
        value: Box<RawKind>,
    },
}

/// One field as declared in a message descriptor.
#[derive(Debug, Clone)]
pub(crate) struct RawField {
    pub descriptor: FieldDescriptor,
    pub name: String,
    pub full_name: String,
    pub json_name: String,
    pub number: u32,
    pub kind: RawKind,
    pub label: Label,
    pub wire_type: WireType,
    /// Real oneof containing the field; synthetic oneofs are not unions.
    pub oneof: Option<String>,
    /// proto3 `optional`.
    pub proto3_optional: bool,
    /// Unset is distinguishable from zero on the wire.
    pub has_presence: bool,
    /// proto2 `required`.
    pub legacy_required: bool,
    /// proto2 `[default = ...]` text.
    pub legacy_default: Option<String>,
}

/// Collect the fields of `message` in declaration order.
pub(crate) fn walk(message: &MessageDescriptor) -> Result<Vec<RawField>, CompilationError> {
    let declared = &message.descriptor_proto().field;
    let mut fields = Vec::with_capacity(declared.len());
    for field_proto in declared {
        let field = message.get_field_by_name(field_proto.name()).ok_or_else(|| {
            CompilationError::resolution(format!(
                "field `{}` of {} is missing from the descriptor pool",
                field_proto.name(),
                message.full_name()
            ))
        })?;
        let raw = raw_field(&field)?;
        trace!(field = %raw.full_name, number = raw.number, label = ?raw.label, "walked field");
        fields.push(raw);
    }
    Ok(fields)
}

fn raw_field(field: &FieldDescriptor) -> Result<RawField, CompilationError> {
    let (kind, label) = if field.is_map() {
        (map_kind(field)?, Label::Map)
    } else if field.is_list() {
        (element_kind(field)?, Label::Repeated)
    } else {
        (element_kind(field)?, Label::Singular)
    };

    let wire_type = match (&kind, label) {
        (_, Label::Map) => WireType::LengthDelimited,
        (_, Label::Repeated) if field.is_packed() => WireType::LengthDelimited,
        (RawKind::Scalar(scalar), _) => scalar.wire_type(),
        (RawKind::Enum(_), _) => WireType::Varint,
        (RawKind::Message(_) | RawKind::Map { .. }, _) => WireType::LengthDelimited,
    };

    Ok(RawField {
        descriptor: field.clone(),
        name: field.name().to_string(),
        full_name: field.full_name().to_string(),
        json_name: field.json_name().to_string(),
        number: field.number(),
        kind,
        label,
        wire_type,
        oneof: field.real_oneof().map(|o| o.name().to_string()),
        proto3_optional: field.is_optional(),
        has_presence: field.supports_presence(),
        legacy_required: field.cardinality() == Cardinality::Required,
        legacy_default: field.field_descriptor_proto().default_value.clone(),
    })
}

fn map_kind(field: &FieldDescriptor) -> Result<RawKind, CompilationError> {
    let Kind::Message(entry) = field.kind() else {
        return Err(malformed_entry(field, "map field is not message-typed"));
    };
    let key_field = entry
        .get_field_by_name("key")
        .ok_or_else(|| malformed_entry(field, "map entry has no `key` field"))?;
    let value_field = entry
        .get_field_by_name("value")
        .ok_or_else(|| malformed_entry(field, "map entry has no `value` field"))?;

    let key = scalar_kind(&key_field.kind())
        .filter(|kind| kind.is_valid_map_key())
        .ok_or_else(|| {
            CompilationError::resolution(format!(
                "map field {} has unsupported key kind {:?}",
                field.full_name(),
                key_field.kind()
            ))
        })?;

    Ok(RawKind::Map {
        key,
        value: Box::new(element_kind(&value_field)?),
    })
}

fn element_kind(field: &FieldDescriptor) -> Result<RawKind, CompilationError> {
    match field.kind() {
        Kind::Message(message) => {
            if message.parent_pool().get_message_by_name(message.full_name()).is_none() {
                return Err(unresolved(field, message.full_name()));
            }
            Ok(RawKind::Message(message))
        }
        Kind::Enum(enumeration) => {
            if enumeration
                .parent_pool()
                .get_enum_by_name(enumeration.full_name())
                .is_none()
            {
                return Err(unresolved(field, enumeration.full_name()));
            }
            Ok(RawKind::Enum(enumeration))
        }
        other => scalar_kind(&other)
            .map(RawKind::Scalar)
            .ok_or_else(|| unresolved(field, &format!("{other:?}"))),
    }
}

fn unresolved(field: &FieldDescriptor, type_name: &str) -> CompilationError {
    CompilationError::resolution(format!(
        "type `{type_name}` referenced by {} cannot be resolved",
        field.full_name()
    ))
}

fn malformed_entry(field: &FieldDescriptor, cause: &str) -> CompilationError {
    CompilationError::resolution(format!("{}: {cause}", field.full_name()))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use prost_model_types::{DESCRIPTOR_POOL, FIXTURE_PACKAGE};
    use prost_reflect::MessageDescriptor;

    use super::*;

    fn message(name: &str) -> MessageDescriptor {
        DESCRIPTOR_POOL
            .get_message_by_name(&format!("{FIXTURE_PACKAGE}.{name}"))
            .expect("fixture message exists")
    }

    #[test]
    fn walk_preserves_declaration_order_and_scalar_kinds() {
        let fields = walk(&message("Scalars")).expect("walk succeeds");
        let names: Vec<_> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names[..3], ["double_field", "float_field", "int32_field"]);
        assert_eq!(fields.len(), 15);

        let int32 = &fields[2];
        assert_eq!(int32.kind, RawKind::Scalar(ScalarKind::Int32));
        assert_eq!(int32.label, Label::Singular);
        assert_eq!(int32.json_name, "int32Field");
        assert_eq!(int32.number, 3);
        assert_eq!(int32.wire_type, WireType::Varint);
        assert!(!int32.has_presence);

        assert_eq!(fields[0].wire_type, WireType::SixtyFourBit);
        assert_eq!(fields[8].wire_type, WireType::ThirtyTwoBit);
        assert_eq!(fields[14].wire_type, WireType::LengthDelimited);
    }

    #[test]
    fn walk_unwraps_map_entries() {
        let fields = walk(&message("Collections")).expect("walk succeeds");
        let counts = fields.iter().find(|f| f.name == "counts").expect("counts");
        assert_eq!(counts.label, Label::Map);
        assert_eq!(
            counts.kind,
            RawKind::Map {
                key: ScalarKind::String,
                value: Box::new(RawKind::Scalar(ScalarKind::Int32)),
            }
        );

        let flagged = fields.iter().find(|f| f.name == "flagged").expect("flagged");
        let RawKind::Map { key, value } = &flagged.kind else {
            panic!("flagged must be a map");
        };
        assert_eq!(*key, ScalarKind::Bool);
        assert!(matches!(value.as_ref(), RawKind::Message(m) if m.name() == "Scalars"));

        let numbers = fields.iter().find(|f| f.name == "numbers").expect("numbers");
        assert_eq!(numbers.label, Label::Repeated);
        assert_eq!(numbers.wire_type, WireType::LengthDelimited);
    }

    #[test]
    fn walk_separates_synthetic_and_real_oneofs() {
        let fields = walk(&message("Optionals")).expect("walk succeeds");
        assert!(fields.iter().all(|f| f.proto3_optional && f.oneof.is_none()));

        let fields = walk(&message("Choice")).expect("walk succeeds");
        assert_eq!(fields[0].oneof.as_deref(), Some("value"));
        assert_eq!(fields[1].oneof.as_deref(), Some("value"));
        assert!(!fields[0].proto3_optional);
    }

    #[test]
    fn walk_reads_proto2_default_literals() {
        let fields = walk(&message("Legacy")).expect("walk succeeds");
        assert_eq!(fields[0].legacy_default.as_deref(), Some("3"));
        assert_eq!(fields[1].legacy_default.as_deref(), Some("fast"));
        assert_eq!(fields[2].legacy_default, None);
        assert!(fields[0].has_presence);
        assert!(fields[2].legacy_required);
        assert!(!fields[0].legacy_required);
    }
}
