//! Compiled schema types.
//!
//! A [`MessageSchema`] describes one protobuf message: its fields in
//! declaration order, its oneof groups, the enums and messages declared
//! inside it, and the resolved model configuration. Schemas never own each
//! other; every reference to another message is a [`SchemaRef`] resolved
//! through a [`SchemaRegistry`].

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use indexmap::IndexMap;
use prost::encoding::WireType;
use prost_reflect::{EnumDescriptor, MessageDescriptor};

use crate::config::ModelConfig;
use crate::model::adapter::OneofAdapter;

/// Protobuf scalar kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ScalarKind {
    Double,
    Float,
    Int32,
    Int64,
    Uint32,
    Uint64,
    Sint32,
    Sint64,
    Fixed32,
    Fixed64,
    Sfixed32,
    Sfixed64,
    Bool,
    String,
    Bytes,
}

impl ScalarKind {
    /// Protobuf keyword for this kind.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Double => "double",
            Self::Float => "float",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Uint32 => "uint32",
            Self::Uint64 => "uint64",
            Self::Sint32 => "sint32",
            Self::Sint64 => "sint64",
            Self::Fixed32 => "fixed32",
            Self::Fixed64 => "fixed64",
            Self::Sfixed32 => "sfixed32",
            Self::Sfixed64 => "sfixed64",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Bytes => "bytes",
        }
    }

    /// True for kinds allowed as map keys.
    #[must_use]
    pub fn is_valid_map_key(self) -> bool {
        !matches!(self, Self::Double | Self::Float | Self::Bytes)
    }

    pub(crate) fn wire_type(self) -> WireType {
        match self {
            Self::Double | Self::Fixed64 | Self::Sfixed64 => WireType::SixtyFourBit,
            Self::Float | Self::Fixed32 | Self::Sfixed32 => WireType::ThirtyTwoBit,
            Self::String | Self::Bytes => WireType::LengthDelimited,
            _ => WireType::Varint,
        }
    }
}

/// Well-known `google.protobuf` message types with dedicated model values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WellKnownType {
    /// `google.protobuf.Timestamp` as a UTC time point.
    Timestamp,
    /// `google.protobuf.Duration` as a signed time span.
    Duration,
    /// `google.protobuf.Struct` as a JSON object.
    Struct,
    /// `google.protobuf.Value` as any JSON value.
    Value,
    /// `google.protobuf.ListValue` as a JSON array.
    ListValue,
    /// `google.protobuf.FieldMask` as a list of paths.
    FieldMask,
    /// A `google.protobuf.*Value` wrapper holding the given scalar.
    Wrapper(ScalarKind),
}

/// Wire-level shape of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireKind {
    /// A scalar.
    Scalar(ScalarKind),
    /// An enum number.
    Enum,
    /// An embedded message.
    Message,
    /// A well-known message type.
    WellKnown(WellKnownType),
    /// A repeated field.
    Repeated,
    /// A map field.
    Map,
}

/// Field cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    /// One value.
    Singular,
    /// Ordered list of values.
    Repeated,
    /// Key-value pairs.
    Map,
}

/// Whether "unset" is distinguishable from the zero value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Unset reads as the default value.
    Implicit,
    /// Unset is tracked separately from any value.
    ExplicitOptional,
    /// Set only when this member is the active member of its oneof group.
    OneofMember,
}

/// Deferred default value producers, invoked once per model instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultFactory {
    /// A fresh empty list.
    EmptyList,
    /// A fresh empty map.
    EmptyMap,
    /// A nested model with its own defaults applied.
    Model,
    /// The current UTC time.
    Now,
    /// A random v4 UUID.
    Uuid4,
}

impl DefaultFactory {
    /// Resolve a named factory usable from comment directives.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "now" => Some(Self::Now),
            "uuid4" => Some(Self::Uuid4),
            "list" => Some(Self::EmptyList),
            "dict" => Some(Self::EmptyMap),
            _ => None,
        }
    }

    /// Name accepted by [`DefaultFactory::from_name`], if any.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::EmptyList => "list",
            Self::EmptyMap => "dict",
            Self::Model => "model",
            Self::Now => "now",
            Self::Uuid4 => "uuid4",
        }
    }
}

/// How a field obtains its value when a model is created without it.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultPolicy {
    /// The zero value of the field's type.
    Zero,
    /// No value.
    Absent,
    /// A literal value in the field's JSON form.
    Literal(serde_json::Value),
    /// A value produced per instance.
    Factory(DefaultFactory),
}

/// Which layer contributed a constraint entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConstraintSource {
    /// An option extension on the field.
    Annotation,
    /// A comment directive.
    Comment,
    /// A configured per-field override.
    Override,
}

/// One constraint entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    /// Opaque JSON value.
    pub value: serde_json::Value,
    /// Layer the value came from.
    pub source: ConstraintSource,
}

/// Ordered constraint map. Later layers replace values in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraints(IndexMap<String, Constraint>);

impl Constraints {
    pub(crate) fn insert(
        &mut self,
        key: impl Into<String>,
        value: serde_json::Value,
        source: ConstraintSource,
    ) {
        self.0.insert(key.into(), Constraint { value, source });
    }

    /// Entry for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Constraint> {
        self.0.get(key)
    }

    /// Value for `key`.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key).map(|c| &c.value)
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Constraint)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Non-owning reference to another compiled message.
#[derive(Clone, PartialEq, Eq)]
pub struct SchemaRef {
    /// Fully-qualified protobuf name.
    pub full_name: String,
    /// Model type name as seen from the referencing schema: the plain name,
    /// a dotted nested path, or a hoisted `Outer_Inner` name.
    pub type_name: String,
    /// Descriptor identity used for registry lookups.
    pub descriptor: MessageDescriptor,
}

impl fmt::Debug for SchemaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRef")
            .field("full_name", &self.full_name)
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// Mapped value type of a field.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueType {
    /// A scalar.
    Scalar(ScalarKind),
    /// An open enum.
    Enum(Arc<EnumSchema>),
    /// Another compiled message.
    Message(SchemaRef),
    /// A well-known type.
    WellKnown(WellKnownType),
    /// A list of the element type.
    List(Box<ValueType>),
    /// A map with a scalar key.
    Map {
        /// Key kind; never float, double or bytes.
        key: ScalarKind,
        /// Value type.
        value: Box<ValueType>,
    },
}

impl ValueType {
    /// Short name used in violation messages.
    #[must_use]
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Scalar(kind) | Self::WellKnown(WellKnownType::Wrapper(kind)) => kind.name(),
            Self::Enum(_) => "enum",
            Self::Message(_) => "message",
            Self::WellKnown(WellKnownType::Timestamp) => "timestamp",
            Self::WellKnown(WellKnownType::Duration) => "duration",
            Self::WellKnown(WellKnownType::Struct) => "object",
            Self::WellKnown(WellKnownType::Value) => "value",
            Self::WellKnown(WellKnownType::ListValue) => "array",
            Self::WellKnown(WellKnownType::FieldMask) => "field mask",
            Self::List(_) => "list",
            Self::Map { .. } => "map",
        }
    }
}

/// A compiled field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRecord {
    /// Protobuf field name.
    pub name: String,
    /// External key.
    pub alias: String,
    /// Field number.
    pub number: u32,
    /// Fully-qualified field name.
    pub full_name: String,
    /// protobuf JSON name.
    pub json_name: String,
    /// Wire-level shape.
    pub wire_kind: WireKind,
    /// Wire type used to encode one element.
    pub wire_type: WireType,
    /// Cardinality.
    pub label: Label,
    /// Presence discipline.
    pub presence: Presence,
    /// Mapped value type.
    pub value_type: ValueType,
    /// Default policy.
    pub default: DefaultPolicy,
    /// Merged constraints.
    pub constraints: Constraints,
    /// Name of the oneof group this field belongs to.
    pub oneof_group: Option<String>,
}

/// A oneof group of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneofGroup {
    /// Group name.
    pub name: String,
    /// Member field names in declaration order.
    pub members: Vec<String>,
    /// A member must be set.
    pub required: bool,
    /// External key -> member field name.
    pub aliases: IndexMap<String, String>,
}

impl OneofGroup {
    /// Member field name for an input key.
    #[must_use]
    pub fn member_for_key(&self, key: &str) -> Option<&str> {
        self.aliases.get(key).map(String::as_str)
    }

    /// Name of the discriminator key in the tagged representation.
    #[must_use]
    pub fn case_key(&self) -> String {
        format!("{}_case", self.name)
    }
}

/// An open enum: unknown numbers are preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumSchema {
    /// Short enum name.
    pub name: String,
    /// Fully-qualified enum name.
    pub full_name: String,
    /// Value name -> number, in declaration order.
    pub values: IndexMap<String, i32>,
}

impl EnumSchema {
    pub(crate) fn from_descriptor(descriptor: &EnumDescriptor) -> Self {
        Self {
            name: descriptor.name().to_string(),
            full_name: descriptor.full_name().to_string(),
            values: descriptor
                .values()
                .map(|v| (v.name().to_string(), v.number()))
                .collect(),
        }
    }

    /// First value name declared for `number`.
    #[must_use]
    pub fn name_of(&self, number: i32) -> Option<&str> {
        self.values
            .iter()
            .find(|(_, n)| **n == number)
            .map(|(name, _)| name.as_str())
    }

    /// Number for a value name.
    #[must_use]
    pub fn number_of(&self, name: &str) -> Option<i32> {
        self.values.get(name).copied()
    }
}

/// A compiled message.
#[derive(Clone)]
pub struct MessageSchema {
    /// Short message name.
    pub name: String,
    /// Fully-qualified message name.
    pub full_name: String,
    /// Descriptor this schema was built from.
    pub descriptor: MessageDescriptor,
    /// Fields in declaration order.
    pub fields: Vec<FieldRecord>,
    /// Messages declared inside this one (map entries excluded).
    pub nested: Vec<SchemaRef>,
    /// Enums declared inside this one.
    pub enums: Vec<Arc<EnumSchema>>,
    /// Real oneof groups by name, in declaration order.
    pub oneof_groups: IndexMap<String, OneofGroup>,
    /// Resolved model behavior.
    pub config: ModelConfig,
    /// True when the message reaches itself through field references.
    pub self_referential: bool,
    /// Oneof adapter stage, when enabled.
    pub adapter: Option<OneofAdapter>,
}

impl MessageSchema {
    /// Field by protobuf name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldRecord> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub(crate) fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Oneof group by name.
    #[must_use]
    pub fn oneof(&self, name: &str) -> Option<&OneofGroup> {
        self.oneof_groups.get(name)
    }
}

impl fmt::Debug for MessageSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageSchema")
            .field("full_name", &self.full_name)
            .field("fields", &self.fields)
            .field("nested", &self.nested)
            .field("oneof_groups", &self.oneof_groups)
            .field("self_referential", &self.self_referential)
            .finish_non_exhaustive()
    }
}

/// Hash-map key for a descriptor.
///
/// Hashes by full name and compares through the descriptor's own `Eq`, so
/// same-named descriptors from distinct pools stay distinct keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DescriptorKey<D>(pub(crate) D);

impl Hash for DescriptorKey<MessageDescriptor> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.full_name().hash(state);
    }
}

impl Hash for DescriptorKey<EnumDescriptor> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.full_name().hash(state);
    }
}

/// Immutable snapshot of every schema a `Compiler` has built.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    pub(crate) schemas: HashMap<DescriptorKey<MessageDescriptor>, Arc<MessageSchema>>,
    pub(crate) enums: HashMap<DescriptorKey<EnumDescriptor>, Arc<EnumSchema>>,
    pub(crate) hoisted: HashMap<DescriptorKey<MessageDescriptor>, String>,
}

impl SchemaRegistry {
    /// Schema for a descriptor.
    #[must_use]
    pub fn get(&self, descriptor: &MessageDescriptor) -> Option<&Arc<MessageSchema>> {
        self.schemas.get(&DescriptorKey(descriptor.clone()))
    }

    /// Schema behind a reference.
    #[must_use]
    pub fn resolve(&self, reference: &SchemaRef) -> Option<&Arc<MessageSchema>> {
        self.schemas.get(&DescriptorKey(reference.descriptor.clone()))
    }

    /// Synthesized name of a nested type referenced from outside its parent.
    #[must_use]
    pub fn hoisted_name(&self, descriptor: &MessageDescriptor) -> Option<&str> {
        self.hoisted.get(&DescriptorKey(descriptor.clone())).map(String::as_str)
    }

    /// Number of compiled message schemas.
    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// True when nothing has been compiled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn constraints_keep_first_position_and_last_value() {
        let mut constraints = Constraints::default();
        constraints.insert("gt", serde_json::json!(1), ConstraintSource::Annotation);
        constraints.insert("title", serde_json::json!("T"), ConstraintSource::Annotation);
        constraints.insert("gt", serde_json::json!(10), ConstraintSource::Comment);

        let keys: Vec<_> = constraints.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["gt", "title"]);
        assert_eq!(constraints.value("gt"), Some(&serde_json::json!(10)));
        assert_eq!(
            constraints.get("gt").map(|c| c.source),
            Some(ConstraintSource::Comment)
        );
    }

    #[test]
    fn enum_schema_is_open_and_ordered() {
        let schema = EnumSchema {
            name: "Color".into(),
            full_name: "p.Color".into(),
            values: [("UNSPECIFIED".to_string(), 0), ("RED".to_string(), 1)]
                .into_iter()
                .collect(),
        };
        assert_eq!(schema.name_of(1), Some("RED"));
        assert_eq!(schema.name_of(7), None);
        assert_eq!(schema.number_of("RED"), Some(1));
    }

    #[test]
    fn map_key_kinds_exclude_floats_and_bytes() {
        assert!(ScalarKind::String.is_valid_map_key());
        assert!(ScalarKind::Sfixed64.is_valid_map_key());
        assert!(ScalarKind::Bool.is_valid_map_key());
        assert!(!ScalarKind::Double.is_valid_map_key());
        assert!(!ScalarKind::Bytes.is_valid_map_key());
    }

    #[test]
    fn default_factories_resolve_by_name() {
        assert_eq!(DefaultFactory::from_name("now"), Some(DefaultFactory::Now));
        assert_eq!(DefaultFactory::from_name("uuid4"), Some(DefaultFactory::Uuid4));
        assert_eq!(DefaultFactory::from_name("model"), None);
        assert_eq!(DefaultFactory::Uuid4.name(), "uuid4");
    }
}
