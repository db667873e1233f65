//! Runtime model instances.
//!
//! A [`Model`] pairs a compiled schema with one slot per field. A slot is
//! either absent or holds a [`ModelValue`] of the field's mapped type.
//! Fields with implicit presence always hold a value; explicit-optional
//! fields and oneof members may be absent.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use indexmap::IndexMap;
use prost::Message as _;
use prost_reflect::DynamicMessage;
use tracing::{trace, warn};
use uuid::Uuid;

use crate::compiler::CompiledModel;
use crate::config::{ParseConfig, ParseOption};
use crate::error::{Error, ValidationError};
use crate::schema::{
    DefaultFactory, DefaultPolicy, FieldRecord, MessageSchema, Presence, ScalarKind, ValueType,
    WellKnownType,
};
use crate::violation::{Violation, ViolationKind};

pub(crate) mod adapter;
mod dynamic;
mod json;
mod value;
mod wkt;

pub use value::{MapKey, ModelValue};

/// An instance of a compiled message schema.
#[derive(Clone)]
pub struct Model {
    compiled: CompiledModel,
    slots: Vec<Option<ModelValue>>,
}

impl Model {
    /// A fresh instance with every field's default applied.
    pub(crate) fn new(compiled: &CompiledModel) -> Self {
        let slots = compiled
            .schema()
            .fields
            .iter()
            .map(|field| initial_value(compiled, field))
            .collect();
        Self {
            compiled: compiled.clone(),
            slots,
        }
    }

    pub(crate) fn from_json(
        compiled: &CompiledModel,
        value: &serde_json::Value,
        options: &[ParseOption],
    ) -> Result<Self, Error> {
        json::decode_message(compiled, value, ParseConfig::from_options(options))
    }

    pub(crate) fn from_dynamic_message(
        compiled: &CompiledModel,
        message: &DynamicMessage,
    ) -> Result<Self, Error> {
        dynamic::from_dynamic(compiled, message)
    }

    pub(crate) fn decode(compiled: &CompiledModel, bytes: &[u8]) -> Result<Self, Error> {
        let message = DynamicMessage::decode(compiled.schema().descriptor.clone(), bytes)
            .map_err(|err| {
                Error::from(ValidationError::single(Violation::new(
                    "",
                    ViolationKind::InvalidValue,
                    format!("cannot decode {}: {err}", compiled.schema().full_name),
                )))
            })?;
        dynamic::from_dynamic(compiled, &message)
    }

    /// Schema of this instance.
    #[must_use]
    pub fn schema(&self) -> &Arc<MessageSchema> {
        self.compiled.schema()
    }

    /// Compiled model this instance was created from.
    #[must_use]
    pub fn compiled(&self) -> &CompiledModel {
        &self.compiled
    }

    pub(crate) fn slots(&self) -> &[Option<ModelValue>] {
        &self.slots
    }

    pub(crate) fn slot_mut(&mut self, index: usize) -> &mut Option<ModelValue> {
        &mut self.slots[index]
    }

    /// Value of a field, or `None` when the field is absent or unknown.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ModelValue> {
        let index = self.schema().field_index(name)?;
        self.slots[index].as_ref()
    }

    /// True when the field holds a value.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Store a value. Setting a oneof member clears the other members of
    /// its group.
    ///
    /// # Errors
    ///
    /// Returns [`ViolationKind::UnknownField`] for a name the schema does not
    /// declare and [`ViolationKind::TypeMismatch`] when the value does not
    /// fit the field.
    pub fn set(&mut self, name: &str, value: ModelValue) -> Result<(), Error> {
        let schema = Arc::clone(self.schema());
        let index = field_index(&schema, name)?;
        let field = &schema.fields[index];
        if !value.conforms(&field.value_type) {
            return Err(ValidationError::single(Violation::new(
                name,
                ViolationKind::TypeMismatch {
                    expected: field.value_type.describe(),
                },
                format!("value does not fit {}", field.full_name),
            ))
            .into());
        }
        if let Some(group) = field.oneof_group.as_deref().and_then(|g| schema.oneof(g)) {
            for member in group.members.iter().filter(|m| *m != name) {
                if let Some(sibling) = schema.field_index(member) {
                    self.slots[sibling] = None;
                }
            }
            trace!(group = %group.name, member = name, "oneof member activated");
        }
        self.slots[index] = Some(value);
        Ok(())
    }

    /// Clear a field. Presence-tracking fields become absent; implicit
    /// fields return to their default.
    ///
    /// # Errors
    ///
    /// Returns [`ViolationKind::UnknownField`] for an unknown name.
    pub fn clear(&mut self, name: &str) -> Result<(), Error> {
        let schema = Arc::clone(self.schema());
        let index = field_index(&schema, name)?;
        let field = &schema.fields[index];
        self.slots[index] = match field.presence {
            Presence::Implicit => initial_value(&self.compiled, field),
            Presence::ExplicitOptional | Presence::OneofMember => None,
        };
        Ok(())
    }

    /// Unset every member of a oneof group.
    ///
    /// # Errors
    ///
    /// Returns [`ViolationKind::UnknownField`] when the group does not exist.
    pub fn clear_oneof(&mut self, group: &str) -> Result<(), Error> {
        let schema = Arc::clone(self.schema());
        let Some(group) = schema.oneof(group) else {
            return Err(unknown(&schema, group));
        };
        for member in &group.members {
            if let Some(index) = schema.field_index(member) {
                self.slots[index] = None;
            }
        }
        Ok(())
    }

    /// Name of the active member of a oneof group.
    #[must_use]
    pub fn which_oneof(&self, group: &str) -> Option<&str> {
        let schema = self.schema();
        schema
            .oneof(group)?
            .members
            .iter()
            .find(|member| {
                schema
                    .field_index(member)
                    .is_some_and(|index| self.slots[index].is_some())
            })
            .map(String::as_str)
    }

    /// Check invariants that per-field setters cannot: every required oneof
    /// group has a member, recursively.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] listing every missing group.
    pub fn validate(&self) -> Result<(), Error> {
        let mut violations = Vec::new();
        self.collect_violations(&mut violations);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(violations).into())
        }
    }

    fn collect_violations(&self, out: &mut Vec<Violation>) {
        let schema = self.schema();
        for group in schema.oneof_groups.values() {
            if group.required && self.which_oneof(&group.name).is_none() {
                out.push(Violation::new(
                    group.name.clone(),
                    ViolationKind::RequiredOneofMissing {
                        group: group.name.clone(),
                    },
                    format!("exactly one member of oneof `{}` is required", group.name),
                ));
            }
        }
        for (field, slot) in schema.fields.iter().zip(&self.slots) {
            if let Some(value) = slot {
                nested_violations(value, &field.name, out);
            }
        }
    }

    /// JSON form of this instance.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        json::encode_message(self)
    }

    /// Dynamic protobuf message holding the same values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when a value cannot be represented on
    /// the wire, such as an out-of-range timestamp.
    pub fn to_dynamic_message(&self) -> Result<DynamicMessage, Error> {
        dynamic::to_dynamic(self)
    }

    /// Protobuf binary encoding.
    ///
    /// # Errors
    ///
    /// Same as [`Model::to_dynamic_message`].
    pub fn encode_to_vec(&self) -> Result<Vec<u8>, Error> {
        Ok(self.to_dynamic_message()?.encode_to_vec())
    }
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        self.schema().descriptor == other.schema().descriptor && self.slots == other.slots
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct(&self.schema().name);
        for (field, slot) in self.schema().fields.iter().zip(&self.slots) {
            s.field(&field.name, slot);
        }
        s.finish()
    }
}

fn nested_violations(value: &ModelValue, path: &str, out: &mut Vec<Violation>) {
    match value {
        ModelValue::Message(model) => {
            let mut nested = Vec::new();
            model.collect_violations(&mut nested);
            for mut violation in nested {
                violation.prepend_path(path);
                out.push(violation);
            }
        }
        ModelValue::List(items) => {
            for (i, item) in items.iter().enumerate() {
                nested_violations(item, &format!("{path}[{i}]"), out);
            }
        }
        ModelValue::Map(entries) => {
            for (key, item) in entries {
                nested_violations(item, &format!("{path}[{:?}]", key.to_string()), out);
            }
        }
        _ => {}
    }
}

fn field_index(schema: &MessageSchema, name: &str) -> Result<usize, Error> {
    schema.field_index(name).ok_or_else(|| unknown(schema, name))
}

fn unknown(schema: &MessageSchema, name: &str) -> Error {
    ValidationError::single(Violation::new(
        name,
        ViolationKind::UnknownField,
        format!("`{name}` is not declared by {}", schema.full_name),
    ))
    .into()
}

fn initial_value(compiled: &CompiledModel, field: &FieldRecord) -> Option<ModelValue> {
    let value = match &field.default {
        DefaultPolicy::Absent => return None,
        DefaultPolicy::Literal(serde_json::Value::Null)
            if field.value_type != ValueType::WellKnown(WellKnownType::Value) =>
        {
            return None;
        }
        DefaultPolicy::Zero => zero_value(compiled, &field.value_type),
        DefaultPolicy::Literal(literal) => {
            match json::decode_value(literal, &field.value_type, compiled, ParseConfig::default()) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(
                        field = %field.full_name,
                        error = %err,
                        "default does not fit the field, using the zero value"
                    );
                    zero_value(compiled, &field.value_type)
                }
            }
        }
        DefaultPolicy::Factory(factory) => produce(compiled, *factory, &field.value_type),
    };
    match value {
        Some(value) if !value.conforms(&field.value_type) => {
            warn!(
                field = %field.full_name,
                "default factory does not fit the field, using the zero value"
            );
            zero_value(compiled, &field.value_type)
        }
        other => other,
    }
}

fn zero_value(compiled: &CompiledModel, ty: &ValueType) -> Option<ModelValue> {
    Some(match ty {
        ValueType::Scalar(kind) | ValueType::WellKnown(WellKnownType::Wrapper(kind)) => {
            ModelValue::zero(*kind)
        }
        ValueType::Enum(schema) => {
            ModelValue::Enum(schema.values.values().next().copied().unwrap_or(0))
        }
        ValueType::Message(reference) => {
            let Some(target) = compiled.resolve(reference) else {
                warn!(message = %reference.full_name, "referenced schema is not in the registry");
                return None;
            };
            ModelValue::Message(Box::new(Model::new(&target)))
        }
        ValueType::WellKnown(WellKnownType::Timestamp) => {
            ModelValue::Timestamp(DateTime::<Utc>::default())
        }
        ValueType::WellKnown(WellKnownType::Duration) => ModelValue::Duration(TimeDelta::zero()),
        ValueType::WellKnown(WellKnownType::FieldMask) => ModelValue::FieldMask(Vec::new()),
        ValueType::WellKnown(WellKnownType::Struct) => {
            ModelValue::Json(serde_json::Value::Object(serde_json::Map::new()))
        }
        ValueType::WellKnown(WellKnownType::ListValue) => {
            ModelValue::Json(serde_json::Value::Array(Vec::new()))
        }
        ValueType::WellKnown(WellKnownType::Value) => ModelValue::Json(serde_json::Value::Null),
        ValueType::List(_) => ModelValue::List(Vec::new()),
        ValueType::Map { .. } => ModelValue::Map(IndexMap::new()),
    })
}

fn produce(
    compiled: &CompiledModel,
    factory: DefaultFactory,
    ty: &ValueType,
) -> Option<ModelValue> {
    match factory {
        DefaultFactory::EmptyList => Some(ModelValue::List(Vec::new())),
        DefaultFactory::EmptyMap => Some(ModelValue::Map(IndexMap::new())),
        DefaultFactory::Model => zero_value(compiled, ty),
        DefaultFactory::Now => {
            let now = Utc::now();
            Some(match ty {
                ValueType::WellKnown(WellKnownType::Timestamp) => ModelValue::Timestamp(now),
                _ => ModelValue::String(wkt::format_timestamp(now)),
            })
        }
        DefaultFactory::Uuid4 => {
            let id = Uuid::new_v4();
            Some(match ty {
                ValueType::Scalar(ScalarKind::Bytes) => {
                    ModelValue::Bytes(id.as_bytes().to_vec())
                }
                _ => ModelValue::String(id.to_string()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use prost_model_types::{DESCRIPTOR_POOL, FIXTURE_PACKAGE};
    use serde_json::json;

    use super::*;
    use crate::compiler::Compiler;
    use crate::config::CompilerOption;

    fn compile_with(name: &str, options: &[CompilerOption]) -> CompiledModel {
        Compiler::with_options(options)
            .compile_by_name(&DESCRIPTOR_POOL, &format!("{FIXTURE_PACKAGE}.{name}"))
            .expect("compiles")
    }

    fn compile(name: &str) -> CompiledModel {
        compile_with(name, &[])
    }

    fn kinds(err: Error) -> Vec<ViolationKind> {
        match err {
            Error::Validation(ve) => ve.violations.iter().map(|v| v.kind().clone()).collect(),
            Error::Compilation(err) => panic!("unexpected compilation error: {err}"),
        }
    }

    #[test]
    fn explicit_optional_distinguishes_unset_from_zero() {
        let optionals = compile("Optionals");
        let mut model = optionals.new_model();
        assert!(!model.has("count"));
        assert_eq!(model.to_json(), json!({}));

        model.set("count", ModelValue::I32(0)).expect("conforms");
        assert!(model.has("count"));
        assert_eq!(model.to_json(), json!({"count": 0}));

        model.clear("count").expect("known field");
        assert!(!model.has("count"));
        assert!(!model.has("scalars"));
    }

    #[test]
    fn implicit_fields_start_at_zero_and_clear_back_to_it() {
        let scalars = compile("Scalars");
        let mut model = scalars.new_model();
        assert_eq!(model.get("int64_field"), Some(&ModelValue::I64(0)));
        assert_eq!(model.get("bytes_field"), Some(&ModelValue::Bytes(Vec::new())));
        model.set("int64_field", ModelValue::I64(9)).expect("conforms");
        model.clear("int64_field").expect("known field");
        assert_eq!(model.get("int64_field"), Some(&ModelValue::I64(0)));
    }

    #[test]
    fn setting_a_member_clears_its_siblings() {
        let choice = compile_with("Choice", &[CompilerOption::DiscriminatedUnions]);
        let mut model = choice.new_model();
        assert_eq!(model.which_oneof("value"), None);

        model.set("x", ModelValue::String("a".into())).expect("conforms");
        model.set("y", ModelValue::I64(2)).expect("conforms");
        assert_eq!(model.which_oneof("value"), Some("y"));
        assert!(!model.has("x"));
        assert_eq!(model.to_json(), json!({"yy": 2}));

        model.clear_oneof("value").expect("known group");
        assert_eq!(model.which_oneof("value"), None);
        assert_eq!(model.to_json(), json!({}));
    }

    #[test]
    fn set_rejects_unknown_names_and_wrong_types() {
        let choice = compile("Choice");
        let mut model = choice.new_model();
        assert_eq!(
            kinds(model.set("z", ModelValue::Bool(true)).expect_err("unknown")),
            vec![ViolationKind::UnknownField]
        );
        assert_eq!(
            kinds(model.set("y", ModelValue::I32(1)).expect_err("wrong width")),
            vec![ViolationKind::TypeMismatch { expected: "int64" }]
        );
        assert_eq!(
            kinds(model.clear_oneof("nope").expect_err("unknown group")),
            vec![ViolationKind::UnknownField]
        );
    }

    #[test]
    fn nested_message_fields_are_built_eagerly() {
        let outer = compile("Outer");
        let model = outer.new_model();
        let Some(ModelValue::Message(inner)) = model.get("inner") else {
            panic!("inner must be a nested model");
        };
        assert_eq!(inner.schema().full_name, format!("{FIXTURE_PACKAGE}.Outer.Inner"));
        assert_eq!(inner.get("value"), Some(&ModelValue::String(String::new())));
        assert_eq!(
            model.to_json(),
            json!({"inner": {"value": ""}, "mode": "MODE_UNSPECIFIED"})
        );

        let mut model = model;
        let wrong = compile("Scalars").new_model();
        assert!(model.set("inner", ModelValue::Message(Box::new(wrong))).is_err());
    }

    #[test]
    fn directive_defaults_run_per_instance() {
        let annotated = compile_with(
            "Annotated",
            &[CompilerOption::Local("GREETING".into(), json!("hello"))],
        );
        let first = annotated.new_model();
        let second = annotated.new_model();
        assert_eq!(first.get("greeting"), Some(&ModelValue::String("hello".into())));

        let (Some(ModelValue::String(a)), Some(ModelValue::String(b))) =
            (first.get("id"), second.get("id"))
        else {
            panic!("ids must be strings");
        };
        assert!(Uuid::parse_str(a).is_ok());
        assert_ne!(a, b);

        let Some(ModelValue::Timestamp(stamped)) = first.get("stamped_at") else {
            panic!("stamped_at must be a timestamp");
        };
        assert!(Utc::now().signed_duration_since(*stamped) < TimeDelta::minutes(1));
    }

    #[test]
    fn legacy_defaults_and_required_fields_are_implicit() {
        let legacy = compile("Legacy");
        let model = legacy.new_model();
        assert_eq!(model.get("retries"), Some(&ModelValue::I32(3)));
        assert_eq!(model.get("mode"), Some(&ModelValue::String("fast".into())));
        assert_eq!(model.get("id"), Some(&ModelValue::String(String::new())));
        assert_eq!(model.get("blob"), Some(&ModelValue::Bytes(vec![0x01, 0xff])));
        assert_eq!(
            legacy.from_json(&json!({"retries": null})).expect("valid").get("retries"),
            Some(&ModelValue::I32(3))
        );
    }

    #[test]
    fn validate_reports_missing_required_groups_with_paths() {
        let required = compile("RequiredChoice");
        let mut model = required.new_model();
        assert_eq!(
            kinds(model.validate().expect_err("missing")),
            vec![ViolationKind::RequiredOneofMissing { group: "kind".into() }]
        );
        model.set("text", ModelValue::String("t".into())).expect("conforms");
        assert!(model.validate().is_ok());
    }

    #[test]
    fn debug_lists_slots_by_field_name() {
        let optionals = compile("Optionals");
        let text = format!("{:?}", optionals.new_model());
        assert!(text.starts_with("Optionals {"), "{text}");
        assert!(text.contains("count: None"), "{text}");
    }
}
