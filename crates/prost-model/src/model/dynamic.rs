use prost::bytes::Bytes;
use prost_reflect::{
    DynamicMessage, Kind, MapKey as ReflectKey, MessageDescriptor, ReflectMessage,
    Value as ReflectValue,
};

use super::value::{MapKey, ModelValue};
use super::{Model, wkt};
use crate::compiler::CompiledModel;
use crate::error::{CompilationError, Error, ValidationError, merge_violations, prepend_path};
use crate::schema::{Presence, ScalarKind, ValueType, WellKnownType};
use crate::violation::{Violation, ViolationKind};

pub(crate) fn to_dynamic(model: &Model) -> Result<DynamicMessage, Error> {
    let schema = model.schema();
    let mut message = DynamicMessage::new(schema.descriptor.clone());
    let mut acc = None;
    for (field, slot) in schema.fields.iter().zip(model.slots()) {
        let Some(value) = slot else {
            continue;
        };
        let result = schema
            .descriptor
            .get_field(field.number)
            .ok_or_else(|| missing_field(&schema.descriptor, field.number))
            .and_then(|descriptor| {
                let reflected = to_reflect(value, &descriptor.kind())?;
                message
                    .try_set_field(&descriptor, reflected)
                    .map_err(|err| invalid(err.to_string()))
            });
        (_, acc) = merge_violations(acc, prepend_path(result, &field.name), false);
    }
    acc.map_or(Ok(message), Err)
}

/// Convert one model value. `kind` is the element kind for repeated fields
/// and the entry message for maps.
fn to_reflect(value: &ModelValue, kind: &Kind) -> Result<ReflectValue, Error> {
    Ok(match value {
        ModelValue::Bool(v) => wrap_if_message(kind, ReflectValue::Bool(*v), v)?,
        ModelValue::I32(v) => wrap_if_message(kind, ReflectValue::I32(*v), v)?,
        ModelValue::I64(v) => wrap_if_message(kind, ReflectValue::I64(*v), v)?,
        ModelValue::U32(v) => wrap_if_message(kind, ReflectValue::U32(*v), v)?,
        ModelValue::U64(v) => wrap_if_message(kind, ReflectValue::U64(*v), v)?,
        ModelValue::F32(v) => wrap_if_message(kind, ReflectValue::F32(*v), v)?,
        ModelValue::F64(v) => wrap_if_message(kind, ReflectValue::F64(*v), v)?,
        ModelValue::String(v) => wrap_if_message(kind, ReflectValue::String(v.clone()), v)?,
        ModelValue::Bytes(v) => {
            wrap_if_message(kind, ReflectValue::Bytes(Bytes::from(v.clone())), v)?
        }
        ModelValue::Enum(number) => ReflectValue::EnumNumber(*number),
        ModelValue::Message(model) => ReflectValue::Message(to_dynamic(model)?),
        ModelValue::Timestamp(v) => {
            let proto = wkt::timestamp_to_proto(*v);
            ReflectValue::Message(transcode(kind, &proto)?)
        }
        ModelValue::Duration(v) => {
            let proto = wkt::duration_to_proto(*v);
            ReflectValue::Message(transcode(kind, &proto)?)
        }
        ModelValue::FieldMask(paths) => {
            let proto = prost_types::FieldMask {
                paths: paths.clone(),
            };
            ReflectValue::Message(transcode(kind, &proto)?)
        }
        ModelValue::Json(json) => {
            let descriptor = message_kind(kind)?;
            let message = DynamicMessage::deserialize(descriptor, json.clone())
                .map_err(|err| invalid(err.to_string()))?;
            ReflectValue::Message(message)
        }
        ModelValue::List(items) => ReflectValue::List(
            items
                .iter()
                .map(|item| to_reflect(item, kind))
                .collect::<Result<_, _>>()?,
        ),
        ModelValue::Map(entries) => {
            let entry = message_kind(kind)?;
            let value_kind = entry.map_entry_value_field().kind();
            let mut out = std::collections::HashMap::with_capacity(entries.len());
            for (key, value) in entries {
                out.insert(reflect_key(key), to_reflect(value, &value_kind)?);
            }
            ReflectValue::Map(out)
        }
    })
}

/// Scalars stored in wrapper-typed fields become `google.protobuf.*Value`
/// messages.
fn wrap_if_message<T: prost::Message>(
    kind: &Kind,
    scalar: ReflectValue,
    raw: &T,
) -> Result<ReflectValue, Error> {
    match kind {
        Kind::Message(_) => Ok(ReflectValue::Message(transcode(kind, raw)?)),
        _ => Ok(scalar),
    }
}

fn transcode<T: prost::Message>(kind: &Kind, value: &T) -> Result<DynamicMessage, Error> {
    let mut message = DynamicMessage::new(message_kind(kind)?);
    message
        .transcode_from(value)
        .map_err(|err| invalid(err.to_string()))?;
    Ok(message)
}

fn message_kind(kind: &Kind) -> Result<MessageDescriptor, Error> {
    kind.as_message().cloned().ok_or_else(|| {
        ValidationError::single(Violation::new(
            "",
            ViolationKind::TypeMismatch { expected: "message" },
            format!("a message value cannot be stored in a {kind:?} field"),
        ))
        .into()
    })
}

fn reflect_key(key: &MapKey) -> ReflectKey {
    match key {
        MapKey::Bool(v) => ReflectKey::Bool(*v),
        MapKey::I32(v) => ReflectKey::I32(*v),
        MapKey::I64(v) => ReflectKey::I64(*v),
        MapKey::U32(v) => ReflectKey::U32(*v),
        MapKey::U64(v) => ReflectKey::U64(*v),
        MapKey::String(v) => ReflectKey::String(v.clone()),
    }
}

fn model_key(key: &ReflectKey) -> MapKey {
    match key {
        ReflectKey::Bool(v) => MapKey::Bool(*v),
        ReflectKey::I32(v) => MapKey::I32(*v),
        ReflectKey::I64(v) => MapKey::I64(*v),
        ReflectKey::U32(v) => MapKey::U32(*v),
        ReflectKey::U64(v) => MapKey::U64(*v),
        ReflectKey::String(v) => MapKey::String(v.clone()),
    }
}

pub(crate) fn from_dynamic(
    compiled: &CompiledModel,
    message: &DynamicMessage,
) -> Result<Model, Error> {
    let schema = compiled.schema();
    if message.descriptor() != schema.descriptor {
        return Err(ValidationError::single(Violation::new(
            "",
            ViolationKind::TypeMismatch { expected: "message" },
            format!(
                "expected {}, found {}",
                schema.full_name,
                message.descriptor().full_name()
            ),
        ))
        .into());
    }

    let mut model = Model::new(compiled);
    let mut acc = None;
    for (index, field) in schema.fields.iter().enumerate() {
        let Some(descriptor) = schema.descriptor.get_field(field.number) else {
            continue;
        };
        if !message.has_field(&descriptor) {
            match (field.presence, &field.value_type) {
                // Absent nested messages keep the default from `Model::new`.
                (Presence::Implicit, ValueType::Message(_)) => continue,
                (Presence::Implicit, _) => {}
                _ => {
                    *model.slot_mut(index) = None;
                    continue;
                }
            }
        }
        let result = from_reflect(&message.get_field(&descriptor), &field.value_type, compiled)
            .map(|value| *model.slot_mut(index) = Some(value));
        (_, acc) = merge_violations(acc, prepend_path(result, &field.name), false);
    }
    acc.map_or(Ok(model), Err)
}

fn from_reflect(
    value: &ReflectValue,
    ty: &ValueType,
    compiled: &CompiledModel,
) -> Result<ModelValue, Error> {
    match (ty, value) {
        (ValueType::Scalar(kind), value) => scalar(*kind, value),
        (ValueType::Enum(_), ReflectValue::EnumNumber(number)) => Ok(ModelValue::Enum(*number)),
        (ValueType::Message(reference), ReflectValue::Message(message)) => {
            let target = compiled.resolve(reference).ok_or_else(|| {
                Error::from(CompilationError::resolution(format!(
                    "{} is not in the registry",
                    reference.full_name
                )))
            })?;
            from_dynamic(&target, message).map(|m| ModelValue::Message(Box::new(m)))
        }
        (ValueType::WellKnown(known), ReflectValue::Message(message)) => {
            well_known(*known, message)
        }
        (ValueType::List(element), ReflectValue::List(items)) => {
            let mut acc = None;
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let result = from_reflect(item, element, compiled).map(|v| out.push(v));
                (_, acc) = merge_violations(acc, prepend_path(result, &format!("[{i}]")), false);
            }
            acc.map_or(Ok(ModelValue::List(out)), Err)
        }
        (ValueType::Map { value: element, .. }, ReflectValue::Map(entries)) => {
            let mut acc = None;
            let mut out = indexmap::IndexMap::with_capacity(entries.len());
            for (key, item) in entries {
                let key = model_key(key);
                let segment = format!("[{:?}]", key.to_string());
                let result = from_reflect(item, element, compiled).map(|v| {
                    out.insert(key, v);
                });
                (_, acc) = merge_violations(acc, prepend_path(result, &segment), false);
            }
            out.sort_keys();
            acc.map_or(Ok(ModelValue::Map(out)), Err)
        }
        _ => Err(mismatch(ty.describe())),
    }
}

fn scalar(kind: ScalarKind, value: &ReflectValue) -> Result<ModelValue, Error> {
    let converted = match value {
        ReflectValue::Bool(v) => ModelValue::Bool(*v),
        ReflectValue::I32(v) => ModelValue::I32(*v),
        ReflectValue::I64(v) => ModelValue::I64(*v),
        ReflectValue::U32(v) => ModelValue::U32(*v),
        ReflectValue::U64(v) => ModelValue::U64(*v),
        ReflectValue::F32(v) => ModelValue::F32(*v),
        ReflectValue::F64(v) => ModelValue::F64(*v),
        ReflectValue::String(v) => ModelValue::String(v.clone()),
        ReflectValue::Bytes(v) => ModelValue::Bytes(v.to_vec()),
        _ => return Err(mismatch(kind.name())),
    };
    if converted.conforms(&ValueType::Scalar(kind)) {
        Ok(converted)
    } else {
        Err(mismatch(kind.name()))
    }
}

fn well_known(known: WellKnownType, message: &DynamicMessage) -> Result<ModelValue, Error> {
    let out_of_range = |expected: &'static str| {
        Error::from(ValidationError::single(Violation::new(
            "",
            ViolationKind::OutOfRange { expected },
            format!("{} is outside the {expected} range", message.descriptor().full_name()),
        )))
    };
    match known {
        WellKnownType::Timestamp => {
            let proto: prost_types::Timestamp =
                message.transcode_to().map_err(|err| invalid(err.to_string()))?;
            wkt::timestamp_from_parts(proto.seconds, proto.nanos)
                .map(ModelValue::Timestamp)
                .ok_or_else(|| out_of_range("timestamp"))
        }
        WellKnownType::Duration => {
            let proto: prost_types::Duration =
                message.transcode_to().map_err(|err| invalid(err.to_string()))?;
            wkt::duration_from_parts(proto.seconds, proto.nanos)
                .map(ModelValue::Duration)
                .ok_or_else(|| out_of_range("duration"))
        }
        WellKnownType::FieldMask => {
            let proto: prost_types::FieldMask =
                message.transcode_to().map_err(|err| invalid(err.to_string()))?;
            Ok(ModelValue::FieldMask(proto.paths))
        }
        // A Value with no kind set reads as null.
        WellKnownType::Value if message.fields().next().is_none() => {
            Ok(ModelValue::Json(serde_json::Value::Null))
        }
        WellKnownType::Struct | WellKnownType::Value | WellKnownType::ListValue => {
            serde_json::to_value(message)
                .map(ModelValue::Json)
                .map_err(|err| invalid(err.to_string()))
        }
        WellKnownType::Wrapper(kind) => {
            let inner = message
                .get_field_by_name("value")
                .ok_or_else(|| mismatch(kind.name()))?;
            scalar(kind, &inner)
        }
    }
}

fn missing_field(descriptor: &MessageDescriptor, number: u32) -> Error {
    CompilationError::resolution(format!(
        "{} has no field number {number}",
        descriptor.full_name()
    ))
    .into()
}

fn mismatch(expected: &'static str) -> Error {
    ValidationError::single(Violation::new(
        "",
        ViolationKind::TypeMismatch { expected },
        format!("expected {expected}"),
    ))
    .into()
}

fn invalid(message: String) -> Error {
    ValidationError::single(Violation::new("", ViolationKind::InvalidValue, message)).into()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use prost_model_types::{DESCRIPTOR_POOL, FIXTURE_PACKAGE};
    use proptest::prelude::*;
    use serde_json::json;

    use crate::compiler::{CompiledModel, Compiler};
    use crate::config::CompilerOption;
    use crate::error::Error;
    use crate::model::ModelValue;
    use crate::violation::ViolationKind;

    fn compile_with(name: &str, options: &[CompilerOption]) -> CompiledModel {
        Compiler::with_options(options)
            .compile_by_name(&DESCRIPTOR_POOL, &format!("{FIXTURE_PACKAGE}.{name}"))
            .expect("compiles")
    }

    fn compile(name: &str) -> CompiledModel {
        compile_with(name, &[])
    }

    fn round_trip(compiled: &CompiledModel, input: &serde_json::Value) -> serde_json::Value {
        let model = compiled.from_json(input).expect("valid json");
        let bytes = model.encode_to_vec().expect("encodes");
        let decoded = compiled.decode(&bytes).expect("decodes");
        assert_eq!(decoded, model);
        decoded.to_json()
    }

    #[test]
    fn scalar_extremes_survive_the_wire() {
        let scalars = compile("Scalars");
        let output = round_trip(
            &scalars,
            &json!({
                "int32_field": i32::MIN,
                "uint64_field": u64::MAX,
                "sint64_field": i64::MIN,
                "double_field": "-Infinity",
                "bytes_field": "AAEC",
                "string_field": "héllo",
            }),
        );
        assert_eq!(output["int32_field"], json!(i32::MIN));
        assert_eq!(output["uint64_field"], json!(u64::MAX));
        assert_eq!(output["bytes_field"], json!("AAEC"));
    }

    #[test]
    fn presence_survives_the_wire() {
        let optionals = compile("Optionals");
        assert_eq!(round_trip(&optionals, &json!({"count": 0})), json!({"count": 0}));
        assert_eq!(round_trip(&optionals, &json!({})), json!({}));
        assert_eq!(
            round_trip(&optionals, &json!({"scalars": {}}))["scalars"]["int32_field"],
            json!(0)
        );

        let choice = compile_with("Choice", &[CompilerOption::DiscriminatedUnions]);
        assert_eq!(round_trip(&choice, &json!({"yy": 0})), json!({"yy": 0}));
        assert_eq!(round_trip(&choice, &json!({})), json!({}));
    }

    #[test]
    fn well_known_types_transcode() {
        let well_known = compile("WellKnown");
        let input = json!({
            "created_at": "2024-05-01T12:00:00.000001Z",
            "timeout": "-1.500s",
            "attributes": {"a": [1.0, null, "s"], "b": {"c": true}},
            "dynamic": "text",
            "mask": "createdAt",
            "maybe_count": 0,
            "maybe_flag": false,
            "entries": [1.0],
            "maybe_big": 18_446_744_073_709_551_615_u64,
        });
        let output = round_trip(&well_known, &input);
        assert_eq!(output["timeout"], json!("-1.500s"));
        assert_eq!(output["maybe_count"], json!(0));
        assert_eq!(output["maybe_flag"], json!(false));
        assert_eq!(output["attributes"], input["attributes"]);
        assert!(output.get("maybe_name").is_none());
    }

    #[test]
    fn maps_lists_and_open_enums_survive_the_wire() {
        let collections = compile("Collections");
        let output = round_trip(
            &collections,
            &json!({
                "counts": {"b": 2, "a": 1},
                "labels": {"-1": "neg"},
                "flagged": {"false": {"string_field": "f"}},
                "items": [{"bool_field": true}, {}],
            }),
        );
        assert_eq!(output["counts"], json!({"a": 1, "b": 2}));
        assert_eq!(output["items"][0]["bool_field"], json!(true));

        let palette = compile("Palette");
        let output = round_trip(&palette, &json!({"primary": 7, "others": ["COLOR_RED", 42]}));
        assert_eq!(output, json!({"primary": 7, "others": ["COLOR_RED", 42]}));
    }

    #[test]
    fn legacy_defaults_come_back_from_an_empty_message() {
        let legacy = compile("Legacy");
        let model = legacy.decode(&[]).expect("decodes");
        assert_eq!(model.get("retries"), Some(&ModelValue::I32(3)));
        assert_eq!(model.get("mode"), Some(&ModelValue::String("fast".into())));
        assert_eq!(model.get("blob"), Some(&ModelValue::Bytes(vec![0x01, 0xff])));
        assert_eq!(model, legacy.new_model());
    }

    #[test]
    fn foreign_messages_and_garbage_bytes_are_rejected() {
        let scalars = compile("Scalars");
        let other = compile("Optionals").new_model().to_dynamic_message().expect("encodes");
        let Err(Error::Validation(ve)) = scalars.from_dynamic_message(&other) else {
            panic!("foreign message must be rejected");
        };
        assert_eq!(ve.violations[0].kind(), &ViolationKind::TypeMismatch { expected: "message" });

        let Err(Error::Validation(ve)) = scalars.decode(&[0xff, 0xff, 0xff]) else {
            panic!("garbage must be rejected");
        };
        assert_eq!(ve.violations[0].kind(), &ViolationKind::InvalidValue);
    }

    #[test]
    fn nan_survives_json_text_and_the_wire() {
        let scalars = compile("Scalars");
        let model = scalars
            .from_json(&json!({"float_field": "NaN", "double_field": "NaN"}))
            .expect("valid json");
        let text = model.to_json().to_string();
        let json: serde_json::Value = serde_json::from_str(&text).expect("valid text");
        assert_eq!(json["float_field"], json!("NaN"));
        assert_eq!(json["double_field"], json!("NaN"));

        let reparsed = scalars.from_json(&json).expect("valid json");
        let bytes = reparsed.encode_to_vec().expect("encodes");
        let decoded = scalars.decode(&bytes).expect("decodes");
        let Some(ModelValue::F32(float)) = decoded.get("float_field") else {
            panic!("float_field must hold an f32");
        };
        let Some(ModelValue::F64(double)) = decoded.get("double_field") else {
            panic!("double_field must hold an f64");
        };
        assert!(float.is_nan());
        assert!(double.is_nan());
    }

    #[test]
    fn unusual_map_keys_and_long_lists_survive() {
        let collections = compile("Collections");
        let names: Vec<String> = (0..5_000).map(|i| format!("n{}", i % 7)).collect();
        let ratios: Vec<f64> = (0..5_000).map(|i| f64::from(i % 3) * 0.25).collect();
        let input = json!({
            "counts": {"": 1, "ключ": 2, " ": 3, "\t\n": 4, "🦀 x": 5},
            "names": names,
            "ratios": ratios,
        });
        let model = collections.from_json(&input).expect("valid json");
        let output = round_trip(&collections, &input);
        assert_eq!(output["counts"], input["counts"]);
        assert_eq!(output["names"], input["names"]);
        assert_eq!(output["ratios"], input["ratios"]);
        assert_eq!(model.to_json()["names"], input["names"]);
    }

    proptest! {
        #[test]
        fn collections_survive_json_text_and_the_wire(
            names in prop::collection::vec("[ab ]{0,2}", 0..200),
            ratios in prop::collection::vec(-1.0e12_f64..1.0e12, 0..200),
            counts in prop::collection::vec(("(\\PC|[\t\n]){0,4}", any::<i32>()), 0..16),
        ) {
            let collections = compile("Collections");
            let counts: serde_json::Map<String, serde_json::Value> =
                counts.into_iter().map(|(k, v)| (k, json!(v))).collect();
            let input = json!({"names": names, "ratios": ratios, "counts": counts});

            let model = collections.from_json(&input).expect("valid json");
            let text = model.to_json().to_string();
            let json: serde_json::Value = serde_json::from_str(&text).expect("valid text");
            prop_assert_eq!(&json["names"], &input["names"]);
            prop_assert_eq!(&json["ratios"], &input["ratios"]);
            prop_assert_eq!(&json["counts"], &input["counts"]);
            prop_assert_eq!(collections.from_json(&json).expect("valid json"), model.clone());

            let bytes = model.encode_to_vec().expect("encodes");
            prop_assert_eq!(collections.decode(&bytes).expect("decodes"), model);
        }

        #[test]
        fn numeric_fields_survive_the_wire(
            a in any::<i32>(),
            b in any::<i64>(),
            c in any::<u32>(),
            d in any::<u64>(),
            e in -1.0e300_f64..1.0e300,
        ) {
            let scalars = compile("Scalars");
            let mut model = scalars.new_model();
            model.set("sfixed32_field", ModelValue::I32(a)).expect("conforms");
            model.set("sint64_field", ModelValue::I64(b)).expect("conforms");
            model.set("fixed32_field", ModelValue::U32(c)).expect("conforms");
            model.set("fixed64_field", ModelValue::U64(d)).expect("conforms");
            model.set("double_field", ModelValue::F64(e)).expect("conforms");
            let bytes = model.encode_to_vec().expect("encodes");
            prop_assert_eq!(scalars.decode(&bytes).expect("decodes"), model);
        }
    }
}
