//! JSON form of models.
//!
//! 32-bit integers are numbers. 64-bit integers are written as numbers and
//! read from numbers or decimal strings. Floats accept `"NaN"`,
//! `"Infinity"` and `"-Infinity"`. Bytes are standard padded base64 and
//! URL-safe input is accepted. Enums are read by name or number and written
//! per the schema's [`EnumRepr`](crate::EnumRepr).

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use convert_case::{Case, Casing};
use serde_json::{Map, Number, Value};
use tracing::trace;

use super::adapter::{tag, take_flat_member, untag};
use super::value::{MapKey, ModelValue};
use super::wkt;
use super::Model;
use crate::compiler::CompiledModel;
use crate::config::{EnumRepr, ModelConfig, ParseConfig, UnknownFields};
use crate::error::{CompilationError, Error, ValidationError, merge_violations, prepend_path};
use crate::schema::{
    EnumSchema, FieldRecord, Presence, ScalarKind, SchemaRef, ValueType, WellKnownType,
};
use crate::violation::{Violation, ViolationKind};

/// Fold `result` into `acc`. Returns `Err` when decoding must stop now.
fn collect(
    acc: &mut Option<Error>,
    result: Result<(), Error>,
    fail_fast: bool,
) -> Result<(), Error> {
    let (cont, next) = merge_violations(acc.take(), result, fail_fast);
    if cont {
        *acc = next;
        Ok(())
    } else {
        next.map_or(Ok(()), Err)
    }
}

pub(crate) fn decode_message(
    compiled: &CompiledModel,
    value: &Value,
    cfg: ParseConfig,
) -> Result<Model, Error> {
    let schema = compiled.schema();
    let Value::Object(object) = value else {
        return Err(mismatch("object", value));
    };

    let mut model = Model::new(compiled);
    let mut acc = None;
    let mut members = Vec::new();
    let mut input = match &schema.adapter {
        Some(adapter) => {
            let mut tagged = adapter.restructure(schema, object)?;
            for group in schema.oneof_groups.values() {
                if let Some(member) = tagged.remove(&group.name).and_then(|v| untag(group, v)) {
                    members.push(member);
                }
            }
            tagged
        }
        None => {
            let mut flat = object.clone();
            for group in schema.oneof_groups.values() {
                match take_flat_member(group, &mut flat) {
                    Ok(Some(member)) => members.push(member),
                    Ok(None) => {}
                    Err(err) => collect(&mut acc, Err(err), cfg.fail_fast)?,
                }
            }
            flat
        }
    };

    for (index, field) in schema.fields.iter().enumerate() {
        if field.oneof_group.is_some() {
            continue;
        }
        let Some(raw) = take_field_key(field, schema.config.populate_by_name, &mut input) else {
            continue;
        };
        let result = decode_into(&mut model, index, field, &raw, compiled, cfg);
        collect(&mut acc, prepend_path(result, &field.name), cfg.fail_fast)?;
    }

    for (member, raw) in members {
        let Some(index) = schema.field_index(&member) else {
            continue;
        };
        let field = &schema.fields[index];
        let result = decode_into(&mut model, index, field, &raw, compiled, cfg);
        collect(&mut acc, prepend_path(result, &field.name), cfg.fail_fast)?;
    }

    if cfg.forbid_unknown || schema.config.unknown_fields == UnknownFields::Forbid {
        for key in input.keys() {
            let violation = Violation::new(
                key.clone(),
                ViolationKind::UnknownField,
                format!("`{key}` is not a field of {}", schema.full_name),
            );
            collect(&mut acc, Err(ValidationError::single(violation).into()), cfg.fail_fast)?;
        }
    } else if !input.is_empty() {
        trace!(message = %schema.full_name, ignored = input.len(), "ignored unknown keys");
    }

    for group in schema.oneof_groups.values() {
        if group.required && model.which_oneof(&group.name).is_none() {
            let violation = Violation::new(
                group.name.clone(),
                ViolationKind::RequiredOneofMissing {
                    group: group.name.clone(),
                },
                format!("exactly one member of oneof `{}` is required", group.name),
            );
            collect(&mut acc, Err(ValidationError::single(violation).into()), cfg.fail_fast)?;
        }
    }

    acc.map_or(Ok(model), Err)
}

fn take_field_key(
    field: &FieldRecord,
    populate_by_name: bool,
    input: &mut Map<String, Value>,
) -> Option<Value> {
    let by_alias = input.remove(&field.alias);
    let by_name = (populate_by_name && field.name != field.alias)
        .then(|| input.remove(&field.name))
        .flatten();
    by_alias.or(by_name)
}

fn decode_into(
    model: &mut Model,
    index: usize,
    field: &FieldRecord,
    raw: &Value,
    compiled: &CompiledModel,
    cfg: ParseConfig,
) -> Result<(), Error> {
    let null_is_value = matches!(field.value_type, ValueType::WellKnown(WellKnownType::Value));
    if raw.is_null() && !null_is_value {
        if field.presence != Presence::Implicit {
            *model.slot_mut(index) = None;
        }
        return Ok(());
    }
    let value = decode_value(raw, &field.value_type, compiled, cfg)?;
    *model.slot_mut(index) = Some(value);
    Ok(())
}

pub(crate) fn decode_value(
    value: &Value,
    ty: &ValueType,
    compiled: &CompiledModel,
    cfg: ParseConfig,
) -> Result<ModelValue, Error> {
    match ty {
        ValueType::Scalar(kind) | ValueType::WellKnown(WellKnownType::Wrapper(kind)) => {
            decode_scalar(*kind, value)
        }
        ValueType::Enum(schema) => decode_enum(schema, value),
        ValueType::Message(reference) => {
            let target = compiled.resolve(reference).ok_or_else(|| unresolved(reference))?;
            decode_message(&target, value, cfg).map(|m| ModelValue::Message(Box::new(m)))
        }
        ValueType::WellKnown(known) => decode_well_known(*known, value),
        ValueType::List(element) => {
            let Value::Array(items) = value else {
                return Err(mismatch("list", value));
            };
            let mut acc = None;
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                match decode_value(item, element, compiled, cfg) {
                    Ok(v) => out.push(v),
                    Err(err) => {
                        let result = prepend_path(Err(err), &format!("[{i}]"));
                        collect(&mut acc, result, cfg.fail_fast)?;
                    }
                }
            }
            acc.map_or(Ok(ModelValue::List(out)), Err)
        }
        ValueType::Map { key, value: element } => {
            let Value::Object(entries) = value else {
                return Err(mismatch("map", value));
            };
            let mut acc = None;
            let mut out = indexmap::IndexMap::with_capacity(entries.len());
            for (k, v) in entries {
                let segment = format!("[{k:?}]");
                let Some(map_key) = MapKey::parse(*key, k) else {
                    let err = invalid(format!("`{k}` is not a valid {} map key", key.name()));
                    collect(&mut acc, prepend_path(Err(err), &segment), cfg.fail_fast)?;
                    continue;
                };
                match decode_value(v, element, compiled, cfg) {
                    Ok(v) => {
                        out.insert(map_key, v);
                    }
                    Err(err) => collect(&mut acc, prepend_path(Err(err), &segment), cfg.fail_fast)?,
                }
            }
            acc.map_or(Ok(ModelValue::Map(out)), Err)
        }
    }
}

fn decode_scalar(kind: ScalarKind, value: &Value) -> Result<ModelValue, Error> {
    let out_of_range = || {
        Error::from(ValidationError::single(Violation::new(
            "",
            ViolationKind::OutOfRange {
                expected: kind.name(),
            },
            format!("{value} does not fit in {}", kind.name()),
        )))
    };
    match kind {
        ScalarKind::Bool => value
            .as_bool()
            .map(ModelValue::Bool)
            .ok_or_else(|| mismatch(kind.name(), value)),
        ScalarKind::String => value
            .as_str()
            .map(|s| ModelValue::String(s.to_string()))
            .ok_or_else(|| mismatch(kind.name(), value)),
        ScalarKind::Bytes => {
            let text = value.as_str().ok_or_else(|| mismatch(kind.name(), value))?;
            decode_base64(text)
                .map(ModelValue::Bytes)
                .ok_or_else(|| invalid(format!("`{text}` is not valid base64")))
        }
        ScalarKind::Double => parse_float(kind, value).map(ModelValue::F64),
        ScalarKind::Float => {
            let wide = parse_float(kind, value)?;
            if wide.is_finite() && wide.abs() > f64::from(f32::MAX) {
                return Err(out_of_range());
            }
            #[allow(clippy::cast_possible_truncation)]
            let narrow = wide as f32;
            Ok(ModelValue::F32(narrow))
        }
        ScalarKind::Int32 | ScalarKind::Sint32 | ScalarKind::Sfixed32 => {
            i32::try_from(parse_integer(kind, value)?)
                .map(ModelValue::I32)
                .map_err(|_| out_of_range())
        }
        ScalarKind::Int64 | ScalarKind::Sint64 | ScalarKind::Sfixed64 => {
            i64::try_from(parse_integer(kind, value)?)
                .map(ModelValue::I64)
                .map_err(|_| out_of_range())
        }
        ScalarKind::Uint32 | ScalarKind::Fixed32 => u32::try_from(parse_integer(kind, value)?)
            .map(ModelValue::U32)
            .map_err(|_| out_of_range()),
        ScalarKind::Uint64 | ScalarKind::Fixed64 => u64::try_from(parse_integer(kind, value)?)
            .map(ModelValue::U64)
            .map_err(|_| out_of_range()),
    }
}

/// Integer from a JSON number or decimal string. Integral floats such as
/// `1e3` are accepted.
fn parse_integer(kind: ScalarKind, value: &Value) -> Result<i128, Error> {
    let not_integer = || invalid(format!("{value} is not an integer"));
    let from_float = |f: f64| {
        if f.is_finite() && f.fract() == 0.0 {
            #[allow(clippy::cast_possible_truncation)]
            let whole = f as i128;
            Ok(whole)
        } else {
            Err(not_integer())
        }
    };
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i.into())
            } else if let Some(u) = n.as_u64() {
                Ok(u.into())
            } else {
                n.as_f64().map_or_else(|| Err(not_integer()), from_float)
            }
        }
        Value::String(s) => match s.parse::<i128>() {
            Ok(i) => Ok(i),
            Err(_) => s.parse::<f64>().map_or_else(|_| Err(not_integer()), from_float),
        },
        _ => Err(mismatch(kind.name(), value)),
    }
}

fn parse_float(kind: ScalarKind, value: &Value) -> Result<f64, Error> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| mismatch(kind.name(), value)),
        Value::String(s) => match s.as_str() {
            "NaN" => Ok(f64::NAN),
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            text => text
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .ok_or_else(|| invalid(format!("`{text}` is not a number"))),
        },
        _ => Err(mismatch(kind.name(), value)),
    }
}

fn decode_base64(text: &str) -> Option<Vec<u8>> {
    [STANDARD, URL_SAFE, STANDARD_NO_PAD, URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(text).ok())
}

fn decode_enum(schema: &EnumSchema, value: &Value) -> Result<ModelValue, Error> {
    match value {
        Value::String(name) => schema.number_of(name).map(ModelValue::Enum).ok_or_else(|| {
            invalid(format!("`{name}` is not a value of {}", schema.full_name))
        }),
        Value::Number(_) => {
            let number = parse_integer(ScalarKind::Int32, value)?;
            i32::try_from(number).map(ModelValue::Enum).map_err(|_| {
                ValidationError::single(Violation::new(
                    "",
                    ViolationKind::OutOfRange { expected: "enum" },
                    format!("{value} does not fit in an enum number"),
                ))
                .into()
            })
        }
        _ => Err(mismatch("enum", value)),
    }
}

fn decode_well_known(known: WellKnownType, value: &Value) -> Result<ModelValue, Error> {
    let text = || value.as_str().ok_or_else(|| mismatch("string", value));
    match known {
        WellKnownType::Timestamp => wkt::parse_timestamp(text()?)
            .map(ModelValue::Timestamp)
            .map_err(invalid),
        WellKnownType::Duration => wkt::parse_duration(text()?)
            .map(ModelValue::Duration)
            .map_err(invalid),
        WellKnownType::FieldMask => Ok(ModelValue::FieldMask(
            text()?
                .split(',')
                .filter(|path| !path.is_empty())
                .map(|path| convert_path(path, Case::Camel, Case::Snake))
                .collect(),
        )),
        WellKnownType::Struct if value.is_object() => Ok(ModelValue::Json(value.clone())),
        WellKnownType::Struct => Err(mismatch("object", value)),
        WellKnownType::ListValue if value.is_array() => Ok(ModelValue::Json(value.clone())),
        WellKnownType::ListValue => Err(mismatch("array", value)),
        WellKnownType::Value => Ok(ModelValue::Json(value.clone())),
        WellKnownType::Wrapper(kind) => decode_scalar(kind, value),
    }
}

fn convert_path(path: &str, from: Case, to: Case) -> String {
    path.split('.')
        .map(|segment| segment.from_case(from).to_case(to))
        .collect::<Vec<_>>()
        .join(".")
}

pub(crate) fn encode_message(model: &Model) -> Value {
    let schema = model.schema();
    let mut out = Map::new();
    for (field, slot) in schema.fields.iter().zip(model.slots()) {
        let Some(value) = slot else {
            continue;
        };
        let json = encode_value(value, &field.value_type, &schema.config);
        let group = schema
            .adapter
            .and(field.oneof_group.as_deref())
            .and_then(|name| schema.oneof(name));
        match group {
            Some(group) => {
                out.insert(group.name.clone(), tag(group, &field.name, json));
            }
            None => {
                out.insert(field.alias.clone(), json);
            }
        }
    }
    match &schema.adapter {
        Some(adapter) => Value::Object(adapter.flatten(schema, out)),
        None => Value::Object(out),
    }
}

fn encode_value(value: &ModelValue, ty: &ValueType, config: &ModelConfig) -> Value {
    match value {
        ModelValue::Bool(v) => Value::Bool(*v),
        ModelValue::I32(v) => Value::from(*v),
        ModelValue::I64(v) => Value::from(*v),
        ModelValue::U32(v) => Value::from(*v),
        ModelValue::U64(v) => Value::from(*v),
        ModelValue::F32(v) => {
            // Shortest decimal form of the f32, not of its widened f64.
            encode_float(v.to_string().parse().unwrap_or_else(|_| f64::from(*v)))
        }
        ModelValue::F64(v) => encode_float(*v),
        ModelValue::String(v) => Value::String(v.clone()),
        ModelValue::Bytes(v) => Value::String(STANDARD.encode(v)),
        ModelValue::Enum(number) => match (config.enum_repr, ty) {
            (EnumRepr::Name, ValueType::Enum(schema)) => schema
                .name_of(*number)
                .map_or_else(|| Value::from(*number), |name| Value::String(name.to_string())),
            _ => Value::from(*number),
        },
        ModelValue::Message(model) => encode_message(model),
        ModelValue::Timestamp(v) => Value::String(wkt::format_timestamp(*v)),
        ModelValue::Duration(v) => Value::String(wkt::format_duration(*v)),
        ModelValue::FieldMask(paths) => Value::String(
            paths
                .iter()
                .map(|path| convert_path(path, Case::Snake, Case::Camel))
                .collect::<Vec<_>>()
                .join(","),
        ),
        ModelValue::Json(v) => v.clone(),
        ModelValue::List(items) => {
            let element = match ty {
                ValueType::List(element) => element.as_ref(),
                other => other,
            };
            Value::Array(items.iter().map(|item| encode_value(item, element, config)).collect())
        }
        ModelValue::Map(entries) => {
            let element = match ty {
                ValueType::Map { value, .. } => value.as_ref(),
                other => other,
            };
            Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), encode_value(v, element, config)))
                    .collect(),
            )
        }
    }
}

fn encode_float(value: f64) -> Value {
    Number::from_f64(value).map_or_else(
        || {
            let text = if value.is_nan() {
                "NaN"
            } else if value > 0.0 {
                "Infinity"
            } else {
                "-Infinity"
            };
            Value::String(text.to_string())
        },
        Value::Number,
    )
}

fn mismatch(expected: &'static str, value: &Value) -> Error {
    let found = match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    ValidationError::single(Violation::new(
        "",
        ViolationKind::TypeMismatch { expected },
        format!("expected {expected}, found {found}"),
    ))
    .into()
}

fn invalid(message: String) -> Error {
    ValidationError::single(Violation::new("", ViolationKind::InvalidValue, message)).into()
}

fn unresolved(reference: &SchemaRef) -> Error {
    CompilationError::resolution(format!("{} is not in the registry", reference.full_name)).into()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use prost_model_types::{DESCRIPTOR_POOL, FIXTURE_PACKAGE};
    use proptest::prelude::*;
    use serde_json::json;

    use crate::compiler::{CompiledModel, Compiler};
    use crate::config::{CompilerOption, EnumRepr, ModelConfig, ParseOption};
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

    fn violations(err: Error) -> Vec<(String, ViolationKind)> {
        match err {
            Error::Validation(ve) => ve
                .violations
                .iter()
                .map(|v| (v.field_path().to_string(), v.kind().clone()))
                .collect(),
            Error::Compilation(err) => panic!("unexpected compilation error: {err}"),
        }
    }

    #[test]
    fn integer_extremes_round_trip() {
        let scalars = compile("Scalars");
        let input = json!({
            "int32_field": i32::MIN,
            "int64_field": "-9223372036854775808",
            "uint32_field": u32::MAX,
            "uint64_field": u64::MAX,
            "sfixed64_field": i64::MAX,
            "fixed64_field": "18446744073709551615",
        });
        let model = scalars.from_json(&input).expect("valid");
        assert_eq!(model.get("int32_field"), Some(&ModelValue::I32(i32::MIN)));
        assert_eq!(model.get("int64_field"), Some(&ModelValue::I64(i64::MIN)));
        assert_eq!(model.get("uint64_field"), Some(&ModelValue::U64(u64::MAX)));
        assert_eq!(model.get("fixed64_field"), Some(&ModelValue::U64(u64::MAX)));

        let output = model.to_json();
        assert_eq!(output["int32_field"], json!(-2_147_483_648));
        assert_eq!(output["int64_field"], json!(i64::MIN));
        assert_eq!(output["uint64_field"], json!(18_446_744_073_709_551_615_u64));
        assert_eq!(scalars.from_json(&output).expect("valid"), model);
    }

    #[test]
    fn thirty_two_bit_range_is_enforced() {
        let scalars = compile("Scalars");
        let err = scalars
            .from_json(&json!({"int32_field": 2_147_483_648_i64, "uint32_field": -1}))
            .expect_err("out of range");
        assert_eq!(
            violations(err),
            vec![
                ("int32_field".to_string(), ViolationKind::OutOfRange { expected: "int32" }),
                ("uint32_field".to_string(), ViolationKind::OutOfRange { expected: "uint32" }),
            ]
        );
    }

    #[test]
    fn fail_fast_stops_at_the_first_violation() {
        let scalars = compile("Scalars");
        let input = json!({"int32_field": "x", "bool_field": 1});
        let err = scalars
            .from_json_with(&input, &[ParseOption::FailFast])
            .expect_err("invalid");
        assert_eq!(violations(err).len(), 1);
        let err = scalars.from_json(&input).expect_err("invalid");
        assert_eq!(
            violations(err),
            vec![
                ("int32_field".to_string(), ViolationKind::InvalidValue),
                ("bool_field".to_string(), ViolationKind::TypeMismatch { expected: "bool" }),
            ]
        );
    }

    #[test]
    fn special_floats_and_bytes_use_string_forms() {
        let scalars = compile("Scalars");
        let model = scalars
            .from_json(&json!({
                "double_field": "NaN",
                "float_field": "-Infinity",
                "bytes_field": "-_8=",
            }))
            .expect("valid");
        assert!(matches!(model.get("double_field"), Some(ModelValue::F64(v)) if v.is_nan()));
        assert_eq!(model.get("bytes_field"), Some(&ModelValue::Bytes(vec![0xfb, 0xff])));

        let output = model.to_json();
        assert_eq!(output["double_field"], json!("NaN"));
        assert_eq!(output["float_field"], json!("-Infinity"));
        assert_eq!(output["bytes_field"], json!("+/8="));

        let err = scalars
            .from_json(&json!({"float_field": 1e39}))
            .expect_err("too large for f32");
        assert_eq!(
            violations(err),
            vec![("float_field".to_string(), ViolationKind::OutOfRange { expected: "float" })]
        );
    }

    #[test]
    fn flat_oneof_member_round_trips_without_tag_keys() {
        let choice = compile_with("Choice", &[CompilerOption::DiscriminatedUnions]);
        let model = choice.from_json(&json!({"x": "hello"})).expect("valid");
        assert_eq!(model.get("x"), Some(&ModelValue::String("hello".into())));
        assert_eq!(model.get("y"), None);
        assert_eq!(model.which_oneof("value"), Some("x"));
        assert_eq!(
            serde_json::to_string(&model.to_json()).expect("serializes"),
            r#"{"x":"hello"}"#
        );
    }

    #[test]
    fn two_members_of_one_group_are_rejected() {
        for options in [&[CompilerOption::DiscriminatedUnions][..], &[][..]] {
            let choice = compile_with("Choice", options);
            let err = choice
                .from_json(&json!({"x": "hello", "yy": 5}))
                .expect_err("two members");
            assert_eq!(
                violations(err),
                vec![(
                    "value".to_string(),
                    ViolationKind::MultipleOneofMembersSet {
                        group: "value".into(),
                        members: vec!["x".into(), "y".into()],
                    }
                )]
            );
        }
    }

    #[test]
    fn aliases_resolve_to_the_canonical_member() {
        let choice = compile_with("Choice", &[CompilerOption::DiscriminatedUnions]);
        let model = choice.from_json(&json!({"yy": 5})).expect("valid");
        assert_eq!(model.get("y"), Some(&ModelValue::I64(5)));
        assert_eq!(model.to_json(), json!({"yy": 5}));

        let err = choice
            .from_json(&json!({"y": 1, "yy": 2}))
            .expect_err("duplicate alias");
        assert_eq!(
            violations(err),
            vec![(
                "y".to_string(),
                ViolationKind::DuplicateOneofAlias {
                    member: "y".into(),
                    aliases: vec!["y".into(), "yy".into()],
                }
            )]
        );
    }

    #[test]
    fn populate_by_name_off_only_accepts_aliases() {
        let choice = compile_with(
            "Choice",
            &[
                CompilerOption::DiscriminatedUnions,
                CompilerOption::Model(ModelConfig {
                    populate_by_name: false,
                    ..ModelConfig::default()
                }),
            ],
        );
        let model = choice.from_json(&json!({"y": 1})).expect("unknown keys are ignored");
        assert_eq!(model.which_oneof("value"), None);
    }

    #[test]
    fn required_oneof_must_have_a_member() {
        let required = compile("RequiredChoice");
        let err = required.from_json(&json!({"note": "n"})).expect_err("missing");
        assert_eq!(
            violations(err),
            vec![(
                "kind".to_string(),
                ViolationKind::RequiredOneofMissing { group: "kind".into() }
            )]
        );
        let model = required.from_json(&json!({"flag": false})).expect("valid");
        assert_eq!(model.which_oneof("kind"), Some("flag"));
        assert_eq!(model.to_json(), json!({"flag": false, "note": ""}));
    }

    #[test]
    fn durations_timestamps_and_masks_use_text_forms() {
        let well_known = compile("WellKnown");
        let input = json!({
            "created_at": "2024-05-01T12:00:00.5Z",
            "timeout": "1.5s",
            "mask": "createdAt,maybeCount.value",
            "attributes": {"a": [1, null]},
            "dynamic": null,
            "maybe_count": 7,
            "maybe_name": null,
            "entries": [true, "x"],
            "maybe_big": "18446744073709551615",
        });
        let model = well_known.from_json(&input).expect("valid");
        assert_eq!(
            model.get("mask"),
            Some(&ModelValue::FieldMask(vec![
                "created_at".into(),
                "maybe_count.value".into()
            ]))
        );
        assert!(!model.has("maybe_name"));

        let output = model.to_json();
        assert_eq!(output["timeout"], json!("1.500s"));
        assert_eq!(output["created_at"], json!("2024-05-01T12:00:00.500Z"));
        assert_eq!(output["mask"], json!("createdAt,maybeCount.value"));
        assert_eq!(output["dynamic"], json!(null));
        assert_eq!(output["maybe_count"], json!(7));
        assert_eq!(output["maybe_big"], json!(u64::MAX));
        assert!(output.get("maybe_name").is_none());
        assert!(output.get("maybe_flag").is_none());
        assert_eq!(well_known.from_json(&output).expect("valid"), model);

        let err = well_known
            .from_json(&json!({"timeout": "1.5", "attributes": []}))
            .expect_err("invalid");
        assert_eq!(
            violations(err),
            vec![
                ("timeout".to_string(), ViolationKind::InvalidValue),
                ("attributes".to_string(), ViolationKind::TypeMismatch { expected: "object" }),
            ]
        );
    }

    #[test]
    fn collections_decode_keys_and_report_element_paths() {
        let collections = compile("Collections");
        let model = collections
            .from_json(&json!({
                "numbers": [1, "2"],
                "counts": {"a": 1},
                "labels": {"-5": "neg"},
                "flagged": {"true": {"bool_field": true}},
                "ratios": [0.5, "Infinity"],
            }))
            .expect("valid");
        let output = model.to_json();
        assert_eq!(output["numbers"], json!([1, 2]));
        assert_eq!(output["labels"], json!({"-5": "neg"}));
        assert_eq!(output["flagged"]["true"]["bool_field"], json!(true));
        assert_eq!(output["ratios"], json!([0.5, "Infinity"]));
        assert_eq!(output["names"], json!([]));

        let err = collections
            .from_json(&json!({"numbers": [1, true], "labels": {"x": "bad"}}))
            .expect_err("invalid");
        assert_eq!(
            violations(err),
            vec![
                ("numbers[1]".to_string(), ViolationKind::TypeMismatch { expected: "int32" }),
                (r#"labels["x"]"#.to_string(), ViolationKind::InvalidValue),
            ]
        );
    }

    #[test]
    fn nested_violation_paths_are_dotted() {
        let collections = compile("Collections");
        let err = collections
            .from_json(&json!({"items": [{}, {"int32_field": "nope"}]}))
            .expect_err("invalid");
        assert_eq!(
            violations(err),
            vec![("items[1].int32_field".to_string(), ViolationKind::InvalidValue)]
        );
    }

    #[test]
    fn enums_are_open_and_follow_the_configured_form() {
        let palette = compile("Palette");
        let model = palette
            .from_json(&json!({"primary": "COLOR_RED", "others": [2, 7]}))
            .expect("valid");
        assert_eq!(model.get("primary"), Some(&ModelValue::Enum(1)));
        assert_eq!(
            model.to_json(),
            json!({"primary": "COLOR_RED", "others": ["COLOR_GREEN", 7]})
        );

        let numeric = compile_with(
            "Palette",
            &[CompilerOption::Model(ModelConfig {
                enum_repr: EnumRepr::Number,
                ..ModelConfig::default()
            })],
        );
        let model = numeric.from_json(&json!({"others": ["COLOR_RED", 9]})).expect("valid");
        assert_eq!(model.to_json(), json!({"primary": 0, "others": [1, 9]}));

        let err = palette.from_json(&json!({"primary": "COLOR_BLUE"})).expect_err("bad name");
        assert_eq!(
            violations(err),
            vec![("primary".to_string(), ViolationKind::InvalidValue)]
        );
    }

    #[test]
    fn unknown_keys_are_ignored_unless_forbidden() {
        let scalars = compile("Scalars");
        assert!(scalars.from_json(&json!({"nope": 1})).is_ok());
        let err = scalars
            .from_json_with(&json!({"nope": 1}), &[ParseOption::ForbidUnknownFields])
            .expect_err("forbidden");
        assert_eq!(violations(err), vec![("nope".to_string(), ViolationKind::UnknownField)]);
        let err = scalars.from_json(&json!([1])).expect_err("not an object");
        assert_eq!(
            violations(err),
            vec![(String::new(), ViolationKind::TypeMismatch { expected: "object" })]
        );
    }

    #[test]
    fn null_resets_optionals_and_keeps_implicit_defaults() {
        let optionals = compile("Optionals");
        let model = optionals
            .from_json(&json!({"count": 0, "label": null}))
            .expect("valid");
        assert!(model.has("count"));
        assert!(!model.has("label"));
        assert!(!model.has("scalars"));
        assert_eq!(model.to_json(), json!({"count": 0}));

        let scalars = compile("Scalars");
        let model = scalars.from_json(&json!({"string_field": null})).expect("valid");
        assert_eq!(model.get("string_field"), Some(&ModelValue::String(String::new())));
    }

    proptest! {
        #[test]
        fn sixty_four_bit_strings_and_numbers_agree(
            value in any::<i64>(),
            unsigned in any::<u64>(),
        ) {
            let scalars = compile("Scalars");
            let from_strings = scalars
                .from_json(&json!({
                    "sint64_field": value.to_string(),
                    "uint64_field": unsigned.to_string(),
                }))
                .expect("valid");
            let from_numbers = scalars
                .from_json(&json!({"sint64_field": value, "uint64_field": unsigned}))
                .expect("valid");
            prop_assert_eq!(from_strings.get("sint64_field"), Some(&ModelValue::I64(value)));
            prop_assert_eq!(from_strings, from_numbers);
        }

        #[test]
        fn bytes_round_trip_through_base64(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let scalars = compile("Scalars");
            let mut model = scalars.new_model();
            model.set("bytes_field", ModelValue::Bytes(bytes.clone())).expect("conforms");
            let back = scalars.from_json(&model.to_json()).expect("valid");
            prop_assert_eq!(back.get("bytes_field"), Some(&ModelValue::Bytes(bytes)));
        }
    }
}
