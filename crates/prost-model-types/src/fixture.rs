use std::sync::LazyLock;

use anyhow::anyhow;
use prost::Message;
use prost_reflect::{DescriptorPool, DynamicMessage, Value};
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::source_code_info::Location;
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto, MessageOptions, OneofDescriptorProto, SourceCodeInfo,
};

/// Package of the fixture messages.
pub const FIXTURE_PACKAGE: &str = "prost_model.fixture";

/// Package of the fixture annotation extensions.
pub const ANNOTATIONS_PACKAGE: &str = "prost_model.annotations";

static DESCRIPTOR_POOL_BUILD: LazyLock<(DescriptorPool, Option<String>)> =
    LazyLock::new(|| match build_fixture_pool() {
        Ok(pool) => (pool, None),
        Err(err) => (DescriptorPool::new(), Some(err.to_string())),
    });

/// Shared pool holding the fixture messages, the annotation extensions and
/// the `google.protobuf` well-known types.
pub static DESCRIPTOR_POOL: LazyLock<DescriptorPool> =
    LazyLock::new(|| DESCRIPTOR_POOL_BUILD.0.clone());

/// Returns the error raised while building [`DESCRIPTOR_POOL`], if any.
#[must_use]
pub fn descriptor_pool_build_error() -> Option<&'static str> {
    DESCRIPTOR_POOL_BUILD.1.as_deref()
}

/// Build a fresh fixture pool.
///
/// Every call returns a pool with its own descriptor identities, so the same
/// message name resolves to distinct descriptors across two calls.
///
/// # Errors
///
/// Returns an error if a fixture file fails descriptor validation.
pub fn build_fixture_pool() -> anyhow::Result<DescriptorPool> {
    let mut pool = DescriptorPool::global();
    pool.add_file_descriptor_proto(annotations_file())?;

    let file_proto = pool
        .get_message_by_name("google.protobuf.FileDescriptorProto")
        .ok_or_else(|| anyhow!("google.protobuf.FileDescriptorProto not found"))?;
    let mut file = DynamicMessage::decode(file_proto, fixture_file().encode_to_vec().as_slice())?;

    let field_opts = field_options(
        &pool,
        &[
            ("title", Value::String("Title".to_string())),
            ("min_len", Value::U32(1)),
        ],
    )?;
    set_options(&mut file, &["Annotated"], "field", "title", field_opts)?;

    let field_opts = field_options(&pool, &[("gt", Value::I64(1))])?;
    set_options(&mut file, &["Annotated"], "field", "amount", field_opts)?;

    let field_opts = field_options(&pool, &[("alias", Value::String("yy".to_string()))])?;
    set_options(&mut file, &["Choice"], "field", "y", field_opts)?;

    let oneof_options = oneof_options(&pool)?;
    set_options(&mut file, &["RequiredChoice"], "oneof_decl", "kind", oneof_options)?;

    pool.decode_file_descriptor_proto(file.encode_to_vec().as_slice())?;
    pool.add_file_descriptor_proto(legacy_file())?;
    Ok(pool)
}

fn field_options(
    pool: &DescriptorPool,
    values: &[(&str, Value)],
) -> anyhow::Result<DynamicMessage> {
    let rules_desc = pool
        .get_message_by_name(&format!("{ANNOTATIONS_PACKAGE}.FieldConstraints"))
        .ok_or_else(|| anyhow!("FieldConstraints not found"))?;
    let mut rules = DynamicMessage::new(rules_desc);
    for (name, value) in values {
        rules.try_set_field_by_name(name, value.clone())?;
    }
    extension_options(pool, "google.protobuf.FieldOptions", "field", rules)
}

fn oneof_options(pool: &DescriptorPool) -> anyhow::Result<DynamicMessage> {
    let rules_desc = pool
        .get_message_by_name(&format!("{ANNOTATIONS_PACKAGE}.OneofConstraints"))
        .ok_or_else(|| anyhow!("OneofConstraints not found"))?;
    let mut rules = DynamicMessage::new(rules_desc);
    rules.try_set_field_by_name("required", Value::Bool(true))?;
    extension_options(pool, "google.protobuf.OneofOptions", "oneof", rules)
}

fn extension_options(
    pool: &DescriptorPool,
    options_name: &str,
    extension_name: &str,
    rules: DynamicMessage,
) -> anyhow::Result<DynamicMessage> {
    let options_desc = pool
        .get_message_by_name(options_name)
        .ok_or_else(|| anyhow!("{options_name} not found"))?;
    let extension = pool
        .get_extension_by_name(&format!("{ANNOTATIONS_PACKAGE}.{extension_name}"))
        .ok_or_else(|| anyhow!("extension {extension_name} not found"))?;
    let mut options = DynamicMessage::new(options_desc);
    options.set_extension(&extension, Value::Message(rules));
    Ok(options)
}

fn set_options(
    file: &mut DynamicMessage,
    message_path: &[&str],
    list_field: &str,
    name: &str,
    options: DynamicMessage,
) -> anyhow::Result<()> {
    let (first, rest) = message_path
        .split_first()
        .ok_or_else(|| anyhow!("empty message path"))?;
    let mut message = find_named_mut(file, "message_type", first)?;
    for nested in rest {
        message = find_named_mut(message, "nested_type", nested)?;
    }
    let target = find_named_mut(message, list_field, name)?;
    target.try_set_field_by_name("options", Value::Message(options))?;
    Ok(())
}

fn find_named_mut<'a>(
    parent: &'a mut DynamicMessage,
    list_field: &str,
    name: &str,
) -> anyhow::Result<&'a mut DynamicMessage> {
    parent
        .get_field_by_name_mut(list_field)
        .and_then(Value::as_list_mut)
        .and_then(|items| {
            items.iter_mut().filter_map(Value::as_message_mut).find(|item| {
                item.get_field_by_name("name")
                    .is_some_and(|n| n.as_str() == Some(name))
            })
        })
        .ok_or_else(|| anyhow!("`{name}` not found in `{list_field}`"))
}

fn annotations_file() -> FileDescriptorProto {
    let field_rules = DescriptorProto {
        name: Some("FieldConstraints".into()),
        field: vec![
            scalar("title", 1, Type::String),
            scalar("alias", 2, Type::String),
            scalar("gt", 3, Type::Int64),
            scalar("lt", 4, Type::Int64),
            scalar("min_len", 5, Type::Uint32),
            scalar("pattern", 6, Type::String),
        ],
        ..Default::default()
    };
    let oneof_rules = DescriptorProto {
        name: Some("OneofConstraints".into()),
        field: vec![scalar("required", 1, Type::Bool)],
        ..Default::default()
    };

    FileDescriptorProto {
        name: Some("prost_model/annotations.proto".into()),
        package: Some(ANNOTATIONS_PACKAGE.into()),
        dependency: vec!["google/protobuf/descriptor.proto".into()],
        message_type: vec![field_rules, oneof_rules],
        extension: vec![
            extension(
                "field",
                50101,
                ".google.protobuf.FieldOptions",
                &format!(".{ANNOTATIONS_PACKAGE}.FieldConstraints"),
            ),
            extension(
                "oneof",
                50102,
                ".google.protobuf.OneofOptions",
                &format!(".{ANNOTATIONS_PACKAGE}.OneofConstraints"),
            ),
        ],
        syntax: Some("proto2".into()),
        ..Default::default()
    }
}

fn fixture_file() -> FileDescriptorProto {
    let messages = vec![
        scalars(),          // 0
        optionals(),        // 1
        choice(),           // 2
        required_choice(),  // 3
        collections(),      // 4
        well_known(),       // 5
        tree_node(),        // 6
        left(),             // 7
        outer(),            // 8
        referrer(),         // 9
        annotated(),        // 10
        right(),            // 11
        linked_node(),      // 12
        palette(),          // 13
        bad_directive(),    // 14
        ping(),             // 15
        pong(),             // 16
    ];

    FileDescriptorProto {
        name: Some("prost_model/fixture.proto".into()),
        package: Some(FIXTURE_PACKAGE.into()),
        dependency: vec![
            "prost_model/annotations.proto".into(),
            "google/protobuf/duration.proto".into(),
            "google/protobuf/field_mask.proto".into(),
            "google/protobuf/struct.proto".into(),
            "google/protobuf/timestamp.proto".into(),
            "google/protobuf/wrappers.proto".into(),
        ],
        message_type: messages,
        enum_type: vec![enumeration(
            "Color",
            &[("COLOR_UNSPECIFIED", 0), ("COLOR_RED", 1), ("COLOR_GREEN", 2)],
        )],
        source_code_info: Some(SourceCodeInfo {
            location: vec![
                comment(&[4, 10, 2, 1], " p2p: {\"gt\": 10, \"example\": 5}\n"),
                comment(
                    &[4, 10, 2, 2],
                    " Unique identifier.\n p2p@default_factory: \"p2p@factory|uuid4\"\n",
                ),
                comment(&[4, 10, 2, 3], " p2p@default: \"p2p@local|GREETING\"\n"),
                comment(&[4, 10, 2, 4], " p2p@default_factory: \"p2p@factory|now\"\n"),
                comment(&[4, 14, 2, 0], " p2p@default: \"p2p@bogus|x\"\n"),
            ],
        }),
        syntax: Some("proto3".into()),
        ..Default::default()
    }
}

fn legacy_file() -> FileDescriptorProto {
    let mut retries = scalar("retries", 1, Type::Int32);
    retries.default_value = Some("3".into());
    let mut mode = scalar("mode", 2, Type::String);
    mode.default_value = Some("fast".into());
    let mut id = scalar("id", 3, Type::String);
    id.label = Some(Label::Required as i32);
    let mut blob = scalar("blob", 4, Type::Bytes);
    blob.default_value = Some("\\001\\377".into());

    FileDescriptorProto {
        name: Some("prost_model/legacy.proto".into()),
        package: Some(FIXTURE_PACKAGE.into()),
        message_type: vec![DescriptorProto {
            name: Some("Legacy".into()),
            field: vec![retries, mode, id, blob],
            ..Default::default()
        }],
        syntax: Some("proto2".into()),
        ..Default::default()
    }
}

fn scalars() -> DescriptorProto {
    message(
        "Scalars",
        vec![
            scalar("double_field", 1, Type::Double),
            scalar("float_field", 2, Type::Float),
            scalar("int32_field", 3, Type::Int32),
            scalar("int64_field", 4, Type::Int64),
            scalar("uint32_field", 5, Type::Uint32),
            scalar("uint64_field", 6, Type::Uint64),
            scalar("sint32_field", 7, Type::Sint32),
            scalar("sint64_field", 8, Type::Sint64),
            scalar("fixed32_field", 9, Type::Fixed32),
            scalar("fixed64_field", 10, Type::Fixed64),
            scalar("sfixed32_field", 11, Type::Sfixed32),
            scalar("sfixed64_field", 12, Type::Sfixed64),
            scalar("bool_field", 13, Type::Bool),
            scalar("string_field", 14, Type::String),
            scalar("bytes_field", 15, Type::Bytes),
        ],
    )
}

fn optionals() -> DescriptorProto {
    DescriptorProto {
        name: Some("Optionals".into()),
        field: vec![
            proto3_optional(scalar("count", 1, Type::Int32), 0),
            proto3_optional(scalar("label", 2, Type::String), 1),
            proto3_optional(message_field("scalars", 3, "Scalars"), 2),
        ],
        oneof_decl: vec![oneof("_count"), oneof("_label"), oneof("_scalars")],
        ..Default::default()
    }
}

fn choice() -> DescriptorProto {
    DescriptorProto {
        name: Some("Choice".into()),
        field: vec![
            in_oneof(scalar("x", 1, Type::String), 0),
            in_oneof(scalar("y", 2, Type::Int64), 0),
        ],
        oneof_decl: vec![oneof("value")],
        ..Default::default()
    }
}

fn required_choice() -> DescriptorProto {
    DescriptorProto {
        name: Some("RequiredChoice".into()),
        field: vec![
            in_oneof(scalar("flag", 1, Type::Bool), 0),
            in_oneof(scalar("text", 2, Type::String), 0),
            scalar("note", 3, Type::String),
        ],
        oneof_decl: vec![oneof("kind")],
        ..Default::default()
    }
}

fn collections() -> DescriptorProto {
    DescriptorProto {
        name: Some("Collections".into()),
        field: vec![
            repeated(scalar("numbers", 1, Type::Int32)),
            repeated(scalar("names", 2, Type::String)),
            repeated(message_field("counts", 3, "Collections.CountsEntry")),
            repeated(message_field("labels", 4, "Collections.LabelsEntry")),
            repeated(message_field("flagged", 5, "Collections.FlaggedEntry")),
            repeated(message_field("items", 6, "Scalars")),
            repeated(scalar("ratios", 7, Type::Double)),
        ],
        nested_type: vec![
            map_entry("CountsEntry", Type::String, scalar("value", 2, Type::Int32)),
            map_entry("LabelsEntry", Type::Int64, scalar("value", 2, Type::String)),
            map_entry("FlaggedEntry", Type::Bool, message_field("value", 2, "Scalars")),
        ],
        ..Default::default()
    }
}

fn well_known() -> DescriptorProto {
    message(
        "WellKnown",
        vec![
            wkt_field("created_at", 1, "Timestamp"),
            wkt_field("timeout", 2, "Duration"),
            wkt_field("attributes", 3, "Struct"),
            wkt_field("dynamic", 4, "Value"),
            wkt_field("mask", 5, "FieldMask"),
            wkt_field("maybe_count", 6, "Int32Value"),
            wkt_field("maybe_name", 7, "StringValue"),
            wkt_field("maybe_flag", 8, "BoolValue"),
            wkt_field("entries", 9, "ListValue"),
            wkt_field("maybe_big", 10, "UInt64Value"),
        ],
    )
}

fn tree_node() -> DescriptorProto {
    message(
        "TreeNode",
        vec![
            scalar("name", 1, Type::String),
            repeated(message_field("children", 2, "TreeNode")),
        ],
    )
}

fn left() -> DescriptorProto {
    message(
        "Left",
        vec![
            scalar("name", 1, Type::String),
            repeated(message_field("rights", 2, "Right")),
        ],
    )
}

fn right() -> DescriptorProto {
    DescriptorProto {
        name: Some("Right".into()),
        field: vec![proto3_optional(message_field("left", 1, "Left"), 0)],
        oneof_decl: vec![oneof("_left")],
        ..Default::default()
    }
}

fn linked_node() -> DescriptorProto {
    message(
        "LinkedNode",
        vec![
            scalar("value", 1, Type::Int32),
            message_field("next", 2, "LinkedNode"),
        ],
    )
}

fn ping() -> DescriptorProto {
    message(
        "Ping",
        vec![
            scalar("label", 1, Type::String),
            message_field("pong", 2, "Pong"),
        ],
    )
}

fn pong() -> DescriptorProto {
    message("Pong", vec![message_field("ping", 1, "Ping")])
}

fn outer() -> DescriptorProto {
    let mut mode = scalar("mode", 2, Type::Enum);
    mode.type_name = Some(format!(".{FIXTURE_PACKAGE}.Outer.Mode"));
    DescriptorProto {
        name: Some("Outer".into()),
        field: vec![message_field("inner", 1, "Outer.Inner"), mode],
        nested_type: vec![message("Inner", vec![scalar("value", 1, Type::String)])],
        enum_type: vec![enumeration(
            "Mode",
            &[("MODE_UNSPECIFIED", 0), ("MODE_FAST", 1)],
        )],
        ..Default::default()
    }
}

fn referrer() -> DescriptorProto {
    message("Referrer", vec![message_field("borrowed", 1, "Outer.Inner")])
}

fn annotated() -> DescriptorProto {
    message(
        "Annotated",
        vec![
            scalar("title", 1, Type::String),
            scalar("amount", 2, Type::Int64),
            scalar("id", 3, Type::String),
            scalar("greeting", 4, Type::String),
            wkt_field("stamped_at", 5, "Timestamp"),
        ],
    )
}

fn palette() -> DescriptorProto {
    let mut primary = scalar("primary", 1, Type::Enum);
    primary.type_name = Some(format!(".{FIXTURE_PACKAGE}.Color"));
    let mut others = repeated(scalar("others", 2, Type::Enum));
    others.type_name = Some(format!(".{FIXTURE_PACKAGE}.Color"));
    message("Palette", vec![primary, others])
}

fn bad_directive() -> DescriptorProto {
    message("BadDirective", vec![scalar("value", 1, Type::String)])
}

fn message(name: &str, field: Vec<FieldDescriptorProto>) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.into()),
        field,
        ..Default::default()
    }
}

fn scalar(name: &str, number: i32, ty: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.into()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(ty as i32),
        ..Default::default()
    }
}

fn message_field(name: &str, number: i32, type_name: &str) -> FieldDescriptorProto {
    FieldDescriptorProto {
        type_name: Some(format!(".{FIXTURE_PACKAGE}.{type_name}")),
        ..scalar(name, number, Type::Message)
    }
}

fn wkt_field(name: &str, number: i32, type_name: &str) -> FieldDescriptorProto {
    FieldDescriptorProto {
        type_name: Some(format!(".google.protobuf.{type_name}")),
        ..scalar(name, number, Type::Message)
    }
}

fn extension(name: &str, number: i32, extendee: &str, type_name: &str) -> FieldDescriptorProto {
    FieldDescriptorProto {
        extendee: Some(extendee.into()),
        type_name: Some(type_name.into()),
        ..scalar(name, number, Type::Message)
    }
}

fn repeated(field: FieldDescriptorProto) -> FieldDescriptorProto {
    FieldDescriptorProto {
        label: Some(Label::Repeated as i32),
        ..field
    }
}

fn in_oneof(field: FieldDescriptorProto, index: i32) -> FieldDescriptorProto {
    FieldDescriptorProto {
        oneof_index: Some(index),
        ..field
    }
}

fn proto3_optional(field: FieldDescriptorProto, index: i32) -> FieldDescriptorProto {
    FieldDescriptorProto {
        proto3_optional: Some(true),
        ..in_oneof(field, index)
    }
}

fn oneof(name: &str) -> OneofDescriptorProto {
    OneofDescriptorProto {
        name: Some(name.into()),
        options: None,
    }
}

fn map_entry(name: &str, key: Type, value: FieldDescriptorProto) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.into()),
        field: vec![scalar("key", 1, key), value],
        options: Some(MessageOptions {
            map_entry: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn enumeration(name: &str, values: &[(&str, i32)]) -> EnumDescriptorProto {
    EnumDescriptorProto {
        name: Some(name.into()),
        value: values
            .iter()
            .map(|(name, number)| EnumValueDescriptorProto {
                name: Some((*name).into()),
                number: Some(*number),
                options: None,
            })
            .collect(),
        ..Default::default()
    }
}

fn comment(path: &[i32], text: &str) -> Location {
    Location {
        path: path.to_vec(),
        span: vec![0, 0, 0],
        leading_comments: Some(text.into()),
        trailing_comments: None,
        leading_detached_comments: Vec::new(),
    }
}
