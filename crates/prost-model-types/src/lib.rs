//! Descriptor helpers shared by the [`prost-model`](https://crates.io/crates/prost-model)
//! compiler, built on `prost-reflect`.
//!
//! This crate provides:
//!
//! - Extension traits for reading model-relevant facts off descriptors:
//!   - [`FieldPresenceExt`]: real vs. synthetic (proto3 `optional`) oneofs on a
//!     [`FieldDescriptor`].
//!   - [`FieldAnnotationsExt`]: every extension set on a field's options,
//!     rendered as opaque JSON key-value entries.
//!   - [`OneofAnnotationsExt`]: `required = true` carried by any extension on
//!     a [`OneofDescriptor`]'s options.
//!   - [`SourceCommentsExt`]: leading comments recorded in the file's
//!     `SourceCodeInfo`.
//! - A reference [`DESCRIPTOR_POOL`] of fixture messages covering every field
//!   shape the compiler handles (scalars, maps, oneofs, well-known types,
//!   cycles, annotations and comment directives).

#![warn(missing_docs)]

mod fixture;

use prost_reflect::{
    DynamicMessage, FieldDescriptor, MessageDescriptor, OneofDescriptor, SerializeOptions, Value,
};

pub use fixture::{
    ANNOTATIONS_PACKAGE, DESCRIPTOR_POOL, FIXTURE_PACKAGE, build_fixture_pool,
    descriptor_pool_build_error,
};

/// `DescriptorProto` / `FileDescriptorProto` tag numbers used in source paths.
mod path_tags {
    pub const FILE_MESSAGE_TYPE: i32 = 4;
    pub const MESSAGE_FIELD: i32 = 2;
    pub const MESSAGE_NESTED_TYPE: i32 = 3;
    pub const MESSAGE_ONEOF_DECL: i32 = 8;
}

/// One extension value found on a descriptor's options.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    /// Fully-qualified name of the extension, e.g. `prost_model.annotations.field`.
    pub extension: String,
    /// Set fields of the extension value, in declaration order.
    ///
    /// A scalar extension produces a single entry keyed by the extension's
    /// short name.
    pub entries: Vec<(String, serde_json::Value)>,
}

/// Extension trait for presence facts on a field descriptor.
pub trait FieldPresenceExt {
    /// Returns the real (non-synthetic) oneof containing this field, if any.
    fn real_oneof(&self) -> Option<OneofDescriptor>;

    /// Returns true if this field is proto3 optional (synthetic oneof).
    fn is_optional(&self) -> bool;
}

impl FieldPresenceExt for FieldDescriptor {
    fn real_oneof(&self) -> Option<OneofDescriptor> {
        self.containing_oneof().filter(|o| !o.is_synthetic())
    }

    fn is_optional(&self) -> bool {
        self.containing_oneof().is_some_and(|d| d.is_synthetic())
    }
}

/// Extension trait for reading option extensions off a field descriptor.
pub trait FieldAnnotationsExt {
    /// Returns every extension set on this field's options.
    ///
    /// # Errors
    ///
    /// Returns an error if an extension message cannot be rendered as JSON.
    fn annotations(&self) -> anyhow::Result<Vec<Annotation>>;
}

impl FieldAnnotationsExt for FieldDescriptor {
    fn annotations(&self) -> anyhow::Result<Vec<Annotation>> {
        let options = self.options();
        let mut out = Vec::new();
        for (extension, value) in options.extensions() {
            out.push(Annotation {
                extension: extension.full_name().to_string(),
                entries: annotation_entries(extension.name(), value)?,
            });
        }
        Ok(out)
    }
}

/// Extension trait for oneof-level annotations.
pub trait OneofAnnotationsExt {
    /// Returns true if any extension on this oneof's options sets a boolean
    /// `required` field to `true`.
    fn is_required(&self) -> bool;
}

impl OneofAnnotationsExt for OneofDescriptor {
    fn is_required(&self) -> bool {
        let options = self.options();
        options.extensions().any(|(_, value)| {
            value
                .as_message()
                .and_then(|msg| msg.get_field_by_name("required"))
                .is_some_and(|required| required.as_bool() == Some(true))
        })
    }
}

/// Extension trait for source comments attached to descriptors.
pub trait SourceCommentsExt {
    /// Returns the source path of this descriptor inside its file, as used by
    /// `SourceCodeInfo.Location.path`.
    fn source_path(&self) -> Option<Vec<i32>>;

    /// Returns the leading comment recorded for this descriptor, if the file
    /// was compiled with source info.
    fn leading_comments(&self) -> Option<String>;
}

impl SourceCommentsExt for MessageDescriptor {
    fn source_path(&self) -> Option<Vec<i32>> {
        match self.parent_message() {
            Some(parent) => {
                let mut path = parent.source_path()?;
                let index = parent
                    .descriptor_proto()
                    .nested_type
                    .iter()
                    .position(|m| m.name() == self.name())?;
                path.extend([path_tags::MESSAGE_NESTED_TYPE, i32::try_from(index).ok()?]);
                Some(path)
            }
            None => {
                let file = self.parent_file();
                let index = file
                    .file_descriptor_proto()
                    .message_type
                    .iter()
                    .position(|m| m.name() == self.name())?;
                Some(vec![
                    path_tags::FILE_MESSAGE_TYPE,
                    i32::try_from(index).ok()?,
                ])
            }
        }
    }

    fn leading_comments(&self) -> Option<String> {
        let path = self.source_path()?;
        leading_comments_at(&self.parent_file(), &path)
    }
}

impl SourceCommentsExt for FieldDescriptor {
    fn source_path(&self) -> Option<Vec<i32>> {
        let parent = self.parent_message();
        let mut path = parent.source_path()?;
        let index = parent
            .descriptor_proto()
            .field
            .iter()
            .position(|f| f.name() == self.name())?;
        path.extend([path_tags::MESSAGE_FIELD, i32::try_from(index).ok()?]);
        Some(path)
    }

    fn leading_comments(&self) -> Option<String> {
        let path = self.source_path()?;
        leading_comments_at(&self.parent_file(), &path)
    }
}

impl SourceCommentsExt for OneofDescriptor {
    fn source_path(&self) -> Option<Vec<i32>> {
        let parent = self.parent_message();
        let mut path = parent.source_path()?;
        let index = parent
            .descriptor_proto()
            .oneof_decl
            .iter()
            .position(|o| o.name() == self.name())?;
        path.extend([path_tags::MESSAGE_ONEOF_DECL, i32::try_from(index).ok()?]);
        Some(path)
    }

    fn leading_comments(&self) -> Option<String> {
        let path = self.source_path()?;
        leading_comments_at(&self.parent_message().parent_file(), &path)
    }
}

fn leading_comments_at(file: &prost_reflect::FileDescriptor, path: &[i32]) -> Option<String> {
    file.file_descriptor_proto()
        .source_code_info
        .as_ref()?
        .location
        .iter()
        .find(|location| location.path == path)
        .and_then(|location| location.leading_comments.clone())
}

fn annotation_entries(
    name: &str,
    value: &Value,
) -> anyhow::Result<Vec<(String, serde_json::Value)>> {
    if let Some(message) = value.as_message() {
        return match message_to_json(message)? {
            serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
            other => Ok(vec![(name.to_string(), other)]),
        };
    }
    Ok(vec![(name.to_string(), value_to_json(value)?)])
}

fn message_to_json(message: &DynamicMessage) -> anyhow::Result<serde_json::Value> {
    let options = SerializeOptions::new()
        .use_proto_field_name(true)
        .stringify_64_bit_integers(false);
    Ok(message.serialize_with_options(serde_json::value::Serializer, &options)?)
}

fn value_to_json(value: &Value) -> anyhow::Result<serde_json::Value> {
    Ok(match value {
        Value::Bool(v) => (*v).into(),
        Value::I32(v) | Value::EnumNumber(v) => (*v).into(),
        Value::I64(v) => (*v).into(),
        Value::U32(v) => (*v).into(),
        Value::U64(v) => (*v).into(),
        Value::F32(v) => f64::from(*v).into(),
        Value::F64(v) => (*v).into(),
        Value::String(v) => v.clone().into(),
        Value::Bytes(v) => v.iter().copied().collect::<Vec<u8>>().into(),
        Value::Message(m) => message_to_json(m)?,
        Value::List(values) => values
            .iter()
            .map(value_to_json)
            .collect::<anyhow::Result<Vec<_>>>()?
            .into(),
        Value::Map(_) => anyhow::bail!("map-valued extensions are not supported"),
    })
}
