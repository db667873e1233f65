//! Validated data models compiled from protobuf message descriptors.
//!
//! This crate walks `prost-reflect` message descriptors at runtime and
//! compiles each message into a [`MessageSchema`]: typed fields in
//! declaration order, presence and default policies, merged validation
//! constraints, oneof groups and nested declarations. Compiled schemas are
//! cached per descriptor, so repeated compilation of the same message
//! returns the same shared schema.
//!
//! A compiled schema produces [`Model`] instances that parse and emit
//! protobuf JSON, convert to and from [`prost_reflect::DynamicMessage`], and
//! enforce oneof exclusivity.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use prost_model::Compiler;
//! # fn example(pool: &prost_reflect::DescriptorPool) -> Result<(), prost_model::Error> {
//! let compiler = Compiler::new();
//! let user = compiler.compile_by_name(pool, "acme.v1.User")?;
//!
//! let model = user.from_json(&serde_json::json!({"name": "Ada"}))?;
//! println!("{}", model.to_json());
//! # Ok(())
//! # }
//! ```
//!
//! # Comment directives
//!
//! Leading comments of the form `p2p@<directive>|<argument>` attach
//! constraints and defaults to fields. See [`CompileConfig`] for the prefix,
//! the directive table and where comments are read from.
//!
//! # Oneof groups
//!
//! Enable [`CompilerOption::DiscriminatedUnions`] to attach a
//! [`OneofAdapter`] to every schema with oneof groups. The adapter rejects
//! inputs that set more than one member and accepts both the flat protobuf
//! JSON form and a tagged `{"group": {"member": value}}` form.
//!
//! # Error types
//!
//! | Type | When |
//! |------|------|
//! | [`ValidationError`] | One or more values were rejected by a model |
//! | [`CompilationError`] | A descriptor, directive or configuration could not be compiled |
//!
//! Both are unified under [`Error`].
//!
//! # Re-exported types
//!
//! The [`types`] module re-exports `prost-model-types`, which holds the
//! descriptor extension traits and the reference descriptor pool.

#![warn(missing_docs)]

mod compiler;
mod config;
mod error;
mod model;
mod schema;
mod violation;

/// Re-export of `prost-model-types` for descriptor extension traits and the
/// reference descriptor pool.
pub use prost_model_types as types;

pub use compiler::template::{DirectiveFn, DirectiveTable};
pub use compiler::{CompiledModel, Compiler};
pub use config::{
    AliasStrategy, CommentSource, CompileConfig, CompilerOption, DEFAULT_COMMENT_PREFIX, EnumRepr,
    ModelConfig, ModelConfigOverride, PackageConfig, ParseOption, UnknownFields,
};
pub use error::{CompilationError, Error, ValidationError};
pub use model::adapter::OneofAdapter;
pub use model::{MapKey, Model, ModelValue};
pub use schema::{
    Constraint, ConstraintSource, Constraints, DefaultFactory, DefaultPolicy, EnumSchema,
    FieldRecord, Label, MessageSchema, OneofGroup, Presence, ScalarKind, SchemaRef,
    SchemaRegistry, ValueType, WellKnownType, WireKind,
};
pub use violation::{Violation, ViolationKind};
