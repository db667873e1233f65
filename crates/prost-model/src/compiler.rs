use std::sync::Arc;

use prost_reflect::{DescriptorPool, DynamicMessage, MessageDescriptor};
use tracing::debug;

use crate::config::{CompileConfig, CompilerOption, ParseOption};
use crate::error::{CompilationError, Error};
use crate::model::Model;
use crate::schema::{MessageSchema, SchemaRef, SchemaRegistry};

mod assembler;
mod cache;
mod comments;
mod constraints;
mod lookups;
pub(crate) mod template;
mod types;
mod walker;

use assembler::Assembler;
use cache::ModelCache;
use comments::CommentResolver;
use constraints::ConstraintMerger;
use template::DirectiveTable;

/// Thread-safe compiler from protobuf message descriptors to model schemas.
///
/// Schemas are built lazily on first request and cached by descriptor
/// identity, so the same descriptor always yields the same
/// `Arc<MessageSchema>` until [`Compiler::clear`] is called.
pub struct Compiler {
    config: CompileConfig,
    directives: DirectiveTable,
    comments: CommentResolver,
    cache: ModelCache,
    /// Construction-time error (e.g. an invalid comment prefix).
    init_err: Option<CompilationError>,
}

impl Compiler {
    /// Create a new `Compiler` with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(CompileConfig::default())
    }

    /// Create a new `Compiler` with the given configuration.
    #[must_use]
    pub fn with_config(config: CompileConfig) -> Self {
        let init_err = config.validate().err();
        Self {
            directives: config.directives.with_locals(&config.local_dict),
            comments: CommentResolver::new(config.comment_source.clone()),
            cache: ModelCache::new(),
            config,
            init_err,
        }
    }

    /// Create a new `Compiler` with the default configuration and options.
    #[must_use]
    pub fn with_options(options: &[CompilerOption]) -> Self {
        Self::with_config(CompileConfig::default().with_options(options))
    }

    /// Returns the configuration this compiler was built with.
    #[must_use]
    pub fn config(&self) -> &CompileConfig {
        &self.config
    }

    /// Compile the schema for `descriptor` and everything it references.
    ///
    /// # Errors
    ///
    /// Returns a [`CompilationError`] if a referenced type cannot be
    /// resolved, a comment directive fails, or eager defaults form a cycle.
    /// Nothing built during a failed call is cached.
    pub fn compile(
        &self,
        descriptor: &MessageDescriptor,
    ) -> Result<CompiledModel, CompilationError> {
        if let Some(err) = &self.init_err {
            return Err(err.clone());
        }

        // Fast path
        if let Some((schema, registry)) = self.cache.lookup(descriptor) {
            debug!(message = descriptor.full_name(), "schema cache hit");
            return Ok(CompiledModel { schema, registry });
        }

        // Slow path
        let _guard = self.cache.lock_build();
        if let Some((schema, registry)) = self.cache.lookup(descriptor) {
            return Ok(CompiledModel { schema, registry });
        }

        let snapshot = self.cache.snapshot();
        let merger = ConstraintMerger {
            config: &self.config,
            directives: &self.directives,
            comments: &self.comments,
        };
        let next = Assembler::new(&self.config, merger, &snapshot).assemble(descriptor)?;
        let added = next.len() - snapshot.len();
        let registry = self.cache.commit(next);
        debug!(message = descriptor.full_name(), added, "committed compiled schemas");

        let schema = registry.get(descriptor).map(Arc::clone).ok_or_else(|| {
            CompilationError::resolution(format!(
                "{} was not produced by compilation",
                descriptor.full_name()
            ))
        })?;
        Ok(CompiledModel { schema, registry })
    }

    /// Compile a message looked up by fully-qualified name.
    ///
    /// # Errors
    ///
    /// Returns [`CompilationError::DescriptorResolution`] if `full_name` is
    /// not in `pool`, or any error of [`Compiler::compile`].
    pub fn compile_by_name(
        &self,
        pool: &DescriptorPool,
        full_name: &str,
    ) -> Result<CompiledModel, CompilationError> {
        let descriptor = pool.get_message_by_name(full_name).ok_or_else(|| {
            CompilationError::resolution(format!("message `{full_name}` not found in pool"))
        })?;
        self.compile(&descriptor)
    }

    /// Decode an encoded `FileDescriptorSet` and compile one of its messages.
    ///
    /// # Errors
    ///
    /// Returns [`CompilationError::DescriptorResolution`] if the set does not
    /// decode, or any error of [`Compiler::compile_by_name`].
    pub fn compile_from_descriptor_set(
        &self,
        descriptor_set: &[u8],
        full_name: &str,
    ) -> Result<CompiledModel, CompilationError> {
        let pool = DescriptorPool::decode(descriptor_set).map_err(|err| {
            CompilationError::resolution(format!("failed to decode descriptor set: {err}"))
        })?;
        self.compile_by_name(&pool, full_name)
    }

    /// Current snapshot of every compiled schema.
    #[must_use]
    pub fn registry(&self) -> Arc<SchemaRegistry> {
        self.cache.snapshot()
    }

    /// Drop every cached schema. Later compilations rebuild from scratch.
    pub fn clear(&self) {
        self.cache.clear();
        debug!("schema cache cleared");
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

/// A compiled root schema together with the registry that resolves its
/// references.
#[derive(Clone)]
pub struct CompiledModel {
    schema: Arc<MessageSchema>,
    registry: Arc<SchemaRegistry>,
}

impl std::fmt::Debug for CompiledModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModel")
            .field("schema", &self.schema.full_name)
            .field("registry_len", &self.registry.len())
            .finish()
    }
}

impl CompiledModel {
    pub(crate) fn from_parts(schema: Arc<MessageSchema>, registry: Arc<SchemaRegistry>) -> Self {
        Self { schema, registry }
    }

    /// Root schema.
    #[must_use]
    pub fn schema(&self) -> &Arc<MessageSchema> {
        &self.schema
    }

    /// Registry holding every schema reachable from the root.
    #[must_use]
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Compiled model behind a reference.
    #[must_use]
    pub fn resolve(&self, reference: &SchemaRef) -> Option<CompiledModel> {
        self.registry
            .resolve(reference)
            .map(|schema| Self::from_parts(Arc::clone(schema), Arc::clone(&self.registry)))
    }

    /// Compiled model of a message declared inside the root, by short name.
    #[must_use]
    pub fn nested(&self, name: &str) -> Option<CompiledModel> {
        let reference = self.schema.nested.iter().find(|r| r.type_name == name)?;
        self.resolve(reference)
    }

    /// A model instance with every default applied.
    #[must_use]
    pub fn new_model(&self) -> Model {
        Model::new(self)
    }

    /// Parse a model from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] listing every rejected value.
    pub fn from_json(&self, value: &serde_json::Value) -> Result<Model, Error> {
        Model::from_json(self, value, &[])
    }

    /// Parse a model from its JSON form with per-call options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] listing every rejected value.
    pub fn from_json_with(
        &self,
        value: &serde_json::Value,
        options: &[ParseOption],
    ) -> Result<Model, Error> {
        Model::from_json(self, value, options)
    }

    /// Convert a dynamic message of the root type into a model.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the message has a different type or
    /// holds values the model cannot represent.
    pub fn from_dynamic_message(&self, message: &DynamicMessage) -> Result<Model, Error> {
        Model::from_dynamic_message(self, message)
    }

    /// Decode a model from protobuf binary encoding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the bytes are not a valid encoding
    /// of the root message.
    pub fn decode(&self, bytes: &[u8]) -> Result<Model, Error> {
        Model::decode(self, bytes)
    }
}
