use prost_model_types::FieldAnnotationsExt;
use tracing::trace;

use super::comments::{CommentResolver, parse_directives};
use super::template::DirectiveTable;
use super::walker::RawField;
use crate::config::CompileConfig;
use crate::error::CompilationError;
use crate::schema::{ConstraintSource, Constraints, DefaultFactory, DefaultPolicy};

/// Constraint-merger output for one field.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Merged {
    pub constraints: Constraints,
    pub default: DefaultPolicy,
    pub alias: Option<String>,
}

/// Layers annotations, comment directives and overrides onto a field.
///
/// Later layers replace earlier values for the same key. Reserved keys:
/// `default`, `default_factory` and `alias`.
pub(crate) struct ConstraintMerger<'a> {
    pub config: &'a CompileConfig,
    pub directives: &'a DirectiveTable,
    pub comments: &'a CommentResolver,
}

impl ConstraintMerger<'_> {
    pub(crate) fn merge(
        &self,
        raw: &RawField,
        computed: DefaultPolicy,
    ) -> Result<Merged, CompilationError> {
        let file = raw.descriptor.parent_file();
        let package = file.package_name();
        let prefix = self.config.prefix_for(package);
        let mut constraints = Constraints::default();

        if self.config.comment_source.reads_annotations() && !self.config.ignores_package(package)
        {
            let annotations = raw.descriptor.annotations().map_err(|err| {
                CompilationError::resolution(format!(
                    "annotations on {} cannot be read: {err}",
                    raw.full_name
                ))
            })?;
            for annotation in annotations {
                for (key, value) in annotation.entries {
                    constraints.insert(key, value, ConstraintSource::Annotation);
                }
            }
        }

        if self.config.comment_source.reads_comments() {
            if let Some(comment) = self.comments.leading_comment(&raw.descriptor)? {
                for (key, value) in parse_directives(&comment, prefix, &raw.full_name)? {
                    let value = self.directives.evaluate(value, prefix, &raw.full_name)?;
                    constraints.insert(key, value, ConstraintSource::Comment);
                }
            }
        }

        if let Some(overrides) = self.config.field_overrides.get(&raw.full_name) {
            for (key, value) in overrides {
                let value = self
                    .directives
                    .evaluate(value.clone(), prefix, &raw.full_name)?;
                constraints.insert(key.clone(), value, ConstraintSource::Override);
            }
        }

        let default = resolve_default(&constraints, computed, &raw.full_name)?;
        let alias = constraints
            .value("alias")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        trace!(field = %raw.full_name, constraints = constraints.len(), "merged constraints");

        Ok(Merged {
            constraints,
            default,
            alias,
        })
    }
}

/// Pick the default from the reserved keys; the higher layer wins when both
/// `default` and `default_factory` are set.
fn resolve_default(
    constraints: &Constraints,
    computed: DefaultPolicy,
    field: &str,
) -> Result<DefaultPolicy, CompilationError> {
    let literal = constraints.get("default");
    let factory = constraints.get("default_factory");
    let factory = match (literal, factory) {
        (Some(literal), Some(factory)) if factory.source < literal.source => None,
        (_, factory) => factory,
    };

    if let Some(factory) = factory {
        let name = factory.value.as_str().unwrap_or_default();
        return DefaultFactory::from_name(name)
            .map(DefaultPolicy::Factory)
            .ok_or_else(|| CompilationError::InvalidConfig {
                cause: format!("unknown default factory `{}` on {field}", factory.value),
            });
    }
    Ok(literal.map_or(computed, |literal| {
        DefaultPolicy::Literal(literal.value.clone())
    }))
}
