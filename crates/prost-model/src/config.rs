use std::path::PathBuf;

use convert_case::{Case, Casing};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::compiler::template::{DirectiveFn, DirectiveTable};
use crate::error::CompilationError;

/// Default prefix recognized in comment directives (`p2p: {...}`).
pub const DEFAULT_COMMENT_PREFIX: &str = "p2p";

/// Where per-field comment directives are read from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentSource {
    /// Leading comments stored in the descriptor's `SourceCodeInfo`.
    #[default]
    SourceInfo,
    /// Leading comments scanned from `.proto` text files under a directory,
    /// resolved by the descriptor's file name.
    ProtoDir(PathBuf),
    /// Only option-extension annotations; comments are skipped.
    Annotations,
    /// Neither comments nor annotations. Field overrides still apply.
    Ignore,
}

impl CommentSource {
    pub(crate) fn reads_annotations(&self) -> bool {
        !matches!(self, Self::Ignore)
    }

    pub(crate) fn reads_comments(&self) -> bool {
        matches!(self, Self::SourceInfo | Self::ProtoDir(_))
    }
}

/// How external keys are derived from protobuf field names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasStrategy {
    /// The external key is the field name.
    #[default]
    Identity,
    /// The external key is the lowerCamelCase form of the field name.
    CamelCase,
}

impl AliasStrategy {
    /// External key for a protobuf field name.
    #[must_use]
    pub fn key_for(self, field_name: &str) -> String {
        match self {
            Self::Identity => field_name.to_string(),
            Self::CamelCase => field_name.from_case(Case::Snake).to_case(Case::Camel),
        }
    }
}

/// Handling of input keys that match no field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownFields {
    /// Unknown keys are dropped.
    #[default]
    Ignore,
    /// Unknown keys are rejected with a violation.
    Forbid,
}

/// External representation of enum values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnumRepr {
    /// Symbolic value name; unknown numbers fall back to the number.
    #[default]
    Name,
    /// Integer value.
    Number,
}

/// Per-model behavior resolved for every schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ModelConfig {
    /// External key strategy.
    pub alias: AliasStrategy,
    /// Unknown input key handling.
    pub unknown_fields: UnknownFields,
    /// Enum rendering.
    pub enum_repr: EnumRepr,
    /// Accept the field name as an input key when it differs from the alias.
    pub populate_by_name: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            alias: AliasStrategy::Identity,
            unknown_fields: UnknownFields::Ignore,
            enum_repr: EnumRepr::Name,
            populate_by_name: true,
        }
    }
}

/// Partial [`ModelConfig`]; set entries replace the inherited value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfigOverride {
    /// Replaces [`ModelConfig::alias`].
    pub alias: Option<AliasStrategy>,
    /// Replaces [`ModelConfig::unknown_fields`].
    pub unknown_fields: Option<UnknownFields>,
    /// Replaces [`ModelConfig::enum_repr`].
    pub enum_repr: Option<EnumRepr>,
    /// Replaces [`ModelConfig::populate_by_name`].
    pub populate_by_name: Option<bool>,
}

impl ModelConfigOverride {
    /// Apply this override on top of `base`.
    #[must_use]
    pub fn apply(&self, base: ModelConfig) -> ModelConfig {
        ModelConfig {
            alias: self.alias.unwrap_or(base.alias),
            unknown_fields: self.unknown_fields.unwrap_or(base.unknown_fields),
            enum_repr: self.enum_repr.unwrap_or(base.enum_repr),
            populate_by_name: self.populate_by_name.unwrap_or(base.populate_by_name),
        }
    }
}

/// Per-package settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackageConfig {
    /// Model behavior for every message in the package.
    pub model: ModelConfigOverride,
    /// Comment prefix used for fields of this package.
    pub comment_prefix: Option<String>,
}

/// Compiler configuration.
///
/// Everything except the directive table can be loaded from JSON with
/// [`CompileConfig::from_json_str`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompileConfig {
    /// Values available to the `local` directive.
    pub local_dict: IndexMap<String, serde_json::Value>,
    /// Prefix recognized in comment directives.
    pub comment_prefix: String,
    /// Packages whose field annotations are not read.
    pub ignore_pkg_list: Vec<String>,
    /// Evaluators for `<prefix>@<directive>|<argument>` tokens.
    #[serde(skip)]
    pub directives: DirectiveTable,
    /// Where comment directives come from.
    pub comment_source: CommentSource,
    /// Attach the oneof adapter stage to schemas with oneof groups.
    pub use_discriminated_unions_for_oneofs: bool,
    /// Suffix appended to a proto file stem to name its generated module.
    pub file_name_suffix: String,
    /// Per-package overrides keyed by package name.
    pub pkg_config: IndexMap<String, PackageConfig>,
    /// Per-field constraint overrides keyed by fully-qualified field name.
    pub field_overrides: IndexMap<String, IndexMap<String, serde_json::Value>>,
    /// Per-message model overrides keyed by fully-qualified message name.
    pub message_overrides: IndexMap<String, ModelConfigOverride>,
    /// Fully-qualified oneof names whose groups must have a member set.
    pub required_oneofs: Vec<String>,
    /// Global model behavior.
    pub model: ModelConfig,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            local_dict: IndexMap::new(),
            comment_prefix: DEFAULT_COMMENT_PREFIX.to_string(),
            ignore_pkg_list: Vec::new(),
            directives: DirectiveTable::default(),
            comment_source: CommentSource::default(),
            use_discriminated_unions_for_oneofs: false,
            file_name_suffix: "_p2p".to_string(),
            pkg_config: IndexMap::new(),
            field_overrides: IndexMap::new(),
            message_overrides: IndexMap::new(),
            required_oneofs: Vec::new(),
            model: ModelConfig::default(),
        }
    }
}

impl CompileConfig {
    /// Parse a configuration from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`CompilationError::InvalidConfig`] if the document does not
    /// match the configuration shape.
    pub fn from_json_str(json: &str) -> Result<Self, CompilationError> {
        let config: Self =
            serde_json::from_str(json).map_err(|err| CompilationError::InvalidConfig {
                cause: err.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply construction options on top of this configuration.
    #[must_use]
    pub fn with_options(mut self, options: &[CompilerOption]) -> Self {
        for option in options {
            match option {
                CompilerOption::DiscriminatedUnions => {
                    self.use_discriminated_unions_for_oneofs = true;
                }
                CompilerOption::CommentSource(source) => self.comment_source = source.clone(),
                CompilerOption::CommentPrefix(prefix) => self.comment_prefix.clone_from(prefix),
                CompilerOption::Local(key, value) => {
                    self.local_dict.insert(key.clone(), value.clone());
                }
                CompilerOption::Directive(name, f) => {
                    self.directives = self.directives.register(name, std::sync::Arc::clone(f));
                }
                CompilerOption::IgnorePackage(package) => {
                    self.ignore_pkg_list.push(package.clone());
                }
                CompilerOption::FieldOverride { field, key, value } => {
                    self.field_overrides
                        .entry(field.clone())
                        .or_default()
                        .insert(key.clone(), value.clone());
                }
                CompilerOption::RequiredOneof(name) => self.required_oneofs.push(name.clone()),
                CompilerOption::Model(model) => self.model = *model,
            }
        }
        self
    }

    pub(crate) fn validate(&self) -> Result<(), CompilationError> {
        let prefixes = std::iter::once(&self.comment_prefix).chain(
            self.pkg_config
                .values()
                .filter_map(|pkg| pkg.comment_prefix.as_ref()),
        );
        for prefix in prefixes {
            if prefix.is_empty()
                || prefix.contains(['@', '|', ':'])
                || prefix.contains(char::is_whitespace)
            {
                return Err(CompilationError::InvalidConfig {
                    cause: format!("invalid comment prefix `{prefix}`"),
                });
            }
        }
        Ok(())
    }

    /// Comment prefix in effect for `package`.
    pub(crate) fn prefix_for(&self, package: &str) -> &str {
        self.pkg_config
            .get(package)
            .and_then(|pkg| pkg.comment_prefix.as_deref())
            .unwrap_or(&self.comment_prefix)
    }

    pub(crate) fn ignores_package(&self, package: &str) -> bool {
        self.ignore_pkg_list.iter().any(|p| p == package)
    }

    /// Module name for a proto file, e.g. `pkg/foo.proto` -> `foo_p2p`.
    #[must_use]
    pub fn module_name(&self, file_name: &str) -> String {
        let stem = file_name.rsplit('/').next().unwrap_or(file_name);
        let stem = stem.strip_suffix(".proto").unwrap_or(stem);
        format!("{stem}{}", self.file_name_suffix)
    }
}

/// Options for configuring a `Compiler` at construction time.
#[non_exhaustive]
pub enum CompilerOption {
    /// Attach the oneof adapter stage to schemas with oneof groups.
    DiscriminatedUnions,
    /// Read comment directives from this source.
    CommentSource(CommentSource),
    /// Recognize this comment directive prefix.
    CommentPrefix(String),
    /// Add an entry to the `local` directive dictionary.
    Local(String, serde_json::Value),
    /// Register a directive evaluator.
    Directive(String, DirectiveFn),
    /// Skip annotation extraction for this package.
    IgnorePackage(String),
    /// Override one constraint on a fully-qualified field.
    FieldOverride {
        /// Fully-qualified field name.
        field: String,
        /// Constraint key.
        key: String,
        /// Constraint value.
        value: serde_json::Value,
    },
    /// Require a member of this fully-qualified oneof.
    RequiredOneof(String),
    /// Global model behavior.
    Model(ModelConfig),
}

/// Options for configuring a single model parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseOption {
    /// Stop on the first violation instead of collecting all.
    FailFast,
    /// Reject unknown input keys regardless of the model configuration.
    ForbidUnknownFields,
}

/// Runtime configuration passed through model decoding.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ParseConfig {
    pub fail_fast: bool,
    pub forbid_unknown: bool,
}

impl ParseConfig {
    pub(crate) fn from_options(options: &[ParseOption]) -> Self {
        let mut cfg = Self::default();
        for option in options {
            match option {
                ParseOption::FailFast => cfg.fail_fast = true,
                ParseOption::ForbidUnknownFields => cfg.forbid_unknown = true,
            }
        }
        cfg
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn config_loads_from_json_with_defaults() {
        let config = CompileConfig::from_json_str(
            r#"{
                "local_dict": {"GREETING": "hello"},
                "comment_source": {"proto_dir": "protos"},
                "pkg_config": {"a.b": {"model": {"alias": "camel_case"}, "comment_prefix": "x"}},
                "required_oneofs": ["a.b.Msg.kind"],
                "model": {"unknown_fields": "forbid"}
            }"#,
        )
        .expect("config parses");

        assert_eq!(config.comment_prefix, "p2p");
        assert_eq!(config.file_name_suffix, "_p2p");
        assert_eq!(config.comment_source, CommentSource::ProtoDir("protos".into()));
        assert_eq!(config.local_dict["GREETING"], serde_json::json!("hello"));
        assert_eq!(config.prefix_for("a.b"), "x");
        assert_eq!(config.prefix_for("other"), "p2p");
        assert_eq!(config.model.unknown_fields, UnknownFields::Forbid);
        assert!(config.model.populate_by_name);
        assert_eq!(
            config.pkg_config["a.b"].model.alias,
            Some(AliasStrategy::CamelCase)
        );
    }

    #[test]
    fn config_rejects_unknown_keys_and_bad_prefix() {
        let err = CompileConfig::from_json_str(r#"{"bogus": 1}"#).expect_err("unknown key");
        assert!(matches!(err, CompilationError::InvalidConfig { .. }));

        let err = CompileConfig::from_json_str(r#"{"comment_prefix": "a@b"}"#)
            .expect_err("bad prefix");
        assert_eq!(
            err,
            CompilationError::InvalidConfig {
                cause: "invalid comment prefix `a@b`".to_string()
            }
        );
    }

    #[test]
    fn override_replaces_only_set_entries() {
        let base = ModelConfig::default();
        let over = ModelConfigOverride {
            enum_repr: Some(EnumRepr::Number),
            ..ModelConfigOverride::default()
        };
        let resolved = over.apply(base);
        assert_eq!(resolved.enum_repr, EnumRepr::Number);
        assert_eq!(resolved.alias, base.alias);
        assert_eq!(resolved.populate_by_name, base.populate_by_name);
    }

    #[test]
    fn options_apply_on_top_of_config() {
        let config = CompileConfig::default().with_options(&[
            CompilerOption::DiscriminatedUnions,
            CompilerOption::Local("K".into(), serde_json::json!(1)),
            CompilerOption::FieldOverride {
                field: "p.M.f".into(),
                key: "gt".into(),
                value: serde_json::json!(3),
            },
            CompilerOption::IgnorePackage("p".into()),
        ]);
        assert!(config.use_discriminated_unions_for_oneofs);
        assert_eq!(config.local_dict["K"], serde_json::json!(1));
        assert_eq!(config.field_overrides["p.M.f"]["gt"], serde_json::json!(3));
        assert!(config.ignores_package("p"));
    }

    #[test]
    fn alias_strategy_derives_external_keys() {
        assert_eq!(AliasStrategy::Identity.key_for("maybe_count"), "maybe_count");
        assert_eq!(AliasStrategy::CamelCase.key_for("maybe_count"), "maybeCount");
        assert_eq!(AliasStrategy::CamelCase.key_for("created_at_utc"), "createdAtUtc");
    }

    #[test]
    fn module_name_uses_file_stem_and_suffix() {
        let config = CompileConfig::default();
        assert_eq!(config.module_name("prost_model/fixture.proto"), "fixture_p2p");
    }

    #[test]
    fn parse_options_collect_into_config() {
        let cfg = ParseConfig::from_options(&[ParseOption::FailFast]);
        assert!(cfg.fail_fast);
        assert!(!cfg.forbid_unknown);
    }
}
