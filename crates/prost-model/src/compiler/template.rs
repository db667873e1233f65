use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::CompilationError;
use crate::schema::DefaultFactory;

/// A directive evaluator: a pure function from the directive argument to a
/// JSON value, or a reason the argument was rejected.
pub type DirectiveFn = Arc<dyn Fn(&str) -> Result<serde_json::Value, String> + Send + Sync>;

/// Closed table of comment directives.
///
/// A string value `<prefix>@<name>|<argument>` found in a comment directive
/// is replaced by the result of the `<name>` evaluator applied to
/// `<argument>`. Names missing from the table are compilation errors.
///
/// The default table holds `factory`, which validates a default-factory
/// name (`now`, `uuid4`). The compiler adds `local`, which reads
/// `CompileConfig::local_dict`, unless a `local` entry is registered.
#[derive(Clone)]
pub struct DirectiveTable {
    entries: BTreeMap<String, DirectiveFn>,
}

impl Default for DirectiveTable {
    fn default() -> Self {
        Self::empty().register(
            "factory",
            Arc::new(|arg: &str| {
                DefaultFactory::from_name(arg)
                    .map(|factory| serde_json::Value::String(factory.name().to_string()))
                    .ok_or_else(|| format!("unknown default factory `{arg}`"))
            }),
        )
    }
}

impl fmt::Debug for DirectiveTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

impl DirectiveTable {
    /// A table without any directives.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Add or replace a directive.
    #[must_use]
    pub fn register(mut self, name: impl Into<String>, evaluator: DirectiveFn) -> Self {
        self.entries.insert(name.into(), evaluator);
        self
    }

    /// True when `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered directive names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub(crate) fn with_locals(&self, locals: &IndexMap<String, serde_json::Value>) -> Self {
        if self.contains("local") {
            return self.clone();
        }
        let locals = Arc::new(locals.clone());
        self.clone().register(
            "local",
            Arc::new(move |key: &str| {
                locals
                    .get(key)
                    .cloned()
                    .ok_or_else(|| format!("`{key}` is not defined in local_dict"))
            }),
        )
    }

    /// Replace every directive token inside `value`.
    pub(crate) fn evaluate(
        &self,
        value: serde_json::Value,
        prefix: &str,
        field: &str,
    ) -> Result<serde_json::Value, CompilationError> {
        match value {
            serde_json::Value::String(text) => self.evaluate_token(text, prefix, field),
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(|item| self.evaluate(item, prefix, field))
                .collect::<Result<Vec<_>, _>>()
                .map(serde_json::Value::Array),
            serde_json::Value::Object(entries) => entries
                .into_iter()
                .map(|(k, v)| Ok((k, self.evaluate(v, prefix, field)?)))
                .collect::<Result<serde_json::Map<_, _>, CompilationError>>()
                .map(serde_json::Value::Object),
            other => Ok(other),
        }
    }

    fn evaluate_token(
        &self,
        text: String,
        prefix: &str,
        field: &str,
    ) -> Result<serde_json::Value, CompilationError> {
        let Some(body) = text.strip_prefix(prefix).and_then(|rest| rest.strip_prefix('@')) else {
            return Ok(serde_json::Value::String(text));
        };
        let (name, argument) = body.split_once('|').unwrap_or((body, ""));
        let error = |cause: String| CompilationError::TemplateDirective {
            token: text.clone(),
            field: field.to_string(),
            cause,
        };
        let evaluator = self
            .entries
            .get(name)
            .ok_or_else(|| error(format!("unknown directive `{name}`")))?;
        evaluator(argument).map_err(error)
    }
}
