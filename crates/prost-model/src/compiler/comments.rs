use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};

use prost_model_types::SourceCommentsExt;
use prost_reflect::FieldDescriptor;
use regex::Regex;
use tracing::debug;

use crate::config::CommentSource;
use crate::error::CompilationError;

static COMMENT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*//(.*)$").expect("comment regex must compile"));
static BLOCK_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(message|enum|oneof|service|extend)\s+([A-Za-z_][\w.]*)\s*\{")
        .expect("block regex must compile")
});
static FIELD_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^\s*(?:(?:optional|required|repeated)\s+)?",
        r"(?:map\s*<[^>]*>|[\w.]+)\s+([A-Za-z_]\w*)\s*=\s*\d+",
    ))
    .expect("field regex must compile")
});

/// Field-name-relative comment table of one `.proto` file.
type CommentTable = HashMap<String, String>;

/// Reads leading field comments from the configured source.
pub(crate) struct CommentResolver {
    source: CommentSource,
    scanned: Mutex<HashMap<PathBuf, Arc<CommentTable>>>,
}

impl CommentResolver {
    pub(crate) fn new(source: CommentSource) -> Self {
        Self {
            source,
            scanned: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn leading_comment(
        &self,
        field: &FieldDescriptor,
    ) -> Result<Option<String>, CompilationError> {
        match &self.source {
            CommentSource::SourceInfo => Ok(field.leading_comments()),
            CommentSource::ProtoDir(dir) => {
                let file = field.parent_file();
                let table = self.scan(&dir.join(file.name()))?;
                let package = file.package_name();
                let key = if package.is_empty() {
                    field.full_name()
                } else {
                    field
                        .full_name()
                        .strip_prefix(package)
                        .and_then(|rest| rest.strip_prefix('.'))
                        .unwrap_or(field.full_name())
                };
                Ok(table.get(key).cloned())
            }
            CommentSource::Annotations | CommentSource::Ignore => Ok(None),
        }
    }

    fn scan(&self, path: &Path) -> Result<Arc<CommentTable>, CompilationError> {
        let mut scanned = self
            .scanned
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(table) = scanned.get(path) {
            return Ok(Arc::clone(table));
        }
        let text = std::fs::read_to_string(path).map_err(|err| CompilationError::InvalidConfig {
            cause: format!("cannot read {}: {err}", path.display()),
        })?;
        let table = Arc::new(scan_proto_comments(&text));
        debug!(path = %path.display(), fields = table.len(), "scanned proto comments");
        scanned.insert(path.to_path_buf(), Arc::clone(&table));
        Ok(table)
    }
}

/// Collect the leading comment of every field declaration in `.proto` text,
/// keyed by the package-relative field name (`Outer.Inner.value`).
///
/// Comment text keeps what follows `//` on each line, newline-terminated,
/// the way `SourceCodeInfo` records it. A blank line detaches a comment.
pub(crate) fn scan_proto_comments(text: &str) -> CommentTable {
    let mut table = CommentTable::new();
    let mut scopes: Vec<(bool, String)> = Vec::new();
    let mut pending = String::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            pending.clear();
            continue;
        }
        if let Some(caps) = COMMENT_LINE.captures(line) {
            pending.push_str(&caps[1]);
            pending.push('\n');
            continue;
        }

        if let Some(caps) = BLOCK_OPEN.captures(line) {
            let kind = &caps[1];
            let name = if kind == "message" {
                caps[2].to_string()
            } else {
                String::new()
            };
            scopes.push((matches!(kind, "message" | "oneof"), name));
        } else if let Some(caps) = FIELD_DECL.captures(line) {
            let in_message = scopes.last().is_some_and(|(holds_fields, _)| *holds_fields);
            if in_message && !pending.is_empty() {
                let mut path: Vec<&str> = scopes
                    .iter()
                    .map(|(_, name)| name.as_str())
                    .filter(|name| !name.is_empty())
                    .collect();
                path.push(&caps[1]);
                table.insert(path.join("."), pending.clone());
            }
        }

        for _ in line.matches('}') {
            scopes.pop();
        }
        pending.clear();
    }
    table
}

/// Extract `(key, value)` constraint entries from a comment.
///
/// `<prefix>: {...}` lines contribute every entry of the JSON object;
/// `<prefix>@<key>: <value>` lines contribute one entry whose value is JSON,
/// or the bare text when it is not JSON.
pub(crate) fn parse_directives(
    comment: &str,
    prefix: &str,
    field: &str,
) -> Result<Vec<(String, serde_json::Value)>, CompilationError> {
    let mut entries = Vec::new();
    for line in comment.lines().map(str::trim) {
        let Some(rest) = line.strip_prefix(prefix) else {
            continue;
        };
        let malformed = |cause: String| CompilationError::TemplateDirective {
            token: line.to_string(),
            field: field.to_string(),
            cause,
        };
        if let Some(object) = rest.strip_prefix(':') {
            let object: serde_json::Map<String, serde_json::Value> =
                serde_json::from_str(object.trim()).map_err(|err| malformed(err.to_string()))?;
            entries.extend(object);
        } else if let Some(keyed) = rest.strip_prefix('@') {
            let (key, value) = keyed
                .split_once(':')
                .ok_or_else(|| malformed("expected `<key>: <value>`".to_string()))?;
            let value = value.trim();
            let value = serde_json::from_str(value)
                .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
            entries.push((key.trim().to_string(), value));
        }
    }
    Ok(entries)
}
