use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use prost_model_types::OneofAnnotationsExt;
use prost_reflect::{EnumDescriptor, MessageDescriptor};
use tracing::debug;

use super::constraints::ConstraintMerger;
use super::types::{TypeResolver, map_field};
use super::walker::walk;
use crate::config::{CompileConfig, ModelConfig};
use crate::error::CompilationError;
use crate::model::adapter::OneofAdapter;
use crate::schema::{
    DefaultFactory, DefaultPolicy, DescriptorKey, EnumSchema, FieldRecord, MessageSchema, OneofGroup, SchemaRef,
    SchemaRegistry, ValueType,
};

/// Builds every schema reachable from a root descriptor against a
/// committed registry snapshot.
///
/// Nothing is written back until [`Assembler::assemble`] returns a new
/// registry, so a failed build leaves the committed snapshot untouched.
pub(crate) struct Assembler<'a> {
    config: &'a CompileConfig,
    merger: ConstraintMerger<'a>,
    committed: &'a SchemaRegistry,
    /// Descriptors whose schemas are being built; a reference to one of these
    /// is returned without recursing.
    placeholders: Vec<MessageDescriptor>,
    built: HashMap<DescriptorKey<MessageDescriptor>, MessageSchema>,
    enums: HashMap<DescriptorKey<EnumDescriptor>, Arc<EnumSchema>>,
    hoisted: HashMap<DescriptorKey<MessageDescriptor>, String>,
    references: HashMap<DescriptorKey<MessageDescriptor>, Vec<MessageDescriptor>>,
    eager: HashMap<DescriptorKey<MessageDescriptor>, Vec<MessageDescriptor>>,
    order: Vec<MessageDescriptor>,
}

impl<'a> Assembler<'a> {
    pub(crate) fn new(
        config: &'a CompileConfig,
        merger: ConstraintMerger<'a>,
        committed: &'a SchemaRegistry,
    ) -> Self {
        Self {
            config,
            merger,
            committed,
            placeholders: Vec::new(),
            built: HashMap::new(),
            enums: HashMap::new(),
            hoisted: HashMap::new(),
            references: HashMap::new(),
            eager: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Build `root` and everything it reaches, returning the next registry.
    pub(crate) fn assemble(
        mut self,
        root: &MessageDescriptor,
    ) -> Result<SchemaRegistry, CompilationError> {
        self.ensure(root)?;
        self.check_eager_cycles()?;
        self.mark_self_referential();
        Ok(self.into_registry())
    }

    fn ensure(&mut self, descriptor: &MessageDescriptor) -> Result<(), CompilationError> {
        if self.committed.get(descriptor).is_some()
            || self.built.contains_key(&DescriptorKey(descriptor.clone()))
            || self.placeholders.contains(descriptor)
        {
            return Ok(());
        }

        self.placeholders.push(descriptor.clone());
        let result = self.build_message(descriptor);
        self.placeholders.pop();

        let schema = result?;
        debug!(message = %schema.full_name, fields = schema.fields.len(), "built message schema");
        self.order.push(descriptor.clone());
        self.built.insert(DescriptorKey(descriptor.clone()), schema);
        Ok(())
    }

    fn build_message(
        &mut self,
        descriptor: &MessageDescriptor,
    ) -> Result<MessageSchema, CompilationError> {
        let config = self.resolve_config(descriptor);

        let mut nested = Vec::new();
        for child in descriptor.child_messages() {
            if child.is_map_entry() {
                continue;
            }
            self.ensure(&child)?;
            nested.push(SchemaRef {
                full_name: child.full_name().to_string(),
                type_name: child.name().to_string(),
                descriptor: child,
            });
        }
        let enums = descriptor
            .child_enums()
            .map(|e| self.enum_schema(&e))
            .collect();

        let mut fields = Vec::new();
        for raw in walk(descriptor)? {
            let mapped = map_field(&raw, self)?;
            let merged = self.merger.merge(&raw, mapped.default)?;
            if let ValueType::Message(target) = &mapped.value_type {
                if builds_eagerly(&merged.default) {
                    self.eager
                        .entry(DescriptorKey(descriptor.clone()))
                        .or_default()
                        .push(target.descriptor.clone());
                }
            }
            fields.push(FieldRecord {
                alias: merged
                    .alias
                    .unwrap_or_else(|| config.alias.key_for(&raw.name)),
                name: raw.name,
                number: raw.number,
                full_name: raw.full_name,
                json_name: raw.json_name,
                wire_kind: mapped.wire_kind,
                wire_type: raw.wire_type,
                label: raw.label,
                presence: mapped.presence,
                value_type: mapped.value_type,
                default: merged.default,
                constraints: merged.constraints,
                oneof_group: raw.oneof,
            });
        }

        let oneof_groups = self.oneof_groups(descriptor, &fields, &config);
        let adapter = (self.config.use_discriminated_unions_for_oneofs && !oneof_groups.is_empty())
            .then(OneofAdapter::default);

        Ok(MessageSchema {
            name: descriptor.name().to_string(),
            full_name: descriptor.full_name().to_string(),
            descriptor: descriptor.clone(),
            fields,
            nested,
            enums,
            oneof_groups,
            config,
            self_referential: false,
            adapter,
        })
    }

    fn oneof_groups(
        &self,
        descriptor: &MessageDescriptor,
        fields: &[FieldRecord],
        config: &ModelConfig,
    ) -> IndexMap<String, OneofGroup> {
        let mut groups = IndexMap::new();
        for oneof in descriptor.oneofs().filter(|o| !o.is_synthetic()) {
            let members: Vec<&FieldRecord> = fields
                .iter()
                .filter(|f| f.oneof_group.as_deref() == Some(oneof.name()))
                .collect();
            let mut aliases = IndexMap::new();
            for member in &members {
                aliases.insert(member.alias.clone(), member.name.clone());
                if config.populate_by_name {
                    aliases
                        .entry(member.name.clone())
                        .or_insert_with(|| member.name.clone());
                }
            }
            let required = oneof.is_required()
                || self
                    .config
                    .required_oneofs
                    .iter()
                    .any(|name| name == oneof.full_name());
            groups.insert(
                oneof.name().to_string(),
                OneofGroup {
                    name: oneof.name().to_string(),
                    members: members.iter().map(|m| m.name.clone()).collect(),
                    required,
                    aliases,
                },
            );
        }
        groups
    }

    /// Global model config, then the package override, then the parent
    /// chain, then the message's own override.
    fn resolve_config(&self, descriptor: &MessageDescriptor) -> ModelConfig {
        let base = match descriptor.parent_message() {
            Some(parent) => self.resolve_config(&parent),
            None => self
                .config
                .pkg_config
                .get(descriptor.package_name())
                .map_or(self.config.model, |pkg| pkg.model.apply(self.config.model)),
        };
        self.config
            .message_overrides
            .get(descriptor.full_name())
            .map_or(base, |over| over.apply(base))
    }

    /// Name of `target` as seen from `from`.
    fn type_name(
        &mut self,
        from: Option<&MessageDescriptor>,
        target: &MessageDescriptor,
    ) -> String {
        if target.parent_message().is_none() {
            return target.name().to_string();
        }
        let relative = relative_name(target);
        let same_root = from.is_some_and(|from| top_level(from) == top_level(target));
        if same_root {
            return relative;
        }
        let hoisted = relative.replace('.', "_");
        self.hoisted.insert(DescriptorKey(target.clone()), hoisted.clone());
        hoisted
    }

    fn check_eager_cycles(&self) -> Result<(), CompilationError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Active,
            Done,
        }

        fn visit(
            node: &MessageDescriptor,
            edges: &HashMap<DescriptorKey<MessageDescriptor>, Vec<MessageDescriptor>>,
            marks: &mut HashMap<DescriptorKey<MessageDescriptor>, Mark>,
            path: &mut Vec<MessageDescriptor>,
        ) -> Option<Vec<String>> {
            match marks.get(&DescriptorKey(node.clone())) {
                Some(Mark::Done) => return None,
                Some(Mark::Active) => {
                    let start = path.iter().position(|d| d == node).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..]
                        .iter()
                        .map(|d| d.full_name().to_string())
                        .collect();
                    cycle.push(node.full_name().to_string());
                    return Some(cycle);
                }
                None => {}
            }
            marks.insert(DescriptorKey(node.clone()), Mark::Active);
            path.push(node.clone());
            for next in edges.get(&DescriptorKey(node.clone())).into_iter().flatten() {
                if let Some(cycle) = visit(next, edges, marks, path) {
                    return Some(cycle);
                }
            }
            path.pop();
            marks.insert(DescriptorKey(node.clone()), Mark::Done);
            None
        }

        let mut marks = HashMap::new();
        for node in &self.order {
            let mut path = Vec::new();
            if let Some(cycle) = visit(node, &self.eager, &mut marks, &mut path) {
                return Err(CompilationError::CyclicDefault { path: cycle });
            }
        }
        Ok(())
    }

    /// A schema is self-referential when it reaches itself through field
    /// references. Committed schemas never reach new ones.
    fn mark_self_referential(&mut self) {
        let cyclic: HashSet<DescriptorKey<MessageDescriptor>> = self
            .order
            .iter()
            .filter(|node| reaches(node, node, &self.references))
            .cloned()
            .map(DescriptorKey)
            .collect();
        for (descriptor, schema) in &mut self.built {
            schema.self_referential = cyclic.contains(descriptor);
        }
    }

    fn into_registry(self) -> SchemaRegistry {
        let mut registry = self.committed.clone();
        for (descriptor, schema) in self.built {
            registry.schemas.insert(descriptor, Arc::new(schema));
        }
        registry.enums.extend(self.enums);
        registry.hoisted.extend(self.hoisted);
        registry
    }
}

impl TypeResolver for Assembler<'_> {
    fn message_ref(&mut self, target: &MessageDescriptor) -> Result<SchemaRef, CompilationError> {
        let from = self.placeholders.last().cloned();
        if let Some(from) = &from {
            self.references
                .entry(DescriptorKey(from.clone()))
                .or_default()
                .push(target.clone());
        }
        self.ensure(target)?;
        Ok(SchemaRef {
            full_name: target.full_name().to_string(),
            type_name: self.type_name(from.as_ref(), target),
            descriptor: target.clone(),
        })
    }

    fn enum_schema(&mut self, target: &EnumDescriptor) -> Arc<EnumSchema> {
        if let Some(schema) = self.committed.enums.get(&DescriptorKey(target.clone())) {
            return Arc::clone(schema);
        }
        Arc::clone(
            self.enums
                .entry(DescriptorKey(target.clone()))
                .or_insert_with(|| Arc::new(EnumSchema::from_descriptor(target))),
        )
    }
}

/// True when a message field's final default constructs the target model
/// at instantiation. A `null` literal leaves the field absent.
fn builds_eagerly(default: &DefaultPolicy) -> bool {
    match default {
        DefaultPolicy::Factory(DefaultFactory::Model) => true,
        DefaultPolicy::Literal(literal) => !literal.is_null(),
        _ => false,
    }
}

fn reaches(
    start: &MessageDescriptor,
    goal: &MessageDescriptor,
    edges: &HashMap<DescriptorKey<MessageDescriptor>, Vec<MessageDescriptor>>,
) -> bool {
    let mut seen = HashSet::new();
    let mut stack: Vec<&MessageDescriptor> = edges
        .get(&DescriptorKey(start.clone()))
        .into_iter()
        .flatten()
        .collect();
    while let Some(node) = stack.pop() {
        if node == goal {
            return true;
        }
        if seen.insert(DescriptorKey(node.clone())) {
            stack.extend(edges.get(&DescriptorKey(node.clone())).into_iter().flatten());
        }
    }
    false
}

fn top_level(descriptor: &MessageDescriptor) -> MessageDescriptor {
    let mut current = descriptor.clone();
    while let Some(parent) = current.parent_message() {
        current = parent;
    }
    current
}

/// Dotted name below the package, e.g. `Outer.Inner`.
fn relative_name(descriptor: &MessageDescriptor) -> String {
    let package = descriptor.package_name();
    if package.is_empty() {
        return descriptor.full_name().to_string();
    }
    descriptor
        .full_name()
        .strip_prefix(package)
        .and_then(|rest| rest.strip_prefix('.'))
        .unwrap_or(descriptor.full_name())
        .to_string()
}
