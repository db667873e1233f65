//! Oneof / discriminated-union stage.
//!
//! Externally a oneof group is flat: its active member appears as an
//! ordinary top-level key under the member's alias. Internally the group is
//! tagged: `{"<group>": {"<member>": value, "<group>_case": "<member>"}}`.
//! [`OneofAdapter::restructure`] runs before field decoding and
//! [`OneofAdapter::flatten`] after encoding, when a schema carries the
//! adapter.

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::error::{Error, ValidationError, merge_violations};
use crate::schema::{MessageSchema, OneofGroup};
use crate::violation::{Violation, ViolationKind};

/// Marker capability enabling the tagged oneof representation for a schema.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OneofAdapter;

impl OneofAdapter {
    /// Rewrite flat member keys into the tagged form.
    ///
    /// Groups given already tagged are accepted. A group with no member
    /// present is left out.
    ///
    /// # Errors
    ///
    /// Returns every [`ViolationKind::DuplicateOneofAlias`] and
    /// [`ViolationKind::MultipleOneofMembersSet`] found across groups, plus
    /// [`ViolationKind::InvalidValue`] for a tagged group whose case key does
    /// not match its member.
    pub fn restructure(
        &self,
        schema: &MessageSchema,
        input: &Map<String, Value>,
    ) -> Result<Map<String, Value>, Error> {
        let mut output = input.clone();
        let mut acc = None;
        for group in schema.oneof_groups.values() {
            let result = restructure_group(schema, group, &mut output);
            (_, acc) = merge_violations(acc, result, false);
        }
        match acc {
            Some(err) => Err(err),
            None => Ok(output),
        }
    }

    /// Replace each tagged group entry with its member under the member's
    /// alias, at the same position. The case key is dropped.
    #[must_use]
    pub fn flatten(
        &self,
        schema: &MessageSchema,
        tagged: Map<String, Value>,
    ) -> Map<String, Value> {
        let mut output = Map::new();
        for (key, value) in tagged {
            let group = schema
                .oneof(&key)
                .filter(|_| !schema.fields.iter().any(|f| f.alias == key));
            match group {
                Some(group) => {
                    if let Some((member, payload)) = untag(group, value) {
                        let alias = schema
                            .field(&member)
                            .map_or(member, |field| field.alias.clone());
                        output.insert(alias, payload);
                    }
                }
                None => {
                    output.insert(key, value);
                }
            }
        }
        output
    }
}

fn restructure_group(
    schema: &MessageSchema,
    group: &OneofGroup,
    output: &mut Map<String, Value>,
) -> Result<(), Error> {
    let mut candidates = drain_member_keys(group, output);

    let claimed_by_field = schema.fields.iter().any(|f| f.alias == group.name);
    let mut declared_case = None;
    if !claimed_by_field && output.get(&group.name).is_some_and(Value::is_object) {
        if let Some(Value::Object(mut tagged)) = output.remove(&group.name) {
            declared_case = tagged.remove(&group.case_key());
            let mut unknown = Vec::new();
            for (key, value) in tagged {
                if group.member_for_key(&key).is_some() {
                    if !value.is_null() {
                        candidates.push((key, value));
                    }
                } else {
                    unknown.push(Violation::new(
                        format!("{}.{key}", group.name),
                        ViolationKind::UnknownField,
                        format!("`{key}` is not a member of oneof `{}`", group.name),
                    ));
                }
            }
            if !unknown.is_empty() {
                return Err(ValidationError::new(unknown).into());
            }
        }
    }

    let selected = select_member(group, candidates)?;
    if let Some(case) = declared_case.filter(|c| !c.is_null()) {
        let named = case.as_str().and_then(|c| group.member_for_key(c));
        let consistent = match (&selected, named) {
            (Some((member, _)), Some(named)) => member == named,
            _ => false,
        };
        if !consistent {
            return Err(ValidationError::single(Violation::new(
                format!("{}.{}", group.name, group.case_key()),
                ViolationKind::InvalidValue,
                format!("case {case} does not name the member set in oneof `{}`", group.name),
            ))
            .into());
        }
    }

    if let Some((member, value)) = selected {
        output.insert(group.name.clone(), tag(group, &member, value));
    }
    Ok(())
}

/// Take the single member of `group` present in a flat object, removing
/// every key that addresses the group. Null values count as absent.
pub(crate) fn take_flat_member(
    group: &OneofGroup,
    input: &mut Map<String, Value>,
) -> Result<Option<(String, Value)>, Error> {
    let candidates = drain_member_keys(group, input);
    select_member(group, candidates)
}

fn drain_member_keys(group: &OneofGroup, input: &mut Map<String, Value>) -> Vec<(String, Value)> {
    let keys: Vec<String> = input
        .keys()
        .filter(|key| group.member_for_key(key).is_some())
        .cloned()
        .collect();
    keys.into_iter()
        .filter_map(|key| {
            let value = input.remove(&key)?;
            (!value.is_null()).then_some((key, value))
        })
        .collect()
}

/// Rules for the keys found for one group: a member reached through two
/// keys is a duplicate, two distinct members are a conflict, one member is
/// selected, none leaves the group unset.
fn select_member(
    group: &OneofGroup,
    candidates: Vec<(String, Value)>,
) -> Result<Option<(String, Value)>, Error> {
    let mut found: IndexMap<String, Vec<(String, Value)>> = IndexMap::new();
    for (key, value) in candidates {
        if let Some(member) = group.member_for_key(&key) {
            found.entry(member.to_string()).or_default().push((key, value));
        }
    }

    let duplicates: Vec<Violation> = found
        .iter()
        .filter(|(_, hits)| hits.len() > 1)
        .map(|(member, hits)| {
            let aliases: Vec<String> = hits.iter().map(|(key, _)| key.clone()).collect();
            Violation::new(
                member.clone(),
                ViolationKind::DuplicateOneofAlias {
                    member: member.clone(),
                    aliases: aliases.clone(),
                },
                format!("`{member}` is set through more than one key: {}", aliases.join(", ")),
            )
        })
        .collect();
    if !duplicates.is_empty() {
        return Err(ValidationError::new(duplicates).into());
    }

    if found.len() > 1 {
        let members: Vec<String> = group
            .members
            .iter()
            .filter(|m| found.contains_key(*m))
            .cloned()
            .collect();
        return Err(ValidationError::single(Violation::new(
            group.name.clone(),
            ViolationKind::MultipleOneofMembersSet {
                group: group.name.clone(),
                members: members.clone(),
            },
            format!(
                "only one member of oneof `{}` may be set, found {}",
                group.name,
                members.join(", ")
            ),
        ))
        .into());
    }

    Ok(found
        .into_iter()
        .next()
        .and_then(|(member, mut hits)| hits.pop().map(|(_, value)| (member, value))))
}

pub(crate) fn tag(group: &OneofGroup, member: &str, value: Value) -> Value {
    let mut tagged = Map::new();
    tagged.insert(member.to_string(), value);
    tagged.insert(group.case_key(), Value::String(member.to_string()));
    Value::Object(tagged)
}

/// Member name and payload of a tagged group value.
pub(crate) fn untag(group: &OneofGroup, value: Value) -> Option<(String, Value)> {
    let Value::Object(mut tagged) = value else {
        return None;
    };
    let member = match tagged.remove(&group.case_key()) {
        Some(Value::String(member)) => member,
        _ => tagged
            .keys()
            .find(|key| group.members.contains(key))?
            .clone(),
    };
    let payload = tagged.remove(&member)?;
    Some((member, payload))
}
