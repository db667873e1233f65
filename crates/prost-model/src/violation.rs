use std::fmt;

/// Machine-readable category of a [`Violation`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ViolationKind {
    /// A oneof member was supplied under both its field name and its alias.
    DuplicateOneofAlias {
        /// Field name of the member.
        member: String,
        /// Every input key the member was found under.
        aliases: Vec<String>,
    },
    /// More than one member of a oneof group was supplied.
    MultipleOneofMembersSet {
        /// Name of the oneof group.
        group: String,
        /// Field names of every supplied member, in declaration order.
        members: Vec<String>,
    },
    /// A required oneof group had no member set.
    RequiredOneofMissing {
        /// Name of the oneof group.
        group: String,
    },
    /// A value had the wrong JSON or model shape for its field.
    TypeMismatch {
        /// Short name of the expected type.
        expected: &'static str,
    },
    /// A numeric value does not fit the field's scalar kind.
    OutOfRange {
        /// Short name of the target scalar kind.
        expected: &'static str,
    },
    /// A value had the right shape but could not be interpreted.
    InvalidValue,
    /// An input key did not match any field.
    UnknownField,
}

impl ViolationKind {
    /// Stable identifier of this violation category.
    #[must_use]
    pub fn rule_id(&self) -> &'static str {
        match self {
            Self::DuplicateOneofAlias { .. } => "oneof.duplicate_alias",
            Self::MultipleOneofMembersSet { .. } => "oneof.multiple_members",
            Self::RequiredOneofMissing { .. } => "oneof.required",
            Self::TypeMismatch { .. } => "type_mismatch",
            Self::OutOfRange { .. } => "out_of_range",
            Self::InvalidValue => "invalid_value",
            Self::UnknownField => "unknown_field",
        }
    }
}

/// A single value that was rejected by a model.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Violation {
    field_path: String,
    kind: ViolationKind,
    message: String,
}

impl Violation {
    pub(crate) fn new(
        field_path: impl Into<String>,
        kind: ViolationKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field_path: field_path.into(),
            kind,
            message: message.into(),
        }
    }

    /// Returns the dot-separated field path where this violation occurred.
    ///
    /// List elements and map values appear as `field[index]` / `field["key"]`.
    #[must_use]
    pub fn field_path(&self) -> &str {
        &self.field_path
    }

    /// Returns the violation category.
    #[must_use]
    pub fn kind(&self) -> &ViolationKind {
        &self.kind
    }

    /// Returns the machine-readable identifier of the violation category.
    #[must_use]
    pub fn rule_id(&self) -> &'static str {
        self.kind.rule_id()
    }

    /// Returns the human-readable violation message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Prefix the field path with a parent segment.
    ///
    /// Subscript segments (`[0]`, `["key"]`) attach without a separating dot.
    pub(crate) fn prepend_path(&mut self, segment: &str) {
        if segment.is_empty() {
            return;
        }
        self.field_path = if self.field_path.is_empty() {
            segment.to_string()
        } else if self.field_path.starts_with('[') {
            format!("{segment}{}", self.field_path)
        } else {
            format!("{segment}.{}", self.field_path)
        };
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.field_path.is_empty() {
            write!(f, "{}: ", self.field_path)?;
        }
        if self.message.is_empty() {
            write!(f, "[{}]", self.rule_id())
        } else {
            write!(f, "{}", self.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{Violation, ViolationKind};

    #[test]
    fn display_falls_back_to_rule_id() {
        let kind = ViolationKind::RequiredOneofMissing {
            group: "kind".into(),
        };
        let v = Violation::new("", kind, "");
        assert_eq!(v.to_string(), "[oneof.required]");

        let v = Violation::new("count", ViolationKind::InvalidValue, "bad");
        assert_eq!(v.to_string(), "count: bad");
    }

    #[test]
    fn prepend_path_joins_fields_and_subscripts() {
        let mut v = Violation::new("value", ViolationKind::InvalidValue, "");
        v.prepend_path("[2]");
        v.prepend_path("items");
        v.prepend_path("outer");
        assert_eq!(v.field_path(), "outer.items[2].value");

        let mut v = Violation::new("", ViolationKind::InvalidValue, "");
        v.prepend_path("root");
        assert_eq!(v.field_path(), "root");
    }
}
