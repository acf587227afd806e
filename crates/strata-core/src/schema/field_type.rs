//! The closed set of field kinds.

use std::fmt;

/// Field kinds supported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// Storage identity of a record.
    Pk,
    /// UTF-8 text.
    Text,
    /// Translatable text (stored as text).
    TranslText,
    /// Arbitrary precision number.
    Number,
    /// 64-bit integer.
    Long,
    /// 64-bit float.
    Double,
    /// Boolean.
    Bool,
    /// Time of day.
    Time,
    /// Calendar date.
    Date,
    /// Date and time without zone.
    DateTime,
    /// Array of text values.
    TextArray,
    /// Opaque JSON object.
    Record,
    /// Reference to a record of a fixed entity.
    EntityRef,
    /// Record of an embedable entity owned by the referencing row.
    EntityEmbedded,
    /// Reference whose target entity is chosen per row.
    GenericEntityRef,
    /// Array of references to records of a fixed entity.
    EntityRefArray,
    /// Hashed secret.
    Password,
}

const ALL: [FieldType; 17] = [
    FieldType::Pk,
    FieldType::Text,
    FieldType::TranslText,
    FieldType::Number,
    FieldType::Long,
    FieldType::Double,
    FieldType::Bool,
    FieldType::Time,
    FieldType::Date,
    FieldType::DateTime,
    FieldType::TextArray,
    FieldType::Record,
    FieldType::EntityRef,
    FieldType::EntityEmbedded,
    FieldType::GenericEntityRef,
    FieldType::EntityRefArray,
    FieldType::Password,
];

const ALIASES: [(&str, FieldType); 3] = [
    ("QUANTITY", FieldType::Long),
    ("DECIMAL", FieldType::Double),
    ("[TEXT]", FieldType::TextArray),
];

impl FieldType {
    /// Every kind, in declaration order.
    pub fn all() -> &'static [FieldType] {
        &ALL
    }

    /// Canonical name.
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Pk => "PK",
            FieldType::Text => "TEXT",
            FieldType::TranslText => "TRANSL_TEXT",
            FieldType::Number => "NUMBER",
            FieldType::Long => "LONG",
            FieldType::Double => "DOUBLE",
            FieldType::Bool => "BOOL",
            FieldType::Time => "TIME",
            FieldType::Date => "DATE",
            FieldType::DateTime => "DATETIME",
            FieldType::TextArray => "TEXT_ARRAY",
            FieldType::Record => "RECORD",
            FieldType::EntityRef => "ENTITY_REF",
            FieldType::EntityEmbedded => "ENTITY_EMBEDDED",
            FieldType::GenericEntityRef => "GENERIC_ENTITY_REF",
            FieldType::EntityRefArray => "ENTITY_REF_ARRAY",
            FieldType::Password => "PASSWORD",
        }
    }

    /// Look up a kind by canonical name, ignoring case.
    pub fn from_name(name: &str) -> Option<FieldType> {
        ALL.iter()
            .copied()
            .find(|t| t.name().eq_ignore_ascii_case(name))
    }

    /// Look up a kind by alias. Aliases match exactly.
    pub fn from_alias(alias: &str) -> Option<FieldType> {
        ALIASES
            .iter()
            .find(|(a, _)| *a == alias)
            .map(|(_, t)| *t)
    }

    /// Kinds that map onto exactly one scalar column with no resolution.
    pub fn is_one_to_one(&self) -> bool {
        match self {
            FieldType::Pk
            | FieldType::Text
            | FieldType::TranslText
            | FieldType::Number
            | FieldType::Long
            | FieldType::Double
            | FieldType::Bool
            | FieldType::Time
            | FieldType::Date
            | FieldType::DateTime
            | FieldType::TextArray => true,
            FieldType::Record
            | FieldType::EntityRef
            | FieldType::EntityEmbedded
            | FieldType::GenericEntityRef
            | FieldType::EntityRefArray
            | FieldType::Password => false,
        }
    }

    /// Kinds that carry a fixed target entity.
    pub fn has_target_entity(&self) -> bool {
        matches!(
            self,
            FieldType::EntityRef | FieldType::EntityEmbedded | FieldType::EntityRefArray
        )
    }

    /// Kinds allowed in a logical key.
    pub fn can_be_logical_key(&self) -> bool {
        match self {
            FieldType::TextArray => false,
            FieldType::EntityRef => true,
            other => other.is_one_to_one(),
        }
    }

    /// Kinds usable in a filter comparison.
    pub fn is_filterable(&self) -> bool {
        match self {
            FieldType::TextArray => false,
            FieldType::EntityRef => true,
            other => other.is_one_to_one(),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
