//! Declarative legacy-to-canonical field tables.

use serde_json::{Map, Value};

use super::SaeConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FixedValue {
    Null,
    Bool(bool),
    Int(i64),
    Str(&'static str),
}

impl From<FixedValue> for Value {
    fn from(value: FixedValue) -> Self {
        match value {
            FixedValue::Null => Value::Null,
            FixedValue::Bool(flag) => Value::Bool(flag),
            FixedValue::Int(number) => Value::from(number),
            FixedValue::Str(text) => Value::from(text),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldRule {
    /// Copy the value stored under a legacy key.
    Rename(&'static str),
    /// Value fixed for the checkpoint family the table targets.
    Fixed(FixedValue),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldMapping {
    pub target: &'static str,
    pub rule: FieldRule,
}

impl FieldMapping {
    pub const fn rename(
        target: &'static str,
        legacy: &'static str,
    ) -> Self {
        Self {
            target,
            rule: FieldRule::Rename(legacy),
        }
    }

    pub const fn fixed(
        target: &'static str,
        value: FixedValue,
    ) -> Self {
        Self {
            target,
            rule: FieldRule::Fixed(value),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TranslationTable {
    pub name: &'static str,
    pub fields: &'static [FieldMapping],
}

#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub config: SaeConfig,
    /// Canonical keys whose legacy source was absent.
    pub unresolved: Vec<&'static str>,
}

impl TranslationTable {
    /// Builds the canonical config in table order. Legacy keys not named by
    /// the table are dropped.
    pub fn translate(
        &self,
        legacy: &Map<String, Value>,
    ) -> Translation {
        let mut config = SaeConfig::new();
        let mut unresolved = Vec::new();
        for mapping in self.fields {
            match mapping.rule {
                FieldRule::Rename(legacy_key) => match legacy.get(legacy_key) {
                    Some(value) => {
                        config.insert(mapping.target, value.clone());
                    },
                    None => unresolved.push(mapping.target),
                },
                FieldRule::Fixed(value) => {
                    config.insert(mapping.target, Value::from(value));
                },
            }
        }
        Translation {
            config,
            unresolved,
        }
    }

    pub fn targets(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|mapping| mapping.target)
    }
}
