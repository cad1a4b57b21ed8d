// ABOUTME: Loader document settings: per-table field prefixes and field-name transforms
// ABOUTME: Read from the reserved `__settings__` key of a loader document

use crate::error::DbaError;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

pub const SETTINGS_KEY: &str = "__settings__";

/// String transform applied to every resolved field name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldNameTransform {
    Upper,
    Lower,
    Capitalize,
    Title,
    Swapcase,
    Strip,
}

impl FieldNameTransform {
    pub fn apply(self, name: &str) -> String {
        match self {
            FieldNameTransform::Upper => name.to_uppercase(),
            FieldNameTransform::Lower => name.to_lowercase(),
            FieldNameTransform::Capitalize => {
                let mut chars = name.chars();
                match chars.next() {
                    Some(first) => first
                        .to_uppercase()
                        .chain(chars.flat_map(char::to_lowercase))
                        .collect(),
                    None => String::new(),
                }
            }
            FieldNameTransform::Title => {
                // Words start after any non-alphabetic character
                let mut out = String::with_capacity(name.len());
                let mut in_word = false;
                for c in name.chars() {
                    if c.is_alphabetic() {
                        if in_word {
                            out.extend(c.to_lowercase());
                        } else {
                            out.extend(c.to_uppercase());
                        }
                        in_word = true;
                    } else {
                        out.push(c);
                        in_word = false;
                    }
                }
                out
            }
            FieldNameTransform::Swapcase => name
                .chars()
                .flat_map(|c| {
                    if c.is_uppercase() {
                        c.to_lowercase().collect::<Vec<_>>()
                    } else {
                        c.to_uppercase().collect::<Vec<_>>()
                    }
                })
                .collect(),
            FieldNameTransform::Strip => name.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LoaderOptions {
    #[serde(default)]
    pub fieldname: Option<FieldNameTransform>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LoaderSettings {
    #[serde(default)]
    pub prefixes: HashMap<String, String>,
    #[serde(default)]
    pub options: LoaderOptions,
}

impl LoaderSettings {
    /// Settings of a loader document; defaults when it has no `__settings__`
    pub fn from_document(document: &serde_json::Map<String, Value>) -> anyhow::Result<Self> {
        match document.get(SETTINGS_KEY) {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(raw) => serde_json::from_value(raw.clone())
                .map_err(|e| DbaError::InvalidSettings(e.to_string()).into()),
        }
    }

    /// Column name for `field` of `table`: the table's prefix, then the
    /// configured transform
    pub fn resolve_fieldname(&self, table: &str, field: &str) -> String {
        let prefixed = match self.prefixes.get(table) {
            Some(prefix) => format!("{}{}", prefix, field),
            None => field.to_string(),
        };
        match self.options.fieldname {
            Some(transform) => transform.apply(&prefixed),
            None => prefixed,
        }
    }
}
