use std::fmt;

use crate::{error::ValidationError, uast::Type};

/// A configuration object: a named record of control-plane fields that
/// procedures may read (`cfg.field`) and write (`cfg.field = e`).
///
/// Configs are declared as decorated host classes with `name : type` fields
/// and parsed by [`crate::parse_config`]. Field types are restricted to the
/// control-plane set plus concrete numeric scalars; the generic `num` type
/// and tensors are rejected.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Config {
    name: String,
    fields: Vec<ConfigField>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConfigField {
    pub name: String,
    pub typ: Type,
}

impl Config {
    pub fn new(name: &str, fields: Vec<ConfigField>) -> Result<Self, ValidationError> {
        for field in &fields {
            if !field.typ.is_config_field() {
                return Err(ValidationError::new(format!(
                    "config '{name}' field '{}' has non-scalar type",
                    field.name
                )));
            }
        }
        Ok(Self {
            name: name.to_owned(),
            fields,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[ConfigField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&ConfigField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
