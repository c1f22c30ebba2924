//! Blueprint models

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A user-supplied parameter value.
///
/// Values arrive as untyped JSON; this keeps them closed over the shapes the
/// rule engine knows how to check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<ParamValue>),
    Object(BTreeMap<String, ParamValue>),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, ParamValue>> {
        match self {
            ParamValue::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Look up a non-empty string field of an object value
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.as_object()
            .and_then(|map| map.get(key))
            .and_then(ParamValue::as_str)
            .filter(|s| !s.is_empty())
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Null => write!(f, "null"),
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Number(n) => write!(f, "{}", n),
            ParamValue::String(s) => write!(f, "{}", s),
            other => {
                let json = serde_json::to_string(other).map_err(|_| fmt::Error)?;
                write!(f, "{}", json)
            }
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::String(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::String(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

/// Declared type of a component parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    #[serde(rename = "string")]
    String,

    #[serde(rename = "file_list", alias = "fileList")]
    FileList,

    /// Types without a dedicated check
    #[serde(other)]
    Other,
}

/// UI hint for a component parameter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UiType {
    #[default]
    Text,
    Select,
    File,
    FileList,
    Textarea,
    Checkbox,
    Radio,
    #[serde(other)]
    Other,
}

/// Validation rules attached to a component parameter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterRules {
    #[serde(default)]
    pub required: bool,

    /// Other parameter name -> value that makes this one required
    #[serde(default)]
    pub required_if: BTreeMap<String, String>,
}

/// Parameter schema declared by a component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentParameter {
    pub id: String,
    pub name: String,
    pub value_type: ValueType,

    #[serde(default)]
    pub rules: ParameterRules,

    #[serde(default)]
    pub ui_type: UiType,

    /// Allowed values, only enforced for `select`
    #[serde(default)]
    pub options: Vec<String>,

    #[serde(default)]
    pub default: Option<ParamValue>,

    #[serde(default)]
    pub description: String,
}

/// A value supplied by the blueprint author for one parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueprintParameter {
    pub id: String,
    pub name: String,

    #[serde(default = "null_value")]
    pub value: ParamValue,
}

fn null_value() -> ParamValue {
    ParamValue::Null
}

/// One configured component instance inside a blueprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueprintComponent {
    pub id: i64,
    pub component_id: i64,

    /// Plan order; ties keep input order
    pub position: i32,

    /// Key into the role registry
    pub ansible_role: String,

    pub component_parameters: Vec<ComponentParameter>,
    pub blueprint_parameters: Vec<BlueprintParameter>,
}

/// An authored blueprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    pub id: i64,
    pub name: String,
    pub status: String,
}

impl Blueprint {
    /// Check the blueprint header is usable for generation
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() || self.status.trim().is_empty() {
            return Err("name and status cannot be None".to_string());
        }
        Ok(())
    }
}
