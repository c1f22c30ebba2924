//! Parameter rule engine
//!
//! Checks the values a blueprint author supplied for one component against the
//! schema that component declares. Checks run in a fixed order and the first
//! failure is returned.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

use crate::models::blueprint::{
    BlueprintParameter, ComponentParameter, ParamValue, UiType, ValueType,
};

/// Why a component's parameters were rejected
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParameterError {
    #[error("parameters cannot be None")]
    MissingParameters,

    #[error("duplicate parameter: {name} (id: {id})")]
    DuplicateParameter { name: String, id: String },

    #[error("missing required parameter: {name}")]
    MissingRequired { name: String },

    #[error("unknown parameter: {name}")]
    UnknownReference { name: String },

    #[error("parameter {name} is required because {other} is {expected}")]
    RequiredBecause {
        name: String,
        other: String,
        expected: String,
    },

    #[error("parameter {name} expects a string value")]
    ExpectsString { name: String },

    #[error("parameter {name} expects file list structure, got: {value}")]
    ExpectsFileList { name: String, value: String },

    #[error("parameter {name} has invalid file list entry: missing filename or URL")]
    InvalidFileEntry { name: String },

    #[error("parameter {name} has invalid value: {value}")]
    InvalidOption { name: String, value: String },

    #[error("unknown parameter: {name} (id: {id})")]
    UnknownParameter { name: String, id: String },
}

/// Validate user-supplied values against a component's parameter schema
pub fn validate(
    component_params: &[ComponentParameter],
    blueprint_params: &[BlueprintParameter],
) -> Result<(), ParameterError> {
    if component_params.is_empty() || blueprint_params.is_empty() {
        return Err(ParameterError::MissingParameters);
    }

    let schema_by_id: HashMap<&str, &ComponentParameter> = component_params
        .iter()
        .map(|cp| (cp.id.as_str(), cp))
        .collect();
    let id_by_name: HashMap<&str, &str> = component_params
        .iter()
        .map(|cp| (cp.name.as_str(), cp.id.as_str()))
        .collect();

    // Sorted so the unknown-parameter scan reports the same entry for any input order.
    let mut values: BTreeMap<&str, &BlueprintParameter> = BTreeMap::new();
    for bp in blueprint_params {
        if values.insert(bp.id.as_str(), bp).is_some() {
            return Err(ParameterError::DuplicateParameter {
                name: bp.name.clone(),
                id: bp.id.clone(),
            });
        }
    }

    for schema in component_params {
        let supplied = values.get(schema.id.as_str()).copied();

        if schema.rules.required && supplied.is_none() {
            return Err(ParameterError::MissingRequired {
                name: schema.name.clone(),
            });
        }

        for (other_name, expected) in &schema.rules.required_if {
            let other = id_by_name
                .get(other_name.as_str())
                .and_then(|other_id| values.get(other_id))
                .ok_or_else(|| ParameterError::UnknownReference {
                    name: other_name.clone(),
                })?;

            if other.value.to_string() == *expected && supplied.is_none() {
                return Err(ParameterError::RequiredBecause {
                    name: schema.name.clone(),
                    other: other_name.clone(),
                    expected: expected.clone(),
                });
            }
        }

        if let Some(param) = supplied {
            check_value(schema, &param.value)?;
        }
    }

    for (id, bp) in &values {
        if !schema_by_id.contains_key(id) {
            return Err(ParameterError::UnknownParameter {
                name: bp.name.clone(),
                id: bp.id.clone(),
            });
        }
    }

    Ok(())
}

fn check_value(schema: &ComponentParameter, value: &ParamValue) -> Result<(), ParameterError> {
    match schema.value_type {
        ValueType::String => {
            if value.as_str().is_none() {
                return Err(ParameterError::ExpectsString {
                    name: schema.name.clone(),
                });
            }
        }
        ValueType::FileList => check_file_list(&schema.name, value)?,
        ValueType::Other => {}
    }

    if schema.ui_type == UiType::Select && !schema.options.is_empty() {
        let rendered = value.to_string();
        if !schema.options.iter().any(|option| *option == rendered) {
            return Err(ParameterError::InvalidOption {
                name: schema.name.clone(),
                value: rendered,
            });
        }
    }

    Ok(())
}

fn check_file_list(name: &str, value: &ParamValue) -> Result<(), ParameterError> {
    let shape_error = || ParameterError::ExpectsFileList {
        name: name.to_string(),
        value: value.to_string(),
    };

    let ParamValue::List(entries) = value else {
        return Err(shape_error());
    };

    for entry in entries {
        if entry.as_object().is_none() {
            return Err(shape_error());
        }
        if entry.str_field("filename").is_none() && entry.str_field("url").is_none() {
            return Err(ParameterError::InvalidFileEntry {
                name: name.to_string(),
            });
        }
    }

    Ok(())
}
