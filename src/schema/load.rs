use std::collections::{BTreeMap, BTreeSet};

use jsonschema::JSONSchema;
use log::{debug, info};
use serde_json::Value;
use thiserror::Error;

use crate::schema::config::{DomainEntry, MetadataVariable, SchemaConfig};

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema validation failed: {0}")]
    Validation(String),
    #[error("unknown domain: {0}")]
    UnknownDomain(String),
    #[error("unknown sub-group: {domain}/{subgroup}")]
    UnknownSubgroup { domain: String, subgroup: String },
}

/// Validated domain and metadata tables, loaded once at process start.
/// Immutable afterwards, so it can be shared freely between conversions.
#[derive(Debug)]
pub struct VariableSchema {
    config: SchemaConfig,
}

/// Parse and validate the embedded variable schema tables
pub fn load_schema() -> Result<VariableSchema, SchemaError> {
    /// included domain/sub-group/metadata configuration
    static CONFIG: &str = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/data/schema/variable_schema.json"
    ));
    load_schema_from_str(CONFIG)
}

pub fn load_schema_from_str(raw: &str) -> Result<VariableSchema, SchemaError> {
    let json: Value = serde_json::from_str(raw)
        .map_err(|err| SchemaError::Validation(format!("config is not valid JSON: {err}")))?;

    validate_untyped(&json)?;

    let config: SchemaConfig = serde_json::from_value(json)
        .map_err(|err| SchemaError::Validation(format!("config does not deserialise: {err}")))?;

    validate_semantics(&config)?;
    info!(
        "Loaded variable schema: {} domains, {} metadata variables",
        config.domains.len(),
        config.metadata_variables.len()
    );

    Ok(VariableSchema { config })
}

impl VariableSchema {
    pub fn domains(&self) -> &[DomainEntry] {
        &self.config.domains
    }

    pub fn domain(&self, name: &str) -> Result<&DomainEntry, SchemaError> {
        self.config
            .domains
            .iter()
            .find(|domain| domain.name == name)
            .ok_or_else(|| SchemaError::UnknownDomain(name.to_string()))
    }

    /// Destination container path for a registered domain/sub-group pair
    pub fn resolve_path(&self, domain: &str, subgroup: &str) -> Result<String, SchemaError> {
        let entry = self.domain(domain)?;
        entry
            .subgroups
            .iter()
            .find(|sub| sub.name == subgroup)
            .map(|sub| format!("{}/{}", entry.name, sub.name))
            .ok_or_else(|| SchemaError::UnknownSubgroup {
                domain: domain.to_string(),
                subgroup: subgroup.to_string(),
            })
    }

    pub fn metadata_variables(&self) -> &BTreeMap<String, MetadataVariable> {
        &self.config.metadata_variables
    }
}

/// Structural validation against the embedded JSON Schema, before any
/// typed deserialisation
fn validate_untyped(json: &Value) -> Result<(), SchemaError> {
    /// included JSON Schema describing the config shape
    static API: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/schema/api.json"));

    debug!("Validating raw config against JSON schema");
    let api: Value = serde_json::from_str(API).expect("Valid JSON");
    let compiled = JSONSchema::compile(&api).expect("Valid schema");

    if let Err(mut errors) = compiled.validate(json) {
        let first = errors
            .next()
            .map(|err| err.to_string())
            .unwrap_or_else(|| "unknown structural error".to_string());
        return Err(SchemaError::Validation(first));
    }

    Ok(())
}

fn validate_semantics(config: &SchemaConfig) -> Result<(), SchemaError> {
    for domain in &config.domains {
        let mut sibling_vars: BTreeSet<&str> = BTreeSet::new();
        let mut aggregate_vars: Option<BTreeSet<&str>> = None;

        for subgroup in &domain.subgroups {
            if subgroup.is_metadata_aggregate() {
                if !subgroup.locations.is_empty() {
                    return Err(SchemaError::Validation(format!(
                        "{}/{} is a metadata aggregate but lists storage locations",
                        domain.name, subgroup.name
                    )));
                }
                aggregate_vars =
                    Some(subgroup.metadata_vars.iter().map(String::as_str).collect());
            } else {
                if subgroup.locations.is_empty() {
                    return Err(SchemaError::Validation(format!(
                        "{}/{} has an empty storage location list",
                        domain.name, subgroup.name
                    )));
                }
                sibling_vars.extend(subgroup.metadata_vars.iter().map(String::as_str));
            }

            for reference in &subgroup.metadata_vars {
                if !config.metadata_variables.contains_key(reference) {
                    return Err(SchemaError::Validation(format!(
                        "{}/{} references undefined metadata variable {}",
                        domain.name, subgroup.name, reference
                    )));
                }
            }
        }

        if let Some(aggregate) = aggregate_vars {
            if aggregate != sibling_vars {
                return Err(SchemaError::Validation(format!(
                    "{}/metadata does not equal the union of its siblings' metadata variables",
                    domain.name
                )));
            }
        }
    }

    validate_metadata_targets(config)
}

fn validate_metadata_targets(config: &SchemaConfig) -> Result<(), SchemaError> {
    let mut seen: BTreeSet<&str> = BTreeSet::new();

    for (key, entry) in &config.metadata_variables {
        let (domain_name, subgroup_name) =
            entry.target_group.split_once('/').ok_or_else(|| {
                SchemaError::Validation(format!("{key} has a malformed target group"))
            })?;

        let domain = config
            .domains
            .iter()
            .find(|domain| domain.name == domain_name)
            .ok_or_else(|| {
                SchemaError::Validation(format!(
                    "{key} targets unknown domain {domain_name}"
                ))
            })?;

        if !domain.subgroups.iter().any(|sub| sub.name == subgroup_name) {
            return Err(SchemaError::Validation(format!(
                "{key} targets unknown sub-group {domain_name}/{subgroup_name}"
            )));
        }

        if let Some(code) = &entry.domain {
            if !config.domains.iter().any(|domain| &domain.odessa_name == code) {
                return Err(SchemaError::Validation(format!(
                    "{key} names unregistered ASTEC domain code {code}"
                )));
            }
        }

        // destination paths are unique within a domain; no merge rules
        if !seen.insert(entry.target_group.as_str()) {
            return Err(SchemaError::Validation(format!(
                "{key} duplicates destination path {}",
                entry.target_group
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal_config(metadata_vars: Value, metadata_variables: Value) -> String {
        let aggregate_vars = metadata_vars.clone();
        json!({
            "domains": [{
                "name": "primary",
                "odessa_name": "PRIMARY",
                "description": "primary circuit",
                "subgroups": [
                    {
                        "name": "volume",
                        "description": "volumes",
                        "domains": ["primary_volume"],
                        "metadata_vars": metadata_vars
                    },
                    {
                        "name": "metadata",
                        "description": "aggregate",
                        "metadata_vars": aggregate_vars
                    }
                ]
            }],
            "metadata_variables": metadata_variables
        })
        .to_string()
    }

    fn volume_meta() -> Value {
        json!({
            "domain": "PRIMARY",
            "element": "VOLUME",
            "attribute": "NAME",
            "target_group": "primary/volume",
            "description": "volume names"
        })
    }

    #[test]
    fn embedded_schema_loads_and_validates() {
        let schema = load_schema().unwrap();
        assert_eq!(schema.domains().len(), 6);
        assert!(schema.metadata_variables().contains_key("connection_meta"));
    }

    #[test]
    fn resolves_registered_paths() {
        let schema = load_schema().unwrap();
        assert_eq!(schema.resolve_path("primary", "volume").unwrap(), "primary/volume");
        assert_eq!(schema.resolve_path("vessel", "mesh").unwrap(), "vessel/mesh");
        assert_eq!(
            schema.resolve_path("secondary", "metadata").unwrap(),
            "secondary/metadata"
        );
    }

    #[test]
    fn unknown_names_are_rejected() {
        let schema = load_schema().unwrap();
        assert!(matches!(
            schema.resolve_path("tertiary", "volume"),
            Err(SchemaError::UnknownDomain(_))
        ));
        assert!(matches!(
            schema.resolve_path("primary", "turbine"),
            Err(SchemaError::UnknownSubgroup { .. })
        ));
    }

    #[test]
    fn unresolved_metadata_reference_fails() {
        let raw = minimal_config(
            json!(["missing_meta"]),
            json!({ "primary_volume_meta": volume_meta() }),
        );
        let err = load_schema_from_str(&raw).unwrap_err();
        assert!(err.to_string().contains("missing_meta"));
    }

    #[test]
    fn aggregate_union_mismatch_fails() {
        let raw = json!({
            "domains": [{
                "name": "primary",
                "odessa_name": "PRIMARY",
                "description": "primary circuit",
                "subgroups": [
                    {
                        "name": "volume",
                        "description": "volumes",
                        "domains": ["primary_volume"],
                        "metadata_vars": ["primary_volume_meta"]
                    },
                    { "name": "metadata", "description": "aggregate", "metadata_vars": [] }
                ]
            }],
            "metadata_variables": { "primary_volume_meta": volume_meta() }
        })
        .to_string();

        let err = load_schema_from_str(&raw).unwrap_err();
        assert!(err.to_string().contains("union"));
    }

    #[test]
    fn empty_storage_location_list_fails() {
        let raw = json!({
            "domains": [{
                "name": "primary",
                "odessa_name": "PRIMARY",
                "description": "primary circuit",
                "subgroups": [
                    { "name": "volume", "description": "volumes", "domains": [] }
                ]
            }],
            "metadata_variables": {}
        })
        .to_string();

        let err = load_schema_from_str(&raw).unwrap_err();
        assert!(err.to_string().contains("storage location"));
    }

    #[test]
    fn aggregate_with_locations_fails() {
        let raw = json!({
            "domains": [{
                "name": "primary",
                "odessa_name": "PRIMARY",
                "description": "primary circuit",
                "subgroups": [
                    {
                        "name": "volume",
                        "description": "volumes",
                        "domains": ["primary_volume"]
                    },
                    {
                        "name": "metadata",
                        "description": "aggregate",
                        "domains": ["primary_volume"]
                    }
                ]
            }],
            "metadata_variables": {}
        })
        .to_string();

        assert!(load_schema_from_str(&raw).is_err());
    }

    #[test]
    fn duplicate_destination_path_fails() {
        let raw = minimal_config(
            json!(["primary_volume_meta", "primary_pump_meta"]),
            json!({
                "primary_volume_meta": volume_meta(),
                "primary_pump_meta": {
                    "domain": "PRIMARY",
                    "element": "PUMP",
                    "attribute": ["NAME"],
                    "target_group": "primary/volume",
                    "description": "pump names"
                }
            }),
        );

        let err = load_schema_from_str(&raw).unwrap_err();
        assert!(err.to_string().contains("duplicates destination path"));
    }

    #[test]
    fn structurally_broken_config_fails_before_deserialisation() {
        let err = load_schema_from_str(r#"{ "domains": [] }"#).unwrap_err();
        assert!(matches!(err, SchemaError::Validation(_)));
    }
}
