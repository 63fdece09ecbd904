use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};

/// Name of the reserved aggregate sub-group collecting its siblings'
/// metadata variables. It has no storage locations of its own.
pub const METADATA_SUBGROUP: &str = "metadata";

#[derive(Debug, Deserialize)]
pub struct SchemaConfig {
    pub domains: Vec<DomainEntry>,
    pub metadata_variables: BTreeMap<String, MetadataVariable>,
}

/// One physical domain of the simulated reactor (primary circuit, vessel, ...)
#[derive(Debug, Deserialize)]
pub struct DomainEntry {
    pub name: String,
    /// ASTEC-internal domain code, e.g. "SECONDAR"
    pub odessa_name: String,
    pub description: String,
    pub subgroups: Vec<SubgroupEntry>,
}

#[derive(Debug, Deserialize)]
pub struct SubgroupEntry {
    pub name: String,
    pub description: String,
    /// Raw ASTEC storage locations this sub-group draws from. The config
    /// calls them "domains" in the raw sense, like the original tables.
    #[serde(default, rename = "domains")]
    pub locations: Vec<String>,
    #[serde(default)]
    pub metadata_vars: Vec<String>,
}

impl SubgroupEntry {
    pub fn is_metadata_aggregate(&self) -> bool {
        self.name == METADATA_SUBGROUP
    }
}

/// One time-invariant per-element attribute table to extract
#[derive(Debug, Deserialize)]
pub struct MetadataVariable {
    /// None for cross-cutting entries like connection metadata
    pub domain: Option<String>,
    pub element: String,
    /// Single-string shorthand and list form are equivalent
    #[serde(deserialize_with = "one_or_many")]
    pub attribute: Vec<String>,
    /// Destination "domain/subgroup" in the output container
    pub target_group: String,
    pub description: String,
}

impl MetadataVariable {
    pub fn target_domain(&self) -> &str {
        self.target_group.split('/').next().unwrap_or(&self.target_group)
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(attr) => vec![attr],
        OneOrMany::Many(attrs) => attrs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn single_attribute_coerces_to_list() {
        let entry: MetadataVariable = serde_json::from_value(json!({
            "domain": "PRIMARY",
            "element": "VOLUME",
            "attribute": "NAME",
            "target_group": "primary/volume",
            "description": "volume names"
        }))
        .unwrap();

        assert_eq!(entry.attribute, vec!["NAME"]);
    }

    #[test]
    fn attribute_list_stays_a_list() {
        let entry: MetadataVariable = serde_json::from_value(json!({
            "domain": null,
            "element": "CONNECTI",
            "attribute": ["NAME", "FROM", "TO"],
            "target_group": "connection/general",
            "description": "connection topology"
        }))
        .unwrap();

        assert_eq!(entry.attribute, vec!["NAME", "FROM", "TO"]);
        assert!(entry.domain.is_none());
        assert_eq!(entry.target_domain(), "connection");
    }
}
