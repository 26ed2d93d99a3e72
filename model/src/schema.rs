// SPDX-License-Identifier: Apache-2.0
// Copyright Sentinel Sensor Authors

//! Versioned feature schemas.
//!
//! A schema fixes the names and order of the numeric features a model was
//! trained against. Schemas are persisted one JSON file per version; two
//! schemas with equal checksums denote identical feature sets regardless
//! of version labels.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Declared type of one feature column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureKind {
    Float,
    Int,
    Bool,
}

/// A feature extraction schema: ordered names plus metadata.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FeatureSchema {
    pub version: String,
    pub name: String,
    pub description: String,
    pub features: Vec<String>,
    pub feature_types: BTreeMap<String, FeatureKind>,
    pub created_at: DateTime<Utc>,
    /// First 16 hex chars of sha256 over the sorted, `|`-joined names.
    pub checksum: String,
}

impl FeatureSchema {
    /// Checksum over a feature list, independent of declaration order.
    #[must_use]
    pub fn compute_checksum(features: &[String]) -> String {
        let mut sorted: Vec<&str> = features.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        let digest = Sha256::digest(sorted.join("|").as_bytes());
        let mut hex = String::with_capacity(16);
        for byte in digest.iter().take(8) {
            hex.push_str(&format!("{byte:02x}"));
        }
        hex
    }

    /// Number of feature columns.
    #[must_use]
    pub fn width(&self) -> usize {
        self.features.len()
    }

    /// Column index of a named feature.
    #[must_use]
    pub fn index_of(&self, feature: &str) -> Option<usize> {
        self.features.iter().position(|name| name == feature)
    }

    /// Two schemas are compatible iff they cover the same feature set.
    #[must_use]
    pub fn compatible(&self, other: &FeatureSchema) -> bool {
        self.checksum == other.checksum
    }
}

/// Errors from the schema registry.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("schema io error: {0}")]
    Io(#[from] io::Error),
    #[error("schema serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("no schema registered for version '{0}'")]
    UnknownVersion(String),
}

/// On-disk registry of schema versions.
pub struct SchemaRegistry {
    dir: PathBuf,
    schemas: BTreeMap<String, FeatureSchema>,
}

impl SchemaRegistry {
    /// Open a registry rooted at `dir`, loading every `*.json` schema.
    /// Unreadable files are skipped with a warning.
    pub fn open(dir: &Path) -> Result<Self, SchemaError> {
        fs::create_dir_all(dir)?;
        let mut schemas = BTreeMap::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(SchemaError::from)
                .and_then(|text| serde_json::from_str::<FeatureSchema>(&text).map_err(SchemaError::from))
            {
                Ok(schema) => {
                    debug!(version = %schema.version, "loaded feature schema");
                    schemas.insert(schema.version.clone(), schema);
                }
                Err(e) => warn!("skipping unreadable schema {}: {e}", path.display()),
            }
        }
        info!("schema registry open: {} versions", schemas.len());
        Ok(SchemaRegistry {
            dir: dir.to_owned(),
            schemas,
        })
    }

    /// Register (or overwrite) a schema version and persist it.
    pub fn register(
        &mut self,
        version: &str,
        name: &str,
        description: &str,
        features: Vec<String>,
        feature_types: BTreeMap<String, FeatureKind>,
    ) -> Result<&FeatureSchema, SchemaError> {
        if self.schemas.contains_key(version) {
            warn!(version, "schema version already exists, overwriting");
        }
        let schema = FeatureSchema {
            version: version.to_owned(),
            name: name.to_owned(),
            description: description.to_owned(),
            checksum: FeatureSchema::compute_checksum(&features),
            features,
            feature_types,
            created_at: Utc::now(),
        };
        let path = self.dir.join(format!("schema_{version}.json"));
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&schema)?)?;
        fs::rename(&tmp, &path)?;
        info!(version, features = schema.features.len(), "registered schema");
        self.schemas.insert(version.to_owned(), schema);
        #[allow(clippy::unwrap_used)] // just inserted
        let registered = self.schemas.get(version).unwrap();
        Ok(registered)
    }

    #[must_use]
    pub fn get(&self, version: &str) -> Option<&FeatureSchema> {
        self.schemas.get(version)
    }

    /// Latest version by numeric component order (`2.10.0` > `2.9.1`).
    #[must_use]
    pub fn latest(&self) -> Option<&FeatureSchema> {
        self.schemas
            .values()
            .max_by_key(|schema| version_key(&schema.version))
    }

    #[must_use]
    pub fn versions(&self) -> Vec<String> {
        self.schemas.keys().cloned().collect()
    }
}

fn version_key(version: &str) -> Vec<u64> {
    version
        .split('.')
        .map(|part| part.parse::<u64>().unwrap_or(0))
        .collect()
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn types_for(features: &[String]) -> BTreeMap<String, FeatureKind> {
        features
            .iter()
            .map(|name| (name.clone(), FeatureKind::Float))
            .collect()
    }

    // Property: the registered schema's checksum equals the truncated
    // digest of the sorted feature list.
    #[test]
    fn checksum_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut registry = SchemaRegistry::open(dir.path()).unwrap();
        let features = vec!["b_feat".to_owned(), "a_feat".to_owned()];
        let expected = FeatureSchema::compute_checksum(&features);
        let version = registry
            .register("1.0.0", "arp-live", "", features, BTreeMap::new())
            .unwrap()
            .version
            .clone();
        assert_eq!(registry.get(&version).unwrap().checksum, expected);
        assert_eq!(expected.len(), 16);
    }

    #[test]
    fn checksum_ignores_declaration_order() {
        let forward = vec!["one".to_owned(), "two".to_owned(), "three".to_owned()];
        let mut reversed = forward.clone();
        reversed.reverse();
        assert_eq!(
            FeatureSchema::compute_checksum(&forward),
            FeatureSchema::compute_checksum(&reversed)
        );
    }

    #[test]
    fn registry_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let features = vec!["arp_opcode".to_owned(), "inter_arrival_time".to_owned()];
        {
            let mut registry = SchemaRegistry::open(dir.path()).unwrap();
            registry
                .register("1.0.0", "arp-live", "initial", features.clone(), types_for(&features))
                .unwrap();
        }
        let registry = SchemaRegistry::open(dir.path()).unwrap();
        let schema = registry.get("1.0.0").unwrap();
        assert_eq!(schema.features, features);
        assert_eq!(schema.index_of("inter_arrival_time"), Some(1));
    }

    #[test]
    fn latest_orders_numerically() {
        let dir = TempDir::new().unwrap();
        let mut registry = SchemaRegistry::open(dir.path()).unwrap();
        for version in ["1.9.0", "1.10.0", "1.2.3"] {
            registry
                .register(version, "s", "", vec!["x".to_owned()], BTreeMap::new())
                .unwrap();
        }
        assert_eq!(registry.latest().unwrap().version, "1.10.0");
    }

    #[test]
    fn compatible_means_same_feature_set() {
        let dir = TempDir::new().unwrap();
        let mut registry = SchemaRegistry::open(dir.path()).unwrap();
        registry
            .register("1.0.0", "a", "", vec!["x".to_owned(), "y".to_owned()], BTreeMap::new())
            .unwrap();
        registry
            .register("2.0.0", "b", "", vec!["y".to_owned(), "x".to_owned()], BTreeMap::new())
            .unwrap();
        registry
            .register("3.0.0", "c", "", vec!["x".to_owned(), "z".to_owned()], BTreeMap::new())
            .unwrap();
        let one = registry.get("1.0.0").unwrap();
        assert!(one.compatible(registry.get("2.0.0").unwrap()));
        assert!(!one.compatible(registry.get("3.0.0").unwrap()));
    }
}
