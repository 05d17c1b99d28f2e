//! Belt membership tables
//!
//! Hand-curated governorate lists for the red, orange and yellow belts.
//! Green has no list: it is whatever the other three do not name.

use crate::{BeltError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::info;

/// Version tag of the built-in tables
pub const DEFAULT_TABLES_VERSION: &str = "2024-field-season";

/// Versioned membership tables, authored by Arabic governorate name.
///
/// The raw lists are allowed to overlap; the classifier resolves any
/// overlap by precedence (red, then orange, then yellow).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeltTables {
    pub version: String,
    #[serde(default)]
    pub red: Vec<String>,
    #[serde(default)]
    pub orange: Vec<String>,
    #[serde(default)]
    pub yellow: Vec<String>,
}

impl BeltTables {
    /// Empty tables: every governorate classifies green
    pub fn empty(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            red: Vec::new(),
            orange: Vec::new(),
            yellow: Vec::new(),
        }
    }

    /// Load tables from a JSON document
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading belt tables from {:?}", path);

        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let tables: BeltTables = serde_json::from_reader(reader)?;

        info!(
            "Loaded belt tables {} (red={}, orange={}, yellow={})",
            tables.version,
            tables.red.len(),
            tables.orange.len(),
            tables.yellow.len()
        );

        Ok(tables)
    }

    /// Reject entries that are blank after trimming
    pub fn validate(&self) -> Result<()> {
        for (tier, names) in [("red", &self.red), ("orange", &self.orange), ("yellow", &self.yellow)] {
            if let Some(pos) = names.iter().position(|n| n.trim().is_empty()) {
                return Err(BeltError::EmptyName {
                    tier: tier.to_string(),
                    index: pos,
                });
            }
        }
        Ok(())
    }
}

impl Default for BeltTables {
    fn default() -> Self {
        let list = |names: &[&str]| names.iter().map(|n| n.to_string()).collect();

        Self {
            version: DEFAULT_TABLES_VERSION.to_string(),
            // Border governorates with confirmed transmission in consecutive seasons
            red: list(&[
                "صامطة",
                "أحد المسارحة",
                "الطوال",
                "الحرث",
                "العارضة",
                "فيفاء",
                "الدائر",
            ]),
            // Adjacent to the red belt or with sporadic positives
            orange: list(&[
                "جازان",
                "أبو عريش",
                "صبيا",
                "بيش",
                "الدرب",
                "ضمد",
                "العيدابي",
                "الريث",
                "هروب",
                "محايل عسير",
                "رجال ألمع",
                "القنفذة",
            ]),
            yellow: list(&[
                "أبها",
                "خميس مشيط",
                "بيشة",
                "النماص",
                "ظهران الجنوب",
                "نجران",
                "شرورة",
                "الباحة",
                "المخواة",
                "الليث",
            ]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_tables_are_disjoint() {
        let tables = BeltTables::default();
        for name in &tables.red {
            assert!(!tables.orange.contains(name), "{} in red and orange", name);
            assert!(!tables.yellow.contains(name), "{} in red and yellow", name);
        }
        for name in &tables.orange {
            assert!(!tables.yellow.contains(name), "{} in orange and yellow", name);
        }
    }

    #[test]
    fn test_load_tables_from_json() {
        let json = r#"{
            "version": "2025-redistricting",
            "red": ["صامطة"],
            "orange": ["جازان", "صبيا"]
        }"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let tables = BeltTables::from_path(file.path()).unwrap();
        assert_eq!(tables.version, "2025-redistricting");
        assert_eq!(tables.orange.len(), 2);
        assert!(tables.yellow.is_empty());
    }

    #[test]
    fn test_blank_entry_rejected() {
        let mut tables = BeltTables::empty("t");
        tables.yellow = vec!["أبها".to_string(), "   ".to_string()];

        match tables.validate() {
            Err(BeltError::EmptyName { tier, index }) => {
                assert_eq!(tier, "yellow");
                assert_eq!(index, 1);
            }
            other => panic!("expected EmptyName, got {:?}", other),
        }
    }

    #[test]
    fn test_shipped_tables_match_builtin() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../data/belts.json");
        assert_eq!(BeltTables::from_path(path).unwrap(), BeltTables::default());
    }
}
