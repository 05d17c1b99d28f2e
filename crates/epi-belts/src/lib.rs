//! Epidemiological Belt Classifier
//!
//! Assigns every governorate one of four risk belts from static,
//! hand-curated membership tables.
//!
//! # Precedence
//!
//! ```text
//! red → orange → yellow → green (default)
//! ```
//!
//! The first table that lists the name wins, so overlapping tables still
//! classify deterministically and the highest risk takes precedence. A name
//! found in no table is green: classification never fails.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

pub mod tables;

pub use tables::{BeltTables, DEFAULT_TABLES_VERSION};

#[derive(Error, Debug)]
pub enum BeltError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Blank governorate name in {tier} table at index {index}")]
    EmptyName { tier: String, index: usize },
}

pub type Result<T> = std::result::Result<T, BeltError>;

/// Risk belt, ordered by severity (`Green < Yellow < Orange < Red`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Belt {
    Green,
    Yellow,
    Orange,
    Red,
}

impl Belt {
    /// All belts in lookup precedence order
    pub const PRECEDENCE: [Belt; 4] = [Belt::Red, Belt::Orange, Belt::Yellow, Belt::Green];

    pub fn as_str(&self) -> &'static str {
        match self {
            Belt::Red => "red",
            Belt::Orange => "orange",
            Belt::Yellow => "yellow",
            Belt::Green => "green",
        }
    }

    /// Static label, description and color for this belt
    pub fn profile(&self) -> &'static BeltProfile {
        match self {
            Belt::Red => &RED,
            Belt::Orange => &ORANGE,
            Belt::Yellow => &YELLOW,
            Belt::Green => &GREEN,
        }
    }
}

impl fmt::Display for Belt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed presentation data carried by each belt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeltProfile {
    pub belt: Belt,
    pub risk_label: &'static str,
    pub risk_label_ar: &'static str,
    pub description: &'static str,
    pub color: &'static str,
}

static RED: BeltProfile = BeltProfile {
    belt: Belt::Red,
    risk_label: "Very High Risk",
    risk_label_ar: "خطورة عالية جداً",
    description: "Endemic focus with confirmed transmission in consecutive seasons. \
        Active surveillance, mandatory livestock vaccination and movement control apply.",
    color: "#dc2626",
};

static ORANGE: BeltProfile = BeltProfile {
    belt: Belt::Orange,
    risk_label: "High Risk",
    risk_label_ar: "خطورة عالية",
    description: "Borders an endemic focus or has recorded sporadic positives. \
        Intensified seasonal sampling and vector control apply.",
    color: "#ea580c",
};

static YELLOW: BeltProfile = BeltProfile {
    belt: Belt::Yellow,
    risk_label: "Moderate Risk",
    risk_label_ar: "خطورة متوسطة",
    description: "Ecologically suitable for vectors with no recent confirmed transmission. \
        Routine sampling during the rainy season applies.",
    color: "#ca8a04",
};

static GREEN: BeltProfile = BeltProfile {
    belt: Belt::Green,
    risk_label: "Low Risk",
    risk_label_ar: "خطورة منخفضة",
    description: "No recorded transmission and no listed risk factors. \
        Baseline passive surveillance only.",
    color: "#16a34a",
};

/// Result of classifying one governorate name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub governorate: String,
    #[serde(rename = "tier")]
    pub belt: Belt,
    pub risk_label: &'static str,
    pub risk_label_ar: &'static str,
    pub description: &'static str,
    #[serde(rename = "colorToken")]
    pub color: &'static str,
}

impl Classification {
    fn new(governorate: &str, belt: Belt) -> Self {
        let profile = belt.profile();
        Self {
            governorate: governorate.to_string(),
            belt,
            risk_label: profile.risk_label,
            risk_label_ar: profile.risk_label_ar,
            description: profile.description,
            color: profile.color,
        }
    }
}

/// A name listed in more than one raw table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overlap {
    pub governorate: String,
    pub listed_in: Vec<Belt>,
    pub resolved_to: Belt,
}

/// Classifier over an immutable set of membership tables
#[derive(Debug, Clone)]
pub struct BeltClassifier {
    tables: BeltTables,
    red: HashSet<String>,
    orange: HashSet<String>,
    yellow: HashSet<String>,
}

impl BeltClassifier {
    /// Build a classifier from injected tables
    pub fn new(tables: BeltTables) -> Result<Self> {
        tables.validate()?;

        let set = |names: &[String]| names.iter().map(|n| n.trim().to_string()).collect();
        let classifier = Self {
            red: set(&tables.red),
            orange: set(&tables.orange),
            yellow: set(&tables.yellow),
            tables,
        };

        for overlap in classifier.overlaps() {
            warn!(
                "Governorate {} listed in {:?}; resolves to {}",
                overlap.governorate, overlap.listed_in, overlap.resolved_to
            );
        }

        Ok(classifier)
    }

    /// Classifier over the built-in tables
    pub fn with_defaults() -> Self {
        let tables = BeltTables::default();
        Self {
            red: tables.red.iter().cloned().collect(),
            orange: tables.orange.iter().cloned().collect(),
            yellow: tables.yellow.iter().cloned().collect(),
            tables,
        }
    }

    /// Load tables from a JSON file and build a classifier
    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Self::new(BeltTables::from_path(path)?)
    }

    pub fn tables_version(&self) -> &str {
        &self.tables.version
    }

    /// Belt for a governorate name; unknown names are green
    pub fn belt_of(&self, name: &str) -> Belt {
        let key = name.trim();
        let belt = Belt::PRECEDENCE
            .into_iter()
            .find(|belt| self.set(*belt).map_or(true, |s| s.contains(key)))
            .unwrap_or(Belt::Green);

        debug!("Classified {:?} as {}", key, belt);
        belt
    }

    /// Classify a governorate name with its static risk annotation
    pub fn classify(&self, name: &str) -> Classification {
        Classification::new(name.trim(), self.belt_of(name))
    }

    /// Names as authored in the raw table for `belt` (empty for green)
    pub fn members(&self, belt: Belt) -> impl Iterator<Item = &str> {
        let names: &[String] = match belt {
            Belt::Red => &self.tables.red,
            Belt::Orange => &self.tables.orange,
            Belt::Yellow => &self.tables.yellow,
            Belt::Green => &[],
        };
        names.iter().map(|n| n.trim())
    }

    /// Names present in more than one raw table
    pub fn overlaps(&self) -> Vec<Overlap> {
        let mut seen: Vec<&str> = Vec::new();
        let mut found = Vec::new();

        for belt in [Belt::Red, Belt::Orange, Belt::Yellow] {
            for name in self.members(belt) {
                if seen.contains(&name) {
                    continue;
                }
                seen.push(name);

                let listed_in: Vec<Belt> = [Belt::Red, Belt::Orange, Belt::Yellow]
                    .into_iter()
                    .filter(|b| self.set(*b).is_some_and(|s| s.contains(name)))
                    .collect();

                if listed_in.len() > 1 {
                    found.push(Overlap {
                        governorate: name.to_string(),
                        resolved_to: listed_in[0],
                        listed_in,
                    });
                }
            }
        }

        found
    }

    fn set(&self, belt: Belt) -> Option<&HashSet<String>> {
        match belt {
            Belt::Red => Some(&self.red),
            Belt::Orange => Some(&self.orange),
            Belt::Yellow => Some(&self.yellow),
            Belt::Green => None,
        }
    }
}

impl Default for BeltClassifier {
    fn default() -> Self {
        Self::with_defaults()
    }
}
