//! Field Survey Rollups
//!
//! Owns the Region → Governorate → SurveyRecord hierarchy and everything
//! that turns it into numbers:
//!
//! - [`derived`]: per-survey derived fields (negatives, prevalence, case aliases)
//! - [`filter`]: record-level filter predicates
//! - [`aggregate`]: rolled-up totals over any filtered slice of the tree
//! - [`mutation`]: snapshot-in, snapshot-out create/update/delete
//! - [`store`]: whole-document persistence with optimistic versioning
//! - [`loader`]: snapshot documents and seed data
//!
//! # Prevalence
//!
//! ```text
//! prevalence = Σ positive / Σ total × 100      (0.00 when Σ total = 0)
//! ```
//!
//! Rates are always computed from summed integer counts. Per-survey rates
//! are display values and are never averaged.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod aggregate;
pub mod derived;
pub mod filter;
pub mod loader;
pub mod mutation;
pub mod store;

pub use aggregate::{aggregate, breakdown, belt_rollup, rollup_governorate, rollup_region, RollupResult, Tally};
pub use derived::{annotate, check_record, derive_stats, Advisory, AnnotatedSurvey, PrevalenceRate, SurveyStats, MAX_RECORD_COUNT};
pub use filter::{FilterParams, SurveyFilter};
pub use mutation::{apply, Applied, Mutation, MutationContext, MutationOutcome, NewSurvey, SurveyPatch};
pub use store::{JsonFileStore, MemoryStore, Repository, SnapshotStore};

#[derive(Error, Debug)]
pub enum SurveyError {
    #[error("Invalid sample counts: {field}={positive_samples} must be within 0..={total_samples}")]
    InvalidSampleCounts {
        field: &'static str,
        total_samples: u64,
        positive_samples: u64,
    },
    #[error("Count too large: {field}={value} exceeds {limit}")]
    CountTooLarge {
        field: &'static str,
        value: u64,
        limit: u64,
    },
    #[error("Invalid filter: {field}: {reason}")]
    InvalidFilter { field: &'static str, reason: String },
    #[error("Region not found: {0}")]
    RegionNotFound(String),
    #[error("Governorate not found: {0}")]
    GovernorateNotFound(String),
    #[error("Survey not found: {0}")]
    SurveyNotFound(String),
    #[error("Governorate {governorate} is stored under region {parent} but references region {region_id}")]
    ParentMismatch {
        governorate: String,
        parent: String,
        region_id: String,
    },
    #[error("Survey {survey}: {source}")]
    InvalidRecord {
        survey: String,
        #[source]
        source: Box<SurveyError>,
    },
    #[error("Snapshot version conflict: expected stored version {expected}, found {found}")]
    VersionConflict { expected: u64, found: u64 },
    #[error("Gave up after {0} conflicting commit attempts")]
    RetriesExhausted(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SurveyError {
    /// Offending input field, for validation errors surfaced to end users
    pub fn field(&self) -> Option<&'static str> {
        match self {
            SurveyError::InvalidSampleCounts { field, .. } => Some(*field),
            SurveyError::CountTooLarge { field, .. } => Some(*field),
            SurveyError::InvalidFilter { field, .. } => Some(*field),
            SurveyError::InvalidRecord { source, .. } => source.field(),
            _ => None,
        }
    }

    /// True for rejections caused by the caller's input
    pub fn is_validation(&self) -> bool {
        match self {
            SurveyError::InvalidSampleCounts { .. }
            | SurveyError::CountTooLarge { .. }
            | SurveyError::InvalidFilter { .. } => true,
            SurveyError::InvalidRecord { source, .. } => source.is_validation(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SurveyError>;

/// Survey lifecycle status
///
/// `ongoing` is a legacy spelling of `in_progress`; it is accepted on input
/// and never written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurveyStatus {
    Planned,
    #[serde(alias = "ongoing")]
    InProgress,
    Completed,
    Cancelled,
}

impl SurveyStatus {
    pub const ALL: [SurveyStatus; 4] = [
        SurveyStatus::Planned,
        SurveyStatus::InProgress,
        SurveyStatus::Completed,
        SurveyStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SurveyStatus::Planned => "planned",
            SurveyStatus::InProgress => "in_progress",
            SurveyStatus::Completed => "completed",
            SurveyStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SurveyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SurveyStatus {
    type Err = SurveyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "planned" => Ok(SurveyStatus::Planned),
            "in_progress" | "ongoing" => Ok(SurveyStatus::InProgress),
            "completed" => Ok(SurveyStatus::Completed),
            "cancelled" => Ok(SurveyStatus::Cancelled),
            other => Err(SurveyError::InvalidFilter {
                field: "status",
                reason: format!("unknown status {:?}", other),
            }),
        }
    }
}

/// Livestock counts examined during a survey
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Livestock {
    pub sheep: u64,
    pub cattle: u64,
    pub horses: u64,
    pub camels: u64,
    pub goats: u64,
}

impl Livestock {
    pub fn species(&self) -> [(&'static str, u64); 5] {
        [
            ("livestock.sheep", self.sheep),
            ("livestock.cattle", self.cattle),
            ("livestock.horses", self.horses),
            ("livestock.camels", self.camels),
            ("livestock.goats", self.goats),
        ]
    }

    /// Sum of all species, saturating at `u64::MAX`
    pub fn total(&self) -> u64 {
        self.species()
            .iter()
            .fold(0u64, |acc, (_, n)| acc.saturating_add(*n))
    }

    /// Add another set of counts, saturating per species. Returns false if
    /// any species saturated.
    pub fn add(&mut self, other: &Livestock) -> bool {
        let mut exact = true;
        for (slot, by) in [
            (&mut self.sheep, other.sheep),
            (&mut self.cattle, other.cattle),
            (&mut self.horses, other.horses),
            (&mut self.camels, other.camels),
            (&mut self.goats, other.goats),
        ] {
            exact &= add_count(slot, by);
        }
        exact
    }
}

/// Saturating add into `slot`; false when the exact sum does not fit
pub(crate) fn add_count(slot: &mut u64, by: u64) -> bool {
    match slot.checked_add(by) {
        Some(sum) => {
            *slot = sum;
            true
        }
        None => {
            *slot = u64::MAX;
            false
        }
    }
}

/// One field survey. Only authoritative fields live here; derived
/// statistics are recomputed by [`derived::annotate`] on every read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyRecord {
    pub id: String,
    pub date: NaiveDate,
    pub status: SurveyStatus,
    pub total_samples: u64,
    pub positive_samples: u64,
    #[serde(default)]
    pub livestock: Livestock,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recoveries: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deaths: Option<u64>,
    /// Names in the sampling frame; display only, never counted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub governorates_included: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Governorate {
    pub id: String,
    pub region_id: String,
    pub name_ar: String,
    pub name_en: String,
    #[serde(default)]
    pub surveys: Vec<SurveyRecord>,
}

impl Governorate {
    /// Belt for this governorate. Tables are authored in Arabic; the English
    /// name is consulted only when the Arabic one is unlisted.
    pub fn belt(&self, classifier: &epi_belts::BeltClassifier) -> epi_belts::Classification {
        let by_ar = classifier.classify(&self.name_ar);
        if by_ar.belt != epi_belts::Belt::Green {
            return by_ar;
        }
        let by_en = classifier.classify(&self.name_en);
        if by_en.belt != epi_belts::Belt::Green {
            by_en
        } else {
            by_ar
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub id: String,
    pub name_ar: String,
    pub name_en: String,
    #[serde(default)]
    pub governorates: Vec<Governorate>,
}

/// Position of a survey inside the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurveyLocation {
    pub region: usize,
    pub governorate: usize,
    pub survey: usize,
}

/// The whole hierarchy as a single owned document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchySnapshot {
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub regions: Vec<Region>,
}

impl HierarchySnapshot {
    pub fn region(&self, id: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.id == id)
    }

    pub fn governorate(&self, id: &str) -> Option<&Governorate> {
        self.regions
            .iter()
            .flat_map(|r| r.governorates.iter())
            .find(|g| g.id == id)
    }

    pub fn governorate_mut(&mut self, id: &str) -> Option<&mut Governorate> {
        self.regions
            .iter_mut()
            .flat_map(|r| r.governorates.iter_mut())
            .find(|g| g.id == id)
    }

    pub fn locate_survey(&self, id: &str) -> Option<SurveyLocation> {
        for (ri, region) in self.regions.iter().enumerate() {
            for (gi, gov) in region.governorates.iter().enumerate() {
                if let Some(si) = gov.surveys.iter().position(|s| s.id == id) {
                    return Some(SurveyLocation {
                        region: ri,
                        governorate: gi,
                        survey: si,
                    });
                }
            }
        }
        None
    }

    pub fn survey(&self, id: &str) -> Option<&SurveyRecord> {
        self.locate_survey(id)
            .map(|loc| &self.regions[loc.region].governorates[loc.governorate].surveys[loc.survey])
    }

    /// Every survey with the region and governorate that own it
    pub fn surveys(&self) -> impl Iterator<Item = (&Region, &Governorate, &SurveyRecord)> {
        self.regions.iter().flat_map(|r| {
            r.governorates
                .iter()
                .flat_map(move |g| g.surveys.iter().map(move |s| (r, g, s)))
        })
    }

    pub fn survey_count(&self) -> usize {
        self.surveys().count()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_spelling() {
        assert_eq!(serde_json::to_string(&SurveyStatus::InProgress).unwrap(), "\"in_progress\"");
        let legacy: SurveyStatus = serde_json::from_str("\"ongoing\"").unwrap();
        assert_eq!(legacy, SurveyStatus::InProgress);
        assert_eq!("ongoing".parse::<SurveyStatus>().unwrap(), SurveyStatus::InProgress);
        assert!("finished".parse::<SurveyStatus>().is_err());
    }

    #[test]
    fn test_snapshot_lookups() {
        let snapshot = fixtures::snapshot();
        assert_eq!(snapshot.survey_count(), 7);
        assert_eq!(snapshot.governorate("samtah").unwrap().name_en, "Samtah");
        assert!(snapshot.governorate("nowhere").is_none());

        let loc = snapshot.locate_survey("s6").unwrap();
        assert_eq!(loc, SurveyLocation { region: 1, governorate: 0, survey: 1 });
        assert_eq!(snapshot.survey("s6").unwrap().status, SurveyStatus::Planned);
    }

    #[test]
    fn test_record_camel_case_round_trip() {
        let json = r#"{
            "id": "x1",
            "date": "2024-05-01",
            "status": "ongoing",
            "totalSamples": 50,
            "positiveSamples": 2,
            "livestock": {"sheep": 30, "camels": 20},
            "governoratesIncluded": ["جازان"]
        }"#;

        let record: SurveyRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.status, SurveyStatus::InProgress);
        assert_eq!(record.livestock.total(), 50);
        assert_eq!(record.livestock.goats, 0);

        let out = serde_json::to_value(&record).unwrap();
        assert_eq!(out["status"], "in_progress");
        assert_eq!(out["totalSamples"], 50);
        assert!(out.get("negativeSamples").is_none());
    }

    #[test]
    fn test_governorate_belt_falls_back_to_english() {
        let mut tables = epi_belts::BeltTables::empty("t");
        tables.yellow = vec!["Al Kharj".into()];
        let classifier = epi_belts::BeltClassifier::new(tables).unwrap();

        let snapshot = fixtures::snapshot();
        let kharj = snapshot.governorate("kharj").unwrap();
        assert_eq!(kharj.belt(&classifier).belt, epi_belts::Belt::Yellow);

        let defaults = epi_belts::BeltClassifier::with_defaults();
        let jazan = snapshot.governorate("jazan-city").unwrap();
        assert_eq!(jazan.belt(&defaults).belt, epi_belts::Belt::Orange);
    }
}
