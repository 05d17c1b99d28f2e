//! Hierarchical rollups
//!
//! Every total in the system, whether whole-system, per-region card,
//! per-governorate card or per-belt, comes out of one accumulator
//! ([`Tally`]). Cards therefore always sum to the totals they sit under.
//!
//! Rollups are recomputed from the snapshot on every call; nothing is cached.

use crate::derived::PrevalenceRate;
use crate::filter::SurveyFilter;
use crate::{add_count, Governorate, HierarchySnapshot, Livestock, Region, Result, SurveyRecord, SurveyStatus};
use epi_belts::{Belt, BeltClassifier, Classification};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Survey counts per lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusBreakdown {
    pub planned: u64,
    pub in_progress: u64,
    pub completed: u64,
    pub cancelled: u64,
}

impl StatusBreakdown {
    fn bump(&mut self, status: SurveyStatus) {
        match status {
            SurveyStatus::Planned => self.planned += 1,
            SurveyStatus::InProgress => self.in_progress += 1,
            SurveyStatus::Completed => self.completed += 1,
            SurveyStatus::Cancelled => self.cancelled += 1,
        }
    }

    fn merge(&mut self, other: &StatusBreakdown) {
        self.planned = self.planned.saturating_add(other.planned);
        self.in_progress = self.in_progress.saturating_add(other.in_progress);
        self.completed = self.completed.saturating_add(other.completed);
        self.cancelled = self.cancelled.saturating_add(other.cancelled);
    }

    pub fn get(&self, status: SurveyStatus) -> u64 {
        match status {
            SurveyStatus::Planned => self.planned,
            SurveyStatus::InProgress => self.in_progress,
            SurveyStatus::Completed => self.completed,
            SurveyStatus::Cancelled => self.cancelled,
        }
    }
}

/// Rolled-up totals over a filtered slice of the hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupResult {
    pub total_survey_count: u64,
    pub total_samples: u64,
    pub total_positive_samples: u64,
    pub total_negative_samples: u64,
    pub livestock: Livestock,
    pub total_livestock: u64,
    /// Σ positive / Σ total, never a mean of per-survey rates
    pub overall_prevalence_rate: PrevalenceRate,
    pub regions_represented: usize,
    pub governorates_represented: usize,
    pub status_breakdown: StatusBreakdown,
    /// Set when some total hit `u64::MAX` and is a lower bound, not exact
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub saturated: bool,
}

impl RollupResult {
    pub fn is_empty(&self) -> bool {
        self.total_survey_count == 0
    }
}

/// The single accumulation path for every rollup
#[derive(Debug, Clone, Default)]
pub struct Tally {
    survey_count: u64,
    total_samples: u64,
    positive_samples: u64,
    negative_samples: u64,
    livestock: Livestock,
    regions: BTreeSet<String>,
    governorates: BTreeSet<String>,
    statuses: StatusBreakdown,
    saturated: bool,
}

impl Tally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one survey. Sums saturate instead of overflowing, so a
    /// record that slipped past validation cannot break a rollup.
    pub fn add(&mut self, region_id: &str, governorate_id: &str, record: &SurveyRecord) {
        let exact = add_count(&mut self.survey_count, 1)
            & add_count(&mut self.total_samples, record.total_samples)
            & add_count(&mut self.positive_samples, record.positive_samples)
            & add_count(
                &mut self.negative_samples,
                record.total_samples.saturating_sub(record.positive_samples),
            )
            & self.livestock.add(&record.livestock);
        self.saturated |= !exact;
        self.statuses.bump(record.status);

        if !self.regions.contains(region_id) {
            self.regions.insert(region_id.to_string());
        }
        if !self.governorates.contains(governorate_id) {
            self.governorates.insert(governorate_id.to_string());
        }
    }

    /// Fold another tally into this one
    pub fn merge(&mut self, other: &Tally) {
        let exact = add_count(&mut self.survey_count, other.survey_count)
            & add_count(&mut self.total_samples, other.total_samples)
            & add_count(&mut self.positive_samples, other.positive_samples)
            & add_count(&mut self.negative_samples, other.negative_samples)
            & self.livestock.add(&other.livestock);
        self.saturated |= !exact || other.saturated;
        self.statuses.merge(&other.statuses);
        self.regions.extend(other.regions.iter().cloned());
        self.governorates.extend(other.governorates.iter().cloned());
    }

    pub fn finish(&self) -> RollupResult {
        let total_livestock = self.livestock.total();
        let saturated = self.saturated || total_livestock == u64::MAX;
        if saturated {
            warn!(
                "Rollup over {} surveys saturated; totals are lower bounds",
                self.survey_count
            );
        }

        RollupResult {
            total_survey_count: self.survey_count,
            total_samples: self.total_samples,
            total_positive_samples: self.positive_samples,
            total_negative_samples: self.negative_samples,
            livestock: self.livestock,
            total_livestock,
            overall_prevalence_rate: PrevalenceRate::from_counts(self.positive_samples, self.total_samples),
            regions_represented: self.regions.len(),
            governorates_represented: self.governorates.len(),
            status_breakdown: self.statuses,
            saturated,
        }
    }
}

fn tally_governorate(region: &Region, gov: &Governorate, filter: &SurveyFilter) -> Tally {
    let mut tally = Tally::new();
    for record in &gov.surveys {
        if filter.matches(&region.id, &gov.id, record) {
            tally.add(&region.id, &gov.id, record);
        }
    }
    tally
}

fn tally(snapshot: &HierarchySnapshot, filter: &SurveyFilter) -> Tally {
    let mut total = Tally::new();
    for region in snapshot.regions.iter().filter(|r| filter.admits_region(&r.id)) {
        for gov in region.governorates.iter().filter(|g| filter.admits_governorate(&g.id)) {
            total.merge(&tally_governorate(region, gov, filter));
        }
    }
    total
}

/// Totals over every survey matching `filter`
///
/// An empty match yields zeros and a `0.00` rate; ids that exist nowhere
/// yield the same empty result rather than an error.
pub fn aggregate(snapshot: &HierarchySnapshot, filter: &SurveyFilter) -> Result<RollupResult> {
    filter.validate()?;

    let result = tally(snapshot, filter).finish();
    debug!(
        "Aggregated {} surveys ({} samples, {} positive, rate {})",
        result.total_survey_count,
        result.total_samples,
        result.total_positive_samples,
        result.overall_prevalence_rate
    );

    Ok(result)
}

/// Totals for one region's subtree
pub fn rollup_region(snapshot: &HierarchySnapshot, region_id: &str) -> RollupResult {
    tally(snapshot, &SurveyFilter::for_region(region_id)).finish()
}

/// Totals for one governorate
pub fn rollup_governorate(snapshot: &HierarchySnapshot, governorate_id: &str) -> RollupResult {
    tally(snapshot, &SurveyFilter::for_governorate(governorate_id)).finish()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernorateCard {
    pub id: String,
    pub name_ar: String,
    pub name_en: String,
    pub belt: Classification,
    pub rollup: RollupResult,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionCard {
    pub id: String,
    pub name_ar: String,
    pub name_en: String,
    pub rollup: RollupResult,
    pub governorates: Vec<GovernorateCard>,
}

/// Whole-system totals with region and governorate cards
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakdown {
    pub filter: SurveyFilter,
    pub snapshot_version: u64,
    pub belt_tables_version: String,
    pub total: RollupResult,
    pub regions: Vec<RegionCard>,
}

/// Totals plus per-region and per-governorate cards, in document order
pub fn breakdown(
    snapshot: &HierarchySnapshot,
    filter: &SurveyFilter,
    classifier: &BeltClassifier,
) -> Result<Breakdown> {
    filter.validate()?;

    let mut total = Tally::new();
    let mut regions = Vec::new();

    for region in snapshot.regions.iter().filter(|r| filter.admits_region(&r.id)) {
        let mut region_tally = Tally::new();
        let mut cards = Vec::new();

        for gov in region.governorates.iter().filter(|g| filter.admits_governorate(&g.id)) {
            let gov_tally = tally_governorate(region, gov, filter);
            region_tally.merge(&gov_tally);
            cards.push(GovernorateCard {
                id: gov.id.clone(),
                name_ar: gov.name_ar.clone(),
                name_en: gov.name_en.clone(),
                belt: gov.belt(classifier),
                rollup: gov_tally.finish(),
            });
        }

        if cards.is_empty() && filter.governorate_id.is_some() {
            continue;
        }

        total.merge(&region_tally);
        regions.push(RegionCard {
            id: region.id.clone(),
            name_ar: region.name_ar.clone(),
            name_en: region.name_en.clone(),
            rollup: region_tally.finish(),
            governorates: cards,
        });
    }

    Ok(Breakdown {
        filter: filter.clone(),
        snapshot_version: snapshot.version,
        belt_tables_version: classifier.tables_version().to_string(),
        total: total.finish(),
        regions,
    })
}

/// Totals for every governorate in one risk belt
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeltRollup {
    #[serde(rename = "tier")]
    pub belt: Belt,
    pub risk_label: &'static str,
    #[serde(rename = "colorToken")]
    pub color: &'static str,
    pub governorate_count: usize,
    pub rollup: RollupResult,
}

/// Totals grouped by risk belt, red first
pub fn belt_rollup(
    snapshot: &HierarchySnapshot,
    filter: &SurveyFilter,
    classifier: &BeltClassifier,
) -> Result<Vec<BeltRollup>> {
    filter.validate()?;

    let mut groups: Vec<(Belt, usize, Tally)> = Belt::PRECEDENCE
        .into_iter()
        .map(|belt| (belt, 0, Tally::new()))
        .collect();

    for region in snapshot.regions.iter().filter(|r| filter.admits_region(&r.id)) {
        for gov in region.governorates.iter().filter(|g| filter.admits_governorate(&g.id)) {
            let belt = gov.belt(classifier).belt;
            if let Some((_, count, group)) = groups.iter_mut().find(|(b, _, _)| *b == belt) {
                *count += 1;
                group.merge(&tally_governorate(region, gov, filter));
            }
        }
    }

    Ok(groups
        .into_iter()
        .map(|(belt, governorate_count, group)| {
            let profile = belt.profile();
            BeltRollup {
                belt,
                risk_label: profile.risk_label,
                color: profile.color,
                governorate_count,
                rollup: group.finish(),
            }
        })
        .collect())
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::fixtures::survey;
    use chrono::{Duration, NaiveDate};
    use proptest::prelude::*;

    fn surveys_strategy() -> impl Strategy<Value = Vec<(u8, u64, u64, i64)>> {
        // (governorate slot, total, positive share in per-mille, day offset)
        prop::collection::vec((0u8..4, 0u64..5000, 0u64..=1000, 0i64..365), 0..40)
    }

    fn build(entries: &[(u8, u64, u64, i64)]) -> HierarchySnapshot {
        let base = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut snapshot = crate::fixtures::snapshot();
        for region in &mut snapshot.regions {
            for gov in &mut region.governorates {
                gov.surveys.clear();
            }
        }

        for (i, (slot, total, per_mille, day)) in entries.iter().enumerate() {
            let positive = total * per_mille / 1000;
            let date = (base + Duration::days(*day)).format("%Y-%m-%d").to_string();
            let record = survey(&format!("p{}", i), &date, SurveyStatus::Completed, *total, positive);
            let region = &mut snapshot.regions[(*slot / 2) as usize];
            region.governorates[(*slot % 2) as usize].surveys.push(record);
        }
        snapshot
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        // Splitting the date axis never changes the summed counts
        #[test]
        fn fuzz_date_split_is_additive(entries in surveys_strategy(), split in 1i64..365) {
            let snapshot = build(&entries);
            let base = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
            let cut = base + Duration::days(split);

            let all = aggregate(&snapshot, &SurveyFilter::all()).unwrap();
            let before = aggregate(&snapshot, &SurveyFilter::all().between(base, cut - Duration::days(1))).unwrap();
            let after = aggregate(&snapshot, &SurveyFilter::all().between(cut, base + Duration::days(400))).unwrap();

            prop_assert_eq!(before.total_samples + after.total_samples, all.total_samples);
            prop_assert_eq!(before.total_positive_samples + after.total_positive_samples, all.total_positive_samples);
            prop_assert_eq!(before.total_survey_count + after.total_survey_count, all.total_survey_count);
            prop_assert_eq!(
                all.overall_prevalence_rate,
                PrevalenceRate::from_counts(all.total_positive_samples, all.total_samples)
            );
        }

        // Region cards always sum to the whole-system total
        #[test]
        fn fuzz_cards_match_total(entries in surveys_strategy()) {
            let snapshot = build(&entries);
            let b = breakdown(&snapshot, &SurveyFilter::all(), &BeltClassifier::with_defaults()).unwrap();

            let samples: u64 = b.regions.iter().map(|r| r.rollup.total_samples).sum();
            let surveys: u64 = b.regions.iter().map(|r| r.rollup.total_survey_count).sum();
            prop_assert_eq!(samples, b.total.total_samples);
            prop_assert_eq!(surveys, b.total.total_survey_count);
            prop_assert_eq!(b.total.total_positive_samples + b.total.total_negative_samples, b.total.total_samples);
        }
    }
}
