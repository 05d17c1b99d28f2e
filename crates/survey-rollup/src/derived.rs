//! Survey derived fields
//!
//! `totalSamples` and `positiveSamples` are the only authoritative counts.
//! Everything else is recomputed from them on every read and write:
//!
//! | Field            | Value                                   |
//! |------------------|-----------------------------------------|
//! | negativeSamples  | total − positive                        |
//! | prevalenceRate   | round(positive / total × 100, 2), 0.00 when total = 0 |
//! | suspectedCases   | total                                   |
//! | confirmedCases   | positive                                |

use crate::{Result, SurveyError, SurveyRecord};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Percentage with two fractional digits, held as hundredths of a percent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PrevalenceRate(u64);

impl PrevalenceRate {
    pub const ZERO: PrevalenceRate = PrevalenceRate(0);

    /// Rate from raw counts, rounded half-up on exact integer arithmetic
    pub fn from_counts(positive: u64, total: u64) -> Self {
        if total == 0 {
            return Self::ZERO;
        }
        let num = positive as u128 * 10_000 * 2 + total as u128;
        let den = total as u128 * 2;
        PrevalenceRate((num / den) as u64)
    }

    pub fn hundredths(&self) -> u64 {
        self.0
    }

    pub fn as_percent(&self) -> f64 {
        self.0 as f64 / 100.0
    }
}

impl fmt::Display for PrevalenceRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl FromStr for PrevalenceRate {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        let invalid = || format!("invalid rate {:?}", s);
        let (whole, frac) = trimmed.split_once('.').unwrap_or((trimmed, ""));

        let is_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if whole.is_empty() || !is_digits(whole) || !is_digits(frac) {
            return Err(invalid());
        }
        if frac.len() > 2 {
            return Err(format!("more than two fractional digits in {:?}", s));
        }

        let whole: u64 = whole.parse().map_err(|_| invalid())?;
        let frac: u64 = format!("{:0<2}", frac).parse().map_err(|_| invalid())?;
        whole
            .checked_mul(100)
            .and_then(|h| h.checked_add(frac))
            .map(PrevalenceRate)
            .ok_or_else(invalid)
    }
}

impl Serialize for PrevalenceRate {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PrevalenceRate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Fields derived from a survey's sample counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyStats {
    pub negative_samples: u64,
    pub prevalence_rate: PrevalenceRate,
    pub suspected_cases: u64,
    pub confirmed_cases: u64,
}

/// Upper bound on any single count a survey may carry. Keeps whole-system
/// sums well inside `u64`.
pub const MAX_RECORD_COUNT: u64 = 1 << 40;

fn check_count(field: &'static str, value: u64) -> Result<()> {
    if value > MAX_RECORD_COUNT {
        return Err(SurveyError::CountTooLarge {
            field,
            value,
            limit: MAX_RECORD_COUNT,
        });
    }
    Ok(())
}

/// Derive statistics from the authoritative counts
pub fn derive_stats(total_samples: u64, positive_samples: u64) -> Result<SurveyStats> {
    check_count("totalSamples", total_samples)?;
    if positive_samples > total_samples {
        return Err(SurveyError::InvalidSampleCounts {
            field: "positiveSamples",
            total_samples,
            positive_samples,
        });
    }

    Ok(SurveyStats {
        negative_samples: total_samples - positive_samples,
        prevalence_rate: PrevalenceRate::from_counts(positive_samples, total_samples),
        suspected_cases: total_samples,
        confirmed_cases: positive_samples,
    })
}

/// Soft findings on writer-supplied outcome counts. Never rejects a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Advisory {
    #[serde(rename_all = "camelCase")]
    RecoveriesExceedConfirmed { recoveries: u64, confirmed_cases: u64 },
    #[serde(rename_all = "camelCase")]
    OutcomesExceedConfirmed {
        deaths: u64,
        recoveries: u64,
        confirmed_cases: u64,
    },
}

fn advisories(record: &SurveyRecord, stats: &SurveyStats) -> Vec<Advisory> {
    let confirmed = stats.confirmed_cases;
    let recoveries = record.recoveries.unwrap_or(0);
    let deaths = record.deaths.unwrap_or(0);
    let mut found = Vec::new();

    if recoveries > confirmed {
        found.push(Advisory::RecoveriesExceedConfirmed {
            recoveries,
            confirmed_cases: confirmed,
        });
    }
    if record.deaths.is_some() && deaths.saturating_add(recoveries) > confirmed {
        found.push(Advisory::OutcomesExceedConfirmed {
            deaths,
            recoveries,
            confirmed_cases: confirmed,
        });
    }

    found
}

/// A survey with its derived fields attached
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotatedSurvey {
    #[serde(flatten)]
    pub record: SurveyRecord,
    #[serde(flatten)]
    pub stats: SurveyStats,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub advisories: Vec<Advisory>,
}

/// Every hard check a stored record must pass
pub fn check_record(record: &SurveyRecord) -> Result<SurveyStats> {
    let stats = derive_stats(record.total_samples, record.positive_samples)?;
    for (field, count) in record.livestock.species() {
        check_count(field, count)?;
    }
    for (field, count) in [("recoveries", record.recoveries), ("deaths", record.deaths)] {
        if let Some(count) = count {
            check_count(field, count)?;
        }
    }
    Ok(stats)
}

/// Validate a record and attach its derived fields
pub fn annotate(record: &SurveyRecord) -> Result<AnnotatedSurvey> {
    let stats = check_record(record)?;
    let advisories = advisories(record, &stats);

    for advisory in &advisories {
        warn!("Survey {}: {:?}", record.id, advisory);
    }

    Ok(AnnotatedSurvey {
        record: record.clone(),
        stats,
        advisories,
    })
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(2000))]

        #[test]
        fn fuzz_negative_plus_positive_is_total(total in 0u64..1_000_000, frac in 0.0f64..=1.0) {
            let positive = (total as f64 * frac) as u64;
            let stats = derive_stats(total, positive).unwrap();
            prop_assert_eq!(stats.negative_samples + positive, total);
            prop_assert!(stats.prevalence_rate.hundredths() <= 10_000);
        }

        #[test]
        fn fuzz_excess_positive_rejected(total in 0u64..1_000_000, extra in 1u64..1000) {
            let rejected = matches!(
                derive_stats(total, total + extra),
                Err(SurveyError::InvalidSampleCounts { .. })
            );
            prop_assert!(rejected);
        }
    }
}
