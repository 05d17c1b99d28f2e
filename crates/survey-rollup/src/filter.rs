//! Survey filter predicates
//!
//! A record is included iff it satisfies every supplied predicate. Unset
//! fields do not constrain. Ids that match nothing simply select nothing.

use crate::{Result, SurveyError, SurveyRecord, SurveyStatus};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Filter as it arrives in a query string, before any parsing. Blank
/// values count as unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterParams {
    pub region_id: Option<String>,
    pub governorate_id: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub status: Option<String>,
}

fn present(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_date(field: &'static str, value: Option<String>) -> Result<Option<NaiveDate>> {
    present(value)
        .map(|v| {
            NaiveDate::parse_from_str(&v, "%Y-%m-%d").map_err(|e| SurveyError::InvalidFilter {
                field,
                reason: format!("{:?} is not a YYYY-MM-DD date ({})", v, e),
            })
        })
        .transpose()
}

impl FilterParams {
    /// Parse into a validated filter; errors name the offending field
    pub fn parse(self) -> Result<SurveyFilter> {
        let filter = SurveyFilter {
            region_id: present(self.region_id),
            governorate_id: present(self.governorate_id),
            date_from: parse_date("dateFrom", self.date_from)?,
            date_to: parse_date("dateTo", self.date_to)?,
            status: present(self.status).map(|v| v.parse::<SurveyStatus>()).transpose()?,
        };
        filter.validate()?;
        Ok(filter)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub governorate_id: Option<String>,
    /// Inclusive lower bound on survey date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_from: Option<NaiveDate>,
    /// Inclusive upper bound on survey date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_to: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SurveyStatus>,
}

impl SurveyFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_region(region_id: impl Into<String>) -> Self {
        Self {
            region_id: Some(region_id.into()),
            ..Self::default()
        }
    }

    pub fn for_governorate(governorate_id: impl Into<String>) -> Self {
        Self {
            governorate_id: Some(governorate_id.into()),
            ..Self::default()
        }
    }

    pub fn between(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.date_from = Some(from);
        self.date_to = Some(to);
        self
    }

    pub fn with_status(mut self, status: SurveyStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Reject malformed filters before any computation
    pub fn validate(&self) -> Result<()> {
        if let (Some(from), Some(to)) = (self.date_from, self.date_to) {
            if from > to {
                return Err(SurveyError::InvalidFilter {
                    field: "dateFrom",
                    reason: format!("{} is after dateTo {}", from, to),
                });
            }
        }
        Ok(())
    }

    /// Whether every subtree under this region could contain matches
    pub fn admits_region(&self, region_id: &str) -> bool {
        self.region_id.as_deref().map_or(true, |id| id == region_id)
    }

    pub fn admits_governorate(&self, governorate_id: &str) -> bool {
        self.governorate_id.as_deref().map_or(true, |id| id == governorate_id)
    }

    pub fn matches(&self, region_id: &str, governorate_id: &str, record: &SurveyRecord) -> bool {
        self.admits_region(region_id)
            && self.admits_governorate(governorate_id)
            && self.date_from.map_or(true, |from| record.date >= from)
            && self.date_to.map_or(true, |to| record.date <= to)
            && self.status.map_or(true, |status| record.status == status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::survey;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_inverted_range_rejected() {
        let filter = SurveyFilter::all().between(date("2024-05-01"), date("2024-01-01"));
        let err = filter.validate().unwrap_err();
        assert_eq!(err.field(), Some("dateFrom"));
        assert!(err.is_validation());

        let same_day = SurveyFilter::all().between(date("2024-05-01"), date("2024-05-01"));
        assert!(same_day.validate().is_ok());
    }

    #[test]
    fn test_every_predicate_must_hold() {
        let record = survey("s", "2024-02-14", SurveyStatus::Completed, 10, 1);

        assert!(SurveyFilter::all().matches("r", "g", &record));
        assert!(SurveyFilter::for_region("r").matches("r", "g", &record));
        assert!(!SurveyFilter::for_region("x").matches("r", "g", &record));
        assert!(!SurveyFilter::for_governorate("x").matches("r", "g", &record));

        let in_range = SurveyFilter::for_region("r").between(date("2024-02-14"), date("2024-02-28"));
        assert!(in_range.matches("r", "g", &record));

        let wrong_status = in_range.clone().with_status(SurveyStatus::Planned);
        assert!(!wrong_status.matches("r", "g", &record));

        let before = SurveyFilter::all().between(date("2024-01-01"), date("2024-02-13"));
        assert!(!before.matches("r", "g", &record));
    }

    #[test]
    fn test_params_name_the_bad_field() {
        let params = |date_from: &str, date_to: &str, status: &str| FilterParams {
            date_from: Some(date_from.to_string()),
            date_to: Some(date_to.to_string()),
            status: Some(status.to_string()),
            ..FilterParams::default()
        };

        let err = params("notadate", "", "").parse().unwrap_err();
        assert_eq!(err.field(), Some("dateFrom"));
        assert!(err.is_validation());

        let err = params("2024-01-01", "2024-13-40", "").parse().unwrap_err();
        assert_eq!(err.field(), Some("dateTo"));

        let err = params("", "", "finished").parse().unwrap_err();
        assert_eq!(err.field(), Some("status"));

        let err = params("2024-05-01", "2024-01-01", "").parse().unwrap_err();
        assert_eq!(err.field(), Some("dateFrom"));
    }

    #[test]
    fn test_params_parse_and_ignore_blanks() {
        let filter = FilterParams {
            region_id: Some("jazan".into()),
            governorate_id: Some("  ".into()),
            date_from: Some("2024-01-01".into()),
            date_to: None,
            status: Some("ongoing".into()),
        }
        .parse()
        .unwrap();

        assert_eq!(filter.region_id.as_deref(), Some("jazan"));
        assert!(filter.governorate_id.is_none());
        assert_eq!(filter.date_from, Some(date("2024-01-01")));
        assert_eq!(filter.status, Some(SurveyStatus::InProgress));
        assert_eq!(FilterParams::default().parse().unwrap(), SurveyFilter::all());
    }

    #[test]
    fn test_query_string_shape() {
        let filter: SurveyFilter = serde_json::from_str(
            r#"{"regionId": "jazan", "dateFrom": "2024-01-01", "status": "ongoing"}"#,
        )
        .unwrap();
        assert_eq!(filter.region_id.as_deref(), Some("jazan"));
        assert_eq!(filter.status, Some(SurveyStatus::InProgress));
        assert!(filter.date_to.is_none());
    }
}
