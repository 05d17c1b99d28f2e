//! Snapshot mutations
//!
//! `apply` takes a snapshot and returns a new one; the input is never
//! touched. Every create and update is validated and re-derived before the
//! new snapshot is built, so a rejected mutation leaves nothing behind.
//!
//! Callers must serialize mutations against the same snapshot, either with a
//! single writer or by saving through [`crate::store`], which refuses stale
//! versions.

use crate::derived::{annotate, AnnotatedSurvey};
use crate::{HierarchySnapshot, Livestock, Result, SurveyError, SurveyRecord, SurveyStatus};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Payload for a new survey
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSurvey {
    pub date: NaiveDate,
    pub status: SurveyStatus,
    pub total_samples: u64,
    pub positive_samples: u64,
    #[serde(default)]
    pub livestock: Livestock,
    #[serde(default)]
    pub recoveries: Option<u64>,
    #[serde(default)]
    pub deaths: Option<u64>,
    #[serde(default)]
    pub governorates_included: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Per-species livestock changes; unset species keep their count
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivestockPatch {
    pub sheep: Option<u64>,
    pub cattle: Option<u64>,
    pub horses: Option<u64>,
    pub camels: Option<u64>,
    pub goats: Option<u64>,
}

impl LivestockPatch {
    fn apply_to(&self, livestock: &mut Livestock) {
        if let Some(v) = self.sheep {
            livestock.sheep = v;
        }
        if let Some(v) = self.cattle {
            livestock.cattle = v;
        }
        if let Some(v) = self.horses {
            livestock.horses = v;
        }
        if let Some(v) = self.camels {
            livestock.camels = v;
        }
        if let Some(v) = self.goats {
            livestock.goats = v;
        }
    }
}

/// Partial update; only supplied fields change
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SurveyPatch {
    pub date: Option<NaiveDate>,
    pub status: Option<SurveyStatus>,
    pub total_samples: Option<u64>,
    pub positive_samples: Option<u64>,
    pub livestock: Option<LivestockPatch>,
    pub recoveries: Option<u64>,
    pub deaths: Option<u64>,
    pub governorates_included: Option<Vec<String>>,
    pub notes: Option<String>,
}

impl SurveyPatch {
    fn apply_to(&self, record: &mut SurveyRecord) {
        if let Some(date) = self.date {
            record.date = date;
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(total) = self.total_samples {
            record.total_samples = total;
        }
        if let Some(positive) = self.positive_samples {
            record.positive_samples = positive;
        }
        if let Some(livestock) = &self.livestock {
            livestock.apply_to(&mut record.livestock);
        }
        if self.recoveries.is_some() {
            record.recoveries = self.recoveries;
        }
        if self.deaths.is_some() {
            record.deaths = self.deaths;
        }
        if let Some(names) = &self.governorates_included {
            record.governorates_included = names.clone();
        }
        if self.notes.is_some() {
            record.notes = self.notes.clone();
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Create { governorate_id: String, survey: NewSurvey },
    Update { survey_id: String, patch: SurveyPatch },
    Delete { survey_id: String },
}

/// Who is writing, and when. The actor comes from the caller's auth layer
/// and is recorded as attribution only.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationContext {
    pub actor: Option<String>,
    pub at: DateTime<Utc>,
}

impl MutationContext {
    pub fn now(actor: Option<String>) -> Self {
        Self { actor, at: Utc::now() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum MutationOutcome {
    Created { survey: AnnotatedSurvey },
    Updated { survey: AnnotatedSurvey },
    #[serde(rename_all = "camelCase")]
    Deleted { survey_id: String, governorate_id: String },
}

/// A successfully applied mutation: the next snapshot and what changed
#[derive(Debug, Clone)]
pub struct Applied {
    pub snapshot: HierarchySnapshot,
    pub outcome: MutationOutcome,
}

/// Apply one mutation, producing the next snapshot version
pub fn apply(snapshot: &HierarchySnapshot, mutation: Mutation, ctx: &MutationContext) -> Result<Applied> {
    match mutation {
        Mutation::Create { governorate_id, survey } => create(snapshot, &governorate_id, survey, ctx),
        Mutation::Update { survey_id, patch } => update(snapshot, &survey_id, &patch, ctx),
        Mutation::Delete { survey_id } => delete(snapshot, &survey_id),
    }
}

fn create(
    snapshot: &HierarchySnapshot,
    governorate_id: &str,
    survey: NewSurvey,
    ctx: &MutationContext,
) -> Result<Applied> {
    let gov = snapshot
        .governorate(governorate_id)
        .ok_or_else(|| SurveyError::GovernorateNotFound(governorate_id.to_string()))?;

    let governorates_included = if survey.governorates_included.is_empty() {
        vec![gov.name_ar.clone()]
    } else {
        survey.governorates_included
    };

    let record = SurveyRecord {
        id: Uuid::new_v4().to_string(),
        date: survey.date,
        status: survey.status,
        total_samples: survey.total_samples,
        positive_samples: survey.positive_samples,
        livestock: survey.livestock,
        recoveries: survey.recoveries,
        deaths: survey.deaths,
        governorates_included,
        notes: survey.notes,
        created_by: ctx.actor.clone(),
        created_at: Some(ctx.at),
        updated_by: None,
        updated_at: None,
    };
    let annotated = annotate(&record)?;

    let mut next = snapshot.clone();
    next.version += 1;
    if let Some(gov) = next.governorate_mut(governorate_id) {
        gov.surveys.push(record);
    }

    info!(
        "Created survey {} in {} (v{} -> v{})",
        annotated.record.id, governorate_id, snapshot.version, next.version
    );

    Ok(Applied {
        snapshot: next,
        outcome: MutationOutcome::Created { survey: annotated },
    })
}

fn update(
    snapshot: &HierarchySnapshot,
    survey_id: &str,
    patch: &SurveyPatch,
    ctx: &MutationContext,
) -> Result<Applied> {
    let loc = snapshot
        .locate_survey(survey_id)
        .ok_or_else(|| SurveyError::SurveyNotFound(survey_id.to_string()))?;

    let mut record = snapshot.regions[loc.region].governorates[loc.governorate].surveys[loc.survey].clone();
    patch.apply_to(&mut record);
    record.updated_by = ctx.actor.clone();
    record.updated_at = Some(ctx.at);
    let annotated = annotate(&record)?;

    let mut next = snapshot.clone();
    next.version += 1;
    next.regions[loc.region].governorates[loc.governorate].surveys[loc.survey] = record;

    info!("Updated survey {} (v{} -> v{})", survey_id, snapshot.version, next.version);

    Ok(Applied {
        snapshot: next,
        outcome: MutationOutcome::Updated { survey: annotated },
    })
}

fn delete(snapshot: &HierarchySnapshot, survey_id: &str) -> Result<Applied> {
    let loc = snapshot
        .locate_survey(survey_id)
        .ok_or_else(|| SurveyError::SurveyNotFound(survey_id.to_string()))?;

    let mut next = snapshot.clone();
    next.version += 1;
    let gov = &mut next.regions[loc.region].governorates[loc.governorate];
    gov.surveys.remove(loc.survey);
    let governorate_id = gov.id.clone();

    info!(
        "Deleted survey {} from {} (v{} -> v{})",
        survey_id, governorate_id, snapshot.version, next.version
    );

    Ok(Applied {
        snapshot: next,
        outcome: MutationOutcome::Deleted {
            survey_id: survey_id.to_string(),
            governorate_id,
        },
    })
}
