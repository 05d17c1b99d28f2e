//! Snapshot documents and seed data

use crate::derived::check_record;
use crate::{Governorate, HierarchySnapshot, Region, Result, SurveyError};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{debug, info};

/// Load a snapshot document and check it before handing it out
pub fn load_snapshot<P: AsRef<Path>>(path: P) -> Result<HierarchySnapshot> {
    let path = path.as_ref();
    info!("Loading snapshot from {:?}", path);

    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let snapshot: HierarchySnapshot = serde_json::from_reader(reader)?;
    check_snapshot(&snapshot)?;

    info!(
        "Loaded snapshot v{}: {} regions, {} surveys",
        snapshot.version,
        snapshot.regions.len(),
        snapshot.survey_count()
    );
    Ok(snapshot)
}

/// Structural and per-record checks. The first violation wins.
pub fn check_snapshot(snapshot: &HierarchySnapshot) -> Result<()> {
    for region in &snapshot.regions {
        for gov in &region.governorates {
            if gov.region_id != region.id {
                return Err(SurveyError::ParentMismatch {
                    governorate: gov.id.clone(),
                    parent: region.id.clone(),
                    region_id: gov.region_id.clone(),
                });
            }
            for survey in &gov.surveys {
                check_record(survey).map_err(|e| {
                    SurveyError::InvalidRecord {
                        survey: survey.id.clone(),
                        source: Box::new(e),
                    }
                })?;
            }
        }
        debug!("Region {} ok ({} governorates)", region.id, region.governorates.len());
    }
    Ok(())
}

fn region(id: &str, name_ar: &str, name_en: &str, governorates: &[(&str, &str, &str)]) -> Region {
    Region {
        id: id.to_string(),
        name_ar: name_ar.to_string(),
        name_en: name_en.to_string(),
        governorates: governorates
            .iter()
            .map(|(gid, ar, en)| Governorate {
                id: gid.to_string(),
                region_id: id.to_string(),
                name_ar: ar.to_string(),
                name_en: en.to_string(),
                surveys: Vec::new(),
            })
            .collect(),
    }
}

/// Built-in regions and governorates with no surveys, version 0
pub fn seed_snapshot() -> HierarchySnapshot {
    HierarchySnapshot {
        version: 0,
        regions: vec![
            region(
                "jazan",
                "منطقة جازان",
                "Jazan Region",
                &[
                    ("jazan-city", "جازان", "Jazan"),
                    ("samtah", "صامطة", "Samtah"),
                    ("abu-arish", "أبو عريش", "Abu Arish"),
                    ("sabya", "صبيا", "Sabya"),
                    ("ahad-al-masarihah", "أحد المسارحة", "Ahad Al Masarihah"),
                ],
            ),
            region(
                "asir",
                "منطقة عسير",
                "Asir Region",
                &[
                    ("abha", "أبها", "Abha"),
                    ("khamis-mushait", "خميس مشيط", "Khamis Mushait"),
                    ("muhayil", "محايل عسير", "Muhayil Asir"),
                    ("bisha", "بيشة", "Bisha"),
                ],
            ),
            region(
                "najran",
                "منطقة نجران",
                "Najran Region",
                &[("najran-city", "نجران", "Najran"), ("sharurah", "شرورة", "Sharurah")],
            ),
            region(
                "makkah",
                "منطقة مكة المكرمة",
                "Makkah Region",
                &[
                    ("makkah-city", "مكة المكرمة", "Makkah"),
                    ("jeddah", "جدة", "Jeddah"),
                    ("taif", "الطائف", "Taif"),
                    ("al-lith", "الليث", "Al Lith"),
                    ("al-qunfudhah", "القنفذة", "Al Qunfudhah"),
                ],
            ),
            region(
                "riyadh",
                "منطقة الرياض",
                "Riyadh Region",
                &[
                    ("riyadh-city", "الرياض", "Riyadh"),
                    ("kharj", "الخرج", "Al Kharj"),
                    ("diriyah", "الدرعية", "Diriyah"),
                ],
            ),
            region(
                "eastern",
                "المنطقة الشرقية",
                "Eastern Province",
                &[
                    ("dammam", "الدمام", "Dammam"),
                    ("al-ahsa", "الأحساء", "Al Ahsa"),
                    ("hafar-al-batin", "حفر الباطن", "Hafar Al Batin"),
                ],
            ),
        ],
    }
}
