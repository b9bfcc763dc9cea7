use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::harvest::traits::{FieldValue, FlatRecord, HarvestRecord};

/// Identifier of one remote record. Keys are totally ordered and each one
/// drives exactly one fetch task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkKey(pub u64);

impl WorkKey {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for WorkKey {
    fn from(value: u64) -> Self {
        WorkKey(value)
    }
}

/// One harvested character profile, flattened to a single output row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterRecord {
    pub id: WorkKey,
    pub name: String,
    pub world: String,
    pub avatar: String,
    pub active_classjob_id: u8,
    pub free_company_id: String,
    pub pvp_team_id: String,
    /// Earliest achievement date; `None` until enrichment supplies one.
    pub first_achievement: Option<DateTime<Utc>>,
    pub achievements: u32,
    pub achievement_points: u32,
    pub race: String,
    pub clan: String,
    pub gender: String,
    pub starting_city: String,
}

impl CharacterRecord {
    /// Creates a record with every optional field at its zero value.
    pub fn new(id: WorkKey, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            world: String::new(),
            avatar: String::new(),
            active_classjob_id: 0,
            free_company_id: String::new(),
            pvp_team_id: String::new(),
            first_achievement: None,
            achievements: 0,
            achievement_points: 0,
            race: String::new(),
            clan: String::new(),
            gender: String::new(),
            starting_city: String::new(),
        }
    }
}

/// Secondary data fetched for a character: dated achievement events plus
/// the account-wide totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AchievementSummary {
    pub dates: Vec<DateTime<Utc>>,
    pub total_achievements: u32,
    pub total_points: u32,
}

impl AchievementSummary {
    /// Earliest event strictly before `cutoff`. Events dated at or after the
    /// cutoff are treated as bogus and ignored.
    pub fn earliest_before(&self, cutoff: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.dates.iter().copied().filter(|d| *d < cutoff).min()
    }
}

impl HarvestRecord for CharacterRecord {
    type Enrichment = AchievementSummary;

    fn key(&self) -> WorkKey {
        self.id
    }

    fn apply_enrichment(&mut self, enrichment: AchievementSummary, harvest_started: DateTime<Utc>) {
        self.first_achievement = enrichment.earliest_before(harvest_started);
        self.achievements = enrichment.total_achievements;
        self.achievement_points = enrichment.total_points;
    }
}

const CHARACTER_COLUMNS: &[&str] = &[
    "id",
    "name",
    "world",
    "avatar",
    "active_classjob_id",
    "free_company_id",
    "pvp_team_id",
    "first_achievement",
    "achievements",
    "achievement_points",
    "race",
    "clan",
    "gender",
    "starting_city",
];

impl FlatRecord for CharacterRecord {
    fn columns() -> &'static [&'static str] {
        CHARACTER_COLUMNS
    }

    fn fields(&self) -> Vec<FieldValue> {
        vec![
            FieldValue::Unsigned(self.id.get()),
            FieldValue::Text(self.name.clone()),
            FieldValue::Text(self.world.clone()),
            FieldValue::Text(self.avatar.clone()),
            FieldValue::Unsigned(self.active_classjob_id.into()),
            FieldValue::Text(self.free_company_id.clone()),
            FieldValue::Text(self.pvp_team_id.clone()),
            FieldValue::Timestamp(self.first_achievement),
            FieldValue::Unsigned(self.achievements.into()),
            FieldValue::Unsigned(self.achievement_points.into()),
            FieldValue::Text(self.race.clone()),
            FieldValue::Text(self.clan.clone()),
            FieldValue::Text(self.gender.clone()),
            FieldValue::Text(self.starting_city.clone()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_enrichment_picks_earliest_past_date() {
        let summary = AchievementSummary {
            dates: vec![at(2019, 5, 1), at(2014, 8, 27), at(2030, 1, 1)],
            total_achievements: 42,
            total_points: 420,
        };

        let mut record = CharacterRecord::new(WorkKey(7), "Alpha Beta");
        record.apply_enrichment(summary, at(2021, 4, 1));

        assert_eq!(record.first_achievement, Some(at(2014, 8, 27)));
        assert_eq!(record.achievements, 42);
        assert_eq!(record.achievement_points, 420);
    }

    #[test]
    fn test_enrichment_without_dates_keeps_timestamp_empty() {
        let summary = AchievementSummary {
            dates: vec![at(2030, 1, 1)],
            total_achievements: 3,
            total_points: 30,
        };

        let mut record = CharacterRecord::new(WorkKey(7), "Alpha Beta");
        record.apply_enrichment(summary, at(2021, 4, 1));

        assert_eq!(record.first_achievement, None);
        assert_eq!(record.achievements, 3);
    }

    #[test]
    fn test_fields_match_columns() {
        let record = CharacterRecord::new(WorkKey(1), "A B");
        assert_eq!(record.fields().len(), CharacterRecord::columns().len());
        assert_eq!(record.fields()[0], FieldValue::Unsigned(1));
    }

    #[test]
    fn test_work_key_serializes_as_number() {
        let json = serde_json::to_string(&WorkKey(35)).unwrap();
        assert_eq!(json, "35");
    }
}
