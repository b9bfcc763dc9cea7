//! HTTP/JSON [`Fetcher`] for the character record service.
//!
//! Expects two read-only endpoints:
//! - `GET {base}/character/{id}` returning a [`CharacterProfile`]
//! - `GET {base}/character/{id}/achievements` returning an [`AchievementPage`]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::model::{AchievementSummary, CharacterRecord, WorkKey};
use crate::traits::{FetchError, Fetcher};

#[derive(Debug, Clone, Deserialize)]
pub struct CharacterProfile {
    pub name: String,
    #[serde(default)]
    pub world: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub active_classjob_id: Option<u8>,
    #[serde(default)]
    pub free_company_id: String,
    #[serde(default)]
    pub pvp_team_id: String,
    /// Absent for private or deleted characters
    #[serde(default)]
    pub race: Option<String>,
    #[serde(default)]
    pub clan: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub town: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AchievementEntry {
    pub id: u32,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AchievementPage {
    #[serde(default)]
    pub achievements: Vec<AchievementEntry>,
    #[serde(default)]
    pub total_achievements: u32,
    #[serde(default)]
    pub total_achievement_points: u32,
}

impl From<AchievementPage> for AchievementSummary {
    fn from(page: AchievementPage) -> Self {
        AchievementSummary {
            dates: page.achievements.into_iter().map(|a| a.date).collect(),
            total_achievements: page.total_achievements,
            total_points: page.total_achievement_points,
        }
    }
}

fn normalize_gender(raw: Option<String>) -> String {
    match raw.as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("male") => "Male".to_string(),
        Some("female") => "Female".to_string(),
        _ => String::new(),
    }
}

/// Converts a profile into a record.
///
/// # Errors
///
/// Returns [`FetchError::Incomplete`] if the profile has no race, which the
/// service reports for characters whose details are hidden.
pub fn profile_to_record(key: WorkKey, profile: CharacterProfile) -> Result<CharacterRecord, FetchError> {
    let race = profile
        .race
        .ok_or_else(|| FetchError::Incomplete("race".to_string()))?;

    let mut record = CharacterRecord::new(key, profile.name);
    record.world = profile.world;
    record.avatar = profile.avatar;
    record.active_classjob_id = profile.active_classjob_id.unwrap_or(0);
    record.free_company_id = profile.free_company_id;
    record.pvp_team_id = profile.pvp_team_id;
    record.race = race;
    record.clan = profile.clan.unwrap_or_default();
    record.gender = normalize_gender(profile.gender);
    record.starting_city = profile.town.unwrap_or_default();
    Ok(record)
}

pub struct HttpFetcher {
    client: Client,
    base_url: String,
}

impl HttpFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T, FetchError> {
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;

        match response.status() {
            status if status.is_success() => response
                .json::<T>()
                .await
                .map_err(|e| FetchError::Transient(format!("invalid body from {url}: {e}"))),
            StatusCode::NOT_FOUND => Err(FetchError::NotFound),
            status => Err(FetchError::Transient(format!("HTTP {status} from {url}"))),
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    type Record = CharacterRecord;

    fn source_id(&self) -> &str {
        &self.base_url
    }

    async fn fetch(&self, key: WorkKey) -> Result<CharacterRecord, FetchError> {
        let profile: CharacterProfile = self
            .get_json(format!("{}/character/{}", self.base_url, key))
            .await?;
        profile_to_record(key, profile)
    }

    fn has_enrichment(&self) -> bool {
        true
    }

    async fn fetch_enrichment(&self, key: WorkKey) -> Result<AchievementSummary, FetchError> {
        let page: AchievementPage = self
            .get_json(format!("{}/character/{}/achievements", self.base_url, key))
            .await?;
        Ok(page.into())
    }
}
