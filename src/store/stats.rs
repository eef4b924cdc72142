//! User stats store
//!
//! The simulation never touches this per tick: users are looked up when a
//! connection joins and their kill/death deltas are written when it
//! closes. With no DATABASE_URL configured the in-memory backend keeps
//! the same interface alive for single-process deployments.

use std::sync::Arc;

use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persistent per-user stats row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStats {
    pub id: Uuid,
    pub name: String,
    pub kills: u64,
    pub deaths: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("stats service returned {status}: {body}")]
    Api { status: u16, body: String },
}

/// REST client for an external stats service
#[derive(Clone)]
pub struct StatsClient {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct NewUser<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct StatsDelta {
    kills: u64,
    deaths: u64,
}

impl StatsClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, StatsError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(StatsError::Api { status, body })
    }

    pub async fn get_user(&self, id: Uuid) -> Result<Option<UserStats>, StatsError> {
        let response = self.client.get(self.url(&format!("users/{id}"))).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(Self::check(response).await?.json().await?))
    }

    pub async fn find_user(&self, name: &str) -> Result<Option<UserStats>, StatsError> {
        let response = self
            .client
            .get(self.url("users"))
            .query(&[("name", name)])
            .send()
            .await?;
        let mut rows: Vec<UserStats> = Self::check(response).await?.json().await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }

    pub async fn create_user(&self, name: &str) -> Result<UserStats, StatsError> {
        let response = self
            .client
            .post(self.url("users"))
            .json(&NewUser { name })
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Add a session's kill/death deltas to the stored totals
    pub async fn update_stats(&self, id: Uuid, kills: u64, deaths: u64) -> Result<(), StatsError> {
        let response = self
            .client
            .patch(self.url(&format!("users/{id}")))
            .json(&StatsDelta { kills, deaths })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn get_leaderboard(&self, limit: usize) -> Result<Vec<UserStats>, StatsError> {
        let response = self
            .client
            .get(self.url("leaderboard"))
            .query(&[("limit", limit)])
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

/// In-memory fallback keyed by display name
#[derive(Default)]
pub struct MemoryStats {
    users: DashMap<Uuid, UserStats>,
    by_name: DashMap<String, Uuid>,
}

/// Stats store with a REST backend or an in-memory fallback
#[derive(Clone)]
pub enum StatsStore {
    Rest(StatsClient),
    Memory(Arc<MemoryStats>),
}

impl StatsStore {
    pub fn from_database_url(url: Option<&str>) -> Self {
        match url {
            Some(url) => Self::Rest(StatsClient::new(url)),
            None => Self::Memory(Arc::new(MemoryStats::default())),
        }
    }

    pub async fn get_user(&self, id: Uuid) -> Result<Option<UserStats>, StatsError> {
        match self {
            Self::Rest(client) => client.get_user(id).await,
            Self::Memory(store) => Ok(store.users.get(&id).map(|u| u.clone())),
        }
    }

    pub async fn create_user(&self, name: &str) -> Result<UserStats, StatsError> {
        match self {
            Self::Rest(client) => client.create_user(name).await,
            Self::Memory(store) => {
                let user = UserStats {
                    id: Uuid::new_v4(),
                    name: name.to_string(),
                    kills: 0,
                    deaths: 0,
                };
                store.by_name.insert(name.to_string(), user.id);
                store.users.insert(user.id, user.clone());
                Ok(user)
            }
        }
    }

    /// Look a user up by display name, creating them on first sight
    pub async fn get_or_create(&self, name: &str) -> Result<UserStats, StatsError> {
        match self {
            Self::Rest(client) => match client.find_user(name).await? {
                Some(user) => Ok(user),
                None => client.create_user(name).await,
            },
            Self::Memory(store) => {
                let existing = store.by_name.get(name).map(|entry| *entry);
                if let Some(id) = existing {
                    if let Some(user) = store.users.get(&id) {
                        return Ok(user.clone());
                    }
                }
                self.create_user(name).await
            }
        }
    }

    pub async fn update_stats(&self, id: Uuid, kills: u64, deaths: u64) -> Result<(), StatsError> {
        match self {
            Self::Rest(client) => client.update_stats(id, kills, deaths).await,
            Self::Memory(store) => {
                if let Some(mut user) = store.users.get_mut(&id) {
                    user.kills += kills;
                    user.deaths += deaths;
                }
                Ok(())
            }
        }
    }

    pub async fn leaderboard(&self, limit: usize) -> Result<Vec<UserStats>, StatsError> {
        match self {
            Self::Rest(client) => client.get_leaderboard(limit).await,
            Self::Memory(store) => {
                let mut rows: Vec<UserStats> =
                    store.users.iter().map(|u| u.value().clone()).collect();
                rows.sort_by(|a, b| b.kills.cmp(&a.kills).then(a.deaths.cmp(&b.deaths)));
                rows.truncate(limit);
                Ok(rows)
            }
        }
    }
}
