// libs/expert-cell/src/repository.rs
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_database::{RepositoryError, SupabaseClient};

use crate::models::Expert;

/// Persistence for expert profiles and their weekly availability.
#[async_trait]
pub trait ExpertRepository: Send + Sync {
    async fn find_by_id(&self, expert_id: Uuid) -> Result<Option<Expert>, RepositoryError>;

    /// Fails with [`RepositoryError::Conflict`] when the id is already taken.
    async fn insert(&self, expert: &Expert) -> Result<(), RepositoryError>;

    /// Overwrites the stored record only while its version still equals
    /// `expert.version`, and stores it with the version incremented.
    /// Returns `false` when the record is missing or was changed meanwhile.
    async fn save(&self, expert: &Expert) -> Result<bool, RepositoryError>;
}

#[derive(Default)]
pub struct InMemoryExpertRepository {
    experts: RwLock<HashMap<Uuid, Expert>>,
}

impl InMemoryExpertRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExpertRepository for InMemoryExpertRepository {
    async fn find_by_id(&self, expert_id: Uuid) -> Result<Option<Expert>, RepositoryError> {
        Ok(self.experts.read().await.get(&expert_id).cloned())
    }

    async fn insert(&self, expert: &Expert) -> Result<(), RepositoryError> {
        let mut experts = self.experts.write().await;
        if experts.contains_key(&expert.id) {
            return Err(RepositoryError::Conflict(format!("expert {} exists", expert.id)));
        }
        experts.insert(expert.id, expert.clone());
        Ok(())
    }

    async fn save(&self, expert: &Expert) -> Result<bool, RepositoryError> {
        let mut experts = self.experts.write().await;
        match experts.get_mut(&expert.id) {
            Some(existing) if existing.version == expert.version => {
                *existing = expert.clone();
                existing.version += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Stores experts in the `experts` table; availability rules live in a JSON column.
pub struct SupabaseExpertRepository {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseExpertRepository {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    fn decode_first(rows: Vec<Value>) -> Result<Option<Expert>, RepositoryError> {
        match rows.into_iter().next() {
            Some(row) => Ok(Some(serde_json::from_value(row)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ExpertRepository for SupabaseExpertRepository {
    async fn find_by_id(&self, expert_id: Uuid) -> Result<Option<Expert>, RepositoryError> {
        debug!("Fetching expert {}", expert_id);

        let path = format!("/rest/v1/experts?id=eq.{}", expert_id);
        let rows: Vec<Value> = self.supabase.request(Method::GET, &path, None, None).await?;
        Self::decode_first(rows)
    }

    async fn insert(&self, expert: &Expert) -> Result<(), RepositoryError> {
        debug!("Creating expert {}", expert.id);

        let body = serde_json::to_value(expert)?;
        let _: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/experts",
                None,
                Some(body),
                Some(SupabaseClient::representation_headers()),
            )
            .await?;
        Ok(())
    }

    async fn save(&self, expert: &Expert) -> Result<bool, RepositoryError> {
        debug!("Updating expert {} at version {}", expert.id, expert.version);

        let path = format!("/rest/v1/experts?id=eq.{}&version=eq.{}", expert.id, expert.version);
        let mut body = serde_json::to_value(expert)?;
        body["version"] = (expert.version + 1).into();
        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                None,
                Some(body),
                Some(SupabaseClient::representation_headers()),
            )
            .await?;
        Ok(!rows.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn in_memory_insert_rejects_duplicates() {
        let repository = InMemoryExpertRepository::new();
        let expert = Expert::new(Uuid::new_v4());

        tokio_test::assert_ok!(repository.insert(&expert).await);
        assert_matches!(repository.insert(&expert).await, Err(RepositoryError::Conflict(_)));
        assert_eq!(repository.find_by_id(expert.id).await.unwrap().unwrap().id, expert.id);
    }

    #[tokio::test]
    async fn in_memory_save_requires_existing_record() {
        let repository = InMemoryExpertRepository::new();
        let mut expert = Expert::new(Uuid::new_v4());

        assert!(!repository.save(&expert).await.unwrap());

        repository.insert(&expert).await.unwrap();
        expert.is_accepting_appointments = false;
        assert!(repository.save(&expert).await.unwrap());

        let stored = repository.find_by_id(expert.id).await.unwrap().unwrap();
        assert!(!stored.is_accepting_appointments);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn in_memory_save_rejects_stale_versions() {
        let repository = InMemoryExpertRepository::new();
        let expert = Expert::new(Uuid::new_v4());
        repository.insert(&expert).await.unwrap();

        let mut first = repository.find_by_id(expert.id).await.unwrap().unwrap();
        let mut second = first.clone();

        first.is_accepting_appointments = false;
        assert!(repository.save(&first).await.unwrap());

        second.operational_status = crate::models::OperationalStatus::OnLeave;
        assert!(!repository.save(&second).await.unwrap());

        let stored = repository.find_by_id(expert.id).await.unwrap().unwrap();
        assert!(!stored.is_accepting_appointments);
        assert_eq!(stored.operational_status, crate::models::OperationalStatus::Active);
    }
}
