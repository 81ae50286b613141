use std::{
    collections::HashMap,
    sync::RwLock,
};

use bson::oid::ObjectId;

use crate::{
    api::v1::{
        auth::{AccountModel, AccountStore},
        incident::{IncidentModel, IncidentPatch, IncidentStore},
        profile::{UserModel, UserStore},
        provider::{AvailabilityStatus, ProviderStore, ServiceProviderModel},
        token::{RefreshTokenModel, SessionStore},
    },
    error::Error,
};

/// Test double with the same atomicity guarantees as the document store:
/// every operation holds the collection lock for its whole read-check-write.
#[derive(Default)]
pub struct MemoryStore {
    accounts: RwLock<HashMap<ObjectId, AccountModel>>,
    sessions: RwLock<HashMap<ObjectId, RefreshTokenModel>>,
    users: RwLock<HashMap<ObjectId, UserModel>>,
    incidents: RwLock<HashMap<ObjectId, IncidentModel>>,
    providers: RwLock<Vec<ServiceProviderModel>>,
}

#[axum::async_trait]
impl AccountStore for MemoryStore {
    async fn insert(&self, account: &AccountModel) -> Result<(), Error> {
        let mut accounts = self.accounts.write().expect("store lock poisoned");

        if accounts.values().any(|it| it.email == account.email) {
            return Err(Error::MustUnique("email".to_string()));
        }

        accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: ObjectId) -> Result<Option<AccountModel>, Error> {
        Ok(self
            .accounts
            .read()
            .expect("store lock poisoned")
            .get(&id)
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<AccountModel>, Error> {
        Ok(self
            .accounts
            .read()
            .expect("store lock poisoned")
            .values()
            .find(|it| it.email == email)
            .cloned())
    }

    async fn mark_verified(&self, id: ObjectId) -> Result<bool, Error> {
        let mut accounts = self.accounts.write().expect("store lock poisoned");

        match accounts.get_mut(&id) {
            Some(account) => {
                account.email_verified = true;
                account.updated_at = bson::DateTime::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn upsert_federated(&self, candidate: &AccountModel) -> Result<AccountModel, Error> {
        let mut accounts = self.accounts.write().expect("store lock poisoned");

        if let Some(account) = accounts.values().find(|it| it.email == candidate.email) {
            return Ok(account.clone());
        }

        accounts.insert(candidate.id, candidate.clone());
        Ok(candidate.clone())
    }
}

#[axum::async_trait]
impl SessionStore for MemoryStore {
    async fn insert(&self, session: &RefreshTokenModel) -> Result<(), Error> {
        self.sessions
            .write()
            .expect("store lock poisoned")
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: ObjectId) -> Result<Option<RefreshTokenModel>, Error> {
        Ok(self
            .sessions
            .read()
            .expect("store lock poisoned")
            .get(&id)
            .cloned())
    }

    async fn delete_by_id(&self, id: ObjectId) -> Result<bool, Error> {
        Ok(self
            .sessions
            .write()
            .expect("store lock poisoned")
            .remove(&id)
            .is_some())
    }
}

#[axum::async_trait]
impl UserStore for MemoryStore {
    async fn ensure(&self, candidate: &UserModel) -> Result<UserModel, Error> {
        let mut users = self.users.write().expect("store lock poisoned");

        Ok(users
            .entry(candidate.account_id)
            .or_insert_with(|| candidate.clone())
            .clone())
    }
}

#[axum::async_trait]
impl IncidentStore for MemoryStore {
    async fn insert(&self, incident: &IncidentModel) -> Result<(), Error> {
        self.incidents
            .write()
            .expect("store lock poisoned")
            .insert(incident.id, incident.clone());
        Ok(())
    }

    async fn list_by_owner(&self, owner: ObjectId) -> Result<Vec<IncidentModel>, Error> {
        let mut incidents: Vec<_> = self
            .incidents
            .read()
            .expect("store lock poisoned")
            .values()
            .filter(|it| it.user_id == owner)
            .cloned()
            .collect();

        incidents.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(incidents)
    }

    async fn update_owned(
        &self,
        id: ObjectId,
        owner: ObjectId,
        patch: &IncidentPatch,
    ) -> Result<Option<IncidentModel>, Error> {
        let mut incidents = self.incidents.write().expect("store lock poisoned");

        let incident = match incidents.get_mut(&id) {
            Some(incident) if incident.user_id == owner => incident,
            _ => return Ok(None),
        };

        if let Some(status) = patch.status {
            incident.status = status;
        }
        if let Some(location) = &patch.location {
            incident.location = location.clone();
        }
        if let Some(vehicle_type) = &patch.vehicle_type {
            incident.vehicle_type = vehicle_type.clone();
        }
        if let Some(issue_type) = patch.issue_type {
            incident.issue_type = issue_type;
        }
        incident.updated_at = bson::DateTime::now();

        Ok(Some(incident.clone()))
    }

    async fn delete_owned(&self, id: ObjectId, owner: ObjectId) -> Result<bool, Error> {
        let mut incidents = self.incidents.write().expect("store lock poisoned");

        match incidents.get(&id) {
            Some(incident) if incident.user_id == owner => {
                incidents.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[axum::async_trait]
impl ProviderStore for MemoryStore {
    async fn insert(&self, provider: &ServiceProviderModel) -> Result<(), Error> {
        self.providers
            .write()
            .expect("store lock poisoned")
            .push(provider.clone());
        Ok(())
    }

    async fn list_available(&self) -> Result<Vec<ServiceProviderModel>, Error> {
        Ok(self
            .providers
            .read()
            .expect("store lock poisoned")
            .iter()
            .filter(|it| it.availability_status == AvailabilityStatus::Available)
            .cloned()
            .collect())
    }
}
