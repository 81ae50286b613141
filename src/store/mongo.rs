use bson::{doc, oid::ObjectId};
use mongodb::{
    options::{FindOneAndUpdateOptions, FindOptions, IndexOptions, ReturnDocument},
    Collection, Database, IndexModel,
};
use serde::{Deserialize, Serialize};

use crate::{
    api::v1::{
        auth::{AccountModel, AccountStore},
        incident::{IncidentModel, IncidentPatch, IncidentStore},
        profile::{UserModel, UserStore},
        provider::{ProviderStore, ServiceProviderModel},
        token::{RefreshTokenModel, SessionStore},
    },
    error::Error,
};

/// Document-store backend. One instance is shared behind every store handle
/// the application carries.
#[derive(Clone)]
pub struct MongoStores {
    accounts: Collection<AccountModel>,
    sessions: Collection<RefreshTokenModel>,
    users: Collection<UserModel>,
    incidents: Collection<IncidentModel>,
    providers: Collection<ServiceProviderModel>,
}

impl MongoStores {
    pub fn new(db: &Database) -> Self {
        Self {
            accounts: db.collection("accounts"),
            sessions: db.collection("sessions"),
            users: db.collection("users"),
            incidents: db.collection("incidents"),
            providers: db.collection("service_providers"),
        }
    }
}

fn is_duplicate_key(error: &mongodb::error::Error) -> bool {
    match &*error.kind {
        mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(write)) => {
            write.code == 11000
        }
        _ => false,
    }
}

#[axum::async_trait]
impl AccountStore for MongoStores {
    async fn insert(&self, account: &AccountModel) -> Result<(), Error> {
        match self.accounts.insert_one(account, None).await {
            Ok(_) => Ok(()),
            // the unique index is the authority when two registrations race
            Err(error) if is_duplicate_key(&error) => Err(Error::MustUnique("email".to_string())),
            Err(error) => Err(error.into()),
        }
    }

    async fn find_by_id(&self, id: ObjectId) -> Result<Option<AccountModel>, Error> {
        self.accounts
            .find_one(doc! { "_id": id }, None)
            .await
            .map_err(Into::into)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<AccountModel>, Error> {
        self.accounts
            .find_one(doc! { "email": email }, None)
            .await
            .map_err(Into::into)
    }

    async fn mark_verified(&self, id: ObjectId) -> Result<bool, Error> {
        let result = self
            .accounts
            .update_one(
                doc! { "_id": id },
                doc! { "$set": {
                    "email_verified": true,
                    "updated_at": bson::DateTime::now(),
                } },
                None,
            )
            .await?;

        Ok(result.matched_count > 0)
    }

    async fn upsert_federated(&self, candidate: &AccountModel) -> Result<AccountModel, Error> {
        let account = self
            .accounts
            .find_one_and_update(
                doc! { "email": &candidate.email },
                doc! { "$setOnInsert": bson::to_document(candidate)? },
                FindOneAndUpdateOptions::builder()
                    .upsert(true)
                    .return_document(ReturnDocument::After)
                    .build(),
            )
            .await?;

        account.ok_or_else(|| {
            mongodb::error::Error::custom("upsert returned no post-image".to_string()).into()
        })
    }
}

#[axum::async_trait]
impl SessionStore for MongoStores {
    async fn insert(&self, session: &RefreshTokenModel) -> Result<(), Error> {
        self.sessions.insert_one(session, None).await?;
        Ok(())
    }

    async fn find_by_id(&self, id: ObjectId) -> Result<Option<RefreshTokenModel>, Error> {
        self.sessions
            .find_one(doc! { "_id": id }, None)
            .await
            .map_err(Into::into)
    }

    async fn delete_by_id(&self, id: ObjectId) -> Result<bool, Error> {
        let result = self.sessions.delete_one(doc! { "_id": id }, None).await?;

        Ok(result.deleted_count > 0)
    }
}

#[axum::async_trait]
impl UserStore for MongoStores {
    async fn ensure(&self, candidate: &UserModel) -> Result<UserModel, Error> {
        let user = self
            .users
            .find_one_and_update(
                doc! { "account_id": candidate.account_id },
                doc! { "$setOnInsert": bson::to_document(candidate)? },
                FindOneAndUpdateOptions::builder()
                    .upsert(true)
                    .return_document(ReturnDocument::After)
                    .build(),
            )
            .await?;

        user.ok_or_else(|| {
            mongodb::error::Error::custom("upsert returned no post-image".to_string()).into()
        })
    }
}

#[axum::async_trait]
impl IncidentStore for MongoStores {
    async fn insert(&self, incident: &IncidentModel) -> Result<(), Error> {
        self.incidents.insert_one(incident, None).await?;
        Ok(())
    }

    async fn list_by_owner(&self, owner: ObjectId) -> Result<Vec<IncidentModel>, Error> {
        let mut cursor = self
            .incidents
            .find(
                doc! { "user_id": owner },
                FindOptions::builder().sort(doc! { "created_at": -1 }).build(),
            )
            .await?;

        let mut incidents = Vec::new();
        while cursor.advance().await? {
            incidents.push(cursor.deserialize_current()?);
        }

        Ok(incidents)
    }

    async fn update_owned(
        &self,
        id: ObjectId,
        owner: ObjectId,
        patch: &IncidentPatch,
    ) -> Result<Option<IncidentModel>, Error> {
        let mut set = doc! { "updated_at": bson::DateTime::now() };
        if let Some(status) = &patch.status {
            set.insert("status", bson::to_bson(status)?);
        }
        if let Some(location) = &patch.location {
            set.insert("location", bson::to_bson(location)?);
        }
        if let Some(vehicle_type) = &patch.vehicle_type {
            set.insert("vehicle_type", vehicle_type);
        }
        if let Some(issue_type) = &patch.issue_type {
            set.insert("issue_type", bson::to_bson(issue_type)?);
        }

        self.incidents
            .find_one_and_update(
                doc! { "_id": id, "user_id": owner },
                doc! { "$set": set },
                FindOneAndUpdateOptions::builder()
                    .return_document(ReturnDocument::After)
                    .build(),
            )
            .await
            .map_err(Into::into)
    }

    async fn delete_owned(&self, id: ObjectId, owner: ObjectId) -> Result<bool, Error> {
        let result = self
            .incidents
            .delete_one(doc! { "_id": id, "user_id": owner }, None)
            .await?;

        Ok(result.deleted_count > 0)
    }
}

#[axum::async_trait]
impl ProviderStore for MongoStores {
    async fn insert(&self, provider: &ServiceProviderModel) -> Result<(), Error> {
        self.providers.insert_one(provider, None).await?;
        Ok(())
    }

    async fn list_available(&self) -> Result<Vec<ServiceProviderModel>, Error> {
        let mut cursor = self
            .providers
            .find(
                doc! { "availability_status": "available" },
                FindOptions::builder().sort(doc! { "rating": -1 }).build(),
            )
            .await?;

        let mut providers = Vec::new();
        while cursor.advance().await? {
            providers.push(cursor.deserialize_current()?);
        }

        Ok(providers)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct MigrateModel {
    #[serde(rename = "_id")]
    id: ObjectId,
    version: u32,
    applied_at: bson::DateTime,
}

async fn current_version(migrations: &Collection<MigrateModel>) -> Result<u32, Error> {
    let latest = migrations
        .find_one(
            doc! {},
            mongodb::options::FindOneOptions::builder()
                .sort(doc! { "version": -1 })
                .build(),
        )
        .await?;

    Ok(latest.map(|it| it.version).unwrap_or(0))
}

async fn unique_index(db: &Database, collection: &str, field: &str) -> Result<(), Error> {
    db.collection::<bson::Document>(collection)
        .create_index(
            IndexModel::builder()
                .keys(doc! { field: 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build(),
            None,
        )
        .await?;

    Ok(())
}

/// Applies schema migrations that have not run yet. Versions already recorded
/// in the `migrations` collection are skipped.
pub async fn migrate(db: &Database) -> Result<(), Error> {
    let migrations = db.collection::<MigrateModel>("migrations");
    let version = current_version(&migrations).await?;

    if version < 1 {
        unique_index(db, "accounts", "email").await?;
    }

    if version < 2 {
        unique_index(db, "users", "account_id").await?;
    }

    if version < 3 {
        db.collection::<bson::Document>("incidents")
            .create_index(IndexModel::builder().keys(doc! { "user_id": 1 }).build(), None)
            .await?;
    }

    for new_version in (version + 1)..=3 {
        migrations
            .insert_one(
                MigrateModel {
                    id: ObjectId::new(),
                    version: new_version,
                    applied_at: bson::DateTime::now(),
                },
                None,
            )
            .await?;
    }

    Ok(())
}
