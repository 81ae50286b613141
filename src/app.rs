use std::sync::Arc;

use argon2::Argon2;
use axum::extract::FromRef;

use crate::{
    api::v1::{
        auth::Accounts,
        incident::Incidents,
        profile::Users,
        provider::Providers,
        token::{FederatedJwt, JwtState, Sessions},
    },
    error::Error,
    mailer::{Mailer, TracingMailer},
    store::mongo::{migrate, MongoStores},
};

#[derive(FromRef, Clone)]
pub struct AppState {
    pub argon: Argon2<'static>,
    pub jwt_state: JwtState,
    pub federated_jwt: FederatedJwt,
    pub mailer: Mailer,

    pub accounts: Accounts,
    pub sessions: Sessions,
    pub users: Users,
    pub incidents: Incidents,
    pub providers: Providers,
}

impl AppState {
    pub async fn new_from_env() -> Result<Self, Error> {
        let mongo_url = std::env::var("MONGODB_URI")
            .expect("Cannot retrieve MONGODB_URI from environment variable.");
        let database = std::env::var("DATABASE_NAME").unwrap_or_else(|_| "roadguard".to_string());

        Self::new_mongo(&mongo_url, &database).await
    }

    pub async fn new_mongo(mongo_url: &str, database: &str) -> Result<Self, Error> {
        let client = mongodb::Client::with_uri_str(mongo_url).await?;
        let db = client.database(database);

        migrate(&db).await?;

        let stores = Arc::new(MongoStores::new(&db));

        Ok(Self {
            argon: Argon2::default(),
            jwt_state: JwtState::new_from_env(),
            federated_jwt: FederatedJwt::new_from_env(),
            mailer: Mailer(Arc::new(TracingMailer)),

            accounts: Accounts(stores.clone()),
            sessions: Sessions(stores.clone()),
            users: Users(stores.clone()),
            incidents: Incidents(stores.clone()),
            providers: Providers(stores),
        })
    }

    #[cfg(test)]
    pub fn new_in_memory(
        jwt_state: JwtState,
        federated_jwt: FederatedJwt,
        mailer: Mailer,
    ) -> Self {
        let store = Arc::new(crate::store::memory::MemoryStore::default());

        Self {
            argon: Argon2::default(),
            jwt_state,
            federated_jwt,
            mailer,

            accounts: Accounts(store.clone()),
            sessions: Sessions(store.clone()),
            users: Users(store.clone()),
            incidents: Incidents(store.clone()),
            providers: Providers(store),
        }
    }
}
