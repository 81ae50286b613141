use std::sync::Arc;

use axum::{extract::State, Json};
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    util::{FormattedDateTime, ObjectIdString},
};

use super::auth::UserAccess;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityStatus {
    #[default]
    Available,
    Busy,
    Offline,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServiceProviderModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user_id: ObjectId,

    pub company_name: String,
    pub service_area: Vec<String>,
    pub vehicle_types: Vec<String>,
    pub contact_number: String,
    pub availability_status: AvailabilityStatus,
    pub rating: Option<f64>,

    pub created_at: bson::DateTime,
}

#[axum::async_trait]
pub trait ProviderStore: Send + Sync {
    async fn insert(&self, provider: &ServiceProviderModel) -> Result<(), Error>;
    async fn list_available(&self) -> Result<Vec<ServiceProviderModel>, Error>;
}

#[derive(Clone)]
pub struct Providers(pub Arc<dyn ProviderStore>);

impl std::ops::Deref for Providers {
    type Target = dyn ProviderStore;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServiceProvider {
    pub id: ObjectIdString,
    pub company_name: String,
    pub service_area: Vec<String>,
    pub vehicle_types: Vec<String>,
    pub contact_number: String,
    pub availability_status: AvailabilityStatus,
    pub rating: Option<f64>,
    pub created_at: FormattedDateTime,
}

impl From<ServiceProviderModel> for ServiceProvider {
    fn from(provider: ServiceProviderModel) -> Self {
        Self {
            id: provider.id.into(),
            company_name: provider.company_name,
            service_area: provider.service_area,
            vehicle_types: provider.vehicle_types,
            contact_number: provider.contact_number,
            availability_status: provider.availability_status,
            rating: provider.rating,
            created_at: provider.created_at.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IndexResponse {
    pub providers: Vec<ServiceProvider>,
}

/// Directory of providers currently accepting dispatches.
pub async fn index(
    State(providers): State<Providers>,
    user: UserAccess,
) -> Result<Json<IndexResponse>, Error> {
    user.require_verified()?;

    let providers = providers
        .list_available()
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(Json(IndexResponse { providers }))
}

#[cfg(test)]
mod tests {
    use axum::Json;
    use bson::oid::ObjectId;

    use crate::api::v1::tests::bootstrap;

    use super::{AvailabilityStatus, ServiceProviderModel};

    fn provider(company: &str, status: AvailabilityStatus) -> ServiceProviderModel {
        ServiceProviderModel {
            id: ObjectId::new(),
            user_id: ObjectId::new(),
            company_name: company.to_string(),
            service_area: vec!["Center City".to_string(), "Uptown".to_string()],
            vehicle_types: vec!["Sedan".to_string(), "Truck".to_string()],
            contact_number: "+1-555-0100".to_string(),
            availability_status: status,
            rating: Some(4.5),
            created_at: bson::DateTime::now(),
        }
    }

    #[tokio::test]
    async fn test_index_lists_available_only() {
        let bootstrap = bootstrap().await;

        bootstrap
            .app_state
            .providers
            .insert(&provider("Fast Tow", AvailabilityStatus::Available))
            .await
            .unwrap();
        bootstrap
            .app_state
            .providers
            .insert(&provider("Busy Tow", AvailabilityStatus::Busy))
            .await
            .unwrap();
        bootstrap
            .app_state
            .providers
            .insert(&provider("Night Tow", AvailabilityStatus::Offline))
            .await
            .unwrap();

        let Json(response) = super::index(bootstrap.providers(), bootstrap.user_access())
            .await
            .unwrap();

        assert_eq!(response.providers.len(), 1);
        assert_eq!(response.providers[0].company_name, "Fast Tow");
        assert_eq!(
            response.providers[0].service_area,
            vec!["Center City".to_string(), "Uptown".to_string()]
        );
    }

    #[tokio::test]
    async fn test_provider_serializes_areas_as_array() {
        let bootstrap = bootstrap().await;

        bootstrap
            .app_state
            .providers
            .insert(&provider("Fast Tow", AvailabilityStatus::Available))
            .await
            .unwrap();

        let Json(response) = super::index(bootstrap.providers(), bootstrap.user_access())
            .await
            .unwrap();

        let value = serde_json::to_value(&response.providers[0]).unwrap();
        assert_eq!(
            value["service_area"],
            serde_json::json!(["Center City", "Uptown"])
        );
    }
}
