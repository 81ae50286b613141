use std::{str::FromStr, sync::Arc};

use axum::{
    extract::{Path, State},
    Json,
};
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use time::OffsetDateTime;
use validator::Validate;

use crate::{
    error::Error,
    util::{FormattedDateTime, ObjectIdString},
};

use super::auth::UserAccess;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    /// Best-effort reverse-geocoded address; may be empty.
    pub address: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Towing,
    Breakdown,
    FlatTire,
    Other,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IncidentModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    /// Owning principal. Set from the session at creation, immutable after.
    pub user_id: ObjectId,

    pub location: Location,
    pub vehicle_type: String,
    pub issue_type: IssueType,
    pub status: IncidentStatus,
    pub assigned_provider_id: Option<ObjectId>,

    pub created_at: bson::DateTime,
    pub updated_at: bson::DateTime,
}

/// Owner-settable subset of an incident. `user_id` and `created_at` have no
/// field here, so they cannot be patched no matter what the request carries.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct IncidentPatch {
    pub status: Option<IncidentStatus>,
    pub location: Option<Location>,
    pub vehicle_type: Option<String>,
    pub issue_type: Option<IssueType>,
}

/// Owner-scoped persistence for incidents. Every mutating operation carries
/// the owner in its predicate, so "not found" and "not owned" are the same
/// `None`/`false` at this seam.
#[axum::async_trait]
pub trait IncidentStore: Send + Sync {
    async fn insert(&self, incident: &IncidentModel) -> Result<(), Error>;
    /// The caller's incidents, newest `created_at` first.
    async fn list_by_owner(&self, owner: ObjectId) -> Result<Vec<IncidentModel>, Error>;
    /// Atomically merges the patch, stamps a fresh `updated_at`, and returns
    /// the post-image.
    async fn update_owned(
        &self,
        id: ObjectId,
        owner: ObjectId,
        patch: &IncidentPatch,
    ) -> Result<Option<IncidentModel>, Error>;
    async fn delete_owned(&self, id: ObjectId, owner: ObjectId) -> Result<bool, Error>;
}

#[derive(Clone)]
pub struct Incidents(pub Arc<dyn IncidentStore>);

impl std::ops::Deref for Incidents {
    type Target = dyn IncidentStore;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Incident {
    pub id: ObjectIdString,
    pub user_id: ObjectIdString,

    pub location: Location,
    pub vehicle_type: String,
    pub issue_type: IssueType,
    pub status: IncidentStatus,
    pub assigned_provider_id: Option<ObjectIdString>,

    pub created_at: FormattedDateTime,
    pub updated_at: FormattedDateTime,
}

impl From<IncidentModel> for Incident {
    fn from(incident: IncidentModel) -> Self {
        Self {
            id: incident.id.into(),
            user_id: incident.user_id.into(),
            location: incident.location,
            vehicle_type: incident.vehicle_type,
            issue_type: incident.issue_type,
            status: incident.status,
            assigned_provider_id: incident.assigned_provider_id.map(Into::into),
            created_at: incident.created_at.into(),
            updated_at: incident.updated_at.into(),
        }
    }
}

pub fn validate_location(location: &Location) -> Result<(), validator::ValidationError> {
    if location.latitude == 0.0 && location.longitude == 0.0 {
        return Err(validator::ValidationError::new("location_unset"));
    }

    Ok(())
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct CreateRequest {
    #[validate(custom = "validate_location")]
    pub location: Location,

    #[validate(length(min = 1, max = 64))]
    pub vehicle_type: String,

    pub issue_type: IssueType,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IndexResponse {
    pub incidents: Vec<Incident>,
}

#[tracing::instrument(
    skip_all,
    fields(
        user = %user.id,
    )
)]
pub async fn create(
    State(incidents): State<Incidents>,
    user: UserAccess,
    Json(request): Json<CreateRequest>,
) -> Result<Json<Incident>, Error> {
    user.require_verified()?;
    request.validate()?;

    let now = OffsetDateTime::now_utc();
    let model = IncidentModel {
        id: ObjectId::new(),
        user_id: user.id,
        location: request.location,
        vehicle_type: request.vehicle_type,
        issue_type: request.issue_type,
        status: IncidentStatus::Pending,
        assigned_provider_id: None,
        created_at: now.into(),
        updated_at: now.into(),
    };

    tracing::debug!("reporting incident {:#?}", model);
    incidents.insert(&model).await?;

    Ok(Json(model.into()))
}

/// The owner is always the session principal; there is no way to ask for
/// another user's incidents.
pub async fn index(
    State(incidents): State<Incidents>,
    user: UserAccess,
) -> Result<Json<IndexResponse>, Error> {
    user.require_verified()?;

    let incidents = incidents
        .list_by_owner(user.id)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(Json(IndexResponse { incidents }))
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct UpdateRequest {
    pub status: Option<IncidentStatus>,

    #[validate(custom = "validate_location")]
    pub location: Option<Location>,

    #[validate(length(min = 1, max = 64))]
    pub vehicle_type: Option<String>,

    pub issue_type: Option<IssueType>,
}

#[tracing::instrument(
    skip_all,
    fields(
        id = %incident_id,
        user = %user.id,
    )
)]
pub async fn update(
    user: UserAccess,
    State(incidents): State<Incidents>,
    Path(incident_id): Path<String>,
    Json(request): Json<UpdateRequest>,
) -> Result<Json<Incident>, Error> {
    user.require_verified()?;
    request.validate()?;

    let incident_id = ObjectId::from_str(&incident_id)
        .map_err(|_| Error::NotFoundOrForbidden)
        .tap_err(|_| tracing::debug!("malformed incident id"))?;

    let patch = IncidentPatch {
        status: request.status,
        location: request.location,
        vehicle_type: request.vehicle_type,
        issue_type: request.issue_type,
    };

    let incident = incidents
        .update_owned(incident_id, user.id, &patch)
        .await?
        .ok_or(Error::NotFoundOrForbidden)
        .tap_err(|_| tracing::debug!("tried updating missing or foreign incident"))?;

    Ok(Json(incident.into()))
}

#[tracing::instrument(
    skip_all,
    fields(
        id = %incident_id,
        user = %user.id,
    )
)]
pub async fn delete(
    State(incidents): State<Incidents>,
    user: UserAccess,
    Path(incident_id): Path<String>,
) -> Result<(), Error> {
    user.require_verified()?;

    let incident_id = ObjectId::from_str(&incident_id)
        .map_err(|_| Error::NotFoundOrForbidden)
        .tap_err(|_| tracing::debug!("malformed incident id"))?;

    let deleted = incidents.delete_owned(incident_id, user.id).await?;
    if !deleted {
        return Err(Error::NotFoundOrForbidden)
            .tap_err(|_| tracing::debug!("tried deleting missing or foreign incident"));
    }

    Ok(())
}
