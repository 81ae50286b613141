use std::sync::Arc;

use axum::{extract::State, Json};
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    error::{Error, UnauthorizedType},
    util::{FormattedDateTime, ObjectIdString},
};

use super::auth::AccountModel;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Client,
    ServiceProvider,
    Admin,
}

/// Dashboard profile document, keyed one-to-one to an account. It is created
/// lazily on the first profile read after sign-in.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub account_id: ObjectId,

    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub phone_number: String,

    pub created_at: bson::DateTime,
}

#[axum::async_trait]
pub trait UserStore: Send + Sync {
    /// Find-or-create keyed by `account_id`, in one atomic step. Concurrent
    /// calls for the same account must all observe the same single document.
    async fn ensure(&self, candidate: &UserModel) -> Result<UserModel, Error>;
}

#[derive(Clone)]
pub struct Users(pub Arc<dyn UserStore>);

impl std::ops::Deref for Users {
    type Target = dyn UserStore;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserResponse {
    pub id: ObjectIdString,
    pub account_id: ObjectIdString,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub phone_number: String,
    pub created_at: FormattedDateTime,
}

impl From<UserModel> for UserResponse {
    fn from(user: UserModel) -> Self {
        Self {
            id: user.id.into(),
            account_id: user.account_id.into(),
            email: user.email,
            display_name: user.display_name,
            role: user.role,
            phone_number: user.phone_number,
            created_at: user.created_at.into(),
        }
    }
}

impl UserModel {
    /// Seed profile built from the account the first time it is needed.
    pub fn candidate_for(account: &AccountModel) -> Self {
        Self {
            id: ObjectId::new(),
            account_id: account.id,
            email: account.email.clone(),
            display_name: account
                .display_name
                .clone()
                .unwrap_or_else(|| "User".to_string()),
            role: Role::Client,
            phone_number: account.phone_number.clone().unwrap_or_default(),
            created_at: OffsetDateTime::now_utc().into(),
        }
    }
}

pub async fn show(
    State(users): State<Users>,
    account: AccountModel,
) -> Result<Json<UserResponse>, Error> {
    if !account.email_verified {
        return Err(Error::Unauthorized(UnauthorizedType::EmailNotVerified));
    }

    let candidate = UserModel::candidate_for(&account);
    let user = users.ensure(&candidate).await?;

    Ok(Json(user.into()))
}
