use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("{0} must be unique")]
    MustUnique(String),

    #[error("{0}")]
    Unauthorized(UnauthorizedType),

    /// Missing record and foreign ownership are deliberately collapsed into
    /// one error so callers cannot probe for other users' records.
    #[error("no resource found")]
    NotFoundOrForbidden,

    #[error("{0}")]
    Upstream(#[from] mongodb::error::Error),

    #[error("{0}")]
    PasswordHash(#[from] password_hash::Error),

    #[error("{0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("{0}")]
    BsonSer(#[from] bson::ser::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum UnauthorizedType {
    #[error("wrong email or password")]
    InvalidCredentials,

    #[error("email address is not verified")]
    EmailNotVerified,

    #[error("invalid access token")]
    InvalidAccessToken,

    #[error("invalid refresh token")]
    InvalidRefreshToken,

    #[error("invalid verification token")]
    InvalidVerificationToken,

    #[error("invalid federated identity token")]
    InvalidFederatedToken,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorJson {
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<serde_json::Value>,
    r#type: String,
    message: String,
}

impl From<Error> for ErrorJson {
    fn from(err: Error) -> Self {
        let message = err.to_string();

        let r#type = err.to_string_variant();

        let errors = match err {
            Error::Validation(err) => serde_json::to_value(err).ok(),
            Error::MustUnique(..)
            | Error::Unauthorized(..)
            | Error::NotFoundOrForbidden
            | Error::Upstream(..)
            | Error::PasswordHash(..)
            | Error::Jwt(..)
            | Error::BsonSer(..) => None,
        };

        Self {
            errors,
            message,
            r#type,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        tracing::error!("error: {:?}", self);
        let status = match self {
            Self::Unauthorized(..) => StatusCode::UNAUTHORIZED,
            Self::Validation(..) | Self::MustUnique(..) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFoundOrForbidden => StatusCode::NOT_FOUND,
            Self::Upstream(..) => StatusCode::SERVICE_UNAVAILABLE,
            Self::PasswordHash(..) | Self::Jwt(..) | Self::BsonSer(..) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let error = ErrorJson::from(self);

        (status, Json(error)).into_response()
    }
}

impl Error {
    pub fn to_string_variant(&self) -> String {
        macro_rules! match_var {
            ($id:ident !) => {
                Self::$id
            };
            ($id:ident (..)) => {
                Self::$id(..)
            };
        }

        macro_rules! variant {
            ($($name:ident $tt:tt),+) => {
                match self {
                    $(
                        match_var!($name $tt) => {
                            stringify!($name)
                       }
                    )+
                }
            };
        }

        variant! {
            Validation(..),
            MustUnique(..),
            Unauthorized(..),
            NotFoundOrForbidden!,
            Upstream(..),
            PasswordHash(..),
            Jwt(..),
            BsonSer(..)
        }
        .to_string()
    }
}

impl From<axum::extract::rejection::PathRejection> for Error {
    fn from(_value: axum::extract::rejection::PathRejection) -> Self {
        Self::NotFoundOrForbidden
    }
}
