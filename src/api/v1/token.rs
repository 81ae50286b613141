use std::sync::Arc;

use argon2::Argon2;
use base64::{engine::general_purpose, Engine as _};
use bson::oid::ObjectId;
use jsonwebtoken::TokenData;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::{
    error::{Error, UnauthorizedType},
    util::{hash_password, ObjectIdString},
};

use super::auth::AccountModel;

#[derive(Clone)]
pub struct JwtState {
    validation: jsonwebtoken::Validation,
    header: jsonwebtoken::Header,

    encoding_key: jsonwebtoken::EncodingKey,
    decoding_key: jsonwebtoken::DecodingKey,
}

impl JwtState {
    pub fn from_secret(secret: &[u8]) -> Self {
        let header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256);
        let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
        // expiry is checked manually so expired tokens still decode into
        // claims the caller can inspect
        validation.validate_exp = false;

        Self {
            header,
            validation,

            encoding_key: jsonwebtoken::EncodingKey::from_secret(secret),
            decoding_key: jsonwebtoken::DecodingKey::from_secret(secret),
        }
    }

    pub fn new_from_env() -> Self {
        let secret_key = std::env::var("JWT_SECRET_KEY")
            .expect("Cannot retrieve JWT_SECRET_KEY from environment variable.");
        let secret_key = general_purpose::STANDARD
            .decode(secret_key)
            .expect("JWT_SECRET_KEY must be base64");

        Self::from_secret(&secret_key)
    }
}

/// Verifier for identity tokens minted by the federated sign-in provider.
/// The provider asserts the email, so accounts created through this path are
/// born verified.
#[derive(Clone)]
pub struct FederatedJwt {
    validation: jsonwebtoken::Validation,
    decoding_key: jsonwebtoken::DecodingKey,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FederatedClaims {
    pub iss: String,
    pub aud: String,
    pub sub: String,
    pub email: String,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub exp: i64,
}

impl FederatedJwt {
    pub fn new(secret: &[u8], issuer: &str, audience: &str) -> Self {
        let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);

        Self {
            validation,
            decoding_key: jsonwebtoken::DecodingKey::from_secret(secret),
        }
    }

    pub fn new_from_env() -> Self {
        let secret = std::env::var("FEDERATED_JWT_SECRET")
            .expect("Cannot retrieve FEDERATED_JWT_SECRET from environment variable.");
        let secret = general_purpose::STANDARD
            .decode(secret)
            .expect("FEDERATED_JWT_SECRET must be base64");
        let issuer = std::env::var("FEDERATED_ISSUER")
            .expect("Cannot retrieve FEDERATED_ISSUER from environment variable.");
        let audience = std::env::var("FEDERATED_AUDIENCE")
            .expect("Cannot retrieve FEDERATED_AUDIENCE from environment variable.");

        Self::new(&secret, &issuer, &audience)
    }

    pub fn verify(&self, token: &str) -> Result<FederatedClaims, Error> {
        jsonwebtoken::decode::<FederatedClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|_| Error::Unauthorized(UnauthorizedType::InvalidFederatedToken))
    }
}

pub fn current_timestamp() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// Persistence for refresh-token sessions. Logout deletes the record, which
/// invalidates the refresh token server-side.
#[axum::async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: &RefreshTokenModel) -> Result<(), Error>;
    async fn find_by_id(&self, id: ObjectId) -> Result<Option<RefreshTokenModel>, Error>;
    async fn delete_by_id(&self, id: ObjectId) -> Result<bool, Error>;
}

#[derive(Clone)]
pub struct Sessions(pub Arc<dyn SessionStore>);

impl std::ops::Deref for Sessions {
    type Target = dyn SessionStore;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RefreshTokenClaims {
    pub sub: ObjectIdString,
    pub account_id: ObjectIdString,
    pub exp: i64,
}

impl RefreshTokenClaims {
    pub fn is_expired(&self) -> bool {
        self.exp < current_timestamp().unix_timestamp()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RefreshTokenModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub account_id: ObjectId,
    pub token: String,
    pub expired_at: bson::DateTime,
}

pub async fn create_refresh_token(
    jwt_state: &JwtState,
    argon: &Argon2<'_>,
    sessions: Sessions,
    account: &AccountModel,
) -> Result<String, Error> {
    let (model, token) = generate_refresh_token_model(jwt_state, argon, account)?;

    sessions.insert(&model).await?;

    Ok(token)
}

pub fn generate_refresh_token_model(
    jwt_state: &JwtState,
    argon: &Argon2,
    account: &AccountModel,
) -> Result<(RefreshTokenModel, String), Error> {
    let expired_at = current_timestamp() + Duration::weeks(1);

    generate_refresh_token_model_with_exp(jwt_state, argon, account, expired_at)
}

pub fn generate_refresh_token_model_with_exp(
    jwt_state: &JwtState,
    argon: &Argon2,
    account: &AccountModel,
    expired_at: OffsetDateTime,
) -> Result<(RefreshTokenModel, String), Error> {
    let id = ObjectId::new();
    let token =
        generate_refresh_token_string(jwt_state, id, account.id, expired_at.unix_timestamp())?;

    Ok((
        RefreshTokenModel {
            id,
            account_id: account.id,
            token: hash_password(argon, &token)?,
            expired_at: expired_at.into(),
        },
        token,
    ))
}

pub fn generate_refresh_token_string(
    jwt_state: &JwtState,
    id: ObjectId,
    account_id: ObjectId,
    exp: i64,
) -> Result<String, Error> {
    let claims = RefreshTokenClaims {
        sub: id.into(),
        account_id: account_id.into(),
        exp,
    };

    jsonwebtoken::encode(&jwt_state.header, &claims, &jwt_state.encoding_key).map_err(Into::into)
}

pub fn decode_refresh_token(
    jwt_state: &JwtState,
    token: &str,
) -> Result<TokenData<RefreshTokenClaims>, Error> {
    jsonwebtoken::decode(token, &jwt_state.decoding_key, &jwt_state.validation)
        .map_err(|_| Error::Unauthorized(UnauthorizedType::InvalidRefreshToken))
}

#[derive(Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: ObjectIdString,
    pub email: String,
    pub email_verified: bool,
    pub exp: i64,
}

impl AccessTokenClaims {
    pub fn is_expired(&self) -> bool {
        self.exp < current_timestamp().unix_timestamp()
    }
}

pub struct GenerateAccessTokenResponse {
    pub expired_at: OffsetDateTime,
    pub token: String,
}

pub fn generate_access_token(
    jwt_state: &JwtState,
    account: &AccountModel,
) -> Result<GenerateAccessTokenResponse, Error> {
    let expired_at = current_timestamp() + Duration::minutes(10);
    let token = generate_access_token_with_exp(jwt_state, account, expired_at.unix_timestamp())?;

    Ok(GenerateAccessTokenResponse { expired_at, token })
}

pub fn generate_access_token_with_exp(
    jwt_state: &JwtState,
    account: &AccountModel,
    exp: i64,
) -> Result<String, Error> {
    jsonwebtoken::encode(
        &jwt_state.header,
        &AccessTokenClaims {
            sub: account.id.into(),
            email: account.email.clone(),
            email_verified: account.email_verified,
            exp,
        },
        &jwt_state.encoding_key,
    )
    .map_err(Into::into)
}

pub fn decode_access_token(
    jwt_state: &JwtState,
    token: &str,
) -> Result<TokenData<AccessTokenClaims>, Error> {
    jsonwebtoken::decode(token, &jwt_state.decoding_key, &jwt_state.validation)
        .map_err(|_| Error::Unauthorized(UnauthorizedType::InvalidAccessToken))
}

const VERIFY_EMAIL_PURPOSE: &str = "verify_email";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VerificationClaims {
    pub sub: ObjectIdString,
    pub email: String,
    pub purpose: String,
    pub exp: i64,
}

pub fn generate_verification_token(
    jwt_state: &JwtState,
    account: &AccountModel,
) -> Result<String, Error> {
    let expired_at = current_timestamp() + Duration::days(1);

    let claims = VerificationClaims {
        sub: account.id.into(),
        email: account.email.clone(),
        purpose: VERIFY_EMAIL_PURPOSE.to_string(),
        exp: expired_at.unix_timestamp(),
    };

    jsonwebtoken::encode(&jwt_state.header, &claims, &jwt_state.encoding_key).map_err(Into::into)
}

pub fn decode_verification_token(
    jwt_state: &JwtState,
    token: &str,
) -> Result<VerificationClaims, Error> {
    let claims = jsonwebtoken::decode::<VerificationClaims>(
        token,
        &jwt_state.decoding_key,
        &jwt_state.validation,
    )
    .map_err(|_| Error::Unauthorized(UnauthorizedType::InvalidVerificationToken))?
    .claims;

    if claims.purpose != VERIFY_EMAIL_PURPOSE
        || claims.exp < current_timestamp().unix_timestamp()
    {
        return Err(Error::Unauthorized(
            UnauthorizedType::InvalidVerificationToken,
        ));
    }

    Ok(claims)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use bson::DateTime;

    use crate::{
        api::v1::auth::{AccountModel, AuthProvider},
        util::verify_password,
    };

    use super::*;

    fn test_account() -> AccountModel {
        AccountModel {
            id: ObjectId::new(),
            email: "driver@example.com".to_string(),
            password: None,
            display_name: None,
            photo_url: None,
            phone_number: None,
            email_verified: true,
            provider: AuthProvider::Password,
            created_at: DateTime::now(),
            updated_at: DateTime::now(),
        }
    }

    #[test]
    pub fn test_refresh_token() {
        let jwt = JwtState::from_secret(b"test-secret");
        let argon = Argon2::default();

        let account = test_account();

        let (model, token) = generate_refresh_token_model(&jwt, &argon, &account).unwrap();
        assert!(verify_password(&argon, &token, &model.token));

        let token = decode_refresh_token(&jwt, &token).unwrap();
        assert_eq!(token.claims.sub, model.id);
        assert_eq!(token.claims.account_id, model.account_id);
        assert!(!token.claims.is_expired());

        let (_, token) = generate_refresh_token_model_with_exp(
            &jwt,
            &argon,
            &account,
            current_timestamp() + Duration::seconds(-1),
        )
        .unwrap();

        let token = decode_refresh_token(&jwt, &token).unwrap();

        assert!(token.claims.is_expired());
    }

    #[test]
    pub fn test_access_token() {
        let jwt = JwtState::from_secret(b"test-secret");

        let account = test_account();

        let token = generate_access_token(&jwt, &account).unwrap().token;

        let token = decode_access_token(&jwt, &token).unwrap();
        assert_eq!(token.claims.sub, account.id);
        assert_eq!(token.claims.email, account.email);
        assert!(token.claims.email_verified);
        assert!(!token.claims.is_expired());

        let token = generate_access_token_with_exp(
            &jwt,
            &account,
            (current_timestamp() + Duration::seconds(-1)).unix_timestamp(),
        )
        .unwrap();

        let token = decode_access_token(&jwt, &token).unwrap();

        assert!(token.claims.is_expired());
    }

    #[test]
    pub fn test_verification_token() {
        let jwt = JwtState::from_secret(b"test-secret");

        let account = test_account();

        let token = generate_verification_token(&jwt, &account).unwrap();
        let claims = decode_verification_token(&jwt, &token).unwrap();
        assert_eq!(claims.sub, account.id);
        assert_eq!(claims.email, account.email);

        // an access token must not pass as a verification token
        let access = generate_access_token(&jwt, &account).unwrap().token;
        let error = decode_verification_token(&jwt, &access).unwrap_err();
        assert_matches!(
            error,
            Error::Unauthorized(UnauthorizedType::InvalidVerificationToken)
        );
    }

    #[test]
    pub fn test_federated_token() {
        let federated = FederatedJwt::new(b"federated-secret", "https://idp.example.com", "roadguard");

        let claims = FederatedClaims {
            iss: "https://idp.example.com".to_string(),
            aud: "roadguard".to_string(),
            sub: "google-uid-1".to_string(),
            email: "driver@example.com".to_string(),
            name: Some("Driver".to_string()),
            picture: None,
            exp: (current_timestamp() + Duration::minutes(5)).unix_timestamp(),
        };

        let token = jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(b"federated-secret"),
        )
        .unwrap();

        let verified = federated.verify(&token).unwrap();
        assert_eq!(verified.email, claims.email);

        let other_issuer = FederatedJwt::new(b"federated-secret", "https://other.example.com", "roadguard");
        let error = other_issuer.verify(&token).unwrap_err();
        assert_matches!(
            error,
            Error::Unauthorized(UnauthorizedType::InvalidFederatedToken)
        );
    }
}
