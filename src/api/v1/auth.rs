use std::sync::Arc;

use argon2::Argon2;
use axum::{
    extract::{FromRef, FromRequestParts, State},
    headers::{authorization::Bearer, Authorization, Cookie, Header, SetCookie},
    http::{request::Parts, HeaderValue},
    Json, RequestPartsExt, TypedHeader,
};
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use time::OffsetDateTime;
use validator::Validate;

use crate::{
    error::{Error, UnauthorizedType},
    mailer::Mailer,
    util::{hash_password, verify_password, FormattedDateTime, ObjectIdString},
};

use super::token::{
    create_refresh_token, decode_access_token, decode_refresh_token, decode_verification_token,
    generate_access_token, generate_verification_token, FederatedJwt, JwtState,
    RefreshTokenClaims, Sessions,
};

/// Identity principal record. This is the account the identity layer
/// authenticates; the `users` profile collection is a separate document
/// created on first dashboard visit.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AccountModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub email: String,
    /// Argon2 hash. Absent for accounts created through the federated flow.
    pub password: Option<String>,

    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub phone_number: Option<String>,

    pub email_verified: bool,
    pub provider: AuthProvider,

    pub created_at: bson::DateTime,
    pub updated_at: bson::DateTime,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthProvider {
    #[default]
    Password,
    Google,
}

#[axum::async_trait]
pub trait AccountStore: Send + Sync {
    async fn insert(&self, account: &AccountModel) -> Result<(), Error>;
    async fn find_by_id(&self, id: ObjectId) -> Result<Option<AccountModel>, Error>;
    async fn find_by_email(&self, email: &str) -> Result<Option<AccountModel>, Error>;
    /// Flips `email_verified` and stamps `updated_at`. Returns false when no
    /// such account exists.
    async fn mark_verified(&self, id: ObjectId) -> Result<bool, Error>;
    /// Atomic find-or-create keyed by email, for the federated flow. The
    /// candidate is only inserted when no account with that email exists;
    /// either way the stored account is returned.
    async fn upsert_federated(&self, candidate: &AccountModel) -> Result<AccountModel, Error>;
}

#[derive(Clone)]
pub struct Accounts(pub Arc<dyn AccountStore>);

impl std::ops::Deref for Accounts {
    type Target = dyn AccountStore;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

/// The authenticated principal extracted from the access token.
#[derive(Debug)]
pub struct UserAccess {
    pub id: ObjectId,
    pub email: String,
    pub email_verified: bool,
}

impl UserAccess {
    pub fn from_token(jwt_state: &JwtState, token: &str) -> Result<Self, Error> {
        let token = decode_access_token(jwt_state, token)?;

        if token.claims.is_expired() {
            return Err(Error::Unauthorized(UnauthorizedType::InvalidAccessToken));
        }

        Ok(Self {
            id: token.claims.sub.0,
            email: token.claims.email,
            email_verified: token.claims.email_verified,
        })
    }

    /// A principal without a verified email is not authenticated as far as
    /// gated operations are concerned.
    pub fn require_verified(&self) -> Result<(), Error> {
        if self.email_verified {
            Ok(())
        } else {
            Err(Error::Unauthorized(UnauthorizedType::EmailNotVerified))
        }
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for UserAccess
where
    JwtState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;
    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(token)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| Error::Unauthorized(UnauthorizedType::InvalidAccessToken))?;

        let jwt = JwtState::from_ref(state);

        Self::from_token(&jwt, token.token())
    }
}

#[derive(Debug)]
pub struct RefreshToken(String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for RefreshToken {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let cookie = parts
            .extract::<TypedHeader<Cookie>>()
            .await
            .map_err(|_| Error::Unauthorized(UnauthorizedType::InvalidRefreshToken))
            .tap_err(|_| tracing::debug!("cookie not found"))?;

        let refresh_token = cookie
            .get("refresh_token")
            .ok_or_else(|| Error::Unauthorized(UnauthorizedType::InvalidRefreshToken))
            .tap_err(|_| tracing::debug!("token not found"))?;

        Ok(Self(refresh_token.to_string()))
    }
}

#[derive(Debug)]
pub struct RefreshClaim(pub RefreshTokenClaims, pub String);

impl RefreshClaim {
    pub fn from_token(jwt_state: &JwtState, refresh_token: String) -> Result<Self, Error> {
        let token = decode_refresh_token(jwt_state, &refresh_token)?;

        Ok(Self(token.claims, refresh_token))
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for RefreshClaim
where
    JwtState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let RefreshToken(refresh_token) = parts.extract::<RefreshToken>().await?;

        let jwt = JwtState::from_ref(state);

        Self::from_token(&jwt, refresh_token)
    }
}

impl AccountModel {
    pub async fn from_id(id: ObjectId, accounts: &Accounts) -> Result<Self, Error> {
        accounts
            .find_by_id(id)
            .await?
            .ok_or(Error::Unauthorized(UnauthorizedType::InvalidAccessToken))
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AccountModel
where
    JwtState: FromRef<S>,
    Accounts: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;
    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let access = parts.extract_with_state::<UserAccess, _>(state).await?;
        let accounts = Accounts::from_ref(state);
        Self::from_id(access.id, &accounts).await
    }
}

/// Principal view returned to callers; timestamps and ids are boundary types.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Principal {
    pub id: ObjectIdString,
    pub email: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub phone_number: Option<String>,
    pub email_verified: bool,
    pub created_at: FormattedDateTime,
}

impl From<AccountModel> for Principal {
    fn from(value: AccountModel) -> Self {
        Self {
            id: value.id.into(),
            email: value.email,
            display_name: value.display_name,
            photo_url: value.photo_url,
            phone_number: value.phone_number,
            email_verified: value.email_verified,
            created_at: value.created_at.into(),
        }
    }
}

/// Registration that still awaits email verification is a success variant,
/// not an error; callers branch on the tag instead of matching messages.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RegisterOutcome {
    PendingVerification {
        email: String,
    },
    Completed {
        principal: Principal,
        access_token: String,
        refresh_token: String,
    },
}

pub struct NewAccount {
    pub email: String,
    pub password: Option<String>,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub phone_number: Option<String>,
    pub email_verified: bool,
    pub provider: AuthProvider,
}

pub async fn create_account(
    accounts: Accounts,
    argon: &Argon2<'_>,
    request: NewAccount,
) -> Result<AccountModel, Error> {
    if accounts.find_by_email(&request.email).await?.is_some() {
        return Err(Error::MustUnique("email".to_string()));
    }

    let password = match &request.password {
        Some(password) => Some(hash_password(argon, password)?),
        None => None,
    };

    let now = OffsetDateTime::now_utc();
    let model = AccountModel {
        id: ObjectId::new(),
        email: request.email,
        password,
        display_name: request.display_name,
        photo_url: request.photo_url,
        phone_number: request.phone_number,
        email_verified: request.email_verified,
        provider: request.provider,
        created_at: now.into(),
        updated_at: now.into(),
    };
    accounts.insert(&model).await?;

    Ok(model)
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct RegisterRequest {
    #[validate(email)]
    pub email: String,

    #[validate(length(min = 8, max = 64))]
    pub password: String,

    #[validate(must_match = "password")]
    pub confirm_password: String,

    #[validate(length(min = 1, max = 124))]
    pub display_name: Option<String>,
}

pub async fn register(
    State(accounts): State<Accounts>,
    State(argon): State<Argon2<'static>>,
    State(jwt_state): State<JwtState>,
    State(mailer): State<Mailer>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<RegisterOutcome>, Error> {
    request.validate()?;

    let account = create_account(
        accounts,
        &argon,
        NewAccount {
            email: request.email,
            password: Some(request.password),
            display_name: request.display_name,
            photo_url: None,
            phone_number: None,
            email_verified: false,
            provider: AuthProvider::Password,
        },
    )
    .await?;

    let token = generate_verification_token(&jwt_state, &account)?;
    mailer.send_verification(&account.email, &token).await?;

    Ok(Json(RegisterOutcome::PendingVerification {
        email: account.email,
    }))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoginResponse {
    pub refresh_token: String,
    pub access_token: String,
}

fn refresh_cookie(refresh_token: &str) -> TypedHeader<SetCookie> {
    TypedHeader(
        SetCookie::decode(
            &mut [HeaderValue::from_str(&format!(
                "refresh_token={}; HttpOnly; Path=/",
                refresh_token
            ))
            .unwrap()]
            .as_slice()
            .iter(),
        )
        .unwrap(),
    )
}

pub async fn login(
    State(accounts): State<Accounts>,
    State(sessions): State<Sessions>,
    State(jwt_state): State<JwtState>,
    State(argon): State<Argon2<'static>>,
    Json(request): Json<LoginRequest>,
) -> Result<(TypedHeader<SetCookie>, Json<LoginResponse>), Error> {
    let account = accounts.find_by_email(&request.email).await?;

    // unknown email and wrong password are indistinguishable on purpose
    let account = match account {
        Some(account)
            if account
                .password
                .as_deref()
                .map(|hashed| verify_password(&argon, &request.password, hashed))
                .unwrap_or(false) =>
        {
            account
        }
        _ => return Err(Error::Unauthorized(UnauthorizedType::InvalidCredentials)),
    };

    if !account.email_verified {
        return Err(Error::Unauthorized(UnauthorizedType::EmailNotVerified));
    }

    let refresh_token = create_refresh_token(&jwt_state, &argon, sessions, &account).await?;
    let access_token = generate_access_token(&jwt_state, &account)?;

    Ok((
        refresh_cookie(&refresh_token),
        Json(LoginResponse {
            refresh_token,
            access_token: access_token.token,
        }),
    ))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FederatedLoginRequest {
    pub id_token: String,
}

pub async fn login_with_google(
    State(accounts): State<Accounts>,
    State(sessions): State<Sessions>,
    State(jwt_state): State<JwtState>,
    State(federated_jwt): State<FederatedJwt>,
    State(argon): State<Argon2<'static>>,
    Json(request): Json<FederatedLoginRequest>,
) -> Result<(TypedHeader<SetCookie>, Json<RegisterOutcome>), Error> {
    let claims = federated_jwt.verify(&request.id_token)?;

    let now = OffsetDateTime::now_utc();
    let candidate = AccountModel {
        id: ObjectId::new(),
        email: claims.email,
        password: None,
        display_name: claims.name,
        photo_url: claims.picture,
        phone_number: None,
        // the provider already verified the address
        email_verified: true,
        provider: AuthProvider::Google,
        created_at: now.into(),
        updated_at: now.into(),
    };

    let account = accounts.upsert_federated(&candidate).await?;

    let refresh_token = create_refresh_token(&jwt_state, &argon, sessions, &account).await?;
    let access_token = generate_access_token(&jwt_state, &account)?;

    Ok((
        refresh_cookie(&refresh_token),
        Json(RegisterOutcome::Completed {
            principal: account.into(),
            access_token: access_token.token,
            refresh_token,
        }),
    ))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VerifyEmailRequest {
    pub token: String,
}

pub async fn verify_email(
    State(accounts): State<Accounts>,
    State(jwt_state): State<JwtState>,
    Json(request): Json<VerifyEmailRequest>,
) -> Result<Json<Principal>, Error> {
    let claims = decode_verification_token(&jwt_state, &request.token)?;

    if !accounts.mark_verified(claims.sub.0).await? {
        return Err(Error::Unauthorized(
            UnauthorizedType::InvalidVerificationToken,
        ));
    }

    let account = accounts
        .find_by_id(claims.sub.0)
        .await?
        .ok_or(Error::Unauthorized(
            UnauthorizedType::InvalidVerificationToken,
        ))?;

    Ok(Json(account.into()))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ResendVerificationRequest {
    pub email: String,
}

/// Always answers 200 so the endpoint cannot be used to probe which emails
/// have accounts.
pub async fn resend_verification(
    State(accounts): State<Accounts>,
    State(jwt_state): State<JwtState>,
    State(mailer): State<Mailer>,
    Json(request): Json<ResendVerificationRequest>,
) -> Result<(), Error> {
    if let Some(account) = accounts.find_by_email(&request.email).await? {
        if !account.email_verified {
            let token = generate_verification_token(&jwt_state, &account)?;
            mailer.send_verification(&account.email, &token).await?;
        }
    }

    Ok(())
}

pub async fn logout(
    State(sessions): State<Sessions>,
    RefreshClaim(claim, _): RefreshClaim,
) -> Result<(), Error> {
    sessions
        .find_by_id(claim.sub.0)
        .await?
        .ok_or(Error::Unauthorized(UnauthorizedType::InvalidRefreshToken))?;

    sessions.delete_by_id(claim.sub.0).await?;

    Ok(())
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RefreshAccessTokenResponse {
    pub access_token: String,
    pub expired_at: FormattedDateTime,
}

pub async fn refresh_access_token(
    State(accounts): State<Accounts>,
    State(sessions): State<Sessions>,
    State(jwt_state): State<JwtState>,
    State(argon): State<Argon2<'static>>,
    RefreshClaim(claim, refresh_token): RefreshClaim,
) -> Result<Json<RefreshAccessTokenResponse>, Error> {
    if claim.is_expired() {
        return Err(Error::Unauthorized(UnauthorizedType::InvalidRefreshToken));
    }

    let model = sessions
        .find_by_id(claim.sub.0)
        .await?
        .ok_or(Error::Unauthorized(UnauthorizedType::InvalidRefreshToken))?;

    if !verify_password(&argon, &refresh_token, &model.token) {
        sessions.delete_by_id(claim.sub.0).await?;
        return Err(Error::Unauthorized(UnauthorizedType::InvalidRefreshToken));
    }

    let account = accounts
        .find_by_id(claim.account_id.0)
        .await?
        .ok_or(Error::Unauthorized(UnauthorizedType::InvalidRefreshToken))?;

    let access_token = generate_access_token(&jwt_state, &account)?;

    Ok(Json(RefreshAccessTokenResponse {
        access_token: access_token.token,
        expired_at: access_token.expired_at.into(),
    }))
}

/// `currentPrincipal()`: who the access token says is calling.
pub async fn session(account: AccountModel) -> Json<Principal> {
    Json(account.into())
}
