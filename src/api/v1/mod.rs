pub mod auth;
pub mod incident;
pub mod profile;
pub mod provider;
pub mod token;

#[cfg(test)]
pub mod tests {
    use std::sync::Arc;

    use argon2::Argon2;
    use axum::extract::State;
    use bson::oid::ObjectId;

    use crate::{
        app::AppState,
        mailer::{CaptureMailer, Mailer},
    };

    use super::{
        auth::{create_account, AccountModel, Accounts, AuthProvider, NewAccount, UserAccess},
        incident::Incidents,
        profile::Users,
        provider::Providers,
        token::{generate_access_token, FederatedJwt, JwtState, Sessions},
    };

    pub const FEDERATED_SECRET: &[u8] = b"federated-secret";
    pub const FEDERATED_ISSUER: &str = "https://idp.test";
    pub const FEDERATED_AUDIENCE: &str = "roadguard-test";

    /// In-memory application plus one verified account to act as.
    pub struct Bootstrap {
        pub app_state: AppState,
        pub account: AccountModel,
        account_password: String,
        mailer: Arc<CaptureMailer>,
    }

    pub async fn bootstrap() -> Bootstrap {
        let mailer = Arc::new(CaptureMailer::default());

        let app_state = AppState::new_in_memory(
            JwtState::from_secret(b"test-secret"),
            FederatedJwt::new(FEDERATED_SECRET, FEDERATED_ISSUER, FEDERATED_AUDIENCE),
            Mailer(mailer.clone()),
        );

        let account = verified_account(&app_state, "driver@test.com").await;

        Bootstrap {
            app_state,
            account,
            account_password: "password".to_string(),
            mailer,
        }
    }

    async fn verified_account(app_state: &AppState, email: &str) -> AccountModel {
        create_account(
            app_state.accounts.clone(),
            &app_state.argon,
            NewAccount {
                email: email.to_string(),
                password: Some("password".to_string()),
                display_name: Some("Test Driver".to_string()),
                photo_url: None,
                phone_number: Some("+1-555-0199".to_string()),
                email_verified: true,
                provider: AuthProvider::Password,
            },
        )
        .await
        .unwrap()
    }

    impl Bootstrap {
        /// Another verified principal sharing the same application.
        pub async fn derive(&self, email: &str) -> Bootstrap {
            let account = verified_account(&self.app_state, email).await;

            Bootstrap {
                app_state: self.app_state.clone(),
                account,
                account_password: self.account_password.clone(),
                mailer: self.mailer.clone(),
            }
        }

        pub fn accounts(&self) -> State<Accounts> {
            State(self.app_state.accounts.clone())
        }

        pub fn sessions(&self) -> State<Sessions> {
            State(self.app_state.sessions.clone())
        }

        pub fn users(&self) -> State<Users> {
            State(self.app_state.users.clone())
        }

        pub fn incidents(&self) -> State<Incidents> {
            State(self.app_state.incidents.clone())
        }

        pub fn providers(&self) -> State<Providers> {
            State(self.app_state.providers.clone())
        }

        pub fn argon(&self) -> State<Argon2<'static>> {
            State(self.app_state.argon.clone())
        }

        pub fn jwt_state(&self) -> State<JwtState> {
            State(self.app_state.jwt_state.clone())
        }

        pub fn federated_jwt(&self) -> State<FederatedJwt> {
            State(self.app_state.federated_jwt.clone())
        }

        pub fn mailer_state(&self) -> State<Mailer> {
            State(self.app_state.mailer.clone())
        }

        pub fn account_id(&self) -> ObjectId {
            self.account.id
        }

        pub fn account_email(&self) -> String {
            self.account.email.clone()
        }

        pub fn account_password(&self) -> String {
            self.account_password.clone()
        }

        pub fn access_token(&self) -> String {
            generate_access_token(&self.app_state.jwt_state, &self.account)
                .unwrap()
                .token
        }

        pub fn user_access(&self) -> UserAccess {
            UserAccess::from_token(&self.app_state.jwt_state, &self.access_token()).unwrap()
        }

        pub fn sent_mail(&self) -> Vec<(String, String)> {
            self.mailer.sent()
        }

        pub fn last_verification_token(&self, email: &str) -> Option<String> {
            self.mailer.last_token_for(email)
        }
    }
}
