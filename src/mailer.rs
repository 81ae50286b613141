use std::sync::Arc;

use crate::error::Error;

/// Delivery seam for verification emails. The token inside the link is the
/// only thing the rest of the system cares about, so that is all the trait
/// carries.
#[axum::async_trait]
pub trait VerificationMailer: Send + Sync {
    async fn send_verification(&self, email: &str, token: &str) -> Result<(), Error>;
}

#[derive(Clone)]
pub struct Mailer(pub Arc<dyn VerificationMailer>);

impl std::ops::Deref for Mailer {
    type Target = dyn VerificationMailer;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

/// Default mailer: emits the verification link into the log stream. Real
/// deployments swap in an SMTP-backed implementation behind the same trait.
pub struct TracingMailer;

#[axum::async_trait]
impl VerificationMailer for TracingMailer {
    async fn send_verification(&self, email: &str, token: &str) -> Result<(), Error> {
        tracing::info!(email, "verification email: /auth/verify-email?token={}", token);
        Ok(())
    }
}

#[cfg(test)]
pub struct CaptureMailer(std::sync::Mutex<Vec<(String, String)>>);

#[cfg(test)]
impl Default for CaptureMailer {
    fn default() -> Self {
        Self(std::sync::Mutex::new(Vec::new()))
    }
}

#[cfg(test)]
impl CaptureMailer {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.0.lock().expect("mailer lock poisoned").clone()
    }

    pub fn last_token_for(&self, email: &str) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .find(|(to, _)| to == email)
            .map(|(_, token)| token)
    }
}

#[cfg(test)]
#[axum::async_trait]
impl VerificationMailer for CaptureMailer {
    async fn send_verification(&self, email: &str, token: &str) -> Result<(), Error> {
        self.0
            .lock()
            .expect("mailer lock poisoned")
            .push((email.to_string(), token.to_string()));
        Ok(())
    }
}
