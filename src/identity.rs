//! Identity-provider port. The provider itself (session handling, token
//! refresh, sign-in UI) is an external collaborator; the core consumes a
//! one-shot "identity check complete" future plus the signed-in/out
//! notifications relayed through [`CoreStore`](crate::store::CoreStore).

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// The authenticated principal. Serialized into the state tree under
/// `identity` — without the session token, which is runtime-only secret
/// state and never reaches the tree or the local cache.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub uid: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(skip)]
    pub session_token: Option<SecretString>,
}

impl Principal {
    #[must_use]
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            email: None,
            display_name: None,
            session_token: None,
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    #[must_use]
    pub fn with_session_token(mut self, token: SecretString) -> Self {
        self.session_token = Some(token);
        self
    }
}

// Token intentionally excluded: two principals are the same signer
// regardless of which session token they currently hold.
impl PartialEq for Principal {
    fn eq(&self, other: &Self) -> bool {
        self.uid == other.uid
            && self.email == other.email
            && self.display_name == other.display_name
    }
}

impl Eq for Principal {}

/// One-shot readiness signal from the external identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolves when the provider's initial identity check completes,
    /// carrying the authenticated principal if there is one.
    ///
    /// The gateway races this against
    /// [`IDENTITY_WAIT_TIMEOUT`](crate::IDENTITY_WAIT_TIMEOUT) and treats
    /// an elapsed timeout as an unauthenticated session.
    async fn identity_check(&self) -> Option<Principal>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn principal_equality_ignores_session_token() {
        let a = Principal::new("u1").with_session_token(SecretString::new("s3cret".into()));
        let b = Principal::new("u1");
        assert_eq!(a, b);
    }

    #[test]
    fn principal_serialization_omits_token() {
        let p = Principal::new("u1")
            .with_email("u@example.com")
            .with_session_token(SecretString::new("s3cret".into()));
        let v = serde_json::to_value(&p).expect("serialize");
        assert_eq!(v["uid"], "u1");
        assert_eq!(v["email"], "u@example.com");
        assert!(v.get("sessionToken").is_none());
        assert!(!v.to_string().contains("s3cret"));
    }
}
