//! Caller identity.

use serde::{Deserialize, Serialize};

/// The authenticated identity of a caller.
///
/// Established by the auth stage and visible to handlers through the
/// [`RequestContext`](crate::RequestContext). Calls that did not pass through
/// an auth stage are [`CallerIdentity::Anonymous`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallerIdentity {
    /// A bearer-token principal.
    User {
        /// Subject the credential was issued to.
        subject: String,
        /// Roles granted to the subject.
        roles: Vec<String>,
    },
    /// A caller identified by an API key.
    ApiKey {
        /// Key identifier (never the key itself).
        key_id: String,
    },
    /// No credentials were checked.
    #[default]
    Anonymous,
}

impl CallerIdentity {
    /// Creates a user identity.
    pub fn user(subject: impl Into<String>, roles: Vec<String>) -> Self {
        Self::User {
            subject: subject.into(),
            roles,
        }
    }

    /// Returns `true` for [`CallerIdentity::Anonymous`].
    #[must_use]
    pub const fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }

    /// A string identifier suitable for logs. Never contains secrets.
    #[must_use]
    pub fn log_id(&self) -> String {
        match self {
            Self::User { subject, .. } => format!("user:{subject}"),
            Self::ApiKey { key_id } => format!("apikey:{key_id}"),
            Self::Anonymous => "anonymous".to_string(),
        }
    }

    /// Roles carried by the identity.
    #[must_use]
    pub fn roles(&self) -> &[String] {
        match self {
            Self::User { roles, .. } => roles,
            _ => &[],
        }
    }
}
