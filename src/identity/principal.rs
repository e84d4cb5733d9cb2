use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity handle reported by the Identity Backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// One backend session. `session_id` stays stable across token refreshes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthSession {
    pub session_id: String,
    pub user: User,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Portal profile row for an authenticated user.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub user_id: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// agent | supervisor | admin
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub last_login_at: Option<DateTime<Utc>>,
}
