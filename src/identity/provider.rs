use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use super::principal::{AuthSession, Profile};
use crate::error::AppResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// Change notification pushed by the Identity Backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChange {
    pub event: AuthEvent,
    pub session: Option<AuthSession>,
}

/// Opaque authentication service (hosted auth in production).
#[async_trait]
pub trait IdentityBackend: Send + Sync {
    async fn get_current_session(&self) -> AppResult<Option<AuthSession>>;
    /// Live feed of auth changes; every subscriber gets every change from now on.
    fn subscribe(&self) -> broadcast::Receiver<AuthChange>;
    async fn sign_in_with_password(&self, email: &str, password: &str) -> AppResult<AuthSession>;
    async fn sign_out(&self) -> AppResult<()>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, user_id: &str) -> AppResult<Profile>;
    async fn update_last_login(&self, user_id: &str, at: DateTime<Utc>) -> AppResult<()>;
}
