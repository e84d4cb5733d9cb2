use super::principal::{Profile, User};

/// Controller state. `Active` and `WarningShown` are both authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Unauthenticated,
    Active,
    WarningShown,
    TransitioningOut,
}

impl Phase {
    pub fn is_authenticated(self) -> bool { matches!(self, Phase::Active | Phase::WarningShown) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutReason {
    Manual,
    /// Wall-clock session lifetime elapsed.
    Expired,
    /// No qualifying activity for the inactivity timeout.
    Inactive,
}

/// Non-blocking, dismissable messages for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    InactivityWarning { minutes_remaining: u64 },
    InactivityLogout,
    SessionExpired,
}

impl Notice {
    pub fn message(&self) -> String {
        match self {
            Notice::InactivityWarning { minutes_remaining: 1 } => {
                "You will be logged out in 1 minute due to inactivity.".to_string()
            }
            Notice::InactivityWarning { minutes_remaining } => {
                format!("You will be logged out in {} minutes due to inactivity.", minutes_remaining)
            }
            Notice::InactivityLogout => "You have been logged out due to inactivity.".to_string(),
            Notice::SessionExpired => "Your session has expired. Please log in again.".to_string(),
        }
    }

    pub(crate) fn for_reason(reason: SignOutReason) -> Option<Self> {
        match reason {
            SignOutReason::Manual => None,
            SignOutReason::Expired => Some(Notice::SessionExpired),
            SignOutReason::Inactive => Some(Notice::InactivityLogout),
        }
    }
}

/// What the UI renders from; published on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub user: Option<User>,
    pub profile: Option<Profile>,
    pub loading: bool,
}
