use std::time::Duration;

use tracing::warn;

/// Longest polling interval accepted from the environment.
const MAX_INTERVAL_SECS: u64 = 86_400;

/// Process-level knobs for the controller. Operator durations live in
/// `settings`; these only govern polling cadence and storage keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerOptions {
    /// Cadence of the wall-clock session expiry check while authenticated.
    pub expiry_check_interval: Duration,
    /// Cadence of the Settings Store refresh, independent of session state.
    pub settings_refresh_interval: Duration,
    /// Durable key holding the login timestamp.
    pub stamp_key: String,
    /// Durable key holding the id of the last session ended locally.
    pub revoked_key: String,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            expiry_check_interval: Duration::from_secs(60),
            settings_refresh_interval: Duration::from_secs(5 * 60),
            stamp_key: "session_started_at".to_string(),
            revoked_key: "session_revoked_id".to_string(),
        }
    }
}

impl ControllerOptions {
    /// Defaults overlaid with `PORTAL_SESSION_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub(crate) fn from_lookup<F: Fn(&str) -> Option<String>>(get: F) -> Self {
        let mut o = Self::default();
        if let Some(secs) = secs_var(&get, "PORTAL_SESSION_EXPIRY_CHECK_SECS") {
            o.expiry_check_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = secs_var(&get, "PORTAL_SESSION_SETTINGS_REFRESH_SECS") {
            o.settings_refresh_interval = Duration::from_secs(secs);
        }
        if let Some(k) = get("PORTAL_SESSION_STAMP_KEY").filter(|s| !s.trim().is_empty()) {
            o.stamp_key = k;
        }
        if let Some(k) = get("PORTAL_SESSION_REVOKED_KEY").filter(|s| !s.trim().is_empty()) {
            o.revoked_key = k;
        }
        o
    }
}

fn secs_var<F: Fn(&str) -> Option<String>>(get: &F, name: &str) -> Option<u64> {
    let raw = get(name)?;
    match raw.trim().parse::<u64>() {
        Ok(0) => {
            warn!(target: "portal_session::config", "{}=0 is not a valid interval; keeping default", name);
            None
        }
        Ok(v) if v > MAX_INTERVAL_SECS => {
            warn!(target: "portal_session::config", "{}={} exceeds {}s; keeping default", name, v, MAX_INTERVAL_SECS);
            None
        }
        Ok(v) => Some(v),
        Err(_) => {
            warn!(target: "portal_session::config", "{}='{}' is not a number; keeping default", name, raw);
            None
        }
    }
}
