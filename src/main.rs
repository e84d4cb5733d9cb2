use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use portal_session::clock::SystemClock;
use portal_session::config::ControllerOptions;
use portal_session::identity::memory::{InMemoryIdentity, InMemoryProfiles};
use portal_session::identity::{Profile, TracingUi};
use portal_session::settings::{SessionSettings, StaticSettings};
use portal_session::storage::FileKv;
use portal_session::{SessionController, SessionDeps};

fn env_u64(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(v) => v.trim().parse().unwrap_or_else(|_| {
            warn!("{}='{}' is not a number; using {}", name, v, default);
            default
        }),
        Err(_) => default,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    let state_file = std::env::var("PORTAL_SESSION_STATE_FILE").unwrap_or_else(|_| ".portal_session.json".to_string());
    let email = std::env::var("PORTAL_DEMO_EMAIL").unwrap_or_else(|_| "agent@portal.local".to_string());
    let password = std::env::var("PORTAL_DEMO_PASSWORD").unwrap_or_else(|_| "changeme".to_string());
    let settings = SessionSettings {
        session_duration_hours: env_u64("PORTAL_SESSION_HOURS", 8),
        inactivity_timeout_minutes: env_u64("PORTAL_INACTIVITY_MINUTES", 30),
        warning_time_minutes: env_u64("PORTAL_WARNING_MINUTES", 5),
        auto_logout_enabled: std::env::var("PORTAL_AUTO_LOGOUT").map(|v| v != "false" && v != "0").unwrap_or(true),
    };
    let options = ControllerOptions::from_env();
    info!(
        target: "portal_session",
        "portal-session starting: RUST_LOG='{}', state_file='{}', settings={:?}, options={:?}",
        rust_log, state_file, settings, options
    );

    let identity = Arc::new(InMemoryIdentity::new());
    let user = identity.add_account(&email, &password);
    let profiles = Arc::new(InMemoryProfiles::new());
    profiles.insert(Profile {
        user_id: user.id.clone(),
        full_name: Some("Demo Agent".to_string()),
        email: Some(email.clone()),
        role: "agent".to_string(),
        last_login_at: None,
    });

    let ctrl = SessionController::new(
        SessionDeps {
            identity,
            profiles,
            settings: Arc::new(StaticSettings::new(settings)),
            kv: Arc::new(FileKv::open(&state_file)?),
            ui: Arc::new(TracingUi),
            clock: Arc::new(SystemClock),
        },
        options,
    )?;
    ctrl.initialize().await;
    info!("commands: login <email> <password> | activity | logout | status | profile | settings | quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("login") => {
                let (Some(e), Some(p)) = (parts.next(), parts.next()) else {
                    warn!("usage: login <email> <password>");
                    continue;
                };
                match ctrl.sign_in(e, p).await {
                    Ok(u) => info!(user_id = %u.id, "signed in"),
                    Err(err) => warn!(code = err.code_str(), "{}", err.user_message()),
                }
            }
            Some("activity") => ctrl.record_activity(),
            Some("logout") => ctrl.sign_out().await,
            Some("status") => info!(
                phase = ?ctrl.phase(),
                user = ?ctrl.current_user().map(|u| u.id),
                started_at = ?ctrl.session_started_at(),
                inactivity_armed = ctrl.inactivity_armed(),
                "status"
            ),
            Some("profile") => {
                ctrl.refresh_profile().await;
                info!(profile = ?ctrl.profile(), "profile");
            }
            Some("settings") => {
                let ok = ctrl.refresh_settings().await;
                info!(refreshed = ok, config = ?ctrl.config(), "settings");
            }
            Some("quit") | Some("exit") => break,
            Some(other) => warn!("unknown command '{}'", other),
            None => {}
        }
    }

    ctrl.shutdown();
    Ok(())
}
