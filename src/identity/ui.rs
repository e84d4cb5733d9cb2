use tracing::info;

use super::lifecycle::Notice;

/// Presentation surface the controller drives: toasts and the login redirect.
/// Both calls must return promptly; they run on the controller's tasks.
pub trait SessionUi: Send + Sync {
    fn notify(&self, notice: &Notice);
    fn redirect_to_login(&self);
}

/// Headless surface that only logs; used by the driver binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingUi;

impl SessionUi for TracingUi {
    fn notify(&self, notice: &Notice) {
        info!(target: "portal_session::ui", notice = ?notice, "{}", notice.message());
    }

    fn redirect_to_login(&self) {
        info!(target: "portal_session::ui", "redirect -> /login");
    }
}
