//! Identity-facing side of the portal: who is signed in, how that session
//! ends, and what the user is told about it.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod provider;
mod lifecycle;
mod ui;
mod session;
pub mod memory;

pub use principal::{AuthSession, Profile, User};
pub use provider::{AuthChange, AuthEvent, IdentityBackend, ProfileStore};
pub use lifecycle::{Notice, Phase, SessionSnapshot, SignOutReason};
pub use ui::{SessionUi, TracingUi};
pub use session::{SessionController, SessionDeps};
