pub mod error;
pub mod clock;
pub mod config;
pub mod settings;
pub mod storage;
pub mod identity;

pub use error::{AppError, AppResult};
pub use identity::{SessionController, SessionDeps};
