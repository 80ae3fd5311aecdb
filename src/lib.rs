/// Identity Core
///
/// Session and token lifecycle engine of an account identity service:
/// registration, login, refresh rotation with replay detection, credential
/// changes that invalidate sessions, and transactional outbox events.

pub mod account;
pub mod clock;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod events;
pub mod metrics;
pub mod policy;
pub mod token;

pub use account::{AccountManager, Initiator, RegisterParams};
pub use context::IdentityContext;
pub use error::{ErrorKind, IdentityError, IdentityResult};
pub use token::TokenPair;
