//! Session issuance, login throttling and the stores behind them.
//!
//! Layering, leaf first: [`kv::SharedStore`] provides atomic primitives;
//! [`counter::CounterStore`] and [`session::SessionStore`] build on it;
//! [`rate_limit::RateLimiter`] combines counters with lockout and the
//! per-identity login lock; [`service::AuthService`] orchestrates everything.

pub mod background;
pub mod counter;
pub mod error;
pub mod hasher;
pub mod kv;
pub mod rate_limit;
pub mod service;
pub mod session;
pub mod storage;
pub mod token;
pub mod user;

#[cfg(test)]
mod test_support;

pub use background::BackgroundTasks;
pub use error::AuthError;
pub use hasher::{Argon2Hasher, Hasher};
pub use kv::{MemoryStore, SharedStore, StoreError};
pub use rate_limit::RateLimitConfig;
pub use service::{AuthService, LoginInput, LoginOutput, RegisterInput, SessionConfig};
pub use session::Session;
pub use storage::PgUserRepository;
pub use token::TokenCodec;
pub use user::{CreateUserOutcome, NewUser, User, UserRepository, UserStatus};
