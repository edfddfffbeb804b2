//! relock-core - application re-authentication gate
//!
//! Decides, each time the application comes back to the foreground, whether
//! the user must pass a strong-authentication check before touching
//! protected content, and drives that check to a grant or a fail-closed deny.
//!
//! # Module layout
//! - `platform`        - traits for the host: tokens, capability, surfaces, authenticator
//! - `preferences`     - durable boolean key-value store (file and memory)
//! - `policy`          - the persisted "lock enabled" bit
//! - `tracker`         - foreground surface counting
//! - `machine`         - explicit phase enum and pure transition function
//! - `gate`            - `LockGate` and its `GateDriver`
//! - `secure_storage`  - session token in the OS keyring
//! - `settings`        - gate configuration
//! - `storage`         - settings persistence
//! - `paths`           - data directory resolution
//! - `error`           - unified error type

pub mod error;
pub mod gate;
pub mod machine;
pub mod paths;
pub mod platform;
pub mod policy;
pub mod preferences;
pub mod secure_storage;
pub mod settings;
pub mod storage;
pub mod tracker;

pub use error::{GateError, Result};
pub use gate::{Collaborators, GateDriver, LockGate, OnUnlocked};
pub use machine::Phase;
