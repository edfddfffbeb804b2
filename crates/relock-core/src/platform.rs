//! Seams to the host platform.
//!
//! The gate never talks to a sensor, a keystore or a window system directly.
//! Everything it needs from the outside world is expressed by the traits in
//! this module so a host (mobile shell, desktop app, test harness) can plug
//! in its own implementations.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// "Is there a non-empty session token?" Absence is a valid state, not an error.
pub trait SessionTokenProvider: Send + Sync {
    fn has_token(&self) -> bool;
}

/// Whether the platform can currently perform strong authentication.
/// May change between calls, e.g. after the user removes an enrolled finger.
pub trait CapabilityProbe: Send + Sync {
    fn available(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceId(pub u64);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface-{}", self.0)
    }
}

/// An interactive screen of the host application.
pub trait Surface: Send + Sync {
    fn id(&self) -> SurfaceId;

    /// Only the main interactive contexts can show an authentication prompt.
    fn can_host_prompt(&self) -> bool;

    /// Short, non-blocking "verify identity" notice.
    fn show_verify_identity(&self, message: &str);

    /// Send the whole application to the background.
    fn move_to_background(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptKind {
    /// Biometric check.
    Primary,
    /// Device credential (PIN, pattern, password).
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptRequest {
    pub kind: PromptKind,
    pub title: String,
    pub subtitle: String,
    pub cancel_label: Option<String>,
    pub allow_device_credential: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// Cancelled by the system or by the caller through `PromptHandle::cancel`.
    Cancelled,
    UserCancelled,
    NegativeButton,
    Lockout,
    LockoutPermanent,
    Hardware,
    Timeout,
    Other(i32),
}

impl AuthError {
    pub fn is_cancellation(self) -> bool {
        matches!(
            self,
            AuthError::Cancelled | AuthError::UserCancelled | AuthError::NegativeButton
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    Succeeded,
    /// Wrong credential presented; the prompt stays up.
    FailedAttempt,
    Error(AuthError),
}

/// Delivery side of an in-flight prompt. Cheap to clone; may be called from
/// any thread, the gate applies the event on its driver.
pub trait AuthSink: Send + Sync {
    fn deliver(&self, event: AuthEvent);
}

pub trait PromptHandle: Send {
    fn cancel(&self);
}

/// Primary and secondary authentication capability.
pub trait Authenticator: Send + Sync {
    fn authenticate(
        &self,
        surface: Arc<dyn Surface>,
        request: PromptRequest,
        sink: Arc<dyn AuthSink>,
    ) -> Box<dyn PromptHandle>;
}

/// Receives lifecycle notifications for every surface of the process.
pub trait LifecycleObserver: Send + Sync {
    fn on_surface_started(&self, surface: &Arc<dyn Surface>);
    fn on_surface_resumed(&self, surface: &Arc<dyn Surface>);
    /// `transient` is true when the surface is torn down only to be
    /// recreated in place (configuration change).
    fn on_surface_stopped(&self, surface: &Arc<dyn Surface>, transient: bool);
}

pub trait ProcessHandle {
    fn register(&self, observer: Arc<dyn LifecycleObserver>);
}
