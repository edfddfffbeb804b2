//! Scripted lifecycle replay.
//!
//! Builds a gate over in-memory collaborators and feeds it the steps of a
//! JSON script, recording the gate's state after each one.

use anyhow::{bail, Result};
use parking_lot::Mutex;
use relock_core::platform::{
    AuthError, AuthEvent, AuthSink, Authenticator, CapabilityProbe, LifecycleObserver,
    PromptHandle, PromptKind, PromptRequest, SessionTokenProvider, Surface, SurfaceId,
};
use relock_core::preferences::MemoryPreferences;
use relock_core::settings::GateSettings;
use relock_core::{Collaborators, LockGate, Phase};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

fn yes() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub lock_enabled: bool,
    #[serde(default = "yes")]
    pub capability: bool,
    #[serde(default = "yes")]
    pub token: bool,
    pub steps: Vec<ScriptStep>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ScriptStep {
    Start {
        surface: u64,
    },
    Resume {
        surface: u64,
    },
    Stop {
        surface: u64,
        #[serde(default)]
        transient: bool,
    },
    /// Explicit `authenticate_if_needed` with a continuation.
    Check {
        surface: u64,
    },
    /// Deliver a result to the n-th prompt issued so far.
    Auth {
        prompt: usize,
        event: ScriptEvent,
    },
    Capability {
        available: bool,
    },
    Token {
        present: bool,
    },
    SetLock {
        enabled: bool,
    },
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptEvent {
    Succeeded,
    Failed,
    Cancelled,
    UserCancelled,
    NegativeButton,
    Lockout,
    Hardware,
}

impl From<ScriptEvent> for AuthEvent {
    fn from(event: ScriptEvent) -> Self {
        match event {
            ScriptEvent::Succeeded => AuthEvent::Succeeded,
            ScriptEvent::Failed => AuthEvent::FailedAttempt,
            ScriptEvent::Cancelled => AuthEvent::Error(AuthError::Cancelled),
            ScriptEvent::UserCancelled => AuthEvent::Error(AuthError::UserCancelled),
            ScriptEvent::NegativeButton => AuthEvent::Error(AuthError::NegativeButton),
            ScriptEvent::Lockout => AuthEvent::Error(AuthError::Lockout),
            ScriptEvent::Hardware => AuthEvent::Error(AuthError::Hardware),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    pub index: usize,
    pub step: ScriptStep,
    pub phase: Phase,
    pub needs_unlock: bool,
    pub prompt_in_flight: bool,
    pub foreground: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptRecord {
    pub kind: PromptKind,
    pub surface: SurfaceId,
    pub subtitle: String,
    pub cancelled: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub steps: Vec<StepReport>,
    pub prompts: Vec<PromptRecord>,
    pub unlocked: usize,
    pub notices: usize,
    pub backgrounded: usize,
    pub lock_enabled: bool,
}

struct Switch(AtomicBool);

impl CapabilityProbe for Switch {
    fn available(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl SessionTokenProvider for Switch {
    fn has_token(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct Tally {
    notices: AtomicUsize,
    backgrounded: AtomicUsize,
    unlocked: AtomicUsize,
}

struct ConsoleSurface {
    id: SurfaceId,
    tally: Arc<Tally>,
}

impl Surface for ConsoleSurface {
    fn id(&self) -> SurfaceId {
        self.id
    }

    fn can_host_prompt(&self) -> bool {
        true
    }

    fn show_verify_identity(&self, message: &str) {
        info!(surface = %self.id, message, "verify identity");
        self.tally.notices.fetch_add(1, Ordering::SeqCst);
    }

    fn move_to_background(&self) {
        info!(surface = %self.id, "moved to background");
        self.tally.backgrounded.fetch_add(1, Ordering::SeqCst);
    }
}

struct Issued {
    kind: PromptKind,
    surface: SurfaceId,
    subtitle: String,
    sink: Arc<dyn AuthSink>,
    cancelled: Arc<AtomicBool>,
}

struct ScriptedHandle {
    sink: Arc<dyn AuthSink>,
    cancelled: Arc<AtomicBool>,
}

impl PromptHandle for ScriptedHandle {
    fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            self.sink.deliver(AuthEvent::Error(AuthError::Cancelled));
        }
    }
}

#[derive(Default)]
struct ScriptedAuthenticator {
    issued: Mutex<Vec<Issued>>,
}

impl Authenticator for ScriptedAuthenticator {
    fn authenticate(
        &self,
        surface: Arc<dyn Surface>,
        request: PromptRequest,
        sink: Arc<dyn AuthSink>,
    ) -> Box<dyn PromptHandle> {
        info!(surface = %surface.id(), kind = ?request.kind, "prompt issued");
        let cancelled = Arc::new(AtomicBool::new(false));
        self.issued.lock().push(Issued {
            kind: request.kind,
            surface: surface.id(),
            subtitle: request.subtitle,
            sink: sink.clone(),
            cancelled: cancelled.clone(),
        });
        Box::new(ScriptedHandle { sink, cancelled })
    }
}

pub fn run(settings: GateSettings, script: Script) -> Result<Report> {
    let capability = Arc::new(Switch(AtomicBool::new(script.capability)));
    let token = Arc::new(Switch(AtomicBool::new(script.token)));
    let auth = Arc::new(ScriptedAuthenticator::default());
    let tally = Arc::new(Tally::default());

    let (gate, mut driver) = LockGate::new(
        settings,
        Collaborators {
            prefs: Arc::new(MemoryPreferences::new()),
            capability: capability.clone(),
            tokens: token.clone(),
            authenticator: auth.clone(),
        },
    )?;
    if script.lock_enabled {
        gate.set_lock_enabled(true)?;
    }

    let mut surfaces: HashMap<u64, Arc<dyn Surface>> = HashMap::new();
    let mut surface = |id: u64| -> Arc<dyn Surface> {
        surfaces
            .entry(id)
            .or_insert_with(|| {
                Arc::new(ConsoleSurface {
                    id: SurfaceId(id),
                    tally: tally.clone(),
                })
            })
            .clone()
    };

    let mut steps = Vec::with_capacity(script.steps.len());
    for (index, step) in script.steps.into_iter().enumerate() {
        match &step {
            ScriptStep::Start { surface: id } => gate.on_surface_started(&surface(*id)),
            ScriptStep::Resume { surface: id } => gate.on_surface_resumed(&surface(*id)),
            ScriptStep::Stop {
                surface: id,
                transient,
            } => gate.on_surface_stopped(&surface(*id), *transient),
            ScriptStep::Check { surface: id } => {
                let tally = tally.clone();
                gate.authenticate_if_needed(
                    surface(*id),
                    Some(Box::new(move || {
                        tally.unlocked.fetch_add(1, Ordering::SeqCst);
                    })),
                );
            }
            ScriptStep::Auth { prompt, event } => {
                let sink = match auth.issued.lock().get(*prompt) {
                    Some(issued) => issued.sink.clone(),
                    None => bail!("step {index}: prompt {prompt} was never issued"),
                };
                sink.deliver((*event).into());
            }
            ScriptStep::Capability { available } => {
                capability.0.store(*available, Ordering::SeqCst)
            }
            ScriptStep::Token { present } => token.0.store(*present, Ordering::SeqCst),
            ScriptStep::SetLock { enabled } => {
                gate.set_lock_enabled(*enabled)?;
            }
        }
        driver.pump();
        steps.push(StepReport {
            index,
            step,
            phase: gate.phase(),
            needs_unlock: gate.needs_unlock(),
            prompt_in_flight: gate.prompt_in_flight(),
            foreground: gate.foreground_count(),
        });
    }

    let prompts = auth
        .issued
        .lock()
        .iter()
        .map(|p| PromptRecord {
            kind: p.kind,
            surface: p.surface,
            subtitle: p.subtitle.clone(),
            cancelled: p.cancelled.load(Ordering::SeqCst),
        })
        .collect();

    Ok(Report {
        steps,
        prompts,
        unlocked: tally.unlocked.load(Ordering::SeqCst),
        notices: tally.notices.load(Ordering::SeqCst),
        backgrounded: tally.backgrounded.load(Ordering::SeqCst),
        lock_enabled: gate.is_lock_enabled(),
    })
}
