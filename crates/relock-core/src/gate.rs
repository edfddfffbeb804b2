//! The re-authentication gate.
//!
//! One `LockGate` is built at process start and shared by `Arc` with every
//! call site. Lifecycle callbacks and explicit checks run synchronously and
//! never block on the authenticator; prompt results come back through a
//! channel drained by the single [`GateDriver`], which is where every
//! authentication transition is applied.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::machine::{transition, Effect, Input, Phase};
use crate::platform::{
    AuthEvent, AuthSink, Authenticator, CapabilityProbe, LifecycleObserver, ProcessHandle,
    PromptHandle, PromptKind, PromptRequest, SessionTokenProvider, Surface,
};
use crate::policy::LockPolicyStore;
use crate::preferences::PreferenceStore;
use crate::settings::GateSettings;
use crate::tracker::ForegroundTracker;

pub type OnUnlocked = Box<dyn FnOnce() + Send + 'static>;

/// Everything the gate consumes from the host.
pub struct Collaborators {
    pub prefs: Arc<dyn PreferenceStore>,
    pub capability: Arc<dyn CapabilityProbe>,
    pub tokens: Arc<dyn SessionTokenProvider>,
    pub authenticator: Arc<dyn Authenticator>,
}

#[derive(Debug)]
struct Delivery {
    cycle: u64,
    kind: PromptKind,
    event: AuthEvent,
}

struct ChannelSink {
    cycle: u64,
    kind: PromptKind,
    tx: mpsc::UnboundedSender<Delivery>,
}

impl AuthSink for ChannelSink {
    fn deliver(&self, event: AuthEvent) {
        let delivery = Delivery {
            cycle: self.cycle,
            kind: self.kind,
            event,
        };
        if self.tx.send(delivery).is_err() {
            debug!(cycle = self.cycle, "gate dropped; discarding auth event");
        }
    }
}

/// One prompt cycle, from acquiring the in-flight token to grant or deny.
struct Cycle {
    id: u64,
    surface: Arc<dyn Surface>,
    on_unlocked: Option<OnUnlocked>,
    primary: Option<Box<dyn PromptHandle>>,
    fallback: Option<Box<dyn PromptHandle>>,
}

impl Cycle {
    fn take_handle(&mut self, kind: PromptKind) -> Option<Box<dyn PromptHandle>> {
        match kind {
            PromptKind::Primary => self.primary.take(),
            PromptKind::Fallback => self.fallback.take(),
        }
    }
}

struct MachineState {
    phase: Phase,
    cycle: Option<Cycle>,
    next_cycle: u64,
}

/// Side effects collected under the machine lock and run after it is released.
enum Work {
    Start {
        kind: PromptKind,
        cycle: u64,
        surface: Arc<dyn Surface>,
    },
    Cancel(Box<dyn PromptHandle>),
    Notify(Arc<dyn Surface>),
    Grant(Option<OnUnlocked>),
    Deny(Option<Arc<dyn Surface>>),
}

pub struct LockGate {
    settings: GateSettings,
    policy: LockPolicyStore,
    tokens: Arc<dyn SessionTokenProvider>,
    authenticator: Arc<dyn Authenticator>,
    tracker: ForegroundTracker,
    needs_unlock: AtomicBool,
    prompt_in_flight: AtomicBool,
    initialized: AtomicBool,
    machine: Mutex<MachineState>,
    events: mpsc::UnboundedSender<Delivery>,
}

impl LockGate {
    pub fn new(settings: GateSettings, parts: Collaborators) -> Result<(Arc<Self>, GateDriver)> {
        settings.validate()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let gate = Arc::new(Self {
            settings,
            policy: LockPolicyStore::new(parts.prefs, parts.capability),
            tokens: parts.tokens,
            authenticator: parts.authenticator,
            tracker: ForegroundTracker::new(),
            needs_unlock: AtomicBool::new(false),
            prompt_in_flight: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            machine: Mutex::new(MachineState {
                phase: Phase::Idle,
                cycle: None,
                next_cycle: 1,
            }),
            events: tx,
        });
        let driver = GateDriver {
            gate: Arc::downgrade(&gate),
            rx,
        };
        Ok((gate, driver))
    }

    /// Registers the gate for lifecycle notifications. Only the first call
    /// takes effect; returns whether this call registered.
    pub fn init(self: &Arc<Self>, process: &dyn ProcessHandle) -> bool {
        if self
            .initialized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        process.register(self.clone());
        info!("lock gate registered for lifecycle notifications");
        true
    }

    // ── policy surface ──────────────────────────────────────────────────────

    pub fn is_lock_enabled(&self) -> bool {
        self.policy.is_enabled()
    }

    pub fn should_show_settings_toggle(&self) -> bool {
        self.policy.should_offer_toggle()
    }

    /// Stores `want && capability available`. When the stored value is
    /// `false` the unlock requirement and any in-flight token are cleared.
    pub fn set_lock_enabled(&self, want: bool) -> Result<bool> {
        let effective = self.policy.set_enabled(want)?;
        info!(requested = want, effective, "lock policy updated");
        if !effective {
            self.disarm();
        }
        Ok(effective)
    }

    /// Policy enabled, capability available and a session token present.
    /// Resets the policy when it is enabled but the capability went away.
    pub fn is_session_protected(&self) -> bool {
        if !self.policy.is_enabled() {
            return false;
        }
        if !self.policy.capability_available() {
            warn!("strong authentication no longer available; disabling lock");
            if let Err(err) = self.policy.set_enabled(false) {
                warn!(error = %err, "failed to persist lock reset");
            }
            self.disarm();
            return false;
        }
        self.tokens.has_token()
    }

    // ── gate ────────────────────────────────────────────────────────────────

    /// Explicit re-check for screens about to show sensitive content.
    /// `on_unlocked` runs once the session is unlocked; it is dropped
    /// without running if another check already owns the prompt.
    pub fn authenticate_if_needed(&self, surface: Arc<dyn Surface>, on_unlocked: Option<OnUnlocked>) {
        self.evaluate(surface, on_unlocked);
    }

    fn evaluate(&self, surface: Arc<dyn Surface>, on_unlocked: Option<OnUnlocked>) {
        if !surface.can_host_prompt() {
            run_continuation(on_unlocked);
            return;
        }

        if !self.is_session_protected() {
            self.needs_unlock.store(false, Ordering::SeqCst);
            self.apply(Input::Disarmed);
            run_continuation(on_unlocked);
            return;
        }

        if !self.needs_unlock.load(Ordering::SeqCst) {
            run_continuation(on_unlocked);
            return;
        }

        if self
            .prompt_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(surface = %surface.id(), "prompt already in flight");
            return;
        }

        self.begin_cycle(surface, on_unlocked);
    }

    fn begin_cycle(&self, surface: Arc<dyn Surface>, on_unlocked: Option<OnUnlocked>) {
        let work = {
            let mut machine = self.machine.lock();
            if machine.phase.prompt_in_flight() {
                warn!(phase = ?machine.phase, "in-flight token acquired while a prompt is active");
                return;
            }
            let id = machine.next_cycle;
            machine.next_cycle += 1;
            debug!(cycle = id, surface = %surface.id(), "starting unlock cycle");
            machine.cycle = Some(Cycle {
                id,
                surface,
                on_unlocked,
                primary: None,
                fallback: None,
            });
            self.step(&mut machine, Input::PromptGranted)
        };
        self.perform(work);
    }

    fn disarm(&self) {
        self.needs_unlock.store(false, Ordering::SeqCst);
        self.prompt_in_flight.store(false, Ordering::SeqCst);
        self.apply(Input::Disarmed);
    }

    fn on_delivery(&self, delivery: Delivery) {
        let work = {
            let mut machine = self.machine.lock();
            let current = machine.cycle.as_ref().map(|c| c.id);
            if current != Some(delivery.cycle) {
                debug!(
                    cycle = delivery.cycle,
                    kind = ?delivery.kind,
                    event = ?delivery.event,
                    "discarding event from finished cycle"
                );
                return;
            }
            self.step(
                &mut machine,
                Input::Auth {
                    kind: delivery.kind,
                    event: delivery.event,
                },
            )
        };
        self.perform(work);
    }

    fn apply(&self, input: Input) {
        let work = {
            let mut machine = self.machine.lock();
            self.step(&mut machine, input)
        };
        self.perform(work);
    }

    fn step(&self, machine: &mut MachineState, input: Input) -> Vec<Work> {
        let from = machine.phase;
        let step = transition(from, input, self.settings.failed_attempt_threshold);
        if from != step.next {
            debug!(?from, to = ?step.next, ?input, "gate transition");
        }
        machine.phase = step.next;

        let mut work = Vec::with_capacity(step.effects.len());
        for effect in step.effects {
            match effect {
                Effect::StartPrimary | Effect::StartFallback => {
                    let kind = if effect == Effect::StartPrimary {
                        PromptKind::Primary
                    } else {
                        info!("escalating to device credential");
                        PromptKind::Fallback
                    };
                    if let Some(cycle) = machine.cycle.as_ref() {
                        work.push(Work::Start {
                            kind,
                            cycle: cycle.id,
                            surface: cycle.surface.clone(),
                        });
                    }
                }
                Effect::Cancel(kind) => {
                    if let Some(handle) = machine.cycle.as_mut().and_then(|c| c.take_handle(kind)) {
                        work.push(Work::Cancel(handle));
                    }
                }
                Effect::VerifyIdentity => {
                    if let Some(cycle) = machine.cycle.as_ref() {
                        work.push(Work::Notify(cycle.surface.clone()));
                    }
                }
                Effect::Grant => {
                    let cycle = machine.cycle.take();
                    work.push(Work::Grant(cycle.and_then(|c| c.on_unlocked)));
                }
                Effect::Deny => {
                    let cycle = machine.cycle.take();
                    work.push(Work::Deny(cycle.map(|c| c.surface)));
                }
            }
        }

        if machine.phase == Phase::Unlocked {
            machine.phase = Phase::Idle;
        }
        work
    }

    fn perform(&self, work: Vec<Work>) {
        for item in work {
            match item {
                Work::Start {
                    kind,
                    cycle,
                    surface,
                } => self.start_prompt(kind, cycle, surface),
                Work::Cancel(handle) => handle.cancel(),
                Work::Notify(surface) => {
                    surface.show_verify_identity(&self.settings.prompt.verify_identity_message)
                }
                Work::Grant(on_unlocked) => {
                    self.needs_unlock.store(false, Ordering::SeqCst);
                    self.prompt_in_flight.store(false, Ordering::SeqCst);
                    info!("session unlocked");
                    run_continuation(on_unlocked);
                }
                Work::Deny(surface) => {
                    self.needs_unlock.store(true, Ordering::SeqCst);
                    self.prompt_in_flight.store(false, Ordering::SeqCst);
                    warn!("authentication failed; denying foreground access");
                    if let Some(surface) = surface {
                        surface.show_verify_identity(&self.settings.prompt.verify_identity_message);
                        surface.move_to_background();
                    }
                }
            }
        }
    }

    fn start_prompt(&self, kind: PromptKind, cycle: u64, surface: Arc<dyn Surface>) {
        let request = self.prompt_request(kind);
        let sink = Arc::new(ChannelSink {
            cycle,
            kind,
            tx: self.events.clone(),
        });
        let handle = self.authenticator.authenticate(surface, request, sink);

        let leftover = {
            let mut machine = self.machine.lock();
            let expected = match kind {
                PromptKind::Primary => matches!(machine.phase, Phase::PromptActive { .. }),
                PromptKind::Fallback => machine.phase == Phase::FallbackActive,
            };
            match machine.cycle.as_mut() {
                Some(current) if current.id == cycle && expected => {
                    match kind {
                        PromptKind::Primary => current.primary = Some(handle),
                        PromptKind::Fallback => current.fallback = Some(handle),
                    }
                    None
                }
                _ => Some(handle),
            }
        };
        if let Some(handle) = leftover {
            debug!(cycle, ?kind, "prompt outlived its cycle; cancelling");
            handle.cancel();
        }
    }

    fn prompt_request(&self, kind: PromptKind) -> PromptRequest {
        let text = &self.settings.prompt;
        match kind {
            PromptKind::Primary => PromptRequest {
                kind,
                title: text.title.clone(),
                subtitle: text.subtitle.clone(),
                cancel_label: Some(text.cancel_label.clone()),
                allow_device_credential: false,
            },
            PromptKind::Fallback => PromptRequest {
                kind,
                title: text.title.clone(),
                subtitle: text.fallback_subtitle.clone(),
                cancel_label: None,
                allow_device_credential: true,
            },
        }
    }

    // ── introspection ───────────────────────────────────────────────────────

    pub fn needs_unlock(&self) -> bool {
        self.needs_unlock.load(Ordering::SeqCst)
    }

    pub fn prompt_in_flight(&self) -> bool {
        self.prompt_in_flight.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> Phase {
        self.machine.lock().phase
    }

    pub fn foreground_count(&self) -> usize {
        self.tracker.count()
    }

    pub fn settings(&self) -> &GateSettings {
        &self.settings
    }
}

impl LifecycleObserver for LockGate {
    fn on_surface_started(&self, surface: &Arc<dyn Surface>) {
        let count = self.tracker.surface_started();
        debug!(surface = %surface.id(), count, "surface started");
    }

    fn on_surface_resumed(&self, surface: &Arc<dyn Surface>) {
        self.evaluate(surface.clone(), None);
    }

    fn on_surface_stopped(&self, surface: &Arc<dyn Surface>, transient: bool) {
        // Protection is checked after the tracker lock is released: the
        // self-heal path may run continuations that re-enter the gate.
        let backgrounded = self.tracker.surface_stopped(transient);
        let armed = backgrounded && self.is_session_protected();
        debug!(surface = %surface.id(), transient, armed, "surface stopped");
        if armed {
            self.needs_unlock.store(true, Ordering::SeqCst);
            self.apply(Input::Armed);
        }
    }
}

fn run_continuation(on_unlocked: Option<OnUnlocked>) {
    if let Some(f) = on_unlocked {
        f();
    }
}

/// Applies authentication results to the gate, one at a time.
pub struct GateDriver {
    gate: Weak<LockGate>,
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl GateDriver {
    /// Runs until the gate is dropped.
    pub async fn run(mut self) {
        while let Some(delivery) = self.rx.recv().await {
            match self.gate.upgrade() {
                Some(gate) => gate.on_delivery(delivery),
                None => break,
            }
        }
        debug!("gate driver stopped");
    }

    /// Applies every event queued so far and returns how many were applied.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(delivery) = self.rx.try_recv() {
            let Some(gate) = self.gate.upgrade() else {
                break;
            };
            gate.on_delivery(delivery);
            applied += 1;
        }
        applied
    }
}
