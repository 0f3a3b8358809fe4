//! Quiescence of virtual CPU execution contexts across host power transitions.

use alloc::format;
use alloc::sync::Arc;
use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use axerrno::{ax_err, AxResult};
use log::{debug, info};
use spin::Mutex;

use crate::hierarchy::DeviceHierarchy;
use crate::AxVmmBackend;

/// The barrier every virtual CPU execution context parks on during a host suspend.
///
/// `suspend_requested` and `acknowledged` are the only state shared without a lock.
/// `acknowledged` only grows while a suspend is requested and only shrinks after it is
/// cleared.
#[derive(Debug, Default)]
pub struct SuspendBarrier {
    suspend_requested: AtomicBool,
    acknowledged: AtomicUsize,
}

impl SuspendBarrier {
    /// Creates a barrier with no suspend requested.
    pub const fn new() -> Self {
        Self {
            suspend_requested: AtomicBool::new(false),
            acknowledged: AtomicUsize::new(0),
        }
    }

    /// Whether a suspend is currently requested.
    pub fn is_suspend_requested(&self) -> bool {
        self.suspend_requested.load(Ordering::Acquire)
    }

    /// The number of execution contexts currently parked.
    pub fn acknowledged(&self) -> usize {
        self.acknowledged.load(Ordering::Acquire)
    }

    /// Requests a suspend, lets `sweep` signal the execution contexts, and spins until
    /// every signaled context has parked. Returns the number of signaled contexts.
    ///
    /// `sweep` receives the barrier to mint [`ParkToken`]s from and returns how many of
    /// them were delivered. Contexts still draining from a previous cycle are waited for
    /// before the new request is raised.
    pub(crate) fn signal_and_wait_all<F>(self: &Arc<Self>, sweep: F) -> usize
    where
        F: FnOnce(&Arc<Self>) -> usize,
    {
        while self.acknowledged.load(Ordering::Acquire) != 0 {
            spin_loop();
        }
        self.suspend_requested.store(true, Ordering::Release);

        let signaled = sweep(self);
        while self.acknowledged.load(Ordering::Acquire) < signaled {
            spin_loop();
        }
        debug_assert_eq!(self.acknowledged(), signaled);
        signaled
    }

    /// Parks the calling execution context until [`SuspendBarrier::release_all`].
    pub(crate) fn park_self(&self) {
        self.acknowledged.fetch_add(1, Ordering::AcqRel);
        while self.suspend_requested.load(Ordering::Acquire) {
            spin_loop();
        }
        self.acknowledged.fetch_sub(1, Ordering::AcqRel);
    }

    /// Clears the suspend request, releasing every parked context. Idempotent.
    pub fn release_all(&self) {
        self.suspend_requested.store(false, Ordering::Release);
    }
}

/// A request for one execution context to park, minted during a suspend sweep.
///
/// The context that accepts the token must call [`ParkToken::park`] at its next safe point.
#[must_use = "an accepted park token must be parked, or the suspend never completes"]
#[derive(Debug)]
pub struct ParkToken {
    barrier: Arc<SuspendBarrier>,
}

impl ParkToken {
    pub(crate) fn new(barrier: &Arc<SuspendBarrier>) -> Self {
        Self {
            barrier: barrier.clone(),
        }
    }

    /// Acknowledges the suspend and spins until the host resumes.
    pub fn park(self) {
        self.barrier.park_self();
    }
}

/// The state of the quiescence state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerState {
    /// Execution contexts run freely.
    Running,
    /// Execution contexts are being signaled and awaited.
    Suspending,
    /// Every signaled context is parked and the backend is suspended.
    Suspended,
    /// The backend is being resumed.
    Resuming,
}

/// A host power-transition event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerEvent {
    /// The host is about to enter suspend.
    EnterSuspend,
    /// The host has resumed from suspend.
    Resume,
}

/// Drives the `Running -> Suspending -> Suspended -> Resuming -> Running` cycle.
///
/// `transition` serializes power events for their whole duration, while `state` is only
/// locked to read or store the current state, so an execution context may query it
/// on its way to the park point.
pub struct QuiescenceCoordinator {
    transition: Mutex<()>,
    state: Mutex<PowerState>,
    barrier: Arc<SuspendBarrier>,
}

impl Default for QuiescenceCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl QuiescenceCoordinator {
    /// Creates a coordinator in [`PowerState::Running`].
    pub fn new() -> Self {
        Self {
            transition: Mutex::new(()),
            state: Mutex::new(PowerState::Running),
            barrier: Arc::new(SuspendBarrier::new()),
        }
    }

    /// The current power state.
    pub fn state(&self) -> PowerState {
        *self.state.lock()
    }

    fn set_state(&self, state: PowerState) {
        *self.state.lock() = state;
    }

    /// The barrier shared with the execution contexts.
    pub fn barrier(&self) -> &Arc<SuspendBarrier> {
        &self.barrier
    }

    /// Handles one power event. Events are processed one at a time.
    ///
    /// `EnterSuspend` outside `Running` fails with `BadState` and changes nothing;
    /// `Resume` while `Running` is a no-op.
    pub fn handle_event<B: AxVmmBackend>(
        &self,
        event: PowerEvent,
        hierarchy: &DeviceHierarchy<B>,
        backend: &B,
    ) -> AxResult {
        let _transition = self.transition.lock();
        match (event, self.state()) {
            (PowerEvent::EnterSuspend, PowerState::Running) => {
                self.set_state(PowerState::Suspending);
                let parked = self.quiesce(hierarchy, backend);
                backend.suspend();
                self.set_state(PowerState::Suspended);
                info!("suspended with {} vcpu context(s) parked", parked);
                Ok(())
            }
            (PowerEvent::Resume, PowerState::Suspended) => {
                self.set_state(PowerState::Resuming);
                backend.resume();
                self.barrier.release_all();
                hierarchy.thaw();
                self.set_state(PowerState::Running);
                info!("resumed");
                Ok(())
            }
            (PowerEvent::Resume, PowerState::Running) => {
                self.barrier.release_all();
                Ok(())
            }
            (event, current) => ax_err!(
                BadState,
                format!("power event {:?} is not valid in state {:?}", event, current)
            ),
        }
    }

    /// Signals every virtual CPU to park and waits until all signaled contexts have.
    fn quiesce<B: AxVmmBackend>(&self, hierarchy: &DeviceHierarchy<B>, backend: &B) -> usize {
        self.barrier.signal_and_wait_all(|barrier| {
            hierarchy.freeze_and_sweep(|identity, vcpu| {
                match backend.deliver_park(vcpu, ParkToken::new(barrier)) {
                    Ok(()) => true,
                    Err(_token) => {
                        debug!("{:?} has no execution context to park", identity);
                        false
                    }
                }
            })
        })
    }
}
