//! Upgrade-listener arbitration on the development server.
//!
//! The dev server's upgrade event source always carries the hot-reload
//! listener. Each time the app is (re)mounted the arbiter runs one cycle:
//!
//! 1. **Clean**: drop every listener except the hot-reload one.
//! 2. **Install**: bind the user's capability to the server.
//! 3. **Patch**: re-add every other listener behind a wrapper that ignores
//!    events carrying the hot-reload sub-protocol.
//!
//! The hot-reload listener is never removed, so it stays first in line.
//! Listener errors propagate to the caller untouched.

use crate::error::ListenerError;
use crate::upgrade::handshake::offered_protocols;
use crate::upgrade::{ListenerRegistry, ProcessServer, UpgradeCapability, UpgradeListener, listener};
use tracing::debug;

/// Name of the hot-reload subsystem's upgrade listener.
pub const HMR_LISTENER_NAME: &str = "hmrServerWsListener";

/// Sub-protocol reserved for the hot-reload channel.
pub const HMR_PROTOCOL: &str = "vite-hmr";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterState {
    Idle,
    Cleaned,
    UserInstalled,
    Patched,
}

impl ArbiterState {
    pub fn as_str(self) -> &'static str {
        match self {
            ArbiterState::Idle => "Idle",
            ArbiterState::Cleaned => "Cleaned",
            ArbiterState::UserInstalled => "UserInstalled",
            ArbiterState::Patched => "Patched",
        }
    }
}

/// Remove every listener not named [`HMR_LISTENER_NAME`]. Returns how many
/// were removed.
pub fn clean_upgrade_listeners(events: &ListenerRegistry) -> Result<usize, ListenerError> {
    let mut removed = 0;
    for entry in events.list() {
        if entry.name == HMR_LISTENER_NAME {
            continue;
        }
        events.remove(entry.id)?;
        removed += 1;
    }
    Ok(removed)
}

/// Wrap every listener not named [`HMR_LISTENER_NAME`] so it skips
/// hot-reload upgrades. Ids, names and order are preserved, so whoever
/// attached a listener can still find it. Returns how many were wrapped.
pub fn patch_upgrade_listeners(events: &ListenerRegistry) -> Result<usize, ListenerError> {
    let mut patched = 0;
    for entry in events.list() {
        if entry.name == HMR_LISTENER_NAME {
            continue;
        }
        events.replace(entry.id, skip_hot_reload)?;
        patched += 1;
    }
    Ok(patched)
}

fn skip_hot_reload(original: UpgradeListener) -> UpgradeListener {
    listener(move |request, socket| {
        if offered_protocols(request.headers()) == Some(HMR_PROTOCOL) {
            return;
        }
        original(request, socket);
    })
}

/// Drives Clean, Install and Patch on one dev server.
///
/// Not internally locked: cycles must run one after another.
#[derive(Debug)]
pub struct UpgradeArbiter {
    server: ProcessServer,
    state: ArbiterState,
}

impl UpgradeArbiter {
    pub fn new(server: ProcessServer) -> Self {
        Self {
            server,
            state: ArbiterState::Idle,
        }
    }

    pub fn state(&self) -> ArbiterState {
        self.state
    }

    pub fn server(&self) -> &ProcessServer {
        &self.server
    }

    fn require_state(&self, step: &'static str, allowed: &[ArbiterState]) -> Result<(), ListenerError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ListenerError::OutOfOrder {
                step,
                state: self.state.as_str(),
            })
        }
    }

    pub fn clean(&mut self) -> Result<usize, ListenerError> {
        self.require_state("clean", &[ArbiterState::Idle, ArbiterState::Patched])?;
        let removed = clean_upgrade_listeners(self.server.upgrade_events())?;
        self.state = ArbiterState::Cleaned;
        debug!(removed, "upgrade listeners cleaned");
        Ok(removed)
    }

    pub fn install(&mut self, capability: &UpgradeCapability) -> Result<(), ListenerError> {
        self.require_state("install", &[ArbiterState::Cleaned])?;
        capability.bind_server(self.server.clone());
        self.state = ArbiterState::UserInstalled;
        debug!(negotiator = capability.name(), "user upgrade capability installed");
        Ok(())
    }

    pub fn patch(&mut self) -> Result<usize, ListenerError> {
        self.require_state("patch", &[ArbiterState::UserInstalled])?;
        let patched = patch_upgrade_listeners(self.server.upgrade_events())?;
        self.state = ArbiterState::Patched;
        debug!(patched, "upgrade listeners patched");
        Ok(patched)
    }

    /// One full Clean, Install, Patch cycle, back to `Idle`.
    ///
    /// A failed step also returns to `Idle`, so the next cycle starts from
    /// Clean and reports its own errors.
    pub fn run_cycle(&mut self, capability: &UpgradeCapability) -> Result<(), ListenerError> {
        let result = self.cycle_steps(capability);
        self.state = ArbiterState::Idle;
        result
    }

    fn cycle_steps(&mut self, capability: &UpgradeCapability) -> Result<(), ListenerError> {
        self.clean()?;
        self.install(capability)?;
        self.patch()?;
        Ok(())
    }
}
