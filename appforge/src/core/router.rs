//! Routing decisions between agent steps.

use crate::core::state::NetworkState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Invoke the agent again.
    Continue,
    /// Stop the network and return the current state.
    Halt,
}

/// Decides, from shared state alone, whether the network keeps going.
pub trait Router: Send + Sync {
    fn route(&self, state: &NetworkState) -> Route;
}

/// Halts once a task summary exists; otherwise re-selects the sole agent.
#[derive(Debug, Default, Clone, Copy)]
pub struct SummaryRouter;

impl Router for SummaryRouter {
    fn route(&self, state: &NetworkState) -> Route {
        if state.has_summary() {
            Route::Halt
        } else {
            Route::Continue
        }
    }
}

/// Apply `router`, with a non-empty summary forcing [`Route::Halt`] whatever it says.
pub fn next_route<R: Router + ?Sized>(router: &R, state: &NetworkState) -> Route {
    if state.has_summary() {
        return Route::Halt;
    }
    router.route(state)
}
