//! Lifecycle of the supervised child.

use std::fmt;

use serde::Serialize;

/// Where the supervisor is in the lifecycle of its (single) child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ChildState {
    Idle,
    Starting,
    Running,
    /// SIGINT sent, waiting for the child to exit on its own.
    StoppingGraceful,
    /// SIGTERM sent.
    StoppingForced,
    Killed,
    Exited,
}

impl ChildState {
    /// Check whether `from -> to` is an edge in the lifecycle graph:
    ///
    /// ```text
    /// idle              -> starting
    /// starting          -> running
    /// starting          -> idle      (launch failed)
    /// running           -> stopping_graceful
    /// running           -> exited    (already gone when stop began)
    /// stopping_graceful -> stopping_forced
    /// stopping_graceful -> exited
    /// stopping_forced   -> killed
    /// stopping_forced   -> exited
    /// killed            -> idle
    /// exited            -> idle
    /// ```
    pub fn is_valid_transition(from: ChildState, to: ChildState) -> bool {
        use ChildState::*;
        matches!(
            (from, to),
            (Idle, Starting)
                | (Starting, Running)
                | (Starting, Idle)
                | (Running, StoppingGraceful)
                | (Running, Exited)
                | (StoppingGraceful, StoppingForced)
                | (StoppingGraceful, Exited)
                | (StoppingForced, Killed)
                | (StoppingForced, Exited)
                | (Killed, Idle)
                | (Exited, Idle)
        )
    }
}

impl fmt::Display for ChildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChildState::Idle => "idle",
            ChildState::Starting => "starting",
            ChildState::Running => "running",
            ChildState::StoppingGraceful => "stopping_graceful",
            ChildState::StoppingForced => "stopping_forced",
            ChildState::Killed => "killed",
            ChildState::Exited => "exited",
        };
        f.write_str(s)
    }
}
