//! Experiment supervisor for the Raspberry Pi lab board.
//!
//! One [`supervisor::Supervisor`] owns at most one running experiment. The
//! console, the supervisor button and OS signals never touch it directly:
//! they send [`control::Request`]s into a channel drained by a single
//! controller task, so transitions never interleave.
//!
//! ```text
//! stdin ----> console::read_commands --+
//! GPIO 16 --> button::ButtonMonitor ---+--> mpsc<Request> --> control::run_controller
//! SIGINT ---> control::forward_signals-+                          |
//!                                                               Supervisor
//!                                                         start / stop / cycle
//!                                                                 |
//!                                                     Launcher -> ChildProcess
//!                                                     cleanup  -> pilab_hw::Hardware
//! ```

pub mod button;
pub mod catalog;
pub mod cleanup;
pub mod console;
pub mod control;
pub mod process;
pub mod supervisor;
