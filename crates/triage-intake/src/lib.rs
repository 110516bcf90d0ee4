//! Per-thread issue-intake core: description accumulation, command
//! classification, the session state machine, and the supervisor that
//! guarantees each session reaches exactly one terminal disposition.
//!
//! The state machine is pure: a transition mutates the session and returns a
//! list of [`SessionEffect`] values, and only the supervisor talks to the
//! chat and tracker collaborators. That keeps transition coverage cheap and
//! makes the finalize-once guarantee auditable in one place.

pub mod description_buffer;
pub mod intake_command;
pub mod intake_runtime;
pub mod intake_session;

pub use description_buffer::DescriptionBuffer;
pub use intake_command::{classify_message, MessageCommand, PrivilegedKind};
pub use intake_runtime::{
    IntakeError, IntakeRejection, IntakeRequest, IntakeRuntimeConfig, IntakeSupervisor,
};
pub use intake_session::{IntakeOutcome, IntakeSession, IntakeState, SessionEffect};
