//! CONCORD Session - Account Session Coordination
//!
//! Tracks which services hold a session for each account and enforces the
//! handoff rules between them:
//!
//! ```text
//! (none) --login(LOGIN)--> LoggedIn --transition--> Transition
//! Transition --login(CHANNEL)--> map replaced by {CHANNEL: LoggedIn}
//! Transition --expire_transition (after timeout)--> (none)
//! ```
//!
//! [`SessionCoordinator`] holds the state machine. [`transition_sweeper_task`]
//! finds sessions stuck in `Transition` and hands them to a
//! [`TransitionHandler`].

pub mod coordinator;
pub mod model;
pub mod sweeper;

pub use coordinator::{SessionCoordinator, SESSION_NAMESPACE};
pub use model::{maximal_state, AccountKey, Service, ServiceKey, SessionMap, State, StateValue};
pub use sweeper::{
    sweep_once, transition_sweeper_task, ExpireTransitionHandler, SweeperConfig, SweeperMetrics,
    SweeperSnapshot, TransitionHandler,
};
