pub mod consensus;
pub mod engine;
pub mod states;

pub use consensus::{reconcile, Tally, Verdict};
pub use engine::{transition, TransitionError};
pub use states::{RequestEvent, RequestStatus, TransitionOutcome};
