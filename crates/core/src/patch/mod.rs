//! Patcher program (§4.J): pure strategies, the filesize watchdog, and the
//! task dispatcher tying both to commit gating and the automatic
//! post-commit verify trigger.

pub mod program;
pub mod refactor;
pub mod strategies;
pub mod watchdog;

pub use program::{AutoArgs, BatchOp, PatchOutcome, PatchState};
pub use refactor::{MoveArgs, SplitArgs};
