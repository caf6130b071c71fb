//! Token-budgeted context assembly over conversation history.

mod assembler;
mod cache;
mod estimator;

pub use assembler::ContextAssembler;
pub use cache::{Slot, SlotRole, TokenCountCache};
pub use estimator::{CharacterRatioTokenEstimator, TokenEstimator};
