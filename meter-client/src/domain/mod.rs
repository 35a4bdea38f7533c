pub mod delta;
pub mod reading;

pub use delta::{DeltaCalculator, DeltaOutcome, EqualCounterPolicy, PreviousState};
pub use reading::{CandidateReading, Reading, ReadingFilter};
