//! Suitability resolution
//!
//! Each file is asked for its usable `(method, parameters)` pairs; a pair is
//! kept only when every file of the set reports it.

mod resolver;
mod tally;

pub use resolver::SuitabilityResolver;
pub use tally::{CandidateKey, SuitabilityTally};
