//! Built-in effect processors
//!
//! Plugin-format adapters live outside the engine; these cover the common
//! insert effects and give the mixer something to run without them.

mod delay;
mod ducker;
mod filter;
mod gain;

pub use delay::Delay;
pub use ducker::SidechainDucker;
pub use filter::{Filter, FilterType};
pub use gain::Gain;
