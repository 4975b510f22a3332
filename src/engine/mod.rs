//! Host side of the decision engine: the candidate loop and the startup
//! Go/No-Go check.

pub mod preflight;
pub mod runner;
