//! Link Discovery & Adaptive Learning Engine.
//!
//! A periodic batch job over three observation kinds (incidents, messages,
//! channels): four correlators produce typed, scored links; graph analysis
//! ranks channels by centrality and community; the outcome evaluator and
//! adaptive controller close the loop by retiering channels and mining new
//! vocabulary for the next cycle.

pub mod adapt;
pub mod bootstrap;
pub mod content;
pub mod cycle;
pub mod evaluate;
pub mod social;
pub mod spatial;
pub mod temporal;
pub mod vocabulary;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use cycle::{CycleRunner, CycleStats};
