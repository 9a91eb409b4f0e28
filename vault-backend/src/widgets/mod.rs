//! Widget computation engine.
//!
//! Declarative widget files describe derived statistics over a set of notes.
//! The loader turns files into configs, `fields`/`graph`/`topo` turn a config
//! into an ordered computation plan, `pipeline` runs that plan with the
//! expression sandbox in `expr`, and `engine` ties it together with a cache.

pub mod aggregate;
pub mod cache;
pub mod engine;
pub mod expr;
pub mod fields;
pub mod graph;
pub mod loader;
pub mod pipeline;
pub mod similarity;
pub mod topo;

pub use engine::{ComputeOptions, EngineError, EngineSettings, WidgetEngine};
