//! Rhai plugin engine.

mod engine;

pub use engine::{RhaiEngine, RhaiEngineFactory, dynamic_to_value, value_to_dynamic};
