//! Compute pipelines

pub mod composite;
pub mod cull;

pub use composite::{CompositeParams, CompositePipeline};
pub use cull::{CullParams, CullPipeline};
