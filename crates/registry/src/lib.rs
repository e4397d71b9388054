//! Template Repository
//!
//! Immutable, versioned storage of prompt templates plus the render-engine
//! seam used when a template is instantiated.

#![warn(missing_docs)]

pub mod render;
pub mod repository;

pub use render::{Renderer, SimpleRenderer};
pub use repository::TemplateRepository;
