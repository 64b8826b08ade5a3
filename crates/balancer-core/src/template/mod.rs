//! Quorum-validated block templates.
//!
//! [`TemplateConsensus`] produces a template peers agree on; [`TemplateCache`]
//! keeps one warm in the background and bridges new blocks with an
//! empty-block placeholder until the real template is ready.

mod cache;
mod consensus;
mod placeholder;

pub use cache::TemplateCache;
pub use consensus::TemplateConsensus;
pub use placeholder::{placeholder_template, PLACEHOLDER_VERSION};
