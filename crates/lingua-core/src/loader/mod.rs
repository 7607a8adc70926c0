//! Model loading and the translator cache.

pub mod coordinator;
pub mod handle;

pub use coordinator::LoaderCoordinator;
pub use handle::{TranslatorCache, TranslatorHandle};
