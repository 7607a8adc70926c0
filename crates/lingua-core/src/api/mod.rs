//! API implementation submodules.
//!
//! Each submodule contains `impl LinguaApi` blocks; the struct itself is
//! defined in `lib.rs`.

mod builder;
mod pairs;
mod translation;

pub use builder::LinguaApiBuilder;
