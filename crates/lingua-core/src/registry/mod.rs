//! Model registry: catalog fetching, parsing and language routing.
//!
//! - [`source`] - where the registry document comes from
//! - [`parser`] - turning the document into a catalog and file descriptors
//! - [`resolver`] - cached, retrying access to the catalog
//! - [`path`] - direct versus pivot routing

pub mod path;
pub mod parser;
pub mod resolver;
pub mod source;
pub mod types;

pub use path::{PathResolver, TranslationPairInfo};
pub use parser::{ModelsJsonParser, RegistryParser};
pub use resolver::RegistryResolver;
pub use source::{HttpRegistrySource, RegistrySource};
pub use types::{ModelCatalog, Registry};
