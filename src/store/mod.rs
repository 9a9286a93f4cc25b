//! Durable session store: one growable multichannel sample matrix plus
//! header metadata and per-trial annotations.

pub mod annotation;
pub mod format;
pub mod metadata;
pub mod reader;
pub mod writer;

pub use annotation::TrialAnnotation;
pub use format::AttrValue;
pub use metadata::SessionMetadata;
pub use reader::StoreReader;
pub use writer::{PersistentStore, StoreOptions};
