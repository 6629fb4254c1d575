//! Pluggable persistence for instance records, configuration documents and
//! runtime status.

mod config;
mod file;
mod instances;
mod runtime;

pub use config::{ConfigurationStorage, FileConfigurationStorage, InMemoryConfigurationStorage};
pub use instances::{FileInstanceStorage, InMemoryInstanceStorage, InstanceRecord, InstanceStorage};
pub use runtime::{InMemoryRuntimeStore, RuntimeStore};
