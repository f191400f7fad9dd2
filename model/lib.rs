#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod columns;
pub mod config;
pub mod document;
pub mod genotype;
pub mod header;
pub mod identity;
pub mod info;
pub mod row;
pub mod shard;
#[path = "../shared/files.rs"]
pub mod shared_files;
pub mod sink;
pub mod types;
pub mod shared {
    pub use super::shared_files as files;
}
