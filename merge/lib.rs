#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod catalog;
pub mod config;
pub mod context;
pub mod cursor;
pub mod decode;
pub mod engine;
pub mod format;
pub mod header;
pub mod output;
pub mod progress;
#[path = "../shared/files.rs"]
pub mod shared_files;
pub mod types;
pub mod shared {
    pub use super::shared_files as files;
}
