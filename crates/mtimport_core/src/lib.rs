pub mod chunks;
pub mod config;
pub mod fetch;
pub mod image_size;
pub mod importers;
pub mod mapping;
pub mod parser;
pub mod pipeline;
pub mod records;
pub mod rewrite;
pub mod runtime;
pub mod sanitize;
pub mod store;
pub mod wordpress;
