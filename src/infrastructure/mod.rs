pub mod cache;
pub mod parsers;
pub mod posts;
pub mod source;
pub mod store;
