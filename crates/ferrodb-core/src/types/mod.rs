//! Core data types.

pub mod document;
pub mod index_key;
pub mod namespace;
pub mod optime;
pub mod record_id;
pub mod uuid;
