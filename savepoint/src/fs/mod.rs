//! Filesystem layout of the backup tree and traversal of source trees.

pub mod mapper;
pub mod walker;
