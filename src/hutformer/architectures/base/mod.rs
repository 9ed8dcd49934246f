//! Base architecture modules

pub mod attention;
pub mod checkpoint;
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod init;
pub mod segment_merging;
pub mod transformer;
