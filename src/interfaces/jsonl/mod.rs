//! Line-delimited JSON front end used by the binary.

pub mod command_reader;
pub mod result_writer;
pub mod runner;
