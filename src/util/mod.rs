//! Formatting helpers shared by the decoder and the CLI.

pub mod hex;
