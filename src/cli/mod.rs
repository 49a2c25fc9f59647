//! Command-line surface of the keeper

pub mod commands;
