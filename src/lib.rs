pub mod config;
pub mod contexts;
pub mod data;
pub mod existing_output;
pub mod hashing;
pub mod manifest;
pub mod registries;
pub mod spec_index;
pub mod verify;
