// Shared - error taxonomy used across the crate

pub mod error;
