#![forbid(unsafe_code)]
//! Hashing, filesystem, process and source-control helpers for pbt.

pub mod error;
pub mod fs;
pub mod git;
pub mod hash;
pub mod process;
