pub mod cleanup;
pub mod clear;
pub mod common;
pub mod drain;
pub mod failed;
pub mod mappings;
pub mod retry;
pub mod show;
pub mod status;
