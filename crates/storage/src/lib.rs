#![forbid(unsafe_code)]

mod memory;
pub mod repository;
pub mod sqlite;
