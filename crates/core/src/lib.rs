#![forbid(unsafe_code)]

pub mod error;
pub mod evaluator;
pub mod events;
pub mod ledger;
pub mod model;
pub mod policy;
pub mod scoring;
pub mod statistics;
pub mod time;

pub use error::Error;
pub use time::Clock;
