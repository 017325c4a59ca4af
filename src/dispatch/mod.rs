pub mod client;
pub mod error;
pub mod queue;
pub mod worker;

pub use client::*;
pub use error::*;
pub use queue::*;
pub use worker::Dispatcher;

#[cfg(test)]
pub(crate) use worker::test_support;
