pub mod evaluator;
pub mod models;
pub mod service;
pub mod types;

pub use evaluator::*;
pub use models::*;
pub use service::*;
pub use types::*;
