pub mod error;
pub mod feed;
pub mod handlers;
pub mod models;
pub mod poller;
pub mod service;

pub use error::*;
pub use feed::{HttpSalesFeed, SalesFeed};
pub use handlers::*;
pub use models::{ExternalClient, ExternalSale, ImportRequest, ImportSummary};
pub use poller::*;
pub use service::*;
