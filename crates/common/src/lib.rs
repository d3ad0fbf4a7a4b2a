pub mod config;
pub mod error;
pub mod page;
pub mod ports;
pub mod schema;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use page::Page;
pub use ports::{MarketDataSource, NewsSource, PersistenceGateway};
pub use schema::{parameter_schema, ParamSchema, PARAMS_SCHEMA_VERSION};
pub use types::*;
