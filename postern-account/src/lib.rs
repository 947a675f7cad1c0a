pub mod auth;
pub mod config;
pub mod dkim;
pub mod error;
pub mod model;
pub mod resolver;
pub mod return_path;
pub mod store;

pub use auth::Authenticator;
pub use config::CacheConfig;
pub use dkim::DkimSigner;
pub use error::{AuthError, DkimError, ResolveError, StoreError};
pub use model::{Account, Alias, Destination, Domain, ReturnPath};
pub use resolver::Resolver;
pub use store::{Datastore, DatastoreConfig, MemoryDatastore, PgDatastore};
