pub mod config;
pub mod dns;
pub mod engine;
pub mod error;
pub mod transaction;
pub mod worker;

pub use config::{Binding, DeliveryConfig, MxConfig};
pub use dns::{HickoryMx, MailServer, MxLookup, MxResolver, StaticMx};
pub use engine::{DeliveryEngine, Dialer};
pub use error::{DeliveryError, DnsError, Stage};
pub use transaction::SmtpTransaction;
pub use worker::{Outcome, SenderPool, SenderWorker, check_reverse_dns};
