//! SMTP client used by the delivery engine.
//!
//! It supports plain TCP and TLS connections, opportunistic STARTTLS and
//! multi-line response parsing.

mod error;
mod response;
mod smtp_client;

pub use error::{ClientError, Result};
pub use response::{Response, ResponseLine};
pub use smtp_client::{SmtpClient, dot_stuff};
