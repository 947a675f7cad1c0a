pub mod timeouts;

pub use timeouts::{ClientTimeouts, ServerTimeouts};
