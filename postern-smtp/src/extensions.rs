use core::fmt::{self, Display};

/// SMTP extensions advertised in the EHLO response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extension {
    /// RFC 3207, only while the connection is still plain text.
    Starttls,

    /// RFC 1870. A value of 0 advertises `SIZE` without a limit.
    Size(usize),

    /// RFC 4954, offered on the submission port.
    Auth,

    EightBitMime,

    Pipelining,
}

impl Display for Extension {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Self::Starttls => fmt.write_str("STARTTLS"),
            Self::Size(0) => fmt.write_str("SIZE"),
            Self::Size(max) => write!(fmt, "SIZE {max}"),
            Self::Auth => fmt.write_str("AUTH PLAIN LOGIN"),
            Self::EightBitMime => fmt.write_str("8BITMIME"),
            Self::Pipelining => fmt.write_str("PIPELINING"),
        }
    }
}
