use core::fmt::{self, Display, Formatter};
use std::borrow::Cow;

use ahash::AHashMap;
use mailparse::MailAddr;
use phf::phf_map;
use postern_common::address::EmailAddress;

/// ESMTP parameters for MAIL FROM command (RFC 5321 Section 3.3).
///
/// Keys are case-insensitive and stored upper case. Common parameters:
/// - SIZE: Message size in bytes (RFC 1870)
/// - BODY: 7BIT or 8BITMIME (RFC 6152)
/// - AUTH: Authorization identity (RFC 4954)
#[derive(PartialEq, Eq, Debug, Clone, Default)]
pub struct MailParameters {
    params: AHashMap<Cow<'static, str>, Option<String>>,
}

static KNOWN_PARAMS: phf::Map<&'static str, &'static str> = phf_map! {
    "SIZE" => "SIZE",
    "BODY" => "BODY",
    "AUTH" => "AUTH",
    "RET" => "RET",
    "ENVID" => "ENVID",
    "SMTPUTF8" => "SMTPUTF8",
};

fn normalize_key(key: &str) -> Cow<'static, str> {
    let upper = key.to_ascii_uppercase();

    KNOWN_PARAMS
        .get(upper.as_str())
        .map_or_else(|| Cow::Owned(upper), |&s| Cow::Borrowed(s))
}

impl MailParameters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses parameter tokens in the form `KEY=VALUE` or `FLAG`.
    ///
    /// # Errors
    ///
    /// Returns an error if a parameter appears more than once, or
    /// SIZE is not a positive integer.
    pub fn from_params_str(params_str: &str) -> Result<Self, String> {
        let mut params = Self::new();

        for token in params_str.split_whitespace() {
            let (key, value) = match token.split_once('=') {
                Some((key, value)) => (key, Some(value)),
                None => (token, None),
            };
            let key = normalize_key(key);

            if params.params.contains_key(&key) {
                return Err(format!("Duplicate parameter '{key}' not allowed"));
            }

            if key == "SIZE" {
                match value.map(str::parse::<usize>) {
                    Some(Ok(0)) => return Err(String::from("SIZE=0 is not allowed")),
                    Some(Ok(_)) => {}
                    _ => return Err(format!("Invalid SIZE value: {}", value.unwrap_or_default())),
                }
            }

            params.params.insert(key, value.map(str::to_string));
        }

        Ok(params)
    }

    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.params
            .insert(normalize_key(key.as_ref()), Some(value.into()));
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(normalize_key(key).as_ref())?.as_deref()
    }

    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.params.contains_key(normalize_key(key).as_ref())
    }

    /// The declared SIZE, if any.
    #[must_use]
    pub fn size(&self) -> Option<usize> {
        self.get("SIZE")?.parse().ok()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl Display for MailParameters {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.params {
            if !first {
                f.write_str(" ")?;
            }
            first = false;

            match v {
                None => f.write_str(k)?,
                Some(val) => write!(f, "{k}={val}")?,
            }
        }
        Ok(())
    }
}

#[derive(PartialEq, PartialOrd, Eq, Hash, Debug, Clone)]
pub enum HeloVariant {
    Ehlo(String),
    Helo(String),
}

impl Display for HeloVariant {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ehlo(_) => "EHLO",
            Self::Helo(_) => "HELO",
        })
    }
}

/// SASL mechanisms offered on the submission port.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum AuthMechanism {
    Plain,
    Login,
}

impl Display for AuthMechanism {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
        })
    }
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum Command {
    Helo(HeloVariant),
    Help,
    /// `None` is the null reverse-path of [RFC-5321](https://www.ietf.org/rfc/rfc5321.txt).
    MailFrom(Option<EmailAddress>, MailParameters),
    /// The forward-path with its angle brackets removed. It is validated
    /// during resolution so malformed recipients are rejected there.
    RcptTo(String),
    Rset,
    Noop,
    /// Mechanism plus the optional initial response.
    Auth(AuthMechanism, Option<String>),
    Data,
    Quit,
    StartTLS,
    Invalid(String),
}

impl Command {
    #[must_use]
    pub fn inner(&self) -> Cow<'_, str> {
        match self {
            Self::MailFrom(from, _) => from
                .as_ref()
                .map_or_else(|| Cow::Borrowed(""), |f| Cow::Owned(f.to_string())),
            Self::RcptTo(to) => Cow::Borrowed(to.as_str()),
            Self::Invalid(command) => Cow::Borrowed(command.as_str()),
            Self::Helo(HeloVariant::Ehlo(id) | HeloVariant::Helo(id)) => Cow::Borrowed(id.as_str()),
            _ => Cow::Borrowed(""),
        }
    }

    #[must_use]
    pub fn size(&self) -> Option<usize> {
        match self {
            Self::MailFrom(_, params) => params.size(),
            _ => None,
        }
    }
}

impl Display for Command {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Helo(v) => fmt.write_fmt(format_args!("{} {}", v, self.inner())),
            Self::MailFrom(_, params) => {
                if params.is_empty() {
                    fmt.write_fmt(format_args!("MAIL FROM:<{}>", self.inner()))
                } else {
                    fmt.write_fmt(format_args!("MAIL FROM:<{}> {params}", self.inner()))
                }
            }
            Self::RcptTo(rcpt) => fmt.write_fmt(format_args!("RCPT TO:<{rcpt}>")),
            Self::Data => fmt.write_str("DATA"),
            Self::Quit => fmt.write_str("QUIT"),
            Self::StartTLS => fmt.write_str("STARTTLS"),
            Self::Invalid(s) => fmt.write_str(s),
            Self::Help => fmt.write_str("HELP"),
            Self::Rset => fmt.write_str("RSET"),
            Self::Noop => fmt.write_str("NOOP"),
            // Credentials never reach the logs
            Self::Auth(mechanism, _) => fmt.write_fmt(format_args!("AUTH {mechanism}")),
        }
    }
}

fn strip_path(path: &str) -> &str {
    let path = path.trim();
    path.strip_prefix('<')
        .and_then(|p| p.strip_suffix('>'))
        .unwrap_or(path)
        .trim()
}

fn parse_sender(addr: &str) -> Result<Option<EmailAddress>, Command> {
    // mailparse does not accept the null sender
    if strip_path(addr).is_empty() {
        return Ok(None);
    }

    let parsed = mailparse::addrparse(addr).map_err(|err| Command::Invalid(err.to_string()))?;

    match parsed.first() {
        Some(MailAddr::Single(info)) => EmailAddress::parse(&info.addr)
            .map(Some)
            .map_err(|err| Command::Invalid(err.to_string())),
        Some(MailAddr::Group(_)) => Err(Command::Invalid(format!("Unexpected group in {addr}"))),
        None => Ok(None),
    }
}

fn parse_auth(rest: &str) -> Result<Command, Command> {
    let mut parts = rest.split_whitespace();

    let mechanism = match parts.next() {
        Some(m) if m.eq_ignore_ascii_case("PLAIN") => AuthMechanism::Plain,
        Some(m) if m.eq_ignore_ascii_case("LOGIN") => AuthMechanism::Login,
        Some(m) => return Err(Command::Invalid(format!("Unsupported mechanism {m}"))),
        None => return Err(Command::Invalid(String::from("Expected mechanism in AUTH"))),
    };

    Ok(Command::Auth(mechanism, parts.next().map(str::to_string)))
}

impl TryFrom<&str> for Command {
    type Error = Self;

    fn try_from(command: &str) -> Result<Self, Self::Error> {
        let trimmed = command.trim();

        if trimmed.len() >= 10 && trimmed[..10].eq_ignore_ascii_case("MAIL FROM:") {
            // Format: MAIL FROM:<addr> [param1=value1] [param2=value2] ...
            let rest = trimmed[10..].trim();
            if rest.is_empty() {
                return Err(Self::Invalid(command.to_owned()));
            }

            let (addr, params) = rest
                .split_once(char::is_whitespace)
                .unwrap_or((rest, ""));

            let mail_params = MailParameters::from_params_str(params).map_err(Self::Invalid)?;

            Ok(Self::MailFrom(parse_sender(addr)?, mail_params))
        } else if trimmed.len() >= 8 && trimmed[..8].eq_ignore_ascii_case("RCPT TO:") {
            let path = strip_path(&trimmed[8..]);
            if path.is_empty() {
                return Err(Self::Invalid(command.to_owned()));
            }

            // Trailing RCPT parameters are accepted and ignored
            let path = path.split_whitespace().next().unwrap_or(path);
            Ok(Self::RcptTo(strip_path(path).to_string()))
        } else if trimmed.len() >= 4 {
            let prefix = &trimmed[..4];
            if prefix.eq_ignore_ascii_case("EHLO") || prefix.eq_ignore_ascii_case("HELO") {
                match trimmed.split_once(' ') {
                    None => Err(Self::Invalid(format!("Expected hostname in {trimmed}"))),
                    Some((cmd, host)) if cmd.eq_ignore_ascii_case("HELO") => {
                        Ok(Self::Helo(HeloVariant::Helo(host.trim().to_string())))
                    }
                    Some((_, host)) => Ok(Self::Helo(HeloVariant::Ehlo(host.trim().to_string()))),
                }
            } else if prefix.eq_ignore_ascii_case("AUTH") {
                parse_auth(&trimmed[4..])
            } else if trimmed.eq_ignore_ascii_case("DATA") {
                Ok(Self::Data)
            } else if trimmed.eq_ignore_ascii_case("QUIT") {
                Ok(Self::Quit)
            } else if trimmed.eq_ignore_ascii_case("STARTTLS") {
                Ok(Self::StartTLS)
            } else if trimmed.eq_ignore_ascii_case("HELP") {
                Ok(Self::Help)
            } else if trimmed.eq_ignore_ascii_case("RSET") {
                Ok(Self::Rset)
            } else if prefix.eq_ignore_ascii_case("NOOP") {
                Ok(Self::Noop)
            } else {
                Err(Self::Invalid(command.to_owned()))
            }
        } else {
            Err(Self::Invalid(command.to_owned()))
        }
    }
}

impl TryFrom<&[u8]> for Command {
    type Error = Self;

    fn try_from(command: &[u8]) -> Result<Self, Self::Error> {
        std::str::from_utf8(command).map_or_else(
            |_| Err(Self::Invalid("Unable to interpret command".to_string())),
            Self::try_from,
        )
    }
}

impl TryFrom<String> for Command {
    type Error = Self;

    fn try_from(command: String) -> Result<Self, Self::Error> {
        Self::try_from(command.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
    use postern_common::address::EmailAddress;

    use crate::command::{AuthMechanism, Command, HeloVariant, MailParameters};

    // Every upper/lower case permutation of a keyword
    fn string_casing(string: &str) -> impl Iterator<Item = String> {
        let len = string.len();
        let num_cases = usize::pow(2, u32::try_from(len).unwrap_or(0));

        let (upper, lower) = string.chars().fold(
            (Vec::with_capacity(len), Vec::with_capacity(len)),
            |(mut upper, mut lower), c| {
                upper.push(c.to_ascii_uppercase());
                lower.push(c.to_ascii_lowercase());
                (upper, lower)
            },
        );

        (0..num_cases).map(move |i| {
            (0..len).fold(String::with_capacity(len), |mut s, idx| {
                if (i & (1 << idx)) == 0 {
                    s.push(lower[idx]);
                } else {
                    s.push(upper[idx]);
                }
                s
            })
        })
    }

    fn address(addr: &str) -> Option<EmailAddress> {
        Some(EmailAddress::parse(addr).unwrap())
    }

    #[test]
    fn mail_from_command() {
        assert_eq!(
            Command::try_from("Mail From: <Test@Gmail.com>"),
            Ok(Command::MailFrom(
                address("test@gmail.com"),
                MailParameters::new()
            ))
        );

        assert!(Command::try_from("Mail From:").is_err());
        assert!(Command::try_from("Mail FROM:dasdas").is_err());
        assert!(Command::try_from("Mail FROM dasdas").is_err());

        assert_eq!(
            Command::try_from("MAIL FROM: <>"),
            Ok(Command::MailFrom(None, MailParameters::new()))
        );

        let mut params_with_size = MailParameters::new();
        params_with_size.insert("SIZE", "12345");
        assert_eq!(
            Command::try_from("MAIL FROM:<test@gmail.com> SIZE=12345"),
            Ok(Command::MailFrom(address("test@gmail.com"), params_with_size))
        );

        for comm in string_casing("mail from") {
            assert!(matches!(
                Command::try_from(format!("{comm}: test@gmail.com")),
                Ok(Command::MailFrom(_, params)) if params.is_empty()
            ));
        }
    }

    #[test]
    fn mail_from_size_edge_cases() {
        for bad in ["SIZE=0", "SIZE=", "SIZE=abc", "SIZE=1000 SIZE=2000"] {
            assert!(
                matches!(
                    Command::try_from(format!("MAIL FROM:<test@example.com> {bad}")),
                    Err(Command::Invalid(_))
                ),
                "{bad} should be rejected"
            );
        }

        let command = Command::try_from("MAIL FROM:<test@example.com> SiZe=3000 BODY=8BITMIME");
        let Ok(Command::MailFrom(_, params)) = command else {
            panic!("Expected MAIL FROM, got {command:?}");
        };
        assert_eq!(params.size(), Some(3000));
        assert_eq!(params.get("body"), Some("8BITMIME"));
    }

    #[test]
    fn rcpt_to_command() {
        assert_eq!(
            Command::try_from("Rcpt To: <test@gmail.com>"),
            Ok(Command::RcptTo(String::from("test@gmail.com")))
        );

        // Malformed paths are kept for the resolver to reject
        assert_eq!(
            Command::try_from("RCPT TO:<a@b@c>"),
            Ok(Command::RcptTo(String::from("a@b@c")))
        );

        assert!(Command::try_from("Rcpt To:").is_err());
        assert!(Command::try_from("RCPT TO:<>").is_err());
        assert!(Command::try_from("RCPT TO dasdsa").is_err());

        for comm in string_casing("rcpt to") {
            assert!(matches!(
                Command::try_from(format!("{comm}: test@gmail.com")),
                Ok(Command::RcptTo(_))
            ));
        }
    }

    #[test]
    fn helo_ehlo_command() {
        assert!(Command::try_from("EHLO").is_err());
        assert!(Command::try_from("HELO").is_err());

        assert_eq!(
            Command::try_from("EHLO mail.example.org"),
            Ok(Command::Helo(HeloVariant::Ehlo(String::from(
                "mail.example.org"
            ))))
        );

        for comm in string_casing("helo") {
            assert!(
                matches!(
                    Command::try_from(format!("{comm} test")),
                    Ok(Command::Helo(HeloVariant::Helo(_))),
                ),
                "'{comm}' should map to Helo"
            );
        }
    }

    #[test]
    fn auth_command() {
        assert_eq!(
            Command::try_from("AUTH PLAIN AHVzZXIAcGFzcw=="),
            Ok(Command::Auth(
                AuthMechanism::Plain,
                Some(String::from("AHVzZXIAcGFzcw=="))
            ))
        );
        assert_eq!(
            Command::try_from("auth login"),
            Ok(Command::Auth(AuthMechanism::Login, None))
        );
        assert!(Command::try_from("AUTH CRAM-MD5").is_err());
        assert!(Command::try_from("AUTH").is_err());

        // The initial response is never displayed
        assert_eq!(
            Command::try_from("AUTH PLAIN secret").unwrap().to_string(),
            "AUTH PLAIN"
        );
    }

    #[test]
    fn other_commands() {
        for (keyword, expected) in [
            ("data", Command::Data),
            ("quit", Command::Quit),
            ("starttls", Command::StartTLS),
            ("rset", Command::Rset),
            ("help", Command::Help),
            ("noop", Command::Noop),
        ] {
            for comm in string_casing(keyword) {
                assert_eq!(Command::try_from(comm), Ok(expected.clone()));
            }
        }
    }
}
