//! Generated return-path addresses of the form `local=<envelope id>@domain`.

use postern_common::address::EmailAddress;
use ulid::Ulid;

/// Build the return-path address for an envelope forwarded through `recipient`.
///
/// Any `=` already in the local part is dropped so the id can be recovered unambiguously.
pub fn address_for(recipient: &EmailAddress, id: Ulid) -> String {
    let local: String = recipient.local().chars().filter(|c| *c != '=').collect();
    format!("{local}={id}@{}", recipient.domain())
}

/// Recover the envelope id from a return-path address, if it is one.
pub fn envelope_id(address: &EmailAddress) -> Option<Ulid> {
    let mut parts = address.local().split('=');
    let (Some(_), Some(id), None) = (parts.next(), parts.next(), parts.next()) else {
        return None;
    };

    Ulid::from_string(&id.to_uppercase())
        .ok()
        .filter(|id| !id.is_nil())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use postern_common::address::EmailAddress;
    use pretty_assertions::assert_eq;
    use ulid::Ulid;

    use super::{address_for, envelope_id};

    #[test]
    fn generated_addresses_carry_the_id() {
        let id = Ulid::new();
        let recipient = EmailAddress::parse("we=ird@example.com").unwrap();

        let address = address_for(&recipient, id);
        assert_eq!(address, format!("weird={id}@example.com"));

        let parsed = EmailAddress::parse(&address).unwrap();
        assert_eq!(envelope_id(&parsed), Some(id));
    }

    #[test]
    fn ordinary_addresses_are_not_return_paths() {
        for address in [
            "user@example.com",
            "a=b=c@example.com",
            "user=notanid@example.com",
            "user=00000000000000000000000000@example.com",
        ] {
            assert_eq!(envelope_id(&EmailAddress::parse(address).unwrap()), None, "{address}");
        }
    }
}
