//! A deliberately minimal DNS message codec.
//!
//! This forwarder never needs to understand the full DNS record zoo: it only
//! ever *builds* synthetic queries (for bootstrap resolution and health
//! checks) and *inspects* the handful of header/answer fields needed to tell
//! whether such a query succeeded. Every byte that arrives from a real client
//! or leaves toward a real upstream is relayed verbatim by the forwarder and
//! never touches this module.

use std::net::Ipv4Addr;

use rand::Rng as _;

/// `QTYPE`/`RTYPE` values this crate knows how to build or extract.
pub mod rtype {
    pub const A: u16 = 1;
    pub const AAAA: u16 = 28;
}

const HEADER_LEN: usize = 12;
const QCLASS_IN: u16 = 1;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("label `{0}` is longer than 63 bytes")]
    LabelTooLong(String),
    #[error("encoded domain name is longer than 255 bytes")]
    NameTooLong,
    #[error("message is shorter than the 12-byte DNS header")]
    TooShort,
    #[error("question or answer section ended before expected")]
    Truncated,
    #[error("name at offset {0} has a malformed label length or compression pointer")]
    MalformedName(usize),
}

/// A DNS query this process built itself (bootstrap lookups, health checks).
#[derive(Debug, Clone)]
pub struct Query {
    bytes: Vec<u8>,
}

impl Query {
    /// Builds a standard recursive query for `name`/`qtype` with a random
    /// transaction ID, per §4.1 of the wire-codec design: flags `0x0100`,
    /// `QDCOUNT=1`, all other counts zero.
    pub fn new(name: &str, qtype: u16) -> Result<Self, Error> {
        let id: u16 = rand::thread_rng().gen();

        let mut bytes = Vec::with_capacity(HEADER_LEN + name.len() + 6);
        bytes.extend_from_slice(&id.to_be_bytes());
        bytes.extend_from_slice(&[0x01, 0x00]); // flags: recursion desired
        bytes.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
        bytes.extend_from_slice(&0u16.to_be_bytes()); // ANCOUNT
        bytes.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
        bytes.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT

        encode_name(name, &mut bytes)?;
        bytes.extend_from_slice(&qtype.to_be_bytes());
        bytes.extend_from_slice(&QCLASS_IN.to_be_bytes());

        Ok(Self { bytes })
    }

    pub fn id(&self) -> u16 {
        u16::from_be_bytes([self.bytes[0], self.bytes[1]])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// The fields of a response this process cares about: enough to decide
/// whether a synthetic query succeeded, and to extract bootstrap addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSummary {
    pub id: u16,
    /// The 4-bit RCODE from the header; 0 = `NOERROR`.
    pub rcode: u8,
    pub answer_count: u16,
    /// Every type-A record found in the answer section, in wire order.
    pub a_records: Vec<Ipv4Addr>,
}

impl ResponseSummary {
    pub fn is_success(&self) -> bool {
        self.rcode == 0
    }
}

/// Parses just enough of `bytes` to produce a [`ResponseSummary`].
///
/// Never fails on a well-formed DNS message, but also never panics on a
/// malformed one: a parse error here just means the upstream is treated as
/// having failed, it does not crash the process.
pub fn parse_response(bytes: &[u8]) -> Result<ResponseSummary, Error> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::TooShort);
    }

    let id = u16::from_be_bytes([bytes[0], bytes[1]]);
    let rcode = bytes[3] & 0x0F;
    let qdcount = u16::from_be_bytes([bytes[4], bytes[5]]);
    let ancount = u16::from_be_bytes([bytes[6], bytes[7]]);

    let mut offset = HEADER_LEN;

    for _ in 0..qdcount {
        offset = skip_name(bytes, offset)?;
        offset = offset
            .checked_add(4) // QTYPE + QCLASS
            .ok_or(Error::Truncated)?;
        if offset > bytes.len() {
            return Err(Error::Truncated);
        }
    }

    let mut a_records = Vec::new();

    for _ in 0..ancount {
        offset = skip_name(bytes, offset)?;

        let rr_header_end = offset.checked_add(10).ok_or(Error::Truncated)?; // TYPE+CLASS+TTL+RDLENGTH
        if rr_header_end > bytes.len() {
            return Err(Error::Truncated);
        }

        let rtype = u16::from_be_bytes([bytes[offset], bytes[offset + 1]]);
        let rdlength = u16::from_be_bytes([bytes[offset + 8], bytes[offset + 9]]) as usize;

        let rdata_start = rr_header_end;
        let rdata_end = rdata_start.checked_add(rdlength).ok_or(Error::Truncated)?;
        if rdata_end > bytes.len() {
            return Err(Error::Truncated);
        }

        if rtype == rtype::A && rdlength == 4 {
            a_records.push(Ipv4Addr::new(
                bytes[rdata_start],
                bytes[rdata_start + 1],
                bytes[rdata_start + 2],
                bytes[rdata_start + 3],
            ));
        }

        offset = rdata_end;
    }

    Ok(ResponseSummary {
        id,
        rcode,
        answer_count: ancount,
        a_records,
    })
}

/// Advances past a name starting at `offset`, honouring the `0xC0xx`
/// compression-pointer shortcut (a pointer always terminates the name in the
/// section we're walking, so we never need to follow it to skip past it).
fn skip_name(bytes: &[u8], mut offset: usize) -> Result<usize, Error> {
    loop {
        let len = *bytes.get(offset).ok_or(Error::Truncated)? as usize;

        if len == 0 {
            return Ok(offset + 1);
        }

        if len & 0xC0 == 0xC0 {
            // Compression pointer: 2 bytes total, regardless of target.
            if offset + 1 >= bytes.len() {
                return Err(Error::Truncated);
            }
            return Ok(offset + 2);
        }

        if len & 0xC0 != 0 {
            return Err(Error::MalformedName(offset));
        }

        offset = offset.checked_add(1 + len).ok_or(Error::Truncated)?;
        if offset > bytes.len() {
            return Err(Error::Truncated);
        }
    }
}

fn encode_name(name: &str, out: &mut Vec<u8>) -> Result<(), Error> {
    let start = out.len();

    let name = name.strip_suffix('.').unwrap_or(name);

    for label in name.split('.') {
        if label.len() > 63 {
            return Err(Error::LabelTooLong(label.to_string()));
        }
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);

    if out.len() - start > 255 {
        return Err(Error::NameTooLong);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_well_formed_query() {
        let query = Query::new("example.com", rtype::A).unwrap();
        let bytes = query.as_bytes();

        assert_eq!(bytes[2], 0x01);
        assert_eq!(bytes[3], 0x00);
        assert_eq!(u16::from_be_bytes([bytes[4], bytes[5]]), 1); // QDCOUNT
        assert_eq!(u16::from_be_bytes([bytes[6], bytes[7]]), 0); // ANCOUNT

        // "example" (7) + "com" (3)
        assert_eq!(bytes[12], 7);
        assert_eq!(&bytes[13..20], b"example");
        assert_eq!(bytes[20], 3);
        assert_eq!(&bytes[21..24], b"com");
        assert_eq!(bytes[24], 0);
    }

    #[test]
    fn rejects_overlong_labels() {
        let label = "a".repeat(64);
        assert!(matches!(
            Query::new(&label, rtype::A),
            Err(Error::LabelTooLong(_))
        ));
    }

    #[test]
    fn parses_a_record_answer_with_compressed_question_name() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0x1234u16.to_be_bytes()); // id
        bytes.extend_from_slice(&[0x81, 0x80]); // flags, rcode=0
        bytes.extend_from_slice(&1u16.to_be_bytes()); // qdcount
        bytes.extend_from_slice(&1u16.to_be_bytes()); // ancount
        bytes.extend_from_slice(&0u16.to_be_bytes()); // nscount
        bytes.extend_from_slice(&0u16.to_be_bytes()); // arcount

        // question: example.com A IN
        encode_name("example.com", &mut bytes).unwrap();
        bytes.extend_from_slice(&rtype::A.to_be_bytes());
        bytes.extend_from_slice(&QCLASS_IN.to_be_bytes());

        // answer: name is a compression pointer back to offset 12
        bytes.extend_from_slice(&[0xC0, 0x0C]);
        bytes.extend_from_slice(&rtype::A.to_be_bytes());
        bytes.extend_from_slice(&QCLASS_IN.to_be_bytes());
        bytes.extend_from_slice(&300u32.to_be_bytes()); // ttl
        bytes.extend_from_slice(&4u16.to_be_bytes()); // rdlength
        bytes.extend_from_slice(&[93, 184, 216, 34]); // example.com's well-known A record

        let summary = parse_response(&bytes).unwrap();

        assert_eq!(summary.id, 0x1234);
        assert_eq!(summary.rcode, 0);
        assert_eq!(summary.answer_count, 1);
        assert_eq!(summary.a_records, vec![Ipv4Addr::new(93, 184, 216, 34)]);
    }

    #[test]
    fn extracts_nxdomain_rcode() {
        let mut bytes = vec![0u8; HEADER_LEN];
        bytes[3] = 0x03; // rcode = NXDOMAIN
        encode_name("example.com", &mut bytes).unwrap();
        bytes.extend_from_slice(&rtype::A.to_be_bytes());
        bytes.extend_from_slice(&QCLASS_IN.to_be_bytes());
        bytes[4..6].copy_from_slice(&1u16.to_be_bytes());

        let summary = parse_response(&bytes).unwrap();
        assert_eq!(summary.rcode, 3);
        assert!(!summary.is_success());
    }

    #[test]
    fn truncated_message_is_an_error() {
        assert!(matches!(parse_response(&[0u8; 4]), Err(Error::TooShort)));
    }
}
