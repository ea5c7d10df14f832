//! Best-effort view of the NDEF record the portal reads off a car's NFC tag.
//!
//! Cars carry one short URI record (`91 01 28 55 02 ...`): well-known type
//! `U`, prefix `https://www.`, and a path whose last segment is a URL-safe
//! base64 blob holding the car identity. Anything after the record is
//! signature material and is kept as an opaque trailer.
//!
//! Parsing never fails. Parts that cannot be read are left as `None`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Serialize;

use crate::car::CarUid;
use crate::protocol::UID_LEN;

pub const FLAG_MB: u8 = 0x80;
pub const FLAG_ME: u8 = 0x40;
pub const FLAG_CF: u8 = 0x20;
pub const FLAG_SR: u8 = 0x10;
pub const FLAG_IL: u8 = 0x08;
pub const TNF_MASK: u8 = 0x07;
pub const TNF_WELL_KNOWN: u8 = 0x01;

pub const URI_RECORD_TYPE: &[u8] = b"U";

/// version + model id + flags + uid
const MIN_IDENTITY_LEN: usize = 2 + 4 + 4 + UID_LEN;

#[derive(Serialize, PartialEq, Eq, Debug, Clone, Copy)]
pub struct NdefHeader {
    pub message_begin: bool,
    pub message_end: bool,
    pub chunked: bool,
    pub short_record: bool,
    pub id_length_present: bool,
    pub tnf: u8,
}

impl NdefHeader {
    #[must_use]
    pub fn from_byte(byte: u8) -> NdefHeader {
        NdefHeader {
            message_begin: byte & FLAG_MB != 0,
            message_end: byte & FLAG_ME != 0,
            chunked: byte & FLAG_CF != 0,
            short_record: byte & FLAG_SR != 0,
            id_length_present: byte & FLAG_IL != 0,
            tnf: byte & TNF_MASK,
        }
    }
}

/// Identity encoded in the car's URI.
#[derive(Serialize, PartialEq, Eq, Debug, Clone, Copy)]
pub struct CarIdentity {
    pub version: u16,
    pub model_id: u32,
    pub flags: u32,
    /// Mirrors the uid reported on the car-detect channel.
    pub uid: CarUid,
}

#[derive(Serialize, PartialEq, Eq, Debug, Clone, Default)]
pub struct NdefRecord {
    pub header: Option<NdefHeader>,
    pub record_type: Option<Vec<u8>>,
    pub uri: Option<String>,
    pub car_id: Option<String>,
    pub identity: Option<CarIdentity>,
    pub trailer: Vec<u8>,
}

impl NdefRecord {
    #[must_use]
    pub fn parse(data: &[u8]) -> NdefRecord {
        let mut record = NdefRecord::default();
        let Some((&first, rest)) = data.split_first() else {
            return record;
        };
        let header = NdefHeader::from_byte(first);
        record.header = Some(header);

        let Some((type_len, rest)) = take_byte(rest) else {
            return record;
        };
        let payload_len_width = if header.short_record { 1 } else { 4 };
        let Some((payload_len, rest)) = rest.split_at_checked(payload_len_width) else {
            return record;
        };
        let payload_len = payload_len
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | usize::from(b));
        let (id_len, rest) = if header.id_length_present {
            match take_byte(rest) {
                Some((len, rest)) => (len, rest),
                None => return record,
            }
        } else {
            (0, rest)
        };
        let Some((record_type, rest)) = rest.split_at_checked(usize::from(type_len)) else {
            return record;
        };
        record.record_type = Some(record_type.to_vec());
        let Some((_, rest)) = rest.split_at_checked(usize::from(id_len)) else {
            return record;
        };

        // a truncated payload still yields whatever URI made it across
        let (payload, trailer) = rest.split_at(payload_len.min(rest.len()));
        record.trailer = trailer.to_vec();

        if header.tnf == TNF_WELL_KNOWN
            && record_type == URI_RECORD_TYPE
            && let Some((&code, body)) = payload.split_first()
        {
            let uri = format!("{}{}", uri_prefix(code), String::from_utf8_lossy(body));
            record.car_id = uri
                .rsplit_once('/')
                .map(|(_, segment)| segment.to_string())
                .filter(|segment| !segment.is_empty());
            record.identity = record.car_id.as_deref().and_then(decode_identity);
            record.uri = Some(uri);
        }
        record
    }
}

fn take_byte(data: &[u8]) -> Option<(u8, &[u8])> {
    data.split_first().map(|(&b, rest)| (b, rest))
}

fn uri_prefix(code: u8) -> &'static str {
    match code {
        0x01 => "http://www.",
        0x02 => "https://www.",
        0x03 => "http://",
        0x04 => "https://",
        _ => "",
    }
}

/// Decodes the base64 car id into its identity fields. The uid is the last
/// six bytes of the blob; anything between the flags and the uid is reserved.
#[must_use]
pub fn decode_identity(car_id: &str) -> Option<CarIdentity> {
    let body = URL_SAFE_NO_PAD.decode(car_id.trim_end_matches('=')).ok()?;
    if body.len() < MIN_IDENTITY_LEN {
        return None;
    }
    Some(CarIdentity {
        version: u16::from_be_bytes([body[0], body[1]]),
        model_id: u32::from_be_bytes(body[2..6].try_into().ok()?),
        flags: u32::from_be_bytes(body[6..10].try_into().ok()?),
        uid: CarUid::from_slice(&body[body.len() - UID_LEN..])?,
    })
}

#[cfg(test)]
pub(crate) mod test {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    use crate::car::CarUid;

    use super::{CarIdentity, NdefRecord, decode_identity};

    pub(crate) const SIGNATURE: [u8; 4] = [0xde, 0xad, 0xbe, 0xef];

    /// A 40-byte URI record as the portal sends it, followed by signature bytes.
    pub(crate) fn car_record(uid: CarUid) -> Vec<u8> {
        let mut blob = vec![0x00, 0x02];
        blob.extend_from_slice(&0x0000_1f2eu32.to_be_bytes());
        blob.extend_from_slice(&0x0000_0001u32.to_be_bytes());
        blob.extend_from_slice(&[0u8; 5]);
        blob.extend_from_slice(uid.as_bytes());
        let car_id = URL_SAFE_NO_PAD.encode(&blob);
        assert_eq!(car_id.len(), 28);

        let mut data = vec![0x91, 0x01, 0x28, 0x55, 0x02];
        data.extend_from_slice(b"pid.mattel/");
        data.extend_from_slice(car_id.as_bytes());
        data.extend_from_slice(&SIGNATURE);
        data
    }

    #[test]
    fn parses_the_car_uri_record() {
        let uid = CarUid([0x04, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let record = NdefRecord::parse(&car_record(uid));

        let header = record.header.unwrap();
        assert!(header.message_begin);
        assert!(!header.message_end);
        assert!(header.short_record);
        assert_eq!(header.tnf, 1);
        assert_eq!(record.record_type.as_deref(), Some(&b"U"[..]));
        assert!(record.uri.as_deref().unwrap().starts_with("https://www.pid.mattel/"));
        assert_eq!(record.car_id.as_ref().map(String::len), Some(28));
        assert_eq!(
            record.identity,
            Some(CarIdentity {
                version: 2,
                model_id: 0x1f2e,
                flags: 1,
                uid,
            })
        );
        assert_eq!(record.trailer, SIGNATURE.to_vec());
    }

    #[test]
    fn truncated_record_keeps_what_arrived() {
        let uid = CarUid([1, 2, 3, 4, 5, 6]);
        let full = car_record(uid);
        let record = NdefRecord::parse(&full[..20]);
        assert_eq!(record.uri.as_deref(), Some("https://www.pid.mattel/AAIA"));
        assert_eq!(record.identity, None);
        assert!(record.trailer.is_empty());
    }

    #[test]
    fn header_only_is_not_an_error() {
        let record = NdefRecord::parse(&[0xd1]);
        assert!(record.header.is_some());
        assert_eq!(record.record_type, None);
        assert_eq!(record.uri, None);
    }

    #[test]
    fn non_uri_records_have_no_car_id() {
        // well-known text record "T"
        let record = NdefRecord::parse(&[0xd1, 0x01, 0x03, 0x54, 0x02, b'e', b'n']);
        assert_eq!(record.record_type.as_deref(), Some(&b"T"[..]));
        assert_eq!(record.uri, None);
        assert_eq!(record.car_id, None);
    }

    #[test]
    fn short_or_garbled_ids_have_no_identity() {
        assert_eq!(decode_identity("AAAA"), None);
        assert_eq!(decode_identity("not base64 at all!"), None);
    }
}
