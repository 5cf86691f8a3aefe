//! Client identities derived from X.509 certificate subjects.
//!
//! An identity is the comma-joined list of `key=value` pairs for every
//! recognized subject attribute, in the order the certificate stores them:
//!
//! ```text
//! C=DE,O=Example_Corp,CN=build-host-01
//! ```
//!
//! Values are sanitized byte-wise so the identity can be used verbatim as a
//! single filesystem path segment: every byte outside `[A-Za-z0-9_-]`
//! becomes `_`. Unrecognized attributes are dropped.

use crate::error::{Error, Result};
use std::borrow::Cow;
use x509_parser::der_parser::asn1_rs::Tag;
use x509_parser::pem::Pem;
use x509_parser::x509::{AttributeTypeAndValue, X509Name};

/// Recognized subject attributes: dotted OID and the key written for it.
pub const IDENTITY_FIELDS: [(&str, &str); 9] = [
    ("2.5.4.6", "C"),   // country
    ("2.5.4.10", "O"),  // organization
    ("2.5.4.11", "OU"), // organizational unit
    ("2.5.4.3", "CN"),  // common name
    ("2.5.4.5", "SN"),  // serial number
    ("2.5.4.7", "L"),   // locality
    ("2.5.4.8", "P"),   // state or province
    ("2.5.4.9", "S"),   // street address
    ("2.5.4.17", "PC"), // postal code
];

/// Short key for a dotted attribute OID, if recognized.
pub fn identity_key(oid: &str) -> Option<&'static str> {
    IDENTITY_FIELDS
        .iter()
        .find(|(known, _)| *known == oid)
        .map(|(_, key)| *key)
}

/// Build an identity from `(dotted OID, raw value)` pairs in subject order.
pub fn identity_from_attributes<O, V>(attributes: impl IntoIterator<Item = (O, V)>) -> String
where
    O: AsRef<str>,
    V: AsRef<[u8]>,
{
    let mut out = String::new();
    for (oid, value) in attributes {
        let Some(key) = identity_key(oid.as_ref()) else {
            continue;
        };
        if !out.is_empty() {
            out.push(',');
        }
        out.push_str(key);
        out.push('=');
        out.extend(value.as_ref().iter().copied().map(sanitize_byte));
    }
    out
}

/// Build an identity from a parsed certificate subject.
pub fn identity_from_name(name: &X509Name<'_>) -> String {
    identity_from_attributes(
        name.iter_rdn()
            .flat_map(|rdn| rdn.iter())
            .map(|attr| (attr.attr_type().to_id_string(), attribute_value(attr))),
    )
}

/// Content bytes of an attribute value, as UTF-8 for the wide string types.
///
/// `BMPString` (UCS-2) and `UniversalString` (UCS-4) are decoded; every
/// other type is used as stored.
fn attribute_value<'a>(attr: &AttributeTypeAndValue<'a>) -> Cow<'a, [u8]> {
    let value = attr.attr_value();
    let data: &'a [u8] = value.data;
    match value.header.tag() {
        Tag::BmpString => {
            let units = data
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
            let text: String = char::decode_utf16(units)
                .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect();
            Cow::Owned(text.into_bytes())
        }
        Tag::UniversalString => {
            let text: String = data
                .chunks_exact(4)
                .map(|quad| {
                    char::from_u32(u32::from_be_bytes([quad[0], quad[1], quad[2], quad[3]]))
                        .unwrap_or(char::REPLACEMENT_CHARACTER)
                })
                .collect();
            Cow::Owned(text.into_bytes())
        }
        _ => Cow::Borrowed(data),
    }
}

/// Build an identity from a DER-encoded certificate.
///
/// Returns an empty identity if the certificate cannot be parsed.
pub fn identity_from_der(der: &[u8]) -> String {
    match x509_parser::parse_x509_certificate(der) {
        Ok((_, cert)) => identity_from_name(cert.subject()),
        Err(e) => {
            tracing::debug!(error = %e, "Failed to parse peer certificate, using empty identity");
            String::new()
        }
    }
}

/// Build an identity from the first `CERTIFICATE` block of PEM input.
pub fn identity_from_pem(pem: &[u8]) -> Result<String> {
    for block in Pem::iter_from_buffer(pem) {
        let block = block.map_err(|e| Error::InvalidCertificate(e.to_string()))?;
        if block.label != "CERTIFICATE" {
            continue;
        }
        let cert = block
            .parse_x509()
            .map_err(|e| Error::InvalidCertificate(e.to_string()))?;
        return Ok(identity_from_name(cert.subject()));
    }
    Err(Error::NoCertificate)
}

fn sanitize_byte(b: u8) -> char {
    if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' {
        b as char
    } else {
        '_'
    }
}
