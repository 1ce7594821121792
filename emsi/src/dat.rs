//! `EMSI_DAT` framing and payload (spec §3/§4.1/§4.2).
//!
//! Framing: `**EMSI_DAT` + 4 hex length digits + payload + 4 hex CRC + CR.
//! The payload itself is an ordered list of brace-delimited fields; FSC-0088
//! extends field *contents* but not the framing, so parsing stays
//! positional rather than name/value.

use std::fmt;
use std::time::Duration;

use fidotest_common::Address;

use crate::crc::crc16_hex;
use crate::reader::CharReader;
use tokio::io::AsyncRead;

/// Cap on `payload_len` (spec §8 boundary: 8192 valid, 8193 rejected).
pub const MAX_PAYLOAD_LEN: usize = 8192;

/// Sysop/system identity sub-record, the `IDENT` field of an `EMSI_DAT`
/// payload (spec §4.2's field order).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentRecord {
    pub system: String,
    pub location: String,
    pub sysop: String,
    pub phone: String,
    pub speed: String,
    pub flags: Vec<String>,
}

impl fmt::Display for IdentRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}][{}][{}][{}][{}][{}]",
            self.system,
            self.location,
            self.sysop,
            self.phone,
            self.speed,
            self.flags.join(","),
        )
    }
}

/// The parsed `EMSI_DAT` payload (spec §3's "EMSI Data" entity).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmsiData {
    pub addresses: Vec<Address>,
    pub password: String,
    pub link_codes: Vec<String>,
    pub compat_codes: Vec<String>,
    pub mailer_product_code: String,
    pub mailer_name: String,
    pub mailer_version: String,
    pub mailer_serial: String,
    pub ident: IdentRecord,
    /// Optional trailer fields some mailers append after IDENT.
    pub trx: Option<String>,
    pub moh: Option<String>,
    pub traf: Option<String>,
    pub ohfr: Option<String>,
}

/// Errors from parsing or validating an `EMSI_DAT` packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatError {
    /// Length field wasn't 4 hex digits, or exceeded [`MAX_PAYLOAD_LEN`].
    BadLength(String),
    /// CRC mismatch even after the FrontDoor trailing-CR tolerance.
    CrcMismatch { expected: String, computed: String },
    /// Payload didn't parse into well-formed brace fields.
    Malformed(String),
    Timeout,
    CarrierLost,
    IoError(String),
}

impl fmt::Display for DatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatError::BadLength(s) => write!(f, "bad EMSI_DAT length field: {s}"),
            DatError::CrcMismatch { expected, computed } => {
                write!(f, "EMSI_DAT CRC mismatch: expected {expected}, computed {computed}")
            }
            DatError::Malformed(s) => write!(f, "malformed EMSI_DAT payload: {s}"),
            DatError::Timeout => write!(f, "timeout reading EMSI_DAT"),
            DatError::CarrierLost => write!(f, "carrier lost reading EMSI_DAT"),
            DatError::IoError(e) => write!(f, "I/O error reading EMSI_DAT: {e}"),
        }
    }
}

impl std::error::Error for DatError {}

/// Split a payload into its brace-delimited fields, in order, tolerating
/// empty fields (`{}`). Content between fields (should be none) is ignored.
fn split_braced_fields(payload: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in payload.chars() {
        match c {
            '{' => {
                depth += 1;
                if depth == 1 {
                    current.clear();
                }
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        fields.push(std::mem::take(&mut current));
                    }
                }
            }
            _ if depth > 0 => current.push(c),
            _ => {}
        }
    }
    fields
}

fn split_comma_list(s: &str) -> Vec<String> {
    if s.is_empty() {
        Vec::new()
    } else {
        s.split(',').map(|p| p.trim().to_string()).collect()
    }
}

/// Parse a raw `EMSI_DAT` payload string (already CRC-validated) into
/// structured [`EmsiData`].
pub fn parse_emsi_data(payload: &str) -> Result<EmsiData, DatError> {
    let fields = split_braced_fields(payload);
    if fields.len() < 9 {
        return Err(DatError::Malformed(format!(
            "expected at least 9 braced fields, found {}",
            fields.len()
        )));
    }
    if fields[0] != "EMSI" {
        return Err(DatError::Malformed(format!(
            "expected leading {{EMSI}} marker, found {{{}}}",
            fields[0]
        )));
    }

    let addresses = split_comma_list(&fields[1])
        .iter()
        .filter_map(|s| s.parse::<Address>().ok())
        .collect();
    let password = fields[2].clone();
    let link_codes = split_comma_list(&fields[3]);
    let compat_codes = split_comma_list(&fields[4]);
    let mailer_product_code = fields[5].clone();
    let mailer_name = fields[6].clone();
    let mailer_version = fields[7].clone();
    let mailer_serial = fields[8].clone();

    // IDENT is itself a bracket-delimited sextuplet rather than a brace
    // field, per FSC-0056: `[system][location][sysop][phone][speed][flags]`.
    let ident_raw = fields.get(9).cloned().unwrap_or_default();
    let ident = parse_ident(&ident_raw)?;

    let mut trx = None;
    let mut moh = None;
    let mut traf = None;
    let mut ohfr = None;
    for extra in fields.iter().skip(10) {
        if let Some(v) = extra.strip_prefix("TRX#") {
            trx = Some(v.to_string());
        } else if let Some(v) = extra.strip_prefix("MOH#") {
            moh = Some(v.to_string());
        } else if let Some(v) = extra.strip_prefix("TRAF") {
            traf = Some(v.to_string());
        } else if let Some(v) = extra.strip_prefix("OHFR") {
            ohfr = Some(v.to_string());
        }
    }

    Ok(EmsiData {
        addresses,
        password,
        link_codes,
        compat_codes,
        mailer_product_code,
        mailer_name,
        mailer_version,
        mailer_serial,
        ident,
        trx,
        moh,
        traf,
        ohfr,
    })
}

fn split_bracket_fields(s: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in s.chars() {
        match c {
            '[' => {
                depth += 1;
                if depth == 1 {
                    current.clear();
                }
            }
            ']' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        fields.push(std::mem::take(&mut current));
                    }
                }
            }
            _ if depth > 0 => current.push(c),
            _ => {}
        }
    }
    fields
}

fn parse_ident(raw: &str) -> Result<IdentRecord, DatError> {
    let parts = split_bracket_fields(raw);
    if parts.len() < 6 {
        return Err(DatError::Malformed(format!(
            "IDENT field expects 6 bracketed parts, found {}",
            parts.len()
        )));
    }
    Ok(IdentRecord {
        system: parts[0].clone(),
        location: parts[1].clone(),
        sysop: parts[2].clone(),
        phone: parts[3].clone(),
        speed: parts[4].clone(),
        flags: split_comma_list(&parts[5]),
    })
}

/// Render [`EmsiData`] back into a brace-delimited payload string, in the
/// exact field order FSC-0056 mandates (spec §4.2).
#[must_use]
pub fn build_payload(data: &EmsiData) -> String {
    let addresses = data
        .addresses
        .iter()
        .map(std::string::ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");

    let mut out = String::new();
    out.push_str("{EMSI}");
    out.push('{');
    out.push_str(&addresses);
    out.push('}');
    out.push('{');
    out.push_str(&data.password);
    out.push('}');
    out.push('{');
    out.push_str(&data.link_codes.join(","));
    out.push('}');
    out.push('{');
    out.push_str(&data.compat_codes.join(","));
    out.push('}');
    out.push('{');
    out.push_str(&data.mailer_product_code);
    out.push('}');
    out.push('{');
    out.push_str(&data.mailer_name);
    out.push('}');
    out.push('{');
    out.push_str(&data.mailer_version);
    out.push('}');
    out.push('{');
    out.push_str(&data.mailer_serial);
    out.push('}');
    out.push('{');
    out.push_str(&data.ident.to_string());
    out.push('}');

    if let Some(v) = &data.trx {
        out.push_str(&format!("{{TRX#{v}}}"));
    }
    if let Some(v) = &data.moh {
        out.push_str(&format!("{{MOH#{v}}}"));
    }
    if let Some(v) = &data.traf {
        out.push_str(&format!("{{TRAF{v}}}"));
    }
    if let Some(v) = &data.ohfr {
        out.push_str(&format!("{{OHFR{v}}}"));
    }
    out
}

/// Build the complete on-wire `EMSI_DAT` packet, ready to write followed by
/// a CR (spec §4.2: "Emit `**` + that + CRC hex + CR").
#[must_use]
pub fn build_emsi_dat_packet(data: &EmsiData) -> String {
    let payload = build_payload(data);
    let len_hex = format!("{:04X}", payload.len());
    let crc_input = format!("EMSI_DAT{len_hex}{payload}");
    let crc = crc16_hex(crc_input.as_bytes());
    format!("**EMSI_DAT{len_hex}{payload}{crc}")
}

impl<S: AsyncRead + Unpin> CharReader<S> {
    /// `read_emsi_dat(char_timeout)` — spec §4.1. Must be called
    /// immediately after `read_token` returns `Token::Dat`; the length
    /// digits were deliberately left unconsumed (invariant 5).
    pub async fn read_emsi_dat(
        &mut self,
        step_deadline_in: Duration,
        char_timeout: Duration,
    ) -> Result<(String, EmsiData), DatError> {
        let step_deadline = std::time::Instant::now() + step_deadline_in.min(self.remaining_master());
        let char_timeout = char_timeout.min(crate::reader::ABSOLUTE_CHAR_CEILING);

        let mut len_digits = String::with_capacity(4);
        for _ in 0..4 {
            let b = self
                .next_stream_byte(step_deadline, char_timeout)
                .await
                .map_err(token_to_dat_error)?;
            len_digits.push(b as char);
        }
        if !len_digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DatError::BadLength(len_digits));
        }
        let payload_len = usize::from_str_radix(&len_digits, 16)
            .map_err(|_| DatError::BadLength(len_digits.clone()))?;
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(DatError::BadLength(format!(
                "{payload_len} exceeds cap of {MAX_PAYLOAD_LEN}"
            )));
        }

        let mut payload_bytes = Vec::with_capacity(payload_len);
        for _ in 0..payload_len {
            let b = self
                .next_stream_byte(step_deadline, char_timeout)
                .await
                .map_err(token_to_dat_error)?;
            payload_bytes.push(b);
        }

        let mut crc_digits = String::with_capacity(4);
        for _ in 0..4 {
            let b = self
                .next_stream_byte(step_deadline, char_timeout)
                .await
                .map_err(token_to_dat_error)?;
            crc_digits.push(b as char);
        }
        let crc_expected = crc_digits.to_uppercase();

        let crc_input = |body: &[u8]| -> String {
            let mut buf = Vec::with_capacity(8 + 4 + body.len());
            buf.extend_from_slice(b"EMSI_DAT");
            buf.extend_from_slice(len_digits.as_bytes());
            buf.extend_from_slice(body);
            crc16_hex(&buf)
        };

        let computed = crc_input(&payload_bytes);
        let accepted_payload = if computed == crc_expected {
            payload_bytes.clone()
        } else if payload_bytes.last() == Some(&b'\r') {
            let trimmed = &payload_bytes[..payload_bytes.len() - 1];
            let retry = crc_input(trimmed);
            if retry == crc_expected {
                trimmed.to_vec()
            } else {
                return Err(DatError::CrcMismatch {
                    expected: crc_expected,
                    computed,
                });
            }
        } else {
            return Err(DatError::CrcMismatch {
                expected: crc_expected,
                computed,
            });
        };

        let payload_str = String::from_utf8_lossy(&accepted_payload).into_owned();
        let data = parse_emsi_data(&payload_str)?;
        let packet_string = format!("**EMSI_DAT{len_digits}{payload_str}{crc_expected}");
        Ok((packet_string, data))
    }
}

fn token_to_dat_error(tok: crate::token::Token) -> DatError {
    match tok {
        crate::token::Token::Timeout => DatError::Timeout,
        crate::token::Token::CarrierLost => DatError::CarrierLost,
        crate::token::Token::IoError(e) => DatError::IoError(e),
        other => DatError::IoError(format!("unexpected token mid-DAT: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_data() -> EmsiData {
        EmsiData {
            addresses: vec!["2:5001/100".parse().unwrap()],
            password: String::new(),
            link_codes: vec!["8N1".to_string()],
            compat_codes: vec!["NCP".to_string()],
            mailer_product_code: "FE".to_string(),
            mailer_name: "FidoTest".to_string(),
            mailer_version: "1.0".to_string(),
            mailer_serial: "00000000".to_string(),
            ident: IdentRecord {
                system: "Test System".to_string(),
                location: "Nowhere".to_string(),
                sysop: "Sysop".to_string(),
                phone: "-Unpublished-".to_string(),
                speed: "33600".to_string(),
                flags: vec!["XX".to_string()],
            },
            trx: None,
            moh: None,
            traf: None,
            ohfr: None,
        }
    }

    #[test]
    fn build_then_parse_round_trips() {
        let data = sample_data();
        let payload = build_payload(&data);
        let parsed = parse_emsi_data(&payload).unwrap();
        assert_eq!(parsed, data);
    }

    #[test]
    fn built_packet_has_self_consistent_crc() {
        let data = sample_data();
        let packet = build_emsi_dat_packet(&data);
        assert!(packet.starts_with("**EMSI_DAT"));
        let len_hex = &packet[10..14];
        let len = usize::from_str_radix(len_hex, 16).unwrap();
        let payload = &packet[14..14 + len];
        let crc_tail = &packet[14 + len..];
        let expect = crc16_hex(format!("EMSI_DAT{len_hex}{payload}").as_bytes());
        assert_eq!(crc_tail, expect);
    }

    #[test]
    fn rejects_missing_emsi_marker() {
        let bogus = "{NOPE}{}{}{}{}{}{}{}{}{[][][][][][] }";
        assert!(parse_emsi_data(bogus).is_err());
    }

    #[test]
    fn empty_payload_is_zero_length_and_valid_crc() {
        let len_hex = "0000";
        let crc = crc16_hex(format!("EMSI_DAT{len_hex}").as_bytes());
        assert_eq!(crc.len(), 4);
    }
}
