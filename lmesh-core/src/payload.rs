//! Payload layouts for the protocol's structured messages
//!
//! Payloads are tiny (at most a dozen bytes on air), so every layout is a
//! fixed sequence of bytes with identities in big-endian order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, WireError};
use crate::wire::Header;

const IDENTITY_LEN: usize = 8;

fn read_identity(bytes: &[u8], what: &'static str) -> Result<u64> {
    let raw: [u8; IDENTITY_LEN] = bytes
        .get(..IDENTITY_LEN)
        .and_then(|slice| slice.try_into().ok())
        .ok_or(WireError::MalformedPayload(what))?;
    Ok(u64::from_be_bytes(raw))
}

fn tagged(tag: u8, identity: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + IDENTITY_LEN);
    out.push(tag);
    out.extend_from_slice(&identity.to_be_bytes());
    out
}

/// Hello payload of a node asking to join: `[0, identity]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub identity: u64,
}

impl JoinRequest {
    pub fn encode(&self) -> Vec<u8> {
        tagged(0, self.identity)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let body = bytes.get(1..).ok_or(WireError::MalformedPayload("join request"))?;
        Ok(Self {
            identity: read_identity(body, "join request")?,
        })
    }
}

/// Upward report of a heard join volley: `[reliability, identity]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinReport {
    /// Share of the volley that was heard, scaled to 0..=255
    pub reliability: u8,
    pub identity: u64,
}

impl JoinReport {
    /// Build a report from the number of Hellos heard out of a volley
    pub fn from_volley(heard: u32, volley: u32, identity: u64) -> Self {
        let volley = volley.max(1);
        let reliability = (255 * heard.min(volley) / volley) as u8;
        Self {
            reliability,
            identity,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        tagged(self.reliability, self.identity)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (&reliability, body) = bytes
            .split_first()
            .ok_or(WireError::MalformedPayload("join report"))?;
        Ok(Self {
            reliability,
            identity: read_identity(body, "join report")?,
        })
    }
}

/// Downward join acceptance: `[assigned address, identity]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invite {
    pub assigned: u8,
    pub identity: u64,
}

impl Invite {
    pub fn encode(&self) -> Vec<u8> {
        tagged(self.assigned, self.identity)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (&assigned, body) = bytes.split_first().ok_or(WireError::MalformedPayload("invite"))?;
        Ok(Self {
            assigned,
            identity: read_identity(body, "invite")?,
        })
    }
}

/// Quantize a reliability in [0, 1] to one byte
pub fn quantize(reliability: f64) -> u8 {
    (reliability.clamp(0.0, 1.0) * 255.0).round() as u8
}

pub fn dequantize(byte: u8) -> f64 {
    byte as f64 / 255.0
}

/// Encode link estimates as `(neighbor, quantized reliability)` pairs
pub fn encode_link_report(links: &BTreeMap<u8, f64>) -> Vec<u8> {
    links
        .iter()
        .flat_map(|(&neighbor, &reliability)| [neighbor, quantize(reliability)])
        .collect()
}

pub fn decode_link_report(bytes: &[u8]) -> Result<BTreeMap<u8, f64>> {
    if bytes.len() % 2 != 0 {
        return Err(WireError::MalformedPayload("link report"));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| (pair[0], dequantize(pair[1])))
        .collect())
}

/// Encode tracing headers announced in a Hello as `(address byte, counter)` pairs
pub fn encode_trace_announcements(headers: &[Header]) -> Vec<u8> {
    headers
        .iter()
        .flat_map(|header| [header.address(), header.counter()])
        .collect()
}

pub fn decode_trace_announcements(bytes: &[u8]) -> Result<Vec<Header>> {
    if bytes.len() % 2 != 0 {
        return Err(WireError::MalformedPayload("trace announcement"));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| Header::tracing(pair[0], pair[1]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{DOWNWARDS_KEY, RESOLVED_BIT};

    #[test]
    fn test_join_request_layout() {
        let request = JoinRequest {
            identity: 0x0102_0304_0506_0708,
        };
        let bytes = request.encode();
        assert_eq!(bytes, vec![0, 1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(JoinRequest::decode(&bytes).unwrap(), request);
        assert!(JoinRequest::decode(&bytes[..5]).is_err());
        assert!(JoinRequest::decode(&[]).is_err());
    }

    #[test]
    fn test_join_report_scaling() {
        assert_eq!(JoinReport::from_volley(10, 10, 1).reliability, 255);
        assert_eq!(JoinReport::from_volley(5, 10, 1).reliability, 127);
        assert_eq!(JoinReport::from_volley(14, 10, 1).reliability, 255);
        assert_eq!(JoinReport::from_volley(0, 0, 1).reliability, 0);

        let report = JoinReport::from_volley(8, 10, 42);
        assert_eq!(JoinReport::decode(&report.encode()).unwrap(), report);
    }

    #[test]
    fn test_invite_decode_rejects_short_payload() {
        let invite = Invite {
            assigned: 7,
            identity: u64::MAX,
        };
        assert_eq!(Invite::decode(&invite.encode()).unwrap(), invite);
        assert_eq!(
            Invite::decode(&[7, 1, 2]),
            Err(WireError::MalformedPayload("invite"))
        );
    }

    #[test]
    fn test_link_report_quantization() {
        let links = BTreeMap::from([(2u8, 1.0), (5, 0.5), (9, 0.0)]);
        let bytes = encode_link_report(&links);
        assert_eq!(bytes, vec![2, 255, 5, 128, 9, 0]);

        let decoded = decode_link_report(&bytes).unwrap();
        assert_eq!(decoded[&2], 1.0);
        assert!((decoded[&5] - 0.5).abs() < 0.01);
        assert!(decode_link_report(&[1]).is_err());
    }

    #[test]
    fn test_trace_announcements_keep_resolved_bit() {
        let pending = Header::tracing(4 | DOWNWARDS_KEY, 17);
        let resolved = Header::tracing(6, 3).with_resolved();
        let bytes = encode_trace_announcements(&[pending, resolved]);

        let decoded = decode_trace_announcements(&bytes).unwrap();
        assert_eq!(decoded, vec![pending, resolved]);
        assert_ne!(decoded[1].bits() & RESOLVED_BIT, 0);
    }
}
