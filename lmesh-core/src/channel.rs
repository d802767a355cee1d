//! Radio channel identification

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, WireError};

/// Code of the well-known channel on which meshes announce their operating channel
pub const RENDEZVOUS_CODE: &str = "c000001a1744";

/// A radio channel, identified by a short code (frequency, rate and spreading factor)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelInfo(String);

impl ChannelInfo {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// The rendezvous channel every seeking node listens on
    pub fn rendezvous() -> Self {
        Self::new(RENDEZVOUS_CODE)
    }

    pub fn code(&self) -> &str {
        &self.0
    }

    pub fn is_rendezvous(&self) -> bool {
        self.0 == RENDEZVOUS_CODE
    }

    /// Rendezvous broadcasts carry the operating channel code as ASCII
    pub fn to_rendezvous_payload(&self) -> Vec<u8> {
        self.0.as_bytes().to_vec()
    }

    pub fn from_rendezvous_payload(payload: &[u8]) -> Result<Self> {
        let code = std::str::from_utf8(payload)
            .map_err(|_| WireError::MalformedPayload("rendezvous channel code"))?;
        if code.is_empty() {
            return Err(WireError::MalformedPayload("rendezvous channel code"));
        }
        Ok(Self::new(code))
    }
}

impl fmt::Display for ChannelInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rendezvous_payload() {
        let channel = ChannelInfo::new("c868000a0907");
        let payload = channel.to_rendezvous_payload();
        assert_eq!(ChannelInfo::from_rendezvous_payload(&payload).unwrap(), channel);
        assert!(!channel.is_rendezvous());
        assert!(ChannelInfo::rendezvous().is_rendezvous());
    }

    #[test]
    fn test_rejects_invalid_codes() {
        assert!(ChannelInfo::from_rendezvous_payload(&[]).is_err());
        assert!(ChannelInfo::from_rendezvous_payload(&[0xff, 0xfe]).is_err());
    }
}
