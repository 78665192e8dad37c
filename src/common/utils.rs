//! Utility functions for shardkv

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};

/// Percent-encoding set for node addresses used as file names
const ADDRESS_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b'/')
    .add(b'\\')
    .add(b'%')
    .add(b' ')
    .add(b':')
    .add(b'?')
    .add(b'#')
    .add(b'*');

/// Percent-encoding set for keys placed in a URL path segment
const KEY_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b'/')
    .add(b'%')
    .add(b' ')
    .add(b'?')
    .add(b'#')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Encode a key as one URL path segment
pub fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, KEY_ENCODE_SET).to_string()
}

/// Encode a node address into a file-system safe name
pub fn encode_address(address: &str) -> String {
    utf8_percent_encode(address, ADDRESS_ENCODE_SET).to_string()
}

/// Decode a file name produced by `encode_address`
pub fn decode_address(encoded: &str) -> crate::Result<String> {
    percent_decode_str(encoded)
        .decode_utf8()
        .map(|s| s.to_string())
        .map_err(|e| crate::Error::Other(format!("Failed to decode address: {}", e)))
}

/// Current time as RFC 3339, used in health responses
pub fn timestamp_now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Role of a backing node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    #[serde(alias = "master")]
    Primary,
    #[serde(alias = "slave")]
    Standby,
}

impl NodeRole {
    pub fn flipped(&self) -> NodeRole {
        match self {
            NodeRole::Primary => NodeRole::Standby,
            NodeRole::Standby => NodeRole::Primary,
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Primary => write!(f, "primary"),
            NodeRole::Standby => write!(f, "standby"),
        }
    }
}

/// Validate a key or value before it reaches a node and its log.
///
/// Log records are whitespace-delimited, so tokens may not be empty or
/// contain whitespace.
pub fn validate_token(token: &str) -> crate::Result<()> {
    if token.is_empty() {
        return Err(crate::Error::InvalidToken("token cannot be empty".into()));
    }

    if token.len() > 1024 * 1024 {
        return Err(crate::Error::InvalidToken(
            "token too long (max 1 MiB)".into(),
        ));
    }

    if token.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(crate::Error::InvalidToken(format!(
            "token {:?} contains whitespace or control characters",
            token
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_key_keeps_one_segment() {
        assert_eq!(encode_key("path/to/key"), "path%2Fto%2Fkey");
        assert_eq!(encode_key("a?b#c%d"), "a%3Fb%23c%25d");
        assert_eq!(encode_key("plain-key_1"), "plain-key_1");
    }

    #[test]
    fn test_encode_decode_address() {
        let address = "10.0.0.1:6379";
        let encoded = encode_address(address);
        assert!(!encoded.contains(':'));
        assert_eq!(decode_address(&encoded).unwrap(), address);
    }

    #[test]
    fn test_encode_address_blocks_traversal() {
        let encoded = encode_address("../../etc/passwd");
        assert!(!encoded.contains('/'));
    }

    #[test]
    fn test_timestamp_is_rfc3339() {
        assert!(chrono::DateTime::parse_from_rfc3339(&timestamp_now()).is_ok());
    }

    #[test]
    fn test_node_role() {
        assert_eq!(NodeRole::Primary.flipped(), NodeRole::Standby);
        assert_eq!(NodeRole::Standby.flipped(), NodeRole::Primary);
        assert_eq!(NodeRole::Primary.to_string(), "primary");

        let legacy: NodeRole = serde_json::from_str("\"slave\"").unwrap();
        assert_eq!(legacy, NodeRole::Standby);
    }

    #[test]
    fn test_validate_token() {
        assert!(validate_token("normal-key").is_ok());
        assert!(validate_token("path/to/key").is_ok());
        assert!(validate_token("").is_err());
        assert!(validate_token("two words").is_err());
        assert!(validate_token("tab\there").is_err());
    }
}
