// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Shared access signature (SAS) codec.
//!
//! A SAS token is a time-scoped bearer token:
//!
//! ```text
//! SharedAccessSignature sr=<encoded uri>&sig=<encoded signature>&se=<expiry>[&skn=<key name>]
//! ```
//!
//! The signature is `base64(HMAC-SHA256(base64decode(key), "<encoded uri>\n<expiry>"))`.
//! Signing through a remote endpoint uses the same assembly with an injected
//! signing function, see [`SharedAccessSignature::assemble`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{HubError, HubResult};

type HmacSha256 = Hmac<Sha256>;

/// Scheme prefix of a rendered token.
pub const SAS_SCHEME: &str = "SharedAccessSignature";

/// Fields every token must carry.
pub const REQUIRED_FIELDS: &[&str] = &["sr", "sig", "se"];

// =============================================================================
// URI encoding
// =============================================================================

/// Percent-encodes everything outside `A-Z a-z 0-9 - _ . ~`.
///
/// This is stricter than form encoding: `!'()*` are encoded as well.
pub fn encode_uri_component_strict(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len() * 3);
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

fn hex_value(digit: u8) -> Option<u8> {
    (digit as char).to_digit(16).map(|value| value as u8)
}

/// Decodes `%XX` escapes.
pub fn decode_uri_component(value: &str) -> HubResult<String> {
    let bytes = value.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'%' {
            let digits = bytes
                .get(index + 1..index + 3)
                .ok_or_else(|| HubError::format(format!("truncated escape in '{}'", value)))?;
            let (Some(high), Some(low)) = (hex_value(digits[0]), hex_value(digits[1])) else {
                return Err(HubError::format(format!(
                    "invalid escape '%{}' in '{}'",
                    String::from_utf8_lossy(digits),
                    value
                )));
            };
            decoded.push(high << 4 | low);
            index += 3;
        } else {
            decoded.push(bytes[index]);
            index += 1;
        }
    }

    String::from_utf8(decoded).map_err(|e| HubError::format(e.to_string()))
}

// =============================================================================
// Signing
// =============================================================================

/// Returns the string a signer must sign for a resource and expiry.
pub fn string_to_sign(encoded_resource_uri: &str, expiry: u64) -> String {
    format!("{}\n{}", encoded_resource_uri, expiry)
}

/// Computes `base64(HMAC-SHA256(base64decode(key), data))`.
pub fn hmac_sha256_base64(key: &str, data: &str) -> HubResult<String> {
    let key_bytes = BASE64
        .decode(key.trim())
        .map_err(|e| HubError::validation("key", format!("signing key is not valid base64: {}", e)))?;
    let mut mac = HmacSha256::new_from_slice(&key_bytes)
        .map_err(|e| HubError::signing(e.to_string()))?;
    mac.update(data.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

// =============================================================================
// SharedAccessSignature
// =============================================================================

/// A parsed or freshly signed SAS token.
///
/// `sr` and `sig` hold the values exactly as they appear in the token, i.e.
/// percent-encoded.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedAccessSignature {
    /// Encoded resource URI.
    pub sr: String,
    /// Encoded signature.
    pub sig: String,
    /// Expiry in seconds since the Unix epoch.
    pub se: u64,
    /// Optional key (policy) name.
    pub skn: Option<String>,
    /// Any other fields present in a parsed token.
    pub extra: BTreeMap<String, String>,
}

impl SharedAccessSignature {
    /// Signs a token locally with a base64-encoded key.
    pub fn create(
        resource_uri: &str,
        key_name: Option<&str>,
        key: &str,
        expiry: u64,
    ) -> HubResult<Self> {
        Self::assemble(resource_uri, key_name, expiry, |data| hmac_sha256_base64(key, data))
    }

    /// Builds a token around an injected signing function.
    ///
    /// `sign` receives the string to sign and returns the base64 signature.
    pub fn assemble<F>(
        resource_uri: &str,
        key_name: Option<&str>,
        expiry: u64,
        sign: F,
    ) -> HubResult<Self>
    where
        F: FnOnce(&str) -> HubResult<String>,
    {
        let sr = encode_uri_component_strict(resource_uri);
        let signature = sign(&string_to_sign(&sr, expiry))?;
        Ok(Self::from_signature(sr, &signature, key_name, expiry))
    }

    /// Builds a token from an already computed base64 signature.
    pub fn from_signature(
        encoded_resource_uri: String,
        signature: &str,
        key_name: Option<&str>,
        expiry: u64,
    ) -> Self {
        Self {
            sr: encoded_resource_uri,
            sig: encode_uri_component_strict(signature),
            se: expiry,
            skn: key_name.map(encode_uri_component_strict),
            extra: BTreeMap::new(),
        }
    }

    /// Parses a token, requiring `sr`, `sig` and `se`.
    pub fn parse(source: &str) -> HubResult<Self> {
        Self::parse_with(source, REQUIRED_FIELDS)
    }

    /// Parses a token, failing if any of `required` is missing.
    ///
    /// The `SharedAccessSignature ` prefix is optional.
    pub fn parse_with(source: &str, required: &[&str]) -> HubResult<Self> {
        let trimmed = source.trim();
        let body = match trimmed.split_once(char::is_whitespace) {
            Some((scheme, rest)) if scheme == SAS_SCHEME => rest.trim(),
            Some((scheme, _)) => {
                return Err(HubError::format(format!("unexpected token scheme '{}'", scheme)))
            }
            None => trimmed,
        };

        let mut fields = BTreeMap::new();
        for part in body.split('&').filter(|part| !part.is_empty()) {
            let (name, value) = part
                .split_once('=')
                .ok_or_else(|| HubError::format(format!("malformed token field '{}'", part)))?;
            fields.insert(name.to_string(), value.to_string());
        }

        for field in required {
            if !fields.contains_key(*field) {
                return Err(HubError::format(format!(
                    "shared access signature is missing required field '{}'",
                    field
                )));
            }
        }

        let se = match fields.remove("se") {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|_| HubError::format(format!("invalid expiry '{}'", raw)))?,
            None => 0,
        };

        Ok(Self {
            sr: fields.remove("sr").unwrap_or_default(),
            sig: fields.remove("sig").unwrap_or_default(),
            se,
            skn: fields.remove("skn"),
            extra: fields,
        })
    }

    /// Returns the decoded resource URI.
    pub fn resource_uri(&self) -> HubResult<String> {
        decode_uri_component(&self.sr)
    }

    /// Returns `true` if the token expired at or before `now` (epoch seconds).
    pub fn is_expired(&self, now: u64) -> bool {
        self.se <= now
    }

    /// Returns the seconds left before expiry, saturating at zero.
    pub fn remaining_secs(&self, now: u64) -> u64 {
        self.se.saturating_sub(now)
    }
}

impl fmt::Display for SharedAccessSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sr={}&sig={}&se={}", SAS_SCHEME, self.sr, self.sig, self.se)?;
        if let Some(ref skn) = self.skn {
            write!(f, "&skn={}", skn)?;
        }
        for (name, value) in &self.extra {
            write!(f, "&{}={}", name, value)?;
        }
        Ok(())
    }
}

// The signature is a bearer secret.
impl fmt::Debug for SharedAccessSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedAccessSignature")
            .field("sr", &self.sr)
            .field("sig", &"<redacted>")
            .field("se", &self.se)
            .field("skn", &self.skn)
            .finish()
    }
}

impl FromStr for SharedAccessSignature {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// =============================================================================
// Tests
// =============================================================================
