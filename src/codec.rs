use base64::Engine as _;
use serde_json::{Map, Value};
use sha2::{Digest as _, Sha256};

use crate::config::{CodecConfig, CodecKind};

/// Decoded session payload: session key name to stored value.
pub type Payload = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    InvalidBase64(String),
    MissingSignature,
    SignatureMismatch,
    InvalidJson(String),
    NotAnObject,
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidBase64(err) => write!(f, "invalid base64 payload: {err}"),
            Self::MissingSignature => f.write_str("signed payload has no `:` separator"),
            Self::SignatureMismatch => f.write_str("session payload signature does not match"),
            Self::InvalidJson(err) => write!(f, "invalid JSON payload: {err}"),
            Self::NotAnObject => f.write_str("session payload is not a JSON object"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Encoding used by the session store for the `session_data` column.
pub trait SessionCodec: Send + Sync {
    fn decode(&self, data: &[u8]) -> Result<Payload, CodecError>;

    fn encode(&self, payload: &Payload) -> Result<Vec<u8>, CodecError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl SessionCodec for JsonCodec {
    fn decode(&self, data: &[u8]) -> Result<Payload, CodecError> {
        parse_object(data)
    }

    fn encode(&self, payload: &Payload) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(payload).map_err(|err| CodecError::InvalidJson(err.to_string()))
    }
}

/// `base64("<hex sha256(secret || json)>:<json>")`. A format of its own, not
/// any web framework's signed cookie layout.
#[derive(Debug, Clone)]
pub struct SignedCodec {
    secret: Vec<u8>,
}

impl SignedCodec {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn signature(&self, serialized: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.secret);
        hasher.update(serialized);
        hex_encode(&hasher.finalize())
    }
}

impl SessionCodec for SignedCodec {
    fn decode(&self, data: &[u8]) -> Result<Payload, CodecError> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(data.trim_ascii())
            .map_err(|err| CodecError::InvalidBase64(err.to_string()))?;
        let separator = raw
            .iter()
            .position(|byte| *byte == b':')
            .ok_or(CodecError::MissingSignature)?;
        let (signature, serialized) = (&raw[..separator], &raw[separator + 1..]);

        if !constant_time_eq(self.signature(serialized).as_bytes(), signature) {
            return Err(CodecError::SignatureMismatch);
        }
        parse_object(serialized)
    }

    fn encode(&self, payload: &Payload) -> Result<Vec<u8>, CodecError> {
        let serialized =
            serde_json::to_vec(payload).map_err(|err| CodecError::InvalidJson(err.to_string()))?;
        let mut signed = self.signature(&serialized).into_bytes();
        signed.push(b':');
        signed.extend_from_slice(&serialized);
        Ok(base64::engine::general_purpose::STANDARD
            .encode(signed)
            .into_bytes())
    }
}

pub fn from_config(
    config: &CodecConfig,
    kind_override: Option<CodecKind>,
    secret_override: Option<&str>,
) -> anyhow::Result<Box<dyn SessionCodec>> {
    let kind = kind_override.or(config.kind).unwrap_or(CodecKind::Json);
    match kind {
        CodecKind::Json => Ok(Box::new(JsonCodec)),
        CodecKind::Signed => {
            let secret = secret_override
                .or(config.secret.as_deref())
                .filter(|secret| !secret.is_empty());
            let Some(secret) = secret else {
                anyhow::bail!("signed codec requires a secret; set `[codec].secret` or pass `--secret`");
            };
            Ok(Box::new(SignedCodec::new(secret)))
        }
    }
}

/// Size in bytes of `{key: value}` once encoded, i.e. what this one key
/// contributes to a session payload.
pub fn encoded_key_size(
    codec: &dyn SessionCodec,
    key: &str,
    value: &Value,
) -> Result<usize, CodecError> {
    let mut single = Payload::new();
    single.insert(key.to_owned(), value.clone());
    Ok(codec.encode(&single)?.len())
}

fn parse_object(data: &[u8]) -> Result<Payload, CodecError> {
    match serde_json::from_slice::<Value>(data) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(CodecError::NotAnObject),
        Err(err) => Err(CodecError::InvalidJson(err.to_string())),
    }
}

/// Compares every byte regardless of where the first difference is.
fn constant_time_eq(expected: &[u8], presented: &[u8]) -> bool {
    let max_len = expected.len().max(presented.len());
    let mut diff = expected.len() ^ presented.len();
    for idx in 0..max_len {
        let left = expected.get(idx).copied().unwrap_or(0);
        let right = presented.get(idx).copied().unwrap_or(0);
        diff |= usize::from(left ^ right);
    }
    diff == 0
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(char::from(HEX[(byte >> 4) as usize]));
        out.push(char::from(HEX[(byte & 0x0f) as usize]));
    }
    out
}
