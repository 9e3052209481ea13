//! Codec for HDPool frames
//!
//! Thin wrappers over `serde_json` that map failures onto
//! [`Error::Serialization`] and reject payloads that are valid JSON but not a
//! frame: arrays, scalars, and objects carrying neither `cmd` nor `err`. The
//! pool sends the session-expiry error as a bare `{err: ..}` object, so `cmd`
//! alone is not required.
//!
//! # Examples
//!
//! ```rust
//! use hdpool_core::{codec, OutboundFrame};
//!
//! let frame = OutboundFrame::new("apid.get_pool_stat").with_chk(1000);
//! let text = codec::encode(&frame).unwrap();
//!
//! let reply = codec::decode(r#"{"cmd":"apid.get_pool_stat","chk":"1000","para":{}}"#).unwrap();
//! assert_eq!(reply.cmd, "apid.get_pool_stat");
//! # let _ = text;
//! ```

use crate::error::{Error, Result};
use crate::types::{InboundFrame, OutboundFrame};
use serde_json::Value;

/// Encode an outbound frame as JSON text
pub fn encode(frame: &OutboundFrame) -> Result<String> {
    serde_json::to_string(frame).map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode one inbound text frame
///
/// The payload is parsed as a generic value first so that the error can say
/// whether the text was not JSON at all or just not shaped like a frame.
pub fn decode(text: &str) -> Result<InboundFrame> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| Error::Serialization(format!("invalid JSON frame: {}", e)))?;

    if !value.is_object() {
        return Err(Error::Serialization(
            "frame is not a JSON object".to_string(),
        ));
    }

    if value.get("cmd").is_none() && value.get("err").is_none() {
        return Err(Error::Serialization(
            "malformed frame: neither cmd nor err".to_string(),
        ));
    }

    serde_json::from_value(value)
        .map_err(|e| Error::Serialization(format!("malformed frame: {}", e)))
}
