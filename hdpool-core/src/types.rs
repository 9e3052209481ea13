//! Wire frame types for the HDPool WebSocket protocol
//!
//! Every message in either direction is one flat JSON object keyed by a
//! command string. There is no envelope, no protocol version field and no
//! server-guaranteed request id.
//!
//! # Outbound
//!
//! ```json
//! { "cmd": "apid.get_pool_stat", "chk": 1000, "mark": "bhd_co", "para": {} }
//! ```
//!
//! - `chk` is a client-chosen correlation token, usually a millisecond
//!   timestamp. The server may echo it back.
//! - `mark` selects a pool/coin context where the command needs one.
//! - `para` carries the command parameters and is omitted for commands that
//!   take none (the plain `online.heartbeat`, for instance).
//!
//! # Inbound
//!
//! ```json
//! { "cmd": "apid.get_pool_stat", "chk": "1000", "para": { "hashrate": 123 } }
//! { "cmd": "apid.get_pool_stat", "err": { "ret": "EFATAL", "msg": "boom" } }
//! ```
//!
//! The echoed `chk` is textual on the wire but older servers send it back as
//! a number, so it is kept as a raw JSON value and compared through
//! [`token_text`].

use crate::error::RemoteError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A frame sent to the pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundFrame {
    /// Command name
    pub cmd: String,

    /// Correlation token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chk: Option<i64>,

    /// Pool/coin context selector
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mark: Option<String>,

    /// Command parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub para: Option<Value>,
}

impl OutboundFrame {
    /// Create a frame carrying only a command name
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            chk: None,
            mark: None,
            para: None,
        }
    }

    /// Attach a correlation token
    pub fn with_chk(mut self, chk: i64) -> Self {
        self.chk = Some(chk);
        self
    }

    /// Attach a pool/coin context
    pub fn with_mark(mut self, mark: impl Into<String>) -> Self {
        self.mark = Some(mark.into());
        self
    }

    /// Attach command parameters
    pub fn with_para(mut self, para: Value) -> Self {
        self.para = Some(para);
        self
    }

    /// Textual form of the correlation token, if any
    pub fn token(&self) -> Option<String> {
        self.chk.map(|chk| chk.to_string())
    }
}

/// A frame received from the pool
///
/// Replies and unsolicited pushes share this shape; a push is simply a frame
/// no pending request is waiting for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundFrame {
    /// Command name (echo of the request's, or the push topic)
    ///
    /// Empty when the pool sends a bare `{err: ..}` frame.
    #[serde(default)]
    pub cmd: String,

    /// Echoed correlation token, string or number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chk: Option<Value>,

    /// Application payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub para: Option<Value>,

    /// Error indicator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<RemoteError>,
}

impl InboundFrame {
    /// Build a successful frame, mostly useful in tests and mock servers
    pub fn reply(cmd: impl Into<String>, para: Value) -> Self {
        Self {
            cmd: cmd.into(),
            chk: None,
            para: Some(para),
            err: None,
        }
    }

    /// Build an error frame
    pub fn failure(cmd: impl Into<String>, err: RemoteError) -> Self {
        Self {
            cmd: cmd.into(),
            chk: None,
            para: None,
            err: Some(err),
        }
    }

    /// Attach an echoed correlation token
    pub fn with_chk(mut self, chk: Value) -> Self {
        self.chk = Some(chk);
        self
    }

    /// Textual form of the echoed token, if any
    pub fn token(&self) -> Option<String> {
        self.chk.as_ref().and_then(token_text)
    }

    /// Whether the frame carries an error
    pub fn is_error(&self) -> bool {
        self.err.is_some()
    }

    /// Whether this frame is the terminal session-expiry signal
    pub fn is_session_expired(&self) -> bool {
        self.err.as_ref().is_some_and(RemoteError::is_session_expired)
    }

    /// Resolve the frame into the outcome of the request it answers
    ///
    /// An `err` object always wins over `para`. A success frame without
    /// `para` resolves to JSON `null`.
    pub fn into_outcome(self) -> std::result::Result<Value, RemoteError> {
        match self.err {
            Some(err) => Err(err),
            None => Ok(self.para.unwrap_or(Value::Null)),
        }
    }
}

/// Textual form of a correlation token
///
/// Strings compare by content and numbers by their decimal rendering, so
/// `"1000"` and `1000` are the same token. Anything else is not a token.
pub fn token_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outbound_omits_absent_fields() {
        let frame = OutboundFrame::new("online.heartbeat");
        let encoded = serde_json::to_string(&frame).unwrap();
        assert_eq!(encoded, r#"{"cmd":"online.heartbeat"}"#);
    }

    #[test]
    fn test_outbound_full_shape() {
        let frame = OutboundFrame::new("apid.get_pool_stat")
            .with_chk(1000)
            .with_mark("bhd_co")
            .with_para(json!({}));
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({"cmd": "apid.get_pool_stat", "chk": 1000, "mark": "bhd_co", "para": {}})
        );
        assert_eq!(frame.token(), Some("1000".to_string()));
    }

    #[test]
    fn test_inbound_token_tolerates_representation() {
        let as_string: InboundFrame =
            serde_json::from_value(json!({"cmd": "x", "chk": "1000"})).unwrap();
        let as_number: InboundFrame =
            serde_json::from_value(json!({"cmd": "x", "chk": 1000})).unwrap();
        assert_eq!(as_string.token(), as_number.token());
        assert_eq!(as_string.token(), Some("1000".to_string()));
    }

    #[test]
    fn test_token_text_rejects_non_scalars() {
        assert_eq!(token_text(&json!(null)), None);
        assert_eq!(token_text(&json!({"a": 1})), None);
        assert_eq!(token_text(&json!(true)), None);
    }

    #[test]
    fn test_into_outcome_success() {
        let frame = InboundFrame::reply("apid.get_pool_stat", json!({"hashrate": 123}));
        assert_eq!(frame.into_outcome().unwrap(), json!({"hashrate": 123}));
    }

    #[test]
    fn test_into_outcome_missing_para_is_null() {
        let frame: InboundFrame = serde_json::from_str(r#"{"cmd":"online.heartbeat"}"#).unwrap();
        assert_eq!(frame.into_outcome().unwrap(), Value::Null);
    }

    #[test]
    fn test_into_outcome_error_wins() {
        let frame: InboundFrame = serde_json::from_value(json!({
            "cmd": "apid.get_pool_stat",
            "para": {"hashrate": 1},
            "err": {"ret": "EFATAL", "msg": "boom"}
        }))
        .unwrap();
        let err = frame.into_outcome().unwrap_err();
        assert_eq!(err.msg, "boom");
    }

    #[test]
    fn test_bare_error_frame_has_empty_cmd() {
        let frame: InboundFrame =
            serde_json::from_str(r#"{"err":{"ret":"EFATAL","msg":"uid not equ. session"}}"#)
                .unwrap();
        assert_eq!(frame.cmd, "");
        assert!(frame.is_session_expired());
    }

    #[test]
    fn test_session_expired_frame() {
        let frame = InboundFrame::failure(
            "apid.get_uinfo",
            RemoteError::new("EFATAL", "uid not equ. session"),
        );
        assert!(frame.is_error());
        assert!(frame.is_session_expired());
    }
}
