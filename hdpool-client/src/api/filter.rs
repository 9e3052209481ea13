//! Block height drift filter for mining pushes
//!
//! `poolmgr.mining_info` is pushed on every new block. A frame whose height
//! jumps by more than the threshold from the last seen one is dropped, but
//! its height still becomes the reference, so a genuine jump costs exactly
//! one frame. The first frame after a (re)connect is always accepted: the
//! mining façade resets the filter on `"websocket/opened"`.

use serde_json::Value;
use std::sync::Mutex;

/// Maximum accepted height change between consecutive pushes
pub const DEFAULT_HEIGHT_THRESHOLD: u64 = 20;

/// Rejects pushes whose `height` drifts too far from the last seen one
#[derive(Debug)]
pub struct HeightFilter {
    threshold: u64,
    last: Mutex<Option<u64>>,
}

impl HeightFilter {
    /// Create a filter with the given threshold
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold,
            last: Mutex::new(None),
        }
    }

    /// Decide on one push payload and remember its height either way
    ///
    /// Payloads without a readable `height` pass through untouched.
    pub fn accept(&self, para: &Value) -> bool {
        let Some(height) = height_of(para) else {
            return true;
        };

        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        let previous = last.replace(height);
        previous.map_or(true, |previous| previous.abs_diff(height) <= self.threshold)
    }

    /// Forget the last height
    pub fn reset(&self) {
        *self.last.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }

    /// Last seen height
    pub fn last_height(&self) -> Option<u64> {
        *self.last.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Configured threshold
    pub fn threshold(&self) -> u64 {
        self.threshold
    }
}

impl Default for HeightFilter {
    fn default() -> Self {
        Self::new(DEFAULT_HEIGHT_THRESHOLD)
    }
}

// Heights arrive as numbers, or as numeric strings from older pool builds
fn height_of(para: &Value) -> Option<u64> {
    match para.get("height")? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
