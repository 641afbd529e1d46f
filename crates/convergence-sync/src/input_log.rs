//! Per-frame, per-client input log.
//!
//! Backed by `BTreeMap`s end to end so both the outer frame iteration and
//! the inner client iteration come out in ascending order for free, which
//! is what deterministic replay requires.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LifecycleKind {
    Join,
    Leave,
    Disconnect,
    Reconnect,
    ResyncRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Payload {
    Lifecycle { kind: LifecycleKind, client_id: String },
    Command(serde_json::Value),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameInputs {
    pub inputs: BTreeMap<String, Payload>,
    pub confirmed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct InputLog {
    history: BTreeMap<u32, FrameInputs>,
}

impl InputLog {
    pub fn new() -> InputLog {
        InputLog::default()
    }

    /// Inserts or overwrites a single client's payload for `frame`.
    pub fn set(&mut self, frame: u32, client_id: &str, payload: Payload) {
        self.history
            .entry(frame)
            .or_default()
            .inputs
            .insert(client_id.to_owned(), payload);
    }

    /// Replaces the entire frame with authoritative data and marks it
    /// confirmed.
    pub fn confirm(&mut self, frame: u32, inputs: BTreeMap<String, Payload>) {
        self.history.insert(
            frame,
            FrameInputs {
                inputs,
                confirmed: true,
            },
        );
    }

    pub fn frame(&self, frame: u32) -> Option<&FrameInputs> {
        self.history.get(&frame)
    }

    /// Yields frames `a..=b` ascending; within each frame, the map
    /// iteration is already ascending by client_id.
    pub fn get_range(&self, a: u32, b: u32) -> Vec<(u32, &FrameInputs)> {
        self.history.range(a..=b).map(|(f, v)| (*f, v)).collect()
    }

    pub fn prune(&mut self, before: u32) {
        self.history = self.history.split_off(&before);
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}
