//! Client-side bootstrap decision.
//!
//! A served document either carries an initial-data payload (an SEO route
//! rendered on the server) or still assigns `undefined` (bare SPA shell).
//! The browser binding reads that once at load and mounts accordingly:
//! hydrate the server markup, or render fresh into the empty root.

use serde::Deserialize;
use serde_json::Value;

use crate::template::INITIAL_DATA_GLOBAL;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountStrategy {
    /// Reconcile with the server-rendered markup, keeping it.
    Hydrate,
    /// Replace whatever placeholder markup the root holds.
    FreshRender,
}

/// The browser side of mounting. Implemented by the client binding.
pub trait Mount {
    /// Attach to existing server markup using `initial_data`.
    fn hydrate(&mut self, initial_data: &Value);
    /// Clear the root mount point and render from scratch.
    fn render_fresh(&mut self);
}

/// Read the payload assigned to `window.__INITIAL_DATA__` in `document`.
///
/// Only an assignment that opens its own `<script>` element counts; the same
/// text inside rendered markup is ignored. Returns `Ok(None)` when there is
/// no such assignment or it is still `undefined`.
pub fn read_initial_data(document: &str) -> Result<Option<Value>, serde_json::Error> {
    let assignment = format!("{INITIAL_DATA_GLOBAL} = ");
    let Some(at) = document
        .match_indices(&assignment)
        .map(|(at, _)| at)
        .find(|&at| opens_script(&document[..at]))
    else {
        return Ok(None);
    };
    let rest = document[at + assignment.len()..].trim_start();
    if rest.starts_with("undefined") {
        return Ok(None);
    }

    // Parse one value; whatever follows (`;`, `</script>`) is not JSON.
    let mut de = serde_json::Deserializer::from_str(rest);
    Value::deserialize(&mut de).map(Some)
}

/// Whether `before` ends with a `<script ...>` start tag.
fn opens_script(before: &str) -> bool {
    let before = before.trim_end();
    if !before.ends_with('>') {
        return false;
    }
    let Some(start) = before.rfind('<') else {
        return false;
    };
    let tag = before[start + 1..].to_ascii_lowercase();
    tag.strip_prefix("script")
        .is_some_and(|rest| rest.starts_with('>') || rest.starts_with(char::is_whitespace))
}

/// One-shot bootstrap: the strategy is fixed when the bootstrapper is built
/// and `boot` consumes it.
#[derive(Debug)]
pub struct Bootstrapper {
    payload: Option<Value>,
}

impl Bootstrapper {
    pub fn new(payload: Option<Value>) -> Self {
        Self { payload }
    }

    pub fn from_document(document: &str) -> Result<Self, serde_json::Error> {
        read_initial_data(document).map(Self::new)
    }

    pub fn strategy(&self) -> MountStrategy {
        match self.payload {
            Some(_) => MountStrategy::Hydrate,
            None => MountStrategy::FreshRender,
        }
    }

    pub fn boot<M: Mount>(self, mount: &mut M) -> MountStrategy {
        match &self.payload {
            Some(data) => {
                mount.hydrate(data);
                MountStrategy::Hydrate
            }
            None => {
                mount.render_fresh();
                MountStrategy::FreshRender
            }
        }
    }
}
