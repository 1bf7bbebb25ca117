// SPDX-License-Identifier: CEPL-1.0
//! Adapter choice, kept free of any API handles so the policy can be tested
//! against a plain list.

use tessera_core::{ApiLevel, RenderError};
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdapterKind {
    Discrete,
    Integrated,
    Virtual,
    /// CPU rasterizers such as lavapipe or WARP.
    Software,
    Other,
}

#[derive(Clone, Debug)]
pub struct AdapterInfo {
    pub name: String,
    pub kind: AdapterKind,
    pub api: ApiLevel,
    /// Queue family that supports graphics and can present to the host surface.
    pub present_queue: Option<u32>,
}

impl AdapterInfo {
    fn rejection(&self, required: ApiLevel) -> Option<&'static str> {
        if self.kind == AdapterKind::Software {
            Some("software adapter")
        } else if self.api < required {
            Some("api level too low")
        } else if self.present_queue.is_none() {
            Some("no presentable graphics queue")
        } else {
            None
        }
    }
}

/// Returns the index of the first usable adapter in enumeration order.
pub fn select_adapter(adapters: &[AdapterInfo], required: ApiLevel) -> Result<usize, RenderError> {
    for (i, a) in adapters.iter().enumerate() {
        match a.rejection(required) {
            Some(why) => debug!(adapter = %a.name, "skipping adapter: {why}"),
            None => {
                info!(adapter = %a.name, kind = ?a.kind, api = %a.api, "adapter selected");
                return Ok(i);
            }
        }
    }
    Err(RenderError::NoCompatibleAdapter { required })
}
