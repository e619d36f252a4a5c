//! Published view of an inventory.

use serde::Serialize;

use crate::health::OriginState;
use crate::origin::{AppId, Origin};

/// Origins of one application grouped by state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OriginsSnapshot {
    pub app_id: AppId,
    pub active: Vec<Origin>,
    pub inactive: Vec<Origin>,
    pub disabled: Vec<Origin>,
}

impl OriginsSnapshot {
    pub fn origins(&self, state: OriginState) -> &[Origin] {
        match state {
            OriginState::Active => &self.active,
            OriginState::Inactive => &self.inactive,
            OriginState::Disabled => &self.disabled,
        }
    }
}
