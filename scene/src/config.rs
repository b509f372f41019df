//! Scene display and evaluation settings.

use bitflags::bitflags;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::RgbaColor;

bitflags! {
    /// Display toggles consulted by bounds and draw traversals.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct SceneOptions: u32 {
        const NONE = 0;
        /// Draw node origins and parent links; node origins contribute to bounds.
        const SHOW_NODES = 0b0001;
        /// Draw collision volumes; node origins contribute to bounds.
        const SHOW_COLLISION = 0b0010;
        /// Draw physics constraints between collision bodies.
        const SHOW_CONSTRAINTS = 0b0100;
        /// Draw furniture markers.
        const SHOW_MARKERS = 0b1000;
    }
}

/// Whether hidden subtrees contribute to the scene bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundsPolicy {
    #[default]
    IncludeHidden,
    VisibleOnly,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid cull expression '{pattern}': {source}")]
    InvalidCullExpression {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("Invalid scene configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// User-facing scene configuration, typically loaded from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub show_nodes: bool,
    pub show_collision: bool,
    pub show_constraints: bool,
    pub show_markers: bool,
    /// Run controllers during the transform pass.
    pub animate: bool,
    /// Nodes whose name matches this expression are hidden. Empty disables culling.
    pub cull_expression: String,
    pub bounds_policy: BoundsPolicy,
    pub normal_color: RgbaColor,
    pub highlight_color: RgbaColor,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            show_nodes: false,
            show_collision: false,
            show_constraints: false,
            show_markers: false,
            animate: true,
            cull_expression: String::new(),
            bounds_policy: BoundsPolicy::IncludeHidden,
            normal_color: RgbaColor::YELLOW.with_alpha(0.5),
            highlight_color: RgbaColor::GREEN,
        }
    }
}

impl SceneConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn options(&self) -> SceneOptions {
        let mut options = SceneOptions::NONE;
        options.set(SceneOptions::SHOW_NODES, self.show_nodes);
        options.set(SceneOptions::SHOW_COLLISION, self.show_collision);
        options.set(SceneOptions::SHOW_CONSTRAINTS, self.show_constraints);
        options.set(SceneOptions::SHOW_MARKERS, self.show_markers);
        options
    }

    /// Compiles the cull expression. `Ok(None)` when culling is disabled.
    pub fn cull_regex(&self) -> Result<Option<Regex>, ConfigError> {
        if self.cull_expression.is_empty() {
            return Ok(None);
        }
        Regex::new(&self.cull_expression)
            .map(Some)
            .map_err(|source| ConfigError::InvalidCullExpression {
                pattern: self.cull_expression.clone(),
                source,
            })
    }
}
