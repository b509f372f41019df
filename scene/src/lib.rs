pub use nifview_common as common;
pub mod config;
pub mod geom_query;
pub mod model;
pub mod scene;

pub use config::{BoundsPolicy, ConfigError, SceneConfig, SceneOptions};
pub use model::{Block, BlockId, BlockModel, MemoryModel};
pub use scene::Scene;
