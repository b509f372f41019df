mod bounding;

pub use bounding::{compute_node_bounds, compute_scene_bounds, BoundsCollector};
