// Per-frame vision stages, leaves first.

pub mod geometry;
pub mod preprocessor;
pub mod edges;
pub mod thinning;
pub mod shape_match;
pub mod background;
pub mod movement_box;
pub mod silhouette;
pub mod landmarks;
pub mod validator;
