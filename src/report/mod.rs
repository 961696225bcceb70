pub mod render;
pub mod synthesize;

pub use render::*;
pub use synthesize::*;
