//! GPU texture management

pub mod page_textures;

pub use page_textures::{PageTextures, SURFACE_FORMAT};
