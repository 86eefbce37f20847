#![allow(clippy::too_many_arguments, clippy::manual_range_contains, clippy::comparison_chain,
         clippy::float_cmp, clippy::needless_range_loop, clippy::field_reassign_with_default)]
// World-side renderer: visibility marking, texture chains, lightmaps and lights

pub mod r_local;
pub mod r_config;
pub mod r_efrag;
pub mod r_surf;
pub mod r_light;
pub mod r_lightmap;

pub use r_config::{LightmapFormat, RenderConfig};
pub use r_efrag::Efrags;
pub use r_light::{light_point, push_dlights, LightStyles};
pub use r_lightmap::{build_lightmaps, DirtyRect, LightmapAtlas};
pub use r_local::{DLight, FrameContext, RefError, TextureChains, ViewParams};
pub use r_surf::{build_texture_chains, VisMarks};
