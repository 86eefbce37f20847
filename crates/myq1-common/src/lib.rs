#![allow(clippy::needless_range_loop, clippy::too_many_arguments, clippy::manual_range_contains,
         clippy::comparison_chain, clippy::float_cmp)]

pub mod q_shared;
pub mod bspfile;
pub mod error;
pub mod md4;
pub mod model;
pub mod model_load;
pub mod world;
pub mod pvs;
pub mod cmodel;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use error::BspError;
pub use model::{BrushModel, Contents, HullChild, NodeChild};
pub use world::Trace;
