// error.rs — fatal level-load errors

use thiserror::Error;

/// A level file that cannot be loaded. Every variant is fatal for the
/// level: there is no partial load.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BspError {
    #[error("{name} has wrong version number ({found} should be {expected})")]
    BadVersion { name: String, found: i32, expected: i32 },

    #[error("{name} is truncated ({len} bytes)")]
    Truncated { name: String, len: usize },

    #[error("lump {lump} lies outside the file (ofs {ofs}, len {len}, file {file_len})")]
    LumpOutOfBounds { lump: &'static str, ofs: i32, len: i32, file_len: usize },

    #[error("funny lump size in {lump} ({len} not a multiple of {stride})")]
    FunnyLumpSize { lump: &'static str, len: usize, stride: usize },

    #[error("too many {what} ({count} > {max})")]
    TooMany { what: &'static str, count: usize, max: usize },

    #[error("{what} index {index} out of range (count {count})")]
    IndexOutOfRange { what: &'static str, index: i64, count: usize },

    #[error("bad {what} contents code {code}")]
    BadContents { what: &'static str, code: i32 },

    #[error("node {node} is reachable twice from the world head node")]
    BadTree { node: usize },

    #[error("hull {hull} clipnode {node} is its own ancestor")]
    CyclicClipTree { hull: usize, node: usize },

    #[error("bad texture {name}: {reason}")]
    BadTexture { name: String, reason: String },

    #[error("bad animating texture {name}: {reason}")]
    BadAnimation { name: String, reason: String },

    #[error("bad surface extents on face {face} ({extent})")]
    BadSurfaceExtents { face: usize, extent: i64 },

    #[error("{name} has no models")]
    NoModels { name: String },
}

impl BspError {
    pub(crate) fn index(what: &'static str, index: impl Into<i64>, count: usize) -> Self {
        BspError::IndexOutOfRange { what, index: index.into(), count }
    }
}

/// Checks `index < count`, returning it as a `usize`.
pub(crate) fn check_index(what: &'static str, index: i64, count: usize) -> Result<usize, BspError> {
    if index < 0 || index as u64 >= count as u64 {
        return Err(BspError::index(what, index, count));
    }
    Ok(index as usize)
}

/// Checks that `first..first+num` lies inside `0..count`.
pub(crate) fn check_range(what: &'static str, first: i64, num: i64, count: usize) -> Result<(), BspError> {
    if first < 0 || num < 0 || (first + num) as u64 > count as u64 {
        return Err(BspError::index(what, first + num, count));
    }
    Ok(())
}
