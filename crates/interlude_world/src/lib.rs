//! World grid and visibility pipeline for the Interlude game server.
//!
//! The [`WorldGrid`] owns the canonical set of world objects and shards
//! them into fixed-size square regions; the [`VisibilityEngine`] reads the
//! grid to keep every player's observed-set snapshot fresh and maintains
//! the reverse index that makes broadcast fan-out O(observers).

mod grid;
mod object;
mod visibility;

pub use grid::{GridConfig, WorldGrid};
pub use object::{Location, ObjectId, ObjectIdAllocator, ObjectKind, WorldObject};
pub use visibility::{
    Bucket, VisibilityCache, VisibilityConfig, VisibilityEngine,
};

use thiserror::Error;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
pub enum WorldError {
    #[error("object {0:?} is already in the world")]
    DuplicateObject(ObjectId),
    #[error("object {0:?} is not in the world")]
    UnknownObject(ObjectId),
}
