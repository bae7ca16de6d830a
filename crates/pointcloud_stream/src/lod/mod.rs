//! LOD node selection driven by the camera frustum.
//!
//! # Module Structure
//!
//! - [`falloff`]: distance shells, nearest first, deepest target first
//! - [`frustum`]: 6-plane frustum with sphere and box tests
//! - [`node`]: `LodNode` and the per-shell subdivision walk
//! - [`view`]: camera view reported by the viewer
//! - [`policy`]: `FrustumLodPolicy` - debounce, compute, diff, host calls

pub mod falloff;
pub mod frustum;
pub mod node;
pub mod policy;
pub mod view;

// Re-exports
pub use falloff::{distance_series, falloff as shell_falloff};
pub use frustum::{Frustum, Projection};
pub use node::{depth_range, LodNode, NodeKey};
pub use policy::{FrustumLodPolicy, LoaderSet, PolicyDiff, PolicyEvent, PolicyState};
pub use view::{Camera, ViewState};
