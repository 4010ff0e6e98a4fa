//! Containment boundaries
//!
//! A boundary wraps a unit of presentation work, turns any fault raised while
//! it runs into a classified [`AppError`](crate::error::AppError), logs it once
//! and hands back a [`FallbackDescriptor`] until it is reset.

pub mod fallback;
pub mod supervisor;
pub mod surface;

pub use fallback::{FallbackAction, FallbackDescriptor, FallbackLevel};
pub use supervisor::{
    Boundary, BoundaryState, Fault, FaultClassification, FaultHook, Rendered, ResetHook,
};
pub use surface::{FallbackViewHook, SurfaceBoundary, SurfaceEvent, SurfaceSignal};
