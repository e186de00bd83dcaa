//! Device-batched variants of the Force and Mass operators.
//!
//! These mirror the mathematical contracts of the host operators exactly but
//! are restructured for throughput: every phase of an application (gather,
//! per-zone contraction, collection, elimination) is one batched launch over
//! all zones or all true dofs, with explicit staging of distributed vectors
//! and essential-dof lists into device-resident buffers. Divergence from the
//! host result beyond floating-point rounding is a data-layout bug, not a
//! legitimate design choice -- the test suite pins host/batched agreement.
mod dispatch;
mod force;
mod mass;

pub use dispatch::{Device, DeviceVector, IndexBuffer, TransposeMap};
pub use force::BatchedForceOperator;
pub use mass::BatchedMassOperator;
