//! Matrix-free operator kernels for high-order Lagrangian hydrodynamics.
//!
//! `aegir` evaluates the two bilinear forms at the heart of an explicit
//! Lagrangian hydro time step without ever assembling a global matrix:
//!
//! - a *Force* operator coupling a continuous high-order (H1) velocity space
//!   to a discontinuous (L2) thermodynamic space, applied forward and in
//!   transpose, and
//! - a *Mass* operator acting within a single space, used once per velocity
//!   component and once for the energy field.
//!
//! Only per-quadrature-point geometric/physical data ([`QuadratureData`]) and
//! shared one-dimensional basis tables ([`Tensors1D`]) are stored; the action
//! on a vector is recovered through sum-factorized tensor contractions over
//! the tensor-product structure of quadrilateral and hexahedral zones.
//!
//! Each operator comes in two variants with identical mathematical contracts:
//! a host variant that loops over zones, and a batched variant
//! ([`device`]) that stages data into device-style buffers and processes all
//! zones in bulk kernel launches. The variant is selected at construction
//! time through [`operator::Backend`].
//!
//! Mesh representation, finite element space construction and true-dof
//! numbering are external concerns; collaborators supply them through the
//! [`space::FiniteElementSpace`] trait. No linear system is solved here --
//! the operators are building blocks for an external iterative solver.

pub mod basis;
pub mod device;
pub mod force;
pub mod mass;
pub mod operator;
pub mod quadrature_data;
pub mod space;

pub use basis::Tensors1D;
pub use operator::{force_operator, mass_operator, Backend, ForceOperator, MassOperator};
pub use quadrature_data::QuadratureData;
pub use space::{BasisKind, DofMappedSpace, FiniteElementSpace};

pub extern crate nalgebra;
