//! The uniform operator interface and backend selection.
//!
//! Both operators present an "apply to a true-dof vector, produce a true-dof
//! vector" contract to their consumer (an external iterative solver or the
//! explicit update loop). Exactly two concrete variants exist per operator --
//! host and device-batched -- implementing identical mathematics over
//! different data layouts; [`Backend`] picks one at construction time.
use crate::basis::Tensors1D;
use crate::device::{BatchedForceOperator, BatchedMassOperator, Device};
use crate::force::ForcePaOperator;
use crate::mass::MassPaOperator;
use crate::quadrature_data::QuadratureData;
use crate::space::{BasisKind, FiniteElementSpace};
use eyre::ensure;
use nalgebra::{DVectorView, DVectorViewMut};
use std::sync::Arc;

/// Execution target for the matrix-free operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Per-zone loop on the calling thread.
    Host,
    /// Batched kernels over all zones with explicit data staging.
    Batched,
}

/// Matrix-free action of the Force bilinear form.
///
/// `mult` maps an L2-sized vector to an H1-sized (component-major,
/// `dim * h1 true dofs`) vector; `mult_transpose` is the adjoint. Instances
/// are applied synchronously from a single thread per call.
pub trait ForceOperator {
    fn mult(&self, vec_l2: DVectorView<f64>, vec_h1: DVectorViewMut<f64>) -> eyre::Result<()>;

    fn mult_transpose(&self, vec_h1: DVectorView<f64>, vec_l2: DVectorViewMut<f64>)
        -> eyre::Result<()>;

    /// Length of the H1 output of [`mult`](Self::mult).
    fn h1_vector_size(&self) -> usize;

    /// Length of the L2 input of [`mult`](Self::mult).
    fn l2_vector_size(&self) -> usize;
}

/// Matrix-free action of a single-field mass bilinear form with essential-dof
/// elimination.
///
/// The operator carries no per-component state: the caller loops over
/// velocity components (or applies it once to the energy field) and supplies
/// the matching space at construction.
pub trait MassOperator<'a> {
    fn mult(&self, x: DVectorView<f64>, y: DVectorViewMut<f64>) -> eyre::Result<()>;

    /// Replaces the held essential true-dof set.
    ///
    /// The set is borrowed, not copied: the caller retains ownership and must
    /// keep it alive and unchanged until the next call (the batched variant
    /// stages a device-resident copy here, once, rather than per `mult`).
    /// `None` clears all constraints.
    fn set_essential_true_dofs(&mut self, dofs: Option<&'a [usize]>);

    /// Zeroes the constrained entries of a right-hand side so a consistent
    /// constrained system can be formed externally. Must be used with the
    /// same set as the most recent
    /// [`set_essential_true_dofs`](Self::set_essential_true_dofs); a stale
    /// set is a precondition violation, not a detected error.
    fn eliminate_rhs(&self, b: DVectorViewMut<f64>) -> eyre::Result<()>;

    /// Length of the vectors accepted by [`mult`](Self::mult).
    fn vector_size(&self) -> usize;
}

/// Constructs a Force operator on the selected backend.
pub fn force_operator<'a>(
    backend: Backend,
    quad_data: &'a QuadratureData,
    tensors: &Arc<Tensors1D>,
    h1: &'a dyn FiniteElementSpace,
    l2: &'a dyn FiniteElementSpace,
) -> eyre::Result<Box<dyn ForceOperator + 'a>> {
    Ok(match backend {
        Backend::Host => Box::new(ForcePaOperator::new(quad_data, Arc::clone(tensors), h1, l2)?),
        Backend::Batched => Box::new(BatchedForceOperator::new(
            Device::new(),
            quad_data,
            Arc::clone(tensors),
            h1,
            l2,
        )?),
    })
}

/// Constructs a Mass operator on the selected backend.
pub fn mass_operator<'a>(
    backend: Backend,
    quad_data: &'a QuadratureData,
    tensors: &Arc<Tensors1D>,
    space: &'a dyn FiniteElementSpace,
) -> eyre::Result<Box<dyn MassOperator<'a> + 'a>> {
    Ok(match backend {
        Backend::Host => Box::new(MassPaOperator::new(quad_data, Arc::clone(tensors), space)?),
        Backend::Batched => Box::new(BatchedMassOperator::new(
            Device::new(),
            quad_data,
            Arc::clone(tensors),
            space,
        )?),
    })
}

/// Construction-time consistency checks shared by the host and batched Force
/// operators.
pub(crate) fn check_force_setup(
    quad_data: &QuadratureData,
    tensors: &Tensors1D,
    h1: &dyn FiniteElementSpace,
    l2: &dyn FiniteElementSpace,
) -> eyre::Result<()> {
    let dim = quad_data.dim();
    ensure!(
        h1.dim() == dim && l2.dim() == dim,
        "space dimensions ({}, {}) disagree with quadrature data dimension {}",
        h1.dim(),
        l2.dim(),
        dim
    );
    ensure!(
        h1.basis_kind() == BasisKind::H1 && l2.basis_kind() == BasisKind::L2,
        "force operator couples an H1 trial space to an L2 test space"
    );
    ensure!(
        h1.num_zones() == quad_data.num_zones() && l2.num_zones() == quad_data.num_zones(),
        "zone counts disagree: H1 has {}, L2 has {}, quadrature data has {}",
        h1.num_zones(),
        l2.num_zones(),
        quad_data.num_zones()
    );
    check_zone_sizes(quad_data, tensors, h1)?;
    check_zone_sizes(quad_data, tensors, l2)?;
    Ok(())
}

/// Construction-time consistency checks shared by the host and batched Mass
/// operators.
pub(crate) fn check_mass_setup(
    quad_data: &QuadratureData,
    tensors: &Tensors1D,
    space: &dyn FiniteElementSpace,
) -> eyre::Result<()> {
    ensure!(
        space.dim() == quad_data.dim(),
        "space dimension {} disagrees with quadrature data dimension {}",
        space.dim(),
        quad_data.dim()
    );
    ensure!(
        space.num_zones() == quad_data.num_zones(),
        "zone counts disagree: space has {}, quadrature data has {}",
        space.num_zones(),
        quad_data.num_zones()
    );
    check_zone_sizes(quad_data, tensors, space)
}

fn check_zone_sizes(
    quad_data: &QuadratureData,
    tensors: &Tensors1D,
    space: &dyn FiniteElementSpace,
) -> eyre::Result<()> {
    let dim = quad_data.dim();
    let dofs_1d = match space.basis_kind() {
        BasisKind::H1 => tensors.h1_dofs_1d(),
        BasisKind::L2 => tensors.l2_dofs_1d(),
    };
    ensure!(
        space.dofs_per_zone() == dofs_1d.pow(dim as u32),
        "space has {} dofs per zone but the 1D tables imply {}^{} = {}",
        space.dofs_per_zone(),
        dofs_1d,
        dim,
        dofs_1d.pow(dim as u32)
    );
    ensure!(
        quad_data.quads_per_zone() == tensors.nqp_1d().pow(dim as u32),
        "quadrature data holds {} points per zone but the 1D tables imply {}^{} = {}",
        quad_data.quads_per_zone(),
        tensors.nqp_1d(),
        dim,
        tensors.nqp_1d().pow(dim as u32)
    );
    Ok(())
}

/// Checks one vector length against the declared size of its space.
#[inline]
pub(crate) fn check_vector_size(len: usize, expected: usize, what: &str) -> eyre::Result<()> {
    ensure!(
        len == expected,
        "dimension mismatch: {what} vector has length {len}, expected {expected}"
    );
    Ok(())
}
