//! The finite element space abstraction consumed by the operators.
//!
//! Mesh representation, partitioning and true-dof numbering are owned by
//! external collaborators; the operators only need the per-zone restriction
//! of a process-local true-dof vector. Cross-process summation of shared
//! true dofs at partition boundaries happens outside this crate.
use eyre::ensure;

/// Which family of 1D shape functions a space is built from.
///
/// Determines the basis table a [`Tensors1D`](crate::basis::Tensors1D)
/// lookup resolves to, and whether zone dofs may be shared between zones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasisKind {
    /// Continuous space: dofs on zone boundaries are shared.
    H1,
    /// Discontinuous space: every zone owns its dofs exclusively.
    L2,
}

/// Process-local view of a scalar finite element space.
///
/// `zone_dofs` returns, for one zone, the true-dof index of every local dof
/// in *lexicographic tensor-product order* (x fastest, then y, then z). This
/// ordering is part of the contract: the sum-factorized kernels rely on local
/// index `i1 + n * (i2 + n * i3)` addressing the 1D basis factors.
///
/// Vector-valued H1 fields are stored component-major: component `c` of a
/// velocity vector occupies the block `[c * num_true_dofs, (c + 1) * num_true_dofs)`.
pub trait FiniteElementSpace {
    /// Spatial dimension of the underlying mesh (2 or 3).
    fn dim(&self) -> usize;

    fn num_zones(&self) -> usize;

    /// Scalar dofs per zone; always `dofs1d^dim` for tensor-product zones.
    fn dofs_per_zone(&self) -> usize;

    /// Size of a scalar true-dof vector on this process.
    fn num_true_dofs(&self) -> usize;

    fn basis_kind(&self) -> BasisKind;

    /// True-dof indices of the given zone, lexicographic, length
    /// [`dofs_per_zone`](Self::dofs_per_zone).
    fn zone_dofs(&self, zone: usize) -> &[usize];
}

/// A [`FiniteElementSpace`] backed by explicit dof tables.
///
/// The caller (mesh/space construction, which is out of scope here) supplies
/// the complete zone-to-true-dof map as one flat buffer. This is the only
/// concrete space this crate ships; anything cleverer belongs to the
/// collaborator that owns the mesh.
#[derive(Debug, Clone)]
pub struct DofMappedSpace {
    dim: usize,
    dofs_per_zone: usize,
    num_true_dofs: usize,
    kind: BasisKind,
    zone_dofs: Vec<usize>,
}

impl DofMappedSpace {
    /// Builds a space from a flat `nzones * dofs_per_zone` dof table.
    ///
    /// Fails if the table length is not a multiple of `dofs_per_zone`, if any
    /// index is out of bounds, or if the dimension is not 2 or 3.
    pub fn from_zone_dofs(
        dim: usize,
        dofs_per_zone: usize,
        num_true_dofs: usize,
        kind: BasisKind,
        zone_dofs: Vec<usize>,
    ) -> eyre::Result<Self> {
        ensure!(
            dim == 2 || dim == 3,
            "unsupported topology: expected dimension 2 or 3, got {dim}"
        );
        ensure!(dofs_per_zone > 0, "a zone must carry at least one dof");
        ensure!(
            !zone_dofs.is_empty() && zone_dofs.len() % dofs_per_zone == 0,
            "dof table length {} is not a positive multiple of dofs_per_zone = {}",
            zone_dofs.len(),
            dofs_per_zone
        );
        if let Some(&bad) = zone_dofs.iter().find(|&&dof| dof >= num_true_dofs) {
            eyre::bail!("dof index {bad} out of bounds for true-vector size {num_true_dofs}");
        }
        Ok(Self {
            dim,
            dofs_per_zone,
            num_true_dofs,
            kind,
            zone_dofs,
        })
    }
}

impl FiniteElementSpace for DofMappedSpace {
    fn dim(&self) -> usize {
        self.dim
    }

    fn num_zones(&self) -> usize {
        self.zone_dofs.len() / self.dofs_per_zone
    }

    fn dofs_per_zone(&self) -> usize {
        self.dofs_per_zone
    }

    fn num_true_dofs(&self) -> usize {
        self.num_true_dofs
    }

    fn basis_kind(&self) -> BasisKind {
        self.kind
    }

    fn zone_dofs(&self, zone: usize) -> &[usize] {
        let start = zone * self.dofs_per_zone;
        &self.zone_dofs[start..start + self.dofs_per_zone]
    }
}
