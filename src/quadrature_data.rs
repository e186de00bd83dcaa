//! The per-quadrature-point data cache shared by all operators.
use eyre::ensure;
use log::debug;
use nalgebra::DVector;

/// Container for all data needed at quadrature points.
///
/// One instance exists per simulation. The flat storage is addressed by the
/// fixed bijection `(zone, quad) -> zone * quads_per_zone + quad`; every field
/// and both operators iterate quadrature points in exactly this order. Raw
/// offsets never cross the API boundary -- callers pass `(zone, quad)` indices
/// and the accessors compute the offset.
///
/// The external physics update rewrites [`stress_jinv_t`](Self::stress_jinv_t)
/// and [`dt_est`](Self::dt_est) once per time step; everything else is fixed
/// after initialization at time zero.
#[derive(Debug, Clone)]
pub struct QuadratureData {
    dim: usize,
    nzones: usize,
    quads_per_zone: usize,

    /// Inverse of the reference-to-physical Jacobian of the *initial* mesh,
    /// `dim x dim` per point. Computed once at time zero.
    jac0_inv: Vec<f64>,

    /// Stress, inverse Jacobian transpose, Jacobian determinant and
    /// integration weight combined into one `dim x dim` matrix per point.
    /// Entry `(vd, gd)` multiplies the reference derivative of velocity
    /// component `vd` along reference axis `gd`. Recomputed every time step.
    stress_jinv_t: Vec<f64>,

    /// `rho0 * det(J0) * weight` per point. Fixed after time zero; at any
    /// later time the current density is recoverable through [`Self::density`],
    /// which is the pointwise notion of mass conservation.
    rho0_det_j0_w: DVector<f64>,

    /// Initial length scale, a notion of local zone size. All initial zones
    /// are assumed to be of similar size.
    pub h0: f64,

    /// Estimate of the minimum stable time step over all quadrature points.
    /// Recomputed every step by the external physics update, not here.
    pub dt_est: f64,
}

impl QuadratureData {
    /// Creates a zero-initialized cache for `nzones` zones with
    /// `quads_per_zone` quadrature points each.
    pub fn new(dim: usize, nzones: usize, quads_per_zone: usize) -> eyre::Result<Self> {
        ensure!(
            dim == 2 || dim == 3,
            "unsupported topology: zones must be quadrilateral (2D) or hexahedral (3D), \
             got dimension {dim}"
        );
        ensure!(
            nzones > 0 && quads_per_zone > 0,
            "quadrature data needs at least one zone and one point per zone \
             (got {nzones} zones, {quads_per_zone} points)"
        );
        let npoints = nzones * quads_per_zone;
        debug!(
            "allocating quadrature data: dim = {}, {} zones, {} points per zone",
            dim, nzones, quads_per_zone
        );
        Ok(Self {
            dim,
            nzones,
            quads_per_zone,
            jac0_inv: vec![0.0; dim * dim * npoints],
            stress_jinv_t: vec![0.0; dim * dim * npoints],
            rho0_det_j0_w: DVector::zeros(npoints),
            h0: 0.0,
            dt_est: 0.0,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn num_zones(&self) -> usize {
        self.nzones
    }

    pub fn quads_per_zone(&self) -> usize {
        self.quads_per_zone
    }

    /// The single documented offset formula for the zone-indexed arena.
    #[inline]
    fn point_offset(&self, zone: usize, quad: usize) -> usize {
        debug_assert!(zone < self.nzones && quad < self.quads_per_zone);
        zone * self.quads_per_zone + quad
    }

    #[inline]
    fn tensor_offset(&self, zone: usize, quad: usize, row: usize, col: usize) -> usize {
        debug_assert!(row < self.dim && col < self.dim);
        (row * self.dim + col) * (self.nzones * self.quads_per_zone) + self.point_offset(zone, quad)
    }

    #[inline]
    pub fn jac0_inv(&self, zone: usize, quad: usize, row: usize, col: usize) -> f64 {
        self.jac0_inv[self.tensor_offset(zone, quad, row, col)]
    }

    /// Mutable access for initialization at time zero. The inverse initial
    /// Jacobian is not meant to change afterwards.
    #[inline]
    pub fn jac0_inv_mut(&mut self, zone: usize, quad: usize, row: usize, col: usize) -> &mut f64 {
        let offset = self.tensor_offset(zone, quad, row, col);
        &mut self.jac0_inv[offset]
    }

    #[inline]
    pub fn stress_jinv_t(&self, zone: usize, quad: usize, vd: usize, gd: usize) -> f64 {
        self.stress_jinv_t[self.tensor_offset(zone, quad, vd, gd)]
    }

    /// Mutable access for the once-per-step physics update.
    #[inline]
    pub fn stress_jinv_t_mut(&mut self, zone: usize, quad: usize, vd: usize, gd: usize) -> &mut f64 {
        let offset = self.tensor_offset(zone, quad, vd, gd);
        &mut self.stress_jinv_t[offset]
    }

    #[inline]
    pub fn rho0_det_j0_w(&self, zone: usize, quad: usize) -> f64 {
        self.rho0_det_j0_w[self.point_offset(zone, quad)]
    }

    /// Mutable access for initialization at time zero.
    #[inline]
    pub fn rho0_det_j0_w_mut(&mut self, zone: usize, quad: usize) -> &mut f64 {
        let offset = self.point_offset(zone, quad);
        &mut self.rho0_det_j0_w[offset]
    }

    /// Recovers the current density at a quadrature point from the stored
    /// reference mass weight, given the current Jacobian determinant and the
    /// quadrature weight at that point:
    /// `rho = rho0 * det(J0) * w / (det(J) * w)`.
    #[inline]
    pub fn density(&self, zone: usize, quad: usize, det_j: f64, weight: f64) -> f64 {
        self.rho0_det_j0_w[self.point_offset(zone, quad)] / (det_j * weight)
    }
}
