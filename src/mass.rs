//! Host (per-zone loop) evaluation of the Mass operator.
//!
//! The mass bilinear form weighted by the reference mass `rho0 det(J0) w`
//! acts within a single space. The same operator type serves the velocity
//! solves (one H1 scalar component at a time, looped externally) and the
//! energy solve (L2 space); the space's basis kind selects the matching 1D
//! value table and no per-component state is kept.
use crate::basis::Tensors1D;
use crate::operator::{check_mass_setup, check_vector_size, MassOperator};
use crate::quadrature_data::QuadratureData;
use crate::space::{BasisKind, FiniteElementSpace};
use nalgebra::{DMatrix, DVectorView, DVectorViewMut};
use std::cell::RefCell;
use std::sync::Arc;

/// Matrix-free Mass operator with essential-dof elimination, host execution.
///
/// The essential true-dof set is borrowed from the caller: it must stay alive
/// and unchanged until the next
/// [`set_essential_true_dofs`](MassOperator::set_essential_true_dofs) call.
pub struct MassPaOperator<'a> {
    dim: usize,
    nzones: usize,
    quad_data: &'a QuadratureData,
    tensors: Arc<Tensors1D>,
    space: &'a dyn FiniteElementSpace,
    ess_tdofs: Option<&'a [usize]>,
    workspace: RefCell<MassWorkspace>,
}

#[derive(Debug, Default)]
struct MassWorkspace {
    // Full-length copy of the input; constrained entries are zeroed here so
    // the elimination also annihilates columns, keeping the action symmetric.
    x_full: Vec<f64>,
    zone_in: Vec<f64>,
    zone_out: Vec<f64>,
    quad_values: Vec<f64>,
    partial: Vec<f64>,
}

impl<'a> MassPaOperator<'a> {
    pub fn new(
        quad_data: &'a QuadratureData,
        tensors: Arc<Tensors1D>,
        space: &'a dyn FiniteElementSpace,
    ) -> eyre::Result<Self> {
        check_mass_setup(quad_data, &tensors, space)?;
        Ok(Self {
            dim: quad_data.dim(),
            nzones: quad_data.num_zones(),
            quad_data,
            tensors,
            space,
            ess_tdofs: None,
            workspace: RefCell::new(MassWorkspace::default()),
        })
    }

    /// The 1D value table of this space's own basis.
    fn basis_table(&self) -> (&DMatrix<f64>, usize) {
        match self.space.basis_kind() {
            BasisKind::H1 => (self.tensors.h1_values(), self.tensors.h1_dofs_1d()),
            BasisKind::L2 => (self.tensors.l2_values(), self.tensors.l2_dofs_1d()),
        }
    }

    /// Mass matrix action on quadrilateral zones in 2D.
    fn mult_quad(&self, ws: &mut MassWorkspace, y: &mut DVectorViewMut<f64>) {
        let (b, nd) = self.basis_table();
        let nq = self.tensors.nqp_1d();
        let MassWorkspace {
            x_full,
            zone_in,
            zone_out,
            quad_values,
            partial,
        } = ws;

        for z in 0..self.nzones {
            let dofs = self.space.zone_dofs(z);
            for (local, &dof) in dofs.iter().enumerate() {
                zone_in[local] = x_full[dof];
            }

            // XQ(i1, k2) = X(i1, i2) B(i2, k2)
            for k2 in 0..nq {
                for i1 in 0..nd {
                    let mut sum = 0.0;
                    for i2 in 0..nd {
                        sum += zone_in[i1 + nd * i2] * b[(i2, k2)];
                    }
                    partial[i1 + nd * k2] = sum;
                }
            }
            // QQ(k1, k2) = B(i1, k1) XQ(i1, k2), scaled by the reference mass.
            for k2 in 0..nq {
                for k1 in 0..nq {
                    let mut sum = 0.0;
                    for i1 in 0..nd {
                        sum += b[(i1, k1)] * partial[i1 + nd * k2];
                    }
                    let q = k1 + nq * k2;
                    quad_values[q] = sum * self.quad_data.rho0_det_j0_w(z, q);
                }
            }
            // Transposed contractions back to the dofs.
            for k2 in 0..nq {
                for i1 in 0..nd {
                    let mut sum = 0.0;
                    for k1 in 0..nq {
                        sum += b[(i1, k1)] * quad_values[k1 + nq * k2];
                    }
                    partial[i1 + nd * k2] = sum;
                }
            }
            for i2 in 0..nd {
                for i1 in 0..nd {
                    let mut sum = 0.0;
                    for k2 in 0..nq {
                        sum += partial[i1 + nd * k2] * b[(i2, k2)];
                    }
                    zone_out[i1 + nd * i2] = sum;
                }
            }

            for (local, &dof) in dofs.iter().enumerate() {
                y[dof] += zone_out[local];
            }
        }
    }

    /// Mass matrix action on hexahedral zones in 3D.
    fn mult_hex(&self, ws: &mut MassWorkspace, y: &mut DVectorViewMut<f64>) {
        let (b, nd) = self.basis_table();
        let nq = self.tensors.nqp_1d();
        let MassWorkspace {
            x_full,
            zone_in,
            zone_out,
            quad_values,
            partial,
        } = ws;
        // `partial` doubles as the two differently shaped intermediates; the
        // second stage is staged through `zone_out` to avoid aliasing.
        for z in 0..self.nzones {
            let dofs = self.space.zone_dofs(z);
            for (local, &dof) in dofs.iter().enumerate() {
                zone_in[local] = x_full[dof];
            }

            for k3 in 0..nq {
                for i2 in 0..nd {
                    for i1 in 0..nd {
                        let mut sum = 0.0;
                        for i3 in 0..nd {
                            sum += zone_in[i1 + nd * (i2 + nd * i3)] * b[(i3, k3)];
                        }
                        partial[i1 + nd * (i2 + nd * k3)] = sum;
                    }
                }
            }
            for k3 in 0..nq {
                for k2 in 0..nq {
                    for i1 in 0..nd {
                        let mut sum = 0.0;
                        for i2 in 0..nd {
                            sum += partial[i1 + nd * (i2 + nd * k3)] * b[(i2, k2)];
                        }
                        zone_out[i1 + nd * (k2 + nq * k3)] = sum;
                    }
                }
            }
            for k3 in 0..nq {
                for k2 in 0..nq {
                    for k1 in 0..nq {
                        let mut sum = 0.0;
                        for i1 in 0..nd {
                            sum += b[(i1, k1)] * zone_out[i1 + nd * (k2 + nq * k3)];
                        }
                        let q = k1 + nq * (k2 + nq * k3);
                        quad_values[q] = sum * self.quad_data.rho0_det_j0_w(z, q);
                    }
                }
            }

            for k3 in 0..nq {
                for k2 in 0..nq {
                    for i1 in 0..nd {
                        let mut sum = 0.0;
                        for k1 in 0..nq {
                            sum += b[(i1, k1)] * quad_values[k1 + nq * (k2 + nq * k3)];
                        }
                        partial[i1 + nd * (k2 + nq * k3)] = sum;
                    }
                }
            }
            for k3 in 0..nq {
                for i2 in 0..nd {
                    for i1 in 0..nd {
                        let mut sum = 0.0;
                        for k2 in 0..nq {
                            sum += partial[i1 + nd * (k2 + nq * k3)] * b[(i2, k2)];
                        }
                        zone_out[i1 + nd * (i2 + nd * k3)] = sum;
                    }
                }
            }
            for i3 in 0..nd {
                for i2 in 0..nd {
                    for i1 in 0..nd {
                        let mut sum = 0.0;
                        for k3 in 0..nq {
                            sum += zone_out[i1 + nd * (i2 + nd * k3)] * b[(i3, k3)];
                        }
                        partial[i1 + nd * (i2 + nd * i3)] = sum;
                    }
                }
            }

            for (local, &dof) in dofs.iter().enumerate() {
                y[dof] += partial[local];
            }
        }
    }
}

impl<'a> MassOperator<'a> for MassPaOperator<'a> {
    fn mult(&self, x: DVectorView<f64>, mut y: DVectorViewMut<f64>) -> eyre::Result<()> {
        let size = self.vector_size();
        check_vector_size(x.len(), size, "mass input")?;
        check_vector_size(y.len(), size, "mass output")?;

        let ws = &mut *self.workspace.borrow_mut();
        let (b_dofs, nq) = (self.basis_table().1, self.tensors.nqp_1d());
        let (dofs_per_zone, nqp, mx) = if self.dim == 2 {
            (b_dofs * b_dofs, nq * nq, b_dofs.max(nq))
        } else {
            (
                b_dofs * b_dofs * b_dofs,
                nq * nq * nq,
                b_dofs.max(nq),
            )
        };
        ws.x_full.clear();
        ws.x_full.extend(x.iter().copied());
        ws.zone_in.resize(dofs_per_zone, 0.0);
        ws.quad_values.resize(nqp, 0.0);
        let scratch = if self.dim == 2 { mx * mx } else { mx * mx * mx };
        ws.zone_out.resize(scratch, 0.0);
        ws.partial.resize(scratch, 0.0);

        if let Some(ess) = self.ess_tdofs {
            for &dof in ess {
                ws.x_full[dof] = 0.0;
            }
        }

        y.fill(0.0);
        if self.dim == 2 {
            self.mult_quad(ws, &mut y);
        } else {
            self.mult_hex(ws, &mut y);
        }

        if let Some(ess) = self.ess_tdofs {
            for &dof in ess {
                y[dof] = 0.0;
            }
        }
        Ok(())
    }

    fn set_essential_true_dofs(&mut self, dofs: Option<&'a [usize]>) {
        log::debug!(
            "mass operator: holding {} essential true dofs",
            dofs.map_or(0, <[usize]>::len)
        );
        self.ess_tdofs = dofs;
    }

    fn eliminate_rhs(&self, mut b: DVectorViewMut<f64>) -> eyre::Result<()> {
        check_vector_size(b.len(), self.vector_size(), "right-hand side")?;
        if let Some(ess) = self.ess_tdofs {
            for &dof in ess {
                b[dof] = 0.0;
            }
        }
        Ok(())
    }

    fn vector_size(&self) -> usize {
        self.space.num_true_dofs()
    }
}
