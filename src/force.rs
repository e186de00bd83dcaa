//! Host (per-zone loop) evaluation of the Force operator.
//!
//! The Force bilinear form couples the H1 velocity space to the L2
//! thermodynamic space. Its action on an L2 vector `e` is, per zone and per
//! velocity component `c`,
//!
//! ```text
//! out[i, c] = sum_q stress_jinv_t(q; c, d) * dphi_i/dxi_d(q) * e_h(q)
//! ```
//!
//! where `e_h(q)` interpolates the zone's L2 dofs at the quadrature points.
//! Instead of a dense `(h1 dofs x l2 dofs)` contraction per zone, the
//! tensor-product structure of the shape functions is exploited to factor the
//! evaluation into 1D contractions along each reference axis in turn. The
//! quadrilateral and hexahedral paths are coded independently because the
//! index nesting differs.
use crate::basis::Tensors1D;
use crate::operator::{check_force_setup, check_vector_size, ForceOperator};
use crate::quadrature_data::QuadratureData;
use crate::space::FiniteElementSpace;
use nalgebra::{DVectorView, DVectorViewMut};
use std::cell::RefCell;
use std::sync::Arc;

/// Matrix-free Force operator, host execution.
///
/// Holds only references to the quadrature-point cache and the shared 1D
/// tables; no global matrix is ever formed.
pub struct ForcePaOperator<'a> {
    dim: usize,
    nzones: usize,
    quad_data: &'a QuadratureData,
    tensors: Arc<Tensors1D>,
    h1: &'a dyn FiniteElementSpace,
    l2: &'a dyn FiniteElementSpace,
    // Scratch reused across calls so repeated applications do not allocate.
    workspace: RefCell<ForceWorkspace>,
}

#[derive(Debug, Default)]
struct ForceWorkspace {
    zone_l2: Vec<f64>,
    zone_h1: Vec<f64>,
    quad_values: Vec<f64>,
    quad_scaled: Vec<f64>,
    partial1: Vec<f64>,
    partial2: Vec<f64>,
}

impl ForceWorkspace {
    fn resize(&mut self, tensors: &Tensors1D, dim: usize) {
        let nh = tensors.h1_dofs_1d();
        let nl = tensors.l2_dofs_1d();
        let nq = tensors.nqp_1d();
        // The partially contracted intermediates mix dof and quadrature axes;
        // sizing them by the largest 1D extent covers every stage.
        let mx = nh.max(nl).max(nq);
        let (l2_dofs, h1_dofs, nqp, partial) = if dim == 2 {
            (nl * nl, nh * nh, nq * nq, mx * mx)
        } else {
            (nl * nl * nl, nh * nh * nh, nq * nq * nq, mx * mx * mx)
        };
        self.zone_l2.resize(l2_dofs, 0.0);
        self.zone_h1.resize(h1_dofs, 0.0);
        self.quad_values.resize(nqp, 0.0);
        self.quad_scaled.resize(nqp, 0.0);
        self.partial1.resize(partial, 0.0);
        self.partial2.resize(partial, 0.0);
    }
}

impl<'a> ForcePaOperator<'a> {
    pub fn new(
        quad_data: &'a QuadratureData,
        tensors: Arc<Tensors1D>,
        h1: &'a dyn FiniteElementSpace,
        l2: &'a dyn FiniteElementSpace,
    ) -> eyre::Result<Self> {
        check_force_setup(quad_data, &tensors, h1, l2)?;
        Ok(Self {
            dim: quad_data.dim(),
            nzones: quad_data.num_zones(),
            quad_data,
            tensors,
            h1,
            l2,
            workspace: RefCell::new(ForceWorkspace::default()),
        })
    }

    /// Force matrix action on quadrilateral zones in 2D.
    fn mult_quad(&self, vec_l2: &DVectorView<f64>, vec_h1: &mut DVectorViewMut<f64>) {
        let t = &*self.tensors;
        let (nh, nl, nq) = (t.h1_dofs_1d(), t.l2_dofs_1d(), t.nqp_1d());
        let (h, g, l) = (t.h1_values(), t.h1_gradients(), t.l2_values());
        let h1_size = self.h1.num_true_dofs();

        let ws = &mut *self.workspace.borrow_mut();
        ws.resize(t, 2);
        let ForceWorkspace {
            zone_l2,
            zone_h1,
            quad_values,
            quad_scaled,
            partial1,
            partial2,
        } = ws;

        for z in 0..self.nzones {
            for (local, &dof) in self.l2.zone_dofs(z).iter().enumerate() {
                zone_l2[local] = vec_l2[dof];
            }

            // LQ(j1, k2) = E(j1, j2) L(j2, k2) -- contract the y dofs.
            for k2 in 0..nq {
                for j1 in 0..nl {
                    let mut sum = 0.0;
                    for j2 in 0..nl {
                        sum += zone_l2[j1 + nl * j2] * l[(j2, k2)];
                    }
                    partial1[j1 + nl * k2] = sum;
                }
            }
            // QQ(k1, k2) = L(j1, k1) LQ(j1, k2) -- contract the x dofs.
            for k2 in 0..nq {
                for k1 in 0..nq {
                    let mut sum = 0.0;
                    for j1 in 0..nl {
                        sum += l[(j1, k1)] * partial1[j1 + nl * k2];
                    }
                    quad_values[k1 + nq * k2] = sum;
                }
            }

            let h1_dofs = self.h1.zone_dofs(z);
            for c in 0..2 {
                zone_h1.fill(0.0);
                for d in 0..2 {
                    for q in 0..nq * nq {
                        quad_scaled[q] = quad_values[q] * self.quad_data.stress_jinv_t(z, q, c, d);
                    }
                    // Axis d picks up the 1D derivative table, the other axis
                    // the value table.
                    let (a1, a2) = if d == 0 { (g, h) } else { (h, g) };
                    // HQ(i1, k2) = A1(i1, k1) Qd(k1, k2)
                    for k2 in 0..nq {
                        for i1 in 0..nh {
                            let mut sum = 0.0;
                            for k1 in 0..nq {
                                sum += a1[(i1, k1)] * quad_scaled[k1 + nq * k2];
                            }
                            partial2[i1 + nh * k2] = sum;
                        }
                    }
                    // HH(i1, i2) += HQ(i1, k2) A2(i2, k2)
                    for i2 in 0..nh {
                        for i1 in 0..nh {
                            let mut sum = 0.0;
                            for k2 in 0..nq {
                                sum += partial2[i1 + nh * k2] * a2[(i2, k2)];
                            }
                            zone_h1[i1 + nh * i2] += sum;
                        }
                    }
                }
                // Zone contributions to shared H1 dofs are summed.
                for (local, &dof) in h1_dofs.iter().enumerate() {
                    vec_h1[c * h1_size + dof] += zone_h1[local];
                }
            }
        }
    }

    /// Force matrix action on hexahedral zones in 3D.
    fn mult_hex(&self, vec_l2: &DVectorView<f64>, vec_h1: &mut DVectorViewMut<f64>) {
        let t = &*self.tensors;
        let (nh, nl, nq) = (t.h1_dofs_1d(), t.l2_dofs_1d(), t.nqp_1d());
        let (h, g, l) = (t.h1_values(), t.h1_gradients(), t.l2_values());
        let h1_size = self.h1.num_true_dofs();

        let ws = &mut *self.workspace.borrow_mut();
        ws.resize(t, 3);
        let ForceWorkspace {
            zone_l2,
            zone_h1,
            quad_values,
            quad_scaled,
            partial1,
            partial2,
        } = ws;

        for z in 0..self.nzones {
            for (local, &dof) in self.l2.zone_dofs(z).iter().enumerate() {
                zone_l2[local] = vec_l2[dof];
            }

            // Interpolate the L2 dofs to the quadrature points one axis at a
            // time: z dofs, then y dofs, then x dofs.
            for k3 in 0..nq {
                for j2 in 0..nl {
                    for j1 in 0..nl {
                        let mut sum = 0.0;
                        for j3 in 0..nl {
                            sum += zone_l2[j1 + nl * (j2 + nl * j3)] * l[(j3, k3)];
                        }
                        partial1[j1 + nl * (j2 + nl * k3)] = sum;
                    }
                }
            }
            for k3 in 0..nq {
                for k2 in 0..nq {
                    for j1 in 0..nl {
                        let mut sum = 0.0;
                        for j2 in 0..nl {
                            sum += partial1[j1 + nl * (j2 + nl * k3)] * l[(j2, k2)];
                        }
                        partial2[j1 + nl * (k2 + nq * k3)] = sum;
                    }
                }
            }
            for k3 in 0..nq {
                for k2 in 0..nq {
                    for k1 in 0..nq {
                        let mut sum = 0.0;
                        for j1 in 0..nl {
                            sum += l[(j1, k1)] * partial2[j1 + nl * (k2 + nq * k3)];
                        }
                        quad_values[k1 + nq * (k2 + nq * k3)] = sum;
                    }
                }
            }

            let h1_dofs = self.h1.zone_dofs(z);
            for c in 0..3 {
                zone_h1.fill(0.0);
                for d in 0..3 {
                    for q in 0..nq * nq * nq {
                        quad_scaled[q] = quad_values[q] * self.quad_data.stress_jinv_t(z, q, c, d);
                    }
                    let (a1, a2, a3) = match d {
                        0 => (g, h, h),
                        1 => (h, g, h),
                        _ => (h, h, g),
                    };
                    // Contract back towards H1 dofs, axis by axis.
                    for k3 in 0..nq {
                        for k2 in 0..nq {
                            for i1 in 0..nh {
                                let mut sum = 0.0;
                                for k1 in 0..nq {
                                    sum += a1[(i1, k1)] * quad_scaled[k1 + nq * (k2 + nq * k3)];
                                }
                                partial1[i1 + nh * (k2 + nq * k3)] = sum;
                            }
                        }
                    }
                    for k3 in 0..nq {
                        for i2 in 0..nh {
                            for i1 in 0..nh {
                                let mut sum = 0.0;
                                for k2 in 0..nq {
                                    sum += partial1[i1 + nh * (k2 + nq * k3)] * a2[(i2, k2)];
                                }
                                partial2[i1 + nh * (i2 + nh * k3)] = sum;
                            }
                        }
                    }
                    for i3 in 0..nh {
                        for i2 in 0..nh {
                            for i1 in 0..nh {
                                let mut sum = 0.0;
                                for k3 in 0..nq {
                                    sum += partial2[i1 + nh * (i2 + nh * k3)] * a3[(i3, k3)];
                                }
                                zone_h1[i1 + nh * (i2 + nh * i3)] += sum;
                            }
                        }
                    }
                }
                for (local, &dof) in h1_dofs.iter().enumerate() {
                    vec_h1[c * h1_size + dof] += zone_h1[local];
                }
            }
        }
    }

    /// Transpose force matrix action on quadrilateral zones in 2D.
    fn mult_transpose_quad(&self, vec_h1: &DVectorView<f64>, vec_l2: &mut DVectorViewMut<f64>) {
        let t = &*self.tensors;
        let (nh, nl, nq) = (t.h1_dofs_1d(), t.l2_dofs_1d(), t.nqp_1d());
        let (h, g, l) = (t.h1_values(), t.h1_gradients(), t.l2_values());
        let h1_size = self.h1.num_true_dofs();

        let ws = &mut *self.workspace.borrow_mut();
        ws.resize(t, 2);
        let ForceWorkspace {
            zone_l2,
            zone_h1,
            quad_values,
            quad_scaled: _,
            partial1,
            partial2,
        } = ws;

        for z in 0..self.nzones {
            quad_values.fill(0.0);
            let h1_dofs = self.h1.zone_dofs(z);

            // Accumulate stress-weighted reference derivatives of every
            // velocity component at the quadrature points.
            for c in 0..2 {
                for (local, &dof) in h1_dofs.iter().enumerate() {
                    zone_h1[local] = vec_h1[c * h1_size + dof];
                }
                for d in 0..2 {
                    let (a1, a2) = if d == 0 { (g, h) } else { (h, g) };
                    // VQ(i1, k2) = V(i1, i2) A2(i2, k2)
                    for k2 in 0..nq {
                        for i1 in 0..nh {
                            let mut sum = 0.0;
                            for i2 in 0..nh {
                                sum += zone_h1[i1 + nh * i2] * a2[(i2, k2)];
                            }
                            partial1[i1 + nh * k2] = sum;
                        }
                    }
                    // dV(k1, k2) = A1(i1, k1) VQ(i1, k2)
                    for k2 in 0..nq {
                        for k1 in 0..nq {
                            let mut sum = 0.0;
                            for i1 in 0..nh {
                                sum += a1[(i1, k1)] * partial1[i1 + nh * k2];
                            }
                            let q = k1 + nq * k2;
                            quad_values[q] += sum * self.quad_data.stress_jinv_t(z, q, c, d);
                        }
                    }
                }
            }

            // Project onto the L2 basis.
            for k2 in 0..nq {
                for j1 in 0..nl {
                    let mut sum = 0.0;
                    for k1 in 0..nq {
                        sum += l[(j1, k1)] * quad_values[k1 + nq * k2];
                    }
                    partial2[j1 + nl * k2] = sum;
                }
            }
            for j2 in 0..nl {
                for j1 in 0..nl {
                    let mut sum = 0.0;
                    for k2 in 0..nq {
                        sum += partial2[j1 + nl * k2] * l[(j2, k2)];
                    }
                    zone_l2[j1 + nl * j2] = sum;
                }
            }

            // L2 is discontinuous, so this is a direct per-zone write.
            for (local, &dof) in self.l2.zone_dofs(z).iter().enumerate() {
                vec_l2[dof] = zone_l2[local];
            }
        }
    }

    /// Transpose force matrix action on hexahedral zones in 3D.
    fn mult_transpose_hex(&self, vec_h1: &DVectorView<f64>, vec_l2: &mut DVectorViewMut<f64>) {
        let t = &*self.tensors;
        let (nh, nl, nq) = (t.h1_dofs_1d(), t.l2_dofs_1d(), t.nqp_1d());
        let (h, g, l) = (t.h1_values(), t.h1_gradients(), t.l2_values());
        let h1_size = self.h1.num_true_dofs();

        let ws = &mut *self.workspace.borrow_mut();
        ws.resize(t, 3);
        let ForceWorkspace {
            zone_l2,
            zone_h1,
            quad_values,
            quad_scaled: _,
            partial1,
            partial2,
        } = ws;

        for z in 0..self.nzones {
            quad_values.fill(0.0);
            let h1_dofs = self.h1.zone_dofs(z);

            for c in 0..3 {
                for (local, &dof) in h1_dofs.iter().enumerate() {
                    zone_h1[local] = vec_h1[c * h1_size + dof];
                }
                for d in 0..3 {
                    let (a1, a2, a3) = match d {
                        0 => (g, h, h),
                        1 => (h, g, h),
                        _ => (h, h, g),
                    };
                    for k3 in 0..nq {
                        for i2 in 0..nh {
                            for i1 in 0..nh {
                                let mut sum = 0.0;
                                for i3 in 0..nh {
                                    sum += zone_h1[i1 + nh * (i2 + nh * i3)] * a3[(i3, k3)];
                                }
                                partial1[i1 + nh * (i2 + nh * k3)] = sum;
                            }
                        }
                    }
                    for k3 in 0..nq {
                        for k2 in 0..nq {
                            for i1 in 0..nh {
                                let mut sum = 0.0;
                                for i2 in 0..nh {
                                    sum += partial1[i1 + nh * (i2 + nh * k3)] * a2[(i2, k2)];
                                }
                                partial2[i1 + nh * (k2 + nq * k3)] = sum;
                            }
                        }
                    }
                    for k3 in 0..nq {
                        for k2 in 0..nq {
                            for k1 in 0..nq {
                                let mut sum = 0.0;
                                for i1 in 0..nh {
                                    sum += a1[(i1, k1)] * partial2[i1 + nh * (k2 + nq * k3)];
                                }
                                let q = k1 + nq * (k2 + nq * k3);
                                quad_values[q] += sum * self.quad_data.stress_jinv_t(z, q, c, d);
                            }
                        }
                    }
                }
            }

            for k3 in 0..nq {
                for k2 in 0..nq {
                    for j1 in 0..nl {
                        let mut sum = 0.0;
                        for k1 in 0..nq {
                            sum += l[(j1, k1)] * quad_values[k1 + nq * (k2 + nq * k3)];
                        }
                        partial2[j1 + nl * (k2 + nq * k3)] = sum;
                    }
                }
            }
            for k3 in 0..nq {
                for j2 in 0..nl {
                    for j1 in 0..nl {
                        let mut sum = 0.0;
                        for k2 in 0..nq {
                            sum += l[(j2, k2)] * partial2[j1 + nl * (k2 + nq * k3)];
                        }
                        partial1[j1 + nl * (j2 + nl * k3)] = sum;
                    }
                }
            }
            for j3 in 0..nl {
                for j2 in 0..nl {
                    for j1 in 0..nl {
                        let mut sum = 0.0;
                        for k3 in 0..nq {
                            sum += l[(j3, k3)] * partial1[j1 + nl * (j2 + nl * k3)];
                        }
                        zone_l2[j1 + nl * (j2 + nl * j3)] = sum;
                    }
                }
            }

            for (local, &dof) in self.l2.zone_dofs(z).iter().enumerate() {
                vec_l2[dof] = zone_l2[local];
            }
        }
    }
}

impl ForceOperator for ForcePaOperator<'_> {
    fn mult(&self, vec_l2: DVectorView<f64>, mut vec_h1: DVectorViewMut<f64>) -> eyre::Result<()> {
        check_vector_size(vec_l2.len(), self.l2_vector_size(), "L2 input")?;
        check_vector_size(vec_h1.len(), self.h1_vector_size(), "H1 output")?;
        vec_h1.fill(0.0);
        if self.dim == 2 {
            self.mult_quad(&vec_l2, &mut vec_h1);
        } else {
            self.mult_hex(&vec_l2, &mut vec_h1);
        }
        Ok(())
    }

    fn mult_transpose(
        &self,
        vec_h1: DVectorView<f64>,
        mut vec_l2: DVectorViewMut<f64>,
    ) -> eyre::Result<()> {
        check_vector_size(vec_h1.len(), self.h1_vector_size(), "H1 input")?;
        check_vector_size(vec_l2.len(), self.l2_vector_size(), "L2 output")?;
        if self.dim == 2 {
            self.mult_transpose_quad(&vec_h1, &mut vec_l2);
        } else {
            self.mult_transpose_hex(&vec_h1, &mut vec_l2);
        }
        Ok(())
    }

    fn h1_vector_size(&self) -> usize {
        self.dim * self.h1.num_true_dofs()
    }

    fn l2_vector_size(&self) -> usize {
        self.l2.num_true_dofs()
    }
}
