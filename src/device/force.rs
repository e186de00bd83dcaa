//! Batched evaluation of the Force operator.
//!
//! One application is four launches: distribute the input, gather it into a
//! zone-major element vector, run the per-zone contraction kernel over all
//! zones at once, and collect the element contributions into the true-dof
//! output through the transpose map. The per-zone mathematics is identical
//! to the host path but coded against flat staged buffers.
use crate::basis::Tensors1D;
use crate::device::dispatch::{Device, DeviceVector, IndexBuffer, TransposeMap};
use crate::operator::{check_force_setup, check_vector_size, ForceOperator};
use crate::quadrature_data::QuadratureData;
use crate::space::FiniteElementSpace;
use nalgebra::{DVectorView, DVectorViewMut};
use std::cell::RefCell;
use std::sync::Arc;
use thread_local::ThreadLocal;

/// Matrix-free Force operator, batched execution.
///
/// Zone dof tables are staged at construction; nothing is re-staged per
/// application except the input vector itself.
pub struct BatchedForceOperator<'a> {
    dim: usize,
    nzones: usize,
    h1_size: usize,
    l2_size: usize,
    h1_dofs_per_zone: usize,
    l2_dofs_per_zone: usize,
    quad_data: &'a QuadratureData,
    tensors: Arc<Tensors1D>,
    device: Device,
    h1_dofs: IndexBuffer,
    l2_dofs: IndexBuffer,
    h1_map: TransposeMap,
    l2_map: TransposeMap,
    buffers: RefCell<ForceBuffers>,
    scratch: ThreadLocal<RefCell<ZoneScratch>>,
}

#[derive(Debug, Default)]
struct ForceBuffers {
    input: DeviceVector,
    e_l2: DeviceVector,
    e_h1: DeviceVector,
    output: DeviceVector,
}

#[derive(Debug, Default)]
pub(crate) struct ZoneScratch {
    pub quad_values: Vec<f64>,
    pub quad_scaled: Vec<f64>,
    pub partial1: Vec<f64>,
    pub partial2: Vec<f64>,
}

impl ZoneScratch {
    pub(crate) fn resize(&mut self, tensors: &Tensors1D, dim: usize) {
        let mx = tensors
            .h1_dofs_1d()
            .max(tensors.l2_dofs_1d())
            .max(tensors.nqp_1d());
        let nq = tensors.nqp_1d();
        let (nqp, partial) = if dim == 2 {
            (nq * nq, mx * mx)
        } else {
            (nq * nq * nq, mx * mx * mx)
        };
        self.quad_values.resize(nqp, 0.0);
        self.quad_scaled.resize(nqp, 0.0);
        self.partial1.resize(partial, 0.0);
        self.partial2.resize(partial, 0.0);
    }
}

impl<'a> BatchedForceOperator<'a> {
    pub fn new(
        device: Device,
        quad_data: &'a QuadratureData,
        tensors: Arc<Tensors1D>,
        h1: &'a dyn FiniteElementSpace,
        l2: &'a dyn FiniteElementSpace,
    ) -> eyre::Result<Self> {
        check_force_setup(quad_data, &tensors, h1, l2)?;

        // Stage the dof tables and the collection maps once; `mult` never
        // touches the space abstraction again.
        let mut h1_flat = Vec::with_capacity(h1.num_zones() * h1.dofs_per_zone());
        for zone in 0..h1.num_zones() {
            h1_flat.extend_from_slice(h1.zone_dofs(zone));
        }
        let mut l2_flat = Vec::with_capacity(l2.num_zones() * l2.dofs_per_zone());
        for zone in 0..l2.num_zones() {
            l2_flat.extend_from_slice(l2.zone_dofs(zone));
        }

        Ok(Self {
            dim: quad_data.dim(),
            nzones: quad_data.num_zones(),
            h1_size: h1.num_true_dofs(),
            l2_size: l2.num_true_dofs(),
            h1_dofs_per_zone: h1.dofs_per_zone(),
            l2_dofs_per_zone: l2.dofs_per_zone(),
            quad_data,
            tensors,
            device,
            h1_dofs: IndexBuffer::stage(&h1_flat),
            l2_dofs: IndexBuffer::stage(&l2_flat),
            h1_map: TransposeMap::for_space(h1),
            l2_map: TransposeMap::for_space(l2),
            buffers: RefCell::new(ForceBuffers::default()),
            scratch: ThreadLocal::new(),
        })
    }
}

impl ForceOperator for BatchedForceOperator<'_> {
    fn mult(&self, vec_l2: DVectorView<f64>, mut vec_h1: DVectorViewMut<f64>) -> eyre::Result<()> {
        check_vector_size(vec_l2.len(), self.l2_vector_size(), "L2 input")?;
        check_vector_size(vec_h1.len(), self.h1_vector_size(), "H1 output")?;

        let dim = self.dim;
        let (h1_dpz, l2_dpz) = (self.h1_dofs_per_zone, self.l2_dofs_per_zone);
        let mut buffers = self.buffers.borrow_mut();
        let ForceBuffers {
            input,
            e_l2,
            e_h1,
            output,
        } = &mut *buffers;

        // Distribute.
        input.upload(vec_l2);
        e_l2.resize(self.nzones * l2_dpz);
        e_h1.resize(self.nzones * dim * h1_dpz);
        output.resize(dim * self.h1_size);

        // Gather into the zone-major element vector.
        {
            let input = input.as_slice();
            let l2_dofs = self.l2_dofs.as_slice();
            self.device.dispatch_chunks(e_l2.as_mut_slice(), l2_dpz, |z, chunk| {
                for (local, value) in chunk.iter_mut().enumerate() {
                    *value = input[l2_dofs[z * l2_dpz + local]];
                }
            });
        }

        // All-zone contraction.
        {
            let e_l2 = e_l2.as_slice();
            let quad_data = self.quad_data;
            let tensors = &*self.tensors;
            let scratch = &self.scratch;
            self.device
                .dispatch_chunks(e_h1.as_mut_slice(), dim * h1_dpz, |z, out| {
                    let cell = scratch.get_or(|| RefCell::new(ZoneScratch::default()));
                    let scratch = &mut *cell.borrow_mut();
                    scratch.resize(tensors, dim);
                    let zone_l2 = &e_l2[z * l2_dpz..(z + 1) * l2_dpz];
                    out.fill(0.0);
                    if dim == 2 {
                        force_zone_quad(quad_data, tensors, z, zone_l2, out, scratch);
                    } else {
                        force_zone_hex(quad_data, tensors, z, zone_l2, out, scratch);
                    }
                });
        }

        // Collect: one work item per output entry sums its own contributions.
        {
            let e_h1 = e_h1.as_slice();
            let h1_map = &self.h1_map;
            let h1_size = self.h1_size;
            self.device.dispatch_elements(output.as_mut_slice(), |index, value| {
                let (c, true_dof) = (index / h1_size, index % h1_size);
                let mut sum = 0.0;
                for &position in h1_map.contributions(true_dof) {
                    let (z, local) = (position / h1_dpz, position % h1_dpz);
                    sum += e_h1[z * dim * h1_dpz + c * h1_dpz + local];
                }
                *value = sum;
            });
        }

        output.download(vec_h1.as_view_mut());
        Ok(())
    }

    fn mult_transpose(
        &self,
        vec_h1: DVectorView<f64>,
        mut vec_l2: DVectorViewMut<f64>,
    ) -> eyre::Result<()> {
        check_vector_size(vec_h1.len(), self.h1_vector_size(), "H1 input")?;
        check_vector_size(vec_l2.len(), self.l2_vector_size(), "L2 output")?;

        let dim = self.dim;
        let (h1_dpz, l2_dpz) = (self.h1_dofs_per_zone, self.l2_dofs_per_zone);
        let mut buffers = self.buffers.borrow_mut();
        let ForceBuffers {
            input,
            e_l2,
            e_h1,
            output,
        } = &mut *buffers;

        input.upload(vec_h1);
        e_h1.resize(self.nzones * dim * h1_dpz);
        e_l2.resize(self.nzones * l2_dpz);
        output.resize(self.l2_size);

        {
            let input = input.as_slice();
            let h1_dofs = self.h1_dofs.as_slice();
            let h1_size = self.h1_size;
            self.device
                .dispatch_chunks(e_h1.as_mut_slice(), dim * h1_dpz, |z, chunk| {
                    for c in 0..dim {
                        for local in 0..h1_dpz {
                            chunk[c * h1_dpz + local] =
                                input[c * h1_size + h1_dofs[z * h1_dpz + local]];
                        }
                    }
                });
        }

        {
            let e_h1 = e_h1.as_slice();
            let quad_data = self.quad_data;
            let tensors = &*self.tensors;
            let scratch = &self.scratch;
            self.device.dispatch_chunks(e_l2.as_mut_slice(), l2_dpz, |z, out| {
                let cell = scratch.get_or(|| RefCell::new(ZoneScratch::default()));
                let scratch = &mut *cell.borrow_mut();
                scratch.resize(tensors, dim);
                let zone_h1 = &e_h1[z * dim * h1_dpz..(z + 1) * dim * h1_dpz];
                if dim == 2 {
                    force_transpose_zone_quad(quad_data, tensors, z, zone_h1, out, scratch);
                } else {
                    force_transpose_zone_hex(quad_data, tensors, z, zone_h1, out, scratch);
                }
            });
        }

        // L2 dofs are zone-exclusive, so every work item sums exactly one
        // contribution; using the map keeps the collection uniform.
        {
            let e_l2 = e_l2.as_slice();
            let l2_map = &self.l2_map;
            self.device.dispatch_elements(output.as_mut_slice(), |true_dof, value| {
                let mut sum = 0.0;
                for &position in l2_map.contributions(true_dof) {
                    sum += e_l2[position];
                }
                *value = sum;
            });
        }

        output.download(vec_l2.as_view_mut());
        Ok(())
    }

    fn h1_vector_size(&self) -> usize {
        self.dim * self.h1_size
    }

    fn l2_vector_size(&self) -> usize {
        self.l2_size
    }
}

/// Per-zone force contraction, quadrilateral layout. `out` holds all velocity
/// components of the zone, component-major.
fn force_zone_quad(
    quad_data: &QuadratureData,
    tensors: &Tensors1D,
    z: usize,
    zone_l2: &[f64],
    out: &mut [f64],
    scratch: &mut ZoneScratch,
) {
    let (nh, nl, nq) = (tensors.h1_dofs_1d(), tensors.l2_dofs_1d(), tensors.nqp_1d());
    let (h, g, l) = (tensors.h1_values(), tensors.h1_gradients(), tensors.l2_values());
    let h1_dofs = nh * nh;

    for k2 in 0..nq {
        for j1 in 0..nl {
            let mut sum = 0.0;
            for j2 in 0..nl {
                sum += zone_l2[j1 + nl * j2] * l[(j2, k2)];
            }
            scratch.partial1[j1 + nl * k2] = sum;
        }
    }
    for k2 in 0..nq {
        for k1 in 0..nq {
            let mut sum = 0.0;
            for j1 in 0..nl {
                sum += l[(j1, k1)] * scratch.partial1[j1 + nl * k2];
            }
            scratch.quad_values[k1 + nq * k2] = sum;
        }
    }

    for c in 0..2 {
        for d in 0..2 {
            for q in 0..nq * nq {
                scratch.quad_scaled[q] =
                    scratch.quad_values[q] * quad_data.stress_jinv_t(z, q, c, d);
            }
            let (a1, a2) = if d == 0 { (g, h) } else { (h, g) };
            for k2 in 0..nq {
                for i1 in 0..nh {
                    let mut sum = 0.0;
                    for k1 in 0..nq {
                        sum += a1[(i1, k1)] * scratch.quad_scaled[k1 + nq * k2];
                    }
                    scratch.partial2[i1 + nh * k2] = sum;
                }
            }
            for i2 in 0..nh {
                for i1 in 0..nh {
                    let mut sum = 0.0;
                    for k2 in 0..nq {
                        sum += scratch.partial2[i1 + nh * k2] * a2[(i2, k2)];
                    }
                    out[c * h1_dofs + i1 + nh * i2] += sum;
                }
            }
        }
    }
}

/// Per-zone force contraction, hexahedral layout.
fn force_zone_hex(
    quad_data: &QuadratureData,
    tensors: &Tensors1D,
    z: usize,
    zone_l2: &[f64],
    out: &mut [f64],
    scratch: &mut ZoneScratch,
) {
    let (nh, nl, nq) = (tensors.h1_dofs_1d(), tensors.l2_dofs_1d(), tensors.nqp_1d());
    let (h, g, l) = (tensors.h1_values(), tensors.h1_gradients(), tensors.l2_values());
    let h1_dofs = nh * nh * nh;

    for k3 in 0..nq {
        for j2 in 0..nl {
            for j1 in 0..nl {
                let mut sum = 0.0;
                for j3 in 0..nl {
                    sum += zone_l2[j1 + nl * (j2 + nl * j3)] * l[(j3, k3)];
                }
                scratch.partial1[j1 + nl * (j2 + nl * k3)] = sum;
            }
        }
    }
    for k3 in 0..nq {
        for k2 in 0..nq {
            for j1 in 0..nl {
                let mut sum = 0.0;
                for j2 in 0..nl {
                    sum += scratch.partial1[j1 + nl * (j2 + nl * k3)] * l[(j2, k2)];
                }
                scratch.partial2[j1 + nl * (k2 + nq * k3)] = sum;
            }
        }
    }
    for k3 in 0..nq {
        for k2 in 0..nq {
            for k1 in 0..nq {
                let mut sum = 0.0;
                for j1 in 0..nl {
                    sum += l[(j1, k1)] * scratch.partial2[j1 + nl * (k2 + nq * k3)];
                }
                scratch.quad_values[k1 + nq * (k2 + nq * k3)] = sum;
            }
        }
    }

    for c in 0..3 {
        for d in 0..3 {
            for q in 0..nq * nq * nq {
                scratch.quad_scaled[q] =
                    scratch.quad_values[q] * quad_data.stress_jinv_t(z, q, c, d);
            }
            let (a1, a2, a3) = match d {
                0 => (g, h, h),
                1 => (h, g, h),
                _ => (h, h, g),
            };
            for k3 in 0..nq {
                for k2 in 0..nq {
                    for i1 in 0..nh {
                        let mut sum = 0.0;
                        for k1 in 0..nq {
                            sum += a1[(i1, k1)] * scratch.quad_scaled[k1 + nq * (k2 + nq * k3)];
                        }
                        scratch.partial1[i1 + nh * (k2 + nq * k3)] = sum;
                    }
                }
            }
            for k3 in 0..nq {
                for i2 in 0..nh {
                    for i1 in 0..nh {
                        let mut sum = 0.0;
                        for k2 in 0..nq {
                            sum += scratch.partial1[i1 + nh * (k2 + nq * k3)] * a2[(i2, k2)];
                        }
                        scratch.partial2[i1 + nh * (i2 + nh * k3)] = sum;
                    }
                }
            }
            for i3 in 0..nh {
                for i2 in 0..nh {
                    for i1 in 0..nh {
                        let mut sum = 0.0;
                        for k3 in 0..nq {
                            sum += scratch.partial2[i1 + nh * (i2 + nh * k3)] * a3[(i3, k3)];
                        }
                        out[c * h1_dofs + i1 + nh * (i2 + nh * i3)] += sum;
                    }
                }
            }
        }
    }
}

/// Per-zone transpose force contraction, quadrilateral layout. `zone_h1`
/// holds all velocity components of the zone, component-major.
fn force_transpose_zone_quad(
    quad_data: &QuadratureData,
    tensors: &Tensors1D,
    z: usize,
    zone_h1: &[f64],
    out: &mut [f64],
    scratch: &mut ZoneScratch,
) {
    let (nh, nl, nq) = (tensors.h1_dofs_1d(), tensors.l2_dofs_1d(), tensors.nqp_1d());
    let (h, g, l) = (tensors.h1_values(), tensors.h1_gradients(), tensors.l2_values());
    let h1_dofs = nh * nh;

    scratch.quad_values.fill(0.0);
    for c in 0..2 {
        let component = &zone_h1[c * h1_dofs..(c + 1) * h1_dofs];
        for d in 0..2 {
            let (a1, a2) = if d == 0 { (g, h) } else { (h, g) };
            for k2 in 0..nq {
                for i1 in 0..nh {
                    let mut sum = 0.0;
                    for i2 in 0..nh {
                        sum += component[i1 + nh * i2] * a2[(i2, k2)];
                    }
                    scratch.partial1[i1 + nh * k2] = sum;
                }
            }
            for k2 in 0..nq {
                for k1 in 0..nq {
                    let mut sum = 0.0;
                    for i1 in 0..nh {
                        sum += a1[(i1, k1)] * scratch.partial1[i1 + nh * k2];
                    }
                    let q = k1 + nq * k2;
                    scratch.quad_values[q] += sum * quad_data.stress_jinv_t(z, q, c, d);
                }
            }
        }
    }

    for k2 in 0..nq {
        for j1 in 0..nl {
            let mut sum = 0.0;
            for k1 in 0..nq {
                sum += l[(j1, k1)] * scratch.quad_values[k1 + nq * k2];
            }
            scratch.partial2[j1 + nl * k2] = sum;
        }
    }
    for j2 in 0..nl {
        for j1 in 0..nl {
            let mut sum = 0.0;
            for k2 in 0..nq {
                sum += scratch.partial2[j1 + nl * k2] * l[(j2, k2)];
            }
            out[j1 + nl * j2] = sum;
        }
    }
}

/// Per-zone transpose force contraction, hexahedral layout.
fn force_transpose_zone_hex(
    quad_data: &QuadratureData,
    tensors: &Tensors1D,
    z: usize,
    zone_h1: &[f64],
    out: &mut [f64],
    scratch: &mut ZoneScratch,
) {
    let (nh, nl, nq) = (tensors.h1_dofs_1d(), tensors.l2_dofs_1d(), tensors.nqp_1d());
    let (h, g, l) = (tensors.h1_values(), tensors.h1_gradients(), tensors.l2_values());
    let h1_dofs = nh * nh * nh;

    scratch.quad_values.fill(0.0);
    for c in 0..3 {
        let component = &zone_h1[c * h1_dofs..(c + 1) * h1_dofs];
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
                            sum += component[i1 + nh * (i2 + nh * i3)] * a3[(i3, k3)];
                        }
                        scratch.partial1[i1 + nh * (i2 + nh * k3)] = sum;
                    }
                }
            }
            for k3 in 0..nq {
                for k2 in 0..nq {
                    for i1 in 0..nh {
                        let mut sum = 0.0;
                        for i2 in 0..nh {
                            sum += scratch.partial1[i1 + nh * (i2 + nh * k3)] * a2[(i2, k2)];
                        }
                        scratch.partial2[i1 + nh * (k2 + nq * k3)] = sum;
                    }
                }
            }
            for k3 in 0..nq {
                for k2 in 0..nq {
                    for k1 in 0..nq {
                        let mut sum = 0.0;
                        for i1 in 0..nh {
                            sum += a1[(i1, k1)] * scratch.partial2[i1 + nh * (k2 + nq * k3)];
                        }
                        let q = k1 + nq * (k2 + nq * k3);
                        scratch.quad_values[q] += sum * quad_data.stress_jinv_t(z, q, c, d);
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
                    sum += l[(j1, k1)] * scratch.quad_values[k1 + nq * (k2 + nq * k3)];
                }
                scratch.partial2[j1 + nl * (k2 + nq * k3)] = sum;
            }
        }
    }
    for k3 in 0..nq {
        for j2 in 0..nl {
            for j1 in 0..nl {
                let mut sum = 0.0;
                for k2 in 0..nq {
                    sum += l[(j2, k2)] * scratch.partial2[j1 + nl * (k2 + nq * k3)];
                }
                scratch.partial1[j1 + nl * (j2 + nl * k3)] = sum;
            }
        }
    }
    for j3 in 0..nl {
        for j2 in 0..nl {
            for j1 in 0..nl {
                let mut sum = 0.0;
                for k3 in 0..nq {
                    sum += l[(j3, k3)] * scratch.partial1[j1 + nl * (j2 + nl * k3)];
                }
                out[j1 + nl * (j2 + nl * j3)] = sum;
            }
        }
    }
}
