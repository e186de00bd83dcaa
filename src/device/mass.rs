//! Batched evaluation of the Mass operator.
use crate::basis::Tensors1D;
use crate::device::dispatch::{Device, DeviceVector, IndexBuffer, TransposeMap};
use crate::device::force::ZoneScratch;
use crate::operator::{check_mass_setup, check_vector_size, MassOperator};
use crate::quadrature_data::QuadratureData;
use crate::space::{BasisKind, FiniteElementSpace};
use nalgebra::{DMatrix, DVectorView, DVectorViewMut};
use std::cell::RefCell;
use std::sync::Arc;
use thread_local::ThreadLocal;

/// Matrix-free Mass operator with essential-dof elimination, batched
/// execution.
///
/// The essential true-dof list is staged into a device buffer when set, so
/// the per-application eliminations are pure device-side index writes.
pub struct BatchedMassOperator<'a> {
    dim: usize,
    nzones: usize,
    size: usize,
    dofs_per_zone: usize,
    basis_kind: BasisKind,
    quad_data: &'a QuadratureData,
    tensors: Arc<Tensors1D>,
    device: Device,
    dofs: IndexBuffer,
    map: TransposeMap,
    ess_tdofs: Option<IndexBuffer>,
    buffers: RefCell<MassBuffers>,
    scratch: ThreadLocal<RefCell<ZoneScratch>>,
}

#[derive(Debug, Default)]
struct MassBuffers {
    input: DeviceVector,
    e_vec: DeviceVector,
    output: DeviceVector,
}

impl<'a> BatchedMassOperator<'a> {
    pub fn new(
        device: Device,
        quad_data: &'a QuadratureData,
        tensors: Arc<Tensors1D>,
        space: &'a dyn FiniteElementSpace,
    ) -> eyre::Result<Self> {
        check_mass_setup(quad_data, &tensors, space)?;

        let mut flat = Vec::with_capacity(space.num_zones() * space.dofs_per_zone());
        for zone in 0..space.num_zones() {
            flat.extend_from_slice(space.zone_dofs(zone));
        }

        Ok(Self {
            dim: quad_data.dim(),
            nzones: quad_data.num_zones(),
            size: space.num_true_dofs(),
            dofs_per_zone: space.dofs_per_zone(),
            basis_kind: space.basis_kind(),
            quad_data,
            tensors,
            device,
            dofs: IndexBuffer::stage(&flat),
            map: TransposeMap::for_space(space),
            ess_tdofs: None,
            buffers: RefCell::new(MassBuffers::default()),
            scratch: ThreadLocal::new(),
        })
    }

    fn basis_table(&self) -> (&DMatrix<f64>, usize) {
        match self.basis_kind {
            BasisKind::H1 => (self.tensors.h1_values(), self.tensors.h1_dofs_1d()),
            BasisKind::L2 => (self.tensors.l2_values(), self.tensors.l2_dofs_1d()),
        }
    }
}

impl<'a> MassOperator<'a> for BatchedMassOperator<'a> {
    fn mult(&self, x: DVectorView<f64>, mut y: DVectorViewMut<f64>) -> eyre::Result<()> {
        let size = self.vector_size();
        check_vector_size(x.len(), size, "mass input")?;
        check_vector_size(y.len(), size, "mass output")?;

        let dim = self.dim;
        let dofs_per_zone = self.dofs_per_zone;
        let mut buffers = self.buffers.borrow_mut();
        let MassBuffers {
            input,
            e_vec,
            output,
        } = &mut *buffers;

        input.upload(x);
        // Annihilate constrained columns on the staged copy so the action
        // stays symmetric under the elimination.
        if let Some(ess) = &self.ess_tdofs {
            self.device.zero_indices(input.as_mut_slice(), ess);
        }
        e_vec.resize(self.nzones * dofs_per_zone);
        output.resize(size);

        {
            let input = input.as_slice();
            let dofs = self.dofs.as_slice();
            self.device
                .dispatch_chunks(e_vec.as_mut_slice(), dofs_per_zone, |z, chunk| {
                    for (local, value) in chunk.iter_mut().enumerate() {
                        *value = input[dofs[z * dofs_per_zone + local]];
                    }
                });
        }

        {
            let quad_data = self.quad_data;
            let (b, nd) = self.basis_table();
            let nq = self.tensors.nqp_1d();
            let scratch = &self.scratch;
            let tensors = &*self.tensors;
            self.device
                .dispatch_chunks(e_vec.as_mut_slice(), dofs_per_zone, |z, zone| {
                    let cell = scratch.get_or(|| RefCell::new(ZoneScratch::default()));
                    let scratch = &mut *cell.borrow_mut();
                    scratch.resize(tensors, dim);
                    if dim == 2 {
                        mass_zone_quad(quad_data, b, nd, nq, z, zone, scratch);
                    } else {
                        mass_zone_hex(quad_data, b, nd, nq, z, zone, scratch);
                    }
                });
        }

        {
            let e_vec = e_vec.as_slice();
            let map = &self.map;
            self.device.dispatch_elements(output.as_mut_slice(), |true_dof, value| {
                let mut sum = 0.0;
                for &position in map.contributions(true_dof) {
                    sum += e_vec[position];
                }
                *value = sum;
            });
        }

        if let Some(ess) = &self.ess_tdofs {
            self.device.zero_indices(output.as_mut_slice(), ess);
        }
        output.download(y.as_view_mut());
        Ok(())
    }

    fn set_essential_true_dofs(&mut self, dofs: Option<&'a [usize]>) {
        log::debug!(
            "batched mass operator: staging {} essential true dofs",
            dofs.map_or(0, <[usize]>::len)
        );
        self.ess_tdofs = dofs.map(IndexBuffer::stage);
    }

    fn eliminate_rhs(&self, mut b: DVectorViewMut<f64>) -> eyre::Result<()> {
        check_vector_size(b.len(), self.vector_size(), "right-hand side")?;
        if let Some(ess) = &self.ess_tdofs {
            for &dof in ess.as_slice() {
                b[dof] = 0.0;
            }
        }
        Ok(())
    }

    fn vector_size(&self) -> usize {
        self.size
    }
}

/// In-place per-zone mass action, quadrilateral layout.
fn mass_zone_quad(
    quad_data: &QuadratureData,
    b: &DMatrix<f64>,
    nd: usize,
    nq: usize,
    z: usize,
    zone: &mut [f64],
    scratch: &mut ZoneScratch,
) {
    for k2 in 0..nq {
        for i1 in 0..nd {
            let mut sum = 0.0;
            for i2 in 0..nd {
                sum += zone[i1 + nd * i2] * b[(i2, k2)];
            }
            scratch.partial1[i1 + nd * k2] = sum;
        }
    }
    for k2 in 0..nq {
        for k1 in 0..nq {
            let mut sum = 0.0;
            for i1 in 0..nd {
                sum += b[(i1, k1)] * scratch.partial1[i1 + nd * k2];
            }
            let q = k1 + nq * k2;
            scratch.quad_values[q] = sum * quad_data.rho0_det_j0_w(z, q);
        }
    }
    for k2 in 0..nq {
        for i1 in 0..nd {
            let mut sum = 0.0;
            for k1 in 0..nq {
                sum += b[(i1, k1)] * scratch.quad_values[k1 + nq * k2];
            }
            scratch.partial1[i1 + nd * k2] = sum;
        }
    }
    for i2 in 0..nd {
        for i1 in 0..nd {
            let mut sum = 0.0;
            for k2 in 0..nq {
                sum += scratch.partial1[i1 + nd * k2] * b[(i2, k2)];
            }
            zone[i1 + nd * i2] = sum;
        }
    }
}

/// In-place per-zone mass action, hexahedral layout.
fn mass_zone_hex(
    quad_data: &QuadratureData,
    b: &DMatrix<f64>,
    nd: usize,
    nq: usize,
    z: usize,
    zone: &mut [f64],
    scratch: &mut ZoneScratch,
) {
    for k3 in 0..nq {
        for i2 in 0..nd {
            for i1 in 0..nd {
                let mut sum = 0.0;
                for i3 in 0..nd {
                    sum += zone[i1 + nd * (i2 + nd * i3)] * b[(i3, k3)];
                }
                scratch.partial1[i1 + nd * (i2 + nd * k3)] = sum;
            }
        }
    }
    for k3 in 0..nq {
        for k2 in 0..nq {
            for i1 in 0..nd {
                let mut sum = 0.0;
                for i2 in 0..nd {
                    sum += scratch.partial1[i1 + nd * (i2 + nd * k3)] * b[(i2, k2)];
                }
                scratch.partial2[i1 + nd * (k2 + nq * k3)] = sum;
            }
        }
    }
    for k3 in 0..nq {
        for k2 in 0..nq {
            for k1 in 0..nq {
                let mut sum = 0.0;
                for i1 in 0..nd {
                    sum += b[(i1, k1)] * scratch.partial2[i1 + nd * (k2 + nq * k3)];
                }
                let q = k1 + nq * (k2 + nq * k3);
                scratch.quad_values[q] = sum * quad_data.rho0_det_j0_w(z, q);
            }
        }
    }

    for k3 in 0..nq {
        for k2 in 0..nq {
            for i1 in 0..nd {
                let mut sum = 0.0;
                for k1 in 0..nq {
                    sum += b[(i1, k1)] * scratch.quad_values[k1 + nq * (k2 + nq * k3)];
                }
                scratch.partial1[i1 + nd * (k2 + nq * k3)] = sum;
            }
        }
    }
    for k3 in 0..nq {
        for i2 in 0..nd {
            for i1 in 0..nd {
                let mut sum = 0.0;
                for k2 in 0..nq {
                    sum += scratch.partial1[i1 + nd * (k2 + nq * k3)] * b[(i2, k2)];
                }
                scratch.partial2[i1 + nd * (i2 + nd * k3)] = sum;
            }
        }
    }
    for i3 in 0..nd {
        for i2 in 0..nd {
            for i1 in 0..nd {
                let mut sum = 0.0;
                for k3 in 0..nq {
                    sum += scratch.partial2[i1 + nd * (i2 + nd * k3)] * b[(i3, k3)];
                }
                zone[i1 + nd * (i2 + nd * i3)] = sum;
            }
        }
    }
}
