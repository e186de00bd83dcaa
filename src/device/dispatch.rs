//! The batched execution primitive and device-resident staging buffers.
//!
//! The batched operators are written against an opaque "execute a kernel
//! over N work items" contract. [`Device`] realizes that contract on the
//! process-wide thread pool; a real accelerator runtime can replace this
//! realization without touching the operator code, because all data reaching
//! a kernel has been staged into [`DeviceVector`]/[`IndexBuffer`] storage
//! through explicit upload/download steps beforehand. All transfers are
//! blocking; there is no overlapped execution contract here.
use crate::space::FiniteElementSpace;
use itertools::izip;
use log::debug;
use nalgebra::{DVectorView, DVectorViewMut};
use rayon::iter::{IndexedParallelIterator, ParallelIterator};
use rayon::slice::ParallelSliceMut;

/// Handle to the batched execution target.
#[derive(Debug, Default, Clone)]
pub struct Device {
    _private: (),
}

impl Device {
    pub fn new() -> Self {
        Self::default()
    }

    /// Launches `kernel` once per work item, where item `i` exclusively owns
    /// the `i`-th `chunk`-sized slice of `out`. Work items may not observe
    /// each other; this is what makes the launch data-parallel.
    pub fn dispatch_chunks<F>(&self, out: &mut [f64], chunk: usize, kernel: F)
    where
        F: Fn(usize, &mut [f64]) + Sync,
    {
        assert!(chunk > 0 && out.len() % chunk == 0);
        out.par_chunks_mut(chunk)
            .enumerate()
            .for_each(|(item, data)| kernel(item, data));
    }

    /// Launches `kernel` once per element of `out`.
    pub fn dispatch_elements<F>(&self, out: &mut [f64], kernel: F)
    where
        F: Fn(usize, &mut f64) + Sync,
    {
        out.par_chunks_mut(1)
            .enumerate()
            .for_each(|(item, data)| kernel(item, &mut data[0]));
    }

    /// Zeroes the listed entries of a device buffer. The write pattern is
    /// scattered, so this runs as a single work item.
    pub fn zero_indices(&self, buf: &mut [f64], indices: &IndexBuffer) {
        for &index in indices.as_slice() {
            buf[index] = 0.0;
        }
    }
}

/// A device-resident floating point buffer.
///
/// Host vectors never reach a kernel directly: they are distributed into a
/// `DeviceVector` before a launch and collected back afterwards.
#[derive(Debug, Default, Clone)]
pub struct DeviceVector {
    data: Vec<f64>,
}

impl DeviceVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn resize(&mut self, len: usize) {
        self.data.resize(len, 0.0);
    }

    /// Host-to-device distribution step (blocking).
    pub fn upload(&mut self, host: DVectorView<f64>) {
        self.data.clear();
        self.data.extend(host.iter().copied());
    }

    /// Device-to-host collection step (blocking).
    ///
    /// # Panics
    ///
    /// Panics if the host vector length differs from the buffer length.
    pub fn download(&self, mut host: DVectorViewMut<f64>) {
        assert_eq!(host.len(), self.data.len());
        for (entry, &value) in izip!(host.iter_mut(), &self.data) {
            *entry = value;
        }
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }
}

/// A device-resident index list (dof tables, essential-dof sets).
///
/// Staged once -- at operator construction or on `set_essential_true_dofs` --
/// rather than on every application.
#[derive(Debug, Clone)]
pub struct IndexBuffer {
    data: Vec<usize>,
}

impl IndexBuffer {
    pub fn stage(indices: &[usize]) -> Self {
        Self {
            data: indices.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.data
    }
}

/// Transpose of the zone-to-true-dof map: for every true dof, the positions
/// `zone * dofs_per_zone + local` of all zone-local dofs restricting to it.
///
/// The batched collection kernel runs parallel over *true dofs*, each work
/// item summing the element-vector contributions listed here. That keeps the
/// scatter-add race-free without any synchronization between work items (the
/// host operators instead loop over zones and sum in place, which a batched
/// launch cannot do for dofs shared between zones).
#[derive(Debug, Clone)]
pub struct TransposeMap {
    offsets: Vec<usize>,
    positions: Vec<usize>,
}

impl TransposeMap {
    pub fn for_space(space: &dyn FiniteElementSpace) -> Self {
        let num_true_dofs = space.num_true_dofs();
        let dofs_per_zone = space.dofs_per_zone();

        let mut counts = vec![0usize; num_true_dofs];
        for zone in 0..space.num_zones() {
            for &dof in space.zone_dofs(zone) {
                counts[dof] += 1;
            }
        }

        let mut offsets = Vec::with_capacity(num_true_dofs + 1);
        let mut running = 0;
        offsets.push(0);
        for count in &counts {
            running += count;
            offsets.push(running);
        }

        let mut next = offsets.clone();
        let mut positions = vec![0usize; running];
        for zone in 0..space.num_zones() {
            for (local, &dof) in space.zone_dofs(zone).iter().enumerate() {
                positions[next[dof]] = zone * dofs_per_zone + local;
                next[dof] += 1;
            }
        }

        debug!(
            "staged transpose map: {} true dofs, {} (zone, local) pairs",
            num_true_dofs, running
        );
        Self { offsets, positions }
    }

    pub fn num_true_dofs(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Element-vector positions contributing to the given true dof.
    #[inline]
    pub fn contributions(&self, true_dof: usize) -> &[usize] {
        &self.positions[self.offsets[true_dof]..self.offsets[true_dof + 1]]
    }
}
