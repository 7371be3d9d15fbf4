//! Output accumulators: per-particle and per-shift forces, and energy group sums. The kernel
//! only adds to these; zeroing them at the start of a step is the caller's job.

use std::ops::AddAssign;

use lin_alg::f32::Vec3;

/// Bucket index for a pair of energy groups: `min · n_groups + max`.
pub fn group_pair(gi: usize, gj: usize, n_groups: usize) -> usize {
    let (lo, hi) = if gi <= gj { (gi, gj) } else { (gj, gi) };
    lo * n_groups + hi
}

/// Potential energy sums, bucketed by energy group pair. Buckets form an upper triangle of an
/// `n_groups × n_groups` matrix; see `pair_index`. Sums are f64.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnergyGroups {
    n_groups: usize,
    pub elec: Vec<f64>,
    pub vdw: Vec<f64>,
}

impl EnergyGroups {
    pub fn new(n_groups: usize) -> Self {
        let n = n_groups * n_groups;
        Self {
            n_groups,
            elec: vec![0.; n],
            vdw: vec![0.; n],
        }
    }

    pub fn n_groups(&self) -> usize {
        self.n_groups
    }

    /// Number of buckets; neighbor run group ids must be below this.
    pub fn n_buckets(&self) -> usize {
        self.elec.len()
    }

    /// The bucket for interactions between groups `gi` and `gj`. Order doesn't matter.
    pub fn pair_index(&self, gi: usize, gj: usize) -> usize {
        group_pair(gi, gj, self.n_groups)
    }

    #[inline(always)]
    pub fn add(&mut self, bucket: usize, elec: f64, vdw: f64) {
        self.elec[bucket] += elec;
        self.vdw[bucket] += vdw;
    }

    pub fn elec_between(&self, gi: usize, gj: usize) -> f64 {
        self.elec[self.pair_index(gi, gj)]
    }

    pub fn vdw_between(&self, gi: usize, gj: usize) -> f64 {
        self.vdw[self.pair_index(gi, gj)]
    }

    pub fn total_elec(&self) -> f64 {
        self.elec.iter().sum()
    }

    pub fn total_vdw(&self) -> f64 {
        self.vdw.iter().sum()
    }

    pub fn total(&self) -> f64 {
        self.total_elec() + self.total_vdw()
    }

    pub fn reset(&mut self) {
        self.elec.fill(0.);
        self.vdw.fill(0.);
    }
}

impl AddAssign<&Self> for EnergyGroups {
    fn add_assign(&mut self, rhs: &Self) {
        for (a, b) in self.elec.iter_mut().zip(&rhs.elec) {
            *a += b;
        }
        for (a, b) in self.vdw.iter_mut().zip(&rhs.vdw) {
            *a += b;
        }
    }
}

/// Everything a kernel invocation adds to.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ForceBuffers {
    /// Per particle.
    pub forces: Vec<Vec3>,
    /// Per shift vector. Each i-run adds its i-force here too, for the virial.
    pub fshift: Vec<Vec3>,
    pub energies: EnergyGroups,
}

impl ForceBuffers {
    pub fn new(n_particles: usize, n_shifts: usize, n_groups: usize) -> Self {
        Self {
            forces: vec![Vec3::new_zero(); n_particles],
            fshift: vec![Vec3::new_zero(); n_shifts],
            energies: EnergyGroups::new(n_groups),
        }
    }

    /// A zeroed buffer with the same shape as this one.
    pub fn zeroed_like(&self) -> Self {
        Self {
            forces: vec![Vec3::new_zero(); self.forces.len()],
            fshift: vec![Vec3::new_zero(); self.fshift.len()],
            energies: EnergyGroups::new(self.energies.n_groups()),
        }
    }

    pub fn reset(&mut self) {
        self.forces.fill(Vec3::new_zero());
        self.fshift.fill(Vec3::new_zero());
        self.energies.reset();
    }

    /// Sum of all particle forces. Near zero for a full list without external fields.
    pub fn net_force(&self) -> Vec3 {
        let mut result = Vec3::new_zero();
        for f in &self.forces {
            result += *f;
        }
        result
    }
}

impl AddAssign<&Self> for ForceBuffers {
    fn add_assign(&mut self, rhs: &Self) {
        for (a, b) in self.forces.iter_mut().zip(&rhs.forces) {
            *a += *b;
        }
        for (a, b) in self.fshift.iter_mut().zip(&rhs.fshift) {
            *a += *b;
        }
        self.energies += &rhs.energies;
    }
}
