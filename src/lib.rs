#![allow(confusable_idents)]
#![allow(mixed_script_confusables)]

//! SIMD non-bonded pair kernels for molecular dynamics: the inner loop that, given a compact
//! neighbor list, computes electrostatic and Lennard-Jones forces and potential energies between
//! particles. This dominates the cost of a simulation step; everything else here exists to feed
//! it, or check its inputs.
//!
//! The textual information here is informal, and aimed at code maintenance.
//!
//! ## Layout
//! - `lanes`: A portable W-wide f32 lane abstraction (`SimdReal`), backed by `f32` (W=1), and
//!   `wide`'s `f32x4` and `f32x8`. Also the lane validity mask.
//! - `simd`: Loading particle data into lanes (broadcast for i, gather for j), the explicit 4×4
//!   transpose used for table coefficients, and scattering j-forces back out.
//! - `table`: Cubic spline tables, in the flat (Y, F, G, H) layout.
//! - `forces`: Electrostatics and VdW models. The kernel is generic over these.
//! - `non_bonded`: The kernel itself: outer loop, inner loop, masked tail, flush, and counters.
//! - `neighbors`: Neighbor list layout, construction, and validation.
//! - `cell`: The periodic cell, and its shift vectors.
//! - `params`: Lennard-Jones pair coefficients by type.
//! - `energy`: Force and energy group accumulators.
//!
//! ## Conventions
//! Forces on i are `d · fscal`, with `d = x_i + shift - x_j`. The same force is subtracted from
//! j. The kernel only ever adds to its outputs; zeroing them each step is the caller's job.
//!
//! Lennard-Jones coefficients carry 6× and 12× prefactors: V = c12/(12 r¹²) - c6/(6 r⁶).
//!
//! Units are whatever the caller's positions, charges, and `epsfac` use; the defaults here
//! (`ONE_4PI_EPS0`) assume nm, e, and kJ/mol.
//!
//! On f32 vs f64: Pair math is f32. Energy group sums are f64.
//!
//! ## Parallelism
//! A single kernel invocation is single-threaded, and data-parallel across lanes. Run
//! `run_nonbonded_parallel` on a partitioned neighbor list to use the thread pool; each worker
//! gets private output buffers, which are reduced after.

mod cell;
mod energy;
mod forces;
mod lanes;
mod neighbors;
mod non_bonded;
mod params;
mod simd;
mod table;
mod util;


#[cfg(feature = "encode")]
use bincode::{Decode, Encode};
use lin_alg::f32::Vec3;
use log::{debug, warn};
use thiserror::Error;

pub use crate::{
    cell::{CENTRAL_SHIFT, N_SHIFTS, SimBox, shift_index},
    energy::{EnergyGroups, ForceBuffers, group_pair},
    forces::{
        Coulomb, CubicSplineTable, ElecModel, LennardJones, NoElec, NoVdw, PairGeometry, PairTerm,
        ReactionField, VdwModel,
    },
    lanes::{LaneMask, SimdReal},
    neighbors::{
        NEIGHBOR_SENTINEL, NeighborList, NeighborListBuilder, NeighborRun, build_neighbor_list,
    },
    non_bonded::{kernel_flop_costs, nb_kernel, run_nonbonded_parallel},
    params::LjPairTable,
    simd::{Vec3Lanes, transpose_4x4},
    table::SplineTable,
    util::{FlopCosts, KernelCounters},
};

/// Coulomb prefactor, 1/(4π ε₀), in kJ mol⁻¹ nm e⁻².
pub const ONE_4PI_EPS0: f32 = 138.935_46;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum KernelError {
    #[error("Cubic spline table electrostatics requires a table")]
    MissingTable,
    #[error("Invalid interaction table: {0}")]
    InvalidTable(String),
    #[error("Length mismatch for {what}: expected {expected}, found {found}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("{what} index {index} is out of range (length {len})")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },
    #[error("Malformed neighbor list: {0}")]
    MalformedNeighborList(String),
    #[error("Pair distance {r} is outside the table range (must be < {max})")]
    TableRange { r: f32, max: f32 },
    #[error("Cutoff {cutoff} is more than half the shortest cell edge ({max} max)")]
    CutoffTooLong { cutoff: f32, max: f32 },
}

/// Whether to compute potential energies along with forces.
#[cfg_attr(feature = "encode", derive(Encode, Decode))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ComputeMode {
    #[default]
    PotentialAndForce,
    /// Skips energy bookkeeping; `ForceBuffers::energies` is untouched.
    ForceOnly,
}

#[cfg_attr(feature = "encode", derive(Encode, Decode))]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum ElecKind {
    None,
    Coulomb,
    ReactionField {
        k_rf: f32,
        c_rf: f32,
    },
    /// Requires a `SplineTable`, passed alongside the config.
    #[default]
    CubicSplineTable,
}

#[cfg_attr(feature = "encode", derive(Encode, Decode))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VdwKind {
    None,
    #[default]
    LennardJones,
}

/// Lane count for the kernel.
#[cfg_attr(feature = "encode", derive(Encode, Decode))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SimdWidth {
    /// One neighbor at a time.
    Scalar,
    #[default]
    X4,
    X8,
    /// X8 if AVX2 is available at runtime; X4 otherwise.
    Auto,
}

impl SimdWidth {
    /// Replace `Auto` with a concrete width.
    pub fn resolve(self) -> Self {
        match self {
            Self::Auto => {
                #[cfg(target_arch = "x86_64")]
                if is_x86_feature_detected!("avx2") {
                    return Self::X8;
                }
                debug!("AVX2 not available; using 4-wide lanes");
                Self::X4
            }
            w => w,
        }
    }
}

#[cfg_attr(feature = "encode", derive(Encode, Decode))]
#[derive(Debug, Clone, PartialEq)]
pub struct KernelConfig {
    pub elec: ElecKind,
    pub vdw: VdwKind,
    pub mode: ComputeMode,
    pub simd_width: SimdWidth,
    /// Run `NbInputs::validate` and output shape checks before each invocation. These walk the
    /// whole list; disable once inputs are known-good.
    pub validate_inputs: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            elec: Default::default(),
            vdw: Default::default(),
            mode: Default::default(),
            simd_width: Default::default(),
            validate_inputs: true,
        }
    }
}

/// Read-only per-step data for the kernel. Indexed by global particle id, except `shift_vecs`,
/// which is indexed by `NeighborRun::shift`.
#[derive(Clone, Copy, Debug)]
pub struct NbInputs<'a> {
    pub posits: &'a [Vec3],
    pub charges: &'a [f32],
    pub vdw_types: &'a [usize],
    pub lj: &'a LjPairTable,
    pub shift_vecs: &'a [Vec3],
    /// Coulomb prefactor. i charges are scaled by this.
    pub epsfac: f32,
}

impl<'a> NbInputs<'a> {
    /// With `epsfac` set to `ONE_4PI_EPS0`.
    pub fn new(
        posits: &'a [Vec3],
        charges: &'a [f32],
        vdw_types: &'a [usize],
        lj: &'a LjPairTable,
        shift_vecs: &'a [Vec3],
    ) -> Self {
        Self {
            posits,
            charges,
            vdw_types,
            lj,
            shift_vecs,
            epsfac: ONE_4PI_EPS0,
        }
    }

    pub fn with_epsfac(self, epsfac: f32) -> Self {
        Self { epsfac, ..self }
    }
}

/// Input, table, and output checks for one invocation.
fn validate_all(
    cfg: &KernelConfig,
    nlist: &NeighborList,
    inputs: &NbInputs,
    table: Option<&SplineTable>,
    out: &ForceBuffers,
) -> Result<(), KernelError> {
    let table = match cfg.elec {
        ElecKind::CubicSplineTable => Some(table.ok_or(KernelError::MissingTable)?),
        _ => None,
    };

    inputs
        .validate(nlist, table)
        .and_then(|_| non_bonded::check_outputs(cfg, nlist, inputs, out))
        .inspect_err(|e| warn!("Non-bonded input validation failed: {e}"))
}

/// Compute non-bonded forces, and optionally energies, for every pair in `nlist`, adding them
/// to `out`. Picks the kernel specialization for the config's electrostatics model, VdW model,
/// SIMD width, and mode. `table` is required for cubic spline table electrostatics, and ignored
/// otherwise.
pub fn run_nonbonded(
    cfg: &KernelConfig,
    nlist: &NeighborList,
    inputs: &NbInputs,
    table: Option<&SplineTable>,
    out: &mut ForceBuffers,
) -> Result<KernelCounters, KernelError> {
    if cfg.validate_inputs {
        validate_all(cfg, nlist, inputs, table, out)?;
    }

    debug!(
        "Non-bonded kernel: elec {:?}, VdW {:?}, {:?}, {:?}; {} runs",
        cfg.elec,
        cfg.vdw,
        cfg.simd_width.resolve(),
        cfg.mode,
        nlist.runs.len()
    );

    let counters = non_bonded::dispatch(cfg, nlist, inputs, table, out)?;
    debug!("{counters}");

    Ok(counters)
}
