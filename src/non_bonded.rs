//! For VDW and Coulomb forces: the outer loop over neighbor runs, the inner loop over SIMD
//! batches of j neighbors, the masked tail, and the flush of i-forces and energies.
//!
//! Per run: broadcast the shifted i position, and zero the i accumulators. Then process full
//! batches of W neighbors while the last slot of the batch is a real particle. Whatever remains
//! is processed with a lane mask built from the sentinel: padding lanes load particle 0, have
//! `r` zeroed before the table lookup, contribute zero to every sum, and scatter into a scratch
//! vector. Finally, add the i-force to the i particle and to its shift entry, and the energy
//! sums to the run's group bucket.

use std::array::from_fn;

use lin_alg::f32::Vec3;
use log::debug;
use rayon::prelude::*;
use wide::{f32x4, f32x8};

use crate::{
    ComputeMode, ElecKind, KernelConfig, KernelError, NbInputs, SimdWidth, VdwKind,
    energy::ForceBuffers,
    forces::{
        Coulomb, CubicSplineTable, ElecModel, LennardJones, NoElec, NoVdw, PairGeometry,
        ReactionField, VdwModel,
    },
    lanes::{LaneMask, SimdReal},
    neighbors::{NEIGHBOR_SENTINEL, NeighborList},
    simd::{
        Vec3Lanes, decrement_forces, gather_c6_c12, gather_real, gather_vec3,
        load_shift_and_broadcast, update_iforce,
    },
    table::SplineTable,
    util::{FlopCosts, KernelCounters},
};

// Distance, reciprocal square root, and force accumulation on i and j.
const BASE_FLOPS_VF: FlopCosts = FlopCosts {
    outer: 8,
    inner: 24,
};
const BASE_FLOPS_F: FlopCosts = FlopCosts {
    outer: 6,
    inner: 24,
};

/// Flop cost estimate for one (elec, VdW, mode) kernel.
pub fn kernel_flop_costs<E: ElecModel, V: VdwModel>(calc_energy: bool) -> FlopCosts {
    let parts = if calc_energy {
        [BASE_FLOPS_VF, E::FLOPS_VF, V::FLOPS_VF]
    } else {
        [BASE_FLOPS_F, E::FLOPS_F, V::FLOPS_F]
    };

    FlopCosts {
        outer: parts.iter().map(|p| p.outer).sum(),
        inner: parts.iter().map(|p| p.inner).sum(),
    }
}

/// Running sums for the current i run.
struct IAccum<R> {
    fi: Vec3Lanes<R>,
    velec: R,
    vvdw: R,
}

impl<R: Copy> IAccum<R> {
    fn new<const W: usize>() -> Self
    where
        R: SimdReal<W>,
    {
        Self {
            fi: Vec3Lanes::new(R::zero(), R::zero(), R::zero()),
            velec: R::zero(),
            vvdw: R::zero(),
        }
    }
}

/// Per-run constants.
struct IData<R> {
    xi: Vec3Lanes<R>,
    /// Charge of i, times the Coulomb prefactor.
    iq: R,
    type_i: usize,
}

/// Evaluate one batch of W neighbors and accumulate it. With `MASKED`, lanes not in `mask` are
/// padding: their `ids` entry is a dummy, and everything they produce is dropped. `lane_mask` is
/// `mask` in the lane type's select form.
#[inline(always)]
#[allow(clippy::too_many_arguments)]
fn process_batch<
    R: SimdReal<W>,
    const W: usize,
    E: ElecModel,
    V: VdwModel,
    const CALC_ENERGY: bool,
    const MASKED: bool,
>(
    elec: &E,
    vdw: &V,
    inputs: &NbInputs,
    i_data: &IData<R>,
    ids: &[usize; W],
    mask: LaneMask,
    lane_mask: R::Mask,
    acc: &mut IAccum<R>,
    forces: &mut [Vec3],
    scratch: &mut Vec3,
) {
    let xj = gather_vec3::<R, W>(inputs.posits, ids);
    let d = i_data.xi - xj;

    let mut geom = PairGeometry::new::<W>(d.magnitude_squared());
    if MASKED {
        // Keeps the table index in bounds for padding lanes.
        geom.r = geom.r.masked(lane_mask);
    }

    let qq = if E::NEEDS_CHARGES {
        i_data.iq * gather_real::<R, W>(inputs.charges, ids)
    } else {
        R::zero()
    };

    let (c6, c12) = if V::NEEDS_PARAMS {
        gather_c6_c12::<R, W>(inputs.lj, i_data.type_i, inputs.vdw_types, ids)
    } else {
        (R::zero(), R::zero())
    };

    let el = elec.pair::<R, W, CALC_ENERGY>(&geom, qq);
    let vd = vdw.pair::<R, W, CALC_ENERGY>(&geom, c6, c12);

    let mut fscal = el.fscal + vd.fscal;

    if CALC_ENERGY {
        if MASKED {
            acc.velec += el.energy.masked(lane_mask);
            acc.vvdw += vd.energy.masked(lane_mask);
        } else {
            acc.velec += el.energy;
            acc.vvdw += vd.energy;
        }
    }

    if MASKED {
        fscal = fscal.masked(lane_mask);
    }

    let t = d.scale(fscal);
    acc.fi += t;

    decrement_forces::<R, W>(forces, ids, mask, t, scratch);
}

/// The non-bonded kernel, for one (elec model, VdW model, lane type, mode) combination. Adds
/// to `out`, and returns iteration counters.
///
/// Inputs must be well-formed (see `NbInputs::validate`); out-of-range indices panic.
pub fn nb_kernel<
    R: SimdReal<W>,
    const W: usize,
    E: ElecModel,
    V: VdwModel,
    const CALC_ENERGY: bool,
>(
    elec: &E,
    vdw: &V,
    nlist: &NeighborList,
    inputs: &NbInputs,
    out: &mut ForceBuffers,
) -> KernelCounters {
    // Padding lanes scatter here.
    let mut scratch = Vec3::new_zero();
    let mut inner_iterations = 0;

    let full = LaneMask::full(W);
    let full_lanes = R::lane_mask(full);

    for run in &nlist.runs {
        let i_data = IData {
            xi: load_shift_and_broadcast::<R, W>(
                inputs.posits[run.i],
                inputs.shift_vecs[run.shift],
            ),
            iq: if E::NEEDS_CHARGES {
                R::splat(inputs.epsfac * inputs.charges[run.i])
            } else {
                R::zero()
            },
            type_i: if V::NEEDS_PARAMS {
                inputs.vdw_types[run.i]
            } else {
                0
            },
        };

        let mut acc = IAccum::new::<W>();

        let jjnr = nlist.ids(run);
        let mut jidx = 0;

        // Padding only trails valid entries, so a valid last slot means a full batch.
        while jidx + W <= jjnr.len() && jjnr[jidx + W - 1] >= 0 {
            let ids: [usize; W] = from_fn(|k| jjnr[jidx + k] as usize);

            process_batch::<R, W, E, V, CALC_ENERGY, false>(
                elec,
                vdw,
                inputs,
                &i_data,
                &ids,
                full,
                full_lanes,
                &mut acc,
                &mut out.forces,
                &mut scratch,
            );
            jidx += W;
        }

        // Tail
        while jidx < jjnr.len() {
            let raw: [i32; W] = from_fn(|k| {
                jjnr.get(jidx + k).copied().unwrap_or(NEIGHBOR_SENTINEL)
            });
            let mask = LaneMask::from_ids(&raw);

            if mask.any() {
                let ids: [usize; W] =
                    from_fn(|k| if mask.is_valid(k) { raw[k] as usize } else { 0 });

                process_batch::<R, W, E, V, CALC_ENERGY, true>(
                    elec,
                    vdw,
                    inputs,
                    &i_data,
                    &ids,
                    mask,
                    R::lane_mask(mask),
                    &mut acc,
                    &mut out.forces,
                    &mut scratch,
                );
            }
            jidx += W;
        }

        update_iforce::<R, W>(
            acc.fi,
            &mut out.forces[run.i],
            &mut out.fshift[run.shift],
        );

        if CALC_ENERGY {
            out.energies.add(
                run.group,
                acc.velec.reduce_sum() as f64,
                acc.vvdw.reduce_sum() as f64,
            );
        }

        inner_iterations += run.len() as u64;
    }

    KernelCounters::new(
        nlist.runs.len() as u64,
        inner_iterations,
        kernel_flop_costs::<E, V>(CALC_ENERGY),
    )
}

fn dispatch_mode<R: SimdReal<W>, const W: usize, E: ElecModel, V: VdwModel>(
    mode: ComputeMode,
    elec: &E,
    vdw: &V,
    nlist: &NeighborList,
    inputs: &NbInputs,
    out: &mut ForceBuffers,
) -> KernelCounters {
    match mode {
        ComputeMode::PotentialAndForce => {
            nb_kernel::<R, W, E, V, true>(elec, vdw, nlist, inputs, out)
        }
        ComputeMode::ForceOnly => nb_kernel::<R, W, E, V, false>(elec, vdw, nlist, inputs, out),
    }
}

fn dispatch_width<E: ElecModel, V: VdwModel>(
    cfg: &KernelConfig,
    elec: &E,
    vdw: &V,
    nlist: &NeighborList,
    inputs: &NbInputs,
    out: &mut ForceBuffers,
) -> KernelCounters {
    match cfg.simd_width.resolve() {
        SimdWidth::Scalar => {
            dispatch_mode::<f32, 1, E, V>(cfg.mode, elec, vdw, nlist, inputs, out)
        }
        SimdWidth::X8 => dispatch_mode::<f32x8, 8, E, V>(cfg.mode, elec, vdw, nlist, inputs, out),
        // `resolve` never returns `Auto`.
        SimdWidth::X4 | SimdWidth::Auto => {
            dispatch_mode::<f32x4, 4, E, V>(cfg.mode, elec, vdw, nlist, inputs, out)
        }
    }
}

fn dispatch_vdw<E: ElecModel>(
    cfg: &KernelConfig,
    elec: &E,
    nlist: &NeighborList,
    inputs: &NbInputs,
    out: &mut ForceBuffers,
) -> KernelCounters {
    match cfg.vdw {
        VdwKind::None => dispatch_width(cfg, elec, &NoVdw, nlist, inputs, out),
        VdwKind::LennardJones => dispatch_width(cfg, elec, &LennardJones, nlist, inputs, out),
    }
}

/// Pick the kernel specialization for `cfg`, and run it. Doesn't validate inputs.
pub(crate) fn dispatch(
    cfg: &KernelConfig,
    nlist: &NeighborList,
    inputs: &NbInputs,
    table: Option<&SplineTable>,
    out: &mut ForceBuffers,
) -> Result<KernelCounters, KernelError> {
    let counters = match cfg.elec {
        ElecKind::None => dispatch_vdw(cfg, &NoElec, nlist, inputs, out),
        ElecKind::Coulomb => dispatch_vdw(cfg, &Coulomb, nlist, inputs, out),
        ElecKind::ReactionField { k_rf, c_rf } => {
            dispatch_vdw(cfg, &ReactionField { k_rf, c_rf }, nlist, inputs, out)
        }
        ElecKind::CubicSplineTable => {
            let table = table.ok_or(KernelError::MissingTable)?;
            dispatch_vdw(cfg, &CubicSplineTable { table }, nlist, inputs, out)
        }
    };

    Ok(counters)
}

/// Check that output buffers match the inputs, and that every run's group has a bucket.
pub(crate) fn check_outputs(
    cfg: &KernelConfig,
    nlist: &NeighborList,
    inputs: &NbInputs,
    out: &ForceBuffers,
) -> Result<(), KernelError> {
    if out.forces.len() != inputs.posits.len() {
        return Err(KernelError::LengthMismatch {
            what: "force buffer",
            expected: inputs.posits.len(),
            found: out.forces.len(),
        });
    }
    if out.fshift.len() != inputs.shift_vecs.len() {
        return Err(KernelError::LengthMismatch {
            what: "shift force buffer",
            expected: inputs.shift_vecs.len(),
            found: out.fshift.len(),
        });
    }

    if cfg.mode == ComputeMode::PotentialAndForce {
        let n_buckets = out.energies.n_buckets();
        if let Some(run) = nlist.runs.iter().find(|r| r.group >= n_buckets) {
            return Err(KernelError::IndexOutOfRange {
                what: "energy group bucket",
                index: run.group,
                len: n_buckets,
            });
        }
    }

    Ok(())
}

/// Run one kernel per neighbor list partition on the thread pool. Each worker accumulates into
/// its own zeroed buffers; these are reduced, then added to `out`.
pub fn run_nonbonded_parallel(
    cfg: &KernelConfig,
    lists: &[NeighborList],
    inputs: &NbInputs,
    table: Option<&SplineTable>,
    out: &mut ForceBuffers,
) -> Result<KernelCounters, KernelError> {
    if cfg.validate_inputs {
        for list in lists {
            crate::validate_all(cfg, list, inputs, table, out)?;
        }
    }

    debug!(
        "Running non-bonded kernel on {} partitions ({:?}, {:?})",
        lists.len(),
        cfg.elec,
        cfg.vdw
    );

    type Partial = Result<(ForceBuffers, KernelCounters), KernelError>;

    let empty = out.zeroed_like();

    let (sum, counters) = lists
        .par_iter()
        .fold(
            || -> Partial { Ok((empty.clone(), KernelCounters::default())) },
            |acc: Partial, list| {
                let (mut buf, mut counters) = acc?;
                counters += dispatch(cfg, list, inputs, table, &mut buf)?;
                Ok((buf, counters))
            },
        )
        .reduce(
            || -> Partial { Ok((empty.clone(), KernelCounters::default())) },
            |a, b| {
                let (mut buf_a, counters_a) = a?;
                let (buf_b, counters_b) = b?;
                buf_a += &buf_b;
                Ok((buf_a, counters_a + counters_b))
            },
        )?;

    *out += &sum;

    Ok(counters)
}
