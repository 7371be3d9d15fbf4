//! Pair interaction terms. Each electrostatics and VdW model computes, per lane, a potential
//! energy, and a scalar force factor `fscal` such that the force on i is `d · fscal`, with
//! `d = x_i - x_j`. (So fscal = -dV/dr / r.)
//!
//! Models are small `Copy` values; the kernel is generic over them, so each (elec, VdW)
//! combination compiles to its own inner loop, without dispatch.

use crate::{
    lanes::SimdReal,
    simd::gather_table,
    table::SplineTable,
    util::FlopCosts,
};

/// Distance terms shared by both models, per lane.
#[derive(Clone, Copy, Debug)]
pub struct PairGeometry<R> {
    pub rsq: R,
    /// In the masked tail, padding lanes have this set to 0 so table lookups stay in bounds.
    pub r: R,
    pub rinv: R,
    pub rinvsq: R,
}

impl<R> PairGeometry<R> {
    /// From squared distances, using the refined reciprocal square root.
    #[inline(always)]
    pub fn new<const W: usize>(rsq: R) -> Self
    where
        R: SimdReal<W>,
    {
        let rinv = rsq.invsqrt();

        Self {
            rsq,
            r: rsq * rinv,
            rinv,
            rinvsq: rinv * rinv,
        }
    }
}

/// Potential energy and scalar force factor, per lane.
#[derive(Clone, Copy, Debug)]
pub struct PairTerm<R> {
    pub energy: R,
    pub fscal: R,
}

impl<R: Copy> PairTerm<R> {
    #[inline(always)]
    pub fn zero<const W: usize>() -> Self
    where
        R: SimdReal<W>,
    {
        Self {
            energy: R::zero(),
            fscal: R::zero(),
        }
    }
}

pub trait ElecModel: Copy + Send + Sync {
    /// If false, the kernel skips loading charges.
    const NEEDS_CHARGES: bool;
    /// Per-iteration cost when computing energies.
    const FLOPS_VF: FlopCosts;
    /// Per-iteration cost in force-only mode.
    const FLOPS_F: FlopCosts;

    /// `qq` is the product of the (prefactor-scaled) i charge and the j charge.
    fn pair<R: SimdReal<W>, const W: usize, const CALC_ENERGY: bool>(
        &self,
        geom: &PairGeometry<R>,
        qq: R,
    ) -> PairTerm<R>;
}

pub trait VdwModel: Copy + Send + Sync {
    /// If false, the kernel skips loading type parameters.
    const NEEDS_PARAMS: bool;
    const FLOPS_VF: FlopCosts;
    const FLOPS_F: FlopCosts;

    /// `c6` and `c12` carry the 6× and 12× prefactors.
    fn pair<R: SimdReal<W>, const W: usize, const CALC_ENERGY: bool>(
        &self,
        geom: &PairGeometry<R>,
        c6: R,
        c12: R,
    ) -> PairTerm<R>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoElec;

impl ElecModel for NoElec {
    const NEEDS_CHARGES: bool = false;
    const FLOPS_VF: FlopCosts = FlopCosts { outer: 0, inner: 0 };
    const FLOPS_F: FlopCosts = FlopCosts { outer: 0, inner: 0 };

    #[inline(always)]
    fn pair<R: SimdReal<W>, const W: usize, const CALC_ENERGY: bool>(
        &self,
        _geom: &PairGeometry<R>,
        _qq: R,
    ) -> PairTerm<R> {
        PairTerm::zero::<W>()
    }
}

/// Plain Coulomb: V = qq/r.
#[derive(Clone, Copy, Debug, Default)]
pub struct Coulomb;

impl ElecModel for Coulomb {
    const NEEDS_CHARGES: bool = true;
    const FLOPS_VF: FlopCosts = FlopCosts { outer: 1, inner: 3 };
    const FLOPS_F: FlopCosts = FlopCosts { outer: 1, inner: 2 };

    #[inline(always)]
    fn pair<R: SimdReal<W>, const W: usize, const CALC_ENERGY: bool>(
        &self,
        geom: &PairGeometry<R>,
        qq: R,
    ) -> PairTerm<R> {
        let velec = qq * geom.rinv;

        PairTerm {
            energy: if CALC_ENERGY { velec } else { R::zero() },
            fscal: velec * geom.rinvsq,
        }
    }
}

/// Reaction field: V = qq·(1/r + k_rf·r² - c_rf).
#[derive(Clone, Copy, Debug)]
pub struct ReactionField {
    pub k_rf: f32,
    pub c_rf: f32,
}

impl ElecModel for ReactionField {
    const NEEDS_CHARGES: bool = true;
    const FLOPS_VF: FlopCosts = FlopCosts { outer: 1, inner: 7 };
    const FLOPS_F: FlopCosts = FlopCosts { outer: 1, inner: 4 };

    #[inline(always)]
    fn pair<R: SimdReal<W>, const W: usize, const CALC_ENERGY: bool>(
        &self,
        geom: &PairGeometry<R>,
        qq: R,
    ) -> PairTerm<R> {
        let k_rf = R::splat(self.k_rf);

        let fscal = qq * (geom.rinv * geom.rinvsq - R::splat(2.) * k_rf);

        let energy = if CALC_ENERGY {
            qq * (k_rf.mul_add(geom.rsq, geom.rinv) - R::splat(self.c_rf))
        } else {
            R::zero()
        };

        PairTerm { energy, fscal }
    }
}

/// Electrostatics from a cubic spline table: V = qq·table(r).
#[derive(Clone, Copy, Debug)]
pub struct CubicSplineTable<'a> {
    pub table: &'a SplineTable,
}

impl ElecModel for CubicSplineTable<'_> {
    const NEEDS_CHARGES: bool = true;
    const FLOPS_VF: FlopCosts = FlopCosts {
        outer: 1,
        inner: 24,
    };
    const FLOPS_F: FlopCosts = FlopCosts {
        outer: 1,
        inner: 17,
    };

    #[inline(always)]
    fn pair<R: SimdReal<W>, const W: usize, const CALC_ENERGY: bool>(
        &self,
        geom: &PairGeometry<R>,
        qq: R,
    ) -> PairTerm<R> {
        let scale = R::splat(self.table.scale());
        let t = gather_table::<R, W>(self.table, geom.r * scale);
        let eps = t.eps;

        // Horner: Fp = F + eps·(G + eps·H)
        let fp = eps.mul_add(eps.mul_add(t.h, t.g), t.f);
        // dV/d(eps) = Fp + eps·(G + 2·eps·H)
        let ff = eps.mul_add(eps.mul_add(t.h + t.h, t.g), fp);

        let energy = if CALC_ENERGY {
            qq * eps.mul_add(fp, t.y)
        } else {
            R::zero()
        };

        PairTerm {
            energy,
            fscal: -(qq * ff * (scale * geom.rinv)),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoVdw;

impl VdwModel for NoVdw {
    const NEEDS_PARAMS: bool = false;
    const FLOPS_VF: FlopCosts = FlopCosts { outer: 0, inner: 0 };
    const FLOPS_F: FlopCosts = FlopCosts { outer: 0, inner: 0 };

    #[inline(always)]
    fn pair<R: SimdReal<W>, const W: usize, const CALC_ENERGY: bool>(
        &self,
        _geom: &PairGeometry<R>,
        _c6: R,
        _c12: R,
    ) -> PairTerm<R> {
        PairTerm::zero::<W>()
    }
}

/// Lennard-Jones 6-12: V = c12/(12 r¹²) - c6/(6 r⁶).
#[derive(Clone, Copy, Debug, Default)]
pub struct LennardJones;

impl VdwModel for LennardJones {
    const NEEDS_PARAMS: bool = true;
    const FLOPS_VF: FlopCosts = FlopCosts {
        outer: 0,
        inner: 12,
    };
    const FLOPS_F: FlopCosts = FlopCosts {
        outer: 0,
        inner: 10,
    };

    #[inline(always)]
    fn pair<R: SimdReal<W>, const W: usize, const CALC_ENERGY: bool>(
        &self,
        geom: &PairGeometry<R>,
        c6: R,
        c12: R,
    ) -> PairTerm<R> {
        let rinvsix = geom.rinvsq * geom.rinvsq * geom.rinvsq;
        let vvdw6 = c6 * rinvsix;
        let vvdw12 = c12 * rinvsix * rinvsix;

        let energy = if CALC_ENERGY {
            vvdw12 * R::splat(1. / 12.) - vvdw6 * R::splat(1. / 6.)
        } else {
            R::zero()
        };

        PairTerm {
            energy,
            fscal: (vvdw12 - vvdw6) * geom.rinvsq,
        }
    }
}
