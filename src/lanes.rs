//! A small portable abstraction over width-W single-precision lanes. The pair evaluator and
//! the outer-loop driver are written once against `SimdReal`, and backed by a scalar (W=1)
//! implementation, and `wide`'s 4 and 8-lane types.
//!
//! We keep the width as a const parameter on the trait, so loaders can work with `[f32; W]`
//! arrays on stable Rust.

use std::{
    array::from_fn,
    fmt::Debug,
    ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign},
};

use wide::{f32x4, f32x8};

/// Per-lane validity for one batch of neighbors. Bit `k` set means lane `k` holds a real
/// neighbor; clear means it's padding. Supports widths up to 32.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct LaneMask(u32);

impl LaneMask {
    /// All `width` lanes valid.
    pub fn full(width: usize) -> Self {
        debug_assert!(width <= 32);
        if width == 32 {
            Self(u32::MAX)
        } else {
            Self((1 << width) - 1)
        }
    }

    /// Build from neighbor ids; negative ids (the padding sentinel) are invalid lanes.
    pub fn from_ids(ids: &[i32]) -> Self {
        debug_assert!(ids.len() <= 32);
        let mut bits = 0;
        for (k, &id) in ids.iter().enumerate() {
            if id >= 0 {
                bits |= 1 << k;
            }
        }
        Self(bits)
    }

    pub fn is_valid(self, lane: usize) -> bool {
        self.0 & (1 << lane) != 0
    }

    pub fn any(self) -> bool {
        self.0 != 0
    }

    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

/// W lanes of f32. Implementors must be plain value types; all operations are lane-wise
/// unless noted.
pub trait SimdReal<const W: usize>:
    Copy
    + Debug
    + Send
    + Sync
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
{
    /// Lane validity in the form `select` consumes. Build once per batch.
    type Mask: Copy;

    fn splat(v: f32) -> Self;

    fn from_array(v: [f32; W]) -> Self;

    fn to_array(self) -> [f32; W];

    /// `self * m + a`. Not necessarily fused.
    fn mul_add(self, m: Self, a: Self) -> Self;

    /// Reciprocal square root, at whatever precision the hardware estimate provides.
    fn rsqrt_approx(self) -> Self;

    fn lane_mask(mask: LaneMask) -> Self::Mask;

    /// Lanes set in `mask` take `t`; others take `f`. This is a bitwise select, so non-finite
    /// values in the rejected operand never leak through.
    fn select(mask: Self::Mask, t: Self, f: Self) -> Self;

    fn zero() -> Self {
        Self::splat(0.)
    }

    /// Horizontal sum.
    fn reduce_sum(self) -> f32 {
        self.to_array().iter().sum()
    }

    /// Reciprocal square root refined with one Newton-Raphson step: 0.5·y·(3 - x·y²).
    #[inline(always)]
    fn invsqrt(self) -> Self {
        let lu = self.rsqrt_approx();
        Self::splat(0.5) * lu * (Self::splat(3.) - self * lu * lu)
    }

    /// Zero the lanes not set in `mask`.
    #[inline(always)]
    fn masked(self, mask: Self::Mask) -> Self {
        Self::select(mask, self, Self::zero())
    }
}

impl SimdReal<1> for f32 {
    type Mask = bool;

    #[inline(always)]
    fn splat(v: f32) -> Self {
        v
    }

    #[inline(always)]
    fn from_array(v: [f32; 1]) -> Self {
        v[0]
    }

    #[inline(always)]
    fn to_array(self) -> [f32; 1] {
        [self]
    }

    #[inline(always)]
    fn mul_add(self, m: Self, a: Self) -> Self {
        self * m + a
    }

    #[inline(always)]
    fn rsqrt_approx(self) -> Self {
        1. / self.sqrt()
    }

    #[inline(always)]
    fn lane_mask(mask: LaneMask) -> bool {
        mask.is_valid(0)
    }

    #[inline(always)]
    fn select(mask: bool, t: Self, f: Self) -> Self {
        if mask { t } else { f }
    }

    #[inline(always)]
    fn reduce_sum(self) -> f32 {
        self
    }
}

/// All bits set for valid lanes, clear otherwise: the layout `blend` expects.
#[inline(always)]
fn mask_bits<const W: usize>(mask: LaneMask) -> [f32; W] {
    let ones = f32::from_bits(!0);
    from_fn(|k| if mask.is_valid(k) { ones } else { 0. })
}

impl SimdReal<4> for f32x4 {
    type Mask = f32x4;

    #[inline(always)]
    fn splat(v: f32) -> Self {
        f32x4::splat(v)
    }

    #[inline(always)]
    fn from_array(v: [f32; 4]) -> Self {
        f32x4::new(v)
    }

    #[inline(always)]
    fn to_array(self) -> [f32; 4] {
        self.into()
    }

    #[inline(always)]
    fn mul_add(self, m: Self, a: Self) -> Self {
        f32x4::mul_add(self, m, a)
    }

    #[inline(always)]
    fn rsqrt_approx(self) -> Self {
        self.recip_sqrt()
    }

    #[inline(always)]
    fn lane_mask(mask: LaneMask) -> f32x4 {
        f32x4::new(mask_bits(mask))
    }

    #[inline(always)]
    fn select(mask: f32x4, t: Self, f: Self) -> Self {
        mask.blend(t, f)
    }
}

impl SimdReal<8> for f32x8 {
    type Mask = f32x8;

    #[inline(always)]
    fn splat(v: f32) -> Self {
        f32x8::splat(v)
    }

    #[inline(always)]
    fn from_array(v: [f32; 8]) -> Self {
        f32x8::new(v)
    }

    #[inline(always)]
    fn to_array(self) -> [f32; 8] {
        self.into()
    }

    #[inline(always)]
    fn mul_add(self, m: Self, a: Self) -> Self {
        f32x8::mul_add(self, m, a)
    }

    #[inline(always)]
    fn rsqrt_approx(self) -> Self {
        self.recip_sqrt()
    }

    #[inline(always)]
    fn lane_mask(mask: LaneMask) -> f32x8 {
        f32x8::new(mask_bits(mask))
    }

    #[inline(always)]
    fn select(mask: f32x8, t: Self, f: Self) -> Self {
        mask.blend(t, f)
    }
}
