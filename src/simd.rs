//! Packing, unpacking, etc: moving per-particle scalar data into W-wide lanes, and lane results
//! back out.
//!
//! i-particle data is broadcast across lanes. j-particle data is gathered, one lane per
//! neighbor ("swizzled"). Table coefficients are gathered as 4-tuples, then transposed into
//! one vector per coefficient.

use std::{
    array::from_fn,
    ops::{Add, AddAssign, Mul, Sub},
};

use lin_alg::f32::Vec3;

use crate::{
    lanes::{LaneMask, SimdReal},
    params::LjPairTable,
    table::SplineTable,
};

/// A 3-vector, with each component a W-wide lane register.
#[derive(Clone, Copy, Debug)]
pub struct Vec3Lanes<R> {
    pub x: R,
    pub y: R,
    pub z: R,
}

impl<R: Copy> Vec3Lanes<R> {
    pub fn new(x: R, y: R, z: R) -> Self {
        Self { x, y, z }
    }
}

impl<R: Copy + Add<Output = R> + Mul<Output = R>> Vec3Lanes<R> {
    pub fn magnitude_squared(self) -> R {
        self.x * self.x + self.y * self.y + self.z * self.z
    }
}

impl<R: Copy + Mul<Output = R>> Vec3Lanes<R> {
    pub fn scale(self, s: R) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }
}

impl<R: Copy + Sub<Output = R>> Sub for Vec3Lanes<R> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl<R: Copy + AddAssign> AddAssign for Vec3Lanes<R> {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
        self.z += rhs.z;
    }
}

/// Coefficient vectors for one batch of table lookups, and the fractional offset into each
/// lane's segment.
#[derive(Clone, Copy, Debug)]
pub struct TableLanes<R> {
    pub y: R,
    pub f: R,
    pub g: R,
    pub h: R,
    pub eps: R,
}

/// Replicate `posit + shift` across all lanes. Used for the i particle.
#[inline(always)]
pub fn load_shift_and_broadcast<R: SimdReal<W>, const W: usize>(
    posit: Vec3,
    shift: Vec3,
) -> Vec3Lanes<R> {
    let p = posit + shift;
    Vec3Lanes::new(R::splat(p.x), R::splat(p.y), R::splat(p.z))
}

/// Gather positions of `ids` into lanes.
#[inline(always)]
pub fn gather_vec3<R: SimdReal<W>, const W: usize>(
    posits: &[Vec3],
    ids: &[usize; W],
) -> Vec3Lanes<R> {
    let x = from_fn(|k| posits[ids[k]].x);
    let y = from_fn(|k| posits[ids[k]].y);
    let z = from_fn(|k| posits[ids[k]].z);

    Vec3Lanes::new(R::from_array(x), R::from_array(y), R::from_array(z))
}

/// Gather one scalar field, e.g. charge, into lanes.
#[inline(always)]
pub fn gather_real<R: SimdReal<W>, const W: usize>(vals: &[f32], ids: &[usize; W]) -> R {
    R::from_array(from_fn(|k| vals[ids[k]]))
}

/// Gather (c6, c12) for the i type against each lane's j type.
#[inline(always)]
pub fn gather_c6_c12<R: SimdReal<W>, const W: usize>(
    lj: &LjPairTable,
    type_i: usize,
    vdw_types: &[usize],
    ids: &[usize; W],
) -> (R, R) {
    let pairs: [(f32, f32); W] = from_fn(|k| lj.get(type_i, vdw_types[ids[k]]));

    (
        R::from_array(from_fn(|k| pairs[k].0)),
        R::from_array(from_fn(|k| pairs[k].1)),
    )
}

/// Transpose a 4×4 block: rows in, columns out. Done as two rounds of pairwise interleaves,
/// the way the unpack/move-half shuffles do it in registers.
#[inline(always)]
pub fn transpose_4x4(m: [[f32; 4]; 4]) -> [[f32; 4]; 4] {
    let [r0, r1, r2, r3] = m;

    // Interleave low and high halves of row pairs.
    let t0 = [r0[0], r1[0], r0[1], r1[1]];
    let t1 = [r2[0], r3[0], r2[1], r3[1]];
    let t2 = [r0[2], r1[2], r0[3], r1[3]];
    let t3 = [r2[2], r3[2], r2[3], r3[3]];

    // Combine halves.
    [
        [t0[0], t0[1], t1[0], t1[1]],
        [t0[2], t0[3], t1[2], t1[3]],
        [t2[0], t2[1], t3[0], t3[1]],
        [t2[2], t2[3], t3[2], t3[3]],
    ]
}

/// Look up table segments for scaled distances `rt = r · scale`. Each lane's segment is
/// `floor(rt)`; its (Y, F, G, H) are fetched as a row, and blocks of 4 rows are transposed into
/// per-coefficient lanes. Lane counts that aren't a multiple of 4 use a zero-filled block.
///
/// `rt` must be non-negative, and inside the table. Out-of-range segments panic.
#[inline(always)]
pub fn gather_table<R: SimdReal<W>, const W: usize>(
    table: &SplineTable,
    rt: R,
) -> TableLanes<R> {
    let rt = rt.to_array();

    let mut seg = [0_usize; W];
    let mut eps = [0_f32; W];
    for k in 0..W {
        let floor = rt[k].floor();
        seg[k] = floor as usize;
        eps[k] = rt[k] - floor;
    }

    let mut cols = [[0_f32; W]; 4];

    for base in (0..W).step_by(4) {
        let n = (W - base).min(4);
        let rows: [[f32; 4]; 4] = from_fn(|l| {
            if l < n {
                table.segment(seg[base + l])
            } else {
                [0.; 4]
            }
        });

        let t = transpose_4x4(rows);
        for (c, col) in cols.iter_mut().enumerate() {
            col[base..base + n].copy_from_slice(&t[c][..n]);
        }
    }

    let [y, f, g, h] = cols;
    TableLanes {
        y: R::from_array(y),
        f: R::from_array(f),
        g: R::from_array(g),
        h: R::from_array(h),
        eps: R::from_array(eps),
    }
}

/// Subtract each lane's force from its j particle. Lanes not set in `mask` go to `scratch`
/// instead, so padding never touches a real particle.
#[inline(always)]
pub fn decrement_forces<R: SimdReal<W>, const W: usize>(
    forces: &mut [Vec3],
    ids: &[usize; W],
    mask: LaneMask,
    t: Vec3Lanes<R>,
    scratch: &mut Vec3,
) {
    let tx = t.x.to_array();
    let ty = t.y.to_array();
    let tz = t.z.to_array();

    for k in 0..W {
        let dst = if mask.is_valid(k) {
            &mut forces[ids[k]]
        } else {
            &mut *scratch
        };

        dst.x -= tx[k];
        dst.y -= ty[k];
        dst.z -= tz[k];
    }
}

/// Reduce the i-force lanes, and add the result to the i particle, and to its shift's entry.
#[inline(always)]
pub fn update_iforce<R: SimdReal<W>, const W: usize>(
    fi: Vec3Lanes<R>,
    f_i: &mut Vec3,
    fshift: &mut Vec3,
) {
    let f = Vec3::new(fi.x.reduce_sum(), fi.y.reduce_sum(), fi.z.reduce_sum());

    *f_i += f;
    *fshift += f;
}

#[cfg(test)]
mod tests {
    use wide::{f32x4, f32x8};

    use super::*;

    #[test]
    fn transpose() {
        let m = [
            [0., 1., 2., 3.],
            [10., 11., 12., 13.],
            [20., 21., 22., 23.],
            [30., 31., 32., 33.],
        ];
        let t = transpose_4x4(m);

        for r in 0..4 {
            for c in 0..4 {
                assert_eq!(t[c][r], m[r][c]);
            }
        }
        assert_eq!(transpose_4x4(t), m);
    }

    fn ramp_table() -> SplineTable {
        // Segment k: (k, 100 + k, 200 + k, 300 + k)
        let data = (0..16)
            .flat_map(|k| [k as f32, 100. + k as f32, 200. + k as f32, 300. + k as f32])
            .collect();
        SplineTable::new(data, 2.).unwrap()
    }

    #[test]
    fn table_gather_x4() {
        let table = ramp_table();
        let rt = f32x4::new([0.25, 3.5, 7., 15.75]);
        let tl = gather_table::<f32x4, 4>(&table, rt);

        assert_eq!(tl.y.to_array(), [0., 3., 7., 15.]);
        assert_eq!(tl.f.to_array(), [100., 103., 107., 115.]);
        assert_eq!(tl.g.to_array(), [200., 203., 207., 215.]);
        assert_eq!(tl.h.to_array(), [300., 303., 307., 315.]);
        assert_eq!(tl.eps.to_array(), [0.25, 0.5, 0., 0.75]);
    }

    #[test]
    fn table_gather_x8_and_scalar() {
        let table = ramp_table();
        let rt = f32x8::new([1., 2., 3., 4., 5., 6., 7., 8.5]);
        let tl = gather_table::<f32x8, 8>(&table, rt);
        assert_eq!(tl.h.to_array(), [301., 302., 303., 304., 305., 306., 307., 308.]);

        let tl = gather_table::<f32, 1>(&table, 9.5);
        assert_eq!((tl.y, tl.g, tl.eps), (9., 209., 0.5));
    }

    #[test]
    fn padding_goes_to_scratch() {
        let mut forces = vec![Vec3::new(1., 1., 1.); 3];
        let mut scratch = Vec3::new_zero();

        // Lanes 2 and 3 are padding, loaded with dummy index 0.
        let ids = [2, 1, 0, 0];
        let mask = LaneMask::from_ids(&[2, 1, -1, -1]);
        let t = Vec3Lanes::new(
            f32x4::new([1., 2., 3., 4.]),
            f32x4::splat(0.),
            f32x4::splat(0.5),
        );

        decrement_forces::<f32x4, 4>(&mut forces, &ids, mask, t, &mut scratch);

        assert_eq!(forces[0], Vec3::new(1., 1., 1.));
        assert_eq!(forces[1], Vec3::new(-1., 1., 0.5));
        assert_eq!(forces[2], Vec3::new(0., 1., 0.5));
        assert_eq!(scratch, Vec3::new(-7., 0., -1.));
    }

    #[test]
    fn broadcast_and_flush() {
        let xi = load_shift_and_broadcast::<f32x4, 4>(Vec3::new(1., 2., 3.), Vec3::new(0., 0., -3.));
        assert_eq!(xi.z.to_array(), [0.; 4]);
        assert_eq!(xi.x.to_array(), [1.; 4]);

        let mut f_i = Vec3::new_zero();
        let mut fshift = Vec3::new(1., 0., 0.);
        update_iforce::<f32x4, 4>(
            Vec3Lanes::new(f32x4::splat(1.), f32x4::splat(0.5), f32x4::ZERO),
            &mut f_i,
            &mut fshift,
        );
        assert_eq!(f_i, Vec3::new(4., 2., 0.));
        assert_eq!(fshift, Vec3::new(5., 2., 0.));
    }
}
