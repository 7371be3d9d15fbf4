//! Periodic cell, and the shift vectors neighbor runs refer to.

use lin_alg::f32::Vec3;

/// Number of periodic shifts for an orthorhombic cell: one image in each direction, per axis.
pub const N_SHIFTS: usize = 27;
/// Index of the zero shift.
pub const CENTRAL_SHIFT: usize = 13;

/// An orthorhombic periodic cell.
#[derive(Clone, Copy, Default, PartialEq, Debug)]
pub struct SimBox {
    pub bounds_low: Vec3,
    pub bounds_high: Vec3,
    pub extent: Vec3,
}

impl SimBox {
    pub fn new(bounds_low: Vec3, bounds_high: Vec3) -> Self {
        Self {
            bounds_low,
            bounds_high,
            extent: bounds_high - bounds_low,
        }
    }

    /// A cell with its low corner at the origin.
    pub fn from_extent(extent: Vec3) -> Self {
        Self::new(Vec3::new_zero(), extent)
    }

    pub fn is_valid(&self) -> bool {
        let ext = &self.extent;
        ext.x > 0. && ext.y > 0. && ext.z > 0.
    }

    /// Wrap an absolute coordinate back into the cell.
    pub fn wrap(&self, p: Vec3) -> Vec3 {
        let ext = &self.extent;
        debug_assert!(self.is_valid());

        // rem_euclid keeps the value in [0, ext)
        Vec3::new(
            (p.x - self.bounds_low.x).rem_euclid(ext.x) + self.bounds_low.x,
            (p.y - self.bounds_low.y).rem_euclid(ext.y) + self.bounds_low.y,
            (p.z - self.bounds_low.z).rem_euclid(ext.z) + self.bounds_low.z,
        )
    }

    /// Minimum-image displacement vector.
    pub fn min_image(&self, dv: Vec3) -> Vec3 {
        dv + self.image_shift(dv).0
    }

    /// The lattice translation that maps displacement `dv` (x_i - x_j) to its minimum image,
    /// along with its per-axis cell counts.
    pub fn image_shift(&self, dv: Vec3) -> (Vec3, [i32; 3]) {
        let ext = &self.extent;
        debug_assert!(self.is_valid());

        let n = [
            -(dv.x / ext.x).round() as i32,
            -(dv.y / ext.y).round() as i32,
            -(dv.z / ext.z).round() as i32,
        ];

        (self.lattice_vec(n), n)
    }

    fn lattice_vec(&self, n: [i32; 3]) -> Vec3 {
        Vec3::new(
            n[0] as f32 * self.extent.x,
            n[1] as f32 * self.extent.y,
            n[2] as f32 * self.extent.z,
        )
    }

    /// All 27 shift vectors, indexed by `shift_index`.
    pub fn shift_vectors(&self) -> Vec<Vec3> {
        let mut result = Vec::with_capacity(N_SHIFTS);
        for sx in -1..=1 {
            for sy in -1..=1 {
                for sz in -1..=1 {
                    result.push(self.lattice_vec([sx, sy, sz]));
                }
            }
        }
        result
    }
}

/// Index into `shift_vectors` for per-axis cell counts in `-1..=1`. `None` if any is outside that.
pub fn shift_index(n: [i32; 3]) -> Option<usize> {
    if n.iter().any(|v| !(-1..=1).contains(v)) {
        return None;
    }
    Some(((n[0] + 1) * 9 + (n[1] + 1) * 3 + (n[2] + 1)) as usize)
}
