//! Cubic spline interaction tables. Each segment `k` covers `r ∈ [k/scale, (k+1)/scale)`, and
//! stores 4 coefficients, flat, at `4k + {0, 1, 2, 3}`: (Y, F, G, H). Within a segment, with
//! `eps` the fractional part of `r·scale`:
//!
//! V(eps) = Y + eps·(F + eps·(G + eps·H))
//!
//! The kernel only reads these; building them happens once, before the step loop.

use statrs::function::erf::erfc;

use crate::KernelError;

const INV_SQRT_PI: f64 = 0.564_189_583_547_756_3;

#[derive(Clone, Debug, PartialEq)]
pub struct SplineTable {
    /// Flat (Y, F, G, H) per segment.
    data: Vec<f32>,
    /// Segments per unit distance. (nm⁻¹, or Å⁻¹; whatever the positions use)
    scale: f32,
}

impl SplineTable {
    /// Wrap precomputed coefficients. `data.len()` must be a non-zero multiple of 4.
    pub fn new(data: Vec<f32>, scale: f32) -> Result<Self, KernelError> {
        if data.is_empty() || data.len() % 4 != 0 {
            return Err(KernelError::InvalidTable(format!(
                "Coefficient count must be a non-zero multiple of 4; got {}",
                data.len()
            )));
        }

        if !scale.is_finite() || scale <= 0. {
            return Err(KernelError::InvalidTable(format!(
                "Scale must be finite and positive; got {scale}"
            )));
        }

        if let Some(i) = data.iter().position(|v| !v.is_finite()) {
            return Err(KernelError::InvalidTable(format!(
                "Non-finite coefficient at index {i} (segment {})",
                i / 4
            )));
        }

        Ok(Self { data, scale })
    }

    /// Build Hermite segments from a potential. `f` returns (V(r), dV/dr) at a node; nodes are
    /// at `r = k / scale` for `k` in `0..n_points`, giving `n_points - 1` segments.
    ///
    /// Non-finite node values (e.g. 1/r at r=0) are replaced by those of the first finite node.
    pub fn from_potential<F>(scale: f32, n_points: usize, f: F) -> Result<Self, KernelError>
    where
        F: Fn(f64) -> (f64, f64),
    {
        if n_points < 2 {
            return Err(KernelError::InvalidTable(format!(
                "Need at least 2 nodes to build a table; got {n_points}"
            )));
        }
        if !scale.is_finite() || scale <= 0. {
            return Err(KernelError::InvalidTable(format!(
                "Scale must be finite and positive; got {scale}"
            )));
        }

        let h = 1. / scale as f64;

        let mut nodes: Vec<(f64, f64)> = (0..n_points).map(|k| f(k as f64 * h)).collect();

        let first_finite = nodes
            .iter()
            .position(|(v, d)| v.is_finite() && d.is_finite())
            .ok_or_else(|| {
                KernelError::InvalidTable("The potential is non-finite at every node".to_owned())
            })?;

        let fill = nodes[first_finite];
        for node in &mut nodes[..first_finite] {
            *node = fill;
        }

        if let Some(k) = nodes
            .iter()
            .position(|(v, d)| !v.is_finite() || !d.is_finite())
        {
            return Err(KernelError::InvalidTable(format!(
                "The potential is non-finite at r = {}",
                k as f64 * h
            )));
        }

        let mut data = Vec::with_capacity(4 * (n_points - 1));
        for w in nodes.windows(2) {
            let (v0, d0) = w[0];
            let (v1, d1) = w[1];

            let dv = v1 - v0;
            let d0h = d0 * h;
            let d1h = d1 * h;

            data.push(v0 as f32);
            data.push(d0h as f32);
            data.push((3. * dv - 2. * d0h - d1h) as f32);
            data.push((-2. * dv + d0h + d1h) as f32);
        }

        Self::new(data, scale)
    }

    /// A plain Coulomb table, V(r) = 1/r, covering `[0, cutoff]`.
    pub fn coulomb(scale: f32, cutoff: f32) -> Result<Self, KernelError> {
        let n_points = n_points_for(scale, cutoff)?;
        Self::from_potential(scale, n_points, |r| (1. / r, -1. / (r * r)))
    }

    /// The real-space part of Ewald electrostatics: V(r) = erfc(βr)/r. β in inverse length units.
    pub fn ewald_real_space(beta: f32, scale: f32, cutoff: f32) -> Result<Self, KernelError> {
        let n_points = n_points_for(scale, cutoff)?;
        let β = beta as f64;

        Self::from_potential(scale, n_points, |r| {
            let erfc_term = erfc(β * r);
            let inv_r = 1. / r;
            let exp_term = (-(β * r).powi(2)).exp();

            let v = erfc_term * inv_r;
            let dv = -erfc_term * inv_r * inv_r - 2. * β * INV_SQRT_PI * exp_term * inv_r;
            (v, dv)
        })
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn n_segments(&self) -> usize {
        self.data.len() / 4
    }

    /// Upper bound (exclusive) on distances whose segment index is in bounds.
    pub fn max_distance(&self) -> f32 {
        self.n_segments() as f32 / self.scale
    }

    /// (Y, F, G, H) for segment `k`.
    #[inline(always)]
    pub fn segment(&self, k: usize) -> [f32; 4] {
        let i = 4 * k;
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }

    /// Reconstruct the value, and the derivative factor dV/d(eps), at fractional offset `eps`
    /// into segment `k`. Multiply the latter by `scale` to get dV/dr.
    pub fn evaluate(&self, k: usize, eps: f32) -> (f32, f32) {
        let [y, f, g, h] = self.segment(k);

        let fp = f + eps * (g + eps * h);
        let vv = y + eps * fp;
        let ff = fp + eps * (g + 2. * eps * h);

        (vv, ff)
    }

    /// Value and dV/dr at distance `r`.
    pub fn evaluate_at(&self, r: f32) -> (f32, f32) {
        let rt = r * self.scale;
        let k = rt.floor();
        let (vv, ff) = self.evaluate(k as usize, rt - k);

        (vv, ff * self.scale)
    }
}

/// Nodes needed so the table covers `[0, cutoff]`, plus one extra segment past it.
fn n_points_for(scale: f32, cutoff: f32) -> Result<usize, KernelError> {
    if !cutoff.is_finite() || cutoff <= 0. {
        return Err(KernelError::InvalidTable(format!(
            "Cutoff must be finite and positive; got {cutoff}"
        )));
    }
    Ok((cutoff * scale).ceil() as usize + 2)
}
