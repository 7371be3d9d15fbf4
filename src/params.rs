//! Lennard-Jones pair coefficients, indexed by VdW type.

use crate::KernelError;

/// (c6, c12) per ordered type pair, flattened: `data[2·(n_types·ti + tj)]` holds c6, and the next
/// entry holds c12. Stored coefficients carry 6× and 12× prefactors, so the kernel's
/// energy is c12·r⁻¹²/12 - c6·r⁻⁶/6, and its force is (c12·r⁻¹² - c6·r⁻⁶)·r⁻².
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LjPairTable {
    n_types: usize,
    data: Vec<f32>,
}

impl LjPairTable {
    /// From per-type (σ, ε), using Lorentz-Berthelot combination rules.
    pub fn from_sigma_eps(types: &[(f32, f32)]) -> Self {
        let n_types = types.len();
        let mut data = Vec::with_capacity(2 * n_types * n_types);

        for &(σ_0, ε_0) in types {
            for &(σ_1, ε_1) in types {
                let (σ, ε) = combine_lj_params(σ_0, ε_0, σ_1, ε_1);
                let (c6, c12) = c6_c12_from_sigma_eps(σ, ε);

                data.push(6. * c6);
                data.push(12. * c12);
            }
        }

        Self { n_types, data }
    }

    /// From plain (c6, c12) per ordered pair, row-major by `ti`. These are the coefficients of
    /// V = c12/r¹² - c6/r⁶; we apply the 6× and 12× prefactors here.
    pub fn from_c6_c12(n_types: usize, pairs: &[(f32, f32)]) -> Result<Self, KernelError> {
        if pairs.len() != n_types * n_types {
            return Err(KernelError::LengthMismatch {
                what: "LJ pair coefficients",
                expected: n_types * n_types,
                found: pairs.len(),
            });
        }

        for ti in 0..n_types {
            for tj in 0..ti {
                if pairs[ti * n_types + tj] != pairs[tj * n_types + ti] {
                    log::warn!("LJ pair table is not symmetric for types ({ti}, {tj})");
                }
            }
        }

        let data = pairs
            .iter()
            .flat_map(|&(c6, c12)| [6. * c6, 12. * c12])
            .collect();

        Ok(Self { n_types, data })
    }

    /// Wrap (c6, c12) values that already carry the kernel's prefactors, in the flat layout.
    pub fn from_raw(n_types: usize, data: Vec<f32>) -> Result<Self, KernelError> {
        if data.len() != 2 * n_types * n_types {
            return Err(KernelError::LengthMismatch {
                what: "LJ pair table",
                expected: 2 * n_types * n_types,
                found: data.len(),
            });
        }
        Ok(Self { n_types, data })
    }

    pub fn n_types(&self) -> usize {
        self.n_types
    }

    /// Index of c6 for this pair; c12 follows it.
    #[inline(always)]
    pub fn offset(&self, ti: usize, tj: usize) -> usize {
        2 * (self.n_types * ti + tj)
    }

    /// Stored (c6, c12), with prefactors.
    #[inline(always)]
    pub fn get(&self, ti: usize, tj: usize) -> (f32, f32) {
        let i = self.offset(ti, tj);
        (self.data[i], self.data[i + 1])
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

/// Returns σ, ε between a pair of types. Order doesn't matter.
fn combine_lj_params(σ_0: f32, ε_0: f32, σ_1: f32, ε_1: f32) -> (f32, f32) {
    let σ = 0.5 * (σ_0 + σ_1);
    let ε = (ε_0 * ε_1).sqrt();

    (σ, ε)
}

/// V = 4ε((σ/r)¹² - (σ/r)⁶) = c12/r¹² - c6/r⁶
fn c6_c12_from_sigma_eps(σ: f32, ε: f32) -> (f32, f32) {
    let σ6 = σ.powi(6);
    (4. * ε * σ6, 4. * ε * σ6 * σ6)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn lorentz_berthelot() {
        let t = LjPairTable::from_sigma_eps(&[(0.3, 0.5), (0.4, 0.2)]);
        assert_eq!(t.n_types(), 2);
        assert_eq!(t.get(0, 1), t.get(1, 0));

        let σ: f32 = 0.35;
        let ε = (0.5_f32 * 0.2).sqrt();
        let (c6, c12) = t.get(0, 1);
        assert_relative_eq!(c6, 6. * 4. * ε * σ.powi(6), max_relative = 1e-6);
        assert_relative_eq!(c12, 12. * 4. * ε * σ.powi(12), max_relative = 1e-6);
    }

    #[test]
    fn flat_layout() {
        let t = LjPairTable::from_c6_c12(2, &[(1., 2.), (3., 4.), (3., 4.), (5., 6.)]).unwrap();
        assert_eq!(t.offset(1, 0), 4);
        assert_eq!(t.data()[4], 18.);
        assert_eq!(t.data()[5], 48.);
        assert_eq!(t.get(1, 1), (30., 72.));

        assert!(matches!(
            LjPairTable::from_c6_c12(2, &[(1., 2.)]),
            Err(KernelError::LengthMismatch { .. })
        ));
    }
}
