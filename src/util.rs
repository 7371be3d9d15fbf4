//! Iteration and flop counters, for performance monitoring. These have no effect on results.

use std::{
    fmt::{Display, Formatter},
    iter::Sum,
    ops::{Add, AddAssign},
    time::Duration,
};

/// Flop cost estimate for one outer (i-run) iteration and one inner (j-neighbor) iteration of a
/// kernel specialization.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlopCosts {
    pub outer: u64,
    pub inner: u64,
}

/// Returned by each kernel invocation; the caller sums these.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KernelCounters {
    /// One per neighbor run processed.
    pub outer_iterations: u64,
    /// Neighbor list slots processed, padding included.
    pub inner_iterations: u64,
    pub flops: u64,
}

impl KernelCounters {
    /// Counters from iteration counts and the per-iteration costs of a kernel.
    pub fn new(outer_iterations: u64, inner_iterations: u64, costs: FlopCosts) -> Self {
        Self {
            outer_iterations,
            inner_iterations,
            flops: costs.outer * outer_iterations + costs.inner * inner_iterations,
        }
    }

    /// Throughput, in GFLOP/s, given the wall time these counters were accumulated over.
    pub fn gflops(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs == 0. {
            return 0.;
        }
        self.flops as f64 / secs * 1e-9
    }
}

impl Add for KernelCounters {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            outer_iterations: self.outer_iterations + rhs.outer_iterations,
            inner_iterations: self.inner_iterations + rhs.inner_iterations,
            flops: self.flops + rhs.flops,
        }
    }
}

impl AddAssign for KernelCounters {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for KernelCounters {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |a, b| a + b)
    }
}

impl Display for KernelCounters {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Non-bonded kernel: {} outer iterations, {} inner iterations, {} flops",
            self.outer_iterations, self.inner_iterations, self.flops
        )?;

        if self.outer_iterations > 0 {
            write!(
                f,
                " ({:.1} neighbors per run)",
                self.inner_iterations as f64 / self.outer_iterations as f64
            )?;
        }

        Ok(())
    }
}
