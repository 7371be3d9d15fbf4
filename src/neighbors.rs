//! Compact neighbor lists, in the layout the kernel consumes: a set of runs, each pairing one
//! i particle (at one periodic shift, in one energy group bucket) with a contiguous range of a
//! flat j-index array. Runs are padded with a negative sentinel up to a multiple of the SIMD
//! width; padding only ever trails the valid entries of a run.
//!
//! Lists are built once per search step, and read by many kernel invocations.

use std::collections::HashSet;

use lin_alg::f32::Vec3;
use log::debug;
use rayon::prelude::*;

use crate::{
    KernelError, NbInputs,
    cell::{CENTRAL_SHIFT, SimBox, shift_index},
    energy::group_pair,
    table::SplineTable,
};

/// Marks a padding slot in `NeighborList::j_indices`.
pub const NEIGHBOR_SENTINEL: i32 = -1;

/// One i particle's neighbors at a single shift and energy group bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NeighborRun {
    pub i: usize,
    /// Index into the shift vector table.
    pub shift: usize,
    /// Half-open range into `j_indices`.
    pub start: usize,
    pub end: usize,
    /// Energy group bucket.
    pub group: usize,
}

impl NeighborRun {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NeighborList {
    pub runs: Vec<NeighborRun>,
    /// Global particle ids, with `NEIGHBOR_SENTINEL` padding.
    pub j_indices: Vec<i32>,
}

impl NeighborList {
    pub fn ids(&self, run: &NeighborRun) -> &[i32] {
        &self.j_indices[run.start..run.end]
    }

    /// Number of real (non-padding) pairs.
    pub fn n_pairs(&self) -> usize {
        self.runs
            .iter()
            .map(|r| self.ids(r).iter().filter(|&&j| j >= 0).count())
            .sum()
    }

    /// Check ranges, and that padding only trails the valid entries of each run. This doesn't
    /// need particle data; `NbInputs::validate` runs it along with the index checks that do.
    pub fn check_structure(&self) -> Result<(), KernelError> {
        for (r, run) in self.runs.iter().enumerate() {
            if run.start > run.end || run.end > self.j_indices.len() {
                return Err(KernelError::MalformedNeighborList(format!(
                    "Run {r} has range {}..{}, but the j-index array has length {}",
                    run.start,
                    run.end,
                    self.j_indices.len()
                )));
            }

            let ids = &self.j_indices[run.start..run.end];
            if let Some(first_pad) = ids.iter().position(|&j| j < 0) {
                if ids[first_pad..].iter().any(|&j| j >= 0) {
                    return Err(KernelError::MalformedNeighborList(format!(
                        "Run {r} (i = {}) has a valid neighbor after padding",
                        run.i
                    )));
                }
            }
        }
        Ok(())
    }

    /// Split into up to `n_parts` lists of contiguous runs, with roughly equal slot counts.
    /// Each part owns a copy of its slice of the j-index array.
    pub fn split(&self, n_parts: usize) -> Vec<NeighborList> {
        let n_parts = n_parts.max(1);
        let target = self.j_indices.len().div_ceil(n_parts).max(1);

        let mut result = Vec::with_capacity(n_parts);
        let mut current = NeighborList::default();

        for run in &self.runs {
            if current.j_indices.len() >= target && result.len() + 1 < n_parts {
                result.push(std::mem::take(&mut current));
            }

            let start = current.j_indices.len();
            current.j_indices.extend_from_slice(self.ids(run));
            current.runs.push(NeighborRun {
                start,
                end: current.j_indices.len(),
                ..*run
            });
        }

        if !current.runs.is_empty() || result.is_empty() {
            result.push(current);
        }
        result
    }
}

/// Appends runs to a list, padding each one.
pub struct NeighborListBuilder {
    pad_to: usize,
    list: NeighborList,
}

impl NeighborListBuilder {
    /// Runs get padded with sentinels up to a multiple of `pad_to`; usually the SIMD width.
    pub fn new(pad_to: usize) -> Self {
        Self {
            pad_to: pad_to.max(1),
            list: NeighborList::default(),
        }
    }

    /// Add a run. Runs with no neighbors are skipped.
    pub fn push_run(
        &mut self,
        i: usize,
        shift: usize,
        group: usize,
        neighbors: &[usize],
    ) -> Result<(), KernelError> {
        if neighbors.is_empty() {
            return Ok(());
        }

        let start = self.list.j_indices.len();
        for &j in neighbors {
            let id = i32::try_from(j).map_err(|_| KernelError::IndexOutOfRange {
                what: "neighbor id",
                index: j,
                len: i32::MAX as usize,
            })?;
            self.list.j_indices.push(id);
        }

        let padded = neighbors.len().next_multiple_of(self.pad_to);
        self.list
            .j_indices
            .resize(start + padded, NEIGHBOR_SENTINEL);

        self.list.runs.push(NeighborRun {
            i,
            shift,
            start,
            end: self.list.j_indices.len(),
            group,
        });

        Ok(())
    }

    pub fn finish(self) -> NeighborList {
        self.list
    }
}

/// A neighbor found by the search: (shift index, energy group bucket, j).
type Candidate = (usize, usize, usize);

/// Build a half neighbor list (each pair once, j > i) by brute-force search over all pairs,
/// parallelized over i. Pairs in `exclusions` are skipped, in either order.
///
/// With a cell, each pair uses the periodic shift that puts `x_i + shift - x_j` at its minimum
/// image; positions must be inside the cell. Without one, every run uses `CENTRAL_SHIFT`, and
/// the caller passes a shift table whose entry there is zero.
///
/// Runs are split by (shift, energy group bucket), where the bucket of a pair is
/// `min(g_i, g_j) · n_groups + max(g_i, g_j)`.
pub fn build_neighbor_list(
    posits: &[Vec3],
    cell: Option<&SimBox>,
    cutoff: f32,
    exclusions: &HashSet<(usize, usize)>,
    energy_groups: &[usize],
    n_groups: usize,
    pad_to: usize,
) -> Result<NeighborList, KernelError> {
    let n = posits.len();

    if energy_groups.len() != n {
        return Err(KernelError::LengthMismatch {
            what: "energy group ids",
            expected: n,
            found: energy_groups.len(),
        });
    }
    if let Some(g) = energy_groups.iter().copied().find(|&g| g >= n_groups) {
        return Err(KernelError::IndexOutOfRange {
            what: "energy group",
            index: g,
            len: n_groups,
        });
    }
    if let Some(c) = cell {
        if !c.is_valid() {
            return Err(KernelError::MalformedNeighborList(format!(
                "Cell edges must be > 0; got {:?}",
                c.extent
            )));
        }

        // Only the minimum image of each pair is searched.
        let max = 0.5 * c.extent.x.min(c.extent.y).min(c.extent.z);
        if cutoff > max {
            return Err(KernelError::CutoffTooLong { cutoff, max });
        }
    }

    let cutoff_sq = cutoff * cutoff;

    let per_i: Vec<Vec<Candidate>> = (0..n)
        .into_par_iter()
        .map(|i| -> Result<Vec<Candidate>, KernelError> {
            let mut out = Vec::new();
            let posit_tgt = posits[i];

            for j in (i + 1)..n {
                if exclusions.contains(&(i, j)) || exclusions.contains(&(j, i)) {
                    continue;
                }

                let mut d = posit_tgt - posits[j];
                let mut shift = CENTRAL_SHIFT;

                if let Some(c) = cell {
                    let (s, n_cells) = c.image_shift(d);
                    d = d + s;
                    shift = shift_index(n_cells).ok_or_else(|| {
                        KernelError::MalformedNeighborList(format!(
                            "Particles {i} and {j} are more than one cell apart; wrap positions first"
                        ))
                    })?;
                }

                if d.magnitude_squared() < cutoff_sq {
                    let bucket = group_pair(energy_groups[i], energy_groups[j], n_groups);
                    out.push((shift, bucket, j));
                }
            }

            // Stable, so neighbors within a run stay in ascending order.
            out.sort_by_key(|&(shift, bucket, _)| (shift, bucket));
            Ok(out)
        })
        .collect::<Result<_, KernelError>>()?;

    let mut builder = NeighborListBuilder::new(pad_to);
    let mut js = Vec::new();

    for (i, candidates) in per_i.iter().enumerate() {
        for chunk in candidates.chunk_by(|a, b| (a.0, a.1) == (b.0, b.1)) {
            let (shift, bucket, _) = chunk[0];
            js.clear();
            js.extend(chunk.iter().map(|c| c.2));
            builder.push_run(i, shift, bucket, &js)?;
        }
    }

    let list = builder.finish();
    debug!(
        "Built neighbor list: {} particles, {} runs, {} pairs, {} slots",
        n,
        list.runs.len(),
        list.n_pairs(),
        list.j_indices.len()
    );

    Ok(list)
}

impl NbInputs<'_> {
    /// Construction-time checks the kernel itself doesn't do: array lengths, particle, type, and
    /// shift indices, list structure, and (with a table) that every pair is inside its range.
    pub fn validate(
        &self,
        nlist: &NeighborList,
        table: Option<&SplineTable>,
    ) -> Result<(), KernelError> {
        let n = self.posits.len();

        if self.charges.len() != n {
            return Err(KernelError::LengthMismatch {
                what: "charges",
                expected: n,
                found: self.charges.len(),
            });
        }
        if self.vdw_types.len() != n {
            return Err(KernelError::LengthMismatch {
                what: "VdW types",
                expected: n,
                found: self.vdw_types.len(),
            });
        }

        let n_types = self.lj.n_types();
        if let Some(t) = self.vdw_types.iter().copied().find(|&t| t >= n_types) {
            return Err(KernelError::IndexOutOfRange {
                what: "VdW type",
                index: t,
                len: n_types,
            });
        }

        nlist.check_structure()?;

        let r_max = table.map(|t| t.max_distance());

        for run in &nlist.runs {
            if run.i >= n {
                return Err(KernelError::IndexOutOfRange {
                    what: "i particle",
                    index: run.i,
                    len: n,
                });
            }
            if run.shift >= self.shift_vecs.len() {
                return Err(KernelError::IndexOutOfRange {
                    what: "shift",
                    index: run.shift,
                    len: self.shift_vecs.len(),
                });
            }

            let xi = self.posits[run.i] + self.shift_vecs[run.shift];

            for &j in nlist.ids(run).iter().filter(|&&j| j >= 0) {
                let j = j as usize;
                if j >= n {
                    return Err(KernelError::IndexOutOfRange {
                        what: "j particle",
                        index: j,
                        len: n,
                    });
                }

                if let Some(max) = r_max {
                    let r = (xi - self.posits[j]).magnitude();
                    if !(r < max) {
                        return Err(KernelError::TableRange { r, max });
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::N_SHIFTS;

    #[test]
    fn builder_pads_runs() {
        let mut b = NeighborListBuilder::new(4);
        b.push_run(0, CENTRAL_SHIFT, 0, &[1, 2, 3, 4, 5]).unwrap();
        b.push_run(1, CENTRAL_SHIFT, 0, &[]).unwrap();
        b.push_run(2, 4, 1, &[3, 4, 5, 6]).unwrap();
        let list = b.finish();

        assert_eq!(list.runs.len(), 2);
        assert_eq!(list.runs[0].len(), 8);
        assert_eq!(
            list.ids(&list.runs[0]),
            &[1, 2, 3, 4, 5, NEIGHBOR_SENTINEL, NEIGHBOR_SENTINEL, NEIGHBOR_SENTINEL]
        );
        assert_eq!(list.runs[1].start, 8);
        assert_eq!(list.runs[1].len(), 4);
        assert_eq!(list.n_pairs(), 9);
        assert!(list.check_structure().is_ok());
    }

    #[test]
    fn padding_before_valid_is_malformed() {
        let list = NeighborList {
            runs: vec![NeighborRun {
                i: 0,
                shift: 0,
                start: 0,
                end: 4,
                group: 0,
            }],
            j_indices: vec![1, -1, 2, -1],
        };
        assert!(matches!(
            list.check_structure(),
            Err(KernelError::MalformedNeighborList(_))
        ));

        let out_of_range = NeighborList {
            runs: vec![NeighborRun {
                i: 0,
                shift: 0,
                start: 2,
                end: 6,
                group: 0,
            }],
            j_indices: vec![1, 2, 3],
        };
        assert!(out_of_range.check_structure().is_err());
    }

    #[test]
    fn periodic_search() {
        let cell = SimBox::from_extent(Vec3::new(3., 3., 3.));
        let posits = vec![
            Vec3::new(0.1, 1.5, 1.5),
            Vec3::new(2.9, 1.5, 1.5),
            Vec3::new(0.5, 1.5, 1.5),
            Vec3::new(1.5, 0.2, 0.2),
        ];

        let mut exclusions = HashSet::new();
        exclusions.insert((2, 0));

        let list = build_neighbor_list(
            &posits,
            Some(&cell),
            0.9,
            &exclusions,
            &[0, 0, 1, 0],
            2,
            4,
        )
        .unwrap();

        // 0-1 across the x boundary; 1-2 across it too; 0-2 excluded.
        assert_eq!(list.n_pairs(), 2);

        let shifts = cell.shift_vectors();
        assert_eq!(shifts.len(), N_SHIFTS);

        for run in &list.runs {
            for &j in list.ids(run).iter().filter(|&&j| j >= 0) {
                let d = posits[run.i] + shifts[run.shift] - posits[j as usize];
                assert!(d.magnitude() < 0.9);
            }
        }

        let run_12 = list.runs.iter().find(|r| r.i == 1).unwrap();
        assert_eq!(run_12.group, group_pair(0, 1, 2));
        assert_eq!(list.ids(run_12)[0], 2);
    }

    #[test]
    fn cutoff_longer_than_half_cell() {
        let posits = vec![Vec3::new(0.2, 0.5, 0.5), Vec3::new(0.8, 0.5, 0.5)];
        let narrow = SimBox::from_extent(Vec3::new(1., 3., 3.));

        // Both 0.6 and its image at 0.4 are inside 0.8.
        let no_exclusions = HashSet::new();
        let result =
            build_neighbor_list(&posits, Some(&narrow), 0.8, &no_exclusions, &[0, 0], 1, 4);
        assert_eq!(
            result,
            Err(KernelError::CutoffTooLong {
                cutoff: 0.8,
                max: 0.5
            })
        );

        // Exactly half the shortest edge is allowed.
        let list =
            build_neighbor_list(&posits, Some(&narrow), 0.5, &no_exclusions, &[0, 0], 1, 4)
                .unwrap();
        assert_eq!(list.n_pairs(), 1);

        // Without a cell, there are no images to miss.
        let list = build_neighbor_list(&posits, None, 0.8, &no_exclusions, &[0, 0], 1, 4).unwrap();
        assert_eq!(list.n_pairs(), 1);
    }

    #[test]
    fn split_keeps_runs() {
        let mut b = NeighborListBuilder::new(4);
        for i in 0..10 {
            b.push_run(i, CENTRAL_SHIFT, 0, &[i + 1, i + 2, i + 3]).unwrap();
        }
        let list = b.finish();

        let parts = list.split(3);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts.iter().map(|p| p.runs.len()).sum::<usize>(), 10);
        assert_eq!(parts.iter().map(|p| p.n_pairs()).sum::<usize>(), 30);
        for p in &parts {
            assert!(p.check_structure().is_ok());
        }
    }
}
