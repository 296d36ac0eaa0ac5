//! Row-wise partitioning of an N x N matrix across a fixed worker group.
//!
//! Rank `i` always owns rows `[i * rows_per_worker, (i + 1) * rows_per_worker)`.
//! Scatter and gather rely on this positional convention; nothing on the wire
//! tags which block came from which rank.

use crate::errors::{NodeError, Result};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Outcome of a successful partition check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionPlan {
    /// Matrix dimension N
    pub matrix_size: usize,
    /// Number of ranks in the group, coordinator included
    pub world_size: usize,
    /// Rows assigned to every rank (N / W)
    pub rows_per_worker: usize,
}

/// Compute the row split of an `matrix_size x matrix_size` matrix over `world_size` ranks.
///
/// Pure and deterministic: every rank evaluates it with the same inputs and
/// reaches the same verdict, which is what lets the whole group abort
/// without a partially entered collective.
///
/// # Errors
/// Returns [`NodeError::InvalidPartition`] when `world_size` is zero,
/// `matrix_size` is zero, or `matrix_size % world_size != 0`.
pub fn plan(matrix_size: usize, world_size: usize) -> Result<PartitionPlan> {
    if world_size == 0 || matrix_size == 0 || matrix_size % world_size != 0 {
        return Err(NodeError::InvalidPartition {
            matrix_size,
            world_size,
        });
    }

    Ok(PartitionPlan {
        matrix_size,
        world_size,
        rows_per_worker: matrix_size / world_size,
    })
}

impl PartitionPlan {
    /// Global rows owned by `rank`.
    ///
    /// # Panics
    /// Panics if `rank >= world_size`.
    pub fn row_range(&self, rank: usize) -> Range<usize> {
        assert!(
            rank < self.world_size,
            "Rank {} out of range for world size {}",
            rank,
            self.world_size
        );
        let start = rank * self.rows_per_worker;
        start..start + self.rows_per_worker
    }

    /// Number of `f64` elements in one row-block.
    pub fn block_len(&self) -> usize {
        self.rows_per_worker * self.matrix_size
    }

    /// Number of `f64` elements in the full matrix.
    pub fn matrix_len(&self) -> usize {
        self.matrix_size * self.matrix_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_even_split() {
        let p = plan(6000, 4).unwrap();
        assert_eq!(p.rows_per_worker, 1500);
        assert_eq!(p.block_len(), 1500 * 6000);
        assert_eq!(p.matrix_len(), 6000 * 6000);
    }

    #[test]
    fn test_plan_rejects_uneven_split() {
        let err = plan(6, 4).unwrap_err();
        match err {
            NodeError::InvalidPartition {
                matrix_size,
                world_size,
            } => {
                assert_eq!(matrix_size, 6);
                assert_eq!(world_size, 4);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_plan_rejects_zero() {
        assert!(plan(4, 0).unwrap_err().is_invalid_partition());
        assert!(plan(0, 2).unwrap_err().is_invalid_partition());
    }

    #[test]
    fn test_single_worker_owns_everything() {
        let p = plan(5, 1).unwrap();
        assert_eq!(p.row_range(0), 0..5);
    }

    #[test]
    fn test_row_ranges_tile_the_matrix() {
        // Property: ranges are disjoint, ascending by rank, and cover [0, N)
        for (n, w) in [(4, 2), (6, 3), (12, 4), (10, 5), (8, 8)] {
            let p = plan(n, w).unwrap();
            let mut next = 0;
            for rank in 0..w {
                let r = p.row_range(rank);
                assert_eq!(r.start, next, "gap before rank {rank} for n={n}, w={w}");
                assert_eq!(r.len(), n / w);
                next = r.end;
            }
            assert_eq!(next, n);
        }
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_row_range_rank_out_of_bounds() {
        plan(4, 2).unwrap().row_range(2);
    }

    #[test]
    fn test_plan_is_deterministic() {
        for _ in 0..10 {
            assert_eq!(plan(12, 3).unwrap(), plan(12, 3).unwrap());
        }
    }
}
