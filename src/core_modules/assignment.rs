//! Minimum-cost linear assignment (Hungarian / Kuhn-Munkres).
//!
//! Classical O(n³) potential-based formulation: each row is inserted in turn
//! by finding the shortest augmenting path with Dijkstra-style potential
//! relaxation. Ties are broken towards the lowest column index, so a given
//! matrix always yields the same matching.

/// Solves the assignment problem on a square matrix of finite costs.
///
/// Returns one `(row, col)` pair per row, sorted by row. Non-square input is
/// padded with a dominating price and the padded pairs are stripped.
pub fn hungarian_assignment(cost_matrix: &[Vec<f64>]) -> Vec<(usize, usize)> {
    if cost_matrix.is_empty() {
        return vec![];
    }
    let n_rows = cost_matrix.len();
    let n_cols = cost_matrix.iter().map(Vec::len).max().unwrap_or(0);
    if n_cols == 0 {
        return vec![];
    }

    let n = n_rows.max(n_cols);
    let pad = cost_matrix
        .iter()
        .flatten()
        .fold(0.0_f64, |acc, &c| acc.max(c.abs()))
        * (n as f64 + 1.0)
        + 1.0;
    let inf = f64::INFINITY;

    let mut c = vec![vec![pad; n]; n];
    for (i, row) in cost_matrix.iter().enumerate() {
        for (j, &value) in row.iter().enumerate() {
            c[i][j] = value;
        }
    }

    // u[i]: potential for row i (1-indexed; index 0 unused).
    // v[j]: potential for column j (1-indexed; index 0 = dummy source).
    let mut u = vec![0.0_f64; n + 1];
    let mut v = vec![0.0_f64; n + 1];
    // p[j]: 1-indexed row assigned to column j (0 = unassigned).
    let mut p = vec![0_usize; n + 1];
    // way[j]: predecessor column of j in the current augmenting path.
    let mut way = vec![0_usize; n + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0_usize;
        let mut min_val = vec![inf; n + 1];
        let mut used = vec![false; n + 1];

        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = inf;
            let mut j1 = 0_usize;

            for j in 1..=n {
                if !used[j] {
                    let val = c[i0 - 1][j - 1] - u[i0] - v[j];
                    if val < min_val[j] {
                        min_val[j] = val;
                        way[j] = j0;
                    }
                    if min_val[j] < delta {
                        delta = min_val[j];
                        j1 = j;
                    }
                }
            }

            for j in 0..=n {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    min_val[j] -= delta;
                }
            }

            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }

        loop {
            p[j0] = p[way[j0]];
            j0 = way[j0];
            if j0 == 0 {
                break;
            }
        }
    }

    let mut assignments: Vec<(usize, usize)> = (1..=n)
        .filter(|&j| p[j] != 0)
        .map(|j| (p[j] - 1, j - 1))
        .filter(|&(row, col)| row < n_rows && col < cost_matrix[row].len())
        .collect();
    assignments.sort_unstable_by_key(|&(row, _)| row);
    assignments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn total(cost: &[Vec<f64>], pairs: &[(usize, usize)]) -> f64 {
        pairs.iter().map(|&(i, j)| cost[i][j]).sum()
    }

    #[test]
    fn identity_2x2_assigns_diagonal() {
        let cost = vec![vec![0.0, 1.0], vec![1.0, 0.0]];
        assert_eq!(hungarian_assignment(&cost), vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn swapped_2x2() {
        let cost = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        assert_eq!(hungarian_assignment(&cost), vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn classic_3x3_reaches_optimum() {
        let cost = vec![
            vec![4.0, 1.0, 3.0],
            vec![2.0, 0.0, 5.0],
            vec![3.0, 2.0, 2.0],
        ];
        let pairs = hungarian_assignment(&cost);
        assert_eq!(pairs.len(), 3);
        assert_eq!(total(&cost, &pairs), 5.0);
    }

    #[test]
    fn rectangular_input_matches_shorter_side() {
        let cost = vec![vec![3.0, 1.0, 2.0]];
        assert_eq!(hungarian_assignment(&cost), vec![(0, 1)]);
        let tall = vec![vec![5.0], vec![1.0], vec![4.0]];
        assert_eq!(hungarian_assignment(&tall), vec![(1, 0)]);
    }

    #[test]
    fn same_input_same_answer() {
        let cost = vec![vec![1.0; 4]; 4];
        assert_eq!(hungarian_assignment(&cost), hungarian_assignment(&cost));
    }

    #[test]
    fn empty_input() {
        assert!(hungarian_assignment(&[]).is_empty());
        assert!(hungarian_assignment(&[vec![]]).is_empty());
    }
}
