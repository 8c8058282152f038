//! Minimum-cost one-to-one assignment on a dense rectangular matrix,
//! solved exactly with shortest augmenting paths and row/column potentials.

use crate::error::Error;

/// For each row, the assigned column (every row is assigned when
/// `rows <= cols`, and vice versa). Costs must be finite.
pub fn min_cost_assignment(cost: &[Vec<f64>]) -> Result<Vec<Option<usize>>, Error> {
    let n = cost.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    let m = cost[0].len();
    if cost.iter().any(|row| row.len() != m) {
        return Err(Error::Assignment);
    }
    if m == 0 {
        return Ok(vec![None; n]);
    }
    if cost.iter().flatten().any(|c| !c.is_finite()) {
        return Err(Error::Assignment);
    }

    if n <= m {
        solve(cost, n, m)
    } else {
        // Transpose so rows <= cols, then invert the mapping.
        let transposed: Vec<Vec<f64>> = (0..m)
            .map(|j| (0..n).map(|i| cost[i][j]).collect())
            .collect();
        let by_col = solve(&transposed, m, n)?;
        let mut by_row = vec![None; n];
        for (col, row) in by_col.into_iter().enumerate() {
            if let Some(row) = row {
                by_row[row] = Some(col);
            }
        }
        Ok(by_row)
    }
}

/// Augmenting-path core, `n <= m`. Indices are 1-based internally; column 0
/// is the virtual start column.
fn solve(cost: &[Vec<f64>], n: usize, m: usize) -> Result<Vec<Option<usize>>, Error> {
    let mut u = vec![0.0f64; n + 1];
    let mut v = vec![0.0f64; m + 1];
    // p[j] = row currently matched to column j, 0 when free.
    let mut p = vec![0usize; m + 1];
    let mut way = vec![0usize; m + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0usize;
        let mut minv = vec![f64::INFINITY; m + 1];
        let mut used = vec![false; m + 1];

        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0usize;
            for j in 1..=m {
                if used[j] {
                    continue;
                }
                let cur = cost[i0 - 1][j - 1] - u[i0] - v[j];
                if cur < minv[j] {
                    minv[j] = cur;
                    way[j] = j0;
                }
                if minv[j] < delta {
                    delta = minv[j];
                    j1 = j;
                }
            }
            if j1 == 0 {
                // No reachable free column; cannot happen on finite input.
                return Err(Error::Assignment);
            }
            for j in 0..=m {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }
            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }

        // Unroll the augmenting path.
        loop {
            let j1 = way[j0];
            p[j0] = p[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut by_row = vec![None; n];
    for j in 1..=m {
        if p[j] != 0 {
            by_row[p[j] - 1] = Some(j - 1);
        }
    }
    Ok(by_row)
}
