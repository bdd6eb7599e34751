// THEORY:
// A `CostMatrix` poses "which spot of set A continues which spot of set B" as a
// square linear assignment problem. For `n` sources and `m` targets it is an
// `(n + m) x (n + m)` matrix:
//
//             targets (m)          no-link (n)
//   sources | real link costs    | no-link price   |
//   virtual | no-link price      | virtual price   |
//
// - The no-link blocks are priced at 1.05x the largest finite link cost, so a
//   source prefers staying unmatched over a link worse than anything observed.
// - The virtual block is priced at the smallest non-zero link cost.
// - Forbidden links are kept as `LinkCost::Forbidden`; the solver prices them
//   above any feasible matching and drops them from its answer. No NaN or
//   infinity ever reaches the solver.

use crate::core_modules::assignment::hungarian_assignment;

/// Factor applied to the worst finite link cost to price a non-link.
pub const NO_LINK_FACTOR: f64 = 1.05;

/// No-link price used when every finite link cost is zero, so that a zero-cost
/// link still beats leaving both spots unmatched.
const NO_LINK_FLOOR: f64 = 1.0;

/// Cost of linking two items, or the explicit sentinel that forbids it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LinkCost {
    Allowed(f64),
    Forbidden,
}

impl LinkCost {
    pub fn value(&self) -> Option<f64> {
        match *self {
            Self::Allowed(cost) => Some(cost),
            Self::Forbidden => None,
        }
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden)
    }
}

/// Square-padded assignment matrix between `sources` and `targets`.
#[derive(Debug, Clone)]
pub struct CostMatrix {
    sources: usize,
    targets: usize,
    cells: Vec<LinkCost>,
}

impl CostMatrix {
    /// Evaluates `cost(i, j)` for every source/target pair and pads the result.
    pub fn build<F>(sources: usize, targets: usize, mut cost: F) -> Self
    where
        F: FnMut(usize, usize) -> LinkCost,
    {
        let size = sources + targets;
        let mut cells = vec![LinkCost::Forbidden; size * size];
        let mut max_cost: f64 = 0.0;
        let mut min_nonzero: Option<f64> = None;

        for i in 0..sources {
            for j in 0..targets {
                let link = cost(i, j);
                if let LinkCost::Allowed(value) = link {
                    max_cost = max_cost.max(value);
                    if value > 0.0 {
                        min_nonzero = Some(min_nonzero.map_or(value, |m| m.min(value)));
                    }
                }
                cells[i * size + j] = link;
            }
        }

        let no_link = if max_cost > 0.0 { max_cost * NO_LINK_FACTOR } else { NO_LINK_FLOOR };
        let virtual_cost = min_nonzero.unwrap_or(0.0);

        for i in 0..size {
            for j in 0..size {
                let cell = match (i < sources, j < targets) {
                    (true, true) => continue,
                    (true, false) | (false, true) => LinkCost::Allowed(no_link),
                    (false, false) => LinkCost::Allowed(virtual_cost),
                };
                cells[i * size + j] = cell;
            }
        }

        Self {
            sources,
            targets,
            cells,
        }
    }

    pub fn size(&self) -> usize {
        self.sources + self.targets
    }

    pub fn get(&self, row: usize, col: usize) -> LinkCost {
        self.cells[row * self.size() + col]
    }

    /// Solves the assignment and returns the real `(source, target)` links.
    pub fn solve(&self) -> Vec<(usize, usize)> {
        if self.sources == 0 || self.targets == 0 {
            return Vec::new();
        }
        let size = self.size();
        let max_finite = self
            .cells
            .iter()
            .filter_map(LinkCost::value)
            .fold(0.0_f64, f64::max);
        // Any complete matching over finite cells costs at most size * max_finite.
        let forbidden_price = (size as f64 + 1.0) * (max_finite + 1.0);

        let dense: Vec<Vec<f64>> = (0..size)
            .map(|i| {
                (0..size)
                    .map(|j| self.get(i, j).value().unwrap_or(forbidden_price))
                    .collect()
            })
            .collect();

        hungarian_assignment(&dense)
            .into_iter()
            .filter(|&(i, j)| {
                i < self.sources && j < self.targets && !self.get(i, j).is_forbidden()
            })
            .collect()
    }
}
