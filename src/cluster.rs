//! Structural clustering of a system's state-variable expressions
//!
//! Expressions are compared with a recursive tree edit distance, then merged
//! greedily with single linkage. Grouping the variables by cluster puts
//! expressions that need similar block layouts next to each other, which
//! keeps reconfiguration between neighbouring circuits cheap.

use std::collections::HashMap;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::ast::{Expr, Node};
use crate::system::{Declaration, Ode};

/// Clustering options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Reorder state variables before simulation and code generation
    pub enabled: bool,
    /// Stop merging once the closest clusters are farther apart than this
    pub max_distance: Option<usize>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_distance: None,
        }
    }
}

/// Tree edit distance between two (possibly empty) trees
///
/// Missing nodes cost one per node; two present nodes may be matched, with
/// cost 0 when kind and operator agree, or one side may skip a level.
pub fn tree_edit_distance(a: Option<&Node>, b: Option<&Node>) -> usize {
    EditDistance::default().distance(a, b)
}

/// Memo keyed by node identifiers, which are unique within each tree
#[derive(Default)]
struct EditDistance {
    memo: HashMap<(usize, usize), usize>,
}

impl EditDistance {
    fn distance(&mut self, a: Option<&Node>, b: Option<&Node>) -> usize {
        let (a, b) = match (a, b) {
            (None, None) => return 0,
            (None, Some(node)) | (Some(node), None) => return node.size(),
            (Some(a), Some(b)) => (a, b),
        };

        if let Some(&cached) = self.memo.get(&(a.id, b.id)) {
            return cached;
        }

        let substitution = if a.label() == b.label() { 0 } else { 1 };
        let candidates = [
            1 + self.distance(Some(a), b.left()),
            1 + self.distance(Some(a), b.right()),
            1 + self.distance(a.left(), Some(b)),
            1 + self.distance(a.right(), Some(b)),
            substitution
                + self.distance(a.left(), b.left())
                + self.distance(a.right(), b.right()),
        ];
        let best = candidates.iter().copied().min().unwrap_or(0);

        self.memo.insert((a.id, b.id), best);
        best
    }
}

/// Pairwise distance matrix over expression roots
pub fn distance_matrix(exprs: &[&Expr]) -> Vec<Vec<usize>> {
    let n = exprs.len();
    let mut matrix = vec![vec![0; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = tree_edit_distance(Some(&exprs[i].root), Some(&exprs[j].root));
            matrix[i][j] = d;
            matrix[j][i] = d;
        }
    }
    matrix
}

/// One merge step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Merge {
    /// Label kept by the merged cluster
    pub kept: usize,
    /// Label that disappeared
    pub absorbed: usize,
    pub distance: usize,
}

/// Result of clustering: a label per element and the merge history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Clustering {
    pub labels: Vec<usize>,
    pub merges: Vec<Merge>,
}

impl Clustering {
    /// Element indices grouped by ascending label, original order within a group
    pub fn order(&self) -> Vec<usize> {
        let mut labels: Vec<usize> = self.labels.clone();
        labels.sort_unstable();
        labels.dedup();

        labels
            .into_iter()
            .flat_map(|label| {
                self.labels
                    .iter()
                    .enumerate()
                    .filter(move |(_, l)| **l == label)
                    .map(|(i, _)| i)
            })
            .collect()
    }

    pub fn cluster_count(&self) -> usize {
        let mut labels = self.labels.clone();
        labels.sort_unstable();
        labels.dedup();
        labels.len()
    }
}

/// Single-linkage clustering over a symmetric distance matrix
///
/// The closest pair of elements in different clusters is found by a
/// row-major scan (first found wins ties). After each merge every member
/// row of the merged cluster takes the minimum of the two merged rows.
pub fn single_linkage(mut matrix: Vec<Vec<usize>>, max_distance: Option<usize>) -> Clustering {
    let n = matrix.len();
    let mut labels: Vec<usize> = (0..n).collect();
    let mut merges = Vec::new();
    let mut remaining = n;

    while remaining > 1 {
        let mut closest: Option<(usize, usize, usize)> = None;
        for i in 0..n {
            for j in 0..n {
                if labels[i] == labels[j] {
                    continue;
                }
                if closest.map_or(true, |(_, _, d)| matrix[i][j] < d) {
                    closest = Some((i, j, matrix[i][j]));
                }
            }
        }

        let Some((i, j, distance)) = closest else {
            break;
        };
        if max_distance.map_or(false, |cutoff| distance > cutoff) {
            break;
        }

        let kept = labels[i];
        let absorbed = labels[j];
        for label in labels.iter_mut() {
            if *label == absorbed {
                *label = kept;
            }
        }

        for k in 0..n {
            if labels[k] == kept {
                continue;
            }
            let linked = matrix[i][k].min(matrix[j][k]);
            for p in 0..n {
                if labels[p] == kept {
                    matrix[p][k] = linked;
                    matrix[k][p] = linked;
                }
            }
        }

        debug!("merge cluster {} into {} at distance {}", absorbed, kept, distance);
        merges.push(Merge {
            kept,
            absorbed,
            distance,
        });
        remaining -= 1;
    }

    Clustering { labels, merges }
}

/// Reorder a system's state variables so similar expressions sit together
///
/// Constants keep their positions; the state-variable slots are refilled in
/// cluster order.
pub fn reorder(ode: Ode, config: &ClusterConfig) -> Ode {
    let state_slots: Vec<usize> = ode
        .declarations
        .iter()
        .enumerate()
        .filter(|(_, d)| d.is_state())
        .map(|(i, _)| i)
        .collect();

    if state_slots.len() < 2 {
        return ode;
    }

    let exprs: Vec<&Expr> = state_slots.iter().map(|&i| &ode.declarations[i].expr).collect();
    let clustering = single_linkage(distance_matrix(&exprs), config.max_distance);
    let order = clustering.order();
    debug!(
        "{}: {} cluster(s), order {:?}",
        ode.name,
        clustering.cluster_count(),
        order
    );

    let Ode {
        name,
        declarations,
        total_time,
    } = ode;

    let mut taken: Vec<Option<Declaration>> = declarations.into_iter().map(Some).collect();
    let mut reordered: Vec<Declaration> = Vec::with_capacity(taken.len());
    let mut next_state = order.iter().map(|&k| state_slots[k]);

    for i in 0..taken.len() {
        let source = if taken[i].as_ref().map_or(false, Declaration::is_constant) {
            Some(i)
        } else {
            next_state.next()
        };
        if let Some(declaration) = source.and_then(|s| taken[s].take()) {
            reordered.push(declaration);
        }
    }

    Ode {
        name,
        declarations: reordered,
        total_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::compile_expression;
    use crate::system::Interval;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn tree(source: &str) -> Node {
        compile_expression(source).unwrap().root
    }

    #[test]
    fn test_distance_to_empty_tree() {
        let leaf = tree("x");
        assert_eq!(tree_edit_distance(Some(&leaf), None), 1);
        assert_eq!(tree_edit_distance(None, Some(&leaf)), 1);
        assert_eq!(tree_edit_distance(None, None), 0);
        assert_eq!(tree_edit_distance(Some(&tree("a + b * c")), None), 5);
    }

    #[test]
    fn test_distance_small_trees() {
        // Leaves compare by kind only
        assert_eq!(tree_edit_distance(Some(&tree("x")), Some(&tree("y"))), 0);
        assert_eq!(tree_edit_distance(Some(&tree("x")), Some(&tree("2"))), 1);
        // Same shape, different operator
        assert_eq!(tree_edit_distance(Some(&tree("a + b")), Some(&tree("a * b"))), 1);
        // Skip the extra root
        assert_eq!(tree_edit_distance(Some(&tree("sin(a)")), Some(&tree("a"))), 1);
        // Descending into one child costs a single edit
        assert_eq!(tree_edit_distance(Some(&tree("a + b")), Some(&tree("a"))), 1);
        assert_eq!(tree_edit_distance(Some(&tree("(a + b) * c")), Some(&tree("a - b"))), 2);
    }

    #[test]
    fn test_single_linkage_merges_closest_first() {
        // 0 and 2 are close, 1 is far from both
        let matrix = vec![vec![0, 5, 1], vec![5, 0, 4], vec![1, 4, 0]];
        let clustering = single_linkage(matrix, None);
        assert_eq!(
            clustering.merges,
            vec![
                Merge { kept: 0, absorbed: 2, distance: 1 },
                Merge { kept: 0, absorbed: 1, distance: 4 },
            ]
        );
        assert_eq!(clustering.cluster_count(), 1);
        assert_eq!(clustering.order(), vec![0, 1, 2]);
    }

    #[test]
    fn test_cutoff_groups_similar_elements() {
        let matrix = vec![
            vec![0, 6, 1, 6],
            vec![6, 0, 6, 1],
            vec![1, 6, 0, 7],
            vec![6, 1, 7, 0],
        ];
        let clustering = single_linkage(matrix, Some(2));
        assert_eq!(clustering.labels, vec![0, 1, 0, 1]);
        assert_eq!(clustering.order(), vec![0, 2, 1, 3]);
    }

    fn declaration(name: &str, source: &str, lo: f64, hi: f64) -> Declaration {
        Declaration {
            name: name.to_string(),
            expr: compile_expression(source).unwrap(),
            interval: Interval::new(lo, hi),
        }
    }

    fn sample_ode() -> Ode {
        Ode {
            name: "sample".to_string(),
            declarations: vec![
                declaration("k", "2", 2.0, 2.0),
                declaration("a", "integ(sin(b) * k, 0)", -1.0, 1.0),
                declaration("b", "integ(a - b, 0)", -1.0, 1.0),
                declaration("c", "integ(sin(a) * k, 1)", -1.0, 1.0),
                declaration("d", "integ(c - a, 0)", -1.0, 1.0),
            ],
            total_time: 1.0,
        }
    }

    #[test]
    fn test_reorder_keeps_constants_and_groups_states() {
        let config = ClusterConfig {
            enabled: true,
            max_distance: Some(0),
        };
        let reordered = reorder(sample_ode(), &config);
        let names: Vec<&str> = reordered.declarations.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["k", "a", "c", "b", "d"]);
    }

    #[test]
    fn test_reorder_is_a_permutation() {
        let original = sample_ode();
        let reordered = reorder(original.clone(), &ClusterConfig::default());
        assert_eq!(reordered.declarations.len(), original.declarations.len());
        for d in &original.declarations {
            let matches = reordered.declarations.iter().filter(|r| *r == d).count();
            assert_eq!(matches, 1, "{}", d.name);
        }
    }

    fn arb_source() -> impl Strategy<Value = String> {
        let leaf = prop_oneof![
            Just("x".to_string()),
            Just("y".to_string()),
            Just("1".to_string()),
        ];
        leaf.prop_recursive(4, 16, 2, |inner| {
            prop_oneof![
                (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("({} + {})", a, b)),
                (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("({} * {})", a, b)),
                (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("({} - {})", a, b)),
                inner.clone().prop_map(|a| format!("sin({})", a)),
                inner.prop_map(|a| format!("cos({})", a)),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_distance_is_symmetric(a in arb_source(), b in arb_source()) {
            let (ta, tb) = (tree(&a), tree(&b));
            prop_assert_eq!(
                tree_edit_distance(Some(&ta), Some(&tb)),
                tree_edit_distance(Some(&tb), Some(&ta))
            );
        }

        #[test]
        fn prop_distance_to_self_is_zero(a in arb_source()) {
            let ta = tree(&a);
            prop_assert_eq!(tree_edit_distance(Some(&ta), Some(&ta)), 0);
        }
    }
}
