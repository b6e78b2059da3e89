//! ABOUTME: Dependency graph analysis over arena-indexed nodes
//! ABOUTME: Iterative Tarjan SCCs and longest-path level assignment

use std::collections::VecDeque;

/// Strongly connected components of a directed graph given as adjacency
/// lists (`adj[u]` lists the targets of `u`'s outgoing edges).
///
/// Iterative Tarjan; safe on graphs deep enough to overflow a recursive
/// walk. Singleton components without a self-loop are trivial.
pub fn strongly_connected_components(adj: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let n = adj.len();
    const UNVISITED: usize = usize::MAX;

    let mut index = vec![UNVISITED; n];
    let mut low = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut next_index = 0usize;
    let mut components: Vec<Vec<usize>> = Vec::new();

    for start in 0..n {
        if index[start] != UNVISITED {
            continue;
        }
        let mut work: Vec<(usize, usize)> = vec![(start, 0)];
        while let Some((v, child)) = work.pop() {
            if child == 0 {
                index[v] = next_index;
                low[v] = next_index;
                next_index += 1;
                stack.push(v);
                on_stack[v] = true;
            }

            let mut descended = false;
            let mut i = child;
            while i < adj[v].len() {
                let w = adj[v][i];
                if index[w] == UNVISITED {
                    work.push((v, i + 1));
                    work.push((w, 0));
                    descended = true;
                    break;
                }
                if on_stack[w] {
                    low[v] = low[v].min(index[w]);
                }
                i += 1;
            }
            if descended {
                continue;
            }

            if low[v] == index[v] {
                let mut component = Vec::new();
                loop {
                    let w = stack.pop().expect("tarjan stack underflow");
                    on_stack[w] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                component.sort_unstable();
                components.push(component);
            }
            if let Some(&(parent, _)) = work.last() {
                low[parent] = low[parent].min(low[v]);
            }
        }
    }

    components
}

/// Whether a node participates in a cycle: a component of size > 1, or a
/// direct self-loop.
pub fn is_cyclic(adj: &[Vec<usize>], component: &[usize]) -> bool {
    component.len() > 1 || adj[component[0]].contains(&component[0])
}

/// Longest-path levels over the condensation of the graph.
///
/// Nodes inside the same component share a level (the recursion supernode
/// collapse); a component's level is one past the deepest of its incoming
/// edges. Entry components sit at level 0.
pub fn assign_levels(adj: &[Vec<usize>], components: &[Vec<usize>]) -> Vec<usize> {
    let n = adj.len();
    let mut component_of = vec![0usize; n];
    for (ci, component) in components.iter().enumerate() {
        for &v in component {
            component_of[v] = ci;
        }
    }

    let c = components.len();
    let mut cadj: Vec<Vec<usize>> = vec![Vec::new(); c];
    for u in 0..n {
        for &w in &adj[u] {
            let (cu, cw) = (component_of[u], component_of[w]);
            if cu != cw {
                cadj[cu].push(cw);
            }
        }
    }
    for list in &mut cadj {
        list.sort_unstable();
        list.dedup();
    }

    let mut in_degree = vec![0usize; c];
    for list in &cadj {
        for &w in list {
            in_degree[w] += 1;
        }
    }

    let mut level = vec![0usize; c];
    let mut queue: VecDeque<usize> = (0..c).filter(|&i| in_degree[i] == 0).collect();
    while let Some(u) = queue.pop_front() {
        for &w in &cadj[u] {
            level[w] = level[w].max(level[u] + 1);
            in_degree[w] -= 1;
            if in_degree[w] == 0 {
                queue.push_back(w);
            }
        }
    }

    (0..n).map(|v| level[component_of[v]]).collect()
}

/// Kahn topological order restricted to a subset of nodes, deterministic by
/// the caller-provided ordering of `subset`. Edges outside the subset are
/// ignored. Returns `None` when the subset contains a cycle.
pub fn topo_order_subset(adj: &[Vec<usize>], subset: &[usize]) -> Option<Vec<usize>> {
    let members: std::collections::HashSet<usize> = subset.iter().copied().collect();
    let mut in_degree: std::collections::HashMap<usize, usize> =
        subset.iter().map(|&v| (v, 0)).collect();
    for &u in subset {
        for &w in &adj[u] {
            if members.contains(&w) {
                *in_degree.get_mut(&w).expect("subset member") += 1;
            }
        }
    }

    let mut order = Vec::with_capacity(subset.len());
    let mut ready: VecDeque<usize> = subset
        .iter()
        .copied()
        .filter(|v| in_degree[v] == 0)
        .collect();
    while let Some(u) = ready.pop_front() {
        order.push(u);
        for &w in &adj[u] {
            if let Some(degree) = in_degree.get_mut(&w) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push_back(w);
                }
            }
        }
    }

    (order.len() == subset.len()).then_some(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sccs_on_dag_are_singletons() {
        // 0 → 1 → 2
        let adj = vec![vec![1], vec![2], vec![]];
        let comps = strongly_connected_components(&adj);
        assert_eq!(comps.len(), 3);
        assert!(comps.iter().all(|c| c.len() == 1));
    }

    #[test]
    fn test_scc_detects_cycle() {
        // 0 → 1 → 2 → 0, 3 standalone
        let adj = vec![vec![1], vec![2], vec![0], vec![]];
        let comps = strongly_connected_components(&adj);
        let cycle = comps.iter().find(|c| c.len() == 3).unwrap();
        assert_eq!(cycle, &vec![0, 1, 2]);
        assert!(is_cyclic(&adj, cycle));
    }

    #[test]
    fn test_self_loop_is_cyclic() {
        let adj = vec![vec![0]];
        let comps = strongly_connected_components(&adj);
        assert_eq!(comps.len(), 1);
        assert!(is_cyclic(&adj, &comps[0]));
    }

    #[test]
    fn test_levels_diamond() {
        //   0
        //  / \
        // 1   2
        //  \ /
        //   3
        let adj = vec![vec![1, 2], vec![3], vec![3], vec![]];
        let comps = strongly_connected_components(&adj);
        let levels = assign_levels(&adj, &comps);
        assert_eq!(levels, vec![0, 1, 1, 2]);
    }

    #[test]
    fn test_levels_longest_path_wins() {
        // 0 → 1 → 2, and 0 → 2 directly: 2 sits at level 2, not 1.
        let adj = vec![vec![1, 2], vec![2], vec![]];
        let comps = strongly_connected_components(&adj);
        let levels = assign_levels(&adj, &comps);
        assert_eq!(levels, vec![0, 1, 2]);
    }

    #[test]
    fn test_levels_collapse_cycle_to_supernode() {
        // 0 → 1 ⇄ 2 → 3: the 1/2 component shares one level.
        let adj = vec![vec![1], vec![2], vec![1, 3], vec![]];
        let comps = strongly_connected_components(&adj);
        let levels = assign_levels(&adj, &comps);
        assert_eq!(levels[0], 0);
        assert_eq!(levels[1], levels[2]);
        assert_eq!(levels[3], levels[1] + 1);
    }

    #[test]
    fn test_topo_order_subset() {
        let adj = vec![vec![1], vec![2], vec![], vec![]];
        let order = topo_order_subset(&adj, &[2, 0, 1]).unwrap();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_topo_order_subset_detects_cycle() {
        let adj = vec![vec![1], vec![0]];
        assert!(topo_order_subset(&adj, &[0, 1]).is_none());
    }
}
