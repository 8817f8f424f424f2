use std::collections::{HashMap, HashSet};

use super::TransactionID;

pub(crate) struct WaitForGraph {
    // key: transaction id, value: the transactions that the key
    // transaction is waiting for
    graph: HashMap<TransactionID, HashSet<TransactionID>>,
}

impl WaitForGraph {
    pub(crate) fn new() -> Self {
        Self {
            graph: HashMap::new(),
        }
    }

    pub(crate) fn add_edge(&mut self, from: TransactionID, to: TransactionID) {
        if from == to {
            return;
        }
        self.graph
            .entry(from)
            .or_insert_with(HashSet::new)
            .insert(to);
    }

    /// The transaction stopped waiting; drop its outgoing edges.
    pub(crate) fn remove_waiter(&mut self, tid: TransactionID) {
        self.graph.remove(&tid);
    }

    /// The transaction terminated; drop its outgoing and incoming edges.
    pub(crate) fn remove_transaction(&mut self, tid: TransactionID) {
        self.graph.remove(&tid);
        for waits_for in self.graph.values_mut() {
            waits_for.remove(&tid);
        }
    }

    /// Find a cycle in the wait-for graph, returning its members.
    pub(crate) fn find_cycle(&self) -> Option<Vec<TransactionID>> {
        let mut visited = HashSet::new();

        for &tid in self.graph.keys() {
            if visited.contains(&tid) {
                continue;
            }

            let mut path = Vec::new();
            let mut on_path = HashSet::new();
            if let Some(cycle) = self.walk(tid, &mut visited, &mut path, &mut on_path) {
                return Some(cycle);
            }
        }

        None
    }

    fn walk(
        &self,
        tid: TransactionID,
        visited: &mut HashSet<TransactionID>,
        path: &mut Vec<TransactionID>,
        on_path: &mut HashSet<TransactionID>,
    ) -> Option<Vec<TransactionID>> {
        visited.insert(tid);
        path.push(tid);
        on_path.insert(tid);

        if let Some(waits_for) = self.graph.get(&tid) {
            for &next in waits_for {
                if on_path.contains(&next) {
                    // the cycle is the path suffix starting at `next`
                    let start = path.iter().position(|&t| t == next).unwrap();
                    return Some(path[start..].to_vec());
                }

                if !visited.contains(&next) {
                    if let Some(cycle) = self.walk(next, visited, path, on_path) {
                        return Some(cycle);
                    }
                }
            }
        }

        path.pop();
        on_path.remove(&tid);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_cycle() {
        let mut graph = WaitForGraph::new();
        graph.add_edge(1, 2);
        graph.add_edge(2, 3);
        assert!(graph.find_cycle().is_none());
    }

    #[test]
    fn test_direct_cycle() {
        let mut graph = WaitForGraph::new();
        graph.add_edge(1, 2);
        graph.add_edge(2, 1);

        let cycle = graph.find_cycle().unwrap();
        assert_eq!(cycle.len(), 2);
        assert!(cycle.contains(&1));
        assert!(cycle.contains(&2));
    }

    #[test]
    fn test_cycle_broken_by_removal() {
        let mut graph = WaitForGraph::new();
        graph.add_edge(1, 2);
        graph.add_edge(2, 3);
        graph.add_edge(3, 1);
        assert!(graph.find_cycle().is_some());

        graph.remove_waiter(3);
        assert!(graph.find_cycle().is_none());
    }

    #[test]
    fn test_remove_transaction_clears_incoming_edges() {
        let mut graph = WaitForGraph::new();
        graph.add_edge(1, 2);
        graph.add_edge(2, 1);
        graph.remove_transaction(1);
        assert!(graph.find_cycle().is_none());
    }
}
