//! Feeding-chain extraction: maximal non-critical paths merging into the
//! critical chain.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::models::{Chain, ChainKind, Task};
use crate::EPS;

/// Extract feeding chains from the leveled schedule.
///
/// For each critical task with non-critical predecessors, walk backward from
/// each such predecessor along dependency edges, at every step taking the
/// unclaimed non-critical predecessor with the largest early finish (ties to
/// the lower id). A task belongs to at most one feeding chain: reaching a
/// claimed task ends the walk, which keeps chains vertex-disjoint from each
/// other and from the critical chain.
pub fn identify_feeding_chains(
    tasks: &mut FxHashMap<String, Task>,
    critical_chain: &Chain,
    buffer_ratio: f64,
) -> Vec<Chain> {
    let critical_set: FxHashSet<&str> = critical_chain.tasks.iter().map(String::as_str).collect();
    let mut claimed: FxHashSet<String> = FxHashSet::default();
    let mut chains: Vec<Chain> = Vec::new();

    for critical_id in &critical_chain.tasks {
        let mut entry_points: Vec<String> = tasks[critical_id]
            .dependencies
            .iter()
            .filter(|dep| tasks.contains_key(*dep) && !critical_set.contains(dep.as_str()))
            .cloned()
            .collect();
        entry_points.sort();

        for entry in entry_points {
            if claimed.contains(&entry) {
                continue;
            }

            let mut members = vec![entry.clone()];
            claimed.insert(entry.clone());

            let mut current = entry;
            loop {
                let next = best_predecessor(tasks, &current, &critical_set, &claimed);
                match next {
                    Some(pred) => {
                        claimed.insert(pred.clone());
                        members.push(pred.clone());
                        current = pred;
                    }
                    None => break,
                }
            }
            members.reverse();

            let chain_id = format!("feeding_{}", chains.len() + 1);
            for id in &members {
                if let Some(task) = tasks.get_mut(id) {
                    task.chain_id = Some(chain_id.clone());
                }
            }

            let mut chain = Chain::new(chain_id, ChainKind::Feeding, members);
            chain.buffer_ratio = buffer_ratio;
            chain.merges_into = Some(critical_id.clone());
            chains.push(chain);
        }
    }

    chains
}

/// The unclaimed non-critical predecessor with the largest early finish,
/// ties broken by lower id.
fn best_predecessor(
    tasks: &FxHashMap<String, Task>,
    current: &str,
    critical_set: &FxHashSet<&str>,
    claimed: &FxHashSet<String>,
) -> Option<String> {
    let mut best: Option<(&str, f64)> = None;
    for dep in &tasks[current].dependencies {
        if !tasks.contains_key(dep) || critical_set.contains(dep.as_str()) || claimed.contains(dep)
        {
            continue;
        }
        let finish = tasks[dep].early_finish;
        let better = match best {
            None => true,
            Some((best_id, best_finish)) => {
                finish > best_finish + EPS
                    || ((finish - best_finish).abs() <= EPS && dep.as_str() < best_id)
            }
        };
        if better {
            best = Some((dep.as_str(), finish));
        }
    }
    best.map(|(id, _)| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChainKind;

    fn make_task(id: &str, duration: f64, deps: &[&str], early_finish: f64) -> Task {
        let mut task = Task::new(id, id, duration).with_dependencies(deps);
        task.early_finish = early_finish;
        task
    }

    fn task_map(tasks: Vec<Task>) -> FxHashMap<String, Task> {
        tasks.into_iter().map(|t| (t.id.clone(), t)).collect()
    }

    fn critical(tasks: &[&str]) -> Chain {
        Chain::new(
            "critical",
            ChainKind::Critical,
            tasks.iter().map(|t| t.to_string()).collect(),
        )
    }

    #[test]
    fn test_single_feeding_chain() {
        // t4 -> t5 feed critical t3.
        let mut tasks = task_map(vec![
            make_task("t1", 30.0, &[], 30.0),
            make_task("t2", 20.0, &["t1"], 50.0),
            make_task("t3", 30.0, &["t2", "t5"], 80.0),
            make_task("t4", 20.0, &[], 20.0),
            make_task("t5", 10.0, &["t4"], 30.0),
        ]);
        let chain = critical(&["t1", "t2", "t3"]);

        let feeding = identify_feeding_chains(&mut tasks, &chain, 0.5);

        assert_eq!(feeding.len(), 1);
        assert_eq!(feeding[0].id, "feeding_1");
        assert_eq!(feeding[0].tasks, vec!["t4", "t5"]);
        assert_eq!(feeding[0].merges_into.as_deref(), Some("t3"));
        assert!((feeding[0].buffer_ratio - 0.5).abs() < 1e-9);
        assert_eq!(tasks["t4"].chain_id.as_deref(), Some("feeding_1"));
    }

    #[test]
    fn test_walk_takes_largest_early_finish() {
        // f3 has two predecessors; f2 finishes later than f1.
        let mut tasks = task_map(vec![
            make_task("c1", 40.0, &["f3"], 40.0),
            make_task("f1", 5.0, &[], 5.0),
            make_task("f2", 12.0, &[], 12.0),
            make_task("f3", 3.0, &["f1", "f2"], 15.0),
        ]);
        let chain = critical(&["c1"]);

        let feeding = identify_feeding_chains(&mut tasks, &chain, 0.5);

        assert_eq!(feeding.len(), 1);
        assert_eq!(feeding[0].tasks, vec!["f2", "f3"]);
        // f1 stays unchained.
        assert_eq!(tasks["f1"].chain_id, None);
    }

    #[test]
    fn test_chains_are_vertex_disjoint() {
        // Both c1 and c2 receive feeds that trace back to the shared f0;
        // only the first walk may claim it.
        let mut tasks = task_map(vec![
            make_task("c1", 10.0, &["f1"], 10.0),
            make_task("c2", 10.0, &["c1", "f2"], 20.0),
            make_task("f0", 4.0, &[], 4.0),
            make_task("f1", 3.0, &["f0"], 7.0),
            make_task("f2", 3.0, &["f0"], 7.0),
        ]);
        let chain = critical(&["c1", "c2"]);

        let feeding = identify_feeding_chains(&mut tasks, &chain, 0.5);

        assert_eq!(feeding.len(), 2);
        assert_eq!(feeding[0].tasks, vec!["f0", "f1"]);
        assert_eq!(feeding[1].tasks, vec!["f2"]);

        let mut seen: FxHashSet<&str> = FxHashSet::default();
        for chain in &feeding {
            for id in &chain.tasks {
                assert!(seen.insert(id.as_str()), "task {id} in two chains");
            }
        }
    }

    #[test]
    fn test_no_feeding_chains_for_linear_project() {
        let mut tasks = task_map(vec![
            make_task("t1", 30.0, &[], 30.0),
            make_task("t2", 20.0, &["t1"], 50.0),
        ]);
        let chain = critical(&["t1", "t2"]);

        let feeding = identify_feeding_chains(&mut tasks, &chain, 0.5);
        assert!(feeding.is_empty());
    }
}
