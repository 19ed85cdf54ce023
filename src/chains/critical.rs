//! Critical-chain identification over the leveled schedule.

use rustc_hash::FxHashMap;

use crate::models::{Chain, ChainKind, Task};

/// The chain id reserved for the critical chain.
pub const CRITICAL_CHAIN_ID: &str = "critical";

/// Derive the critical chain from a leveled schedule.
///
/// The leveler records, for every task, the task whose finish determined its
/// start (a dependency or the holder of a contended resource). Walking those
/// drivers backward from the terminal task yields the resource-feasible
/// longest path. Member tasks are marked critical.
pub fn identify_critical_chain(
    tasks: &mut FxHashMap<String, Task>,
    drivers: &FxHashMap<String, Option<String>>,
) -> Chain {
    let mut terminal: Option<(&str, chrono::NaiveDate)> = None;
    for (id, task) in tasks.iter() {
        let Some(end) = task.end_date else { continue };
        let better = match terminal {
            None => true,
            Some((best_id, best_end)) => {
                end > best_end || (end == best_end && id.as_str() < best_id)
            }
        };
        if better {
            terminal = Some((id.as_str(), end));
        }
    }

    let mut members: Vec<String> = Vec::new();
    let mut current = terminal.map(|(id, _)| id.to_string());
    while let Some(id) = current {
        current = drivers.get(&id).cloned().flatten();
        members.push(id);
    }
    members.reverse();

    let mut chain = Chain::new(CRITICAL_CHAIN_ID, ChainKind::Critical, members);
    chain.buffer_ratio = 1.0;

    for id in &chain.tasks {
        if let Some(task) = tasks.get_mut(id) {
            task.is_critical = true;
            task.chain_id = Some(CRITICAL_CHAIN_ID.to_string());
        }
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn d(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn placed_task(id: &str, start: NaiveDate, end: NaiveDate) -> Task {
        let mut task = Task::new(id, id, 1.0);
        task.start_date = Some(start);
        task.end_date = Some(end);
        task
    }

    fn driver_map(pairs: &[(&str, Option<&str>)]) -> FxHashMap<String, Option<String>> {
        pairs
            .iter()
            .map(|(id, drv)| (id.to_string(), drv.map(str::to_string)))
            .collect()
    }

    #[test]
    fn test_walks_drivers_from_terminal() {
        let mut tasks: FxHashMap<String, Task> = [
            placed_task("t1", d(2025, 4, 1), d(2025, 5, 1)),
            placed_task("t2", d(2025, 5, 1), d(2025, 5, 21)),
            placed_task("t3", d(2025, 5, 21), d(2025, 6, 20)),
        ]
        .into_iter()
        .map(|t| (t.id.clone(), t))
        .collect();
        let drivers = driver_map(&[("t1", None), ("t2", Some("t1")), ("t3", Some("t2"))]);

        let chain = identify_critical_chain(&mut tasks, &drivers);

        assert_eq!(chain.tasks, vec!["t1", "t2", "t3"]);
        assert!(tasks["t1"].is_critical);
        assert_eq!(tasks["t3"].chain_id.as_deref(), Some("critical"));
    }

    #[test]
    fn test_resource_link_joins_chain() {
        // t4 is delayed behind t1 on a shared resource and then runs past
        // t2: the chain follows the resource handoff t1 -> t4.
        let mut tasks: FxHashMap<String, Task> = [
            placed_task("t1", d(2025, 4, 1), d(2025, 5, 1)),
            placed_task("t2", d(2025, 5, 1), d(2025, 5, 11)),
            placed_task("t4", d(2025, 5, 1), d(2025, 6, 1)),
        ]
        .into_iter()
        .map(|t| (t.id.clone(), t))
        .collect();
        let drivers = driver_map(&[("t1", None), ("t2", Some("t1")), ("t4", Some("t1"))]);

        let chain = identify_critical_chain(&mut tasks, &drivers);

        assert_eq!(chain.tasks, vec!["t1", "t4"]);
        assert!(!tasks["t2"].is_critical);
    }

    #[test]
    fn test_terminal_tie_prefers_lower_id() {
        let mut tasks: FxHashMap<String, Task> = [
            placed_task("a", d(2025, 4, 1), d(2025, 4, 11)),
            placed_task("b", d(2025, 4, 1), d(2025, 4, 11)),
        ]
        .into_iter()
        .map(|t| (t.id.clone(), t))
        .collect();
        let drivers = driver_map(&[("a", None), ("b", None)]);

        let chain = identify_critical_chain(&mut tasks, &drivers);
        assert_eq!(chain.tasks, vec!["a"]);
    }
}
