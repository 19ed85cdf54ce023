//! Plain-text schedule and execution reports.
//!
//! The wording here is presentation, not contract: external collaborators
//! read the field values, not the punctuation.

use std::fmt::Write;

use crate::models::{BufferKind, ChainKind, Task, TaskStatus};

use super::core::Scheduler;

impl Scheduler {
    /// Human-readable snapshot of the baseline schedule.
    pub fn schedule_report(&self) -> String {
        let mut out = String::new();

        writeln!(out, "CCPM Project Schedule Report").unwrap();
        writeln!(out, "============================").unwrap();
        writeln!(out, "Project Start Date: {}", self.start_date).unwrap();
        if let Some(end) = self.project_end {
            writeln!(out, "Projected End Date: {end}").unwrap();
            writeln!(
                out,
                "Project Duration: {} working days",
                self.calendar.workdays_between(self.start_date, end)
            )
            .unwrap();
        }
        if let Some(pb) = self.buffers.values().find(|b| b.kind == BufferKind::Project) {
            writeln!(out, "Project Buffer: {} days", pb.size_days).unwrap();
        }

        writeln!(out, "\nCritical Chain Tasks:").unwrap();
        writeln!(out, "---------------------").unwrap();
        if let Some(critical) = self.chains().iter().find(|c| c.kind == ChainKind::Critical) {
            for id in &critical.tasks {
                if let Ok(task) = self.task(id) {
                    writeln!(
                        out,
                        "{}: {} - {} days, {} -> {}",
                        task.id,
                        task.name,
                        task.planned_duration,
                        format_date(task.start_date),
                        format_date(task.end_date),
                    )
                    .unwrap();
                }
            }
        }

        writeln!(out, "\nFeeding Chains:").unwrap();
        writeln!(out, "---------------").unwrap();
        for chain in self.chains().iter().filter(|c| c.kind == ChainKind::Feeding) {
            writeln!(out, "{}:", chain.id).unwrap();
            writeln!(
                out,
                "  Connects to Critical Task: {}",
                chain.merges_into.as_deref().unwrap_or("-")
            )
            .unwrap();
            if let Some(buffer) = chain.buffer.as_ref().and_then(|id| self.buffer(id)) {
                writeln!(out, "  Feeding Buffer Size: {} days", buffer.size_days).unwrap();
            }
            writeln!(out, "  Tasks: {}", chain.tasks.join(" -> ")).unwrap();
        }

        writeln!(out, "\nComplete Task Schedule:").unwrap();
        writeln!(out, "-----------------------").unwrap();
        for task in self.tasks_by_start() {
            let resources: Vec<String> = task
                .resources
                .iter()
                .map(|r| format!("{} ({})", r.name, r.units))
                .collect();
            writeln!(out, "{}: {}", task.id, task.name).unwrap();
            writeln!(
                out,
                "  Start: {}, End: {}",
                format_date(task.start_date),
                format_date(task.end_date)
            )
            .unwrap();
            writeln!(
                out,
                "  Duration: {} days, Resources: {}",
                task.planned_duration,
                if resources.is_empty() {
                    "-".to_string()
                } else {
                    resources.join(", ")
                }
            )
            .unwrap();
            writeln!(out, "  Chain: {}", task.chain_id.as_deref().unwrap_or("-")).unwrap();
        }

        writeln!(out, "\nBuffer Information:").unwrap();
        writeln!(out, "-------------------").unwrap();
        for buffer in self.buffers() {
            writeln!(
                out,
                "{} ({}): {} days, {} -> {}, protects {}",
                buffer.id,
                kind_label(buffer.kind),
                buffer.size_days,
                format_date(buffer.start_date),
                format_date(buffer.end_date),
                buffer.attaches_to,
            )
            .unwrap();
        }

        out
    }

    /// Execution status snapshot: buffer health, work in flight, completed
    /// and upcoming tasks.
    pub fn execution_report(&self) -> String {
        let report_date = self.last_status_date.unwrap_or(self.start_date);
        let mut out = String::new();

        writeln!(out, "CCPM Project Execution Report").unwrap();
        writeln!(out, "=============================").unwrap();
        writeln!(out, "Report Date: {report_date}").unwrap();
        writeln!(out, "Project Start Date: {}", self.start_date).unwrap();
        writeln!(
            out,
            "Project Completion: {:.1}%",
            self.project_completion_pct()
        )
        .unwrap();

        writeln!(out, "\nBuffer Status:").unwrap();
        writeln!(out, "--------------").unwrap();
        for buffer in self.buffers() {
            let consumed = buffer.original_size - buffer.remaining;
            let zone = self
                .chain_zone(&buffer.source_chain)
                .map(|z| z.to_string())
                .unwrap_or_else(|| "-".to_string());
            writeln!(out, "{} ({}):", buffer.id, kind_label(buffer.kind)).unwrap();
            writeln!(out, "  Size: {} days", buffer.original_size).unwrap();
            writeln!(
                out,
                "  Consumed: {:.1} days ({:.1}%)",
                consumed,
                buffer.consumption_pct()
            )
            .unwrap();
            writeln!(out, "  Remaining: {:.1} days", buffer.remaining).unwrap();
            writeln!(out, "  Zone: {zone}").unwrap();
        }

        let in_progress: Vec<&Task> = self
            .tasks()
            .into_iter()
            .filter(|t| t.status == TaskStatus::InProgress)
            .collect();
        writeln!(out, "\nTasks In Progress:").unwrap();
        writeln!(out, "------------------").unwrap();
        for task in in_progress {
            writeln!(out, "{}: {}", task.id, task.name).unwrap();
            writeln!(out, "  Remaining: {} days", task.remaining_duration).unwrap();
            writeln!(
                out,
                "  Started: {}, Expected End: {}",
                format_date(task.actual_start_date),
                format_date(task.projected_end)
            )
            .unwrap();
        }

        let completed: Vec<&Task> = self
            .tasks()
            .into_iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .collect();
        writeln!(out, "\nCompleted Tasks:").unwrap();
        writeln!(out, "----------------").unwrap();
        for task in completed {
            writeln!(out, "{}: {}", task.id, task.name).unwrap();
            writeln!(
                out,
                "  Finished: {}, Schedule Variance: {:+.1} workdays",
                format_date(task.actual_end_date),
                self.schedule_variance(task)
            )
            .unwrap();
        }

        let mut upcoming: Vec<&Task> = self
            .tasks()
            .into_iter()
            .filter(|t| t.status == TaskStatus::Planned)
            .collect();
        upcoming.sort_by(|a, b| {
            a.effective_start()
                .cmp(&b.effective_start())
                .then(a.id.cmp(&b.id))
        });
        writeln!(out, "\nUpcoming Tasks:").unwrap();
        writeln!(out, "---------------").unwrap();
        for task in upcoming.into_iter().take(5) {
            writeln!(out, "{}: {}", task.id, task.name).unwrap();
            writeln!(
                out,
                "  Start: {}, Duration: {} days",
                format_date(task.effective_start()),
                task.planned_duration
            )
            .unwrap();
        }

        out
    }

    /// Tasks ordered by ascending start date, ties by id.
    fn tasks_by_start(&self) -> Vec<&Task> {
        let mut tasks = self.tasks();
        tasks.sort_by(|a, b| a.start_date.cmp(&b.start_date).then(a.id.cmp(&b.id)));
        tasks
    }

    /// Workdays a completed task finished late (positive) or early
    /// (negative) against its baseline end.
    fn schedule_variance(&self, task: &Task) -> f64 {
        let (Some(actual), Some(baseline)) = (task.actual_end_date, task.end_date) else {
            return 0.0;
        };
        if actual >= baseline {
            self.calendar.workdays_between(baseline, actual)
        } else {
            -self.calendar.workdays_between(actual, baseline)
        }
    }
}

fn kind_label(kind: BufferKind) -> &'static str {
    match kind {
        BufferKind::Project => "project",
        BufferKind::Feeding => "feeding",
    }
}

fn format_date(date: Option<chrono::NaiveDate>) -> String {
    date.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use crate::buffer_strategy::BufferStrategy;
    use crate::models::Task;
    use crate::resource::Resource;
    use crate::scheduler::Scheduler;

    fn d(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn built_project() -> Scheduler {
        let mut scheduler = Scheduler::new(d(2025, 4, 1), BufferStrategy::CutAndPaste);
        scheduler
            .set_resources(vec![Resource::new("Red", 1.0), Resource::new("Green", 1.0)])
            .unwrap();
        scheduler
            .add_task(
                Task::new("T1", "Design", 30.0)
                    .with_safe_duration(45.0)
                    .with_resource("Red", 1.0),
            )
            .unwrap();
        scheduler
            .add_task(
                Task::new("T2", "Build", 20.0)
                    .with_safe_duration(30.0)
                    .with_dependencies(&["T1"])
                    .with_resource("Green", 1.0),
            )
            .unwrap();
        scheduler.schedule().unwrap();
        scheduler
    }

    #[test]
    fn test_schedule_report_fields() {
        let scheduler = built_project();
        let report = scheduler.schedule_report();

        assert!(report.contains("Project Start Date: 2025-04-01"));
        // 50 chain days + 25 buffer days.
        assert!(report.contains("Projected End Date: 2025-06-15"));
        assert!(report.contains("Project Buffer: 25 days"));
        assert!(report.contains("T1: Design"));
        assert!(report.contains("Critical Chain Tasks:"));
        assert!(report.contains("Buffer Information:"));
    }

    #[test]
    fn test_schedule_report_orders_by_start_date() {
        let scheduler = built_project();
        let report = scheduler.schedule_report();
        let schedule_section = report.split("Complete Task Schedule:").nth(1).unwrap();
        let t1_pos = schedule_section.find("T1: Design").unwrap();
        let t2_pos = schedule_section.find("T2: Build").unwrap();
        assert!(t1_pos < t2_pos);
    }

    #[test]
    fn test_execution_report_fields() {
        let mut scheduler = built_project();
        scheduler
            .update_task_progress("T1", 0.0, d(2025, 5, 6))
            .unwrap();
        scheduler
            .update_task_progress("T2", 15.0, d(2025, 5, 6))
            .unwrap();
        scheduler
            .recalculate_network_from_progress(d(2025, 5, 6))
            .unwrap();

        let report = scheduler.execution_report();
        assert!(report.contains("Report Date: 2025-05-06"));
        assert!(report.contains("Buffer Status:"));
        assert!(report.contains("Tasks In Progress:"));
        assert!(report.contains("T2: Build"));
        assert!(report.contains("Completed Tasks:"));
        assert!(report.contains("T1: Design"));
        // T1 finished five workdays late.
        assert!(report.contains("Schedule Variance: +5.0 workdays"));
    }
}
