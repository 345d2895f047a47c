use std::fmt;

use apihub_common::{
    build::{BuildTask, TaskStatusCount},
    error::Error,
    event::EventLogRecord,
    migration::{MigrationRun, MigrationStatus},
    state::DatabaseTrait,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

pub const REPORT_FAILED_TASK_LIMIT: u64 = 50;
pub const REPORT_EVENT_LIMIT: u64 = 20;

/// Operator-facing summary of one run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub run: MigrationRun,
    pub elapsed_secs: i64,
    pub task_counts: Vec<TaskStatusCount>,
    pub failed_tasks: Vec<BuildTask>,
    pub recent_events: Vec<EventLogRecord>,
}

pub async fn build_report(
    db: &dyn DatabaseTrait,
    migration_id: Uuid,
    now: DateTime<Utc>,
) -> Result<MigrationReport, Error> {
    let run = db
        .get_migration_run(migration_id)
        .await?
        .ok_or_else(|| Error::NotFound {
            resource_type: "MigrationRun".into(),
            resource_id: migration_id.to_string(),
        })?;

    let task_counts = db.count_tasks_by_status(migration_id).await?;
    let failed_tasks = db
        .list_failed_tasks(migration_id, REPORT_FAILED_TASK_LIMIT)
        .await?;
    let recent_events = db
        .list_migration_events(migration_id, REPORT_EVENT_LIMIT)
        .await?;

    let end = run.finished_at.unwrap_or(now);
    let elapsed_secs = (end - run.started_at).num_seconds().max(0);

    Ok(MigrationReport {
        run,
        elapsed_secs,
        task_counts,
        failed_tasks,
        recent_events,
    })
}

fn format_elapsed(secs: i64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else {
        format!("{}m {:02}s", m, s)
    }
}

fn format_filter(values: &[String]) -> String {
    if values.is_empty() {
        "all".to_string()
    } else {
        values.join(", ")
    }
}

impl MigrationReport {
    pub fn is_finished(&self) -> bool {
        self.run.status.is_terminal()
    }

    /// Plain-text rendering for the control surface.
    pub fn render_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let run = &self.run;

        writeln!(f, "Migration #{} ({})", run.sequence_number, run.id)?;
        writeln!(f, "Status:   {} (stage {})", run.status, run.stage)?;
        writeln!(
            f,
            "Scope:    packages [{}]; versions [{}]",
            format_filter(&run.scope.package_ids),
            format_filter(&run.scope.versions)
        )?;
        writeln!(
            f,
            "Mode:     {}{}",
            if run.changelog_only {
                "changelog only"
            } else {
                "full rebuild"
            },
            if run.skip_validation {
                ", validation skipped"
            } else {
                ""
            }
        )?;
        writeln!(f, "Owner:    {}", run.instance_id)?;
        writeln!(f, "Started:  {}", run.started_at.to_rfc3339())?;
        if let Some(finished_at) = run.finished_at {
            writeln!(f, "Finished: {}", finished_at.to_rfc3339())?;
        }
        writeln!(f, "Elapsed:  {}", format_elapsed(self.elapsed_secs))?;

        if let Some(details) = &run.error_details {
            let label = match run.status {
                MigrationStatus::Cancelled => "Reason",
                _ => "Error",
            };
            writeln!(f, "{}:    {}", label, details)?;
        }

        if !self.task_counts.is_empty() {
            writeln!(f, "Tasks:")?;
            for count in &self.task_counts {
                writeln!(
                    f,
                    "  {:<10} {:<9} {}",
                    count.build_type.to_string(),
                    count.status.to_string(),
                    count.count
                )?;
            }
        }

        match &run.post_check_result {
            Some(residuals) if !residuals.is_empty() => {
                writeln!(
                    f,
                    "Post-check: {} versions and {} comparisons not migrated",
                    residuals.versions.len(),
                    residuals.comparisons.len()
                )?;
                for version in &residuals.versions {
                    writeln!(f, "  version    {}", version)?;
                }
                for comparison in &residuals.comparisons {
                    writeln!(f, "  comparison {}", comparison)?;
                }
            }
            _ if run.status == MigrationStatus::Complete => writeln!(f, "Post-check: clean")?,
            _ => {}
        }

        if !self.failed_tasks.is_empty() {
            writeln!(f, "Failed tasks:")?;
            for task in &self.failed_tasks {
                writeln!(
                    f,
                    "  {} ({}): {}",
                    task.key,
                    task.build_type,
                    task.details.as_deref().unwrap_or("-")
                )?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use apihub_common::{
        build::{BuildStatus, BuildType},
        migration::{MigrationRequest, PostCheckResult},
        state::MigrationDbTrait,
    };

    use super::*;
    use crate::{
        engine::task_factory::create_comparison_task,
        testing::{MemoryStateDb, create_run, key, pair, scoped, test_context},
    };

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(59), "0m 59s");
        assert_eq!(format_elapsed(3725), "1h 02m 05s");
    }

    #[tokio::test]
    async fn test_report_of_finished_run() {
        let db = MemoryStateDb::new();
        let run = create_run(&db, &scoped(&["a"]), "node-1").await;
        let ctx = test_context(&db, "node-1");

        create_comparison_task(&ctx, &pair(key("a", "2", 1), key("a", "1", 1)), run.id)
            .await
            .unwrap();
        db.finish_outstanding(&|_| BuildStatus::Error).await;

        let residuals = PostCheckResult {
            versions: vec![key("a", "1", 1)],
            comparisons: Vec::new(),
        };
        assert!(db
            .record_post_check_result(run.id, "node-1", &residuals)
            .await
            .unwrap());
        assert!(db
            .finalize_migration_run(run.id, "node-1", MigrationStatus::Complete, None)
            .await
            .unwrap());

        let report = build_report(&db, run.id, Utc::now()).await.unwrap();
        assert!(report.is_finished());
        assert_eq!(
            report.task_counts,
            vec![TaskStatusCount {
                build_type: BuildType::Changelog,
                status: BuildStatus::Error,
                count: 1,
            }]
        );
        assert_eq!(report.failed_tasks.len(), 1);
        assert!(!report.recent_events.is_empty());

        let text = report.render_text();
        assert!(text.contains("Status:   COMPLETE (stage starting)"));
        assert!(text.contains("Scope:    packages [a]; versions [all]"));
        assert!(text.contains("Mode:     full rebuild"));
        assert!(text.contains("Post-check: 1 versions and 0 comparisons not migrated"));
        assert!(text.contains("  version    a@1@1"));
        assert!(text.contains("  a@2@1 (changelog): forced failure"));
    }

    #[tokio::test]
    async fn test_clean_run_and_unknown_id() {
        let db = MemoryStateDb::new();
        let run = create_run(&db, &MigrationRequest::default(), "node-1").await;

        let report = build_report(&db, run.id, Utc::now()).await.unwrap();
        assert!(!report.is_finished());
        assert!(!report.render_text().contains("Post-check"));

        db.finalize_migration_run(run.id, "node-1", MigrationStatus::Complete, None)
            .await
            .unwrap();
        let report = build_report(&db, run.id, Utc::now()).await.unwrap();
        assert!(report.render_text().contains("Post-check: clean"));

        let err = build_report(&db, Uuid::new_v4(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
