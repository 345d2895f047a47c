use apihub_common::{
    error::Error,
    event::EventType,
    migration::{MigrationRun, PostCheckResult},
};
use serde_json::json;
use tracing::{info, warn};

use super::EngineContext;

/// Scans the run's scope for versions and comparisons left without a
/// completed task, and records them on the run when there are any.
/// ---
/// Residuals never fail the run.
pub async fn run_post_check(
    ctx: &EngineContext,
    run: &MigrationRun,
) -> Result<PostCheckResult, Error> {
    // Changelog-only runs never rebuild versions.
    let versions = if run.changelog_only {
        Vec::new()
    } else {
        ctx.db.find_unmigrated_versions(run.id, &run.scope).await?
    };

    let comparisons = ctx
        .db
        .find_unmigrated_comparisons(run.id, &run.scope, run.changelog_only)
        .await?;

    let result = PostCheckResult {
        versions,
        comparisons,
    };

    if result.is_empty() {
        info!(migration_id = %run.id, "Post-check found no residuals");
        return Ok(result);
    }

    warn!(
        migration_id = %run.id,
        "Post-check found {} unmigrated versions and {} unmigrated comparisons",
        result.versions.len(),
        result.comparisons.len()
    );

    if !ctx
        .db
        .record_post_check_result(run.id, &ctx.instance_id, &result)
        .await?
    {
        return Err(Error::OwnershipLost(run.id));
    }

    ctx.db
        .log_migration_event(
            Some(run.id),
            EventType::PostCheckResiduals,
            format!(
                "{} versions and {} comparisons were not migrated",
                result.versions.len(),
                result.comparisons.len()
            ),
            Some(json!({
                "versions": result.versions.len(),
                "comparisons": result.comparisons.len(),
            })),
        )
        .await?;

    Ok(result)
}
