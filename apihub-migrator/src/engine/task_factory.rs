use apihub_common::{
    build::{
        BuildConfig, BuildConfigRef, BuildSource, BuildType, MIGRATION_BUILD_PRIORITY,
        NewBuildTask,
    },
    catalog::{ComparisonKey, PublishedFile, VersionBuildInputs, VersionKey},
    error::{BuildSourceError, Error},
    migration::MigrationRun,
};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use super::{EngineContext, archive::build_archive};

/// Archive and retained config a build task is assembled from.
struct ResolvedSource {
    source: BuildSource,
    /// `None` when the config has to be synthesized from the stored files.
    retained_config: Option<Vec<u8>>,
    files: Vec<PublishedFile>,
}

async fn resolve_source(
    ctx: &EngineContext,
    key: &VersionKey,
    inputs: &VersionBuildInputs,
) -> Result<ResolvedSource, Error> {
    if let Some(published) = &inputs.source {
        if let Some(archive) = &published.archive {
            return Ok(ResolvedSource {
                source: BuildSource::Inline(archive.clone()),
                retained_config: Some(published.config.clone()),
                files: Vec::new(),
            });
        }

        if let Some(object_key) = &published.object_key {
            let store = ctx.object_store.as_ref().ok_or_else(|| {
                Error::ObjectStore(format!(
                    "source archive of {} is off-loaded to {}, but no object store is configured",
                    key, object_key
                ))
            })?;

            let source = if ctx.settings.inline_offloaded_sources {
                BuildSource::Inline(store.get_blob(store.default_bucket(), object_key).await?)
            } else {
                BuildSource::ObjectStore {
                    bucket: store.default_bucket().to_string(),
                    key: object_key.clone(),
                }
            };

            return Ok(ResolvedSource {
                source,
                retained_config: Some(published.config.clone()),
                files: Vec::new(),
            });
        }
    }

    // Nothing retained, rebuild the archive from the published files.
    let files = ctx.db.list_published_files(key).await?;
    if files.is_empty() {
        let err = match inputs.source {
            Some(_) => BuildSourceError::MissingArchive(key.as_source_ref()),
            None => BuildSourceError::NoFiles(key.as_source_ref()),
        };
        return Err(err.into());
    }

    let archive = build_archive(&files, key)?;

    Ok(ResolvedSource {
        source: BuildSource::Inline(archive),
        retained_config: inputs.source.as_ref().map(|s| s.config.clone()),
        files,
    })
}

/// Config for a version whose author config was never retained.
fn synthesize_config(files: &[PublishedFile]) -> BuildConfig {
    BuildConfig {
        files: files
            .iter()
            .map(|f| json!({ "fileId": f.file_id, "path": f.path }))
            .collect(),
        ..Default::default()
    }
}

/// Persists a build task that recomputes `key` for `run`.
/// ---
/// Fails with a `BuildSourceError` naming the lookup that failed.
/// Callers fail the whole stage on error instead of skipping the version.
pub async fn create_build_task(
    ctx: &EngineContext,
    key: &VersionKey,
    run: &MigrationRun,
) -> Result<Uuid, Error> {
    let migration_id = run.id;
    let inputs = ctx
        .db
        .get_version_build_inputs(key)
        .await?
        .ok_or_else(|| BuildSourceError::VersionNotFound(key.as_source_ref()))?;

    let resolved = resolve_source(ctx, key, &inputs).await?;

    let mut config = match &resolved.retained_config {
        Some(raw) => BuildConfig::from_retained(raw, key)?,
        None => synthesize_config(&resolved.files),
    };

    config.package_id = key.package_id.clone();
    config.version = key.version_with_revision();
    config.build_type = BuildType::Build;
    config.previous_version = inputs
        .version
        .previous_version
        .clone()
        .filter(|v| !v.is_empty());
    config.previous_version_package_id = inputs
        .version
        .previous_version_package_id
        .clone()
        .filter(|p| !p.is_empty());
    config.refs = inputs.refs.iter().map(BuildConfigRef::from).collect();
    config.stamp_metadata(inputs.version.metadata.as_ref());
    config.migration_id = Some(migration_id);
    config.skip_validation = run.skip_validation;

    let task = NewBuildTask {
        id: Uuid::new_v4(),
        key: key.clone(),
        build_type: BuildType::Build,
        priority: MIGRATION_BUILD_PRIORITY,
        migration_id: Some(migration_id),
        previous: None,
        source: resolved.source,
        config,
    };

    let task_id = ctx.db.insert_build_task(task).await?;
    debug!(%migration_id, %task_id, version = %key, "Created build task");

    Ok(task_id)
}

/// Persists a changelog task for one comparison pair. No archive is attached.
pub async fn create_comparison_task(
    ctx: &EngineContext,
    pair: &ComparisonKey,
    migration_id: Uuid,
) -> Result<Uuid, Error> {
    let config = BuildConfig {
        package_id: pair.current.package_id.clone(),
        version: pair.current.version_with_revision(),
        build_type: BuildType::Changelog,
        previous_version: Some(pair.previous.version_with_revision()),
        previous_version_package_id: Some(pair.previous.package_id.clone()),
        migration_id: Some(migration_id),
        ..Default::default()
    };

    let task = NewBuildTask {
        id: Uuid::new_v4(),
        key: pair.current.clone(),
        build_type: BuildType::Changelog,
        priority: MIGRATION_BUILD_PRIORITY,
        migration_id: Some(migration_id),
        previous: Some(pair.previous.clone()),
        source: BuildSource::None,
        config,
    };

    let task_id = ctx.db.insert_build_task(task).await?;
    debug!(%migration_id, %task_id, comparison = %pair, "Created changelog task");

    Ok(task_id)
}
