use std::{path::PathBuf, sync::Arc, time::Duration};

use apihub_common::{
    command::{CommandRouter, SupervisorCommand},
    error::Error,
    object_store::{LocalFsObjectStore, ObjectStore},
    state::DatabaseTrait,
};
use apihub_migration::{Migrator, MigratorTrait};
use apihub_migrator::{config::MigratorConfig, engine::EngineContext, supervisor::Supervisor};
use apihub_persistence_pg::db::PostgresStateDb;
use clap::{Parser, Subcommand};
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "apihub-migrator", about = "API catalog operations migration engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Runs the migration supervisor of this instance.
    Serve {
        /// YAML config file, `./migrator.yaml` when present.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let Command::Serve { config } = cli.command;

    let config = match MigratorConfig::load(config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = serve(config).await {
        error!("Migrator exited with an error: {}", e);
        std::process::exit(1);
    }
}

async fn serve(config: MigratorConfig) -> Result<(), Error> {
    let state_db = PostgresStateDb::new(config.database_url()?).await?;

    Migrator::up(state_db.connection(), None)
        .await
        .map_err(|e| Error::Database(format!("Schema migration failed: {}", e)))?;

    let db_arc: Arc<dyn DatabaseTrait> = Arc::new(state_db);

    let object_store: Option<Arc<dyn ObjectStore>> = config.object_store.as_ref().map(|store| {
        Arc::new(LocalFsObjectStore::new(store.root.clone(), store.bucket.clone()))
            as Arc<dyn ObjectStore>
    });

    let instance_id = config.resolve_instance_id();
    info!(%instance_id, "Starting migrator");

    let ctx = EngineContext::new(
        db_arc.clone(),
        object_store,
        config.engine_settings(),
        instance_id,
    );

    let cmd_router = Arc::new(CommandRouter::new(None));
    cmd_router.register_handler::<SupervisorCommand>().await?;

    let mut supervisor = Supervisor::new(ctx, cmd_router.clone()).await?;
    let mut supervisor_handle = tokio::spawn(async move { supervisor.run_main_loop().await });

    tokio::select! {
        ctrl_c_res = tokio::signal::ctrl_c() => {
            if let Err(e) = ctrl_c_res {
                warn!("Error listening for Ctrl+C: {}", e);
            }
            info!("Shutdown requested, releasing migrations");
        }
        supervisor_res = &mut supervisor_handle => {
            return match supervisor_res {
                Ok(res) => res,
                Err(join_error) => Err(Error::Internal(format!("Supervisor task panicked: {}", join_error))),
            };
        }
    }

    let (done_rx, _termination_handle) = spawn_termination_task(cmd_router.clone());

    tokio::select! {
        biased;

        _ = done_rx => info!("Supervisor shutdown sequence completed"),
        _ = tokio::time::sleep(Duration::from_secs(15)) => {
            warn!("Timeout waiting for supervisor shutdown, forcing exit");
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Second Ctrl+C received during shutdown, forcing exit");
        }
    }

    Ok(())
}

fn spawn_termination_task(cmd_router: Arc<CommandRouter>) -> (oneshot::Receiver<()>, JoinHandle<()>) {
    let (done_tx, done_rx) = oneshot::channel::<()>();

    let task_handle = tokio::spawn(async move {
        let (ack_tx, ack_rx) = oneshot::channel::<bool>();

        if let Err(e) = cmd_router
            .dispatch(SupervisorCommand::Terminate { ack_chan: ack_tx })
            .await
        {
            error!("Failed to dispatch Terminate to the supervisor: {}", e);
        } else {
            match tokio::time::timeout(Duration::from_secs(10), ack_rx).await {
                Ok(Ok(true)) => info!("Supervisor released every migration"),
                Ok(Ok(false)) => warn!("Supervisor shut down, but not every coordinator stopped in time"),
                Ok(Err(_)) => warn!("Supervisor ack channel closed before acknowledging"),
                Err(_) => warn!("Timeout waiting for the supervisor's shutdown ack"),
            }
        }

        if done_tx.send(()).is_err() {
            warn!("Main task went away before shutdown completed");
        }
    });

    (done_rx, task_handle)
}
