//! CLI command handlers.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use silo_core::{ResourceId, ResourceRecord};
use silo_events::{InMemoryRecordStore, RecordStore, TracingRecordStore};
use silo_reconciler::remote::memory::InMemoryControlPlane;
use silo_reconciler::{
    ConnectorRegistry, Controller, Gateway, MemoryClientFactory, Profile, ReconcileError,
    Reconciler, register_all,
};

use crate::cli::Commands;
use crate::config::SiloConfig;
use crate::manifest;

/// Execute a CLI command.
pub async fn execute_command(command: Commands) -> Result<()> {
    match command {
        Commands::Run { config, manifest } => cmd_run(&config, &manifest).await,
        Commands::Plan {
            config,
            manifest,
            json,
        } => cmd_plan(&config, &manifest, json).await,
        Commands::Check { config } => cmd_check(&config),
    }
}

/// Wire every connector to one control plane.
pub fn build_registry(config: &SiloConfig, plane: Arc<InMemoryControlPlane>) -> ConnectorRegistry {
    let gateway = Arc::new(Gateway::new(
        Arc::new(config.resolver()),
        Arc::new(MemoryClientFactory::new(plane)),
    ));
    register_all(ConnectorRegistry::builder(), &gateway, config.kind_settings()).build()
}

/// Put manifest records into a fresh store.
pub async fn load_store(records: Vec<ResourceRecord>) -> Result<Arc<InMemoryRecordStore>> {
    let store = InMemoryRecordStore::new_arc();
    fill(&store, records).await?;
    Ok(store)
}

async fn fill(store: &InMemoryRecordStore, records: Vec<ResourceRecord>) -> Result<()> {
    for record in records {
        let id = record.id.clone();
        store
            .apply(record)
            .await
            .with_context(|| format!("Failed to load {id}"))?;
    }
    Ok(())
}

fn load_inputs(config: &Path, manifest: &Path) -> Result<(SiloConfig, Vec<ResourceRecord>)> {
    let config = SiloConfig::load(config)
        .with_context(|| format!("Failed to load configuration from {}", config.display()))?;
    let records = manifest::load(manifest)
        .with_context(|| format!("Failed to load manifest from {}", manifest.display()))?;
    Ok((config, records))
}

async fn cmd_run(config: &Path, manifest: &Path) -> Result<()> {
    let (config, records) = load_inputs(config, manifest)?;
    info!(resources = records.len(), "manifest loaded");

    let store = Arc::new(TracingRecordStore::new(InMemoryRecordStore::new()));
    fill(store.inner(), records).await?;
    let plane = InMemoryControlPlane::new_arc();
    let registry = Arc::new(build_registry(&config, plane));
    let reconciler = Reconciler::new(store.clone(), registry);
    let controller = Controller::new(reconciler, config.controller_settings());

    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let cancel = cancel.clone();
        async move { controller.run(cancel).await }
    });

    info!("silo is running. Press Ctrl+C to stop.");
    wait_for_shutdown().await;
    cancel.cancel();
    handle.await.context("Controller task failed")?;

    let summary = summarize(store.as_ref()).await?;
    info!(
        total = summary.total,
        ready = summary.ready,
        failing = summary.failing,
        "silo stopped"
    );
    Ok(())
}

async fn cmd_plan(config: &Path, manifest: &Path, as_json: bool) -> Result<()> {
    let (config, records) = load_inputs(config, manifest)?;
    let ids: Vec<ResourceId> = records.iter().map(|r| r.id.clone()).collect();
    let store = load_store(records).await?;
    let plane = InMemoryControlPlane::new_arc();
    let reconciler = Reconciler::new(store, Arc::new(build_registry(&config, plane)));

    for entry in plan_all(&reconciler, &ids).await {
        if as_json {
            println!(
                "{}",
                json!({ "resource": entry.resource, "decision": entry.decision })
            );
        } else {
            println!("{:<40} {}", entry.resource, entry.decision);
        }
    }
    Ok(())
}

fn cmd_check(config: &Path) -> Result<()> {
    let config = SiloConfig::load(config)
        .with_context(|| format!("Invalid configuration in {}", config.display()))?;

    println!(
        "controller: max_concurrency={} poll_interval={}s pass_timeout={}s",
        config.controller.max_concurrency,
        config.controller.poll_interval.as_secs(),
        config.controller.pass_timeout.as_secs(),
    );
    println!(
        "deletion: queue_capacity={} batch_size={}",
        config.deletion.queue_capacity, config.deletion.batch_size
    );
    if config.profiles.is_empty() {
        warn!("no profiles configured; every record will fail to connect");
    }
    for (name, profile) in &config.profiles {
        let marker = if config.default_profile.as_deref() == Some(name.as_str()) {
            " (default)"
        } else {
            ""
        };
        println!("profile {name}{marker}: {}", describe_profile(profile));
    }
    Ok(())
}

/// One line per profile, with secrets redacted.
pub fn describe_profile(profile: &Profile) -> String {
    let secret = match (&profile.secret_key, &profile.secret_key_env) {
        (Some(_), _) => "secret_key=<redacted>".to_owned(),
        (None, Some(var)) => format!("secret_key_env={var}"),
        (None, None) => "secret_key=<missing>".to_owned(),
    };
    let tls = profile.tls.as_ref().map_or("tls=default", |tls| {
        if tls.insecure_skip_verify {
            "tls=insecure"
        } else {
            "tls=custom"
        }
    });
    format!(
        "url={} access_key={} {secret} {tls}",
        profile.url, profile.access_key
    )
}

/// The decision a pass would take for one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    pub resource: String,
    pub decision: String,
}

pub async fn plan_all(reconciler: &Reconciler, ids: &[ResourceId]) -> Vec<PlanEntry> {
    let mut entries = Vec::with_capacity(ids.len());
    for id in ids {
        let decision = match reconciler.plan(id).await {
            Ok(plan) => plan.to_string(),
            Err(ReconcileError::NameCollision { .. }) => "collision".to_owned(),
            Err(e) => format!("error: {e}"),
        };
        entries.push(PlanEntry {
            resource: id.to_string(),
            decision,
        });
    }
    entries
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub total: usize,
    pub ready: usize,
    pub failing: usize,
}

pub async fn summarize(store: &dyn RecordStore) -> Result<Summary> {
    let records = store.list().await.context("Failed to list records")?;
    Ok(records.iter().fold(
        Summary {
            total: records.len(),
            ..Summary::default()
        },
        |mut summary, record| {
            if record.status.is_ready() {
                summary.ready = summary.ready.saturating_add(1);
            }
            if record.status.sync_error().is_some() {
                summary.failing = summary.failing.saturating_add(1);
            }
            summary
        },
    ))
}

/// Wait for shutdown signal (Ctrl+C).
async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }
}
