use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use phasegate::documents::DocumentSource;
use phasegate::{
    export_workspace, import_workspace, init_telemetry, BulkItem, ContentPatch, Entity, EntityKind,
    FileStateStore, ManifestDocumentSource, OperationTimer, Phase, PhasegateConfig,
    WorkspaceExport, WorkspaceService,
};

#[derive(Parser)]
#[command(name = "phasegate")]
#[command(about = "Approval workflow for capabilities, enablers and story cards")]
#[command(long_about = "phasegate tracks the approval state of specification artifacts as they move \
                       through the intent, specification, ui_design, implementation and control_loop \
                       phases. State lives in a JSON state file; documents are only used as seeds.")]
struct Cli {
    /// Configuration file (defaults to ./phasegate.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Workspace identifier
    #[arg(long, global = true)]
    workspace: Option<String>,
    /// Path of the JSON state file
    #[arg(long, global = true)]
    state_file: Option<PathBuf>,
    /// JSON document manifest
    #[arg(long, global = true)]
    manifest: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show entities and phase approvals
    Status {
        /// Only show progress for this phase
        #[arg(long)]
        phase: Option<Phase>,
    },
    /// Seed the state file from the document manifest
    Sync,
    /// Approve one entity in a phase
    Approve {
        kind: EntityKind,
        business_id: String,
        #[arg(long)]
        phase: Phase,
    },
    /// Reject one entity in a phase; a comment is required
    Reject {
        kind: EntityKind,
        business_id: String,
        #[arg(long)]
        phase: Phase,
        #[arg(long)]
        comment: String,
    },
    /// Put an entity back to in_progress / pending
    Reset {
        kind: EntityKind,
        business_id: String,
    },
    /// Edit descriptive fields without touching approval state
    Edit {
        kind: EntityKind,
        business_id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        file_path: Option<String>,
    },
    /// Approve every cached entity of the given kinds
    BulkApprove {
        #[arg(long)]
        phase: Phase,
        /// Entity kinds to include (defaults to the phase's required kinds)
        #[arg(long = "kind")]
        kinds: Vec<EntityKind>,
    },
    /// Phase-level approval
    Phase {
        #[command(subcommand)]
        action: PhaseCommand,
    },
    /// Fail unless every listed phase is approved
    Gate {
        /// Phases to check (defaults to all)
        #[arg(long = "phase")]
        phases: Vec<Phase>,
    },
    /// Show the change history of one entity
    History {
        kind: EntityKind,
        business_id: String,
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Export the workspace as JSON
    Export {
        /// Write to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        include_history: bool,
    },
    /// Import a workspace export
    Import { file: PathBuf },
}

#[derive(Subcommand)]
enum PhaseCommand {
    /// Approve a phase once every in-scope entity is approved
    Approve { phase: Phase },
    /// Clear a phase approval; entity approvals are kept
    Revoke { phase: Phase },
    /// Show progress and blockers for a phase
    Show { phase: Phase },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Status { .. } => "status",
            Commands::Sync => "sync",
            Commands::Approve { .. } => "approve",
            Commands::Reject { .. } => "reject",
            Commands::Reset { .. } => "reset",
            Commands::Edit { .. } => "edit",
            Commands::BulkApprove { .. } => "bulk-approve",
            Commands::Phase { .. } => "phase",
            Commands::Gate { .. } => "gate",
            Commands::History { .. } => "history",
            Commands::Export { .. } => "export",
            Commands::Import { .. } => "import",
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    PhasegateConfig::load_env_file()?;
    let mut config = PhasegateConfig::load(cli.config.as_deref())?;
    if let Some(workspace) = cli.workspace {
        config.workspace.id = workspace;
    }
    if let Some(state_file) = cli.state_file {
        config.workspace.state_file = state_file;
    }
    if let Some(manifest) = cli.manifest {
        config.workspace.documents_manifest = Some(manifest);
    }

    init_telemetry(&config.observability.log_level, config.observability.json_logs)?;

    tokio::runtime::Runtime::new()?.block_on(async { run(cli.command, &config).await })
}

async fn run(command: Commands, config: &PhasegateConfig) -> Result<()> {
    let timer = OperationTimer::new(command.name());
    let service = open_service(config).await?;

    match command {
        Commands::Status { phase } => status_command(&service, phase).await?,
        Commands::Sync => sync_command(&service, config).await?,
        Commands::Approve {
            kind,
            business_id,
            phase,
        } => {
            let entity = service.approve_item(kind, &business_id, phase).await?;
            println!("✅ Approved {} in {}", describe(&entity), phase);
        }
        Commands::Reject {
            kind,
            business_id,
            phase,
            comment,
        } => {
            let entity = service
                .reject_item(kind, &business_id, phase, &comment)
                .await?;
            println!("❌ Rejected {} in {}", describe(&entity), phase);
        }
        Commands::Reset { kind, business_id } => {
            let entity = service.reset_item(kind, &business_id).await?;
            println!("🔄 Reset {}", describe(&entity));
        }
        Commands::Edit {
            kind,
            business_id,
            name,
            description,
            file_path,
        } => {
            let content = ContentPatch {
                name,
                description,
                file_path,
            };
            let entity = service.edit_content(kind, &business_id, content).await?;
            println!("✏️  Updated {}", describe(&entity));
        }
        Commands::BulkApprove { phase, kinds } => bulk_approve_command(&service, phase, kinds).await?,
        Commands::Phase { action } => phase_command(&service, action).await?,
        Commands::Gate { phases } => gate_command(&service, phases).await?,
        Commands::History {
            kind,
            business_id,
            limit,
        } => {
            let changes = service.history(kind, &business_id, limit).await?;
            if changes.is_empty() {
                println!("No history for {kind} {business_id}");
            }
            for change in changes {
                println!(
                    "v{:<4} {}  {}: '{}' -> '{}'",
                    change.version,
                    change.changed_at.format("%Y-%m-%d %H:%M:%S"),
                    change.field,
                    change.old_value,
                    change.new_value
                );
            }
        }
        Commands::Export {
            output,
            include_history,
        } => {
            let export = export_workspace(&service, include_history).await?;
            let json = serde_json::to_string_pretty(&export)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("Failed to write export to {}", path.display()))?;
                    println!("📦 Exported workspace '{}' to {}", export.workspace_id, path.display());
                }
                None => println!("{json}"),
            }
        }
        Commands::Import { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read export {}", file.display()))?;
            let export: WorkspaceExport = serde_json::from_str(&content)
                .with_context(|| format!("Invalid export file {}", file.display()))?;
            let summary = import_workspace(&service, &export).await?;
            println!(
                "📥 Imported {} capabilities, {} enablers, {} story cards",
                summary.capabilities, summary.enablers, summary.story_cards
            );
            for phase in &summary.phases_restored {
                println!("   ✅ phase {phase} restored");
            }
            for skipped in &summary.skipped {
                println!("   ⚠️  skipped {skipped}");
            }
        }
    }

    service.metrics().log_stats();
    timer.finish();
    Ok(())
}

async fn open_service(config: &PhasegateConfig) -> Result<WorkspaceService> {
    let store = Arc::new(
        FileStateStore::new(&config.workspace.state_file)
            .with_history_limit(config.workspace.history_limit),
    );
    let service = WorkspaceService::new(&config.workspace.id, store)
        .with_requirements(config.phases.clone());

    if let Some(manifest) = &config.workspace.documents_manifest {
        let seeds = ManifestDocumentSource::new(manifest).enumerate().await?;
        service.register_documents(&seeds).await;
    }

    service.fetch_workspace_state().await?;
    Ok(service)
}

fn describe(entity: &Entity) -> String {
    format!(
        "{} {} (version {})",
        entity.kind, entity.business_id, entity.version
    )
}

async fn status_command(service: &WorkspaceService, phase: Option<Phase>) -> Result<()> {
    if let Some(phase) = phase {
        return print_phase(service, phase).await;
    }

    let snapshot = service.cached_state();
    println!("📋 Workspace '{}'", service.workspace_id());
    for kind in EntityKind::ALL {
        let entities = snapshot.entities(kind);
        println!();
        println!("{} ({}):", kind, entities.len());
        for entity in entities {
            println!(
                "  {:<14} {:<12} {:<15} {:<18} {:<9} v{}  {}",
                entity.business_id,
                entity.state.lifecycle_state,
                entity.state.workflow_stage,
                entity.state.stage_status,
                entity.state.approval_status,
                entity.version,
                entity.name
            );
            if let Some(comment) = &entity.state.rejection_comment {
                println!("  {:<14} 💬 {}", "", comment);
            }
        }
    }

    println!();
    println!("Phases:");
    for phase in Phase::ALL {
        let progress = service.phase_progress(phase).await;
        let marker = if service.is_phase_approved(phase).await {
            "✅ approved"
        } else {
            "⏳ pending"
        };
        println!(
            "  {:<15} {:<12} {}/{} approved ({}%)",
            phase, marker, progress.approved_count, progress.total, progress.completion_percentage
        );
    }
    Ok(())
}

async fn print_phase(service: &WorkspaceService, phase: Phase) -> Result<()> {
    let progress = service.phase_progress(phase).await;
    let approved = service.is_phase_approved(phase).await;
    println!(
        "Phase {}: {}",
        phase,
        if approved { "✅ approved" } else { "⏳ not approved" }
    );
    for category in &progress.categories {
        println!(
            "  {:<12} {}/{} approved, {} rejected",
            category.kind, category.approved_count, category.total, category.rejected_count
        );
    }
    println!("  completion: {}%", progress.completion_percentage);
    if progress.can_approve_phase() {
        println!("  ready for phase approval");
    } else {
        for blocker in progress.blockers() {
            println!("  🚧 {blocker}");
        }
    }
    Ok(())
}

async fn sync_command(service: &WorkspaceService, config: &PhasegateConfig) -> Result<()> {
    let Some(manifest) = &config.workspace.documents_manifest else {
        bail!("No document manifest configured; pass --manifest or set workspace.documents_manifest");
    };
    let report = service
        .reconcile_from(&ManifestDocumentSource::new(manifest))
        .await?;

    println!(
        "🔁 Synced documents: {} created, {} updated, {} unchanged, {} failed",
        report.created,
        report.updated,
        report.unchanged,
        report.failed.len()
    );
    for failure in &report.failed {
        println!("   ❌ {} {}: {}", failure.kind, failure.business_id, failure.reason);
    }
    for (kind, business_id) in &report.orphaned {
        println!("   👻 {kind} {business_id} has no document");
    }
    Ok(())
}

async fn bulk_approve_command(
    service: &WorkspaceService,
    phase: Phase,
    kinds: Vec<EntityKind>,
) -> Result<()> {
    let kinds = if kinds.is_empty() {
        service.requirements().kinds_for(phase).to_vec()
    } else {
        kinds
    };
    let items: Vec<BulkItem> = service.items_of_kinds(&kinds);
    if items.is_empty() {
        println!("Nothing to approve");
        return Ok(());
    }

    let outcome = service.bulk_approve(&items, phase).await?;
    println!(
        "✅ {} approved, ❌ {} failed",
        outcome.success_count, outcome.fail_count
    );
    for failure in &outcome.failures {
        println!("   {} {}: {}", failure.kind, failure.business_id, failure.reason);
    }
    if !outcome.refreshed {
        println!("⚠️  Could not refresh state after the bulk run; run `phasegate status` to check");
    }
    Ok(())
}

async fn phase_command(service: &WorkspaceService, action: PhaseCommand) -> Result<()> {
    match action {
        PhaseCommand::Approve { phase } => {
            let approval = service.approve_phase(phase).await?;
            let at = approval
                .approved_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default();
            println!("✅ Phase {phase} approved at {at}");
        }
        PhaseCommand::Revoke { phase } => {
            service.revoke_phase(phase).await?;
            println!("↩️  Phase {phase} approval revoked; entity approvals kept");
        }
        PhaseCommand::Show { phase } => print_phase(service, phase).await?,
    }
    Ok(())
}

async fn gate_command(service: &WorkspaceService, phases: Vec<Phase>) -> Result<()> {
    let phases = if phases.is_empty() {
        Phase::ALL.to_vec()
    } else {
        phases
    };
    let missing = service.missing_phase_approvals(&phases).await;
    if missing.is_empty() {
        println!("✅ All {} phases approved", phases.len());
        return Ok(());
    }

    let names: Vec<String> = missing.iter().map(Phase::to_string).collect();
    bail!("Phases not yet approved: {}", names.join(", "))
}
