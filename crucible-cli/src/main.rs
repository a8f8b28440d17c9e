use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use crucible_core::cancellation::CancellationHandle;
use crucible_core::config::ConfigLoader;
use crucible_core::event_bus::EventBus;
use crucible_core::stores::Stores;
use crucible_orchestrator::{Coordinator, DefaultReportParser, DefaultTaskBlockParser};
use crucible_pipeline::context::PipelineContext;
use crucible_pipeline::event_bridge::PipelineEventBus;
use crucible_pipeline::stage::PipelineOutcome;
use crucible_pipeline::stages::{CrafterExecutionStage, GateVerificationStage, PlanningStage, TaskRegistrationStage};
use crucible_pipeline::PipelineEngine;
use crucible_providers::in_process::{EchoLlm, InProcessProvider};
use crucible_providers::router::CapabilityRouter;
use crucible_providers::subprocess::SubprocessProvider;
use crucible_types::StreamChunk;
use tracing::{info, Instrument};

#[derive(Parser, Debug)]
#[command(name = "crucible-engine")]
#[command(about = "Headless multi-agent orchestration engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Runs one orchestration pipeline to completion for a single request.
    Run {
        request: String,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        agent_command: Option<String>,
        #[arg(long)]
        workspace_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            request,
            config,
            agent_command,
            workspace_id,
        } => run_once(request, config, agent_command, workspace_id).await?,
    }

    Ok(())
}

async fn run_once(
    request: String,
    config_path: Option<PathBuf>,
    agent_command: Option<String>,
    workspace_id: Option<String>,
) -> anyhow::Result<()> {
    let config = ConfigLoader::load(config_path.as_deref()).context("loading configuration")?;
    let workspace_id = workspace_id.unwrap_or_else(|| "default".to_string());
    let pipeline_id = uuid::Uuid::new_v4().to_string();

    let stores = Arc::new(Stores::new(EventBus::new()));
    let router = Arc::new(CapabilityRouter::new());

    match agent_command {
        Some(command) => {
            info!(command, "wiring subprocess agent provider");
            router.register(Arc::new(SubprocessProvider::new(command, Vec::new()))).await;
        }
        None => {
            info!("no --agent-command given, using the offline echo provider");
            router.register(Arc::new(InProcessProvider::new(Arc::new(EchoLlm)))).await;
        }
    }

    let coordinator = Arc::new(Coordinator::new(stores.clone(), workspace_id.clone()));
    let parallel_crafters = config.parallel_crafters;

    let chunk_sink: crucible_types::ChunkSink = Arc::new(|agent_id, chunk| match chunk {
        StreamChunk::Text { content } => println!("[{agent_id}] {content}"),
        StreamChunk::Error { message, .. } => eprintln!("[{agent_id}] error: {message}"),
        _ => {}
    });
    let phase_sink: crucible_pipeline::PhaseSink = Arc::new(|phase, payload| {
        info!(phase, %payload, "phase transition");
    });

    let ctx = PipelineContext::new(
        pipeline_id.clone(),
        workspace_id,
        request,
        parallel_crafters,
        config,
        stores,
        router,
        coordinator,
        Arc::new(DefaultTaskBlockParser),
        Arc::new(DefaultReportParser),
        Arc::new(PipelineEventBus::new()),
        chunk_sink,
        phase_sink,
        CancellationHandle::new(),
    );

    let engine = PipelineEngine::new(vec![
        Box::new(PlanningStage),
        Box::new(TaskRegistrationStage),
        Box::new(CrafterExecutionStage),
        Box::new(GateVerificationStage),
    ]);

    let span = tracing::info_span!("pipeline_run", run_id = %pipeline_id);
    let outcome = engine.run(&ctx).instrument(span).await;

    match outcome {
        PipelineOutcome::Success { task_summaries } => {
            println!("completed: {} task(s)", task_summaries.len());
            for summary in task_summaries {
                println!("- {summary}");
            }
        }
        PipelineOutcome::NoTasks { plan_output } => {
            println!("planner produced no tasks; raw plan:\n{plan_output}");
        }
        PipelineOutcome::MaxWavesReached { waves, task_summaries } => {
            println!("iteration budget exhausted after {waves} wave(s)");
            for summary in task_summaries {
                println!("- {summary}");
            }
        }
        PipelineOutcome::Failed { message } => {
            anyhow::bail!("pipeline failed: {message}");
        }
        PipelineOutcome::Cancelled => {
            println!("pipeline cancelled");
        }
    }

    Ok(())
}
