// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::{self, Read};
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use clap::Parser;
use cli::{Cli, Commands, CronCommands, OutputFormatArg};
use sven_bootstrap::{AgentBuilder, RuntimeContext, ToolSetProfile};
use sven_core::AgentEvent;
use sven_model::catalog::ModelCatalogEntry;
use tokio::sync::{mpsc, Mutex};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Handle subcommands first (before loading config)
    if let Some(cmd) = &cli.command {
        match cmd {
            Commands::Serve { config } => {
                return run_serve(config.clone()).await;
            }
            Commands::Cron { command } => {
                return run_cron_command(cli.config.clone(), command).await;
            }
            Commands::Completions { shell } => {
                cli::print_completions(*shell);
                return Ok(());
            }
            Commands::ShowConfig => {
                let config = sven_config::load(cli.config.as_deref())?;
                println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
                return Ok(());
            }
            Commands::ListModels { provider, refresh, json } => {
                let config = sven_config::load(cli.config.as_deref())?;
                return list_models_cmd(&config, provider.as_deref(), *refresh, *json).await;
            }
            Commands::ListProviders { verbose, json } => {
                return list_providers_cmd(*verbose, *json);
            }
        }
    }

    let config = Arc::new(sven_config::load(cli.config.as_deref())?);
    run_single_turn(cli, config).await
}

// ── Multi-channel runtime (`sven serve` / `sven cron`) ───────────────────────

/// Resolve the workspace directory cron/diagnostic state lives under
/// (spec.md §6 `WORK_DIR`); defaults to the current directory.
fn work_dir() -> std::path::PathBuf {
    std::env::var_os("WORK_DIR").map(std::path::PathBuf::from).unwrap_or_else(|| {
        std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("."))
    })
}

/// Start the full multi-channel agent runtime: console adapter (plus any
/// chat adapters compiled in) feeding the Ingress Router, which dedupes and
/// hands work to the Session Scheduler; a Cron Scheduler runs alongside,
/// firing synthesized messages back through the same router.
async fn run_serve(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let config = Arc::new(sven_config::load(config_path.as_deref())?);
    let model: Arc<dyn sven_model::ModelProvider> = Arc::from(sven_model::from_config(&config.model)?);
    let runtime_ctx = RuntimeContext::auto_detect();
    let runtime = sven_core::AgentRuntimeContext {
        project_root: runtime_ctx.project_root.clone(),
        git_context_note: runtime_ctx.git_context.clone().and_then(|g| g.to_prompt_section()),
        ci_context_note: runtime_ctx.ci_context.clone().and_then(|c| c.to_prompt_section()),
        project_context_file: runtime_ctx.project_context_file.clone(),
        append_system_prompt: None,
        system_prompt_override: None,
    };

    let bus = Arc::new(sven_core::diagnostic::DiagnosticBus::new());
    let dedup = Arc::new(sven_channels::DedupIndex::new());
    let group_policy = sven_channels::GroupPolicy::default();
    let router = sven_channels::IngressRouter::new(dedup, group_policy, Arc::clone(&bus));

    let console = sven_channels::adapter::console::ConsoleAdapter::new();
    console.attach_router(Arc::clone(&router));
    router.register_adapter(console.clone());

    let cron_sink = sven_bootstrap::RouterJobSink::new(Arc::clone(&router));
    let cron = sven_scheduler::CronScheduler::new(work_dir(), cron_sink)?;

    let approval_config = sven_bootstrap::approval_config_from(&config.approval);
    let channel_tools = Arc::new(sven_bootstrap::ChannelToolDeps {
        approval: Arc::new(sven_tools::approval::ApprovalEngine::with_workspace(
            approval_config,
            work_dir(),
        )),
        bus: Arc::clone(&bus),
        cron: Arc::clone(&cron),
        supervisor: Arc::new(sven_tools::supervisor::SubAgentSupervisor::new()),
        memory: Arc::new(sven_tools::MemoryIndex::new(work_dir())),
        work_dir: work_dir().to_string_lossy().into_owned(),
    });

    let turn_runner =
        sven_bootstrap::AgentTurnRunner::new(config, model, runtime, Arc::clone(&bus), channel_tools);
    let reply_sink = sven_channels::reply_sink(Arc::clone(&router));
    let scheduler = sven_channels::SessionScheduler::new(turn_runner, Arc::clone(&bus), reply_sink);
    router.attach_scheduler(scheduler);

    let cron_handle = cron.spawn_tick();

    router.start_all().await?;
    console.join().await;
    cron.stop();
    cron_handle.abort();
    router.stop_all().await?;
    Ok(())
}

/// `sven cron <subcommand>` — thin CLI surface over the same
/// [`sven_scheduler::CronScheduler`] `run_serve` uses, operating on the
/// same on-disk job table.
async fn run_cron_command(config_path: Option<std::path::PathBuf>, cmd: &CronCommands) -> anyhow::Result<()> {
    let _ = sven_config::load(config_path.as_deref())?;
    let bus = Arc::new(sven_core::diagnostic::DiagnosticBus::new());
    let dedup = Arc::new(sven_channels::DedupIndex::new());
    let router = sven_channels::IngressRouter::new(dedup, sven_channels::GroupPolicy::default(), bus);
    let sink = sven_bootstrap::RouterJobSink::new(router);
    let cron = sven_scheduler::CronScheduler::new(work_dir(), sink)?;

    match cmd {
        CronCommands::List => {
            for job in cron.list_jobs().await {
                println!(
                    "{}  {:<20}  enabled={}  runs={}  next={:?}",
                    job.id,
                    job.name.as_deref().unwrap_or("(unnamed)"),
                    job.enabled,
                    job.run_count,
                    job.next_run_at_ms
                );
            }
        }
        CronCommands::Remove { id } => {
            if cron.remove_job(id).await? {
                println!("removed {id}");
            } else {
                println!("no such job: {id}");
            }
        }
        CronCommands::Run { id } => {
            if cron.run_job(id).await? {
                println!("ran {id}");
            } else {
                println!("no such job: {id}");
            }
        }
        CronCommands::Remind { text, after } => {
            let delay = humantime::parse_duration(after).context("parsing --after duration")?;
            let trigger_at_ms = chrono::Utc::now().timestamp_millis() + delay.as_millis() as i64;
            let target = sven_scheduler::SessionTarget { channel: "console".into(), chat_id: "local".into() };
            let reminder = cron.set_reminder(text.clone(), trigger_at_ms, "console".into(), target).await?;
            println!("reminder {} set for {} ms from now", reminder.id, delay.as_millis());
        }
        CronCommands::Reminders { all } => {
            for r in cron.list_reminders(*all).await {
                println!("{}  fired={}  at={}  {}", r.id, r.fired, r.trigger_at_ms, r.text);
            }
        }
    }
    Ok(())
}

/// Run exactly one turn of the Turn Driver (spec.md §4.5) outside the
/// multi-channel runtime: a convenience entry point for scripting and
/// local debugging (`sven "do the thing"` or `echo "do the thing" | sven`).
/// This bypasses the Ingress Router / Session Scheduler entirely since there
/// is only ever one turn and no concurrent session to serialize against.
async fn run_single_turn(cli: Cli, config: Arc<sven_config::Config>) -> anyhow::Result<()> {
    let prompt = match &cli.prompt {
        Some(p) => p.clone(),
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf).context("reading stdin")?;
            buf
        }
    };
    if prompt.trim().is_empty() {
        anyhow::bail!("no prompt given: pass one as an argument or pipe it on stdin");
    }

    let model: Arc<dyn sven_model::ModelProvider> = Arc::from(sven_model::from_config(&config.model)?);
    let mut runtime_ctx = RuntimeContext::auto_detect();
    runtime_ctx.system_prompt_override = match &cli.system_prompt_file {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?,
        ),
        None => None,
    };
    runtime_ctx.append_system_prompt = cli.append_system_prompt.clone();

    let todos = Arc::new(Mutex::new(Vec::new()));
    let task_depth = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let mut agent = AgentBuilder::new(config)
        .with_runtime_context(runtime_ctx)
        .build(
            cli.mode,
            model,
            ToolSetProfile::Full { question_tx: None, todos, task_depth },
        );

    let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);
    let submit = agent.submit(&prompt, tx);
    let mut final_text = String::new();
    let mut input_tokens = 0u64;
    let mut output_tokens = 0u64;
    let drain = async {
        while let Some(event) = rx.recv().await {
            match event {
                AgentEvent::TextComplete(text) => final_text = text,
                AgentEvent::Aborted { partial_text } => final_text = partial_text,
                AgentEvent::TokenUsage { input, output, .. } => {
                    input_tokens = input as u64;
                    output_tokens = output as u64;
                }
                AgentEvent::Error(message) => eprintln!("[sven:error] {message}"),
                _ => {}
            }
        }
    };
    let (result, ()) = tokio::join!(submit, drain);
    result?;

    match cli.output_format {
        OutputFormatArg::Text => println!("{final_text}"),
        OutputFormatArg::Json => {
            #[derive(serde::Serialize)]
            struct TurnJson<'a> {
                reply: &'a str,
                input_tokens: u64,
                output_tokens: u64,
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&TurnJson {
                    reply: &final_text,
                    input_tokens,
                    output_tokens,
                })?
            );
        }
    }
    Ok(())
}

/// List available models, optionally querying the provider API for live data.
async fn list_models_cmd(
    config: &sven_config::Config,
    provider_filter: Option<&str>,
    refresh: bool,
    as_json: bool,
) -> anyhow::Result<()> {
    // Validate provider filter against the registry.
    if let Some(prov) = provider_filter {
        if sven_model::get_driver(prov).is_none() {
            eprintln!("Unknown provider: {prov:?}");
            eprintln!("\nAvailable providers (run `sven list-providers` for details):");
            for d in sven_model::list_drivers() {
                eprintln!("  {:20} {}", d.id, d.name);
            }
            anyhow::bail!("Invalid provider: {prov}");
        }
    }

    let entries: Vec<ModelCatalogEntry> = if refresh {
        // Query the configured (or filtered) provider's live API.
        let model_cfg = if let Some(prov) = provider_filter {
            let mut c = config.model.clone();
            c.provider = prov.to_string();
            c
        } else {
            config.model.clone()
        };
        let model = sven_model::from_config(&model_cfg)?;
        let mut live = model.list_models().await?;
        if let Some(prov) = provider_filter {
            live.retain(|e| e.provider == prov);
        }
        live
    } else {
        // Use static catalog only.
        let mut all = sven_model::catalog::static_catalog();
        if let Some(prov) = provider_filter {
            all.retain(|e| e.provider == prov);
        }
        all.sort_by(|a, b| a.provider.cmp(&b.provider).then(a.id.cmp(&b.id)));
        all
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No models found.");
        return Ok(());
    }

    // Determine column widths.
    let id_w = entries.iter().map(|e| e.id.len()).max().unwrap_or(10).max(10);
    let prov_w = entries.iter().map(|e| e.provider.len()).max().unwrap_or(8).max(8);

    println!(
        "{:<id_w$}  {:<prov_w$}  {:>12}  {:>16}  DESCRIPTION",
        "ID",
        "PROVIDER",
        "CTX WINDOW",
        "MAX OUT TOKENS",
        id_w = id_w,
        prov_w = prov_w,
    );
    println!("{}", "-".repeat(id_w + prov_w + 50));

    for e in &entries {
        let ctx = if e.context_window == 0 {
            "  -".to_string()
        } else {
            format!("{:>12}", e.context_window)
        };
        let max_out = if e.max_output_tokens == 0 {
            "  -".to_string()
        } else {
            format!("{:>16}", e.max_output_tokens)
        };
        println!(
            "{:<id_w$}  {:<prov_w$}  {}  {}  {}",
            e.id,
            e.provider,
            ctx,
            max_out,
            e.description,
            id_w = id_w,
            prov_w = prov_w,
        );
    }
    println!("\nTotal: {} model(s)", entries.len());
    Ok(())
}

/// List all registered model providers.
fn list_providers_cmd(verbose: bool, as_json: bool) -> anyhow::Result<()> {
    let drivers = sven_model::list_drivers();

    if as_json {
        #[derive(serde::Serialize)]
        struct ProviderJson {
            id: &'static str,
            name: &'static str,
            description: &'static str,
            default_api_key_env: Option<&'static str>,
            default_base_url: Option<&'static str>,
            requires_api_key: bool,
        }
        let rows: Vec<ProviderJson> = drivers
            .iter()
            .map(|d| ProviderJson {
                id: d.id,
                name: d.name,
                description: d.description,
                default_api_key_env: d.default_api_key_env,
                default_base_url: d.default_base_url,
                requires_api_key: d.requires_api_key,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("Supported Model Providers ({} total)\n", drivers.len());

    if verbose {
        for d in drivers {
            println!("  {} — {}", d.id, d.name);
            println!("    {}", d.description);
            if let Some(env) = d.default_api_key_env {
                println!("    API key env : {env}");
            }
            if let Some(url) = d.default_base_url {
                println!("    Default URL : {url}");
            }
            if !d.requires_api_key {
                println!("    Auth        : none required");
            }
            println!();
        }
    } else {
        let id_w = drivers.iter().map(|d| d.id.len()).max().unwrap_or(10).max(10);
        let name_w = drivers.iter().map(|d| d.name.len()).max().unwrap_or(8).max(8);
        println!("{:<id_w$}  {:<name_w$}  DESCRIPTION", "ID", "NAME");
        println!("{}", "-".repeat(id_w + name_w + 40));
        for d in drivers {
            println!("{:<id_w$}  {:<name_w$}  {}", d.id, d.name, d.description);
        }
        println!("\nUse `sven list-providers --verbose` for API key and URL details.");
        println!("Use `sven list-models --provider <ID>` to see models for a specific provider.");
    }
    Ok(())
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
