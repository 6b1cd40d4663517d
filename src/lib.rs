//! dcp: a daemonless control plane for multi-module projects.
//!
//! A single executable that loads a declarative `project.yml`, discovers
//! the modules it declares by matching filesystem evidence against stack
//! definitions, plans capability runs as typed actions, dispatches them
//! through an adapter registry, and records every outcome durably.
//!
//! # Architecture
//!
//! - [`core`]: domain models, config and stack loading, detection, the
//!   engine, persistence (state, audit ledger, retry queue), and the
//!   reliability layer (circuit breakers, backoff).
//! - [`adapters`]: tool bindings behind the [`adapters::Adapter`] trait,
//!   dispatched by name through the [`adapters::registry::AdapterRegistry`].
//!
//! The contract that holds it together: every dispatched action produces
//! exactly one receipt, and no adapter failure ever escapes as an error.
//!
//! ```bash
//! dcp status
//! dcp config check
//! dcp detect
//! dcp run test -m api --dry-run
//! dcp health
//! ```

pub mod adapters;
pub mod core;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;

use crate::core::logging;
use crate::core::ops;

#[derive(Parser, Debug)]
#[clap(
    name = "dcp",
    version = env!("CARGO_PKG_VERSION"),
    about = "Daemonless control plane for multi-module projects"
)]
struct Cli {
    /// Path to project.yml (default: auto-detect by walking upward).
    #[clap(long, short = 'c', global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Enable verbose output.
    #[clap(long, short = 'v', global = true)]
    verbose: bool,
    /// Suppress non-essential output.
    #[clap(long, short = 'q', global = true)]
    quiet: bool,
    /// Enable debug logging (very verbose).
    #[clap(long, global = true)]
    debug: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct StatusCli {
    /// Output as JSON.
    #[clap(long)]
    json: bool,
    /// Target environment.
    #[clap(long = "env", value_name = "NAME")]
    environment: Option<String>,
}

#[derive(clap::Args, Debug)]
struct ConfigCli {
    #[clap(subcommand)]
    command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Validate project.yml configuration
    Check {
        /// Output as JSON.
        #[clap(long)]
        json: bool,
    },
}

#[derive(clap::Args, Debug)]
struct DetectCli {
    /// Output as JSON.
    #[clap(long)]
    json: bool,
    /// Don't save detection results to state.
    #[clap(long)]
    no_save: bool,
}

#[derive(clap::Args, Debug)]
struct RunCli {
    /// Capability to execute (e.g. test, lint, build).
    capability: String,
    /// Output as JSON.
    #[clap(long)]
    json: bool,
    /// Target specific modules (repeatable).
    #[clap(long = "module", short = 'm', value_name = "NAME")]
    modules: Vec<String>,
    /// Target environment.
    #[clap(long = "env", default_value = "dev", value_name = "NAME")]
    environment: String,
    /// Plan and validate but don't execute.
    #[clap(long)]
    dry_run: bool,
    /// Use mock adapter responses (no real execution).
    #[clap(long)]
    mock: bool,
}

#[derive(clap::Args, Debug)]
struct HealthCli {
    /// Output as JSON.
    #[clap(long)]
    json: bool,
}

#[derive(clap::Args, Debug)]
struct RetryCli {
    #[clap(subcommand)]
    command: RetryCommand,
}

#[derive(Subcommand, Debug)]
enum RetryCommand {
    /// Show retry queue summary
    Status {
        /// Output as JSON.
        #[clap(long)]
        json: bool,
    },
    /// Re-dispatch ready retry items through the adapter registry
    Run {
        /// Output as JSON.
        #[clap(long)]
        json: bool,
        /// Target environment.
        #[clap(long = "env", default_value = "dev", value_name = "NAME")]
        environment: String,
    },
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show project status summary
    #[clap(name = "status")]
    Status(StatusCli),

    /// Project configuration commands
    #[clap(name = "config")]
    Config(ConfigCli),

    /// Detect modules and match stacks in the project
    #[clap(name = "detect")]
    Detect(DetectCli),

    /// Run a capability across project modules
    #[clap(name = "run")]
    Run(RunCli),

    /// Show system health: circuit breakers, retry queue
    #[clap(name = "health")]
    Health(HealthCli),

    /// Inspect and re-drive the retry queue
    #[clap(name = "retry")]
    Retry(RetryCli),
}

/// CLI entry point. Returns the process exit code: 0 on success, 1 on
/// expected errors.
pub fn run() -> i32 {
    let cli = Cli::parse();

    let level = logging::resolve_level(cli.verbose, cli.quiet, cli.debug);
    let _log_guard = logging::setup_logging(level);

    let config = cli.config.as_deref();
    match cli.command {
        Command::Status(args) => cmd_status(config, args, cli.quiet),
        Command::Config(args) => match args.command {
            ConfigCommand::Check { json } => cmd_config_check(config, json),
        },
        Command::Detect(args) => cmd_detect(config, args),
        Command::Run(args) => cmd_run(config, args, cli.verbose),
        Command::Health(args) => cmd_health(config, args, cli.verbose),
        Command::Retry(args) => match args.command {
            RetryCommand::Status { json } => cmd_retry_status(config, json),
            RetryCommand::Run { json, environment } => cmd_retry_run(config, json, &environment),
        },
    }
}

fn print_error(message: &str) {
    eprintln!("{} {}", "error:".red().bold(), message);
}

fn status_color(status: &str) -> colored::ColoredString {
    match status {
        "ok" | "healthy" => status.green(),
        "partial" | "degraded" => status.yellow(),
        "failed" | "unhealthy" => status.red(),
        other => other.normal(),
    }
}

fn cmd_status(config: Option<&std::path::Path>, args: StatusCli, quiet: bool) -> i32 {
    let mut result = ops::get_status(config);
    if let Some(env) = args.environment {
        result.current_environment = env;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result.to_json()).unwrap_or_default());
        return if result.error.is_some() { 1 } else { 0 };
    }

    if let Some(error) = &result.error {
        print_error(error);
        return 1;
    }

    let Some(project) = result.project.as_ref() else {
        return 1;
    };

    if !quiet {
        println!();
        println!("{}", project.name.cyan().bold());
        if !project.description.is_empty() {
            println!("   {}", project.description);
        }
        if !project.repository.is_empty() {
            println!("   {}", project.repository);
        }
        println!();
    }

    println!("   {}", format!("Modules: {}", result.module_count).bold());
    for module in &project.modules {
        let stack_label = if module.stack.is_empty() {
            String::new()
        } else {
            format!(" [{}]", module.stack)
        };
        let domain_label = if module.domain == "service" {
            String::new()
        } else {
            format!(" ({})", module.domain)
        };
        let detected_marker = result
            .state
            .as_ref()
            .and_then(|s| s.modules.get(&module.name))
            .filter(|m| m.detected)
            .map(|_| format!(" {}", "✓".green()))
            .unwrap_or_default();
        println!(
            "     • {}{}{}{}  → {}",
            module.name, stack_label, domain_label, detected_marker, module.path
        );
    }

    if !project.environments.is_empty() {
        println!();
        println!(
            "   {}",
            format!("Environments: {}", result.environment_count).bold()
        );
        for env in &project.environments {
            let default = if env.default { " (default)" } else { "" };
            let active = if env.name == result.current_environment {
                " ← active"
            } else {
                ""
            };
            println!("     • {}{}{}", env.name, default, active);
        }
    }

    if let Some(state) = &result.state {
        let op = &state.last_operation;
        if !op.operation_id.is_empty() {
            println!();
            println!("   {}", "Last operation:".bold());
            println!("     {} — {}", op.automation, status_color(&op.status));
            if !op.ended_at.is_empty() {
                println!("     at {}", op.ended_at);
            }
        }
    }

    println!();
    0
}

fn cmd_config_check(config: Option<&std::path::Path>, json: bool) -> i32 {
    let result = ops::check_config(config);

    if json {
        println!("{}", serde_json::to_string_pretty(&result.to_json()).unwrap_or_default());
        return if result.valid { 0 } else { 1 };
    }

    if result.valid {
        println!("{}", "Configuration is valid".green().bold());
        if let Some(project) = result.project.as_ref() {
            println!("   Project: {}", project.name);
            println!("   Modules: {}", project.modules.len());
            println!("   Environments: {}", project.environments.len());
        }
    } else {
        println!("{}", "Configuration errors:".red().bold());
        for error in &result.errors {
            println!("   • {}", error);
        }
    }

    if !result.warnings.is_empty() {
        println!();
        println!("{}", "Warnings:".yellow());
        for warning in &result.warnings {
            println!("   • {}", warning);
        }
    }

    println!();
    if result.valid { 0 } else { 1 }
}

fn cmd_detect(config: Option<&std::path::Path>, args: DetectCli) -> i32 {
    let result = ops::run_detect(config, None, !args.no_save);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result.to_json()).unwrap_or_default());
        return if result.error.is_some() { 1 } else { 0 };
    }

    if let Some(error) = &result.error {
        print_error(error);
        return 1;
    }

    let (Some(detection), Some(project)) = (result.detection.as_ref(), result.project.as_ref())
    else {
        return 1;
    };

    println!();
    println!("{}", format!("Detection: {}", project.name).cyan().bold());
    println!("   Stacks loaded: {}", result.stacks_loaded);
    println!(
        "   Modules: {}/{} detected",
        detection.total_detected(),
        detection.total_modules()
    );
    println!();

    for module in &detection.modules {
        if module.detected {
            let stack = module.effective_stack();
            let stack_label = if stack.is_empty() {
                "[?]".to_string()
            } else {
                format!("[{}]", stack)
            };
            let version_label = module
                .version
                .as_ref()
                .map(|v| format!(" v{}", v))
                .unwrap_or_default();
            let lang_label = module
                .language
                .as_ref()
                .map(|l| format!(" ({})", l))
                .unwrap_or_default();
            println!(
                "   {} {} {}{}{}  → {}",
                "✓".green(),
                module.name,
                stack_label,
                version_label,
                lang_label,
                module.path
            );
        } else {
            println!(
                "   {} {} (not found)  → {}",
                "✗".red(),
                module.name,
                module.path
            );
        }
    }

    if !detection.unmatched_refs.is_empty() {
        println!();
        println!("   {}", "Missing module paths:".yellow());
        for name in &detection.unmatched_refs {
            println!("     • {}", name);
        }
    }

    if result.state_saved {
        println!();
        println!("   {}", "State saved to .state/current.json".cyan());
    }

    println!();
    0
}

fn cmd_run(config: Option<&std::path::Path>, args: RunCli, verbose: bool) -> i32 {
    let capability = args.capability.clone();
    let result = ops::run_automation(
        ops::RunOptions {
            capability: args.capability,
            config_path: config.map(|p| p.to_path_buf()),
            stacks_dir: None,
            modules: args.modules,
            environment: args.environment,
            dry_run: args.dry_run,
            mock_mode: args.mock,
        },
        None,
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result.to_json()).unwrap_or_default());
        let failed = result.report.as_ref().map(|r| r.failed() > 0).unwrap_or(false);
        return if result.error.is_some() || failed { 1 } else { 0 };
    }

    if let Some(error) = &result.error {
        print_error(error);
        return 1;
    }

    let (Some(report), Some(project)) = (result.report.as_ref(), result.project.as_ref()) else {
        return 1;
    };

    let mode_label = if args.dry_run {
        "[dry-run] "
    } else if args.mock {
        "[mock] "
    } else {
        ""
    };
    println!();
    println!(
        "{}",
        format!("{}{} — {}", mode_label, capability, project.name)
            .cyan()
            .bold()
    );
    println!(
        "   Modules: {} | Actions: {}",
        result.modules_targeted,
        report.total()
    );
    println!();

    for (module_name, receipts) in report.module_receipts() {
        for receipt in receipts {
            let timing = if receipt.duration_ms > 0 {
                format!(" ({}ms)", receipt.duration_ms)
            } else {
                String::new()
            };
            if receipt.ok() {
                println!("   {} {}{}", "✓".green(), module_name, timing);
                if verbose && !receipt.output.is_empty() {
                    for line in receipt.output.lines().take(10) {
                        println!("     │ {}", line);
                    }
                }
            } else if receipt.failed() {
                println!("   {} {}{}", "✗".red(), module_name, timing);
                if let Some(error) = &receipt.error {
                    for line in error.lines().take(5) {
                        println!("     │ {}", line);
                    }
                }
            } else {
                println!("   {} {} ({})", "⊘".yellow(), module_name, receipt.output);
            }
        }
    }

    println!();
    let summary = format!("Result: {}/{} succeeded", report.succeeded(), report.total());
    println!(
        "   {}",
        match report.status() {
            crate::core::engine::ReportStatus::Ok => summary.green().bold(),
            crate::core::engine::ReportStatus::Partial => summary.yellow().bold(),
            crate::core::engine::ReportStatus::Failed => summary.red().bold(),
        }
    );
    println!();

    if report.failed() > 0 { 1 } else { 0 }
}

fn cmd_health(config: Option<&std::path::Path>, args: HealthCli, verbose: bool) -> i32 {
    let health = ops::system_health(config);

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&health).unwrap_or_default()
        );
        return 0;
    }

    println!();
    println!(
        "{}",
        format!("System Health: {}", health.status.to_uppercase())
            .color(match health.status.as_str() {
                "healthy" => colored::Color::Green,
                "degraded" => colored::Color::Yellow,
                "unhealthy" => colored::Color::Red,
                _ => colored::Color::White,
            })
            .bold()
    );
    println!("   {}", health.timestamp);
    println!();

    for component in &health.components {
        println!(
            "   {} [{}]",
            component.name.bold(),
            status_color(&component.status)
        );
        println!("      {}", component.message);
        if verbose {
            if let Some(details) = component.details.as_object() {
                for (key, value) in details {
                    if key == "items" {
                        continue;
                    }
                    println!("      {}: {}", key, value);
                }
            }
        }
    }

    println!();
    0
}

fn cmd_retry_status(config: Option<&std::path::Path>, json: bool) -> i32 {
    use crate::core::config::{find_project_file, project_root};
    use crate::core::retry::RetryQueue;

    let config_path = match config.map(|p| p.to_path_buf()).or_else(|| find_project_file(None)) {
        Some(path) => path,
        None => {
            print_error("No project.yml found.");
            return 1;
        }
    };
    let root = project_root(&config_path);
    let queue = RetryQueue::open(RetryQueue::default_path(&root));
    let status = queue.get_status();

    if json {
        println!("{}", serde_json::to_string_pretty(&status).unwrap_or_default());
        return 0;
    }

    println!();
    println!("{}", "Retry queue".cyan().bold());
    println!("   total: {}", status["total"]);
    println!("   ready: {}", status["ready"]);
    println!("   exhausted: {}", status["exhausted"]);
    println!();
    0
}

fn cmd_retry_run(config: Option<&std::path::Path>, json: bool, environment: &str) -> i32 {
    let result = ops::run_retry(config, environment, None);

    if json {
        println!("{}", serde_json::to_string_pretty(&result.to_json()).unwrap_or_default());
        return if result.error.is_some() { 1 } else { 0 };
    }

    if let Some(error) = &result.error {
        print_error(error);
        return 1;
    }

    println!();
    println!("{}", "Retry re-drive".cyan().bold());
    println!(
        "   attempted: {} | succeeded: {} | failed: {}",
        result.attempted, result.succeeded, result.failed
    );
    if !result.exhausted.is_empty() {
        println!("   {}", "Exhausted (dropped):".yellow());
        for id in &result.exhausted {
            println!("     • {}", id);
        }
    }
    println!("   remaining: {}", result.remaining);
    println!();
    0
}
