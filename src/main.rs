use clap::Parser;
use semantic_ui_map::cli::commands::{
    build_context, cmd_act, cmd_invalidate, cmd_report, cmd_resolve, cmd_resume, cmd_scan,
};
use semantic_ui_map::cli::config::{Cli, Commands, load_config};
use semantic_ui_map::orchestrator::orchestrator::Orchestrator;
use semantic_ui_map::trace::init::init_logging;

/// Exit status for a request handed to escalation.
const EXIT_ESCALATED: i32 = 2;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = load_config(cli.config.as_deref());

    let completed = match cli.command {
        Commands::Resume => cmd_resume(&config)?,
        command => {
            let orchestrator = Orchestrator::new(build_context(&config)?);
            match command {
                Commands::Scan {
                    window,
                    force,
                    format,
                    timeout_ms,
                } => cmd_scan(&orchestrator, &window, force, &format, timeout_ms)?,
                Commands::Resolve {
                    window,
                    id,
                    timeout_ms,
                } => cmd_resolve(&orchestrator, &window, &id, timeout_ms)?,
                Commands::Act {
                    window,
                    id,
                    text,
                    timeout_ms,
                } => cmd_act(&orchestrator, &window, &id, text, timeout_ms)?,
                Commands::Invalidate { window } => cmd_invalidate(&orchestrator, &window)?,
                Commands::Report { window, format } => cmd_report(&orchestrator, &window, &format)?,
                Commands::Resume => cmd_resume(&config)?,
            }
        }
    };

    if !completed {
        std::process::exit(EXIT_ESCALATED);
    }
    Ok(())
}
