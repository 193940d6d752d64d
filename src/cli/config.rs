use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    builder::map_builder::BuilderConfig,
    capture::recognition::RecognitionConfig,
    isolation::watchdog::HelperCommand,
    memory::cache::StorageConfig,
    orchestrator::budget::OrchestratorConfig,
    resolver::spatial::BiasPolicy,
    verify::verifier::VerifierConfig,
};

pub const DEFAULT_CONFIG_PATH: &str = "ui-map.yaml";

// ============================================================================
// CLI Argument Parsing (clap derive)
// ============================================================================

#[derive(Parser, Debug)]
#[command(
    name = "ui-map",
    version,
    about = "Semantic UI map: locate, verify and act on named desktop UI elements"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to config file (default: ui-map.yaml in current dir)
    #[arg(long, global = true)]
    pub config: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build (or recall) the semantic map of a window
    Scan {
        /// Window selector understood by the backend helper
        #[arg(long)]
        window: String,

        /// Ignore the cached map and rescan
        #[arg(long)]
        force: bool,

        /// Output format: markdown or json
        #[arg(long, default_value = "markdown")]
        format: String,

        /// Overall deadline for the request
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Locate and verify an element without acting on it
    Resolve {
        #[arg(long)]
        window: String,

        /// Semantic id of the element (or of its label)
        #[arg(long)]
        id: String,

        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Click an element, optionally typing text into it afterwards
    Act {
        #[arg(long)]
        window: String,

        #[arg(long)]
        id: String,

        /// Text to type after clicking
        #[arg(long = "type")]
        text: Option<String>,

        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Drop the cached map for the window's current state
    Invalidate {
        #[arg(long)]
        window: String,
    },

    /// Print a scene report for an external reasoning agent
    Report {
        #[arg(long)]
        window: String,

        /// Output format: markdown or json
        #[arg(long, default_value = "markdown")]
        format: String,
    },

    /// Print resume instructions from the recovery journal
    Resume,
}

// ============================================================================
// Config File Model (optional YAML)
// ============================================================================

/// Optional YAML config file: `ui-map.yaml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub helpers: HelpersConfig,
    #[serde(default)]
    pub recognition: RecognitionConfig,
    #[serde(default)]
    pub builder: BuilderConfig,
    #[serde(default)]
    pub resolver: BiasPolicy,
    #[serde(default)]
    pub verifier: VerifierConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub trace: TraceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Upper bound on reaping a finished or killed helper.
    #[serde(default = "default_teardown_ms")]
    pub teardown_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            teardown_ms: default_teardown_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelpersConfig {
    #[serde(default = "default_backend_helper")]
    pub backend: HelperCommand,

    #[serde(default = "default_recognizer_helper")]
    pub recognizer: HelperCommand,

    /// Where frames are exchanged with helpers (default: system temp dir).
    pub scratch_dir: Option<String>,
}

impl Default for HelpersConfig {
    fn default() -> Self {
        Self {
            backend: default_backend_helper(),
            recognizer: default_recognizer_helper(),
            scratch_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceConfig {
    #[serde(default = "default_trace_path")]
    pub trace_path: String,

    #[serde(default = "default_audit_dir")]
    pub audit_dir: String,

    #[serde(default = "default_playbook_path")]
    pub playbook_path: String,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            trace_path: default_trace_path(),
            audit_dir: default_audit_dir(),
            playbook_path: default_playbook_path(),
        }
    }
}

// Serde default helpers
fn default_teardown_ms() -> u64 { 500 }
fn default_backend_helper() -> HelperCommand { HelperCommand::new("ui-map-backend") }
fn default_recognizer_helper() -> HelperCommand { HelperCommand::new("ui-map-recognizer") }
fn default_trace_path() -> String { "logs/ui_map_trace.jsonl".to_string() }
fn default_audit_dir() -> String { "logs/audit".to_string() }
fn default_playbook_path() -> String { "data/recovery_journal.json".to_string() }

// ============================================================================
// Config File Loading
// ============================================================================

/// Load config from a YAML file. Returns defaults if the file is missing or
/// malformed; a malformed file is reported.
pub fn load_config(path: Option<&str>) -> AppConfig {
    let config_path = path.unwrap_or(DEFAULT_CONFIG_PATH);
    match std::fs::read_to_string(config_path) {
        Ok(content) => parse_config(&content).unwrap_or_else(|e| {
            warn!(path = config_path, error = %e, "config file is malformed; using defaults");
            AppConfig::default()
        }),
        Err(_) => AppConfig::default(),
    }
}

pub fn parse_config(content: &str) -> Result<AppConfig, serde_yaml::Error> {
    if content.trim().is_empty() {
        return Ok(AppConfig::default());
    }
    serde_yaml::from_str(content)
}
