//! kestrel - capability-scoped plugin host.
//!
//! Usage:
//!   kestrel list                     List discovered plugins
//!   kestrel inspect <DIR>            Load one plugin directory and report on it
//!   kestrel run <QUERY>              Route a launcher query to its plugin
//!   kestrel action <PLUGIN> <ID>     Invoke a plugin's action handler
//!   kestrel config show <PLUGIN>     Show a plugin's effective settings
//!   kestrel --help                   Show help

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, bail};
use serde_json::json;

use kestrel_core::{ConfigValue, HostConfig, Plugin, ResultItem};
use kestrel_plugin::{PermissionEvaluator, PluginEvent, PluginSystem, load_plugin};

#[derive(Parser)]
#[command(
    name = "kestrel",
    version,
    about = "Capability-scoped plugin host",
    long_about = "kestrel loads launcher plugins, runs each in its own sandboxed \
                  script context and routes queries to them.\n\n\
                  Plugins live in directories holding a manifest.yaml and an \
                  entry script (main.lua or main.rhai)."
)]
struct Cli {
    /// Host configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Discover plugins and list them
    List,

    /// Load a single plugin directory and show its manifest and permissions
    Inspect {
        /// Plugin directory
        dir: PathBuf,
    },

    /// Send a query such as "/echo hello" to the matching plugin
    Run {
        /// Raw launcher query; the first word is the command trigger
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },

    /// Invoke a plugin's action handler
    Action {
        /// Plugin name
        plugin: String,

        /// Action identifier
        id: String,
    },

    /// Show or change persisted plugin settings
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Show the effective settings
    Show {
        /// Plugin name
        plugin: String,
    },

    /// Persist a single setting
    Set {
        /// Plugin name
        plugin: String,

        /// Setting key
        key: String,

        /// Setting value
        value: String,

        /// Value type (string, bool, int, float)
        #[arg(short = 't', long = "type", default_value = "string")]
        kind: String,
    },

    /// Drop every persisted setting, restoring the shipped defaults
    Reset {
        /// Plugin name
        plugin: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("kestrel=info".parse()?)
                .add_directive("plugin=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = load_host_config(cli.config.as_deref())?;

    match cli.command {
        Command::List => run_list(config, cli.format)?,
        Command::Inspect { dir } => run_inspect(&config, &dir, cli.format)?,
        Command::Run { query } => run_query(config, &query.join(" "), cli.format)?,
        Command::Action { plugin, id } => run_action(config, &plugin, &id, cli.format)?,
        Command::Config { command } => run_config(config, command, cli.format)?,
    }

    Ok(())
}

fn load_host_config(path: Option<&Path>) -> Result<HostConfig> {
    let config = match path {
        Some(path) => HostConfig::load(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?,
        None => HostConfig::default(),
    };
    tracing::debug!(plugin_dirs = ?config.plugin_dirs, data_root = %config.data_root.display(), "Host config");
    Ok(config)
}

/// Build a system and register everything it can find.
fn discover(config: HostConfig) -> PluginSystem {
    let mut system = PluginSystem::new(config);
    let report = system.discover();
    for failure in &report.failed {
        eprintln!("skipped {}: {}", failure.path.display(), failure.error);
    }
    system
}

/// Discover plugins and list them.
fn run_list(config: HostConfig, format: OutputFormat) -> Result<()> {
    let system = discover(config);
    let evaluator = system.permissions();

    match format {
        OutputFormat::Text => {
            if system.registry().is_empty() {
                println!(" No plugins found.");
                for dir in &system.config().plugin_dirs {
                    println!("   searched {}", dir.display());
                }
                return Ok(());
            }

            println!("{}", "─".repeat(70));
            println!(
                " {:<20} {:<14} {:<10} {:<8} {}",
                "NAME", "COMMAND", "VERSION", "RISK", "STATUS"
            );
            println!("{}", "─".repeat(70));
            for plugin in system.registry().plugins() {
                let summary = evaluator.permission_summary(plugin);
                println!(
                    " {:<20} {:<14} {:<10} {:<8} {}",
                    truncate(plugin.name(), 20),
                    truncate(plugin.command(), 14),
                    truncate(&plugin.manifest.version, 10),
                    summary.risk,
                    if plugin.is_enabled { "enabled" } else { "disabled" }
                );
            }
        }
        OutputFormat::Json => {
            let plugins: Vec<_> = system
                .registry()
                .plugins()
                .map(|plugin| {
                    let summary = evaluator.permission_summary(plugin);
                    json!({
                        "name": plugin.name(),
                        "displayName": plugin.manifest.display_name,
                        "command": plugin.command(),
                        "version": plugin.manifest.version,
                        "enabled": plugin.is_enabled,
                        "risk": summary.risk,
                        "capabilities": summary.capabilities,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&plugins)?);
        }
    }

    Ok(())
}

/// Load one directory without registering it.
fn run_inspect(config: &HostConfig, dir: &Path, format: OutputFormat) -> Result<()> {
    let plugin = load_plugin(dir).with_context(|| format!("Cannot load {}", dir.display()))?;
    let evaluator = PermissionEvaluator::new();
    let validation = evaluator.validate_permissions(&plugin);
    let compatible = plugin.manifest.is_compatible_with(&config.app_version);
    let summary = evaluator.permission_summary(&plugin);

    match format {
        OutputFormat::Text => {
            print_manifest(&plugin);
            println!();
            println!(" Risk: {}", summary.risk);
            if summary.permissions.is_empty() {
                println!(" Permissions: none");
            } else {
                println!(" Permissions:");
                for spec in &summary.permissions {
                    match spec.directories.as_deref() {
                        Some(dirs) if !dirs.is_empty() => {
                            println!("   {} in {}", spec.kind, dirs.join(", "));
                        }
                        _ => println!("   {} (unrestricted)", spec.kind),
                    }
                }
            }
            println!();
            match &validation {
                Ok(()) => println!(" Permissions valid"),
                Err(e) => println!(" {e}"),
            }
            if !compatible {
                println!(" Not compatible with app version {}", config.app_version);
            }
        }
        OutputFormat::Json => {
            let out = json!({
                "manifest": plugin.manifest,
                "entry": plugin.entry_path(),
                "summary": summary,
                "valid": validation.is_ok(),
                "issues": validation.err().map(|e| e.to_string()),
                "compatible": compatible,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }

    Ok(())
}

fn print_manifest(plugin: &Plugin) {
    let manifest = &plugin.manifest;
    println!("{}", "─".repeat(60));
    println!(" {} {} ({})", manifest.display_name, manifest.version, manifest.name);
    println!("{}", "─".repeat(60));
    println!(" {}", manifest.description);
    println!();
    println!(" Command: {}", manifest.command);
    println!(" Entry:   {}", plugin.entry_path().display());
    if let Some(author) = &manifest.author {
        println!(" Author:  {author}");
    }
    if !plugin.default_config.is_empty() {
        println!(" Defaults:");
        for (key, entry) in plugin.default_config.iter() {
            println!("   {key} = {}", entry.value);
        }
    }
}

/// Route a query and print what the plugin displayed.
fn run_query(config: HostConfig, query: &str, format: OutputFormat) -> Result<()> {
    let mut system = discover(config);
    let mut events = system.subscribe();

    let Some((plugin, rest)) = system.match_input(query) else {
        bail!("No plugin handles '{query}'");
    };
    let name = plugin.name().to_string();
    if !plugin.is_enabled {
        bail!("Plugin '{name}' is disabled");
    }

    system
        .dispatch_input(&name, &rest)
        .with_context(|| format!("Plugin '{name}' could not run"))?;

    while let Ok(event) = events.try_recv() {
        if let PluginEvent::Notification { title, body, .. } = event {
            match body {
                Some(body) => eprintln!("[{name}] {title}: {body}"),
                None => eprintln!("[{name}] {title}"),
            }
        }
    }

    print_results(&system.results(&name), format)?;
    system.shutdown();
    Ok(())
}

fn print_results(items: &[ResultItem], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            if items.is_empty() {
                println!(" No results.");
            }
            for item in items {
                println!(" {}", item.title);
                if let Some(subtitle) = &item.subtitle {
                    println!("   {subtitle}");
                }
                if let Some(action) = &item.action {
                    println!("   action: {action}");
                }
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(items)?);
        }
    }
    Ok(())
}

fn run_action(config: HostConfig, plugin: &str, id: &str, format: OutputFormat) -> Result<()> {
    let mut system = discover(config);
    if !system.registry().contains(plugin) {
        bail!("Plugin '{plugin}' not found");
    }

    let handled = system.dispatch_action(plugin, id);
    match format {
        OutputFormat::Text => {
            println!(" {plugin}: action '{id}' {}", if handled { "handled" } else { "not handled" });
        }
        OutputFormat::Json => {
            println!("{}", json!({ "plugin": plugin, "action": id, "handled": handled }));
        }
    }
    system.shutdown();
    Ok(())
}

fn run_config(config: HostConfig, command: ConfigCommand, format: OutputFormat) -> Result<()> {
    let mut system = discover(config);

    let plugin = match command {
        ConfigCommand::Show { plugin } => plugin,
        ConfigCommand::Set {
            plugin,
            key,
            value,
            kind,
        } => {
            let value = ConfigValue::parse(&kind, &value)
                .map_err(|e| color_eyre::eyre::eyre!("Invalid value for '{key}': {e}"))?;
            system
                .set_config_value(&plugin, &key, value)
                .with_context(|| format!("Failed to update '{plugin}'"))?;
            plugin
        }
        ConfigCommand::Reset { plugin } => {
            system
                .reset_config(&plugin)
                .with_context(|| format!("Failed to reset '{plugin}'"))?;
            plugin
        }
    };

    let effective = system.plugin_config(&plugin)?;
    match format {
        OutputFormat::Text => {
            if effective.is_empty() {
                println!(" {plugin}: no settings");
            }
            for (key, entry) in effective.iter() {
                match &entry.description {
                    Some(description) => println!(
                        " {key} ({}) = {}    # {description}",
                        entry.value.type_name(),
                        entry.value
                    ),
                    None => println!(" {key} ({}) = {}", entry.value.type_name(), entry.value),
                }
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&effective.to_value())?);
        }
    }
    Ok(())
}

/// Truncate a string to a maximum display width.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}
