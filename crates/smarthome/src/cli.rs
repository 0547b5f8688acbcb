//! Clap derive structures for the `smarthome` CLI.
//!
//! Defines the command tree, global flags, and shared argument types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// smarthome -- control local smart-home bridges from the command line
#[derive(Debug, Parser)]
#[command(
    name = "smarthome",
    version,
    about = "Control Hue, Dirigera, Nanoleaf, Home Assistant and Shelly devices from the command line",
    long_about = "Talks to local smart-home bridges directly.\n\n\
        Every configured bridge is merged into one namespace unless --bridge\n\
        selects a single one; merged ids look like <bridge>::<id>.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Only talk to this configured bridge
    #[arg(long, short = 'b', env = "SMARTHOME_BRIDGE", global = true)]
    pub bridge: Option<String>,

    /// Config file (defaults to the platform config dir)
    #[arg(long, env = "SMARTHOME_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "SMARTHOME_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Request timeout in seconds (overrides the config file)
    #[arg(long, global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one id per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Power {
    On,
    Off,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List devices (and scenes with --scenes)
    #[command(alias = "ls")]
    List(ListArgs),

    /// List groups with their members
    Groups,

    /// Pair with a bridge (press its link button first)
    Pair(PairArgs),

    /// Switch a device or group on or off
    Switch(SwitchArgs),

    /// Set brightness in percent
    #[command(alias = "dim")]
    Brightness(LevelArgs),

    /// Set a color (#rrggbb or r,g,b)
    Color(ColorArgs),

    /// Set a white temperature in Kelvin
    #[command(alias = "ct")]
    Temperature(TemperatureArgs),

    /// Move a cover to a position in percent (100 = open)
    Position(LevelArgs),

    /// Open a cover
    Up(TargetArgs),

    /// Close a cover
    Down(TargetArgs),

    /// Activate a scene or effect
    Scene(SceneArgs),

    /// Follow state changes until interrupted
    Watch(WatchArgs),

    /// Parse `avahi-browse -r -k -p -t` output into bridge addresses
    Discover(DiscoverArgs),

    /// Apply the configured on_login state
    ApplyLogin,

    /// Switch everything off if off_shutdown is configured
    Shutdown(ShutdownArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Command Arguments ────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Include scenes and effects
    #[arg(long, short = 's')]
    pub scenes: bool,
}

#[derive(Debug, Args)]
pub struct PairArgs {
    /// Configured bridge to pair with
    pub bridge: String,

    /// Device key, for bridges with several devices
    #[arg(long, short = 'd')]
    pub device: Option<String>,

    /// Write the token into config.toml instead of the keyring
    #[arg(long)]
    pub plaintext: bool,
}

#[derive(Debug, Args)]
pub struct TargetArgs {
    /// Device or group id or name (`_all_` for everything)
    pub target: String,
}

#[derive(Debug, Args)]
pub struct SwitchArgs {
    /// Device or group id or name (`_all_` for everything)
    pub target: String,

    pub power: Power,
}

#[derive(Debug, Args)]
pub struct LevelArgs {
    /// Device or group id or name (`_all_` for everything)
    pub target: String,

    /// 0 to 100
    #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
    pub percent: u8,
}

#[derive(Debug, Args)]
pub struct ColorArgs {
    /// Device or group id or name (`_all_` for everything)
    pub target: String,

    /// `#rrggbb`, `rrggbb` or `r,g,b`
    #[arg(id = "color_value", value_name = "COLOR")]
    pub color: String,
}

#[derive(Debug, Args)]
pub struct TemperatureArgs {
    /// Device or group id or name (`_all_` for everything)
    pub target: String,

    /// 1000 to 40000
    #[arg(value_parser = clap::value_parser!(u32).range(1000..=40000))]
    pub kelvin: u32,
}

#[derive(Debug, Args)]
pub struct SceneArgs {
    /// Scene id or name
    pub scene: String,

    /// Groups or devices to activate it on (default: everywhere)
    #[arg(long = "on", short = 't')]
    pub targets: Vec<String>,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Re-fetch every N seconds (bridges without push updates)
    #[arg(long, short = 'i', default_value = "30")]
    pub interval: u64,
}

#[derive(Debug, Args)]
pub struct DiscoverArgs {
    /// File with avahi-browse output (stdin when omitted)
    pub input: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ShutdownArgs {
    /// Switch off even when off_shutdown is not configured
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
