//! mbedcfg cli interface

use clap::{Parser, Subcommand, ValueEnum};
use std::fmt::Formatter;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Change the work directory
    ///
    /// Can be specified multiple times. Note that all
    /// paths on the way to the final path must exist.
    ///
    /// This is equivalent to running { cd <directory>; mbedcfg ... }
    #[clap(short = 'C', long = "directory", global(true))]
    pub directory: Vec<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve the build configuration of a target
    ///
    /// Prints the compiler definitions of the resolved configuration
    #[command(alias = "config")]
    Configure(ConfigureCommand),

    /// Print debug information for development
    Dev(DevCommand),
}

#[derive(Parser, Debug)]
pub struct ConfigureCommand {
    #[clap(flatten)]
    pub input: InputArgs,

    #[clap(flatten)]
    pub output: OutputArgs,
}

#[derive(Parser, Debug)]
pub struct InputArgs {
    /// Name of the target to build for
    #[clap(short = 't', long = "target", requires("targets_json"))]
    pub target: Option<String>,

    /// Target database to look up --target in
    #[clap(long = "targets-json")]
    pub targets_json: Option<PathBuf>,

    /// Already resolved target attributes
    #[clap(long = "target-attributes", conflicts_with("target"))]
    pub target_attributes: Option<PathBuf>,

    /// Directory to search for mbed_lib.json files
    ///
    /// Can be specified multiple times. Defaults to the work directory.
    #[clap(short = 's', long = "search-root")]
    pub search_roots: Vec<PathBuf>,

    /// Application configuration
    ///
    /// Defaults to mbed_app.json in the first search root, when present.
    #[clap(short = 'a', long = "app-config")]
    pub app_config: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct OutputArgs {
    #[arg(short = 'F', long = "output-format", default_value_t)]
    pub format: OutputFormat,

    /// Write to a file instead of stdout
    #[clap(short = 'O', long = "output-file")]
    pub output_file: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Default, Debug)]
pub enum OutputFormat {
    Json,
    #[default]
    Yaml,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Json => f.write_str("json"),
            OutputFormat::Yaml => f.write_str("yaml"),
        }
    }
}

#[derive(Parser, Debug)]
pub struct DevCommand {
    #[clap(flatten)]
    pub input: InputArgs,

    #[command(subcommand)]
    pub command: DevSubCommand,
}

#[derive(Subcommand, Debug)]
pub enum DevSubCommand {
    /// Every mbed_lib.json below the search roots
    Candidates,
    /// The resolved configuration, including warnings
    Config,
}
