mod cli;

use anyhow::Context;
use mbedcfg::assemble::{assemble_config, find_candidates, APP_FILE_NAME};
use mbedcfg::config::Config;
use mbedcfg::definitions::Definitions;
use mbedcfg::diagnostics::Warning;
use mbedcfg::documents::read_document;
use mbedcfg::targets::TargetDatabase;
use std::io::Write;
use std::path::PathBuf;

fn main() {
    use clap::Parser;
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("MBEDCFG_LOG"))
        .with_writer(std::io::stderr)
        .init();

    for new_path in cli.directory.iter() {
        match new_path.canonicalize() {
            Err(e) => {
                eprintln!(
                    "Failed to resolve path for -C/--directory {}\n{}",
                    new_path.display(),
                    e
                );
                std::process::exit(1);
            }
            Ok(cwd) => {
                if let Err(err) = std::env::set_current_dir(&cwd) {
                    eprintln!("Failed to set work directory to {}\n{}", cwd.display(), err,);
                    std::process::exit(1);
                }

                tracing::info!(directory=%cwd.display(), "Changed working directory");
            }
        }
    }

    let command_result = match cli.command {
        cli::Command::Configure(configure_cli) => configure(configure_cli),
        cli::Command::Dev(dev_cli) => dev(dev_cli),
    };

    if let Err(e) = command_result {
        for error in e.chain() {
            eprintln!("{error}")
        }
        std::process::exit(1);
    }
}

/// What `configure` prints
#[derive(serde::Serialize)]
struct Resolved<'a> {
    #[serde(flatten)]
    definitions: Definitions,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    warnings: &'a [Warning],
}

pub fn configure(cli: cli::ConfigureCommand) -> anyhow::Result<()> {
    let config = resolve(&cli.input)?;

    let resolved = Resolved {
        definitions: Definitions::new(&config),
        warnings: config.diagnostics().warnings(),
    };
    output(&cli.output, &resolved)
}

fn resolve(input: &cli::InputArgs) -> anyhow::Result<Config> {
    let target = target_attributes(input)?;
    let search_roots = search_roots(input)?;
    let app_config = app_config(input, &search_roots);
    tracing::debug!(?search_roots, ?app_config, "resolving configuration");

    let config = assemble_config(&target, &search_roots, app_config.as_deref())?;
    Ok(config)
}

fn target_attributes(input: &cli::InputArgs) -> anyhow::Result<serde_json::Value> {
    match (&input.target, &input.targets_json, &input.target_attributes) {
        (_, _, Some(path)) => Ok(read_document(path)?),
        (Some(name), Some(database), None) => {
            let database = TargetDatabase::load(database)?;
            let attributes = database
                .target_attributes(name)
                .with_context(|| format!("Unable to resolve target {name}"))?;
            Ok(attributes)
        }
        _ => anyhow::bail!("Either --target and --targets-json or --target-attributes is required"),
    }
}

fn search_roots(input: &cli::InputArgs) -> anyhow::Result<Vec<PathBuf>> {
    if input.search_roots.is_empty() {
        return Ok(vec![std::env::current_dir()?]);
    }
    Ok(input.search_roots.clone())
}

fn app_config(input: &cli::InputArgs, search_roots: &[PathBuf]) -> Option<PathBuf> {
    input.app_config.clone().or_else(|| {
        search_roots
            .first()
            .map(|root| root.join(APP_FILE_NAME))
            .filter(|path| path.is_file())
    })
}

fn output<T: serde::Serialize>(output: &cli::OutputArgs, value: &T) -> anyhow::Result<()> {
    let Some(path) = &output.output_file else {
        return write(&output.format, std::io::stdout().lock(), value);
    };

    anyhow::ensure!(
        !path.is_dir(),
        "Output file {} is a directory",
        path.display()
    );
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = std::fs::File::create(path)
        .with_context(|| format!("Unable to create {}", path.display()))?;
    write(&output.format, std::io::BufWriter::new(file), value)
}

fn write<T: serde::Serialize>(
    format: &cli::OutputFormat,
    mut writer: impl Write,
    value: &T,
) -> anyhow::Result<()> {
    match format {
        cli::OutputFormat::Yaml => serde_yaml::to_writer(&mut writer, value)?,
        cli::OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut writer, value)?;
            writeln!(writer)?;
        }
    };

    writer.flush()?;
    Ok(())
}

/// (mbedcfg-)developer utilities
///
/// A quick way to expose internal structures for debugging purposes
pub fn dev(cli: cli::DevCommand) -> anyhow::Result<()> {
    match cli.command {
        cli::DevSubCommand::Candidates => {
            for candidate in find_candidates(&search_roots(&cli.input)?)? {
                println!("{}", candidate.display());
            }
        }
        cli::DevSubCommand::Config => {
            let config = resolve(&cli.input)?;
            println!("{config:#?}");
        }
    }

    Ok(())
}
