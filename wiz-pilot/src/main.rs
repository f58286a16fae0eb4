use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use serde::Serialize;
use tokio::time::{sleep_until, Instant};

use wiz_pilot_lib::config::{Configuration, Installation};
use wiz_pilot_lib::control_interface::{DispatchResult, Dispatcher};
use wiz_pilot_lib::identity::Group;
use wiz_pilot_lib::resolver::fade::FadeSequence;
use wiz_pilot_lib::util::discovery::{Discovery, DiscoveryPass, BROADCAST_ADDRESS};
use wiz_pilot_lib::util::report::{DiscoveryReport, DispatchReport};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    handle_cli(cli).await
}

/// This struct defines the command line interface of the application
#[derive(Parser)]
#[clap(
    name = "wiz_pilot",
    about = "Discovers WiZ bulbs and applies grouped lighting presets",
    version
)]
pub struct Cli {
    /// YAML configuration file; the built-in table is used when absent
    #[clap(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Commands,
}

/// Supported output formats.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum OutputFormat {
    /// Plain text format.
    Plaintext,
    /// JSON format.
    Json,
    /// YAML format.
    Yaml,
}

/// Where device addresses come from.
#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum Source {
    /// The operating system's ARP table (`arp -a`).
    Arp,
    /// A broadcast `getPilot` answered by the bulbs themselves.
    Broadcast,
}

/// Subcommands available for the CLI
#[derive(Subcommand)]
pub enum Commands {
    /// Lists known and unknown devices without sending any command
    #[clap(name = "discover")]
    Discover {
        /// Output format (plaintext, json, yaml)
        #[clap(short, long, value_enum, default_value_t = OutputFormat::Plaintext)]
        output: OutputFormat,

        #[clap(short, long, value_enum, default_value_t = Source::Arp)]
        source: Source,

        /// Broadcast listen time in milliseconds
        #[clap(short = 't', long = "timeout", default_value_t = 2000)]
        timeout: u64,
    },
    /// Discovers devices and sends each its resolved parameters
    #[clap(name = "run")]
    Run {
        /// Additional device names to leave alone
        #[clap(long, use_value_delimiter = true)]
        skip: Vec<String>,

        #[clap(flatten)]
        target: Target,

        /// Devices contacted at once
        #[clap(long, default_value_t = 1)]
        parallel: usize,

        #[clap(short, long, value_enum, default_value_t = OutputFormat::Plaintext)]
        output: OutputFormat,
    },
    /// Switches every known device on
    #[clap(name = "on")]
    On {
        #[clap(flatten)]
        target: Target,
    },
    /// Switches every known device off
    #[clap(name = "off")]
    Off {
        #[clap(flatten)]
        target: Target,
    },
    /// Ramps one device's dimming towards a target
    #[clap(name = "fade")]
    Fade {
        /// Display name of the device
        #[clap(long)]
        device: String,

        /// Final dimming (0-100)
        #[clap(long, value_parser = clap::value_parser!(u8).range(0..=100))]
        to: u8,

        /// Dimming change per frame
        #[clap(long, default_value_t = 1)]
        step: u8,

        /// Time between frames in milliseconds
        #[clap(long, value_parser = parse_duration, default_value = "1000")]
        interval: Duration,

        #[clap(flatten)]
        target: Target,
    },
    /// Validates the configuration and prints it
    #[clap(name = "check-config")]
    CheckConfig,
}

/// Options shared by every command that talks to devices.
#[derive(clap::Args)]
pub struct Target {
    /// Only address devices of this group
    #[clap(short, long, value_enum)]
    group: Option<Group>,

    #[clap(long, value_enum, default_value_t = Source::Arp)]
    source: Source,

    /// Reply timeout per device in milliseconds
    #[clap(short = 't', long = "timeout", value_parser = parse_duration, default_value = "1000")]
    timeout: Duration,

    /// How long `--source broadcast` listens for replies, in milliseconds
    #[clap(long, value_parser = parse_duration, default_value = "2000")]
    listen: Duration,
}

fn parse_duration(s: &str) -> Result<Duration, &'static str> {
    let millis = s
        .parse::<u64>()
        .map_err(|_| "could not parse duration in milliseconds")?;
    Ok(Duration::from_millis(millis))
}

fn load_configuration(path: Option<&PathBuf>) -> Result<Configuration> {
    match path {
        Some(path) => Configuration::load(path)
            .with_context(|| format!("Failed to load configuration {}", path.display())),
        None => Configuration::builtin().context("Built-in configuration is invalid"),
    }
}

async fn discover(
    installation: &Installation,
    source: Source,
    listen: Duration,
) -> Result<DiscoveryPass> {
    match source {
        Source::Arp => Discovery::from_neighbor_table(&installation.registry).await,
        Source::Broadcast => {
            let sightings =
                Discovery::broadcast_pilot(SocketAddr::V4(BROADCAST_ADDRESS), listen).await?;
            Ok(DiscoveryPass::from_sightings(&sightings, &installation.registry))
        }
    }
}

/// Discovers devices for a dispatching command. With `show`, the discovery
/// sections are printed first, the same way `discover` prints them.
async fn discover_targets(
    installation: &Installation,
    target: &Target,
    show: bool,
) -> Result<DiscoveryPass> {
    let mut pass = discover(installation, target.source, target.listen).await?;
    if show {
        print!("{}", DiscoveryReport::new(&pass).render());
    } else {
        for warning in &pass.diagnostics {
            eprintln!("warning: {}", warning);
        }
    }
    if let Some(group) = target.group {
        pass.retain_group(group);
    }
    if pass.resolved.is_empty() {
        println!("No known devices to send commands to.");
    }
    Ok(pass)
}

fn print_output<T: Serialize>(output: OutputFormat, value: &T, plaintext: String) -> Result<()> {
    match output {
        OutputFormat::Plaintext => print!("{}", plaintext),
        OutputFormat::Json => println!("{}", serde_json::to_string(value)?),
        OutputFormat::Yaml => println!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

fn print_dispatch(results: &[DispatchResult], output: OutputFormat) -> Result<()> {
    let report = DispatchReport::new(results);
    print_output(output, &report, report.render())?;
    info!("{} of {} devices succeeded", report.succeeded(), results.len());
    Ok(())
}

async fn switch(installation: &Installation, target: &Target, on: bool) -> Result<()> {
    let pass = discover_targets(installation, target, true).await?;
    let results = Dispatcher::new(installation)
        .with_timeout(target.timeout)
        .dispatch_state(&pass.resolved, on)
        .await;
    print_dispatch(&results, OutputFormat::Plaintext)
}

async fn handle_cli(cli: Cli) -> Result<()> {
    let mut configuration = load_configuration(cli.config.as_ref())?;
    if let Commands::Run { skip, .. } = &cli.command {
        configuration.skip.extend(skip.iter().cloned());
    }
    let installation =
        Installation::new(configuration.clone()).context("Refusing to run with this configuration")?;

    match cli.command {
        Commands::Discover {
            output,
            source,
            timeout,
        } => {
            if source == Source::Arp && output == OutputFormat::Plaintext {
                println!("Discovering devices on the network...");
            }
            let pass = discover(&installation, source, Duration::from_millis(timeout)).await?;
            if pass.resolved.is_empty() && pass.unknown.is_empty() {
                println!("No devices found.");
                return Ok(());
            }
            let report = DiscoveryReport::new(&pass);
            print_output(output, &report, report.render())?;
        }
        Commands::Run {
            target,
            parallel,
            output,
            ..
        } => {
            let show = output == OutputFormat::Plaintext;
            let pass = discover_targets(&installation, &target, show).await?;
            let results = Dispatcher::new(&installation)
                .with_timeout(target.timeout)
                .with_max_in_flight(parallel)
                .dispatch_all(&pass.resolved)
                .await;
            print_dispatch(&results, output)?;
        }
        Commands::On { target } => switch(&installation, &target, true).await?,
        Commands::Off { target } => switch(&installation, &target, false).await?,
        Commands::Fade {
            device,
            to,
            step,
            interval,
            target,
        } => {
            let identity = installation
                .registry
                .by_name(&device)
                .ok_or_else(|| anyhow!("Unknown device `{}`", device))?;
            if installation.is_skipped(&identity.identifier) {
                bail!("Device `{}` is in the skip set", device);
            }
            let pass = discover_targets(&installation, &target, false).await?;
            let resolved = pass
                .resolved
                .iter()
                .find(|d| d.identifier == identity.identifier)
                .ok_or_else(|| anyhow!("Device `{}` was not found on the network", device))?;

            let start = installation.resolver.resolve(&resolved.identifier);
            let sequence = FadeSequence::new(&start, to, step, interval);
            info!("Fading {} over {} frames", device, sequence.len());

            let dispatcher = Dispatcher::new(&installation).with_timeout(target.timeout);
            let begin = Instant::now();
            for (offset, params) in sequence.frames() {
                sleep_until(begin + *offset).await;
                let result = dispatcher
                    .dispatch_params(resolved, *params)
                    .await
                    .ok_or_else(|| anyhow!("Device `{}` is in the skip set", device))?;
                print_dispatch(std::slice::from_ref(&result), OutputFormat::Plaintext)?;
            }
        }
        Commands::CheckConfig => {
            println!(
                "{} devices, {} override rules, {} skipped",
                installation.registry.len(),
                configuration.overrides.len(),
                installation.skip.len()
            );
            print!("{}", configuration.to_yaml()?);
        }
    }

    Ok(())
}
