//! devrig - Device selection and uniform driving of automation backends
//!
//! This is the binary entry point. All logic lives in the library crates.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use devrig_app::config::{load_settings, Settings};
use devrig_app::{
    CatalogSource, ConsoleView, DeviceSelector, SelectionCriteria, SessionHandle,
    SessionOrchestrator,
};
use devrig_core::{Device, Error, Platform};
use devrig_driver::normalizer;
use devrig_driver::{DeviceCatalog, SystemConnector, SystemLauncher, ToolAvailability};
use tracing::info;

/// devrig - Pick a device, share its session and drive it
#[derive(Parser, Debug)]
#[command(name = "devrig")]
#[command(about = "Device selection and session orchestration for UI automation", long_about = None)]
struct Cli {
    /// Project directory holding `.devrig/`
    #[arg(long, value_name = "PATH", global = true)]
    project: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List connected and launchable devices
    Devices {
        #[arg(long)]
        platform: Option<Platform>,
    },
    /// Open a session on a device
    Session {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Keep the session open until interrupted
        #[arg(long)]
        hold: bool,
    },
    /// Print the canonical view hierarchy of a device
    Hierarchy {
        #[command(flatten)]
        selection: SelectionArgs,

        #[arg(long)]
        exclude_keyboard: bool,
    },
    /// Write a default `.devrig/config.toml`
    Init,
}

#[derive(Args, Debug)]
struct SelectionArgs {
    #[arg(long)]
    device_id: Option<String>,

    #[arg(long)]
    platform: Option<Platform>,

    /// 0-based index into the connected devices
    #[arg(long)]
    device_index: Option<usize>,
}

impl From<SelectionArgs> for SelectionCriteria {
    fn from(args: SelectionArgs) -> Self {
        SelectionCriteria {
            device_id: args.device_id,
            platform: args.platform,
            device_index: args.device_index,
        }
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    devrig_core::logging::init()?;

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => Ok(()),
        Err(e) => match exit_code(&e) {
            Some(code) => {
                eprintln!("Error: {}", e);
                eprintln!("Logs: {}", devrig_core::logging::log_directory().display());
                std::process::exit(code);
            }
            None => Err(e.into()),
        },
    }
}

/// Exit code for errors that end the run without a report
fn exit_code(error: &Error) -> Option<i32> {
    match error {
        Error::SelectionCancelled => Some(2),
        Error::Interrupted => Some(130),
        e if e.is_fatal() => Some(1),
        _ => None,
    }
}

async fn run(cli: Cli) -> devrig_core::Result<()> {
    let project = cli
        .project
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    let settings = load_settings(&project);
    let tools = ToolAvailability::check().await;
    let catalog = DeviceCatalog::system(
        tools.clone(),
        Some(project.join(&settings.hub.capabilities_file)),
    );

    match cli.command {
        Command::Init => devrig_app::config::init_config_dir(&project),
        Command::Devices { platform } => list_devices(&catalog, platform).await,
        Command::Session { selection, hold } => {
            let (orchestrator, device) = select_device(&settings, catalog, tools, selection.into()).await?;
            let held = orchestrator
                .with_session(device, |handle| async move {
                    println!(
                        "Session {} ({:?}) on {}",
                        handle.session_id(),
                        handle.mode(),
                        handle.device().description
                    );
                    if hold {
                        println!("Holding session, press Ctrl+C to release");
                        std::future::pending::<()>().await;
                    }
                    Ok(())
                })
                .await;

            match held {
                Err(Error::Interrupted) if hold => Ok(()),
                other => other,
            }
        }
        Command::Hierarchy {
            selection,
            exclude_keyboard,
        } => {
            let (orchestrator, device) = select_device(&settings, catalog, tools, selection.into()).await?;
            orchestrator
                .with_session(device, |handle| async move {
                    print_hierarchy(&handle, exclude_keyboard).await
                })
                .await
        }
    }
}

async fn list_devices(catalog: &DeviceCatalog, platform: Option<Platform>) -> devrig_core::Result<()> {
    let mut view = ConsoleView::stdio();

    let connected = catalog.list_connected(platform).await;
    println!("Connected devices:\n");
    if connected.is_empty() {
        println!("  (none)\n");
    } else {
        view.print_devices(&connected)?;
    }

    let launchable = catalog.list_available_for_launch(platform).await;
    println!("Available for launch:\n");
    if launchable.is_empty() {
        println!("  (none)");
    } else {
        view.print_devices(&launchable)?;
    }
    Ok(())
}

/// Resolve the target device; nothing is registered until the session opens
async fn select_device(
    settings: &Settings,
    catalog: DeviceCatalog,
    tools: ToolAvailability,
    criteria: SelectionCriteria,
) -> devrig_core::Result<(SessionOrchestrator, Device)> {
    let launcher = Arc::new(SystemLauncher::new(tools.clone()));
    let source = CatalogSource::new(catalog, launcher).with_tools(tools.clone());
    let mut selector = DeviceSelector::new(source, settings.selector.clone());
    let orchestrator = SessionOrchestrator::from_settings(Arc::new(SystemConnector::new(tools)), settings);
    info!("Session registry at {:?}", orchestrator.registry().dir());

    let mut view = ConsoleView::stdio();
    let device = selector.select(&criteria, &mut view).await?;
    Ok((orchestrator, device))
}

async fn print_hierarchy(handle: &SessionHandle, exclude_keyboard: bool) -> devrig_core::Result<()> {
    let mut hierarchy = handle.adapter().view_hierarchy().await?;
    if exclude_keyboard {
        hierarchy.root = hierarchy.root.exclude_keyboard().unwrap_or_default();
    }
    println!("{}", normalizer::to_xml(&hierarchy)?);
    Ok(())
}
