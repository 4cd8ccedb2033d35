// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use tabsync::{logging, Args, Settings};
#[cfg(feature = "tui")]
use tabsync::{command_bus, App, NotifyWatchSource, Snapshot, SyncOrchestrator, WorkbookGateway};

fn main() -> Result<()> {
    let settings = Settings::from(Args::parse());
    logging::init(&settings.log_file)?;
    info!(
        "tabsync {} on {} (window {:?})",
        tabsync::VERSION,
        settings.document.display(),
        settings.window
    );

    run_ui_mode(&settings)
}

#[cfg(feature = "tui")]
fn build_app(settings: &Settings) -> (App, tabsync::Inbox, tabsync::CommandBus) {
    let (bus, inbox) = command_bus();
    let sync = SyncOrchestrator::new(
        settings.sync_config(),
        std::sync::Arc::new(WorkbookGateway),
        Box::new(NotifyWatchSource::new(settings.window)),
        bus.clone(),
        Snapshot::empty(),
    );
    (App::new(sync), inbox, bus)
}

#[cfg(feature = "tui")]
fn run_ui_mode(settings: &Settings) -> Result<()> {
    let (mut app, inbox, bus) = build_app(settings);
    app.start();
    ui::run_ui(&mut app, &inbox, bus)?;

    info!("UI closed");
    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_settings: &Settings) -> Result<()> {
    anyhow::bail!("TUI mode not available, rebuild with: cargo build --features tui")
}
