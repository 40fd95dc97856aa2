//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

mod config;
mod system;

use clap::{App, Arg};
use config::{Config, LoggingFmtStyle};
use nix::unistd::Uid;
use ospf_core::instance::{Instance, InstanceHandle};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::Layer;
use tracing_subscriber::prelude::*;

#[derive(Debug)]
enum SignalMsg {
    Shutdown,
    DumpState,
}

fn init_tracing(config: &config::Logging) {
    // Enable logging to stdout.
    let stdout = config.stdout.enabled.then(|| {
        let log_level_filter = LevelFilter::from_level(tracing::Level::TRACE);
        let layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(config.stdout.show_thread_id)
            .with_file(config.stdout.show_source)
            .with_line_number(config.stdout.show_source)
            .with_ansi(config.stdout.colors);
        let layer = match config.stdout.style {
            LoggingFmtStyle::Compact => layer.compact().boxed(),
            LoggingFmtStyle::Full => layer.boxed(),
            LoggingFmtStyle::Json => layer.json().boxed(),
            LoggingFmtStyle::Pretty => layer.pretty().boxed(),
        };
        layer.with_filter(log_level_filter)
    });

    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive("ospf=debug".parse().unwrap())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout)
        .init();
}

fn signal_listener() -> std::io::Result<mpsc::Receiver<SignalMsg>> {
    let (signal_tx, signal_rx) = mpsc::channel(4);
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigusr1 = signal(SignalKind::user_defined1())?;

    tokio::task::spawn(async move {
        loop {
            let msg = tokio::select! {
                _ = sigint.recv() => {
                    info!("received SIGINT");
                    SignalMsg::Shutdown
                },
                _ = sigterm.recv() => {
                    info!("received SIGTERM");
                    SignalMsg::Shutdown
                },
                _ = sigusr1.recv() => SignalMsg::DumpState,
            };
            let shutdown = matches!(msg, SignalMsg::Shutdown);
            if signal_tx.send(msg).await.is_err() || shutdown {
                return;
            }
        }
    });

    Ok(signal_rx)
}

// Logs a summary of the instance's operational state.
async fn dump_state(handle: &InstanceHandle) {
    for (state, count) in handle.neighbor_counts().await {
        info!(?state, %count, "neighbors");
    }
    let count = handle.partial_adjacency_count().await;
    info!(%count, "partial adjacencies");

    let lsdb = handle.lsdb();
    for area_id in lsdb.area_ids() {
        let count = lsdb.area_lsas(area_id).len();
        info!(%area_id, %count, "area LSAs");
    }
    let count = lsdb.as_external_lsas().len();
    info!(%count, "AS-external LSAs");
}

async fn run(config: &Config) {
    // Spawn signal listener.
    let mut signal_rx = match signal_listener() {
        Ok(signal_rx) => signal_rx,
        Err(error) => {
            error!(%error, "failed to install signal handlers");
            return;
        }
    };

    // Learn the system interfaces.
    let sys_ifaces = match system::interfaces() {
        Ok(sys_ifaces) => sys_ifaces,
        Err(error) => {
            error!(%error, "failed to read system interfaces");
            return;
        }
    };

    // Start the OSPF instance.
    let instance = match Instance::new(&config.instance, &sys_ifaces) {
        Ok(instance) => instance,
        Err(error) => {
            error!(%error, "invalid configuration");
            return;
        }
    };
    let handle = match instance.start() {
        Ok(handle) => handle,
        Err(error) => {
            error.log();
            return;
        }
    };
    info!(router_id = %handle.router_id, "instance started");

    while let Some(msg) = signal_rx.recv().await {
        match msg {
            SignalMsg::Shutdown => break,
            SignalMsg::DumpState => dump_state(&handle).await,
        }
    }

    handle.stop().await;
}

// ===== main =====

fn main() {
    // Parse command-line parameters.
    let matches = App::new("OSPF routing daemon")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("file")
                .help("Specify an alternative configuration file."),
        )
        .get_matches();

    // Read configuration file.
    let config_file = matches.value_of("config");
    let config = Config::load(config_file);

    // Check for root privileges.
    if !Uid::effective().is_root() {
        eprintln!("need privileged user");
        std::process::exit(1);
    }

    // Initialize tracing.
    init_tracing(&config.logging);

    if config.instance.interfaces.is_empty() {
        warn!("no interfaces configured");
    }

    // We're ready to go!
    info!("starting up");

    match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime.block_on(run(&config)),
        Err(error) => {
            error!(%error, "failed to create async runtime");
            std::process::exit(1);
        }
    }

    info!("exiting");
}
