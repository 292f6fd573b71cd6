//! The launcher and the four worker roles it spawns.
//!
//! `run` starts each role as a child process of the current executable
//! with the hidden `role` subcommand, so a single binary carries the
//! whole system. Every role connects to the broker with bounded retries
//! and serves until `CLOSE` arrives on `APP`.

use std::{path::PathBuf, process::Stdio};

use ghostwriter_bus::{Broker, BusClient, QoS};
use ghostwriter_protocol::{AppCommand, BrokerCommand, GamepadInfo, topic};
use listener::{DeviceScanner, ListenerConfig, RawEvent};
use playback::{NullInjector, NullOracle, TyperConfig};
use tokio::time::{Duration, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    cli::{Role, RoleArgs, RunArgs},
    error::Result,
};

/// How long the broker keeps routing after `CLOSE`, so in-flight replies
/// reach their subscribers.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// How long `run` waits for a child to exit after `CLOSE` before killing it.
const CHILD_EXIT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default bindings file, next to wherever the listener is started.
const DEFAULT_BINDINGS_FILE: &str = "ghostwriter_hotkeys.json";

/// Window title fragment identifying our own control surfaces.
const APP_TITLE: &str = "ghostwriter";

/// Launch the broker and workers, then wait for Ctrl-C.
pub async fn launch(args: RunArgs) -> Result<()> {
    let port = if args.port == 0 {
        free_port()?
    } else {
        args.port
    };
    let addr = format!("127.0.0.1:{port}");
    let exe = std::env::current_exe()?;

    let mut children = Vec::new();
    for role in [Role::Broker, Role::State, Role::Listener, Role::Typer] {
        let mut cmd = tokio::process::Command::new(&exe);
        cmd.arg("role")
            .arg(role.as_str())
            .arg("--addr")
            .arg(&addr)
            .env("RUST_LOG", logging::log_config_for_child())
            .stdin(Stdio::null());
        if role == Role::Listener
            && let Some(bindings) = &args.bindings
        {
            cmd.arg("--bindings").arg(bindings);
        }
        let child = cmd.spawn()?;
        info!(role = role.as_str(), pid = child.id(), "spawned");
        children.push((role, child));
    }

    println!("ghostwriter running on {addr}; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("interrupt received, broadcasting close");

    match BusClient::connect(&addr, "launcher").await {
        Ok(client) => {
            let payload = serde_json::to_value(AppCommand::Close)?;
            if let Err(e) = client.handle().publish(topic::APP, payload, QoS::AtLeastOnce) {
                warn!(error = %e, "close broadcast failed");
            }
            // Give the frame time to leave before the connection drops.
            sleep(Duration::from_millis(100)).await;
        }
        Err(e) => warn!(error = %e, "cannot reach broker for close broadcast"),
    }

    // Workers exit on CLOSE; the broker follows after its grace period.
    for (role, child) in children.iter_mut().rev() {
        match timeout(CHILD_EXIT_TIMEOUT, child.wait()).await {
            Ok(status) => info!(role = role.as_str(), status = ?status.ok(), "child exited"),
            Err(_) => {
                warn!(role = role.as_str(), "child did not exit in time, killing");
                child.kill().await.ok();
            }
        }
    }
    Ok(())
}

/// Entry point for the hidden `role` subcommand.
pub async fn role(args: RoleArgs) -> Result<()> {
    let shutdown = CancellationToken::new();
    match args.role {
        Role::Broker => broker(&args.addr, shutdown).await,
        Role::State => {
            statestore::run(&args.addr, playback::Settings::seed(), shutdown).await?;
            Ok(())
        }
        Role::Listener => listener_role(&args.addr, args.bindings, shutdown).await,
        Role::Typer => {
            let cfg = TyperConfig {
                addr: args.addr,
                app_title: APP_TITLE.to_string(),
            };
            playback::run(
                cfg,
                Box::new(NullInjector),
                Box::new(NullOracle),
                shutdown,
            )
            .await?;
            Ok(())
        }
    }
}

/// The broker role. The broker itself is protocol-agnostic; a local
/// client watches `APP` and cancels it shortly after `CLOSE`. A
/// `SHUTDOWN` addressed to the broker on `BROKER` is honored by fanning
/// out `CLOSE` on `APP` first, so the workers go down with it.
async fn broker(addr: &str, shutdown: CancellationToken) -> Result<()> {
    let broker = Broker::bind(addr).await?;
    let bound = broker.local_addr()?.to_string();

    let watcher = shutdown.clone();
    tokio::spawn(async move {
        let Ok(mut client) = BusClient::connect(&bound, "broker-lifecycle").await else {
            warn!("broker lifecycle watcher could not connect");
            return;
        };
        let handle = client.handle();
        if handle.subscribe(topic::APP, QoS::AtLeastOnce, false).is_err()
            || handle
                .subscribe(topic::BROKER, QoS::AtLeastOnce, false)
                .is_err()
        {
            return;
        }
        while let Some((t, payload)) = client.recv().await {
            match t.as_str() {
                topic::BROKER => {
                    if let Ok(BrokerCommand::Shutdown) = serde_json::from_value(payload) {
                        info!("shutdown requested, fanning out close");
                        match serde_json::to_value(AppCommand::Close) {
                            Ok(close) => {
                                if let Err(e) =
                                    handle.publish(topic::APP, close, QoS::AtLeastOnce)
                                {
                                    warn!(error = %e, "close fan-out failed");
                                }
                            }
                            Err(e) => warn!(error = %e, "close fan-out failed"),
                        }
                    }
                }
                topic::APP => {
                    if let Ok(AppCommand::Close) = serde_json::from_value(payload) {
                        info!("close requested, broker draining");
                        sleep(CLOSE_GRACE).await;
                        watcher.cancel();
                        return;
                    }
                }
                _ => {}
            }
        }
    });

    broker.run(shutdown).await?;
    Ok(())
}

/// Gamepad scanner for hosts without an input backend.
struct NoDevices;

impl DeviceScanner for NoDevices {
    fn gamepads(&mut self) -> Vec<GamepadInfo> {
        Vec::new()
    }
}

async fn listener_role(
    addr: &str,
    bindings: Option<PathBuf>,
    shutdown: CancellationToken,
) -> Result<()> {
    let cfg = ListenerConfig {
        addr: addr.to_string(),
        bindings_path: bindings.unwrap_or_else(|| PathBuf::from(DEFAULT_BINDINGS_FILE)),
    };
    // No capture backend on this host: hold the sender open so the event
    // stream stays alive (and empty) for the process lifetime.
    let (_raw_tx, raw_rx) = crossbeam_channel::unbounded::<RawEvent>();
    listener::run(cfg, Box::new(NoDevices), raw_rx, None, shutdown).await?;
    Ok(())
}

/// Bind an ephemeral port, read its number, release it.
fn free_port() -> std::io::Result<u16> {
    let sock = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(sock.local_addr()?.port())
}
