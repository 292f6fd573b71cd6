//! Bus wiring for the typer process: decode `TYPER` commands, track
//! `STATE` broadcasts, publish whatever the engine emits.

use ghostwriter_bus::{BusClient, QoS};
use ghostwriter_protocol::{AppCommand, Reply, StateBroadcast, TyperCommand, decode_command, topic};
use serde_json::json;
use tokio::sync::mpsc::unbounded_channel;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    engine::Engine,
    seams::{Injector, WindowOracle},
};

/// Errors that can terminate the typer process.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The bus connection failed or went away.
    #[error(transparent)]
    Bus(#[from] ghostwriter_bus::Error),
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration for [`run`].
pub struct TyperConfig {
    /// Broker address.
    pub addr: String,
    /// Window title fragment identifying the controlling UI itself.
    pub app_title: String,
}

/// Run the typer process until `CLOSE` arrives on `APP` or `shutdown` is
/// cancelled.
pub async fn run(
    cfg: TyperConfig,
    injector: Box<dyn Injector>,
    oracle: Box<dyn WindowOracle>,
    shutdown: CancellationToken,
) -> Result<()> {
    let (out_tx, mut out_rx) = unbounded_channel();
    let mut engine = Engine::new(injector, oracle, out_tx, cfg.app_title);

    let mut client = BusClient::connect(&cfg.addr, "typer").await?;
    let handle = client.handle();
    handle.subscribe(topic::TYPER, QoS::AtLeastOnce, true)?;
    handle.subscribe(topic::STATE, QoS::AtLeastOnce, false)?;
    handle.subscribe(topic::APP, QoS::AtLeastOnce, false)?;

    // Prime the settings cache with the store's current contents.
    handle.publish(topic::STATE, json!({"cmd": "get"}), QoS::AtLeastOnce)?;
    info!("typer serving");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            outbound = out_rx.recv() => {
                let Some((t, payload)) = outbound else { break };
                if let Err(e) = handle.publish(&t, payload, QoS::AtLeastOnce) {
                    warn!(topic = %t, error = %e, "typer publish failed");
                }
            }
            received = client.recv() => {
                let Some((t, payload)) = received else { break };
                match t.as_str() {
                    topic::APP => {
                        if let Ok(AppCommand::Close) = serde_json::from_value(payload) {
                            info!("close requested, typer exiting");
                            break;
                        }
                    }
                    topic::TYPER => match decode_command::<TyperCommand>(payload) {
                        None => {}
                        Some(Err(e)) => {
                            let reply = Reply::err(format!("bad typer command: {}", e));
                            let payload =
                                serde_json::to_value(reply).unwrap_or_else(|_| json!({}));
                            if let Err(e) = handle.publish(topic::TYPER, payload, QoS::AtLeastOnce)
                            {
                                warn!(error = %e, "typer publish failed");
                            }
                        }
                        Some(Ok(cmd)) => engine.handle_command(cmd),
                    },
                    topic::STATE => {
                        // Only the unsolicited full-map broadcasts matter
                        // here; replies and commands do not decode.
                        let Ok(broadcast) = serde_json::from_value::<StateBroadcast>(payload)
                        else {
                            continue;
                        };
                        engine.apply_state(&broadcast.state_data);
                    }
                    _ => {}
                }
            }
        }
    }
    engine.handle_command(TyperCommand::Stop);
    Ok(())
}

#[cfg(test)]
mod tests {
    use ghostwriter_protocol::{TyperCommand, decode_command};
    use serde_json::json;

    #[test]
    fn typer_frames_split_into_commands_replies_and_errors() {
        let ok = decode_command::<TyperCommand>(json!({"cmd": "play"}));
        assert!(matches!(ok, Some(Ok(TyperCommand::Play))));

        // Our own replies come back on the topic; they carry no `cmd`.
        assert!(decode_command::<TyperCommand>(json!({"message": "ok"})).is_none());

        // Tagged but malformed frames must be answered, not dropped.
        let missing_file = decode_command::<TyperCommand>(json!({"cmd": "load_file"}));
        assert!(matches!(missing_file, Some(Err(_))));
    }
}
