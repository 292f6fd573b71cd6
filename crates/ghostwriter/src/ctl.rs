//! The control shell: one-shot commands and the wildcard inspector.

use ghostwriter_bus::{BusClient, QoS};
use ghostwriter_protocol::{AppCommand, InputSource, ListenerCommand, TyperCommand, topic};
use serde_json::{Value, json};
use tokio::time::{Duration, timeout};

use crate::{
    cli::{Action, CtlArgs, InspectArgs, StateOp},
    error::Result,
};

/// How long to keep printing responses after a command.
const REPLY_WINDOW: Duration = Duration::from_millis(800);

/// Send one command, print every response that arrives shortly after.
pub async fn ctl(args: CtlArgs) -> Result<()> {
    let (topic_name, payload, expect_replies) = encode(&args.action)?;
    let client_id = format!("ctl-{}", std::process::id());
    let mut client = BusClient::connect(&args.addr, &client_id).await?;
    let handle = client.handle();
    // Subscribe first; frames from one connection are processed in order,
    // so the responses to our own publish cannot race past us.
    handle.subscribe(topic_name, QoS::AtLeastOnce, false)?;
    handle.publish(topic_name, payload.clone(), QoS::AtLeastOnce)?;
    if !expect_replies {
        return Ok(());
    }

    let mut echoed = false;
    loop {
        match timeout(REPLY_WINDOW, client.recv()).await {
            Ok(Some((_, frame))) => {
                // The first copy of our own command comes straight back;
                // skip it once.
                if !echoed && frame == payload {
                    echoed = true;
                    continue;
                }
                println!("{}", serde_json::to_string_pretty(&frame)?);
            }
            _ => break,
        }
    }
    Ok(())
}

/// Map a CLI action onto its topic and wire payload.
fn encode(action: &Action) -> Result<(&'static str, Value, bool)> {
    let encoded = match action {
        Action::Play => (topic::TYPER, serde_json::to_value(TyperCommand::Play)?, true),
        Action::Pause => (topic::TYPER, serde_json::to_value(TyperCommand::Pause)?, true),
        Action::Stop => (topic::TYPER, serde_json::to_value(TyperCommand::Stop)?, true),
        Action::Data => (topic::TYPER, serde_json::to_value(TyperCommand::Data)?, true),
        Action::AdvanceNewline => (
            topic::TYPER,
            serde_json::to_value(TyperCommand::AdvanceNewline)?,
            true,
        ),
        Action::AdvanceToken => (
            topic::TYPER,
            serde_json::to_value(TyperCommand::AdvanceToken)?,
            true,
        ),
        Action::LoadFile { file } => (
            topic::TYPER,
            serde_json::to_value(TyperCommand::LoadFile { file: file.clone() })?,
            true,
        ),
        Action::State { op } => (topic::STATE, encode_state(op), true),
        Action::Register {
            slot,
            input,
            suppress,
        } => (
            topic::LISTENER,
            serde_json::to_value(ListenerCommand::Register {
                slot: *slot,
                input: InputSource::from(*input),
                suppress: *suppress,
            })?,
            true,
        ),
        Action::Unregister { slot } => (
            topic::LISTENER,
            serde_json::to_value(ListenerCommand::Unregister { slot: *slot })?,
            true,
        ),
        Action::Gamepads => (
            topic::LISTENER,
            serde_json::to_value(ListenerCommand::GetGamepads)?,
            true,
        ),
        Action::Close => (topic::APP, serde_json::to_value(AppCommand::Close)?, false),
    };
    Ok(encoded)
}

fn encode_state(op: &StateOp) -> Value {
    match op {
        StateOp::Get { key: None } => json!({"cmd": "get"}),
        StateOp::Get { key: Some(key) } => json!({"cmd": "get", "key": key}),
        StateOp::Add { key, value, r#type } => {
            json!({"cmd": "add", "key": key, "value": value, "type": r#type.as_str()})
        }
        StateOp::Del { key } => json!({"cmd": "del", "key": key}),
    }
}

/// Subscribe to every topic and print frames until interrupted.
pub async fn inspect(args: InspectArgs) -> Result<()> {
    let client_id = format!("inspect-{}", std::process::id());
    let mut client = BusClient::connect(&args.addr, &client_id).await?;
    client.handle().subscribe("#", QoS::AtMostOnce, false)?;
    loop {
        tokio::select! {
            interrupted = tokio::signal::ctrl_c() => {
                interrupted?;
                break;
            }
            received = client.recv() => {
                let Some((t, payload)) = received else { break };
                println!("{t} {payload}");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::cli::{InputArg, TypeArg};

    use super::*;

    #[test]
    fn actions_map_to_documented_wire_shapes() {
        let (t, payload, wait) = encode(&Action::Play).unwrap();
        assert_eq!((t, wait), (topic::TYPER, true));
        assert_eq!(payload, json!({"cmd": "play"}));

        let (t, payload, _) = encode(&Action::Register {
            slot: 2,
            input: InputArg::Keyboard,
            suppress: true,
        })
        .unwrap();
        assert_eq!(t, topic::LISTENER);
        assert_eq!(
            payload,
            json!({"cmd": "register", "slot": 2, "input": "keyboard", "suppress": true})
        );

        let (t, payload, wait) = encode(&Action::Close).unwrap();
        assert_eq!((t, wait), (topic::APP, false));
        assert_eq!(payload, json!({"command": "CLOSE"}));
    }

    #[test]
    fn state_add_carries_declared_type() {
        let payload = encode_state(&StateOp::Add {
            key: "speed".into(),
            value: "75".into(),
            r#type: TypeArg::Int,
        });
        assert_eq!(
            payload,
            json!({"cmd": "add", "key": "speed", "value": "75", "type": "int"})
        );
    }
}
