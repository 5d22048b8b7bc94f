//! A line based console for driving the profile service by hand.

use std::str::FromStr;
use std::sync::Arc;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::backend::recording::RecordingBackend;
use crate::device::address::DeviceAddress;
use crate::device::types::ConnectionState;
use crate::error::{AppRunError, ConsoleError, ServiceError};
use crate::profile::policy::MemoryPolicy;
use crate::profile::service::ProfileServiceHandle;

const HELP: &str = "\
connect <address>                   connect a device
disconnect <address>                disconnect a device
state <address>                     show what the service knows about a device
connected                           list connected devices
devices                             list tracked devices
active                              list active devices
event <address> <state>             inject a connection state (name or raw value)
available <address> <caps> <group>  inject a device available event
bond <address> <raw>                set the bond state of a device
priority <address> <raw>            set the priority of a device
accept <connect|disconnect> <on|off>
                                    make the recording backend accept or refuse commands
sweep                               remove idle unbonded devices
quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendCommandKind {
    Connect,
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Connect(DeviceAddress),
    Disconnect(DeviceAddress),
    State(DeviceAddress),
    Connected,
    Devices,
    Active,
    Event { device: DeviceAddress, state: i32 },
    Available { device: DeviceAddress, capabilities: u8, group_id: u64 },
    Bond { device: DeviceAddress, bond_state: i32 },
    Priority { device: DeviceAddress, priority: i32 },
    Accept { command: BackendCommandKind, accept: bool },
    Sweep,
    Help,
    Quit,
}

struct Arguments<'a> {
    words: std::str::SplitWhitespace<'a>,
}

impl<'a> Arguments<'a> {
    fn next(&mut self, name: &'static str) -> Result<&'a str, ConsoleError> {
        self.words.next().ok_or(ConsoleError::MissingArgument(name))
    }

    fn address(&mut self) -> Result<DeviceAddress, ConsoleError> {
        Ok(DeviceAddress::from_str(self.next("address")?)?)
    }

    fn number<T: FromStr>(&mut self, name: &'static str) -> Result<T, ConsoleError> {
        let input = self.next(name)?;
        input.parse().map_err(|_| ConsoleError::InvalidNumber { name, input: input.to_string() })
    }

    // decimal, or hexadecimal with a 0x prefix
    fn integer(&mut self, name: &'static str) -> Result<u64, ConsoleError> {
        let input = self.next(name)?;
        let parsed = match input.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => input.parse(),
        };
        parsed.map_err(|_| ConsoleError::InvalidNumber { name, input: input.to_string() })
    }

    fn state(&mut self) -> Result<i32, ConsoleError> {
        let input = self.next("state")?;
        if let Ok(raw) = input.parse::<i32>() {
            return Ok(raw);
        }

        let state = match input.to_ascii_lowercase().as_str() {
            "disconnected" => ConnectionState::Disconnected,
            "connecting" => ConnectionState::Connecting,
            "connected" => ConnectionState::Connected,
            "disconnecting" => ConnectionState::Disconnecting,
            _ => return Err(ConsoleError::InvalidState(input.to_string())),
        };
        Ok(state.to_raw())
    }

    fn finish(mut self) -> Result<(), ConsoleError> {
        match self.words.next() {
            Some(extra) => Err(ConsoleError::UnexpectedArgument(extra.to_string())),
            None => Ok(()),
        }
    }
}

/// Parses one console line. Blank lines parse to `None`.
pub fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, ConsoleError> {
    let mut words = line.split_whitespace();
    let Some(name) = words.next() else {
        return Ok(None);
    };
    let mut args = Arguments { words };

    let command = match name {
        "connect" => ConsoleCommand::Connect(args.address()?),
        "disconnect" => ConsoleCommand::Disconnect(args.address()?),
        "state" => ConsoleCommand::State(args.address()?),
        "connected" => ConsoleCommand::Connected,
        "devices" => ConsoleCommand::Devices,
        "active" => ConsoleCommand::Active,
        "event" => ConsoleCommand::Event { device: args.address()?, state: args.state()? },
        "available" => {
            let device = args.address()?;
            let capabilities = args.integer("caps")?;
            let capabilities = u8::try_from(capabilities)
                .map_err(|_| ConsoleError::InvalidNumber { name: "caps", input: capabilities.to_string() })?;
            ConsoleCommand::Available { device, capabilities, group_id: args.integer("group")? }
        },
        "bond" => ConsoleCommand::Bond { device: args.address()?, bond_state: args.number("raw")? },
        "priority" => ConsoleCommand::Priority { device: args.address()?, priority: args.number("raw")? },
        "accept" => {
            let command = match args.next("connect|disconnect")? {
                "connect" => BackendCommandKind::Connect,
                "disconnect" => BackendCommandKind::Disconnect,
                other => return Err(ConsoleError::UnexpectedArgument(other.to_string())),
            };
            let accept = match args.next("on|off")? {
                "on" => true,
                "off" => false,
                other => return Err(ConsoleError::UnexpectedArgument(other.to_string())),
            };
            ConsoleCommand::Accept { command, accept }
        },
        "sweep" => ConsoleCommand::Sweep,
        "help" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(ConsoleError::UnknownCommand(other.to_string())),
    };

    args.finish()?;
    Ok(Some(command))
}

fn format_devices(devices: Vec<DeviceAddress>) -> String {
    if devices.is_empty() {
        return "(none)".to_string();
    }

    devices.iter().map(|device| device.to_string()).collect::<Vec<_>>().join("\n")
}

pub struct Console {
    handle: ProfileServiceHandle,
    policy: Arc<MemoryPolicy>,
    recording: Option<Arc<RecordingBackend>>,
}

impl Console {
    /// `recording` is the backend to steer with `accept`, when the service runs on one.
    pub fn new(handle: ProfileServiceHandle, policy: Arc<MemoryPolicy>, recording: Option<Arc<RecordingBackend>>) -> Self {
        Console { handle, policy, recording }
    }

    /// Runs one command and returns the text to show for it.
    pub async fn execute(&self, command: ConsoleCommand) -> Result<String, ServiceError> {
        let output = match command {
            ConsoleCommand::Connect(device) => {
                let connecting = self.handle.connect(device).await?;
                format!("connect {}: {}", device, if connecting { "connecting" } else { "rejected" })
            },
            ConsoleCommand::Disconnect(device) => {
                let disconnecting = self.handle.disconnect(device).await?;
                format!("disconnect {}: {}", device, if disconnecting { "requested" } else { "not connected" })
            },
            ConsoleCommand::State(device) => {
                let info = self.handle.get_device_info(device).await?;
                let ok_to_connect = self.handle.ok_to_connect(device).await?;
                format!(
                    "{}: {} group {} capabilities {} ok to connect {}",
                    device,
                    info.state,
                    info.group.map(|group| group.to_string()).unwrap_or("-".to_string()),
                    info.capabilities.map(|caps| format!("{:#04x}", caps)).unwrap_or("-".to_string()),
                    ok_to_connect,
                )
            },
            ConsoleCommand::Connected => format_devices(self.handle.get_connected_devices().await?),
            ConsoleCommand::Devices => {
                let mut lines = Vec::new();
                for device in self.handle.get_devices().await? {
                    lines.push(format!("{} {}", device, self.handle.get_connection_state(device).await?));
                }
                if lines.is_empty() { "(none)".to_string() } else { lines.join("\n") }
            },
            ConsoleCommand::Active => format_devices(self.handle.get_active_devices().await?),
            ConsoleCommand::Event { device, state } => {
                self.handle.stack_events().connection_state(device, state)?;
                format!("event {}: {}", device, state)
            },
            ConsoleCommand::Available { device, capabilities, group_id } => {
                self.handle.stack_events().device_available(device, capabilities, group_id)?;
                format!("available {}: capabilities {:#04x} group {:#06x}", device, capabilities, group_id)
            },
            ConsoleCommand::Bond { device, bond_state } => {
                self.policy.set_bond_state(device, bond_state);
                self.handle.bond_state_changed(device, bond_state)?;
                format!("bond {}: {}", device, bond_state)
            },
            ConsoleCommand::Priority { device, priority } => {
                self.policy.set_priority(device, priority);
                format!("priority {}: {}", device, priority)
            },
            ConsoleCommand::Accept { command, accept } => match &self.recording {
                None => "accept: only available with the recording backend".to_string(),
                Some(backend) => {
                    match command {
                        BackendCommandKind::Connect => backend.set_accept_connect(accept),
                        BackendCommandKind::Disconnect => backend.set_accept_disconnect(accept),
                    }
                    format!("accept {:?}: {}", command, accept)
                },
            },
            ConsoleCommand::Sweep => {
                let removed = self.handle.remove_idle_unbonded().await?;
                format!("removed {} device(s)", removed)
            },
            ConsoleCommand::Help => HELP.to_string(),
            ConsoleCommand::Quit => String::new(),
        };

        Ok(output)
    }
}

/// Reads commands from stdin until `quit` or end of input, printing every notification as it
/// arrives.
pub async fn run_console(console: Console) -> Result<(), AppRunError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut notifications = console.handle.subscribe().await?;

    println!("Type \"help\" for a list of commands");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };

                match parse_command(&line) {
                    Ok(None) => {},
                    Ok(Some(ConsoleCommand::Quit)) => break,
                    Ok(Some(command)) => println!("{}", console.execute(command).await?),
                    Err(err) => println!("{}", err),
                }
            },
            Some(change) = notifications.next() => {
                println!("* {}", change);
            },
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::types::ServiceConfig;
    use crate::device::constants::{BOND_BONDED, PRIORITY_ON};
    use crate::profile::service::ProfileService;

    const DEVICE: DeviceAddress = DeviceAddress([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("connect 00:11:22:33:44:55"), Ok(Some(ConsoleCommand::Connect(DEVICE))));
        assert_eq!(parse_command("  devices  "), Ok(Some(ConsoleCommand::Devices)));
        assert_eq!(parse_command(""), Ok(None));
        assert_eq!(
            parse_command("event 00:11:22:33:44:55 Connected"),
            Ok(Some(ConsoleCommand::Event { device: DEVICE, state: 2 }))
        );
        assert_eq!(
            parse_command("event 00:11:22:33:44:55 9"),
            Ok(Some(ConsoleCommand::Event { device: DEVICE, state: 9 }))
        );
        assert_eq!(
            parse_command("available 00:11:22:33:44:55 0x03 0x1234"),
            Ok(Some(ConsoleCommand::Available { device: DEVICE, capabilities: 3, group_id: 0x1234 }))
        );
        assert_eq!(
            parse_command("accept disconnect off"),
            Ok(Some(ConsoleCommand::Accept { command: BackendCommandKind::Disconnect, accept: false }))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse_command("frobnicate"), Err(ConsoleError::UnknownCommand("frobnicate".to_string())));
        assert_eq!(parse_command("connect"), Err(ConsoleError::MissingArgument("address")));
        assert!(matches!(parse_command("connect 00:11"), Err(ConsoleError::Address { .. })));
        assert_eq!(
            parse_command("connected now"),
            Err(ConsoleError::UnexpectedArgument("now".to_string()))
        );
        assert_eq!(
            parse_command("event 00:11:22:33:44:55 sleeping"),
            Err(ConsoleError::InvalidState("sleeping".to_string()))
        );
        assert_eq!(
            parse_command("available 00:11:22:33:44:55 300 1"),
            Err(ConsoleError::InvalidNumber { name: "caps", input: "300".to_string() })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_against_service() {
        // arrange
        let policy = Arc::new(MemoryPolicy::new());
        let backend = Arc::new(RecordingBackend::with_echo());
        let (handle, _join_handle) = ProfileService::start(ServiceConfig::default(), backend.clone(), policy.clone());
        let console = Console::new(handle, policy, Some(backend));

        // act / assert: rejected until bonded
        assert_eq!(console.execute(ConsoleCommand::Connect(DEVICE)).await.unwrap(), "connect 00:11:22:33:44:55: rejected");

        console.execute(ConsoleCommand::Bond { device: DEVICE, bond_state: BOND_BONDED }).await.unwrap();
        console.execute(ConsoleCommand::Priority { device: DEVICE, priority: PRIORITY_ON }).await.unwrap();
        assert_eq!(console.execute(ConsoleCommand::Connect(DEVICE)).await.unwrap(), "connect 00:11:22:33:44:55: connecting");

        // the echoed Connected event is processed before the next request
        assert_eq!(console.execute(ConsoleCommand::Connected).await.unwrap(), "00:11:22:33:44:55");
        assert_eq!(console.execute(ConsoleCommand::Devices).await.unwrap(), "00:11:22:33:44:55 Connected");
    }
}
