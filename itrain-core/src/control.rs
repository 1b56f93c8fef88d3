//! In-process control channel.
//!
//! Any task may write ASCII command lines through a [`ControlHandle`];
//! only the reactor reads them. Lines are parsed on the reactor side so
//! writers never need to share its types.

use std::fmt;
use std::str::FromStr;

use tokio::sync::mpsc;

use crate::error::GatewayError;
use crate::protocol::Dialect;

/// A parsed control line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// `OCCLUSION <region> <0|1>`
    Occlusion { region: u32, occluded: bool },
    /// `PROTOCOL <DCTX|DTTX>`
    Protocol(Dialect),
    /// `QUIT`
    Quit,
}

impl ControlCommand {
    pub fn parse(line: &str) -> Result<Self, GatewayError> {
        let invalid = || GatewayError::InvalidControl(line.trim().to_string());
        let mut words = line.split_whitespace();
        let command = words.next().ok_or_else(invalid)?;

        let parsed = match command {
            "OCCLUSION" => {
                let region = words.next().and_then(|w| w.parse().ok()).ok_or_else(invalid)?;
                let occluded = match words.next() {
                    Some("0") => false,
                    Some("1") => true,
                    _ => return Err(invalid()),
                };
                ControlCommand::Occlusion { region, occluded }
            }
            "PROTOCOL" => {
                let dialect = words.next().ok_or_else(invalid)?.parse()?;
                ControlCommand::Protocol(dialect)
            }
            "QUIT" => ControlCommand::Quit,
            _ => return Err(invalid()),
        };

        if words.next().is_some() {
            return Err(invalid());
        }
        Ok(parsed)
    }
}

impl FromStr for ControlCommand {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlCommand::Occlusion { region, occluded } => {
                write!(f, "OCCLUSION {region} {}", *occluded as u8)
            }
            ControlCommand::Protocol(dialect) => write!(f, "PROTOCOL {dialect}"),
            ControlCommand::Quit => write!(f, "QUIT"),
        }
    }
}

/// Writer side of the control channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::UnboundedSender<String>,
}

/// Reader side, owned by the reactor.
pub type ControlReceiver = mpsc::UnboundedReceiver<String>;

pub fn channel() -> (ControlHandle, ControlReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ControlHandle { tx }, rx)
}

impl ControlHandle {
    /// Queue a raw line. Fails only once the reactor is gone.
    pub fn send_line(&self, line: impl Into<String>) -> Result<(), GatewayError> {
        self.tx.send(line.into())?;
        Ok(())
    }

    pub fn send(&self, command: ControlCommand) -> Result<(), GatewayError> {
        self.send_line(command.to_string())
    }

    pub fn occlusion(&self, region: u32, occluded: bool) -> Result<(), GatewayError> {
        self.send(ControlCommand::Occlusion { region, occluded })
    }

    pub fn protocol(&self, dialect: Dialect) -> Result<(), GatewayError> {
        self.send(ControlCommand::Protocol(dialect))
    }

    pub fn quit(&self) -> Result<(), GatewayError> {
        self.send(ControlCommand::Quit)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
