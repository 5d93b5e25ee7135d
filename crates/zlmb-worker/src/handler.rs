use std::io::Write;

use tracing::{info, warn};

use crate::bridge::{ExternalProcessBridge, HandlerCommand};
use crate::envelope::Envelope;
use crate::error::DispatchError;

/// Processes one envelope to completion.
pub trait Handler {
    fn handle(&mut self, envelope: &Envelope) -> Result<(), DispatchError>;
}

impl<F> Handler for F
where
    F: FnMut(&Envelope) -> Result<(), DispatchError>,
{
    fn handle(&mut self, envelope: &Envelope) -> Result<(), DispatchError> {
        self(envelope)
    }
}

/// Runs an external command per envelope and logs what it printed.
#[derive(Debug, Clone)]
pub struct ProcessHandler {
    bridge: ExternalProcessBridge,
    command: HandlerCommand,
}

impl ProcessHandler {
    pub fn new(bridge: ExternalProcessBridge, command: HandlerCommand) -> Self {
        Self { bridge, command }
    }

    pub fn command(&self) -> &HandlerCommand {
        &self.command
    }
}

impl Handler for ProcessHandler {
    fn handle(&mut self, envelope: &Envelope) -> Result<(), DispatchError> {
        let result = self.bridge.invoke(envelope, &self.command)?;
        for line in result.stdout_lossy().lines() {
            info!(target: "zlmb::handler", "{line}");
        }
        for line in result.stderr_lossy().lines() {
            warn!(target: "zlmb::handler", "{line}");
        }
        Ok(())
    }
}

/// Prints the frame count, then each frame's length and raw bytes.
///
/// Used when no handler command is configured.
pub struct InspectHandler<W> {
    out: W,
}

impl<W: Write> InspectHandler<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Handler for InspectHandler<W> {
    fn handle(&mut self, envelope: &Envelope) -> Result<(), DispatchError> {
        let frames = envelope.frames()?;
        writeln!(self.out, "frames: {}", frames.len())?;
        for (index, frame) in frames.iter().enumerate() {
            writeln!(self.out, "frame[{index}] length: {}", frame.len())?;
            self.out.write_all(frame)?;
            writeln!(self.out)?;
        }
        self.out.flush()?;
        Ok(())
    }
}
