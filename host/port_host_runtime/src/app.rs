//! The boundary to the opaque application: construction with init flags,
//! advertised ports, and the stream of outbound port messages.

use crate::config::InitPayload;
use crate::error::{HostError, Result};
use crate::protocol::{APP_TO_HOST_CAP, AppEnvelope, init_envelope, recv_envelope, send_envelope};
use serde_json::Value;
use std::io::{BufReader, Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct PortMessage {
    pub port: String,
    pub value: Value,
}

pub trait Application {
    type Instance: ApplicationInstance;

    /// Constructs the single live instance. Consumes the application so it
    /// cannot be started twice.
    fn start(self, payload: &InitPayload) -> Result<Self::Instance>;
}

pub trait ApplicationInstance {
    /// Names of the outbound ports this instance exposes.
    fn ports(&self) -> &[String];

    /// Blocks until the next outbound message. `Ok(None)` once the
    /// application has gone away.
    fn next_message(&mut self) -> Result<Option<PortMessage>>;
}

/// Owns the live application instance for the rest of the process.
pub struct AppHost<I> {
    instance: I,
}

impl<I: ApplicationInstance> AppHost<I> {
    pub fn start<A>(application: A, payload: &InitPayload) -> Result<Self>
    where
        A: Application<Instance = I>,
    {
        let instance = application.start(payload)?;
        info!(ports = ?instance.ports(), "application started");
        Ok(Self { instance })
    }

    pub fn instance(&self) -> &I {
        &self.instance
    }

    pub fn instance_mut(&mut self) -> &mut I {
        &mut self.instance
    }
}

/// An instance reached through a framed JSON byte stream.
pub struct StreamInstance<R, W> {
    reader: R,
    // Held so the application does not see EOF on its input while running.
    _writer: W,
    ports: Vec<String>,
    max_frame: usize,
}

impl<R: Read, W: Write> StreamInstance<R, W> {
    /// Sends the init flags and waits for the application to advertise its
    /// ports.
    pub fn handshake(
        mut reader: R,
        mut writer: W,
        payload: &InitPayload,
        max_frame: usize,
    ) -> Result<Self> {
        send_envelope(&mut writer, &init_envelope(payload.clone()))?;

        let ports = match recv_envelope(&mut reader, max_frame)? {
            Some(AppEnvelope::Ready { ports }) => ports,
            Some(AppEnvelope::Port { name, .. }) => {
                return Err(HostError::Handshake(format!(
                    "expected ready envelope, got message on port '{name}'"
                )));
            }
            None => {
                return Err(HostError::Handshake(
                    "application closed before ready".to_string(),
                ));
            }
        };

        Ok(Self {
            reader,
            _writer: writer,
            ports,
            max_frame,
        })
    }
}

impl<R: Read, W: Write> ApplicationInstance for StreamInstance<R, W> {
    fn ports(&self) -> &[String] {
        &self.ports
    }

    fn next_message(&mut self) -> Result<Option<PortMessage>> {
        loop {
            match recv_envelope(&mut self.reader, self.max_frame)? {
                Some(AppEnvelope::Port { name, value }) => {
                    return Ok(Some(PortMessage { port: name, value }));
                }
                Some(AppEnvelope::Ready { .. }) => {
                    warn!("application sent a second ready envelope; ignoring");
                }
                None => return Ok(None),
            }
        }
    }
}

/// Runs the application as a child process speaking the framed protocol
/// over its stdin/stdout. Its stderr is inherited.
pub struct ProcessApplication {
    command: Command,
    max_frame: usize,
}

impl ProcessApplication {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            max_frame: APP_TO_HOST_CAP,
        }
    }

    pub fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }
}

impl Application for ProcessApplication {
    type Instance = ProcessInstance;

    fn start(mut self, payload: &InitPayload) -> Result<ProcessInstance> {
        let mut child = self
            .command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(HostError::Spawn)?;
        debug!(pid = child.id(), "spawned application process");

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            kill_child(&mut child);
            return Err(HostError::Handshake(
                "application stdio was not captured".to_string(),
            ));
        };

        match StreamInstance::handshake(BufReader::new(stdout), stdin, payload, self.max_frame) {
            Ok(stream) => Ok(ProcessInstance { child, stream }),
            Err(err) => {
                kill_child(&mut child);
                Err(err)
            }
        }
    }
}

pub struct ProcessInstance {
    child: Child,
    stream: StreamInstance<BufReader<ChildStdout>, ChildStdin>,
}

impl ApplicationInstance for ProcessInstance {
    fn ports(&self) -> &[String] {
        self.stream.ports()
    }

    fn next_message(&mut self) -> Result<Option<PortMessage>> {
        self.stream.next_message()
    }
}

impl Drop for ProcessInstance {
    fn drop(&mut self) {
        kill_child(&mut self.child);
    }
}

fn kill_child(child: &mut Child) {
    match child.try_wait() {
        Ok(Some(status)) => debug!(%status, "application process already exited"),
        _ => {
            if let Err(err) = child.kill() {
                warn!("failed to stop application process: {err}");
            }
            if let Err(err) = child.wait() {
                warn!("failed to reap application process: {err}");
            }
        }
    }
}
