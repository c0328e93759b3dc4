//! Debounced UDP command dispatch.
//!
//! Commands go out as single unicast datagrams: the payload is the uppercase command name, with no
//! framing, acknowledgment or sequence numbers. Datagrams may be lost, duplicated or reordered, so
//! the receiving actuator has to treat repeated commands as idempotent.
//!
//! Dispatch never fails the control loop. A stalled or unreachable network is logged and reported
//! as [`DispatchOutcome::Failed`], and the loop moves on to the next frame; there is no retry and
//! no queueing.

use std::io;
use std::net::UdpSocket;
use std::time::Duration;

use crate::classify::Command;
use crate::config::NetworkEndpoint;

/// Controls when a classified command is actually transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchPolicy {
    /// Transmit only when the command differs from the previously dispatched one (the default).
    #[default]
    OnChange,
    /// Transmit every classified frame, repeats included.
    EveryFrame,
}

/// Result of a single [`CommandDispatcher::dispatch`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A datagram was handed to the network.
    Sent,
    /// Transmission was suppressed by the debounce policy.
    Suppressed,
    /// Transmission was attempted but failed; the error has been logged.
    Failed,
}

/// Sends [`Command`]s to a [`NetworkEndpoint`], deduplicating repeats.
///
/// The dispatcher owns the "last dispatched command" state and nothing else: every transmission
/// uses a fresh short-lived socket, so there is no connection state to keep consistent with the
/// (hot-swappable) endpoint.
pub struct CommandDispatcher {
    policy: DispatchPolicy,
    send_timeout: Duration,
    last_dispatched: Option<Command>,
}

impl CommandDispatcher {
    pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(250);

    pub fn new(policy: DispatchPolicy) -> Self {
        Self {
            policy,
            send_timeout: Self::DEFAULT_SEND_TIMEOUT,
            last_dispatched: None,
        }
    }

    /// Sets the per-datagram write timeout.
    #[must_use]
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// The command most recently handed to [`CommandDispatcher::dispatch`], whether or not its
    /// transmission succeeded.
    #[inline]
    pub fn last_dispatched(&self) -> Option<Command> {
        self.last_dispatched
    }

    /// Dispatches `command` to `endpoint`, subject to the debounce policy.
    pub fn dispatch(&mut self, command: Command, endpoint: &NetworkEndpoint) -> DispatchOutcome {
        if self.policy == DispatchPolicy::OnChange && self.last_dispatched == Some(command) {
            return DispatchOutcome::Suppressed;
        }
        self.send(command, endpoint)
    }

    /// Unconditionally transmits [`Command::Stop`], bypassing debounce.
    ///
    /// Used as a fail-safe when a session shuts down: even if STOP was the last command on the
    /// wire, one more copy is sent so the actuator does not keep driving on a stale command.
    pub fn dispatch_stop(&mut self, endpoint: &NetworkEndpoint) -> DispatchOutcome {
        self.send(Command::Stop, endpoint)
    }

    fn send(&mut self, command: Command, endpoint: &NetworkEndpoint) -> DispatchOutcome {
        // Debounce tracks *attempts*: a lost datagram is not retried, so recording the command
        // even on failure keeps us from re-sending it every frame against a dead network.
        self.last_dispatched = Some(command);

        match transmit(command, endpoint, self.send_timeout) {
            Ok(()) => {
                log::debug!("sent {command} to {}:{}", endpoint.host, endpoint.port);
                DispatchOutcome::Sent
            }
            Err(e) => {
                log::warn!(
                    "failed to send {command} to {}:{}: {e}",
                    endpoint.host,
                    endpoint.port
                );
                DispatchOutcome::Failed
            }
        }
    }
}

impl Default for CommandDispatcher {
    fn default() -> Self {
        Self::new(DispatchPolicy::default())
    }
}

fn transmit(command: Command, endpoint: &NetworkEndpoint, timeout: Duration) -> io::Result<()> {
    // One ephemeral socket per datagram; dropped (and closed) before returning.
    let socket = UdpSocket::bind(("0.0.0.0", 0))?;
    socket.set_write_timeout(Some(timeout))?;
    socket.send_to(
        command.as_str().as_bytes(),
        (endpoint.host.as_str(), endpoint.port),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Binds a local receiver and returns it along with an endpoint pointing at it.
    fn receiver() -> (UdpSocket, NetworkEndpoint) {
        let socket = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        let port = socket.local_addr().unwrap().port();
        (
            socket,
            NetworkEndpoint {
                host: "127.0.0.1".into(),
                port,
            },
        )
    }

    fn drain(socket: &UdpSocket) -> Vec<String> {
        let mut payloads = Vec::new();
        let mut buf = [0; 64];
        while let Ok((len, _)) = socket.recv_from(&mut buf) {
            payloads.push(String::from_utf8(buf[..len].to_vec()).unwrap());
        }
        payloads
    }

    #[test]
    fn debounce_suppresses_repeats() {
        let (socket, endpoint) = receiver();
        let mut dispatcher = CommandDispatcher::default();

        assert_eq!(
            dispatcher.dispatch(Command::Forward, &endpoint),
            DispatchOutcome::Sent
        );
        assert_eq!(
            dispatcher.dispatch(Command::Forward, &endpoint),
            DispatchOutcome::Suppressed
        );
        assert_eq!(
            dispatcher.dispatch(Command::Left, &endpoint),
            DispatchOutcome::Sent
        );

        assert_eq!(drain(&socket), ["FORWARD", "LEFT"]);
    }

    #[test]
    fn every_frame_policy_sends_repeats() {
        let (socket, endpoint) = receiver();
        let mut dispatcher = CommandDispatcher::new(DispatchPolicy::EveryFrame);

        dispatcher.dispatch(Command::Forward, &endpoint);
        dispatcher.dispatch(Command::Forward, &endpoint);

        assert_eq!(drain(&socket), ["FORWARD", "FORWARD"]);
    }

    #[test]
    fn stop_bypasses_debounce() {
        let (socket, endpoint) = receiver();
        let mut dispatcher = CommandDispatcher::default();

        dispatcher.dispatch(Command::Stop, &endpoint);
        // A regular STOP would be debounced now, but the fail-safe goes out regardless.
        assert_eq!(dispatcher.dispatch_stop(&endpoint), DispatchOutcome::Sent);

        assert_eq!(drain(&socket), ["STOP", "STOP"]);
    }

    #[test]
    fn failed_sends_still_debounce() {
        let endpoint = NetworkEndpoint {
            host: "".into(), // unresolvable
            port: 4210,
        };
        let mut dispatcher = CommandDispatcher::default();

        assert_eq!(
            dispatcher.dispatch(Command::Forward, &endpoint),
            DispatchOutcome::Failed
        );
        assert_eq!(dispatcher.last_dispatched(), Some(Command::Forward));
        // The attempt was recorded, so the repeat is suppressed instead of hammering a dead
        // network once per frame.
        assert_eq!(
            dispatcher.dispatch(Command::Forward, &endpoint),
            DispatchOutcome::Suppressed
        );
    }
}
