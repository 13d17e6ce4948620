//! Listener composition: fans out one TCP sub-daemon per
//! configured TCP port and one UDP sub-daemon per configured UDP port,
//! starts and tears them down as a unit, and owns the process-wide
//! emergency lockdown flag.
//!
//! Each sub-daemon runs on its own thread; `start_and_block` joins all of
//! them and surfaces the first error any of them produced.

use std::net::{TcpStream, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use sockd_crypto::derive_key;

use crate::blacklist::SharedBlacklist;
use crate::config::DaemonConfig;
use crate::error::{SockError, SockResult};
use crate::logging::Logger;
use crate::stats::SharedStats;
use crate::tcp::TcpSubDaemon;
use crate::udp::UdpSubDaemon;

/// Per-`Daemon` lifecycle state: `New` -> `Initialise` ->
/// `Initialised` -> `StartAndBlock` -> `Running` -> `Stop` -> `Stopped`.
/// `Initialise` after `Stopped` is not supported.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum State {
    New,
    Initialised,
    Running,
    Stopped,
}

/// Timeout used for the dummy loopback connection/datagram `stop()` uses
/// to unblock a sub-daemon's blocking `accept`/`recv_from` call.
const WAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// Fans out the configured TCP/UDP ports into independent sub-daemons and
/// runs them to completion as a unit. Construction (`new`) never fails;
/// `initialise` performs the `ConfigInvalid` checks, and `start_and_block`
/// surfaces any `BindFailed`/`ResolveFailed` a sub-daemon produces.
pub struct Daemon {
    config: DaemonConfig,
    blacklist: SharedBlacklist,
    stats: SharedStats,
    log: Logger,
    lockdown: Arc<AtomicBool>,
    stop_once: Arc<AtomicBool>,
    state: Mutex<State>,
}

impl Daemon {
    pub fn new(config: DaemonConfig, blacklist: SharedBlacklist, stats: SharedStats, log: Logger) -> Daemon {
        Daemon {
            config,
            blacklist,
            stats,
            log,
            lockdown: Arc::new(AtomicBool::new(false)),
            stop_once: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(State::New),
        }
    }

    /// Validates the configuration (password length, at least one TCP
    /// port, a blacklist collaborator) and transitions
    /// `New` -> `Initialised`. The blacklist/stats collaborators are
    /// already required by the type system (`Daemon::new` takes owned
    /// trait objects), so only the port-list invariants are re-checked
    /// here; `DaemonConfig::from_file` already enforces the password
    /// length and per-IP-limit default on the way in.
    pub fn initialise(&self) -> SockResult<()> {
        let mut state = self.state.lock().expect("daemon state mutex poisoned");
        if *state != State::New {
            return Err(SockError::ConfigInvalid("daemon already initialised".into()));
        }

        if self.config.tcp_ports.is_empty() {
            return Err(SockError::ConfigInvalid("at least one TCP port is required".into()));
        }
        if self.config.tcp_ports.iter().any(|&p| p == 0) || self.config.udp_ports.iter().any(|&p| p == 0) {
            return Err(SockError::ConfigInvalid("listening ports must be non-zero".into()));
        }

        *state = State::Initialised;
        Ok(())
    }

    /// Spawns one thread per configured TCP port and one per configured
    /// UDP port, then blocks until every one of them has exited. Returns
    /// the first non-`LockedDown` error any sub-daemon produced (a bind
    /// or resolve failure), after signalling every other sub-daemon to
    /// stop.
    /// Returns `Ok(())` only when every sub-daemon exited via `Stop`.
    pub fn start_and_block(&self) -> SockResult<()> {
        {
            let mut state = self.state.lock().expect("daemon state mutex poisoned");
            if *state != State::Initialised {
                return Err(SockError::ConfigInvalid("daemon must be initialised before starting".into()));
            }
            *state = State::Running;
        }

        let derived_key = derive_key(self.config.password.as_bytes());

        let mut handles = Vec::new();

        for &port in &self.config.tcp_ports {
            let sub = TcpSubDaemon::new(
                self.config.address.clone(),
                port,
                derived_key,
                self.config.per_ip_limit,
                Arc::clone(&self.blacklist),
                Arc::clone(&self.stats),
                Arc::clone(&self.lockdown),
                self.log.clone(),
            );
            handles.push(thread::spawn(move || sub.run()));
        }

        for &port in &self.config.udp_ports {
            let sub = UdpSubDaemon::new(
                self.config.address.clone(),
                port,
                derived_key,
                self.config.per_ip_limit,
                Arc::clone(&self.blacklist),
                Arc::clone(&self.lockdown),
                self.log.clone(),
            );
            handles.push(thread::spawn(move || sub.run()));
        }

        let mut first_error = None;
        for handle in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(SockError::LockedDown)) => {}
                Ok(Err(err)) => {
                    self.lockdown();
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
                Err(_) => {
                    if first_error.is_none() {
                        first_error = Some(SockError::ConfigInvalid("sub-daemon thread panicked".into()));
                    }
                }
            }
        }

        *self.state.lock().expect("daemon state mutex poisoned") = State::Stopped;

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Signals every sub-daemon to stop and unblocks their pending
    /// `accept`/`recv_from` call with a dummy loopback connection/datagram
    /// per listening port. A second call is a no-op.
    pub fn stop(&self) {
        if self.stop_once.swap(true, Ordering::SeqCst) {
            return;
        }
        self.lockdown();

        let wake_host = if self.config.address == "0.0.0.0" || self.config.address.is_empty() {
            "127.0.0.1"
        } else {
            self.config.address.as_str()
        };

        for &port in &self.config.tcp_ports {
            let target = (wake_host, port)
                .to_socket_addrs()
                .ok()
                .and_then(|mut addrs| addrs.next());
            if let Some(target) = target {
                let _ = TcpStream::connect_timeout(&target, WAKE_TIMEOUT);
            }
        }

        for &port in &self.config.udp_ports {
            if let Ok(wake_socket) = UdpSocket::bind("0.0.0.0:0") {
                let _ = wake_socket.send_to(&[], (wake_host, port));
            }
        }
    }

    /// Raises the emergency lockdown flag without attempting to unblock
    /// any sub-daemon's pending I/O. A sub-daemon blocked in
    /// `accept`/`recv_from` only notices on its next inbound
    /// connection/datagram; pair with `stop()` for an immediate effect.
    pub fn lockdown(&self) {
        self.lockdown.store(true, Ordering::SeqCst);
    }

    /// Lowers the emergency lockdown flag. Sub-daemons that already
    /// observed the flag and exited cannot be resumed by this call alone;
    /// lifting lockdown only prevents *future* accept/recv iterations
    /// (on sub-daemons still running) from refusing new work.
    pub fn lift_lockdown(&self) {
        self.lockdown.store(false, Ordering::SeqCst);
    }

    pub fn is_locked_down(&self) -> bool {
        self.lockdown.load(Ordering::SeqCst)
    }
}
