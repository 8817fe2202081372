//! Host port relay supervision.
//!
//! Every published port becomes one long-lived `socat` child bridging
//! `{hostIP}:{hostPort}` into the container network namespace. TCP
//! relays fork a handler per accepted connection; UDP relays serve from
//! a single socket. The core records the relay pid in project state and
//! terminates it by signal; pids from a prior process are treated as
//! best-effort.

use std::net::IpAddr;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::capability::ProcessSupervisor;
use crate::error::{Error, Result};
use crate::state::PortForwardInfo;
use crate::types::{forward_id, PortMapping, Protocol};

/// The relay executable expected on the host
pub const RELAY_TOOL: &str = "socat";

/// Supervisor for the relay processes of one project
#[derive(Clone)]
pub struct PortForwarder {
    processes: Arc<dyn ProcessSupervisor>,
}

impl PortForwarder {
    /// Create a forwarder over the injected process capability
    pub fn new(processes: Arc<dyn ProcessSupervisor>) -> Self {
        Self { processes }
    }

    /// Verify the relay tool exists on the host
    pub fn check_available(&self) -> Result<()> {
        if self.processes.which(RELAY_TOOL) {
            Ok(())
        } else {
            Err(Error::RelayToolMissing {
                tool: RELAY_TOOL.to_string(),
            })
        }
    }

    /// Spawn one relay for a mapping and return its record.
    ///
    /// The caller persists the record; the pid inside it is only valid
    /// while this process is alive.
    pub fn establish(
        &self,
        service: &str,
        replica: u32,
        mapping: &PortMapping,
        target_ip: IpAddr,
    ) -> Result<PortForwardInfo> {
        self.check_available()?;

        let argv = relay_argv(mapping, target_ip);
        let pid = self.processes.spawn(&argv).map_err(|err| {
            Error::port_forwarding(format!(
                "relay for {mapping} (service `{service}` replica {replica}): {err}"
            ))
        })?;

        let id = forward_id(service, replica, mapping.protocol, mapping.host_port);
        info!(
            service,
            replica,
            forward = %id,
            pid,
            "port forward established"
        );
        Ok(PortForwardInfo {
            id,
            service_name: service.to_string(),
            replica_index: replica,
            host_ip: mapping.host_ip,
            host_port: mapping.host_port,
            target_ip,
            target_port: mapping.container_port,
            protocol: mapping.protocol,
            pid,
        })
    }

    /// Signal a recorded relay to terminate.
    ///
    /// A stale pid from a crashed prior process is signalled and ignored;
    /// the record is always safe to drop afterwards.
    pub fn terminate(&self, forward: &PortForwardInfo) {
        debug!(forward = %forward.id, pid = forward.pid, "terminating port forward");
        if let Err(err) = self.processes.terminate(forward.pid) {
            warn!(forward = %forward.id, error = %err, "port forward terminate failed");
        }
    }
}

/// The relay argv for one mapping.
///
/// TCP listens with `fork` so each connection gets its own handler; UDP
/// stays on the single listening socket.
fn relay_argv(mapping: &PortMapping, target_ip: IpAddr) -> Vec<String> {
    let listen = match mapping.protocol {
        Protocol::Tcp => format!(
            "TCP-LISTEN:{},bind={},fork,reuseaddr",
            mapping.host_port, mapping.host_ip
        ),
        Protocol::Udp => format!(
            "UDP-LISTEN:{},bind={},reuseaddr",
            mapping.host_port, mapping.host_ip
        ),
    };
    let connect = match mapping.protocol {
        Protocol::Tcp => format!("TCP:{}:{}", target_ip, mapping.container_port),
        Protocol::Udp => format!("UDP:{}:{}", target_ip, mapping.container_port),
    };
    vec![RELAY_TOOL.to_string(), listen, connect]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSupervisor {
        available: bool,
        spawned: Mutex<Vec<Vec<String>>>,
        terminated: Mutex<Vec<u32>>,
    }

    impl ProcessSupervisor for RecordingSupervisor {
        fn spawn(&self, argv: &[String]) -> Result<u32> {
            let mut spawned = self.spawned.lock().unwrap();
            spawned.push(argv.to_vec());
            Ok(4000 + spawned.len() as u32)
        }

        fn terminate(&self, pid: u32) -> Result<()> {
            self.terminated.lock().unwrap().push(pid);
            Ok(())
        }

        fn which(&self, _tool: &str) -> bool {
            self.available
        }
    }

    fn forwarder(available: bool) -> (Arc<RecordingSupervisor>, PortForwarder) {
        let supervisor = Arc::new(RecordingSupervisor {
            available,
            ..Default::default()
        });
        let forwarder = PortForwarder::new(Arc::clone(&supervisor) as Arc<dyn ProcessSupervisor>);
        (supervisor, forwarder)
    }

    #[test]
    fn test_missing_tool_is_a_clear_error() {
        let (_, forwarder) = forwarder(false);
        let mapping: PortMapping = "18080:80".parse().unwrap();
        assert!(matches!(
            forwarder.establish("web", 1, &mapping, "10.0.4.2".parse().unwrap()),
            Err(Error::RelayToolMissing { .. })
        ));
    }

    #[test]
    fn test_establish_records_deterministic_id() {
        let (supervisor, forwarder) = forwarder(true);
        let mapping: PortMapping = "18080:80".parse().unwrap();
        let forward = forwarder
            .establish("web", 1, &mapping, "10.0.4.2".parse().unwrap())
            .unwrap();

        assert_eq!(forward.id, "web#1#tcp#18080");
        assert_eq!(forward.target_port, 80);
        assert_eq!(forward.pid, 4001);

        let spawned = supervisor.spawned.lock().unwrap();
        assert_eq!(spawned.len(), 1);
        assert_eq!(spawned[0][0], "socat");
        assert_eq!(spawned[0][1], "TCP-LISTEN:18080,bind=0.0.0.0,fork,reuseaddr");
        assert_eq!(spawned[0][2], "TCP:10.0.4.2:80");
    }

    #[test]
    fn test_udp_relay_uses_single_socket() {
        let mapping: PortMapping = "127.0.0.1:1053:53/udp".parse().unwrap();
        let argv = relay_argv(&mapping, "10.0.4.3".parse().unwrap());
        assert_eq!(argv[1], "UDP-LISTEN:1053,bind=127.0.0.1,reuseaddr");
        assert_eq!(argv[2], "UDP:10.0.4.3:53");
        assert!(!argv[1].contains("fork"));
    }

    #[test]
    fn test_terminate_signals_recorded_pid() {
        let (supervisor, forwarder) = forwarder(true);
        let mapping: PortMapping = "18080:80".parse().unwrap();
        let forward = forwarder
            .establish("web", 1, &mapping, "10.0.4.2".parse().unwrap())
            .unwrap();
        forwarder.terminate(&forward);
        assert_eq!(*supervisor.terminated.lock().unwrap(), vec![forward.pid]);
    }
}
