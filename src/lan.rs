//! Vanilla LAN discovery announcements.

use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    sync::Arc,
};

use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::{
    config::{LanSettings, Properties},
    error::LanError,
    instance::InstanceStatus,
    supervisor::ProcessSupervisor,
    utils::is_containerized,
};

const DEFAULT_PORT: u16 = 25565;

/// Datagram body understood by the vanilla multiplayer screen.
pub fn discovery_payload(motd: &str, port: u16) -> String {
    format!("[MOTD]{motd}[/MOTD][AD]{port}[/AD]")
}

/// Motd and port advertised for an instance. Missing or unusable values
/// fall back to the instance name and the default port.
pub fn advertised(properties: Option<&Properties>, name: &str) -> (String, u16) {
    let motd = properties
        .and_then(|p| p.get("motd"))
        .filter(|m| !m.trim().is_empty())
        .unwrap_or(name)
        .to_string();
    let port = properties
        .and_then(|p| p.get_parsed::<u32>("server-port"))
        .filter(|p| (1..=65535).contains(p))
        .and_then(|p| u16::try_from(p).ok())
        .unwrap_or(DEFAULT_PORT);
    (motd, port)
}

pub struct LanAnnouncer {
    supervisor: Arc<ProcessSupervisor>,
    socket: UdpSocket,
    target: SocketAddr,
}

impl LanAnnouncer {
    pub async fn bind(
        supervisor: Arc<ProcessSupervisor>,
        settings: &LanSettings,
    ) -> Result<Self, LanError> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))
            .await
            .map_err(LanError::Socket)?;
        if settings.target.ip().is_multicast() {
            socket.set_multicast_ttl_v4(1).map_err(LanError::Socket)?;
        } else if settings.target.port() == 0 {
            return Err(LanError::Target(settings.target.to_string()));
        }

        if is_containerized() {
            warn!(
                target_addr = %settings.target,
                "running inside a container; LAN multicast usually does not reach the host network"
            );
        }

        Ok(Self {
            supervisor,
            socket,
            target: SocketAddr::V4(settings.target),
        })
    }

    /// Sends one datagram per Running, LAN-enabled instance and returns
    /// what was sent, keyed by instance name.
    pub async fn announce_once(&self) -> Vec<(String, String)> {
        let store = self.supervisor.store();
        let mut sent = Vec::new();

        for (name, info) in self.supervisor.get_server_processes().await {
            if info.status != InstanceStatus::Running {
                continue;
            }

            match store.configuration(&name).await {
                Ok(config) if config.lan_broadcast => {}
                Ok(_) => continue,
                Err(e) => {
                    debug!(instance = %name, error = %e, "configuration unreadable, LAN broadcast disabled");
                    continue;
                }
            }

            let Ok(Some(instance)) = store.get_instance(&name).await else {
                continue;
            };
            let properties = Properties::load(&instance.root_dir.join("server.properties"))
                .await
                .inspect_err(|e| debug!(instance = %name, error = %e, "using default motd and port"))
                .ok();
            let (motd, port) = advertised(properties.as_ref(), &name);

            let payload = discovery_payload(&motd, port);
            match self.socket.send_to(payload.as_bytes(), self.target).await {
                Ok(_) => sent.push((name, payload)),
                Err(e) => warn!(instance = %name, error = %e, "LAN announcement failed"),
            }
        }
        sent
    }
}
