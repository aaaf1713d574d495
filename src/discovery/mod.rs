use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

use crate::registry::{CameraPatch, CameraRecord};
use crate::supervisor::FleetSupervisor;

const DEFAULT_RTSPS_PORT: &str = "8322";
const DEFAULT_MQTT_PORT: u16 = 8883;

/// A resolved service announcement from a camera node.
#[derive(Debug, Clone, PartialEq)]
pub struct Announcement {
    pub camera_id: String,
    pub name: String,
    pub node_type: String,
    pub capabilities: Vec<String>,
    pub stream_url: String,
    pub mqtt_port: u16,
    pub status: String,
    pub host: IpAddr,
    pub port: u16,
    /// Full service name; a later removal is correlated through it.
    pub source_name: String,
}

impl Announcement {
    /// Build an announcement from a resolved service's TXT records.
    ///
    /// The stream endpoint is either taken from `rtsp_url` (loopback hosts
    /// rewritten to the resolved address) or synthesized from the
    /// `rtsps_port`/`rtsp_path` convention.
    pub fn from_txt(
        source_name: &str,
        host: IpAddr,
        port: u16,
        properties: &HashMap<String, String>,
    ) -> crate::Result<Self> {
        let camera_id = properties
            .get("camera_id")
            .cloned()
            .or_else(|| source_name.split('.').next().map(str::to_string))
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                crate::FleetError::DiscoveryError(format!(
                    "announcement {} carries no camera id",
                    source_name
                ))
            })?;

        let name = properties
            .get("name")
            .cloned()
            .unwrap_or_else(|| format!("Camera {}", camera_id));
        let node_type = properties
            .get("node_type")
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());
        let capabilities: Vec<String> = properties
            .get("capabilities")
            .map(|caps| caps.split(',').map(|c| c.trim().to_string()).collect())
            .unwrap_or_else(|| vec!["streaming".to_string()]);

        let stream_url = match properties.get("rtsp_url") {
            Some(given) => rewrite_loopback(given, host)?,
            None => {
                let rtsps_port = properties
                    .get("rtsps_port")
                    .map(String::as_str)
                    .unwrap_or(DEFAULT_RTSPS_PORT);
                let mut path = properties
                    .get("rtsp_path")
                    .cloned()
                    .unwrap_or_else(|| camera_id.clone());
                if !path.starts_with('/') {
                    path.insert(0, '/');
                }
                match host {
                    IpAddr::V4(v4) => format!("rtsps://{}:{}{}", v4, rtsps_port, path),
                    IpAddr::V6(v6) => format!("rtsps://[{}]:{}{}", v6, rtsps_port, path),
                }
            }
        };

        let mqtt_port = properties
            .get("mqtt_port")
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_MQTT_PORT);
        let status = properties
            .get("status")
            .cloned()
            .unwrap_or_else(|| "discovered".to_string());

        Ok(Self {
            camera_id,
            name,
            node_type,
            capabilities,
            stream_url,
            mqtt_port,
            status,
            host,
            port,
            source_name: source_name.to_string(),
        })
    }

    pub fn to_record(&self) -> CameraRecord {
        let mut record = CameraRecord::new(&self.camera_id, &self.stream_url);
        record.name = self.name.clone();
        record.node_type = self.node_type.clone();
        record.capabilities = self.capabilities.clone();
        record.ip = Some(self.host);
        record.port = self.port;
        record.mqtt_port = self.mqtt_port;
        record.status = self.status.clone();
        record.source_name = self.source_name.clone();
        record.discovered_via = "mdns".to_string();
        record
    }
}

/// Rewrite a loopback host in a node-provided URL to its resolved address;
/// nodes routinely advertise the URL they use locally.
fn rewrite_loopback(raw: &str, host: IpAddr) -> crate::Result<String> {
    let mut url = Url::parse(raw).map_err(|e| {
        crate::FleetError::DiscoveryError(format!("invalid rtsp_url {}: {}", raw, e))
    })?;

    let is_loopback = match url.host() {
        Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(url::Host::Ipv4(v4)) => v4.is_loopback(),
        Some(url::Host::Ipv6(v6)) => v6.is_loopback(),
        None => false,
    };

    if is_loopback {
        url.set_ip_host(host).map_err(|_| {
            crate::FleetError::DiscoveryError(format!("cannot rewrite host of {}", raw))
        })?;
    }

    Ok(url.to_string())
}

/// Applies announcements and removals to the registry and the actor set.
pub struct Reconciler {
    supervisor: Arc<FleetSupervisor>,
}

impl Reconciler {
    pub fn new(supervisor: Arc<FleetSupervisor>) -> Self {
        Self { supervisor }
    }

    /// Add/resolve path. A re-announcement that changes nothing relevant
    /// only patches status and last_seen; everything else is a full
    /// registration where the newest announcement wins.
    pub async fn on_resolved(&self, announcement: Announcement) {
        let registry = self.supervisor.registry();
        let camera_id = announcement.camera_id.clone();

        let same_endpoint = registry
            .get(&camera_id)
            .map(|r| r.stream_url == announcement.stream_url)
            .unwrap_or(false);

        if same_endpoint && self.supervisor.has_live_actor(&camera_id) {
            let previous = registry.get(&camera_id).map(|r| r.status);
            registry.update(
                &camera_id,
                CameraPatch::new().status(announcement.status.clone()).touch(),
            );
            if previous.as_deref() != Some(announcement.status.as_str()) {
                info!("[mDNS] {} status: {}", camera_id, announcement.status);
            }
            return;
        }

        info!(
            "[mDNS] Registering camera {} ({}, type {}, caps [{}]) at {}:{}",
            camera_id,
            announcement.name,
            announcement.node_type,
            announcement.capabilities.join(", "),
            announcement.host,
            announcement.port
        );

        registry.upsert(announcement.to_record());
        self.supervisor
            .ensure_actor(&camera_id, &announcement.stream_url)
            .await;
    }

    /// Removal path: the record stays, marked offline, and the actor goes.
    pub async fn on_removed(&self, source_name: &str) {
        let registry = self.supervisor.registry();
        let Some(camera_id) = registry.find_by_source_name(source_name) else {
            debug!("[mDNS] Removal for unknown service {}", source_name);
            return;
        };

        if let Some(output) = self.supervisor.stop_actor(&camera_id).await {
            warn!(
                "[mDNS] in-flight recording {} for {} returned on removal ({} frames)",
                output.filename, camera_id, output.frames
            );
        }
        registry.mark_offline(&camera_id);
        info!("[mDNS] Camera {} marked offline", camera_id);
    }
}

/// Browses the fleet service type and feeds events to the reconciler from an
/// explicit receive loop.
pub struct MdnsBrowser {
    service_type: String,
}

impl MdnsBrowser {
    pub fn new(service_type: impl Into<String>) -> Self {
        Self {
            service_type: service_type.into(),
        }
    }

    pub async fn run(
        self,
        reconciler: Reconciler,
        mut shutdown: watch::Receiver<bool>,
    ) -> crate::Result<()> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| crate::FleetError::DiscoveryError(e.to_string()))?;
        let events = daemon
            .browse(&self.service_type)
            .map_err(|e| crate::FleetError::DiscoveryError(e.to_string()))?;

        info!("[mDNS] Discovery started for {}", self.service_type);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow_and_update() {
                        break;
                    }
                }
                event = events.recv_async() => match event {
                    Ok(ServiceEvent::ServiceResolved(info)) => {
                        handle_resolved(&reconciler, &info).await;
                    }
                    Ok(ServiceEvent::ServiceRemoved(_, fullname)) => {
                        info!("[mDNS] Service removed: {}", fullname);
                        reconciler.on_removed(&fullname).await;
                    }
                    Ok(ServiceEvent::ServiceFound(_, fullname)) => {
                        debug!("[mDNS] Discovered service: {}", fullname);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("[mDNS] Event channel closed: {}", e);
                        break;
                    }
                }
            }
        }

        if let Err(e) = daemon.shutdown() {
            warn!("[mDNS] Daemon shutdown failed: {}", e);
        }
        info!("[mDNS] Discovery stopped");
        Ok(())
    }
}

async fn handle_resolved(reconciler: &Reconciler, info: &ServiceInfo) {
    let properties: HashMap<String, String> = info
        .get_properties()
        .iter()
        .map(|p| (p.key().to_string(), p.val_str().to_string()))
        .collect();

    let Some(host) = info.get_addresses().iter().next().copied() else {
        warn!(
            "[mDNS] Failed to resolve service {}: no address",
            info.get_fullname()
        );
        return;
    };

    match Announcement::from_txt(info.get_fullname(), host, info.get_port(), &properties) {
        Ok(announcement) => reconciler.on_resolved(announcement).await,
        Err(e) => warn!(
            "[mDNS] Skipping announcement {}: {}",
            info.get_fullname(),
            e
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::registry::CameraRegistry;
    use crate::stream::test_utils::{ConnectOutcome, ReadOutcome, ScriptedSource};
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn host() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))
    }

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn full_name(id: &str) -> String {
        format!("{}._fleet-node._tcp.local.", id)
    }

    #[test]
    fn test_announcement_with_explicit_url() {
        let announcement = Announcement::from_txt(
            &full_name("cam-1"),
            host(),
            8322,
            &props(&[
                ("camera_id", "cam-1"),
                ("name", "Porch"),
                ("node_type", "motion"),
                ("capabilities", "streaming, motion"),
                ("rtsp_url", "rtsp://10.0.0.5:8554/porch"),
                ("mqtt_port", "8884"),
                ("status", "online"),
            ]),
        )
        .unwrap();

        assert_eq!(announcement.camera_id, "cam-1");
        assert_eq!(announcement.name, "Porch");
        assert_eq!(announcement.node_type, "motion");
        assert_eq!(announcement.capabilities, vec!["streaming", "motion"]);
        assert_eq!(announcement.stream_url, "rtsp://10.0.0.5:8554/porch");
        assert_eq!(announcement.mqtt_port, 8884);
        assert_eq!(announcement.status, "online");
    }

    #[test]
    fn test_announcement_rewrites_loopback() {
        let announcement = Announcement::from_txt(
            &full_name("cam-1"),
            host(),
            8322,
            &props(&[
                ("camera_id", "cam-1"),
                ("rtsp_url", "rtsp://127.0.0.1:8554/porch"),
            ]),
        )
        .unwrap();
        assert_eq!(announcement.stream_url, "rtsp://10.0.0.5:8554/porch");

        let announcement = Announcement::from_txt(
            &full_name("cam-1"),
            host(),
            8322,
            &props(&[
                ("camera_id", "cam-1"),
                ("rtsp_url", "rtsp://localhost:8554/porch"),
            ]),
        )
        .unwrap();
        assert_eq!(announcement.stream_url, "rtsp://10.0.0.5:8554/porch");
    }

    #[test]
    fn test_announcement_synthesizes_endpoint() {
        let announcement = Announcement::from_txt(
            &full_name("cam-1"),
            host(),
            8322,
            &props(&[("camera_id", "cam-1")]),
        )
        .unwrap();
        assert_eq!(announcement.stream_url, "rtsps://10.0.0.5:8322/cam-1");

        let announcement = Announcement::from_txt(
            &full_name("cam-1"),
            host(),
            8322,
            &props(&[
                ("camera_id", "cam-1"),
                ("rtsps_port", "9322"),
                ("rtsp_path", "front/door"),
            ]),
        )
        .unwrap();
        assert_eq!(announcement.stream_url, "rtsps://10.0.0.5:9322/front/door");
    }

    #[test]
    fn test_announcement_defaults() {
        let announcement =
            Announcement::from_txt(&full_name("cam-7"), host(), 8322, &props(&[])).unwrap();
        // camera_id falls back to the first label of the service name
        assert_eq!(announcement.camera_id, "cam-7");
        assert_eq!(announcement.name, "Camera cam-7");
        assert_eq!(announcement.node_type, "unknown");
        assert_eq!(announcement.capabilities, vec!["streaming"]);
        assert_eq!(announcement.status, "discovered");
        assert_eq!(announcement.mqtt_port, 8883);
    }

    #[test]
    fn test_announcement_rejects_bad_url() {
        let result = Announcement::from_txt(
            &full_name("cam-1"),
            host(),
            8322,
            &props(&[("camera_id", "cam-1"), ("rtsp_url", "::not a url::")]),
        );
        assert!(result.is_err());
    }

    fn test_reconciler(script: Vec<ConnectOutcome>) -> (Reconciler, Arc<FleetSupervisor>) {
        let mut config = Config::default();
        config.stream.actor_join_timeout_seconds = 1;
        let registry = Arc::new(CameraRegistry::new());
        let source = Arc::new(ScriptedSource::new(script));
        let supervisor = Arc::new(FleetSupervisor::new(&config, registry, source));
        (Reconciler::new(supervisor.clone()), supervisor)
    }

    fn announcement(id: &str, url: &str, status: &str) -> Announcement {
        Announcement::from_txt(
            &full_name(id),
            host(),
            8322,
            &props(&[
                ("camera_id", id),
                ("rtsp_url", url),
                ("status", status),
            ]),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_registers_and_starts_actor() {
        let (reconciler, supervisor) =
            test_reconciler(vec![ConnectOutcome::Serve(vec![ReadOutcome::Pend])]);

        reconciler
            .on_resolved(announcement("cam-1", "rtsp://10.0.0.5:8554/a", "online"))
            .await;

        let record = supervisor.registry().get("cam-1").unwrap();
        assert_eq!(record.status, "online");
        assert_eq!(record.discovered_via, "mdns");
        assert!(supervisor.has_live_actor("cam-1"));
        assert_eq!(
            supervisor.actor_endpoint("cam-1"),
            Some("rtsp://10.0.0.5:8554/a".to_string())
        );

        supervisor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reannouncement_patches_status_only() {
        let (reconciler, supervisor) =
            test_reconciler(vec![ConnectOutcome::Serve(vec![ReadOutcome::Pend])]);

        reconciler
            .on_resolved(announcement("cam-1", "rtsp://10.0.0.5:8554/a", "discovered"))
            .await;

        let mut update = announcement("cam-1", "rtsp://10.0.0.5:8554/a", "online");
        update.name = "Renamed".to_string();
        reconciler.on_resolved(update).await;

        let record = supervisor.registry().get("cam-1").unwrap();
        assert_eq!(record.status, "online");
        // Only status and last_seen are patched on a plain re-announcement
        assert_eq!(record.name, "Camera cam-1");

        supervisor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_endpoint_change_swaps_actor() {
        let (reconciler, supervisor) = test_reconciler(vec![
            ConnectOutcome::Serve(vec![ReadOutcome::Pend]),
            ConnectOutcome::Serve(vec![ReadOutcome::Pend]),
        ]);

        reconciler
            .on_resolved(announcement("cam-1", "rtsp://10.0.0.5:8554/a", "online"))
            .await;
        reconciler
            .on_resolved(announcement("cam-1", "rtsp://10.0.0.5:8554/b", "online"))
            .await;

        assert_eq!(
            supervisor.actor_endpoint("cam-1"),
            Some("rtsp://10.0.0.5:8554/b".to_string())
        );
        assert_eq!(supervisor.actor_retry_count("cam-1"), Some(0));
        assert_eq!(supervisor.registry().len(), 1);

        supervisor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_removal_marks_offline_and_stops_actor() {
        let (reconciler, supervisor) =
            test_reconciler(vec![ConnectOutcome::Serve(vec![ReadOutcome::Pend])]);

        reconciler
            .on_resolved(announcement("cam-1", "rtsp://10.0.0.5:8554/a", "online"))
            .await;
        assert!(supervisor.has_live_actor("cam-1"));

        reconciler.on_removed(&full_name("cam-1")).await;

        let registry = supervisor.registry();
        assert!(registry.is_offline("cam-1"));
        // Record remains for the dashboard; the actor is gone
        assert!(registry.get("cam-1").is_some());
        assert!(!supervisor.has_live_actor("cam-1"));
        assert_eq!(supervisor.actor_count(), 0);

        supervisor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_removal_of_unknown_service_is_noop() {
        let (reconciler, supervisor) = test_reconciler(vec![]);
        reconciler.on_removed(&full_name("ghost")).await;
        assert_eq!(supervisor.registry().len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_announcement_revives_halted_actor() {
        // Both connects fail instantly; with a retry limit of 1 the first
        // actor halts, and the re-announcement brings up a replacement.
        let mut config = Config::default();
        config.stream.max_connect_retries = 1;
        config.stream.actor_join_timeout_seconds = 1;
        let registry = Arc::new(CameraRegistry::new());
        let source = Arc::new(ScriptedSource::new(vec![]));
        let supervisor = Arc::new(FleetSupervisor::new(&config, registry, source.clone()));
        let reconciler = Reconciler::new(supervisor.clone());

        reconciler
            .on_resolved(announcement("cam-1", "rtsp://10.0.0.5:8554/a", "online"))
            .await;
        for _ in 0..100_000 {
            if !supervisor.has_live_actor("cam-1") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(!supervisor.has_live_actor("cam-1"));
        let attempts = source.connect_attempts();
        assert!(attempts >= 1);

        reconciler
            .on_resolved(announcement("cam-1", "rtsp://10.0.0.5:8554/a", "online"))
            .await;
        assert!(supervisor.has_live_actor("cam-1"));

        supervisor.shutdown().await;
    }
}
