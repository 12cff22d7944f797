use super::{Module, ModuleCore, ModuleInfo};
use crate::engine::{run_pool, PoolConfig};
use crate::errors::ModuleError;
use crate::lists;
use crate::model::{ListCheck, OptionSet, ResultTable, RunOutput};
use async_trait::async_trait;
use ipnetwork::IpNetwork;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const DEFAULT_THREADS: usize = 200;
const BANNER_WAIT: Duration = Duration::from_secs(2);
const HTTP_BANNER_TIMEOUT: Duration = Duration::from_secs(3);
/// Smallest prefix accepted for CIDR expansion (65536 hosts).
const MIN_V4_PREFIX: u8 = 16;
const MIN_V6_PREFIX: u8 = 112;

pub struct PortScanner {
    core: ModuleCore,
}

impl PortScanner {
    pub fn new() -> Self {
        let options = OptionSet::new()
            .add_list("TARGETS", ListCheck::Any, true, "Hosts, IPs or CIDR blocks, comma separated or a file path")
            .add_ports("PORTS", true, "Ports to scan, e.g. 22,80,8000-8100")
            .add_int("TIMEOUT", 1, false, "Connect timeout in seconds")
            .add_int("THREADS", DEFAULT_THREADS as i64, false, "Number of concurrent probes")
            .add_flag("ENABLE_UDP", false, "Also send a UDP probe to every port")
            .add_int("RATE_LIMIT", 100, false, "Maximum probes per second per worker, 0 for unlimited");

        Self {
            core: ModuleCore::new(
                ModuleInfo {
                    name: "Port Scanner",
                    author: "Luca Cuzzolin",
                    description: "TCP port scanner with banner grabbing and optional UDP probes",
                    prompt: "portscanner",
                },
                options,
            ),
        }
    }
}

impl Default for PortScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct PortHit {
    host: String,
    port: u16,
    proto: Protocol,
    banner: String,
}

#[derive(Debug, Serialize)]
struct HostReport {
    ip: String,
    open_ports: BTreeMap<u16, String>,
    protocols: BTreeMap<u16, Protocol>,
}

struct ScanSettings {
    connect_timeout: Duration,
    udp: bool,
    http: reqwest::Client,
}

/// Expand CIDR blocks into hosts; anything else is passed through as a host name.
fn expand_targets(targets: &[String]) -> Result<Vec<String>, ModuleError> {
    let mut seen = HashSet::new();
    let mut hosts = Vec::new();
    let mut push = |host: String| {
        if seen.insert(host.clone()) {
            hosts.push(host);
        }
    };

    for target in targets.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        if !target.contains('/') {
            push(target.to_string());
            continue;
        }
        match target.parse::<IpNetwork>() {
            Ok(IpNetwork::V4(net)) => {
                if net.prefix() < MIN_V4_PREFIX {
                    return Err(ModuleError::setup(format!(
                        "too many targets in CIDR {net}, smallest prefix is /{MIN_V4_PREFIX}"
                    )));
                }
                for ip in net.iter() {
                    if ip == Ipv4Addr::LOCALHOST || ip.is_link_local() {
                        continue;
                    }
                    push(ip.to_string());
                }
            }
            Ok(IpNetwork::V6(net)) => {
                if net.prefix() < MIN_V6_PREFIX {
                    return Err(ModuleError::setup(format!(
                        "too many targets in CIDR {net}, smallest prefix is /{MIN_V6_PREFIX}"
                    )));
                }
                for ip in net.iter() {
                    push(ip.to_string());
                }
            }
            Err(_) => push(target.to_string()),
        }
    }
    Ok(hosts)
}

fn bracketed(host: &str) -> String {
    if host.contains(':') {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}

async fn http_banner(client: &reqwest::Client, host: &str, port: u16) -> String {
    let url = format!("http://{}:{port}/", bracketed(host));
    match client.get(&url).send().await {
        Ok(resp) => format!("HTTP {}", resp.status()),
        Err(_) => String::new(),
    }
}

async fn probe_tcp(host: &str, port: u16, settings: &ScanSettings) -> Option<PortHit> {
    let mut stream = timeout(settings.connect_timeout, TcpStream::connect((host, port)))
        .await
        .ok()?
        .ok()?;

    let mut buf = [0u8; 1024];
    let mut banner = match timeout(BANNER_WAIT, stream.read(&mut buf)).await {
        Ok(Ok(n)) if n > 0 => String::from_utf8_lossy(&buf[..n]).trim().to_string(),
        _ => String::new(),
    };
    drop(stream);

    if banner.is_empty() {
        banner = http_banner(&settings.http, host, port).await;
    }
    Some(PortHit {
        host: host.to_string(),
        port,
        proto: Protocol::Tcp,
        banner,
    })
}

async fn probe_udp(host: &str, port: u16, settings: &ScanSettings) -> Option<PortHit> {
    let bind = if host.contains(':') { "[::]:0" } else { "0.0.0.0:0" };
    let socket = UdpSocket::bind(bind).await.ok()?;
    socket.connect((host, port)).await.ok()?;
    socket.send(&[0u8]).await.ok()?;

    let mut buf = [0u8; 1024];
    let banner = match timeout(settings.connect_timeout, socket.recv(&mut buf)).await {
        Ok(Ok(_)) => "[responded]",
        _ => "[no response]",
    };
    Some(PortHit {
        host: host.to_string(),
        port,
        proto: Protocol::Udp,
        banner: banner.to_string(),
    })
}

fn host_reports(hits: &[PortHit]) -> Vec<HostReport> {
    let mut by_host: BTreeMap<&str, HostReport> = BTreeMap::new();
    for hit in hits {
        let report = by_host.entry(hit.host.as_str()).or_insert_with(|| HostReport {
            ip: hit.host.clone(),
            open_ports: BTreeMap::new(),
            protocols: BTreeMap::new(),
        });
        report.open_ports.insert(hit.port, hit.banner.clone());
        report.protocols.insert(hit.port, hit.proto);
    }
    by_host.into_values().collect()
}

#[async_trait]
impl Module for PortScanner {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    async fn execute(&self, opts: OptionSet, cancel: CancellationToken) -> Result<RunOutput, ModuleError> {
        let hosts = expand_targets(&opts.list("TARGETS"))?;
        let ports = lists::parse_ports(&opts.text("PORTS"));
        let secs = opts.int("TIMEOUT").filter(|s| *s > 0).unwrap_or(1) as u64;
        let pool = PoolConfig::new(opts.int("THREADS"), DEFAULT_THREADS).with_rate_limit(opts.int("RATE_LIMIT"));

        let http = reqwest::Client::builder()
            .timeout(HTTP_BANNER_TIMEOUT)
            .connect_timeout(Duration::from_secs(secs))
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| ModuleError::setup(format!("failed to build HTTP client: {e}")))?;
        let settings = Arc::new(ScanSettings {
            connect_timeout: Duration::from_secs(secs),
            udp: opts.flag("ENABLE_UDP"),
            http,
        });

        let probes: Vec<(Arc<str>, u16)> = hosts
            .iter()
            .map(|h| Arc::<str>::from(h.as_str()))
            .flat_map(|host| ports.iter().map(move |&p| (host.clone(), p)))
            .collect();
        debug!(hosts = hosts.len(), ports = ports.len(), probes = probes.len(), "port scan");

        let hits = run_pool(probes, pool, &cancel, move |(host, port)| {
            let settings = settings.clone();
            async move {
                let mut found = Vec::new();
                if let Some(hit) = probe_tcp(&host, port, &settings).await {
                    found.push(hit);
                }
                if settings.udp {
                    if let Some(hit) = probe_udp(&host, port, &settings).await {
                        found.push(hit);
                    }
                }
                found
            }
        })
        .await;

        let rows = hits
            .iter()
            .map(|h| vec![h.host.clone(), format!("{}/{}", h.port, h.proto.as_str()), h.banner.clone()])
            .collect();
        RunOutput::table(ResultTable::new(rows)).with_records(&host_reports(&hits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[test]
    fn cidr_blocks_expand_and_skip_loopback() {
        let hosts = expand_targets(&["10.0.0.0/30".into(), "10.0.0.1".into(), "example.com".into()]).unwrap();
        assert_eq!(hosts, vec!["10.0.0.0", "10.0.0.1", "10.0.0.2", "10.0.0.3", "example.com"]);

        let hosts = expand_targets(&["127.0.0.0/30".into()]).unwrap();
        assert_eq!(hosts, vec!["127.0.0.0", "127.0.0.2", "127.0.0.3"]);
    }

    #[test]
    fn oversized_cidr_is_a_setup_error() {
        assert!(matches!(expand_targets(&["10.0.0.0/8".into()]), Err(ModuleError::Setup(_))));
    }

    #[tokio::test]
    async fn open_port_reports_banner_and_closed_port_is_skipped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let _ = sock.write_all(b"SSH-2.0-test\r\n").await;
            }
        });

        let closed = {
            let tmp = TcpListener::bind("127.0.0.1:0").await.unwrap();
            tmp.local_addr().unwrap().port()
        };

        let scanner = PortScanner::new();
        scanner.set("TARGETS", "127.0.0.1").unwrap();
        scanner.set("PORTS", &format!("{open},{closed}")).unwrap();
        scanner.set("RATE_LIMIT", "0").unwrap();

        let table = scanner.run(CancellationToken::new()).await;
        assert_eq!(
            table.rows,
            vec![vec!["127.0.0.1".to_string(), format!("{open}/tcp"), "SSH-2.0-test".to_string()]]
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.json");
        scanner.save(&path).unwrap();
        let saved: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved[0]["ip"], "127.0.0.1");
        assert_eq!(saved[0]["open_ports"][open.to_string()], "SSH-2.0-test");
        assert_eq!(saved[0]["protocols"][open.to_string()], "tcp");
    }
}
