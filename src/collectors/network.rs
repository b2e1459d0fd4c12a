use crate::config::NetworkProbeConfig;
use crate::error::{ProbeStage, TelemetryError};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use tracing::{debug, warn};

pub const LOOPBACK_FALLBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

pub fn discover_outbound_ip(cfg: &NetworkProbeConfig) -> Result<IpAddr, TelemetryError> {
    let target = resolve_target(&cfg.target_host, cfg.target_port)?;
    let timeout = cfg.timeout();

    let stream = TcpStream::connect_timeout(&target, timeout).map_err(|source| {
        TelemetryError::NetworkProbe {
            stage: ProbeStage::Connect,
            source,
        }
    })?;

    let option_err = |source| TelemetryError::NetworkProbe {
        stage: ProbeStage::SocketOption,
        source,
    };
    stream.set_nodelay(true).map_err(option_err)?;
    stream.set_read_timeout(Some(timeout)).map_err(option_err)?;
    stream.set_write_timeout(Some(timeout)).map_err(option_err)?;

    let local = stream
        .local_addr()
        .map_err(|source| TelemetryError::NetworkProbe {
            stage: ProbeStage::LocalAddress,
            source,
        })?;

    if let Err(err) = stream.shutdown(Shutdown::Both) {
        debug!(error = %err, "shutdown after probe failed");
    }
    Ok(local.ip())
}

pub fn outbound_ip_or_loopback(cfg: &NetworkProbeConfig) -> IpAddr {
    match discover_outbound_ip(cfg) {
        Ok(ip) => ip,
        Err(err) => {
            warn!(
                target_host = %cfg.target_host,
                target_port = cfg.target_port,
                error = %err,
                "не удалось определить внешний IP, возвращаю localhost"
            );
            LOOPBACK_FALLBACK
        }
    }
}

fn resolve_target(host: &str, port: u16) -> Result<SocketAddr, TelemetryError> {
    let resolve_err = |source| TelemetryError::NetworkProbe {
        stage: ProbeStage::Resolve,
        source,
    };
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(resolve_err)?
        .collect();

    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| {
            resolve_err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{host} не разрешается ни в один адрес"),
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn probe_cfg(host: &str, port: u16) -> NetworkProbeConfig {
        NetworkProbeConfig {
            target_host: host.to_string(),
            target_port: port,
            timeout_ms: 2_000,
        }
    }

    #[test]
    fn reports_local_end_of_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("local addr").port();

        let ip = discover_outbound_ip(&probe_cfg("127.0.0.1", port)).expect("probe");
        assert_eq!(ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn refused_connection_reports_connect_stage() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().expect("local addr").port()
        };

        let err = discover_outbound_ip(&probe_cfg("127.0.0.1", port)).expect_err("порт закрыт");
        assert!(matches!(
            err,
            TelemetryError::NetworkProbe {
                stage: ProbeStage::Connect,
                ..
            }
        ));
    }

    #[test]
    fn unresolvable_host_reports_resolve_stage() {
        let err = discover_outbound_ip(&probe_cfg("hosttel-probe.invalid", 80))
            .expect_err(".invalid не резолвится");
        assert!(matches!(
            err,
            TelemetryError::NetworkProbe {
                stage: ProbeStage::Resolve,
                ..
            }
        ));
    }

    #[test]
    fn unreachable_target_falls_back_to_loopback() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().expect("local addr").port()
        };

        let ip = outbound_ip_or_loopback(&probe_cfg("127.0.0.1", port));
        assert_eq!(ip.to_string(), "127.0.0.1");
    }
}
