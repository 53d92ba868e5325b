//! Gateway network connections declared through indexed environment
//! variables (`GATEWAY_NETWORK_<i>_HOST`, ...).

use crate::config::{EnvSource, parse_bool, parse_number, string_var};
use crate::error::Result;

/// Port used when neither the port nor the SSL flag was given.
pub const DEFAULT_SSL_PORT: u16 = 8060;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayNetworkConnection {
    pub index: usize,
    pub host: String,
    pub port: Option<u16>,
    pub enable_ssl: bool,
    pub ping_rate: Option<u32>,
    pub enabled: Option<bool>,
}

impl GatewayNetworkConnection {
    /// Init-property records for this connection, in a stable order.
    pub fn properties(&self) -> Vec<(String, String)> {
        let prefix = format!("gateway.network.{}", self.index);
        let mut props = vec![(format!("{prefix}.Host"), self.host.clone())];
        if let Some(port) = self.port {
            props.push((format!("{prefix}.Port"), port.to_string()));
        }
        props.push((format!("{prefix}.EnableSSL"), self.enable_ssl.to_string()));
        if let Some(ping_rate) = self.ping_rate {
            props.push((format!("{prefix}.PingRate"), ping_rate.to_string()));
        }
        if let Some(enabled) = self.enabled {
            props.push((format!("{prefix}.Enabled"), enabled.to_string()));
        }
        props
    }
}

fn var_name(index: usize, field: &str) -> String {
    format!("GATEWAY_NETWORK_{index}_{field}")
}

/// Probe indices from 0 upward; the first index without a HOST ends
/// discovery, so a gap hides every later index.
pub fn discover(env: &dyn EnvSource) -> Result<Vec<GatewayNetworkConnection>> {
    let mut connections = Vec::new();
    for index in 0.. {
        let Some(host) = string_var(env, &var_name(index, "HOST")) else {
            break;
        };

        let explicit_ssl = parse_bool(env, &var_name(index, "ENABLESSL"))?;
        let explicit_port = parse_number::<u16>(env, &var_name(index, "PORT"))?;
        let port = match (explicit_port, explicit_ssl) {
            (Some(port), _) => Some(port),
            (None, None) => Some(DEFAULT_SSL_PORT),
            (None, Some(_)) => None,
        };

        connections.push(GatewayNetworkConnection {
            index,
            host,
            port,
            enable_ssl: explicit_ssl.unwrap_or(true),
            ping_rate: parse_number(env, &var_name(index, "PINGRATE"))?,
            enabled: parse_bool(env, &var_name(index, "ENABLED"))?,
        });
    }
    Ok(connections)
}
