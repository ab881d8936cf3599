use std::net::{IpAddr, UdpSocket};

use tracing::warn;

const FALLBACK_HOST: &str = "127.0.0.1";

/// Address to advertise to remote clients for a server bound to `bind_host`.
pub fn advertised_host(bind_host: &str) -> String {
    if !is_wildcard(bind_host) {
        return bind_host.to_string();
    }
    match default_route_ip() {
        Some(ip) => ip.to_string(),
        None => {
            warn!("could not determine a LAN address, advertising {FALLBACK_HOST}");
            FALLBACK_HOST.to_string()
        }
    }
}

fn is_wildcard(host: &str) -> bool {
    host.parse::<IpAddr>().is_ok_and(|ip| ip.is_unspecified())
}

/// Local address of the interface on the default route. Connecting a UDP
/// socket sends nothing.
fn default_route_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified() && !ip.is_loopback()).then_some(ip)
}

/// Startup text shown on the operator's terminal.
pub fn render(url: &str, token: &str, show_qr: bool) -> String {
    let mut out = String::new();
    out.push('\n');
    out.push_str("  \x1b[1mremotecc relay ready\x1b[0m\n\n");
    if show_qr {
        match qr2term::generate_qr_string(url) {
            Ok(qr) => out.push_str(&qr),
            Err(e) => out.push_str(&format!("  (QR code rendering failed: {e})\n")),
        }
        out.push('\n');
    }
    out.push_str(&format!("  Connect: {url}\n"));
    out.push_str(&format!("  Token:   {token}\n\n"));
    out
}
