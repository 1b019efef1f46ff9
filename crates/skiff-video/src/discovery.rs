//! WS-Discovery probe for ONVIF cameras on the local segment.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::net::UdpSocket;
use tracing::{debug, info};

use crate::candidates::ONVIF_DEFAULT_PORT;

pub const DISCOVERY_GROUP: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(239, 255, 255, 250), 3702);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredCamera {
    pub host: String,
    #[serde(rename = "puerto")]
    pub port: u16,
    pub xaddrs: String,
}

/// SOAP Probe for NetworkVideoTransmitter devices.
pub fn probe_message(message_id: &str) -> String {
    format!(
        "<?xml version='1.0' encoding='UTF-8'?>\n\
<e:Envelope xmlns:e='http://www.w3.org/2003/05/soap-envelope'\n\
            xmlns:w='http://schemas.xmlsoap.org/ws/2004/08/addressing'\n\
            xmlns:d='http://schemas.xmlsoap.org/ws/2005/04/discovery'\n\
            xmlns:dn='http://www.onvif.org/ver10/network/wsdl'>\n\
  <e:Header>\n\
    <w:MessageID>{}</w:MessageID>\n\
    <w:To>urn:schemas-xmlsoap-org:ws:2005:04:discovery</w:To>\n\
    <w:Action>http://schemas.xmlsoap.org/ws/2005/04/discovery/Probe</w:Action>\n\
  </e:Header>\n\
  <e:Body>\n\
    <d:Probe>\n\
      <d:Types>dn:NetworkVideoTransmitter</d:Types>\n\
    </d:Probe>\n\
  </e:Body>\n\
</e:Envelope>",
        message_id
    )
}

/// Random-enough `uuid:` id built from the clock and pid.
fn message_id() -> String {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
    let pid = u128::from(std::process::id());
    let v = nanos ^ (pid << 64);
    format!(
        "uuid:{:08x}-{:04x}-4{:03x}-a{:03x}-{:012x}",
        (v >> 96) as u32,
        (v >> 80) as u16,
        (v >> 68) as u16 & 0xfff,
        (v >> 56) as u16 & 0xfff,
        v as u64 & 0xffff_ffff_ffff
    )
}

/// Text of the first `XAddrs` element, whatever its namespace prefix.
pub fn parse_xaddrs(reply: &str) -> Option<String> {
    for (i, _) in reply.match_indices("XAddrs") {
        let Some(open) = reply[..i].rfind('<') else {
            continue;
        };
        if reply[open..i].contains('>') || reply[open + 1..].starts_with('/') {
            continue;
        }
        let body = &reply[i..];
        let start = body.find('>')? + 1;
        let end = body[start..].find('<')?;
        let text = body[start..start + end].trim();
        if !text.is_empty() {
            return Some(text.to_string());
        }
    }
    None
}

/// Explicit port of the first service URL, or the usual ONVIF port.
pub fn port_from_xaddrs(xaddrs: &str) -> u16 {
    let Some(idx) = xaddrs.find("://") else {
        return ONVIF_DEFAULT_PORT;
    };
    let authority = xaddrs[idx + 3..].split(|c: char| c == '/' || c.is_whitespace()).next().unwrap_or("");
    authority
        .rsplit_once(':')
        .and_then(|(_, port)| port.parse().ok())
        .unwrap_or(ONVIF_DEFAULT_PORT)
}

/// Folds replies into one entry per responding host. Later replies win.
pub fn collect_replies<'a>(replies: impl IntoIterator<Item = (SocketAddr, &'a str)>) -> Vec<DiscoveredCamera> {
    let mut by_host = BTreeMap::new();
    for (from, text) in replies {
        let host = from.ip().to_string();
        let xaddrs = parse_xaddrs(text).unwrap_or_default();
        let port = port_from_xaddrs(&xaddrs);
        by_host.insert(host.clone(), DiscoveredCamera { host, port, xaddrs });
    }
    by_host.into_values().collect()
}

/// Multicasts one probe and gathers replies until `wait` elapses.
pub async fn discover(wait: Duration) -> Result<Vec<DiscoveredCamera>> {
    let socket = UdpSocket::bind("0.0.0.0:0").await.context("bind discovery socket")?;
    socket.set_multicast_ttl_v4(1).context("set multicast ttl")?;
    socket
        .send_to(probe_message(&message_id()).as_bytes(), DISCOVERY_GROUP)
        .await
        .with_context(|| format!("send probe to {}", DISCOVERY_GROUP))?;

    let deadline = tokio::time::Instant::now() + wait;
    let mut replies = Vec::new();
    let mut buf = vec![0u8; 8192];
    loop {
        match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, from))) => {
                debug!("discovery: {} bytes from {}", len, from);
                replies.push((from, String::from_utf8_lossy(&buf[..len]).into_owned()));
            }
            Ok(Err(e)) => {
                debug!("discovery: receive failed: {}", e);
                break;
            }
            Err(_) => break,
        }
    }

    let found = collect_replies(replies.iter().map(|(from, text)| (*from, text.as_str())));
    info!("discovery: {} ONVIF device(s) answered", found.len());
    Ok(found)
}
