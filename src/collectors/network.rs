use crate::collectors::chain::{Chain, Platform};
use crate::collectors::probe;
use crate::collectors::HostContext;
use crate::snapshot::{Interface, Network, Wifi};
use std::net::{IpAddr, Ipv4Addr};
use tracing::debug;

const AIRPORT: &str =
    "/System/Library/PrivateFrameworks/Apple80211.framework/Versions/Current/Resources/airport";

fn usable_ipv4(ip: &str) -> bool {
    ip.parse::<Ipv4Addr>().is_ok_and(|ip| !ip.is_loopback())
}

fn network_of(interfaces: Vec<Interface>) -> Option<Network> {
    (!interfaces.is_empty()).then_some(Network { interfaces })
}

/// `ip -o -4 addr show up`: `2: wlp3s0    inet 192.168.1.23/24 brd ...`.
pub fn parse_ip_addr(text: &str) -> Vec<Interface> {
    text.lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let inet = fields.iter().position(|f| *f == "inet")?;
            let name = fields.get(1)?.trim_end_matches(':');
            let ip = fields.get(inet + 1)?.split('/').next()?;
            (name != "lo" && usable_ipv4(ip)).then(|| Interface {
                name: name.to_string(),
                ip: ip.to_string(),
            })
        })
        .collect()
}

/// `ifconfig` in either the BSD or the net-tools layout; only interfaces
/// flagged UP and not LOOPBACK are kept.
pub fn parse_ifconfig(text: &str) -> Vec<Interface> {
    let mut out = Vec::new();
    let mut current: Option<(String, bool)> = None;
    for line in text.lines() {
        if !line.starts_with(char::is_whitespace) && !line.is_empty() {
            let name = line.split(':').next().unwrap_or_default().trim().to_string();
            let flags = line
                .split_once('<')
                .and_then(|(_, rest)| rest.split_once('>'))
                .map(|(flags, _)| flags)
                .unwrap_or_default();
            let flags: Vec<&str> = flags.split(',').collect();
            let usable = flags.contains(&"UP") && !flags.contains(&"LOOPBACK");
            current = Some((name, usable));
            continue;
        }
        let Some((name, true)) = &current else {
            continue;
        };
        let mut fields = line.split_whitespace();
        if fields.next() != Some("inet") {
            continue;
        }
        let Some(ip) = fields.next().map(|ip| ip.trim_start_matches("addr:")) else {
            continue;
        };
        if usable_ipv4(ip) {
            out.push(Interface {
                name: name.clone(),
                ip: ip.to_string(),
            });
        }
    }
    out
}

/// `alias|address` rows printed by the PowerShell probe.
pub fn parse_alias_rows(text: &str) -> Vec<Interface> {
    text.lines()
        .filter_map(|line| line.trim().split_once('|'))
        .filter(|(_, ip)| usable_ipv4(ip.trim()))
        .map(|(name, ip)| Interface {
            name: name.trim().to_string(),
            ip: ip.trim().to_string(),
        })
        .collect()
}

pub fn interfaces_chain(platform: Platform) -> Chain<Network> {
    let unix = platform.is_unix_like();
    Chain::new("network")
        .step_if(platform == Platform::Linux, "ip_addr", |host| {
            network_of(parse_ip_addr(&host.command(
                "ip",
                &["-o", "-4", "addr", "show", "up"],
            )?))
        })
        .step_if(unix, "ifconfig", |host| {
            network_of(parse_ifconfig(&host.command("ifconfig", &[])?))
        })
        .step_if(platform == Platform::Windows, "powershell", |host| {
            let out = host.command(
                "powershell",
                &[
                    "-NoProfile",
                    "-Command",
                    "Get-NetIPAddress -AddressFamily IPv4 | ForEach-Object { $_.InterfaceAlias + '|' + $_.IPAddress }",
                ],
            )?;
            network_of(parse_alias_rows(&out))
        })
}

/// RSSI in dBm to a 0..=100 quality figure.
pub fn rssi_to_percent(rssi: i32) -> u8 {
    ((rssi + 110) * 10 / 7).clamp(0, 100) as u8
}

pub fn band_from_channel(channel: u32) -> String {
    match channel {
        1..=14 => "2.4 GHz".to_string(),
        32..=177 => "5 GHz".to_string(),
        _ => String::new(),
    }
}

pub fn band_from_mhz(mhz: u32) -> String {
    match mhz {
        0 => String::new(),
        1..=2999 => "2.4 GHz".to_string(),
        3000..=5924 => "5 GHz".to_string(),
        _ => "6 GHz".to_string(),
    }
}

/// Wi-Fi generation from a radio type, MCS tag or link rate.
pub fn protocol_from_rate(text: &str) -> String {
    let lower = text.to_ascii_lowercase();
    if lower.contains("802.11be") || lower.contains("eht-mcs") {
        return "Wi-Fi 7 (802.11be)".to_string();
    }
    if lower.contains("802.11ax") || lower.contains("he-mcs") {
        return "Wi-Fi 6 (802.11ax)".to_string();
    }
    if lower.contains("802.11ac") || lower.contains("vht-mcs") {
        return "Wi-Fi 5 (802.11ac)".to_string();
    }
    if lower.contains("802.11n") || lower.contains(" mcs ") {
        return "Wi-Fi 4 (802.11n)".to_string();
    }
    let rate = lower
        .split_whitespace()
        .find_map(|token| token.parse::<f64>().ok());
    match rate {
        Some(r) if r >= 1000.0 => "Wi-Fi 6 (802.11ax)",
        Some(r) if r >= 400.0 => "Wi-Fi 5 (802.11ac)",
        Some(r) if r >= 100.0 => "Wi-Fi 4 (802.11n)",
        Some(r) if r >= 54.0 => "802.11g",
        Some(r) if r >= 11.0 => "802.11b",
        _ => "Unknown",
    }
    .to_string()
}

/// Splits an `nmcli -t` row on unescaped colons.
fn split_terse(line: &str) -> Vec<String> {
    let mut fields = vec![String::new()];
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let (Some(next), Some(field)) = (chars.next(), fields.last_mut()) {
                    field.push(next);
                }
            }
            ':' => fields.push(String::new()),
            other => {
                if let Some(field) = fields.last_mut() {
                    field.push(other);
                }
            }
        }
    }
    fields
}

/// Active row of `nmcli -t -f active,ssid,chan,rate,signal,security dev wifi`.
pub fn parse_nmcli(text: &str) -> Option<Wifi> {
    text.lines().map(split_terse).find_map(|fields| {
        if fields.len() < 6 || fields[0] != "yes" {
            return None;
        }
        let security = fields[5].trim();
        Some(Wifi {
            ssid: fields[1].clone(),
            frequency: fields[2]
                .trim()
                .parse()
                .map(band_from_channel)
                .unwrap_or_default(),
            protocol: protocol_from_rate(&fields[3]),
            strength: fields[4].trim().parse::<u8>().unwrap_or(0).min(100),
            security: if security.is_empty() || security == "--" {
                "Open".to_string()
            } else {
                security.to_string()
            },
        })
    })
}

/// Interface names from `iw dev`.
pub fn parse_iw_interfaces(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|l| l.trim().strip_prefix("Interface "))
        .map(|name| name.trim().to_string())
        .collect()
}

/// `iw dev <if> link`; `None` when not connected.
pub fn parse_iw_link(text: &str) -> Option<Wifi> {
    let fields = probe::parse_colon_fields(text);
    let ssid = fields.get("SSID").and_then(probe::non_empty)?;
    let mhz = fields
        .get("freq")
        .and_then(|f| probe::parse_f64_loose(f))
        .unwrap_or(0.0) as u32;
    let strength = fields
        .get("signal")
        .and_then(|s| s.split_whitespace().next())
        .and_then(|s| s.parse::<i32>().ok())
        .map(rssi_to_percent)
        .unwrap_or(0);
    let rate = fields
        .get("rx bitrate")
        .or_else(|| fields.get("tx bitrate"))
        .cloned()
        .unwrap_or_default();
    Some(Wifi {
        ssid,
        protocol: protocol_from_rate(&rate),
        frequency: band_from_mhz(mhz),
        security: String::new(),
        strength,
    })
}

fn iw(host: &HostContext) -> Option<Wifi> {
    let devices = host.command("iw", &["dev"])?;
    parse_iw_interfaces(&devices).into_iter().find_map(|name| {
        let link = host.command("iw", &["dev", &name, "link"])?;
        parse_iw_link(&link)
    })
}

/// `airport -I` on macOS.
pub fn parse_airport(text: &str) -> Option<Wifi> {
    let fields = probe::parse_colon_fields(text);
    let ssid = fields.get("SSID").and_then(probe::non_empty)?;
    let channel = fields
        .get("channel")
        .and_then(|c| c.split(',').next())
        .and_then(|c| c.trim().parse::<u32>().ok())
        .unwrap_or(0);
    let strength = fields
        .get("agrCtlRSSI")
        .and_then(|r| r.parse::<i32>().ok())
        .map(rssi_to_percent)
        .unwrap_or(0);
    Some(Wifi {
        ssid,
        protocol: protocol_from_rate(fields.get("lastTxRate").map_or("", String::as_str)),
        frequency: band_from_channel(channel),
        security: fields.get("link auth").cloned().unwrap_or_default(),
        strength,
    })
}

/// `netsh wlan show interfaces` on Windows.
pub fn parse_netsh(text: &str) -> Option<Wifi> {
    let fields = probe::parse_colon_fields(text);
    let ssid = fields.get("SSID").and_then(probe::non_empty)?;
    let radio = fields.get("Radio type").cloned().unwrap_or_default();
    let protocol = if radio.is_empty() {
        protocol_from_rate(fields.get("Receive rate (Mbps)").map_or("", String::as_str))
    } else {
        protocol_from_rate(&radio)
    };
    let channel = fields
        .get("Channel")
        .and_then(|c| c.parse::<u32>().ok())
        .unwrap_or(0);
    let strength = fields
        .get("Signal")
        .and_then(|s| s.trim_end_matches('%').parse::<u8>().ok())
        .unwrap_or(0)
        .min(100);
    Some(Wifi {
        ssid,
        protocol,
        frequency: band_from_channel(channel),
        security: fields.get("Authentication").cloned().unwrap_or_default(),
        strength,
    })
}

pub fn wifi_chain(platform: Platform) -> Chain<Wifi> {
    let linux = platform == Platform::Linux;
    Chain::new("wifi")
        .step_if(linux, "nmcli", |host| {
            let out = host.command(
                "nmcli",
                &["-t", "-f", "active,ssid,chan,rate,signal,security", "dev", "wifi"],
            )?;
            parse_nmcli(&out)
        })
        .step_if(linux, "iw", iw)
        .step_if(platform == Platform::MacOs, "airport", |host| {
            parse_airport(&host.command(AIRPORT, &["-I"])?)
        })
        .step_if(platform == Platform::Windows, "netsh", |host| {
            parse_netsh(&host.command("netsh", &["wlan", "show", "interfaces"])?)
        })
}

/// Asks each service in order for the caller's address; the first body that
/// parses as an IP address wins.
pub async fn public_ip(client: &reqwest::Client, services: &[String]) -> Option<String> {
    for url in services {
        let response = match client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                debug!(service = %url, status = %resp.status(), "public ip service refused");
                continue;
            }
            Err(err) => {
                debug!(service = %url, error = %err, "public ip service unreachable");
                continue;
            }
        };
        match response.text().await {
            Ok(body) => {
                let body = body.trim();
                if body.parse::<IpAddr>().is_ok() {
                    return Some(body.to_string());
                }
                debug!(service = %url, "public ip service returned no address");
            }
            Err(err) => debug!(service = %url, error = %err, "public ip body unreadable"),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;

    #[test]
    fn ip_addr_rows_skip_loopback() {
        let text = "1: lo    inet 127.0.0.1/8 scope host lo\\       valid_lft forever preferred_lft forever\n\
                    2: wlp3s0    inet 192.168.1.23/24 brd 192.168.1.255 scope global dynamic wlp3s0\\       valid_lft 3412sec\n\
                    5: docker0    inet 172.17.0.1/16 brd 172.17.255.255 scope global docker0\n";
        let interfaces = parse_ip_addr(text);
        assert_eq!(
            interfaces,
            vec![
                Interface {
                    name: "wlp3s0".to_string(),
                    ip: "192.168.1.23".to_string()
                },
                Interface {
                    name: "docker0".to_string(),
                    ip: "172.17.0.1".to_string()
                },
            ]
        );
    }

    #[test]
    fn ifconfig_keeps_up_non_loopback() {
        let text = "lo0: flags=8049<UP,LOOPBACK,RUNNING,MULTICAST> mtu 16384\n\
                    \tinet 127.0.0.1 netmask 0xff000000\n\
                    en0: flags=8863<UP,BROADCAST,SMART,RUNNING,SIMPLEX,MULTICAST> mtu 1500\n\
                    \tinet6 fe80::1c2b:3aff:fe4d:5e6f%en0 prefixlen 64 scopeid 0x6\n\
                    \tinet 10.0.0.12 netmask 0xffffff00 broadcast 10.0.0.255\n\
                    en1: flags=8822<BROADCAST,SMART,SIMPLEX,MULTICAST> mtu 1500\n\
                    \tinet 10.9.9.9 netmask 0xffffff00\n";
        assert_eq!(
            parse_ifconfig(text),
            vec![Interface {
                name: "en0".to_string(),
                ip: "10.0.0.12".to_string()
            }]
        );
    }

    #[test]
    fn rssi_scale_is_clamped() {
        assert_eq!(rssi_to_percent(-40), 100);
        assert_eq!(rssi_to_percent(-60), 71);
        assert_eq!(rssi_to_percent(-120), 0);
    }

    #[test]
    fn protocol_prefers_explicit_markers_over_rate() {
        assert_eq!(protocol_from_rate("866.7 MBit/s VHT-MCS 9 80MHz"), "Wi-Fi 5 (802.11ac)");
        assert_eq!(protocol_from_rate("1201.0 MBit/s 80MHz HE-MCS 11"), "Wi-Fi 6 (802.11ax)");
        assert_eq!(protocol_from_rate("802.11n"), "Wi-Fi 4 (802.11n)");
        assert_eq!(protocol_from_rate("270 Mbit/s"), "Wi-Fi 4 (802.11n)");
        assert_eq!(protocol_from_rate("54 Mbit/s"), "802.11g");
        assert_eq!(protocol_from_rate(""), "Unknown");
    }

    #[test]
    fn nmcli_active_row_with_escaped_ssid() {
        let text = "no:Neighbour:6:130 Mbit/s:40:WPA2\n\
                    yes:Cafe\\:Guest:44:540 Mbit/s:82:WPA2 WPA3\n";
        let wifi = parse_nmcli(text).unwrap();
        assert_eq!(wifi.ssid, "Cafe:Guest");
        assert_eq!(wifi.frequency, "5 GHz");
        assert_eq!(wifi.protocol, "Wi-Fi 5 (802.11ac)");
        assert_eq!(wifi.strength, 82);
        assert_eq!(wifi.security, "WPA2 WPA3");
        assert!(parse_nmcli("no:Other:1:54 Mbit/s:20:\n").is_none());
    }

    #[test]
    fn iw_link_output() {
        let devices = "phy#0\n\tInterface wlp3s0\n\t\tifindex 3\n\t\ttype managed\n";
        assert_eq!(parse_iw_interfaces(devices), vec!["wlp3s0"]);

        let link = "Connected to aa:bb:cc:dd:ee:ff (on wlp3s0)\n\tSSID: home\n\tfreq: 5180.0\n\
                    \tsignal: -52 dBm\n\trx bitrate: 866.7 MBit/s VHT-MCS 9 80MHz short GI VHT-NSS 2\n";
        let wifi = parse_iw_link(link).unwrap();
        assert_eq!(wifi.ssid, "home");
        assert_eq!(wifi.frequency, "5 GHz");
        assert_eq!(wifi.strength, 82);
        assert_eq!(wifi.protocol, "Wi-Fi 5 (802.11ac)");
        assert!(parse_iw_link("Not connected.\n").is_none());
    }

    #[test]
    fn netsh_interfaces() {
        let text = "    Name                   : Wi-Fi\n    SSID                   : office\n\
                    \x20   BSSID                  : 11:22:33:44:55:66\n    Radio type             : 802.11ax\n\
                    \x20   Authentication         : WPA2-Personal\n    Channel                : 6\n\
                    \x20   Signal                 : 93%\n";
        let wifi = parse_netsh(text).unwrap();
        assert_eq!(wifi.ssid, "office");
        assert_eq!(wifi.protocol, "Wi-Fi 6 (802.11ax)");
        assert_eq!(wifi.frequency, "2.4 GHz");
        assert_eq!(wifi.strength, 93);
        assert_eq!(wifi.security, "WPA2-Personal");
    }

    #[tokio::test]
    async fn public_ip_skips_failing_services() {
        let app = Router::new()
            .route("/html", get(|| async { "<html>busy</html>" }))
            .route("/ip", get(|| async { "203.0.113.7\n" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let services = vec![
            "http://127.0.0.1:1/".to_string(),
            format!("http://{addr}/missing"),
            format!("http://{addr}/html"),
            format!("http://{addr}/ip"),
        ];
        let client = reqwest::Client::new();
        assert_eq!(public_ip(&client, &services).await.as_deref(), Some("203.0.113.7"));
        assert_eq!(public_ip(&client, &services[..3]).await, None);
    }
}
