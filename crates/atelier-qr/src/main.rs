//! atelier-qr - Show a QR code that opens a model in AR on a phone
//!
//! Desktop browsers cannot place furniture in a room. This tool builds the
//! hand-off link for a model and renders it as a terminal QR code, so the
//! model can be opened on a phone that supports AR.

use atelier_core::handoff::handoff_url;
use atelier_core::ArConfig;
use clap::Parser;
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use qrcode::render::unicode::Dense1x2;
use qrcode::QrCode;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "atelier-qr")]
#[command(about = "Display a QR code that opens a model in AR on a phone")]
#[command(version)]
struct Args {
    /// Model URL to open
    model: String,

    /// Page that opens a model in AR (overrides the configuration)
    #[arg(long)]
    page_url: Option<String>,

    /// Configuration file providing `session.handoff_url`
    #[arg(short, long, default_value = "atelier.toml")]
    config: PathBuf,

    /// Port of a locally served AR page (used when no page URL is configured)
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Use HTTPS for the local page
    #[arg(long)]
    https: bool,

    /// Skip checking that the page and model are reachable
    #[arg(long)]
    no_check: bool,

    /// Swap dark and light modules for light-on-dark terminals
    #[arg(long)]
    invert: bool,

    /// Show URL only (no QR code)
    #[arg(long)]
    url_only: bool,
}

/// IPv4 address a phone on the same network could reach
#[derive(Debug, Clone, PartialEq, Eq)]
struct LocalAddress {
    interface: String,
    ip: Ipv4Addr,
}

#[derive(Debug, PartialEq, Eq)]
enum Reachability {
    Ok,
    Status(u16),
    Unreachable,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let configured = args.page_url.clone().or_else(|| configured_page(&args.config));
    let page_url = match configured {
        Some(url) => url,
        None => {
            let addresses = local_addresses();
            let Some(local) = pick_address(&addresses) else {
                eprintln!("Error: No network interface a phone could reach");
                std::process::exit(1);
            };
            println!("Serving from {} ({})", local.ip, local.interface);
            let protocol = if args.https { "https" } else { "http" };
            format!("{}://{}:{}/ar", protocol, local.ip, args.port)
        }
    };

    let link = match handoff_url(&page_url, &args.model) {
        Ok(link) => link,
        Err(e) => {
            eprintln!("Error: Invalid AR page URL {}: {}", page_url, e);
            std::process::exit(1);
        }
    };

    if !phone_can_fetch(&args.model) {
        eprintln!("Warning: {} is not an http(s) URL; the phone will not be able to download it", args.model);
    }

    if !args.no_check {
        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(3))
            .danger_accept_invalid_certs(true) // Local pages use self-signed certs
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                eprintln!("Error: Failed to create HTTP client: {}", e);
                std::process::exit(1);
            }
        };

        let mut targets = vec![("AR page", page_url.as_str())];
        if phone_can_fetch(&args.model) {
            targets.push(("Model", args.model.as_str()));
        }
        for (label, url) in targets {
            print!("Checking {} at {}... ", label, url);
            match check_reachable(&client, url).await {
                Reachability::Ok => println!("OK"),
                other => {
                    println!("{:?}", other);
                    eprintln!("\n{} is not reachable at {}", label, url);
                    eprintln!("Use --no-check to skip this check");
                    std::process::exit(1);
                }
            }
        }
    }

    println!();
    println!("=== Atelier AR Hand-off ===");
    println!();
    println!("Model: {}", args.model);
    println!("Open on phone: {}", link);
    println!();

    if args.url_only {
        return;
    }

    match QrCode::new(&link) {
        Ok(code) => {
            println!("{}", render_qr(&code, args.invert));
            println!();
            println!("Scan the QR code above with your phone to view this piece in your room.");
        }
        Err(e) => {
            eprintln!("Failed to generate QR code: {}", e);
            std::process::exit(1);
        }
    }
}

/// `session.handoff_url` from the configuration file, if present
fn configured_page(path: &PathBuf) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    match ArConfig::from_toml(&content) {
        Ok(config) => config.session.handoff_url,
        Err(e) => {
            eprintln!("Ignoring {}: {}", path.display(), e);
            None
        }
    }
}

/// Only network URLs can be loaded by the phone's AR viewer
fn phone_can_fetch(model: &str) -> bool {
    Url::parse(model).is_ok_and(|url| matches!(url.scheme(), "http" | "https"))
}

/// Prefer home and office private ranges, then any other routable address
fn pick_address(addresses: &[LocalAddress]) -> Option<&LocalAddress> {
    let rank = |ip: &Ipv4Addr| match ip.octets() {
        [192, 168, ..] => 0,
        [10, ..] => 1,
        [172, b, ..] if (16..=31).contains(&b) => 2,
        _ => 3,
    };
    addresses.iter().min_by_key(|addr| rank(&addr.ip))
}

/// IPv4 addresses on interfaces other than loopback and link-local
fn local_addresses() -> Vec<LocalAddress> {
    let Ok(interfaces) = NetworkInterface::show() else {
        return Vec::new();
    };
    interfaces
        .into_iter()
        .flat_map(|iface| {
            let name = iface.name;
            iface.addr.into_iter().filter_map(move |addr| match addr {
                Addr::V4(v4) if !v4.ip.is_loopback() && !v4.ip.is_link_local() => Some(LocalAddress {
                    interface: name.clone(),
                    ip: v4.ip,
                }),
                _ => None,
            })
        })
        .collect()
}

async fn check_reachable(client: &reqwest::Client, url: &str) -> Reachability {
    match client.get(url).send().await {
        Ok(resp) if resp.status().is_success() => Reachability::Ok,
        Ok(resp) => Reachability::Status(resp.status().as_u16()),
        Err(_) => Reachability::Unreachable,
    }
}

/// Two module rows per text line
fn render_qr(code: &QrCode, invert: bool) -> String {
    let (dark, light) = if invert {
        (Dense1x2::Light, Dense1x2::Dark)
    } else {
        (Dense1x2::Dark, Dense1x2::Light)
    };
    code.render::<Dense1x2>().dark_color(dark).light_color(light).quiet_zone(true).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(interface: &str, ip: [u8; 4]) -> LocalAddress {
        LocalAddress {
            interface: interface.to_string(),
            ip: Ipv4Addr::from(ip),
        }
    }

    #[test]
    fn test_pick_address_prefers_home_network() {
        let addresses = [
            addr("docker0", [172, 20, 0, 4]),
            addr("tun0", [10, 0, 0, 7]),
            addr("wlan0", [192, 168, 1, 20]),
            addr("eth1", [203, 0, 113, 9]),
        ];
        assert_eq!(pick_address(&addresses).map(|a| a.interface.as_str()), Some("wlan0"));
        assert_eq!(pick_address(&addresses[..2]).map(|a| a.interface.as_str()), Some("tun0"));
        assert_eq!(pick_address(&addresses[3..]).map(|a| a.interface.as_str()), Some("eth1"));
        assert_eq!(pick_address(&[]), None);
    }

    #[test]
    fn test_phone_can_fetch() {
        assert!(phone_can_fetch("https://cdn.example.com/models/sofa.glb"));
        assert!(!phone_can_fetch("file:///srv/models/sofa.glb"));
        assert!(!phone_can_fetch("models/sofa.glb"));
    }

    #[test]
    fn test_render_rows() {
        let code = QrCode::new("https://atelier.example.com/ar?model=sofa.glb").unwrap();
        let rendered = render_qr(&code, false);
        let lines: Vec<&str> = rendered.lines().collect();
        assert!(lines.len() * 2 >= code.width());
        let width = lines[0].chars().count();
        assert!(width > code.width());
        assert!(lines.iter().all(|line| line.chars().count() == width));
        assert_ne!(rendered, render_qr(&code, true));
    }
}
