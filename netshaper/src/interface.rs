// Detection of the interface to shape

/// What detection needs to know about one link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub name: String,
    pub is_up: bool,
    pub is_loopback: bool,
    pub has_ipv4: bool,
}

const FALLBACK_INTERFACE: &str = "eth0";

/// Detect the interface to shape.
///
/// Order: first preferred name that exists, then an up non-loopback
/// interface with an IPv4 address, then any non-loopback interface, then
/// `$IFACE`, then `eth0`.
pub fn detect_interface(preferred: &[String]) -> String {
    let links = list_links();

    if let Some(name) = select_interface(&links, preferred) {
        log::debug!("Detected interface: {}", name);
        return name;
    }

    match std::env::var("IFACE") {
        Ok(name) if !name.trim().is_empty() => {
            log::warn!("No interface detected, using IFACE={}", name);
            name.trim().to_string()
        }
        _ => {
            log::warn!("No interface detected, falling back to {}", FALLBACK_INTERFACE);
            FALLBACK_INTERFACE.to_string()
        }
    }
}

/// Pick an interface from `links`; None when nothing but loopback exists
pub fn select_interface(links: &[LinkInfo], preferred: &[String]) -> Option<String> {
    if let Some(name) = preferred
        .iter()
        .find(|p| links.iter().any(|l| &l.name == *p))
    {
        return Some(name.clone());
    }

    // Most traffic is IPv4
    if let Some(link) = links
        .iter()
        .find(|l| l.is_up && !l.is_loopback && l.has_ipv4)
    {
        return Some(link.name.clone());
    }

    links
        .iter()
        .find(|l| !l.is_loopback && !l.name.is_empty())
        .map(|l| l.name.clone())
}

#[cfg(feature = "detect-pnet")]
fn list_links() -> Vec<LinkInfo> {
    pnet_datalink::interfaces()
        .into_iter()
        .map(|iface| LinkInfo {
            is_up: iface.is_up(),
            is_loopback: iface.is_loopback(),
            has_ipv4: iface.ips.iter().any(|ip| ip.is_ipv4()),
            name: iface.name,
        })
        .collect()
}

#[cfg(not(feature = "detect-pnet"))]
fn list_links() -> Vec<LinkInfo> {
    Vec::new()
}
