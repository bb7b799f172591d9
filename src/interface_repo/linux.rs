// Linux-specific helpers: interface speed and operational state from /sys/class/net.

/// Read network interface link speed from /sys/class/net/<interface>/speed (Linux).
/// Returns speed in bits per second, or 0 if unavailable.
pub(super) fn get_interface_speed(interface_name: &str) -> u64 {
    #[cfg(target_os = "linux")]
    {
        let path = format!("/sys/class/net/{}/speed", interface_name);
        if let Ok(content) = std::fs::read_to_string(&path)
            && let Ok(mbps) = content.trim().parse::<i64>()
            && mbps > 0
        {
            return (mbps as u64) * 1_000_000;
        }
    }
    #[cfg(not(target_os = "linux"))]
    let _ = interface_name;
    0
}

/// Whether /sys/class/net/<interface>/operstate reports the link as usable.
/// `None` when the state cannot be read (non-Linux, or virtual devices reporting "unknown").
pub(super) fn read_is_up(interface_name: &str) -> Option<bool> {
    #[cfg(target_os = "linux")]
    {
        let path = format!("/sys/class/net/{}/operstate", interface_name);
        let state = std::fs::read_to_string(&path).ok()?;
        match state.trim() {
            "up" => Some(true),
            "down" | "lowerlayerdown" | "notpresent" => Some(false),
            _ => None,
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = interface_name;
        None
    }
}
