/// Share of physical memory in use, in `[0, 1]`.
///
/// Read from `/proc/meminfo` on Linux; `0.0` wherever that is unavailable.
pub fn memory_pressure() -> f64 {
    #[cfg(target_os = "linux")]
    {
        if let Some(p) = std::fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|raw| parse_meminfo(&raw))
        {
            return p;
        }
    }
    0.0
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_meminfo(raw: &str) -> Option<f64> {
    let field = |name: &str| -> Option<f64> {
        raw.lines()
            .find_map(|l| l.strip_prefix(name)?.strip_prefix(':'))
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|kb| kb.parse::<f64>().ok())
    };
    let total = field("MemTotal")?;
    let available = field("MemAvailable")?;
    if total <= 0.0 {
        return None;
    }
    Some((1.0 - available / total).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pressure_from_meminfo() {
        let raw = "MemTotal:       16000000 kB\nMemFree:         1000000 kB\nMemAvailable:    4000000 kB\n";
        let p = parse_meminfo(raw).unwrap();
        assert!((p - 0.75).abs() < 1e-9);
    }

    #[test]
    fn missing_fields_yield_none() {
        assert_eq!(parse_meminfo("MemTotal: 100 kB\n"), None);
        assert_eq!(parse_meminfo(""), None);
    }

    #[test]
    fn live_value_is_a_ratio() {
        let p = memory_pressure();
        assert!((0.0..=1.0).contains(&p));
    }
}
