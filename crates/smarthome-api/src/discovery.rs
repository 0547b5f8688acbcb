// Parsing of `avahi-browse -r -k -p -t <service>` output.
//
// Running the subprocess is the caller's job; this only turns its
// parseable output into records. Resolved rows start with `=`; only IPv4
// rows are kept. Fields (0-based): 6 hostname, 7 address, 8 port.

use serde::Serialize;

/// One resolved mDNS service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredService {
    pub ip: String,
    pub hostname: String,
    pub port: String,
}

/// Extract every resolved IPv4 service from `avahi-browse -p` output.
///
/// Duplicate `(ip, port)` pairs (one per interface) are collapsed.
pub fn parse_avahi_browse(output: &str) -> Vec<DiscoveredService> {
    let mut services: Vec<DiscoveredService> = Vec::new();

    for line in output.lines() {
        let fields: Vec<&str> = line.split(';').collect();
        if fields.len() < 9 || fields[0] != "=" || fields[2] != "IPv4" {
            continue;
        }

        let service = DiscoveredService {
            hostname: fields[6].to_owned(),
            ip: fields[7].to_owned(),
            port: fields[8].to_owned(),
        };
        if service.ip.is_empty() {
            continue;
        }
        if services
            .iter()
            .any(|s| s.ip == service.ip && s.port == service.port)
        {
            continue;
        }
        services.push(service);
    }

    services
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const SAMPLE: &str = "\
+;wlan0;IPv4;Shapes\\0326A2B;_nanoleafapi._tcp;local
=;wlan0;IPv4;Shapes\\0326A2B;_nanoleafapi._tcp;local;Shapes-6A2B.local;192.168.1.40;16021;\"srcvers=9.2.4\"
=;wlan0;IPv6;Shapes\\0326A2B;_nanoleafapi._tcp;local;Shapes-6A2B.local;fe80::1;16021;\"srcvers=9.2.4\"
=;eth0;IPv4;Shapes\\0326A2B;_nanoleafapi._tcp;local;Shapes-6A2B.local;192.168.1.40;16021;\"srcvers=9.2.4\"
=;wlan0;IPv4;Canvas;_nanoleafapi._tcp;local;Canvas.local;192.168.1.41;16021;
garbage line
";

    #[test]
    fn keeps_resolved_ipv4_rows_once() {
        let services = parse_avahi_browse(SAMPLE);
        assert_eq!(
            services,
            vec![
                DiscoveredService {
                    ip: "192.168.1.40".into(),
                    hostname: "Shapes-6A2B.local".into(),
                    port: "16021".into(),
                },
                DiscoveredService {
                    ip: "192.168.1.41".into(),
                    hostname: "Canvas.local".into(),
                    port: "16021".into(),
                },
            ]
        );
    }

    #[test]
    fn empty_output_yields_nothing() {
        assert!(parse_avahi_browse("").is_empty());
    }
}
