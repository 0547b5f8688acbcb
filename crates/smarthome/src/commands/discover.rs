//! mDNS discovery from `avahi-browse` output.

use std::io::Read;

use smarthome_api::{DiscoveredService, parse_avahi_browse};
use tabled::Tabled;

use crate::cli::{DiscoverArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct ServiceRow {
    #[tabled(rename = "IP")]
    ip: String,
    #[tabled(rename = "Port")]
    port: String,
    #[tabled(rename = "Hostname")]
    hostname: String,
}

impl From<&DiscoveredService> for ServiceRow {
    fn from(s: &DiscoveredService) -> Self {
        Self {
            ip: s.ip.clone(),
            port: s.port.clone(),
            hostname: s.hostname.clone(),
        }
    }
}

pub fn handle(args: &DiscoverArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let raw = match &args.input {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let services = parse_avahi_browse(&raw);
    let rendered = output::render_list(
        &global.output,
        &services,
        |s| ServiceRow::from(s),
        |s| format!("{}:{}", s.ip, s.port),
    )?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}
