use std::collections::HashMap;
use std::net::IpAddr;

use ipnet::IpNet;
use libcsi::CsiError;

use super::split_export_path;
use crate::export_location;
use crate::manila::{AccessLevel, AccessType, ExportLocation, GrantAccessOpts};
use crate::options::ControllerVolumeOptions;

/// NFS shares: IP access rules, `server`/`share` volume context, no secrets.
#[derive(Debug, Clone, Default)]
pub struct NfsAdapter {
    /// Restrict export locations to addresses in this network.
    match_network: Option<IpNet>,
}

impl NfsAdapter {
    pub fn new(match_network: Option<IpNet>) -> Self {
        Self { match_network }
    }

    pub fn access_request(&self, options: &ControllerVolumeOptions) -> GrantAccessOpts {
        GrantAccessOpts {
            access_type: AccessType::Ip,
            access_to: options.nfs_share_client.clone(),
            access_level: AccessLevel::Rw,
        }
    }

    pub fn build_volume_context(
        &self,
        locations: &[ExportLocation],
    ) -> Result<HashMap<String, String>, CsiError> {
        let idx = match self.match_network {
            Some(net) => export_location::choose(locations, |l| in_network(&net, &l.path)),
            None => export_location::choose(locations, export_location::any_location),
        }?;
        let (server, share) = split_export_path(&locations[idx].path)?;

        Ok(HashMap::from([
            ("server".to_owned(), server.to_owned()),
            ("share".to_owned(), share),
        ]))
    }
}

fn in_network(net: &IpNet, path: &str) -> bool {
    let Ok((server, _)) = split_export_path(path) else {
        return false;
    };
    server
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .is_ok_and(|addr| net.contains(&addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(path: &str, preferred: bool) -> ExportLocation {
        ExportLocation {
            path: path.to_owned(),
            preferred,
            ..Default::default()
        }
    }

    #[test]
    fn context_from_first_location() {
        let adapter = NfsAdapter::default();
        let ctx = adapter
            .build_volume_context(&[loc("10.0.0.1:/shares/s1", false)])
            .unwrap();
        assert_eq!(ctx["server"], "10.0.0.1");
        assert_eq!(ctx["share"], "/shares/s1");
        assert_eq!(ctx.len(), 2);
    }

    #[test]
    fn network_filter_overrides_preference() {
        let adapter = NfsAdapter::new(Some("192.168.0.0/16".parse().unwrap()));
        let ctx = adapter
            .build_volume_context(&[
                loc("10.0.0.1:/shares/s1", true),
                loc("192.168.10.5:/shares/s1", false),
            ])
            .unwrap();
        assert_eq!(ctx["server"], "192.168.10.5");
    }

    #[test]
    fn network_filter_without_match_fails() {
        let adapter = NfsAdapter::new(Some("172.16.0.0/12".parse().unwrap()));
        assert!(
            adapter
                .build_volume_context(&[loc("10.0.0.1:/shares/s1", false)])
                .is_err()
        );
    }

    #[test]
    fn ipv6_and_hostnames() {
        let net: IpNet = "fd00::/8".parse().unwrap();
        assert!(in_network(&net, "[fd00::1]:/shares/s1"));
        assert!(!in_network(&net, "nfs.example.com:/shares/s1"));
    }

    #[test]
    fn access_uses_share_client() {
        let options = ControllerVolumeOptions::parse(&HashMap::new()).unwrap();
        let wanted = NfsAdapter::default().access_request(&options);
        assert_eq!(wanted.access_type, AccessType::Ip);
        assert_eq!(wanted.access_to, "0.0.0.0/0");
        assert_eq!(wanted.access_level, AccessLevel::Rw);
    }
}
