#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::middleware::guard::record_tripwire;
    use crate::session::guard::{is_local_ip, parse_remote_addr, FORWARDED_FOR};
    use crate::session::{check_allow_public_without_auth, check_external_access_tripwire, AccessError};
    use axum::http::{HeaderMap, HeaderValue};
    use std::net::IpAddr;
    use std::sync::Arc;

    fn headers(forwarded: &[&str]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for v in forwarded {
            h.append(FORWARDED_FOR, HeaderValue::from_str(v).unwrap());
        }
        h
    }

    fn with_credentials(config: &Config) {
        config.update(|s| {
            s.username = Some("admin".into());
            s.password = Some("secret".into());
        });
    }

    fn check(config: &Config, remote: &str, forwarded: &[&str]) -> Result<(), AccessError> {
        check_allow_public_without_auth(config, &headers(forwarded), remote)
    }

    #[test]
    fn test_loopback_without_auth_is_allowed() {
        let config = Config::in_memory();
        assert_eq!(check(&config, "127.0.0.1:8080", &[]), Ok(()));
    }

    #[test]
    fn test_public_address_without_auth_is_rejected() {
        let config = Config::in_memory();
        assert_eq!(
            check(&config, "193.168.1.1:8080", &[]),
            Err(AccessError::ExternalAccess("193.168.1.1".to_string()))
        );
    }

    #[test]
    fn test_any_public_hop_rejects_the_chain() {
        let config = Config::in_memory();
        assert_eq!(
            check(&config, "192.168.1.1:8080", &["192.168.1.1, 193.168.1.1"]),
            Err(AccessError::ExternalAccess("193.168.1.1".to_string()))
        );
        assert_eq!(
            check(&config, "192.168.1.1:8080", &["193.168.1.1, 192.168.1.1"]),
            Err(AccessError::ExternalAccess("193.168.1.1".to_string()))
        );
        // split across several header lines
        assert!(check(&config, "192.168.1.1:8080", &["10.0.0.5", "193.168.1.1"]).is_err());
    }

    #[test]
    fn test_credentials_allow_everything() {
        let config = Config::in_memory();
        with_credentials(&config);
        assert_eq!(check(&config, "192.168.1.1:8080", &["192.168.1.1, 193.168.1.1"]), Ok(()));
        assert_eq!(check(&config, "193.168.1.1:8080", &[]), Ok(()));
    }

    #[test]
    fn test_dangerous_override_allows_everything() {
        let config = Config::in_memory();
        config.update(|s| s.dangerous_allow_public_without_auth = true);
        assert_eq!(check(&config, "8.8.8.8:443", &[]), Ok(()));
    }

    #[test]
    fn test_unparseable_address_is_malformed() {
        let config = Config::in_memory();
        let err = check(&config, "192.168.1.a:9999", &[]).unwrap_err();
        assert!(matches!(err, AccessError::MalformedAddress { ref address, .. } if address == "192.168.1.a:9999"));

        assert!(matches!(check(&config, "127.0.0.1", &[]), Err(AccessError::MalformedAddress { .. })));
        assert!(matches!(
            check(&config, "127.0.0.1:80", &["127.0.0.1, nonsense"]),
            Err(AccessError::MalformedAddress { .. })
        ));
    }

    #[test]
    fn test_ipv6_addresses() {
        let config = Config::in_memory();
        assert_eq!(check(&config, "[::1]:8080", &[]), Ok(()));
        assert_eq!(check(&config, "[fe80::1%eth0]:8080", &[]), Ok(()));
        assert_eq!(check(&config, "[fd12:3456::1]:8080", &[]), Ok(()));
        assert_eq!(
            check(&config, "[2001:db8::1]:8080", &[]),
            Err(AccessError::ExternalAccess("2001:db8::1".to_string()))
        );
        assert!(matches!(check(&config, "::1:8080", &[]), Err(AccessError::MalformedAddress { .. })));
    }

    #[test]
    fn test_local_ranges() {
        let local = ["10.1.2.3", "172.16.0.1", "192.168.0.1", "169.254.1.1", "100.64.0.1", "100.127.255.254"];
        for ip in local {
            assert!(is_local_ip(ip.parse().unwrap()), "{} should be local", ip);
        }
        let public = ["8.8.8.8", "100.128.0.1", "172.32.0.1", "2001:4860::8888", "::ffff:8.8.8.8"];
        for ip in public {
            assert!(!is_local_ip(ip.parse().unwrap()), "{} should be public", ip);
        }
        // IPv4-mapped addresses are judged by their IPv4 form
        assert!(is_local_ip("::ffff:192.168.1.1".parse().unwrap()));
    }

    #[test]
    fn test_parse_remote_addr() {
        assert_eq!(parse_remote_addr("10.0.0.1:80").unwrap(), "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(parse_remote_addr("[fe80::1%2]:80").unwrap(), "fe80::1".parse::<IpAddr>().unwrap());
        assert!(parse_remote_addr("").is_err());
        assert!(parse_remote_addr("[::1]").is_err());
    }

    #[test]
    fn test_local_forwarded_chain_is_allowed() {
        let config = Config::in_memory();
        assert_eq!(check(&config, "192.168.1.1:8080", &["192.168.1.2"]), Ok(()));
        assert_eq!(check(&config, "10.0.0.1:80", &["192.168.1.5, 10.0.0.2", "172.16.0.3"]), Ok(()));
    }

    #[test]
    fn test_public_peer_with_forwarded_chain_is_external() {
        let config = Config::in_memory();
        // a forwarding header never makes a public peer acceptable
        assert_eq!(
            check(&config, "193.168.1.1:8080", &["192.168.1.2"]),
            Err(AccessError::ExternalAccess("193.168.1.1".to_string()))
        );
        assert_eq!(
            check(&config, "203.0.113.5:8080", &["10.0.0.1"]),
            Err(AccessError::ExternalAccess("203.0.113.5".to_string()))
        );
    }

    #[test]
    fn test_tripwire_reports_recorded_access() {
        let config = Config::in_memory();
        assert_eq!(check_external_access_tripwire(&config), Ok(()));

        config.update(|s| s.security_tripwire_accessed_from_public_internet = Some("8.8.8.8".into()));
        assert_eq!(check_external_access_tripwire(&config), Err(AccessError::ExternalAccess("8.8.8.8".into())));
        assert_eq!(check_external_access_tripwire(&config), Err(AccessError::ExternalAccess("8.8.8.8".into())));

        with_credentials(&config);
        assert_eq!(check_external_access_tripwire(&config), Ok(()));
    }

    #[test]
    fn test_tripwire_is_recorded_once() {
        let config = Config::in_memory();
        assert!(record_tripwire(&config, "8.8.8.8"));
        assert!(!record_tripwire(&config, "1.1.1.1"));
        assert_eq!(config.tripwire(), Some("8.8.8.8".to_string()));
    }

    #[test]
    fn test_concurrent_rejections_record_one_tripwire() {
        let config = Arc::new(Config::in_memory());
        let handles: Vec<_> = (0..16u8)
            .map(|i| {
                let config = config.clone();
                std::thread::spawn(move || record_tripwire(&config, &format!("8.8.8.{}", i)))
            })
            .collect();
        let set = handles.into_iter().map(|h| h.join().unwrap()).filter(|recorded| *recorded).count();
        assert_eq!(set, 1);
        assert!(config.tripwire().is_some());
    }
}
