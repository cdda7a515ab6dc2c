#[cfg(test)]
mod tests {
    use reconmap::config::Config;
    use reconmap::config_file::ConfigFile;
    use reconmap::rate_limit::RateLimitPolicy;
    use reconmap::registry::Selection;
    use reconmap::target::{self, TargetKind};
    use serde_json::json;
    use std::time::Duration;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("reconmap")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_config_file_feeds_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.toml");
        std::fs::write(
            &path,
            r#"
            target = "example.org"
            selection = "dns_resolve"
            cache_ttl_secs = 30

            [rate_limit]
            requests_per_second = 5.0
            burst_limit = 2

            [options.dns_resolve]
            label = "primary"
            "#,
        )
        .unwrap();

        let path = path.display().to_string();
        let config = Config::from_sources(&args(&["--config", &path]), |_| None).unwrap();

        assert_eq!(config.target, "example.org");
        assert_eq!(config.selection, Selection::only(["dns_resolve"]));
        assert_eq!(config.cache_ttl, Some(Duration::from_secs(30)));
        assert_eq!(config.rate_limit, RateLimitPolicy::new(5.0, 2));
        assert_eq!(config.module_options["dns_resolve"]["label"], json!("primary"));
    }

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.toml");
        let file = ConfigFile {
            target: Some("example.org".to_string()),
            json_mode: Some(false),
            ..ConfigFile::default()
        };
        file.save_to_file(&path).unwrap();

        let path = path.display().to_string();
        let config = Config::from_sources(
            &args(&["example.net", "--json", "--config", &path]),
            |_| None,
        )
        .unwrap();
        assert_eq!(config.target, "example.net");
        assert!(config.json_mode);
    }

    #[test]
    fn test_bad_config_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.toml");
        std::fs::write(&path, "port_limit = 1000\n").unwrap();

        let path = path.display().to_string();
        assert!(Config::from_sources(&args(&["example.com", "--config", &path]), |_| None).is_err());
    }

    #[test]
    fn test_resolve_is_idempotent() {
        for raw in ["Example.COM", "https://sub.example.com:8443/x", "192.168.1.1", "[::1]"] {
            let once = target::resolve(raw).unwrap();
            let twice = target::resolve(once.canonical()).unwrap();
            assert_eq!(once, twice, "resolve not idempotent for {}", raw);
        }
        assert_eq!(target::resolve("::1").unwrap().kind(), TargetKind::Ipv6);
    }

    #[test]
    fn test_resolve_rejects_garbage() {
        for raw in ["", "   ", "ftp://example.com", "not a host", "exa mple.com"] {
            assert!(target::resolve(raw).is_err(), "accepted {:?}", raw);
        }
    }
}
