use botsense_common::{FailurePolicy, IpReputationConfig, RemoteReputationConfig};
use botsense_ip_reputation::{ReputationChecker, VerdictSource};
use std::io::Write;
use std::net::IpAddr;

fn write_temp_file(name: &str, content: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!(
        "botsense_it_{}_{}",
        std::process::id(),
        name
    ));
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(content.as_bytes()).unwrap();
    path
}

#[tokio::test]
async fn test_from_config_loads_lists() {
    let blocklist = write_temp_file("block", "10.0.0.0/8\nfd00::/8\n");
    let allowlist = write_temp_file("allow", "10.0.0.5\n");

    let config = IpReputationConfig {
        blocklist: Some(blocklist.clone()),
        allowlist: Some(allowlist.clone()),
        remote: None,
        failure_policy: FailurePolicy::Open,
    };
    let checker = ReputationChecker::from_config(&config).unwrap();

    let blocked = checker.check("10.1.2.3".parse::<IpAddr>().unwrap()).await;
    assert!(blocked.malicious);
    assert_eq!(blocked.source, VerdictSource::Blocklist);

    let allowed = checker.check("10.0.0.5".parse::<IpAddr>().unwrap()).await;
    assert!(!allowed.malicious);
    assert_eq!(allowed.source, VerdictSource::Allowlist);

    assert!(checker.check("fd00::1".parse::<IpAddr>().unwrap()).await.malicious);

    std::fs::remove_file(blocklist).ok();
    std::fs::remove_file(allowlist).ok();
}

#[tokio::test]
async fn test_unreachable_remote_fails_closed() {
    // Nothing listens on port 9 of the loopback discard address.
    let config = IpReputationConfig {
        blocklist: None,
        allowlist: None,
        remote: Some(RemoteReputationConfig {
            endpoint: "http://127.0.0.1:9/reputation".to_string(),
            timeout_ms: 200,
            cache_ttl_secs: 60,
        }),
        failure_policy: FailurePolicy::Closed,
    };
    let checker = ReputationChecker::from_config(&config).unwrap();

    let verdict = checker.check("192.0.2.10".parse::<IpAddr>().unwrap()).await;
    assert!(verdict.malicious);
    assert_eq!(verdict.source, VerdictSource::Fallback);
}

#[tokio::test]
async fn test_missing_list_file_is_not_fatal() {
    let config = IpReputationConfig {
        blocklist: Some("/nonexistent/botsense-blocklist.txt".into()),
        ..Default::default()
    };
    let checker = ReputationChecker::from_config(&config).unwrap();
    let verdict = checker.check("8.8.8.8".parse::<IpAddr>().unwrap()).await;
    assert!(!verdict.malicious);
    assert_eq!(verdict.source, VerdictSource::NoOpinion);
}
