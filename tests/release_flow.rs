use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use mockito::{Matcher, Server};
use tempfile::{NamedTempFile, TempDir};
use version_watch::action::notify::HttpNotifier;
use version_watch::config::Config;
use version_watch::context::{Context, Timing};
use version_watch::service::events::EventSink;
use version_watch::service::manager::ServiceManager;
use version_watch::store::StatusStore;

fn timing() -> Timing {
    Timing {
        retry_gap: Duration::ZERO,
        fail_stagger: Duration::ZERO,
    }
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn new_github_release_is_auto_approved_actioned_and_persisted() {
    let mut server = Server::new_async().await;
    let first = server
        .mock("GET", "/repos/release-argus/Argus/releases")
        .with_status(200)
        .with_body(r#"[{"tag_name": "v1.0.0"}]"#)
        .create_async()
        .await;
    let hook = server
        .mock("POST", "/hooks/deploy")
        .match_header("x-github-event", "push")
        .match_header("x-hub-signature-256", Matcher::Regex("^sha256=[0-9a-f]{64}$".to_string()))
        .with_status(202)
        .expect(1)
        .create_async()
        .await;

    let config = Config::from_yaml(&format!(
        r#"
webhook:
  deploy:
    url: {url}/hooks/deploy
    secret: s3cret
service:
  argus:
    latest_version:
      type: github
      url: release-argus/Argus
      url_commands:
        - type: regex
          regex: '^v([0-9.]+)$'
    webhook:
      deploy: {{}}
    dashboard:
      auto_approve: true
"#,
        url = server.url()
    ))
    .unwrap();

    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(StatusStore::open(&temp_dir.path().join("status.db")).unwrap());
    let (sink, receivers) = EventSink::new();
    let _writer = Arc::clone(&store).spawn_writer(receivers.save).unwrap();
    let ctx = Arc::new(
        Context::new(sink)
            .unwrap()
            .with_github_api(&server.url())
            .with_timing(timing()),
    );
    let notifier = Arc::new(HttpNotifier::new(ctx.client(false).clone()));
    let manager = ServiceManager::load(config, Arc::clone(&ctx), notifier, HashMap::new()).unwrap();

    assert_eq!(manager.refresh("argus", None).await.unwrap(), "1.0.0");
    let summary = manager.summary("argus").await.unwrap();
    assert_eq!(summary.deployed_version, "1.0.0", "first sighting mirrors latest");
    assert_eq!(summary.approved_version, "");

    first.remove_async().await;
    let _second = server
        .mock("GET", "/repos/release-argus/Argus/releases")
        .with_status(200)
        .with_body(r#"[{"tag_name": "v1.0.0"}, {"tag_name": "v1.1.0"}, {"tag_name": "v1.1.0-rc1", "prerelease": true}]"#)
        .create_async()
        .await;

    assert_eq!(manager.refresh("argus", None).await.unwrap(), "1.1.0");

    let mut deployed = String::new();
    for _ in 0..100 {
        deployed = manager.summary("argus").await.unwrap().deployed_version;
        if deployed == "1.1.0" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(deployed, "1.1.0");
    assert_eq!(manager.summary("argus").await.unwrap().approved_version, "1.1.0");
    hook.assert_async().await;

    let persisted = eventually(|| {
        store
            .get("argus")
            .unwrap()
            .is_some_and(|s| s.deployed_version == "1.1.0" && s.latest_version == "1.1.0")
    })
    .await;
    assert!(persisted);
}

#[tokio::test]
async fn config_file_drives_manual_services() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
defaults:
  service:
    options:
      interval: 1h
service:
  gitea:
    latest_version:
      type: manual
      version: 1.21.0
    command:
      - ["./deploy.sh", "{{{{ version }}}}"]
  grafana:
    name: Grafana
    latest_version:
      type: manual
      version: 10.2.3
"#
    )
    .unwrap();

    let config = Config::load(file.path()).unwrap();
    let ctx = Arc::new(Context::new(EventSink::disabled()).unwrap());
    let notifier = Arc::new(HttpNotifier::new(ctx.client(false).clone()));
    let manager = ServiceManager::load(config, Arc::clone(&ctx), notifier, HashMap::new()).unwrap();

    manager.refresh("gitea", None).await.unwrap();
    manager.refresh("grafana", None).await.unwrap();

    let summaries = manager.summaries().await;
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].id, "gitea");
    assert!(summaries[0].has_actions);
    assert_eq!(summaries[0].deployed_version, "1.21.0");
    assert_eq!(summaries[0].approved_version, "");
    assert_eq!(summaries[1].name, "Grafana");
    assert_eq!(summaries[1].deployed_version, "10.2.3");

    manager.skip("gitea").await.unwrap();
    assert_eq!(
        manager.summary("gitea").await.unwrap().approved_version,
        "SKIP_1.21.0"
    );

    let detail = manager.detail("gitea").await.unwrap();
    assert_eq!(detail.command.len(), 1);
}

#[test]
fn invalid_config_reports_every_problem() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
service:
  one:
    options:
      interval: forever
    latest_version:
      type: github
      url: not-a-repo
  two:
    latest_version:
      type: url
      url: https://example.com
      require:
        regex_version: '('
"#
    )
    .unwrap();

    let err = Config::load(file.path()).unwrap_err().to_string();

    assert!(err.contains("service.one.options.interval"), "{}", err);
    assert!(err.contains("service.one.latest_version.url"), "{}", err);
    assert!(err.contains("service.two.latest_version.require.regex_version"), "{}", err);
}
