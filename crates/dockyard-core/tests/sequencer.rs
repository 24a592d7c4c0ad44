//! End-to-end runs of the sequencer against a scripted host.

mod support;

use std::path::PathBuf;
use std::sync::Arc;

use dockyard_core::config::ProvisionConfig;
use dockyard_core::progress::{Outcome, Stage};
use dockyard_core::render::{COMPOSE_FILE_NAME, ENV_FILE_NAME};
use dockyard_core::request::{Credential, ProvisionRequest};
use dockyard_core::secret::SECRET_LEN;
use dockyard_core::sequencer::Sequencer;
use tempfile::TempDir;

use support::{Reply, ScriptedRunner, recording_sink};

struct Fixture {
    temp: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("photos")).unwrap();
        std::fs::create_dir_all(temp.path().join("external")).unwrap();
        Self { temp }
    }

    fn install_dir(&self) -> PathBuf {
        self.temp.path().join("immich")
    }

    fn script_path(&self) -> PathBuf {
        self.temp.path().join("get-docker.sh")
    }

    fn request(&self) -> ProvisionRequest {
        ProvisionRequest::new(
            Credential::new("hunter2"),
            self.install_dir(),
            self.temp.path().join("photos"),
            self.temp.path().join("external"),
        )
    }

    fn config(&self) -> ProvisionConfig {
        let mut config = ProvisionConfig::default();
        config.installer.script_path = self.script_path();
        config.installer.group_user = Some("photos".to_string());
        config
    }
}

async fn run(
    runner: ScriptedRunner,
    config: ProvisionConfig,
    request: ProvisionRequest,
    answer: bool,
) -> (Outcome, support::Transcript, Sequencer<ScriptedRunner>) {
    let sequencer = Sequencer::new(runner, config);
    let (sink, transcript) = recording_sink(answer);
    let outcome = sequencer.run(request, &sink).await;
    drop(sink);
    (outcome, transcript.await.unwrap(), sequencer)
}

fn env_value(env: &str, key: &str) -> Option<String> {
    env.lines()
        .find_map(|line| line.strip_prefix(&format!("{key}=")))
        .map(str::to_string)
}

#[tokio::test]
async fn ready_host_goes_straight_to_succeeded() {
    let fixture = Fixture::new();
    let (outcome, transcript, sequencer) = run(
        ScriptedRunner::docker_ready(),
        fixture.config(),
        fixture.request(),
        true,
    )
    .await;

    assert_eq!(
        outcome,
        Outcome::Succeeded {
            install_dir: fixture.install_dir(),
            access_url: "http://localhost:2283".to_string(),
        }
    );
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(
        transcript.stages,
        vec![
            Stage::Idle,
            Stage::CheckingConflicts,
            Stage::CheckingPreconditions,
            Stage::Rendering,
            Stage::Pulling,
            Stage::Starting,
            Stage::Succeeded,
        ]
    );
    assert_eq!(transcript.outcomes, vec![outcome]);
    assert!(transcript.error_lines().is_empty());

    let runner = sequencer.runner();
    assert!(!runner.called("wget", &[]));
    assert!(!runner.called("sh", &[]));
    let lines = runner.command_lines();
    let tail: Vec<&str> = lines[lines.len() - 2..].iter().map(String::as_str).collect();
    assert_eq!(tail, vec!["docker compose pull", "docker compose up -d"]);
    for call in &runner.calls()[lines.len() - 2..] {
        assert_eq!(call.current_dir.as_deref(), Some(fixture.install_dir().as_path()));
        assert!(!call.is_elevated());
    }
}

#[tokio::test]
async fn both_artifacts_share_one_fresh_secret() {
    let fixture = Fixture::new();
    let (outcome, _, _) = run(
        ScriptedRunner::docker_ready(),
        fixture.config(),
        fixture.request(),
        true,
    )
    .await;
    assert!(outcome.is_success());

    let compose = std::fs::read_to_string(fixture.install_dir().join(COMPOSE_FILE_NAME)).unwrap();
    let env = std::fs::read_to_string(fixture.install_dir().join(ENV_FILE_NAME)).unwrap();
    let secret = env_value(&env, "DB_PASSWORD").unwrap();
    assert_eq!(secret.len(), SECRET_LEN);
    assert!(compose.contains(&format!("POSTGRES_PASSWORD: \"{secret}\"")));
    assert!(!compose.contains("hunter2"));
    assert!(!env.contains("hunter2"));
}

#[tokio::test]
async fn available_docker_without_conflict_check_runs_only_probes_and_compose() {
    let fixture = Fixture::new();
    let request = fixture.request().with_resolve_conflicts(false);
    let (outcome, transcript, sequencer) = run(
        ScriptedRunner::docker_ready(),
        fixture.config(),
        request,
        true,
    )
    .await;

    assert!(outcome.is_success());
    assert_eq!(transcript.outcomes.len(), 1);
    assert_eq!(
        sequencer.runner().command_lines(),
        vec![
            "docker --version",
            "docker ps",
            "docker compose pull",
            "docker compose up -d",
        ]
    );

    let compose = std::fs::read_to_string(fixture.install_dir().join(COMPOSE_FILE_NAME)).unwrap();
    let env = std::fs::read_to_string(fixture.install_dir().join(ENV_FILE_NAME)).unwrap();
    let secret = env_value(&env, "DB_PASSWORD").unwrap();
    assert!(compose.contains(&secret));
}

#[tokio::test]
async fn failed_start_stops_the_run_at_starting() {
    let fixture = Fixture::new();
    let runner = ScriptedRunner::docker_ready().on(
        "docker",
        &["compose", "up"],
        Reply::fail_with(1, &["Error: port is already allocated"]),
    );
    let (outcome, transcript, sequencer) =
        run(runner, fixture.config(), fixture.request(), true).await;

    match &outcome {
        Outcome::Failed {
            stage,
            reason,
            exit_code,
        } => {
            assert_eq!(*stage, Stage::Starting);
            assert!(reason.contains("docker compose up -d"), "{reason}");
            assert_eq!(*exit_code, 3);
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(transcript.stages.last(), Some(&Stage::Failed));
    assert!(!transcript.stages.contains(&Stage::Succeeded));
    assert_eq!(transcript.error_lines().len(), 1);
    assert_eq!(transcript.outcomes.len(), 1);
    assert_eq!(
        sequencer.runner().command_lines().last().map(String::as_str),
        Some("docker compose up -d")
    );
}

#[tokio::test]
async fn failed_pull_never_starts_containers() {
    let fixture = Fixture::new();
    let runner = ScriptedRunner::docker_ready().on("docker", &["compose", "pull"], Reply::fail(1));
    let (outcome, _, sequencer) = run(runner, fixture.config(), fixture.request(), true).await;

    assert!(matches!(
        outcome,
        Outcome::Failed {
            stage: Stage::Pulling,
            exit_code: 3,
            ..
        }
    ));
    assert!(!sequencer.runner().called("docker", &["compose", "up"]));
}

#[tokio::test]
async fn missing_storage_path_runs_nothing() {
    let fixture = Fixture::new();
    let mut request = fixture.request();
    request.primary_storage_path = fixture.temp.path().join("no-such-dir");
    let (outcome, transcript, sequencer) = run(
        ScriptedRunner::docker_ready(),
        fixture.config(),
        request,
        true,
    )
    .await;

    assert!(matches!(
        outcome,
        Outcome::Failed {
            stage: Stage::Idle,
            exit_code: 1,
            ..
        }
    ));
    assert!(sequencer.runner().calls().is_empty());
    assert_eq!(transcript.stages, vec![Stage::Idle, Stage::Failed]);
    assert!(!fixture.install_dir().exists());
}

#[tokio::test]
async fn empty_credential_is_reported_by_name() {
    let fixture = Fixture::new();
    let mut request = fixture.request();
    request.credential = Credential::new("");
    let (outcome, transcript, sequencer) = run(
        ScriptedRunner::docker_ready(),
        fixture.config(),
        request,
        true,
    )
    .await;

    assert_eq!(outcome.exit_code(), 1);
    assert!(outcome.message().contains("Please specify the sudo password"));
    assert!(transcript.has_line("ERROR: Please specify the sudo password"));
    assert!(sequencer.runner().calls().is_empty());
}

#[tokio::test]
async fn keeping_existing_instances_skips_conflict_checks() {
    let fixture = Fixture::new();
    let request = fixture.request().with_resolve_conflicts(false);
    let (outcome, transcript, sequencer) = run(
        ScriptedRunner::docker_ready(),
        fixture.config(),
        request,
        true,
    )
    .await;

    assert!(outcome.is_success());
    assert!(!transcript.stages.contains(&Stage::CheckingConflicts));
    assert!(!sequencer.runner().called("docker", &["ps", "--format"]));
    assert!(!sequencer.runner().called("docker", &["stop"]));
}

#[tokio::test]
async fn declined_port_override_fails_in_conflict_stage() {
    let fixture = Fixture::new();
    let busy = "immich_server\t0.0.0.0:2283->2283/tcp";
    let runner = ScriptedRunner::docker_ready().on(
        "docker",
        &["ps", "--format"],
        Reply::ok_with(&[busy]),
    );
    let (outcome, transcript, sequencer) =
        run(runner, fixture.config(), fixture.request(), false).await;

    assert!(matches!(
        outcome,
        Outcome::Failed {
            stage: Stage::CheckingConflicts,
            exit_code: 3,
            ..
        }
    ));
    assert_eq!(transcript.prompts.len(), 1);
    assert!(!sequencer.runner().called("docker", &["compose", "pull"]));
    assert!(!fixture.install_dir().exists());
}

#[tokio::test]
async fn conflict_timeout_aborts_the_run() {
    let fixture = Fixture::new();
    let runner =
        ScriptedRunner::docker_ready().on("docker", &["ps", "--format"], Reply::Timeout);
    let (outcome, _, sequencer) = run(runner, fixture.config(), fixture.request(), true).await;

    match &outcome {
        Outcome::Failed { stage, reason, .. } => {
            assert_eq!(*stage, Stage::CheckingConflicts);
            assert!(reason.contains("Timed out"), "{reason}");
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert!(!sequencer.runner().called("docker", &["compose", "pull"]));
}

#[tokio::test]
async fn missing_docker_is_installed_then_compose_is_elevated() {
    let fixture = Fixture::new();
    let request = fixture.request().with_resolve_conflicts(false);
    let runner = ScriptedRunner::docker_missing().on_each(
        "docker",
        &["--version"],
        vec![Reply::fail(127), Reply::ok()],
    );
    let (outcome, transcript, sequencer) = run(runner, fixture.config(), request, true).await;

    assert!(outcome.is_success(), "{}", outcome.message());
    assert!(transcript.stages.contains(&Stage::InstallingDependency));

    let script = fixture.script_path().display().to_string();
    let lines = sequencer.runner().command_lines();
    assert_eq!(
        lines,
        vec![
            "docker --version".to_string(),
            format!("wget -O {script} https://get.docker.com"),
            format!("sudo sh {script}"),
            "sudo usermod -aG docker photos".to_string(),
            "sudo systemctl start docker".to_string(),
            "sudo systemctl enable docker".to_string(),
            "docker --version".to_string(),
            "sudo docker compose pull".to_string(),
            "sudo docker compose up -d".to_string(),
        ]
    );
    for call in sequencer.runner().calls() {
        assert!(!call.args.iter().any(|a| a.contains("hunter2")));
    }
}

#[tokio::test]
async fn curl_is_tried_once_when_wget_fails() {
    let fixture = Fixture::new();
    let request = fixture.request().with_resolve_conflicts(false);
    let runner = ScriptedRunner::docker_missing()
        .on_each("docker", &["--version"], vec![Reply::fail(127), Reply::ok()])
        .on("wget", &[], Reply::fail(4));
    let (outcome, transcript, sequencer) = run(runner, fixture.config(), request, true).await;

    assert!(outcome.is_success());
    assert!(transcript.has_line("Trying alternative download method"));
    let curls = sequencer
        .runner()
        .calls()
        .iter()
        .filter(|c| c.program == "curl")
        .count();
    assert_eq!(curls, 1);
}

#[tokio::test]
async fn failed_download_is_a_dependency_failure() {
    let fixture = Fixture::new();
    let request = fixture.request().with_resolve_conflicts(false);
    let runner = ScriptedRunner::docker_missing()
        .on("wget", &[], Reply::fail(4))
        .on("curl", &[], Reply::fail_with(6, &["curl: (6) Could not resolve host"]));
    let (outcome, _, sequencer) = run(runner, fixture.config(), request, true).await;

    match &outcome {
        Outcome::Failed {
            stage,
            reason,
            exit_code,
        } => {
            assert_eq!(*stage, Stage::InstallingDependency);
            assert_eq!(*exit_code, 2);
            assert!(reason.contains("Could not resolve host"), "{reason}");
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert!(!sequencer.runner().called("sh", &[]));
    assert!(!fixture.install_dir().exists());
}

#[tokio::test]
async fn failed_install_script_is_a_dependency_failure() {
    let fixture = Fixture::new();
    let request = fixture.request().with_resolve_conflicts(false);
    let runner = ScriptedRunner::docker_missing().on("sh", &[], Reply::fail(1));
    let (outcome, _, sequencer) = run(runner, fixture.config(), request, true).await;

    assert_eq!(outcome.exit_code(), 2);
    assert!(!sequencer.runner().called("usermod", &[]));
    assert!(!sequencer.runner().called("docker", &["compose"]));
}

#[tokio::test]
async fn service_management_failures_are_not_fatal() {
    let fixture = Fixture::new();
    let request = fixture.request().with_resolve_conflicts(false);
    let runner = ScriptedRunner::docker_missing()
        .on_each("docker", &["--version"], vec![Reply::fail(127), Reply::ok()])
        .on("usermod", &[], Reply::fail(6))
        .on("systemctl", &[], Reply::fail(1));
    let (outcome, transcript, _) = run(runner, fixture.config(), request, true).await;

    assert!(outcome.is_success());
    assert!(transcript.has_line("sudo usermod -aG docker photos"));
}

#[tokio::test]
async fn docker_still_missing_after_install_fails() {
    let fixture = Fixture::new();
    let request = fixture.request().with_resolve_conflicts(false);
    let (outcome, _, sequencer) = run(
        ScriptedRunner::docker_missing(),
        fixture.config(),
        request,
        true,
    )
    .await;

    assert!(matches!(
        outcome,
        Outcome::Failed {
            stage: Stage::InstallingDependency,
            exit_code: 2,
            ..
        }
    ));
    assert!(!sequencer.runner().called("docker", &["compose"]));
}

#[tokio::test]
async fn unreachable_daemon_triggers_install() {
    let fixture = Fixture::new();
    let request = fixture.request().with_resolve_conflicts(false);
    let runner = ScriptedRunner::docker_ready().on("docker", &["ps"], Reply::fail(1));
    let (outcome, transcript, sequencer) = run(runner, fixture.config(), request, true).await;

    assert!(outcome.is_success());
    assert!(transcript.stages.contains(&Stage::InstallingDependency));
    assert!(sequencer.runner().called("sh", &[]));
}

#[tokio::test]
async fn second_run_while_busy_is_rejected() {
    let fixture = Fixture::new();
    let (runner, gate) = ScriptedRunner::docker_ready().gated();
    let sequencer = Arc::new(Sequencer::new(runner, fixture.config()));
    let (sink, transcript) = recording_sink(true);

    let first = tokio::spawn({
        let sequencer = sequencer.clone();
        let sink = sink.clone();
        let request = fixture.request();
        async move { sequencer.run(request, &sink).await }
    });
    while sequencer.runner().calls().is_empty() {
        tokio::task::yield_now().await;
    }
    assert!(sequencer.is_running());

    let (other_sink, other) = recording_sink(true);
    let rejected = sequencer.run(fixture.request(), &other_sink).await;
    drop(other_sink);
    let other = other.await.unwrap();

    match &rejected {
        Outcome::Failed { reason, .. } => assert!(reason.contains("already in progress")),
        other => panic!("unexpected: {other:?}"),
    }
    assert!(other.stages.is_empty());
    assert_eq!(other.outcomes, vec![rejected]);
    assert_eq!(sequencer.runner().calls().len(), 1);

    gate.add_permits(1_000);
    let outcome = first.await.unwrap();
    assert!(outcome.is_success());
    assert!(!sequencer.is_running());

    drop(sink);
    let transcript = transcript.await.unwrap();
    assert_eq!(transcript.outcomes.len(), 1);
}
