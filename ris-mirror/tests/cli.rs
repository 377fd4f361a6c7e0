use assert_cmd::Command;
use predicates::prelude::*;
use std::fs::write;
use tempfile::{tempdir, NamedTempFile, TempDir};

/// Writes a config whose output directory is a fresh temp dir; nothing in these tests
/// reaches the network.
fn create_minimal_config() -> (NamedTempFile, TempDir) {
    let output = tempdir().expect("Creating temp output dir failed");
    let config = NamedTempFile::new().expect("Creating temp config file failed");
    let yaml = format!(
        "output_dir: {}\nmirror:\n  portal:\n    base_url: \"https://ris.example.org/bi/\"\n  workers: 2\n",
        output.path().display()
    );
    write(config.path(), yaml).expect("Writing temp config failed");
    (config, output)
}

#[test]
fn help_lists_every_command() {
    let mut cmd = Command::cargo_bin("ris-mirror").expect("Binary exists");
    cmd.arg("--help").assert().success().stdout(
        predicate::str::contains("sessions")
            .and(predicate::str::contains("proposals"))
            .and(predicate::str::contains("last-n"))
            .and(predicate::str::contains("dispatch")),
    );
}

#[test]
fn invalid_since_date_is_rejected_by_the_parser() {
    let (config, _output) = create_minimal_config();
    let mut cmd = Command::cargo_bin("ris-mirror").expect("Binary exists");
    cmd.arg("sessions")
        .arg("--config")
        .arg(config.path())
        .arg("--since")
        .arg("01.01.2024");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("--since"));
}

#[test]
fn dispatch_with_unknown_category_fails() {
    let (config, _output) = create_minimal_config();
    let message = r#"{"category":"Minutes","name":"minutes-1","created":"2024-01-10T00:00:00Z","request_uri":"https://ris.example.org/bi/mi001.asp"}"#;
    let mut cmd = Command::cargo_bin("ris-mirror").expect("Binary exists");
    cmd.arg("dispatch")
        .arg("--config")
        .arg(config.path())
        .arg("--message")
        .arg(message);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("unknown resource category `Minutes`"));
}

#[test]
fn dispatch_of_an_index_page_fails_without_fetching() {
    let (config, output) = create_minimal_config();
    let message = r#"{"category":"SessionList","name":"all-sessions","created":"2024-01-10T00:00:00Z","request_uri":"https://ris.example.org/bi/si0046.asp"}"#;
    let mut cmd = Command::cargo_bin("ris-mirror").expect("Binary exists");
    cmd.arg("--inline")
        .arg("dispatch")
        .arg("--config")
        .arg(config.path())
        .arg("--message")
        .arg(message);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("no downloader for SessionList resource"));
    let written = std::fs::read_dir(output.path()).unwrap().count();
    assert_eq!(written, 0, "nothing should be stored");
}

use std::sync::{Arc, Mutex};
use tracing_subscriber::prelude::*; // needed for .with()
use tracing_subscriber::{layer::Context, Layer, Registry};

/// Custom Layer to collect emitted event messages.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        use std::fmt::Write as FmtWrite;
        let mut msg = String::new();
        let _ = write!(&mut msg, "{:?}", event);
        self.events.lock().unwrap().push(msg);
    }
}

#[tokio::test]
async fn emits_trace_initialised_event() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    use ris_mirror::cli::{run, Cli, Commands};

    // A dummy path: loading fails, but only after the first event.
    let cli = Cli {
        redownload: false,
        inline: true,
        dry_run: true,
        command: Commands::LastN {
            config: std::path::PathBuf::from("dummy.yaml"),
            count: 3,
        },
    };

    let result = run(cli).await;
    assert!(result.is_err(), "missing config must fail");

    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs.iter().any(|msg| msg.contains("trace_initialised")),
        "Expected a 'trace_initialised' trace event, got: {:?}",
        event_msgs
    );
}
