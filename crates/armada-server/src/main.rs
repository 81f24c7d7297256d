//! Armada operator CLI
//!
//! Runs control plane operations against the local database as a global
//! administrator. User-facing output is JSON written to stdout.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::info;

use armada_core::config::{Config, default_database_path, load_config};
use armada_core::tracing_init::init_tracing;
use armada_server::Service;
use armada_server::activity::{WebhookClient, WebhookSender, WebhookWorker};
use armada_server::authz::{Role, Viewer};
use armada_server::profiles::{ProfileSpec, TeamSelector};
use armada_server::scripts::RunScriptRequest;
use armada_server::scripts::validate::decode_contents;
use armada_server::storage::ServerDatabase;

/// How long queued webhook deliveries may take to drain on exit.
const WEBHOOK_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "armada")]
#[command(version, about = "Armada control plane - operator commands")]
struct Cli {
    /// Path to a JSON config file.
    #[arg(long, env = "ARMADA_CONFIG")]
    config: Option<PathBuf>,

    /// Path to SQLite database file.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,

    /// Identity recorded as the actor of audit activities.
    #[arg(long, env = "ARMADA_OPERATOR_EMAIL", default_value = "operator@localhost")]
    operator_email: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a base64-encoded MDM command to hosts.
    SendCommand {
        /// Base64 command payload, padded or not.
        #[arg(long)]
        payload: String,
        /// Target host uuids.
        #[arg(long = "host", required = true)]
        hosts: Vec<String>,
    },
    /// Show per-host results of an MDM command.
    CommandResults { command_uuid: String },
    /// Replace a team's configuration profiles from a manifest.
    ApplyProfiles {
        /// JSON manifest listing profile files and label scopes.
        manifest: PathBuf,
        #[arg(long, conflicts_with = "team_name")]
        team_id: Option<i64>,
        #[arg(long)]
        team_name: Option<String>,
        /// Validate without storing anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Resend a profile to a host.
    ResendProfile {
        host_id: i64,
        profile_uuid: String,
    },
    /// Show delivery state of every profile on a host.
    HostProfiles { host_id: i64 },
    /// Run a script on a host.
    RunScript {
        host_id: i64,
        /// Saved script id.
        #[arg(long, conflicts_with_all = ["file", "name"])]
        script_id: Option<i64>,
        /// Local script file to run as-is.
        #[arg(long, conflicts_with = "name")]
        file: Option<PathBuf>,
        /// Saved script name.
        #[arg(long)]
        name: Option<String>,
        /// Team of the named script.
        #[arg(long, requires = "name")]
        team_id: Option<i64>,
        /// Seconds to wait for the result; 0 queues and returns.
        #[arg(long, default_value_t = 0)]
        wait_secs: u64,
    },
    /// Save a script for later runs.
    CreateScript {
        file: PathBuf,
        /// Defaults to the file name.
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        team_id: Option<i64>,
    },
    /// Show the result of a script execution.
    ScriptResult { execution_id: String },
}

/// One profile in an `apply-profiles` manifest.
#[derive(Debug, Deserialize)]
struct ManifestEntry {
    /// Relative to the manifest's directory.
    path: PathBuf,
    /// Defaults to the file stem.
    name: Option<String>,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    labels_include_all: Vec<String>,
    #[serde(default)]
    labels_include_any: Vec<String>,
    #[serde(default)]
    labels_exclude_any: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing("armada_server=info", cli.log_json);
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = load_config(cli.config.as_deref())?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting armada");

    let db_path = cli
        .db_path
        .clone()
        .or_else(|| config.server.database_path.clone())
        .or_else(default_database_path)
        .ok_or_else(|| anyhow::anyhow!("Cannot determine database path"))?;
    info!(path = %db_path.display(), "Opening database");
    let db = Arc::new(ServerDatabase::open(&db_path).await?);

    let mut service = Service::new(db, &config);
    let worker = match start_webhook(&config)? {
        Some((sender, worker)) => {
            service = service.with_webhook(sender);
            Some(worker)
        }
        None => None,
    };

    let viewer = Viewer::global("0", "Operator", &cli.operator_email, Role::Admin);
    let result = run(&service, &viewer, cli.command).await;

    // Dropping the service closes the webhook queue so the worker can drain.
    drop(service);
    if let Some(worker) = worker {
        worker.shutdown(WEBHOOK_DRAIN_TIMEOUT).await;
    }

    result
}

fn start_webhook(
    config: &Config,
) -> anyhow::Result<Option<(WebhookSender, WebhookWorker)>> {
    let webhook = &config.webhook;
    let Some(url) = webhook.url.as_deref().filter(|_| webhook.enabled) else {
        return Ok(None);
    };

    let client = WebhookClient::new(
        url,
        Duration::from_secs(webhook.request_timeout_secs),
        webhook.backoff(),
    )?;
    Ok(Some(WebhookWorker::spawn(
        client,
        webhook.queue_capacity,
        webhook.max_concurrency,
    )))
}

async fn run(service: &Service, viewer: &Viewer, command: Command) -> anyhow::Result<()> {
    match command {
        Command::SendCommand { payload, hosts } => {
            print_json(&service.run_mdm_command(viewer, &payload, &hosts).await?)
        }
        Command::CommandResults { command_uuid } => {
            print_json(&service.get_command_results(viewer, &command_uuid).await?)
        }
        Command::ApplyProfiles {
            manifest,
            team_id,
            team_name,
            dry_run,
        } => {
            let team = TeamSelector::from_parts(team_id, team_name.as_deref())
                .map_err(|e| anyhow::anyhow!(e))?;
            let profiles = load_manifest(&manifest)?;
            print_json(
                &service
                    .batch_set_profiles(viewer, team, dry_run, profiles)
                    .await?,
            )
        }
        Command::ResendProfile {
            host_id,
            profile_uuid,
        } => print_json(
            &service
                .resend_host_profile(viewer, host_id, &profile_uuid)
                .await?,
        ),
        Command::HostProfiles { host_id } => {
            print_json(&service.list_host_profiles(viewer, host_id).await?)
        }
        Command::RunScript {
            host_id,
            script_id,
            file,
            name,
            team_id,
            wait_secs,
        } => {
            let contents = file.as_deref().map(read_script).transpose()?;
            let request = RunScriptRequest {
                host_id,
                script_id,
                contents,
                script_name: name,
                team_id,
                wait: Duration::from_secs(wait_secs),
            };
            print_json(&service.run_host_script(viewer, request).await?)
        }
        Command::CreateScript {
            file,
            name,
            team_id,
        } => {
            let contents = read_script(&file)?;
            let name = match name {
                Some(name) => name,
                None => file_name(&file)?,
            };
            print_json(
                &service
                    .create_script(viewer, team_id, &name, &contents)
                    .await?,
            )
        }
        Command::ScriptResult { execution_id } => {
            print_json(&service.get_script_result(viewer, &execution_id).await?)
        }
    }
}

fn load_manifest(path: &Path) -> anyhow::Result<Vec<ProfileSpec>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;
    let entries: Vec<ManifestEntry> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse manifest {}", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));

    entries
        .into_iter()
        .map(|entry| {
            let file = base.join(&entry.path);
            let contents = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read profile {}", file.display()))?;
            let name = match entry.name {
                Some(name) => name,
                None => file
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .ok_or_else(|| anyhow::anyhow!("Profile path {} has no file name", file.display()))?,
            };
            Ok(ProfileSpec {
                name,
                contents,
                labels: entry.labels,
                labels_include_all: entry.labels_include_all,
                labels_include_any: entry.labels_include_any,
                labels_exclude_any: entry.labels_exclude_any,
            })
        })
        .collect()
}

fn read_script(path: &Path) -> anyhow::Result<String> {
    let raw = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    decode_contents(raw).map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))
}

fn file_name(path: &Path) -> anyhow::Result<String> {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow::anyhow!("{} has no file name", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let mut out = io::stdout();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn manifest_paths_are_relative_to_the_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("profiles")).unwrap();
        std::fs::write(dir.path().join("profiles/wifi.mobileconfig"), "<plist/>").unwrap();
        std::fs::write(dir.path().join("camera.xml"), "<Replace/>").unwrap();
        let manifest = dir.path().join("manifest.json");
        std::fs::write(
            &manifest,
            r#"[
                {"path": "profiles/wifi.mobileconfig", "labels_include_any": ["eng"]},
                {"path": "camera.xml", "name": "Camera"}
            ]"#,
        )
        .unwrap();

        let profiles = load_manifest(&manifest).unwrap();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].name, "wifi");
        assert_eq!(profiles[0].contents, "<plist/>");
        assert_eq!(profiles[0].labels_include_any, vec!["eng".to_string()]);
        assert_eq!(profiles[1].name, "Camera");
    }

    #[test]
    fn missing_profile_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("manifest.json");
        std::fs::write(&manifest, r#"[{"path": "gone.xml"}]"#).unwrap();

        let err = load_manifest(&manifest).unwrap_err();
        assert!(err.to_string().contains("gone.xml"));
    }

    #[test]
    fn non_utf8_script_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.sh");
        std::fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();
        assert!(read_script(&path).is_err());
    }

    #[test]
    fn cli_requires_a_script_source_flag_combination() {
        let cli = Cli::try_parse_from([
            "armada",
            "run-script",
            "7",
            "--name",
            "uptime.sh",
            "--team-id",
            "3",
            "--wait-secs",
            "30",
        ])
        .unwrap();
        let Command::RunScript {
            host_id,
            name,
            team_id,
            wait_secs,
            ..
        } = cli.command
        else {
            unreachable!("parsed a different subcommand");
        };
        assert_eq!(host_id, 7);
        assert_eq!(name.as_deref(), Some("uptime.sh"));
        assert_eq!(team_id, Some(3));
        assert_eq!(wait_secs, 30);

        assert!(Cli::try_parse_from(["armada", "run-script", "7", "--team-id", "3"]).is_err());
    }
}
