//! Script execution orchestration.
//!
//! Checks run in a fixed order so that callers who may not act on a host
//! learn nothing about it: content validation first, then the host lookup
//! with a generic authorization on miss, then the host's team.

pub mod validate;

use std::time::Duration;

use armada_core::db::unix_timestamp;
use armada_core::retry::{Poll, PollOutcome, poll_until};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::activity::ActivityDetails;
use crate::authz::{Action, AuthzSubject, ResourceKind, Viewer};
use crate::error::{ResultExt, ServiceError, ServiceResult};
use crate::service::Service;
use crate::storage::{
    DatabaseError, Host, HostScriptResult, NewScriptExecution, Script, ScriptCompletion, team_key,
};

/// Agent output beyond this many characters is dropped from the front.
pub const MAX_OUTPUT_CHARS: usize = 10_000;

/// A request to run one script on one host.
#[derive(Debug, Clone, Default)]
pub struct RunScriptRequest {
    pub host_id: i64,
    pub script_id: Option<i64>,
    pub contents: Option<String>,
    pub script_name: Option<String>,
    /// Team the named script belongs to; `None` is "no team".
    pub team_id: Option<i64>,
    /// How long to wait for the result. Zero queues and returns.
    pub wait: Duration,
}

/// What a script run produced by the time the call returned.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", content = "result", rename_all = "snake_case")]
pub enum RunScriptOutcome {
    /// Queued without waiting.
    Queued(HostScriptResult),
    /// The host reported an exit code within the wait.
    Completed(HostScriptResult),
    /// The wait ended first. The execution stays queued and can be looked
    /// up by its execution id.
    DeadlineExceeded(HostScriptResult),
}

impl RunScriptOutcome {
    pub const fn result(&self) -> &HostScriptResult {
        match self {
            Self::Queued(r) | Self::Completed(r) | Self::DeadlineExceeded(r) => r,
        }
    }

    pub fn into_result(self) -> HostScriptResult {
        match self {
            Self::Queued(r) | Self::Completed(r) | Self::DeadlineExceeded(r) => r,
        }
    }
}

enum Source<'a> {
    Saved(i64),
    Inline(&'a str),
    Named(&'a str),
}

impl Service {
    /// Queue a script on a host, optionally waiting for its result.
    #[instrument(skip(self, viewer, request), fields(host_id = request.host_id, sync = !request.wait.is_zero()))]
    pub async fn run_host_script(
        &self,
        viewer: &Viewer,
        request: RunScriptRequest,
    ) -> ServiceResult<RunScriptOutcome> {
        let source = match (
            request.script_id,
            request.contents.as_deref(),
            request.script_name.as_deref(),
        ) {
            (Some(id), None, None) => Source::Saved(id),
            (None, Some(contents), None) => Source::Inline(contents),
            (None, None, Some(name)) if !name.trim().is_empty() => Source::Named(name),
            _ => {
                return Err(ServiceError::InvalidArgument(
                    "Specify exactly one of script_id, script_contents or script_name.".to_string(),
                ));
            }
        };
        if request.team_id.is_some() && !matches!(source, Source::Named(_)) {
            return Err(ServiceError::InvalidArgument(
                "team_id may only be used together with script_name.".to_string(),
            ));
        }
        if let Source::Inline(contents) = source {
            validate::validate_contents(contents, self.scripts.max_inline_chars)
                .map_err(ServiceError::InvalidArgument)?;
        }

        if request.team_id.is_some() && !self.license.is_premium() {
            return Err(ServiceError::MissingLicense);
        }

        let script_id = match source {
            Source::Saved(id) => Some(id),
            Source::Inline(_) => None,
            Source::Named(name) => {
                let script = self
                    .ds
                    .script_by_name(team_key(request.team_id), name)
                    .await
                    .context("load script by name")?;
                let Some(script) = script else {
                    self.authorize_generic(ResourceKind::Script, viewer, Action::Write)?;
                    return Err(ServiceError::NotFound("Script".to_string()));
                };
                Some(script.id)
            }
        };

        let host = self
            .ds
            .host(request.host_id)
            .await
            .context("load host")?;
        let Some(host) = host else {
            self.authorize_generic(ResourceKind::Script, viewer, Action::Write)?;
            return Err(ServiceError::NotFound("Host".to_string()));
        };

        if !host.scripts_capable {
            return Err(ServiceError::PreconditionFailed(
                "The host's agent can't run scripts. Update the agent and try again.".to_string(),
            ));
        }
        if host.scripts_enabled == Some(false) {
            return Err(ServiceError::PreconditionFailed(
                "Scripts are disabled on this host. Enable scripts in the agent settings and try again."
                    .to_string(),
            ));
        }

        self.authz.authorize(
            viewer,
            &AuthzSubject::new(ResourceKind::Script, host.team_id),
            Action::Write,
        )?;

        let (contents, script_name) = match script_id {
            Some(id) => {
                let script = self.saved_script_for_host(id, &host).await?;
                (script.contents, Some(script.name))
            }
            None => (request.contents.clone().unwrap_or_default(), None),
        };

        // Best-effort bounds: concurrent submissions can race past them.
        let pending = self
            .ds
            .pending_host_script_executions(host.id)
            .await
            .context("list pending executions")?;
        if pending.len() >= self.scripts.max_pending_per_host {
            return Err(ServiceError::Conflict(format!(
                "The host already has {} scripts queued. Wait for them to finish and try again.",
                pending.len()
            )));
        }

        let sync = !request.wait.is_zero();
        if sync {
            let interval = i64::try_from(self.scripts.host_online_interval_secs).unwrap_or(i64::MAX);
            if !host.is_online(unix_timestamp(), interval) {
                return Err(ServiceError::PreconditionFailed(
                    "The host is offline. Run the script asynchronously or try again when the host is online."
                        .to_string(),
                ));
            }
            if !pending.is_empty() {
                return Err(ServiceError::Conflict(
                    "A script is already running on this host. Wait for it to finish and try again."
                        .to_string(),
                ));
            }
        }

        let queued = self
            .ds
            .new_host_script_execution(&NewScriptExecution {
                host_id: host.id,
                script_id,
                contents,
                sync_request: sync,
            })
            .await
            .context("queue script execution")?;

        self.activity
            .record(
                viewer,
                &ActivityDetails::RanScript {
                    host_id: host.id,
                    host_display_name: host.hostname.clone(),
                    script_execution_id: queued.execution_id.clone(),
                    script_name,
                    is_async: !sync,
                },
            )
            .await?;

        info!(
            host_id = host.id,
            execution_id = %queued.execution_id,
            sync,
            "Script execution queued"
        );

        if !sync {
            return Ok(RunScriptOutcome::Queued(queued));
        }
        self.wait_for_script_result(queued, request.wait).await
    }

    /// Poll for an execution's exit code until `wait` runs out.
    async fn wait_for_script_result(
        &self,
        queued: HostScriptResult,
        wait: Duration,
    ) -> ServiceResult<RunScriptOutcome> {
        let ds = self.ds.as_ref();
        let execution_id = queued.execution_id.as_str();
        let deadline = Instant::now() + wait;

        let outcome = poll_until(&self.scripts.sync_poll(), deadline, || async move {
            let current = ds
                .host_script_result(execution_id)
                .await
                .context("poll script result")?
                .ok_or_else(|| ServiceError::NotFound("Script execution".to_string()))?;
            Ok::<_, ServiceError>(if current.exit_code.is_some() {
                Poll::Ready(current)
            } else {
                Poll::Pending(current)
            })
        })
        .await?;

        match outcome {
            PollOutcome::Ready(result) => Ok(RunScriptOutcome::Completed(result)),
            PollOutcome::DeadlineExceeded(last) => {
                warn!(
                    execution_id,
                    wait_ms = wait.as_millis(),
                    "Script result not available before the deadline"
                );
                Ok(RunScriptOutcome::DeadlineExceeded(last.unwrap_or_else(|| queued.clone())))
            }
        }
    }

    /// Load a saved script for a host, rejecting one from another team or
    /// one already queued there.
    async fn saved_script_for_host(&self, script_id: i64, host: &Host) -> ServiceResult<Script> {
        let script = self
            .ds
            .script(script_id)
            .await
            .context("load script")?
            .ok_or_else(|| ServiceError::NotFound("Script".to_string()))?;

        if script.team_id != team_key(host.team_id) {
            return Err(ServiceError::InvalidArgument(
                "The script doesn't belong to the same team as the host.".to_string(),
            ));
        }

        if self
            .ds
            .is_script_execution_pending(host.id, script.id)
            .await
            .context("check pending script")?
        {
            return Err(ServiceError::Conflict(
                "The script is already queued on the host.".to_string(),
            ));
        }
        Ok(script)
    }

    /// Save a script for later runs.
    #[instrument(skip(self, viewer, contents))]
    pub async fn create_script(
        &self,
        viewer: &Viewer,
        team_id: Option<i64>,
        name: &str,
        contents: &str,
    ) -> ServiceResult<Script> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ServiceError::InvalidArgument(
                "Script name must not be empty.".to_string(),
            ));
        }
        validate::validate_contents(contents, self.scripts.max_saved_chars)
            .map_err(ServiceError::InvalidArgument)?;

        if team_id.is_some() && !self.license.is_premium() {
            return Err(ServiceError::MissingLicense);
        }

        let team = match team_id {
            Some(id) => {
                let Some(team) = self.ds.team(id).await.context("load team")? else {
                    self.authorize_generic(ResourceKind::Script, viewer, Action::Write)?;
                    return Err(ServiceError::NotFound("Team".to_string()));
                };
                Some(team)
            }
            None => None,
        };

        self.authz.authorize(
            viewer,
            &AuthzSubject::new(ResourceKind::Script, team_id),
            Action::Write,
        )?;

        let script = match self
            .ds
            .create_script(team_key(team_id), name, contents)
            .await
        {
            Ok(script) => script,
            Err(DatabaseError::Unique(_)) => {
                return Err(ServiceError::Conflict(format!(
                    "A script named \"{name}\" already exists for this team."
                )));
            }
            Err(e) => return Err(ServiceError::internal("save script", e)),
        };

        self.activity
            .record(
                viewer,
                &ActivityDetails::AddedScript {
                    script_name: script.name.clone(),
                    team_id,
                    team_name: team.map(|t| t.name),
                },
            )
            .await?;

        info!(script_id = script.id, team_id, "Script saved");
        Ok(script)
    }

    /// Look up an execution, authorized against its host's team.
    #[instrument(skip(self, viewer))]
    pub async fn get_script_result(
        &self,
        viewer: &Viewer,
        execution_id: &str,
    ) -> ServiceResult<HostScriptResult> {
        let result = self
            .ds
            .host_script_result(execution_id)
            .await
            .context("load script result")?;
        let host = match &result {
            Some(r) => self.ds.host(r.host_id).await.context("load host")?,
            None => None,
        };

        let (Some(result), Some(host)) = (result, host) else {
            self.authorize_generic(ResourceKind::ScriptResult, viewer, Action::Read)?;
            return Err(ServiceError::NotFound("Script result".to_string()));
        };

        self.authz.authorize(
            viewer,
            &AuthzSubject::new(ResourceKind::ScriptResult, host.team_id),
            Action::Read,
        )?;
        Ok(result)
    }

    /// Store an agent's completion report.
    #[instrument(skip(self, completion), fields(exit_code = completion.exit_code))]
    pub async fn record_script_result(
        &self,
        host_id: i64,
        execution_id: &str,
        mut completion: ScriptCompletion,
    ) -> ServiceResult<()> {
        completion.output = truncate_output(completion.output);

        let updated = self
            .ds
            .set_host_script_result(host_id, execution_id, &completion)
            .await
            .context("store script result")?;
        if updated {
            info!(host_id, execution_id, "Script result recorded");
            return Ok(());
        }

        match self
            .ds
            .host_script_result(execution_id)
            .await
            .context("load script result")?
        {
            Some(existing) if existing.host_id == host_id => Err(ServiceError::Conflict(
                "A result was already recorded for this execution.".to_string(),
            )),
            _ => Err(ServiceError::NotFound("Script execution".to_string())),
        }
    }

    fn authorize_generic(
        &self,
        kind: ResourceKind,
        viewer: &Viewer,
        action: Action,
    ) -> ServiceResult<()> {
        self.authz
            .authorize(viewer, &AuthzSubject::generic(kind), action)
            .map_err(Into::into)
    }
}

/// Keep the last [`MAX_OUTPUT_CHARS`] characters of `output`.
fn truncate_output(output: String) -> String {
    let count = output.chars().count();
    if count <= MAX_OUTPUT_CHARS {
        return output;
    }
    output.chars().skip(count - MAX_OUTPUT_CHARS).collect()
}
