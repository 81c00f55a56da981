//! Ansible subprocess adapter
//!
//! Job definitions are playbooks named `{playbooks_dir}/{definition}.yml`,
//! run with the JSON stdout callback. Each host reports its metrics by
//! setting the `fleet_metrics` fact. Ad-hoc commands and the connectivity
//! probe use `ansible -o` one-line output.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::process::Output;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, instrument, trace, warn};

use super::{
    ConnectivityProbe, ExecError, ExecutionReport, HostResult, HostStats, JobSpec, OverallStatus,
    ProbeResult, RemoteExecutor, Target,
};

/// Fact name each collection playbook sets on its hosts
pub const METRICS_FACT: &str = "fleet_metrics";

pub struct AnsibleExecutor {
    inventory_path: PathBuf,
    playbooks_dir: PathBuf,
    ansible_bin: String,
    playbook_bin: String,
}

impl AnsibleExecutor {
    pub fn new(inventory_path: impl Into<PathBuf>, playbooks_dir: impl Into<PathBuf>) -> Self {
        Self {
            inventory_path: inventory_path.into(),
            playbooks_dir: playbooks_dir.into(),
            ansible_bin: "ansible".to_string(),
            playbook_bin: "ansible-playbook".to_string(),
        }
    }

    /// Override the `ansible` / `ansible-playbook` executables
    pub fn with_binaries(mut self, ansible: impl Into<String>, playbook: impl Into<String>) -> Self {
        self.ansible_bin = ansible.into();
        self.playbook_bin = playbook.into();
        self
    }

    fn playbook_path(&self, definition: &str) -> PathBuf {
        self.playbooks_dir.join(format!("{definition}.yml"))
    }

    async fn run(&self, command: &mut Command, program: &str) -> Result<Output, ExecError> {
        command
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ExecError::Transient(format!("failed to spawn {program}: {e}")))
    }
}

fn stderr_excerpt(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        format!("exit status {}", output.status)
    } else {
        trimmed.lines().last().unwrap_or(trimmed).to_string()
    }
}

#[async_trait]
impl RemoteExecutor for AnsibleExecutor {
    #[instrument(skip(self), fields(definition = %job.definition))]
    async fn execute(&self, job: &JobSpec, target: &Target) -> Result<ExecutionReport, ExecError> {
        let playbook = self.playbook_path(&job.definition);
        if !tokio::fs::try_exists(&playbook).await.unwrap_or(false) {
            return Err(ExecError::DefinitionNotFound(playbook.display().to_string()));
        }

        debug!("running {} against {}", playbook.display(), target.pattern());

        let mut command = Command::new(&self.playbook_bin);
        command
            .arg("-i")
            .arg(&self.inventory_path)
            .arg("--limit")
            .arg(target.pattern())
            .arg(&playbook)
            .env("ANSIBLE_STDOUT_CALLBACK", "json")
            .env("ANSIBLE_HOST_KEY_CHECKING", "False");

        let output = self.run(&mut command, &self.playbook_bin).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        match parse_playbook_output(&stdout) {
            Ok(report) if !report.host_results.is_empty() => {
                trace!("playbook produced {} host results", report.host_results.len());
                Ok(report)
            }
            Ok(_) => Err(ExecError::Transient(format!(
                "playbook produced no host results ({})",
                stderr_excerpt(&output)
            ))),
            Err(e) => {
                warn!("unparseable playbook output: {e}");
                Err(ExecError::Transient(format!(
                    "playbook failed without host results ({})",
                    stderr_excerpt(&output)
                )))
            }
        }
    }

    #[instrument(skip(self, hosts), fields(hosts = hosts.len()))]
    async fn run_ad_hoc(
        &self,
        hosts: &[String],
        module: &str,
        args: &str,
    ) -> Result<Vec<HostResult>, ExecError> {
        let mut command = Command::new(&self.ansible_bin);
        command
            .arg(hosts.join(":"))
            .arg("-i")
            .arg(&self.inventory_path)
            .arg("-m")
            .arg(module)
            .arg("-o")
            .env("ANSIBLE_HOST_KEY_CHECKING", "False");
        if !args.is_empty() {
            command.arg("-a").arg(args);
        }

        let output = self.run(&mut command, &self.ansible_bin).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        let mut parsed: BTreeMap<String, HostResult> = parse_oneline_output(&stdout)
            .into_iter()
            .map(|result| (result.host.clone(), result))
            .collect();

        if parsed.is_empty() && !output.status.success() {
            return Err(ExecError::Transient(format!(
                "ansible failed without host results ({})",
                stderr_excerpt(&output)
            )));
        }

        Ok(hosts
            .iter()
            .map(|host| {
                parsed
                    .remove(host)
                    .unwrap_or_else(|| HostResult::failed(host, "no output from host"))
            })
            .collect())
    }
}

#[async_trait]
impl ConnectivityProbe for AnsibleExecutor {
    async fn ping(&self, host: &str) -> ProbeResult {
        match self.run_ad_hoc(&[host.to_string()], "ping", "").await {
            Ok(results) => match results.into_iter().next() {
                Some(HostResult {
                    outcome: super::HostOutcome::Ok { .. },
                    ..
                }) => ProbeResult {
                    success: true,
                    message: "pong".to_string(),
                },
                Some(HostResult {
                    outcome: super::HostOutcome::Failed { error },
                    ..
                }) => ProbeResult {
                    success: false,
                    message: error,
                },
                None => ProbeResult {
                    success: false,
                    message: "no result".to_string(),
                },
            },
            Err(e) => ProbeResult {
                success: false,
                message: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlaybookOutput {
    #[serde(default)]
    plays: Vec<Play>,
    #[serde(default)]
    stats: BTreeMap<String, HostStats>,
}

#[derive(Debug, Deserialize)]
struct Play {
    #[serde(default)]
    tasks: Vec<Task>,
}

#[derive(Debug, Deserialize)]
struct Task {
    #[serde(default)]
    hosts: BTreeMap<String, Value>,
}

fn failure_message(result: &Value) -> Option<String> {
    let flagged = |key: &str| result.get(key).and_then(Value::as_bool).unwrap_or(false);
    if !flagged("failed") && !flagged("unreachable") {
        return None;
    }

    let msg = result
        .get("msg")
        .and_then(Value::as_str)
        .unwrap_or(if flagged("unreachable") {
            "host unreachable"
        } else {
            "task failed"
        });
    Some(msg.to_string())
}

/// Parse `ANSIBLE_STDOUT_CALLBACK=json` output into per-host results
pub fn parse_playbook_output(stdout: &str) -> Result<ExecutionReport, String> {
    // deprecation warnings may precede the document
    let start = stdout.find('{').ok_or("no JSON document in output")?;
    let output: PlaybookOutput =
        serde_json::from_str(&stdout[start..]).map_err(|e| e.to_string())?;

    let mut metrics: BTreeMap<String, Value> = BTreeMap::new();
    let mut failures: BTreeMap<String, String> = BTreeMap::new();

    for task in output.plays.iter().flat_map(|p| &p.tasks) {
        for (host, result) in &task.hosts {
            if let Some(fact) = result
                .get("ansible_facts")
                .and_then(|facts| facts.get(METRICS_FACT))
            {
                metrics.insert(host.clone(), fact.clone());
            }
            if let Some(msg) = failure_message(result) {
                failures.entry(host.clone()).or_insert(msg);
            }
        }
    }

    let hosts: BTreeSet<&String> = output
        .stats
        .keys()
        .chain(metrics.keys())
        .chain(failures.keys())
        .collect();

    let host_results = hosts
        .into_iter()
        .map(|host| {
            let stats = output.stats.get(host).cloned().unwrap_or_default();
            match failures.get(host) {
                Some(msg) => HostResult::failed(host, msg.clone()),
                None if stats.failures > 0 || stats.unreachable > 0 => {
                    HostResult::failed(host, "host reported failures")
                }
                None => HostResult::ok(host, metrics.get(host).cloned().unwrap_or(Value::Null)),
            }
        })
        .collect::<Vec<_>>();

    let overall_status = if host_results.iter().all(HostResult::is_ok) {
        OverallStatus::Successful
    } else {
        OverallStatus::Failed
    };

    Ok(ExecutionReport {
        overall_status,
        host_results,
        stats: output.stats,
    })
}

/// Parse one line of `ansible -o` output
fn parse_oneline(line: &str) -> Option<HostResult> {
    let (host, rest) = line.split_once(" | ")?;
    let host = host.trim();
    if host.is_empty() || host.contains(' ') {
        return None;
    }

    let (status, detail) = match rest.split_once(" => ") {
        Some((status, json)) => (status.trim(), Some(json.trim())),
        None => (rest.split(" | ").next().unwrap_or(rest).trim(), None),
    };

    let ok = matches!(status, "SUCCESS" | "CHANGED");
    let failed = matches!(status, "FAILED" | "FAILED!" | "UNREACHABLE!");
    if !ok && !failed {
        return None;
    }

    let payload = match detail {
        Some(json) => serde_json::from_str(json).unwrap_or_else(|_| Value::String(json.to_string())),
        None => {
            // `host | CHANGED | rc=0 | (stdout) text`
            let mut fields = rest.split(" | ").skip(1);
            let rc = fields
                .next()
                .and_then(|f| f.strip_prefix("rc="))
                .and_then(|rc| rc.parse::<i64>().ok());
            let stdout = fields
                .next()
                .map(|f| f.strip_prefix("(stdout)").unwrap_or(f).trim().to_string())
                .unwrap_or_default();
            serde_json::json!({ "rc": rc, "stdout": stdout })
        }
    };

    if ok {
        Some(HostResult::ok(host, payload))
    } else {
        let message = payload
            .get("msg")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| payload.get("stdout").and_then(Value::as_str).map(str::to_string))
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| status.trim_end_matches('!').to_lowercase());
        Some(HostResult::failed(host, message))
    }
}

pub fn parse_oneline_output(stdout: &str) -> Vec<HostResult> {
    stdout.lines().filter_map(parse_oneline).collect()
}
