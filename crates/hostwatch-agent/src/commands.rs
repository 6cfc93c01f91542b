//! Command dispatch: one envelope in, one envelope out.
//!
//! Handler failures of any kind become `success=false` bodies; the HTTP
//! layer never sees them as transport errors.

use crate::reporter::snapshot_payload;
use crate::scripts;
use crate::state::AgentContext;
use hostwatch_common::error::AgentError;
use hostwatch_common::sanitize;
use hostwatch_common::types::{Command, CommandResponse, FamilySelection, MetricFamily};
use hostwatch_exec::{runner, JobSpec, RunSpec};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub async fn dispatch(ctx: &Arc<AgentContext>, cmd: Command) -> CommandResponse {
    let name = cmd.command.clone();
    let result = match name.as_str() {
        "collect_metrics" => collect_metrics(ctx, &cmd).await,
        "update_config" => update_config(ctx, &cmd),
        "restart" => restart(),
        "stop" => stop(ctx),
        "run_script" => run_script(ctx, &cmd).await,
        "get_job_output" => get_job_output(ctx, &cmd),
        "kill_job" => kill_job(ctx, &cmd),
        "list_jobs" => list_jobs(ctx),
        "push_script" => push_script(ctx, &cmd),
        "list_scripts" => list_scripts(ctx),
        "delete_script" => delete_script(ctx, &cmd),
        other => return CommandResponse::fail(format!("Unknown command: {other}")),
    };

    match result {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(command = %name, error = %err, "command failed");
            CommandResponse::fail(err.to_string())
        }
    }
}

// ---- collect_metrics -------------------------------------------------------

async fn collect_metrics(
    ctx: &Arc<AgentContext>,
    cmd: &Command,
) -> Result<CommandResponse, AgentError> {
    let requested = requested_families(&cmd.data);
    let selection: FamilySelection = {
        let config = ctx.config.lock().unwrap();
        match requested {
            Some(families) => families
                .into_iter()
                .filter(|family| config.is_metric_enabled(*family))
                .collect(),
            None => config.enabled_families().into_iter().collect(),
        }
    };

    let probe_ctx = Arc::clone(ctx);
    let snapshot = tokio::task::spawn_blocking(move || probe_ctx.probe.collect(&selection))
        .await
        .map_err(|err| AgentError::internal(format!("collection task failed: {err}")))?;

    let (payload, capacity) = {
        let config = ctx.config.lock().unwrap();
        (snapshot_payload(&config, &snapshot), config.max_buffer_size)
    };
    ctx.reporter.enqueue(payload, capacity);

    Ok(CommandResponse::ok(
        "Metrics collected",
        serde_json::to_value(&snapshot)?,
    ))
}

/// `metrics` is either an array of family names or an object of booleans;
/// unknown names are tolerated, absence means "whatever the config enables".
fn requested_families(data: &Value) -> Option<Vec<MetricFamily>> {
    match data.get("metrics") {
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .filter_map(|name| name.parse().ok())
                .collect(),
        ),
        Some(Value::Object(map)) => Some(
            map.iter()
                .filter(|(_, flag)| flag.as_bool() == Some(true))
                .filter_map(|(name, _)| name.parse().ok())
                .collect(),
        ),
        _ => None,
    }
}

// ---- config / lifecycle ----------------------------------------------------

fn update_config(ctx: &Arc<AgentContext>, cmd: &Command) -> Result<CommandResponse, AgentError> {
    // The lock spans the whole read-modify-write-persist sequence so config
    // updates are linearizable.
    let config = {
        let mut config = ctx.config.lock().unwrap();
        config.merge(&cmd.data);
        if let Err(err) = config.save(&ctx.config_path) {
            tracing::warn!(path = %ctx.config_path.display(), error = %err,
                "configuration not persisted");
        }
        config.clone()
    };
    Ok(CommandResponse::ok(
        "Configuration updated",
        serde_json::to_value(config)?,
    ))
}

fn restart() -> Result<CommandResponse, AgentError> {
    // Orchestration performs the actual restart; this only acknowledges.
    Ok(CommandResponse::ok("Restart requested", json!({})))
}

fn stop(ctx: &Arc<AgentContext>) -> Result<CommandResponse, AgentError> {
    ctx.request_shutdown();
    Ok(CommandResponse::ok("Stop requested", json!({})))
}

// ---- run_script ------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RunScriptRequest {
    key: Option<String>,
    #[serde(default)]
    params: Vec<Value>,
    script_path: Option<String>,
    script: Option<String>,
    #[serde(default = "default_interpreter")]
    interpreter: String,
    timeout_sec: Option<u64>,
    #[serde(default)]
    background: bool,
    #[serde(default)]
    env: HashMap<String, String>,
}

fn default_interpreter() -> String {
    "auto".to_string()
}

enum ScriptSource {
    Inline(String),
    File(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interpreter {
    Python,
    Bash,
    Cmd,
    Powershell,
}

impl Interpreter {
    fn from_name(name: &str) -> Result<Self, AgentError> {
        match name.to_lowercase().as_str() {
            "python" => Ok(Interpreter::Python),
            "bash" => Ok(Interpreter::Bash),
            "cmd" => Ok(Interpreter::Cmd),
            "powershell" => Ok(Interpreter::Powershell),
            other => Err(AgentError::invalid(format!("Unknown interpreter: {other}"))),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Interpreter::Python => "python",
            Interpreter::Bash => "bash",
            Interpreter::Cmd => "cmd",
            Interpreter::Powershell => "powershell",
        }
    }
}

async fn run_script(ctx: &Arc<AgentContext>, cmd: &Command) -> Result<CommandResponse, AgentError> {
    let req: RunScriptRequest = parse_data(&cmd.data)?;

    let scripts_dir = ctx.scripts_dir();
    let (source, interpreter_name) = resolve_source(ctx, &req, &scripts_dir)?;

    let interpreter = match interpreter_name.as_str() {
        "auto" => auto_select(&source)?,
        name => Interpreter::from_name(name)?,
    };

    let (allowed, max_timeout, max_output, max_jobs, retention) = {
        let config = ctx.config.lock().unwrap();
        (
            config.allowed_interpreters.clone(),
            config.max_script_timeout_sec,
            config.max_output_bytes,
            config.max_concurrent_jobs,
            config.job_retention_seconds,
        )
    };
    if !allowed.iter().any(|name| name == interpreter.name()) {
        return Err(AgentError::denied(format!(
            "Interpreter not allowed: {}",
            interpreter.name()
        )));
    }

    let timeout_sec = req.timeout_sec.unwrap_or(max_timeout).min(max_timeout).max(1);
    let argv = build_argv(interpreter, &source)?;
    let cwd = scripts_dir.is_dir().then_some(scripts_dir);

    if req.background {
        ctx.jobs.purge(Duration::from_secs(retention));
        let job_id = ctx.jobs.start(
            JobSpec {
                argv,
                env: req.env,
                cwd,
                timeout: Duration::from_secs(timeout_sec),
                max_output_bytes: max_output,
            },
            max_jobs,
        )?;
        return Ok(CommandResponse::ok("Job started", json!({ "job_id": job_id })));
    }

    let spec = RunSpec {
        argv,
        env: req.env,
        cwd,
        timeout: Duration::from_secs(timeout_sec),
        max_output_bytes: max_output,
        cancel: Arc::new(AtomicBool::new(false)),
    };
    let started = Instant::now();
    let result = tokio::task::spawn_blocking(move || runner::run(spec))
        .await
        .map_err(|err| AgentError::internal(format!("runner task failed: {err}")))?
        .map_err(|err| AgentError::internal(format!("spawn failed: {err}")))?;
    let duration_ms = started.elapsed().as_millis() as u64;

    if result.timed_out {
        ctx.audit.record("RUN_SCRIPT timeout");
    } else {
        ctx.audit
            .record(&format!("RUN_SCRIPT exit={}", result.exit_code));
    }

    let data = json!({
        "exit_code": result.exit_code,
        "stdout": result.stdout,
        "stderr": result.stderr,
        "combined_output": result.combined,
        "duration_ms": duration_ms,
        "truncated": result.truncated,
    });
    if result.timed_out {
        Ok(CommandResponse::fail_with("Process timed out", data))
    } else if result.exit_code == 0 {
        Ok(CommandResponse::ok("Exited with code 0", data))
    } else {
        Ok(CommandResponse::fail_with(
            format!("Exited with code {}", result.exit_code),
            data,
        ))
    }
}

/// Apply the resolution order: user parameter, stored script, inline text.
fn resolve_source(
    ctx: &Arc<AgentContext>,
    req: &RunScriptRequest,
    scripts_dir: &std::path::Path,
) -> Result<(ScriptSource, String), AgentError> {
    if let Some(key) = &req.key {
        let config = ctx.config.lock().unwrap();
        if !config.enable_user_parameters {
            return Err(AgentError::denied("User parameters are disabled"));
        }
        let template = config
            .user_parameters
            .get(key)
            .or_else(|| config.user_parameters.get(&format!("{key}[*]")))
            .ok_or_else(|| AgentError::not_found(format!("Unknown user parameter: {key}")))?;
        let params: Vec<String> = req
            .params
            .iter()
            .map(|value| match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect();
        // User parameters are vetted config, so they bypass the inline switch.
        return Ok((
            ScriptSource::Inline(substitute_params(template, &params)),
            "auto".to_string(),
        ));
    }

    if let Some(path) = &req.script_path {
        let _ = std::fs::create_dir_all(scripts_dir);
        let resolved = scripts::resolve_existing(scripts_dir, path)?;
        return Ok((ScriptSource::File(resolved), req.interpreter.clone()));
    }

    if let Some(script) = &req.script {
        let inline_enabled = ctx.config.lock().unwrap().enable_inline_commands;
        if !inline_enabled {
            return Err(AgentError::denied("Inline commands are disabled"));
        }
        return Ok((ScriptSource::Inline(script.clone()), req.interpreter.clone()));
    }

    Err(AgentError::invalid(
        "One of key, script_path or script is required",
    ))
}

/// Replace `$1..$9`; absent parameters substitute as empty.
fn substitute_params(template: &str, params: &[String]) -> String {
    let mut result = template.to_string();
    for index in (1..=9usize).rev() {
        let placeholder = format!("${index}");
        let value = params.get(index - 1).map(String::as_str).unwrap_or("");
        result = result.replace(&placeholder, value);
    }
    result
}

#[cfg(windows)]
const POWERSHELL_VERBS: [&str; 5] = [
    "write-host",
    "write-output",
    "write-error",
    "get-process",
    "get-service",
];

fn auto_select(source: &ScriptSource) -> Result<Interpreter, AgentError> {
    match source {
        ScriptSource::File(path) => {
            let extension = path
                .extension()
                .and_then(std::ffi::OsStr::to_str)
                .map(str::to_lowercase);
            match extension.as_deref() {
                Some("ps1") => Ok(Interpreter::Powershell),
                Some("py") => Ok(Interpreter::Python),
                Some("sh") => Ok(Interpreter::Bash),
                Some("bat") | Some("cmd") => Ok(Interpreter::Cmd),
                _ => Err(AgentError::invalid(format!(
                    "Cannot infer interpreter for {}",
                    path.display()
                ))),
            }
        }
        ScriptSource::Inline(script) => Ok(auto_inline(script)),
    }
}

#[cfg(windows)]
fn auto_inline(script: &str) -> Interpreter {
    let lowered = script.to_lowercase();
    if script.contains('$') || POWERSHELL_VERBS.iter().any(|verb| lowered.contains(verb)) {
        Interpreter::Powershell
    } else {
        Interpreter::Cmd
    }
}

#[cfg(not(windows))]
fn auto_inline(_script: &str) -> Interpreter {
    Interpreter::Bash
}

#[cfg(not(windows))]
fn build_argv(
    interpreter: Interpreter,
    source: &ScriptSource,
) -> Result<Vec<String>, AgentError> {
    let path_str = |path: &PathBuf| path.to_string_lossy().to_string();
    Ok(match (interpreter, source) {
        (Interpreter::Python, ScriptSource::File(path)) => {
            vec!["python3".into(), path_str(path)]
        }
        (Interpreter::Python, ScriptSource::Inline(script)) => {
            vec!["python3".into(), "-c".into(), script.clone()]
        }
        (Interpreter::Bash, ScriptSource::File(path)) => vec!["bash".into(), path_str(path)],
        (Interpreter::Bash, ScriptSource::Inline(script)) => {
            vec!["bash".into(), "-c".into(), script.clone()]
        }
        (Interpreter::Powershell, ScriptSource::File(path)) => {
            vec!["pwsh".into(), "-NoProfile".into(), "-File".into(), path_str(path)]
        }
        (Interpreter::Powershell, ScriptSource::Inline(script)) => {
            vec!["pwsh".into(), "-NoProfile".into(), "-Command".into(), script.clone()]
        }
        (Interpreter::Cmd, _) => {
            return Err(AgentError::invalid(
                "cmd interpreter is unavailable on this platform",
            ))
        }
    })
}

/// Windows invocations switch the console code page to UTF-8 first so the
/// captured output is decodable.
#[cfg(windows)]
fn build_argv(
    interpreter: Interpreter,
    source: &ScriptSource,
) -> Result<Vec<String>, AgentError> {
    let path_str = |path: &PathBuf| path.to_string_lossy().to_string();
    Ok(match (interpreter, source) {
        (Interpreter::Python, ScriptSource::File(path)) => {
            vec!["python".into(), path_str(path)]
        }
        (Interpreter::Python, ScriptSource::Inline(script)) => {
            vec!["python".into(), "-c".into(), script.clone()]
        }
        (Interpreter::Bash, ScriptSource::File(path)) => vec!["bash".into(), path_str(path)],
        (Interpreter::Bash, ScriptSource::Inline(script)) => {
            vec!["bash".into(), "-c".into(), script.clone()]
        }
        (Interpreter::Powershell, ScriptSource::File(path)) => vec![
            "powershell".into(),
            "-NoProfile".into(),
            "-ExecutionPolicy".into(),
            "Bypass".into(),
            "-Command".into(),
            format!("chcp 65001 | Out-Null; & '{}'", path_str(path)),
        ],
        (Interpreter::Powershell, ScriptSource::Inline(script)) => vec![
            "powershell".into(),
            "-NoProfile".into(),
            "-Command".into(),
            format!("chcp 65001 | Out-Null; {script}"),
        ],
        (Interpreter::Cmd, ScriptSource::File(path)) => vec![
            "cmd".into(),
            "/C".into(),
            format!("chcp 65001 >nul & \"{}\"", path_str(path)),
        ],
        (Interpreter::Cmd, ScriptSource::Inline(script)) => vec![
            "cmd".into(),
            "/C".into(),
            format!("chcp 65001 >nul & {script}"),
        ],
    })
}

// ---- job queries ------------------------------------------------------------

fn get_job_output(ctx: &Arc<AgentContext>, cmd: &Command) -> Result<CommandResponse, AgentError> {
    let job_id = required_str(&cmd.data, "job_id")?;
    let snapshot = ctx.jobs.get(&job_id)?;
    let message = if snapshot.completed {
        format!("Job completed with exit code {}", snapshot.exit_code)
    } else {
        "Job running".to_string()
    };
    Ok(CommandResponse::ok(message, serde_json::to_value(snapshot)?))
}

fn kill_job(ctx: &Arc<AgentContext>, cmd: &Command) -> Result<CommandResponse, AgentError> {
    let job_id = required_str(&cmd.data, "job_id")?;
    ctx.jobs.cancel(&job_id)?;
    Ok(CommandResponse::ok(
        "Cancellation requested",
        json!({ "job_id": job_id, "cancel_requested": true }),
    ))
}

fn list_jobs(ctx: &Arc<AgentContext>) -> Result<CommandResponse, AgentError> {
    let retention = ctx.config.lock().unwrap().job_retention_seconds;
    let jobs = ctx.jobs.list(Duration::from_secs(retention));
    Ok(CommandResponse::ok(
        format!("{} jobs", jobs.len()),
        json!({ "jobs": jobs }),
    ))
}

// ---- script store ------------------------------------------------------------

fn push_script(ctx: &Arc<AgentContext>, cmd: &Command) -> Result<CommandResponse, AgentError> {
    let name = required_str(&cmd.data, "name")?;
    let content = required_str(&cmd.data, "content")?;

    let scripts_dir = ctx.scripts_dir();
    std::fs::create_dir_all(&scripts_dir)?;
    let target = scripts::resolve_target(&scripts_dir, &name)?;

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&target, sanitize::clean(content.as_bytes()))?;
    if let Some(mode) = cmd.data.get("chmod") {
        scripts::apply_chmod(&target, mode)?;
    }

    ctx.audit
        .record(&format!("PUSH_SCRIPT {}", target.display()));
    Ok(CommandResponse::ok(
        "Script stored",
        json!({ "path": target.to_string_lossy() }),
    ))
}

fn list_scripts(ctx: &Arc<AgentContext>) -> Result<CommandResponse, AgentError> {
    let scripts = scripts::list(&ctx.scripts_dir());
    Ok(CommandResponse::ok(
        format!("{} scripts", scripts.len()),
        json!({ "scripts": scripts }),
    ))
}

fn delete_script(ctx: &Arc<AgentContext>, cmd: &Command) -> Result<CommandResponse, AgentError> {
    let name = required_str(&cmd.data, "name")?;
    let scripts_dir = ctx.scripts_dir();
    std::fs::create_dir_all(&scripts_dir)?;
    let target = scripts::resolve_existing(&scripts_dir, &name)?;
    std::fs::remove_file(&target)?;
    ctx.audit
        .record(&format!("DELETE_SCRIPT {}", target.display()));
    Ok(CommandResponse::ok("Script deleted", json!({})))
}

// ---- helpers ----------------------------------------------------------------

fn parse_data<T: DeserializeOwned>(data: &Value) -> Result<T, AgentError> {
    let data = if data.is_null() {
        Value::Object(Default::default())
    } else {
        data.clone()
    };
    serde_json::from_value(data)
        .map_err(|err| AgentError::invalid(format!("Malformed command data: {err}")))
}

fn required_str(data: &Value, field: &str) -> Result<String, AgentError> {
    data.get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AgentError::invalid(format!("Missing required field: {field}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_substitution_handles_gaps_and_order() {
        let params = vec!["alpha".to_string(), "beta".to_string()];
        assert_eq!(
            substitute_params("run $1 then $2 then $3", &params),
            "run alpha then beta then "
        );
        assert_eq!(substitute_params("no placeholders", &params), "no placeholders");
    }

    #[test]
    fn interpreter_names_round_trip() {
        for name in ["python", "bash", "cmd", "powershell"] {
            assert_eq!(Interpreter::from_name(name).unwrap().name(), name);
        }
        assert!(Interpreter::from_name("perl").is_err());
    }

    #[test]
    fn auto_selects_by_extension() {
        let file = |name: &str| ScriptSource::File(PathBuf::from(name));
        assert_eq!(auto_select(&file("a.py")).unwrap(), Interpreter::Python);
        assert_eq!(auto_select(&file("a.sh")).unwrap(), Interpreter::Bash);
        assert_eq!(auto_select(&file("a.PS1")).unwrap(), Interpreter::Powershell);
        assert_eq!(auto_select(&file("a.bat")).unwrap(), Interpreter::Cmd);
        assert!(auto_select(&file("a.txt")).is_err());
    }

    #[cfg(not(windows))]
    #[test]
    fn inline_auto_selection_is_bash_on_posix() {
        let source = ScriptSource::Inline("Write-Host hi".into());
        assert_eq!(auto_select(&source).unwrap(), Interpreter::Bash);
    }

    #[cfg(not(windows))]
    #[test]
    fn posix_argv_shapes() {
        let argv = build_argv(
            Interpreter::Bash,
            &ScriptSource::Inline("echo hi".into()),
        )
        .unwrap();
        assert_eq!(argv, vec!["bash", "-c", "echo hi"]);

        let argv = build_argv(
            Interpreter::Python,
            &ScriptSource::File(PathBuf::from("/tmp/x.py")),
        )
        .unwrap();
        assert_eq!(argv, vec!["python3", "/tmp/x.py"]);

        assert!(build_argv(Interpreter::Cmd, &ScriptSource::Inline("dir".into())).is_err());
    }

    #[test]
    fn requested_families_accepts_both_wire_shapes() {
        let from_array = requested_families(&json!({"metrics": ["cpu", "memory", "wiggle"]}));
        assert_eq!(
            from_array,
            Some(vec![MetricFamily::Cpu, MetricFamily::Memory])
        );

        let mut from_flags =
            requested_families(&json!({"metrics": {"cpu": true, "disk": false, "gpu": true}}))
                .unwrap();
        from_flags.sort_by_key(|f| f.as_str());
        assert_eq!(from_flags, vec![MetricFamily::Cpu, MetricFamily::Gpu]);

        assert_eq!(requested_families(&json!({})), None);
    }

    #[test]
    fn required_str_rejects_missing_and_empty() {
        assert!(required_str(&json!({"name": "x"}), "name").is_ok());
        assert!(required_str(&json!({"name": ""}), "name").is_err());
        assert!(required_str(&json!({}), "name").is_err());
        assert!(required_str(&json!({"name": 7}), "name").is_err());
    }
}
