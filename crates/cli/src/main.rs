use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use arcade_engine::{
    API_KEY_PLACEHOLDER, DriverSettings, HttpTransport, JobDriver, KeyProbe, StreamEvent, Transport, build_curl_command, build_request,
    probe_keys, wrap_base64_outputs,
};
use arcade_registry::{ArcadeConfig, DefinitionRegistry, collect_definition_files, validate_corpus};
use arcade_types::{Definition, Interaction, ParamValues, SYSTEM_PROMPT_PARAM};
use arcade_util::redact_sensitive;
use clap::{Arg, ArgAction, ArgMatches, Command};
use futures_util::StreamExt;
use serde_json::{Value, json};
use tracing::debug;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let matches = build_cli().get_matches();
    match run(&matches).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {}", redact_sensitive(&format!("{error:#}")));
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_cli() -> Command {
    let param_args = || {
        [
            Arg::new("id").required(true).help("Definition id"),
            Arg::new("param")
                .long("param")
                .short('p')
                .action(ArgAction::Append)
                .value_name("NAME=VALUE")
                .help("Parameter value; repeat for several"),
            Arg::new("example")
                .long("example")
                .short('e')
                .value_name("LABEL")
                .help("Start from the definition's example with this label"),
            Arg::new("system-prompt")
                .long("system-prompt")
                .value_name("TEXT")
                .help("System prompt for chat definitions"),
        ]
    };

    Command::new("arcade")
        .about("Run declarative provider definitions against their HTTP APIs")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("definitions")
                .long("definitions")
                .global(true)
                .value_name("DIR")
                .help("Definitions directory (overrides the config file)"),
        )
        .subcommand(
            Command::new("list")
                .about("List loaded definitions")
                .arg(Arg::new("json").long("json").action(ArgAction::SetTrue).help("Print JSON")),
        )
        .subcommand(
            Command::new("validate")
                .about("Validate definition files")
                .arg(Arg::new("path").value_name("PATH").help("A definition file or directory")),
        )
        .subcommand(
            Command::new("request")
                .about("Show the request a definition would send, without sending it")
                .args(param_args())
                .arg(Arg::new("curl").long("curl").action(ArgAction::SetTrue).help("Render as a curl command")),
        )
        .subcommand(
            Command::new("run")
                .about("Execute a definition and print its outputs")
                .args(param_args())
                .arg(
                    Arg::new("api-key")
                        .long("api-key")
                        .value_name("KEY")
                        .help("API key (defaults to the definition's env_key variable)"),
                ),
        )
        .subcommand(Command::new("keys").about("Check every provider's API key"))
}

async fn run(matches: &ArgMatches) -> Result<ExitCode> {
    let config = ArcadeConfig::load();
    let definitions_dir = matches
        .get_one::<String>("definitions")
        .map(PathBuf::from)
        .unwrap_or_else(|| config.definitions_dir());
    debug!(dir = %definitions_dir.display(), "using definitions directory");

    match matches.subcommand() {
        Some(("validate", sub)) => {
            let target = sub.get_one::<String>("path").map(PathBuf::from).unwrap_or(definitions_dir);
            Ok(run_validate(target))
        }
        Some(("list", sub)) => {
            let registry = load_registry(&definitions_dir)?;
            run_list(&registry, sub.get_flag("json"))?;
            Ok(ExitCode::SUCCESS)
        }
        Some(("request", sub)) => {
            let registry = load_registry(&definitions_dir)?;
            run_request(&registry, sub)?;
            Ok(ExitCode::SUCCESS)
        }
        Some(("run", sub)) => {
            let registry = load_registry(&definitions_dir)?;
            tokio::select! {
                result = run_definition(&registry, &config, sub) => result.map(|_| ExitCode::SUCCESS),
                _ = tokio::signal::ctrl_c() => bail!("interrupted"),
            }
        }
        Some(("keys", _)) => {
            let registry = load_registry(&definitions_dir)?;
            run_keys(&registry, &config).await?;
            Ok(ExitCode::SUCCESS)
        }
        _ => bail!("unknown command"),
    }
}

fn load_registry(dir: &std::path::Path) -> Result<DefinitionRegistry> {
    DefinitionRegistry::load_from_dir(dir, false).with_context(|| format!("load definitions from {}", dir.display()))
}

fn run_validate(target: PathBuf) -> ExitCode {
    let paths = collect_definition_files(&target).unwrap_or_default();
    if paths.is_empty() {
        println!("No definition files found.");
        return ExitCode::FAILURE;
    }

    let report = validate_corpus(&paths);
    for file in &report.files {
        println!("Validating {}", file.path.display());
        if file.is_valid() {
            for area in ["Schema", "Interaction", "Response", "Examples"] {
                println!("  \u{2713} {area} valid");
            }
        } else {
            for error in &file.errors {
                println!("  \u{2717} {error}");
            }
            println!("  {} error(s) found.", file.errors.len());
        }
        println!();
    }
    println!("{}/{} definitions valid.", report.passed(), report.total());

    if report.is_success() { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

fn run_list(registry: &DefinitionRegistry, as_json: bool) -> Result<()> {
    let summaries = registry.summaries();
    if as_json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }
    let id_width = summaries.iter().map(|summary| summary.id.len()).max().unwrap_or(0);
    for summary in &summaries {
        println!(
            "{:<id_width$}  {:<6}  {:<9}  {} [{}]",
            summary.id,
            summary.output_type.as_str(),
            summary.pattern,
            summary.name,
            summary.provider
        );
    }
    if !registry.rejected().is_empty() {
        eprintln!(
            "{} definition(s) skipped as invalid; run `arcade validate` for details",
            registry.rejected().len()
        );
    }
    Ok(())
}

fn run_request(registry: &DefinitionRegistry, matches: &ArgMatches) -> Result<()> {
    let definition = lookup(registry, matches)?;
    let params = collect_params(definition, matches)?;

    if matches.get_flag("curl") {
        println!("{}", build_curl_command(definition, &params, API_KEY_PLACEHOLDER)?);
        return Ok(());
    }

    let request = build_request(definition, &params, API_KEY_PLACEHOLDER)?;
    let redacted = request.redacted(Some(&definition.auth.header));
    println!("{}", serde_json::to_string_pretty(&redacted)?);
    Ok(())
}

async fn run_definition(registry: &DefinitionRegistry, config: &ArcadeConfig, matches: &ArgMatches) -> Result<()> {
    let definition = lookup(registry, matches)?;
    let params = collect_params(definition, matches)?;
    let api_key = matches
        .get_one::<String>("api-key")
        .cloned()
        .or_else(|| resolve_key(definition))
        .ok_or_else(|| anyhow!("API key is required: set {} or pass --api-key", definition.auth.env_key))?;

    let settings = DriverSettings {
        request_timeout: config.request_timeout(),
        status_timeout: config.status_timeout(),
        result_timeout: config.result_timeout(),
        poll_interval: None,
        max_poll_attempts: config.max_poll_attempts,
    };
    let driver = JobDriver::new(Arc::new(HttpTransport::new()), settings);

    match &definition.interaction {
        Interaction::Sync => {
            let mut submission = driver.submit(definition, &params, &api_key).await?;
            submission.outputs = wrap_base64_outputs(std::mem::take(&mut submission.outputs));
            println!("{}", serde_json::to_string_pretty(&submission)?);
        }
        Interaction::Polling(_) => {
            eprintln!("Submitting job to {}...", definition.provider);
            let mut outcome = driver.run_polling_job(definition, &params, &api_key).await?;
            outcome.result.outputs = wrap_base64_outputs(std::mem::take(&mut outcome.result.outputs));
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "request_id": outcome.request_id,
                    "attempts": outcome.attempts,
                    "sent_request": outcome.submission.sent_request,
                    "outputs": outcome.result.outputs,
                }))?
            );
        }
        Interaction::Streaming { .. } => {
            let mut session = driver.stream(definition, &params, &api_key).await?;
            let mut stdout = std::io::stdout();
            while let Some(event) = session.events.next().await {
                match event {
                    StreamEvent::Token(token) => {
                        write!(stdout, "{token}")?;
                        stdout.flush()?;
                    }
                    StreamEvent::Done => {
                        writeln!(stdout)?;
                        break;
                    }
                    StreamEvent::Error(message) => {
                        writeln!(stdout)?;
                        bail!("stream failed: {message}");
                    }
                }
            }
        }
    }
    Ok(())
}

async fn run_keys(registry: &DefinitionRegistry, config: &ArcadeConfig) -> Result<()> {
    let probes: Vec<KeyProbe> = registry
        .iter()
        .filter_map(|definition| KeyProbe::from_definition(definition, resolve_key(definition)))
        .collect();
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new());

    let results = probe_keys(probes, transport, config.key_probe_concurrency, config.key_probe_timeout()).await;
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

fn lookup<'a>(registry: &'a DefinitionRegistry, matches: &ArgMatches) -> Result<&'a Definition> {
    let id = matches.get_one::<String>("id").context("missing definition id")?;
    Ok(registry.get(id)?)
}

fn resolve_key(definition: &Definition) -> Option<String> {
    std::env::var(&definition.auth.env_key)
        .ok()
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
}

/// Merges declared defaults, the chosen example, `-p` pairs and the system
/// prompt, later sources winning.
fn collect_params(definition: &Definition, matches: &ArgMatches) -> Result<ParamValues> {
    let mut params = definition.default_params();

    if let Some(label) = matches.get_one::<String>("example") {
        let example = definition
            .example(label)
            .with_context(|| format!("definition '{}' has no example labelled '{label}'", definition.id))?;
        params.extend(example.params.clone());
    }

    for pair in matches.get_many::<String>("param").into_iter().flatten() {
        let (name, value) = pair
            .split_once('=')
            .with_context(|| format!("parameter '{pair}' must look like NAME=VALUE"))?;
        params.insert(name.trim().to_string(), Value::String(value.to_string()));
    }

    if let Some(prompt) = matches.get_one::<String>("system-prompt") {
        params.insert(SYSTEM_PROMPT_PARAM.to_string(), Value::String(prompt.clone()));
    }
    Ok(params)
}
