use std::env;
use std::fs;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};

use clap::Args;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::chat::completion::{
    CompletionClient, CompletionOptions, DEFAULT_MODEL, TOGETHER_CHAT_COMPLETIONS_URL,
};
use crate::chat::message::Message;
use crate::chat::toolhouse::{RuntimeMetadata, TOOLHOUSE_API_URL, ToolhouseClient};
use crate::commands::version_text;
use crate::config::{self, ProfileConfig, TOGETHER_KEY, TOOLHOUSE_KEY};
use crate::logging;
use crate::pipeline::{
    DEFAULT_PROMPT, Pipeline, PipelineReport, ToolDetection, initial_conversation,
};
use crate::render::{OutputMode, PageEvent, Recorder, Render, TerminalPage};

const FIZZBUZZ_TITLE: &str = "FizzBuzz Generator with Toolhouse and Together AI";
const PAGE_TITLE: &str = "Tool-calling chat with Toolhouse and Together AI";

#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    /// Prompt text. Read from stdin when omitted; defaults to the FizzBuzz prompt.
    pub prompt: Option<String>,
    /// Named profile from the config file.
    #[arg(long)]
    pub profile: Option<String>,
    #[arg(long)]
    pub model: Option<String>,
    /// Optional system prompt sent before the user message.
    #[arg(long)]
    pub system: Option<String>,
    #[arg(long)]
    pub temperature: Option<f32>,
    #[arg(long)]
    pub max_tokens: Option<u32>,
    /// Per-request timeout in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,
    /// Output mode: text or json.
    #[arg(long)]
    pub output: Option<String>,
    /// Shorthand for `--output json`.
    #[arg(long)]
    pub json: bool,
    /// Tool detection profile: strict or eager.
    #[arg(long)]
    pub detection: Option<String>,
    /// Named tool bundle on the tool service.
    #[arg(long)]
    pub bundle: Option<String>,
    /// Print the resolved first request without calling any service.
    #[arg(long)]
    pub dry_run: bool,
    /// Also write the JSON report to this file.
    #[arg(long)]
    pub save: Option<PathBuf>,
    #[arg(long)]
    pub verbose: bool,
    /// Silence logs on stderr; fatal errors are still printed.
    #[arg(long)]
    pub quiet: bool,
    /// Print version and build metadata.
    #[arg(long)]
    pub version: bool,
}

/// Everything a run needs, after CLI > env > profile > default resolution.
#[derive(Debug, Clone, PartialEq)]
struct RunSettings {
    model: String,
    prompt: String,
    system: Option<String>,
    options: CompletionOptions,
    output: OutputMode,
    detection: ToolDetection,
    bundle: Option<String>,
    metadata: RuntimeMetadata,
    completion_url: String,
    tools_url: String,
}

pub async fn run(args: RunArgs) -> Result<(), String> {
    if args.version {
        println!("{}", version_text());
        return Ok(());
    }

    logging::init(args.verbose, args.quiet);

    let profile = match &args.profile {
        Some(name) => {
            let profile = config::load_profile(name)?;
            profile.validate()?;
            profile
        }
        None => ProfileConfig::default(),
    };
    let stdin_prompt = read_stdin_prompt(args.prompt.is_some())?;
    let settings = resolve(&args, &profile, stdin_prompt, &EnvSource)?;
    let conversation = initial_conversation(settings.system.as_deref(), &settings.prompt);

    info!(
        model = %settings.model,
        detection = settings.detection.as_str(),
        output = settings.output.as_str(),
        "resolved run settings"
    );

    if args.dry_run {
        let (together_present, toolhouse_present) = config::api_keys_present();
        info!(
            together_key_present = together_present,
            toolhouse_key_present = toolhouse_present,
            "api key lookup"
        );
        let plan = dry_run_plan(&settings, &conversation, together_present, toolhouse_present);
        if let Some(path) = &args.save {
            save_json(path, &plan)?;
        }
        println!("{plan}");
        return Ok(());
    }

    let secrets = config::load_secrets().map_err(|err| err.to_string())?;
    let completion = CompletionClient::new(
        &settings.completion_url,
        secrets.together_api_key.expose(),
        &settings.model,
        settings.options,
    );
    let tools = ToolhouseClient::new(&settings.tools_url, secrets.toolhouse_api_key.expose())
        .with_metadata(settings.metadata.clone())
        .with_bundle(settings.bundle.clone())
        .with_timeout(settings.options.timeout_secs);
    let pipeline = Pipeline::new(completion, tools, settings.detection);

    let report = match settings.output {
        OutputMode::Text => {
            let color = io::stdout().is_terminal() && env::var_os("NO_COLOR").is_none();
            let mut page = TerminalPage::new(io::stdout(), color);
            let title = if settings.prompt == DEFAULT_PROMPT {
                FIZZBUZZ_TITLE
            } else {
                PAGE_TITLE
            };
            page.emit(PageEvent::Title(title.to_string()));
            pipeline.run(conversation, &mut page).await
        }
        OutputMode::Json => {
            let mut recorder = Recorder::default();
            let report = pipeline.run(conversation, &mut recorder).await;
            debug!(events = report.events.len(), "page events recorded");
            println!("{}", report_json(&report)?);
            report
        }
    };

    if let Some(path) = &args.save {
        save_json(path, &serde_json::to_value(&report).map_err(|err| err.to_string())?)?;
    }

    if report.succeeded() {
        Ok(())
    } else {
        Err(format!(
            "Run did not complete: stopped at {:?}.",
            report.stage
        ))
    }
}

/// Reads environment variables; swapped out in tests.
trait SettingSource {
    fn get(&self, key: &str) -> Option<String>;
}

struct EnvSource;

impl SettingSource for EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        env::var(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

fn resolve(
    args: &RunArgs,
    profile: &ProfileConfig,
    stdin_prompt: Option<String>,
    env: &dyn SettingSource,
) -> Result<RunSettings, String> {
    let model = args
        .model
        .clone()
        .or_else(|| env.get("TP_MODEL"))
        .or_else(|| profile.model.clone())
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());
    if model.trim().is_empty() {
        return Err("Model must not be empty. Use --model or set TP_MODEL.".to_string());
    }

    let prompt = args
        .prompt
        .clone()
        .or(stdin_prompt)
        .or_else(|| profile.prompt.clone())
        .unwrap_or_else(|| DEFAULT_PROMPT.to_string());
    if prompt.trim().is_empty() {
        return Err("Prompt must not be empty.".to_string());
    }

    let timeout_secs = match args.timeout {
        Some(timeout) => Some(timeout),
        None => match env.get("TP_TIMEOUT") {
            Some(raw) => Some(raw.parse::<u64>().map_err(|_| {
                format!("Invalid TP_TIMEOUT '{raw}'. Expected whole seconds.")
            })?),
            None => profile.timeout,
        },
    };
    if timeout_secs == Some(0) {
        return Err("Timeout must be at least 1 second.".to_string());
    }

    let output = if args.json {
        OutputMode::Json
    } else {
        pick_enum(
            args.output.as_deref(),
            "TP_OUTPUT",
            profile.output.as_deref(),
            env,
            OutputMode::parse,
            "text, json",
        )?
        .unwrap_or_default()
    };

    let detection = pick_enum(
        args.detection.as_deref(),
        "TP_DETECTION",
        profile.detection.as_deref(),
        env,
        ToolDetection::parse,
        "strict, eager",
    )?
    .unwrap_or_default();

    let defaults = RuntimeMetadata::default();
    Ok(RunSettings {
        model,
        prompt,
        system: args.system.clone().or_else(|| profile.system.clone()),
        options: CompletionOptions {
            temperature: args.temperature.or(profile.temperature),
            max_tokens: args.max_tokens.or(profile.max_tokens),
            timeout_secs,
        },
        output,
        detection,
        bundle: args
            .bundle
            .clone()
            .or_else(|| env.get("TP_BUNDLE"))
            .or_else(|| profile.bundle.clone()),
        metadata: RuntimeMetadata {
            id: profile.metadata_id.clone().unwrap_or(defaults.id),
            timezone: profile.timezone.unwrap_or(defaults.timezone),
        },
        completion_url: env
            .get("TP_COMPLETION_URL")
            .or_else(|| profile.completion_url.clone())
            .unwrap_or_else(|| TOGETHER_CHAT_COMPLETIONS_URL.to_string()),
        tools_url: env
            .get("TP_TOOLS_URL")
            .or_else(|| profile.tools_url.clone())
            .unwrap_or_else(|| TOOLHOUSE_API_URL.to_string()),
    })
}

/// CLI value, then environment, then profile; the first invalid one found
/// is reported with where it came from.
fn pick_enum<T>(
    cli: Option<&str>,
    env_key: &str,
    profile: Option<&str>,
    env: &dyn SettingSource,
    parse: fn(&str) -> Option<T>,
    supported: &str,
) -> Result<Option<T>, String> {
    let name = env_key.trim_start_matches("TP_").to_ascii_lowercase();
    if let Some(value) = cli {
        return parse(value).map(Some).ok_or_else(|| {
            format!("Invalid --{name} '{value}'. Supported values: {supported}.")
        });
    }
    if let Some(value) = env.get(env_key) {
        return parse(&value).map(Some).ok_or_else(|| {
            format!("Invalid {env_key} '{value}'. Supported values: {supported}.")
        });
    }
    match profile {
        Some(value) => parse(value).map(Some).ok_or_else(|| {
            format!("Invalid profile {name} '{value}'. Supported values: {supported}.")
        }),
        None => Ok(None),
    }
}

fn read_stdin_prompt(has_argument: bool) -> Result<Option<String>, String> {
    let stdin = io::stdin();
    if has_argument || stdin.is_terminal() {
        return Ok(None);
    }
    let mut buffer = String::new();
    stdin
        .lock()
        .read_to_string(&mut buffer)
        .map_err(|err| format!("Failed to read prompt from stdin: {err}"))?;
    let trimmed = buffer.trim_end_matches(['\n', '\r']);
    if trimmed.trim().is_empty() {
        Ok(None)
    } else {
        Ok(Some(trimmed.to_string()))
    }
}

fn dry_run_plan(
    settings: &RunSettings,
    conversation: &[Message],
    together_present: bool,
    toolhouse_present: bool,
) -> Value {
    json!({
        "dry_run": true,
        "model": settings.model,
        "output": settings.output,
        "detection": settings.detection,
        "bundle": settings.bundle,
        "metadata": settings.metadata,
        "endpoints": {
            "completion": settings.completion_url,
            "tools": settings.tools_url,
        },
        "messages": conversation,
        "request": {
            "temperature": settings.options.temperature,
            "max_tokens": settings.options.max_tokens,
            "timeout_secs": settings.options.timeout_secs,
        },
        "api_keys_present": {
            TOGETHER_KEY: together_present,
            TOOLHOUSE_KEY: toolhouse_present,
        },
    })
}

fn report_json(report: &PipelineReport) -> Result<String, String> {
    serde_json::to_string_pretty(report).map_err(|err| format!("Failed to encode report: {err}"))
}

fn save_json(path: &Path, value: &Value) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| {
            format!(
                "Failed to create output directory '{}': {err}",
                parent.display()
            )
        })?;
    }
    fs::write(path, value.to_string())
        .map_err(|err| format!("Failed to write output file '{}': {err}", path.display()))
}
