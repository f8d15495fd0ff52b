//! testpilot command line: manage test definitions, run them against a
//! live browser and inspect results.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as Base64, Engine as _};
use clap::{Parser, Subcommand};
use tokio::time::sleep;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use testpilot_core_types::{ResultId, RunStatus, TestDefinition, TestId};
use testpilot_driver::ChromiumDriver;
use testpilot_generator::{recording, MockStepGenerator, StepGenerator};
use testpilot_orchestrator::TestRunner;
use testpilot_store::{ArchiveFilter, TestStore};

mod config;

use config::{parse_key_val, Settings};

#[derive(Parser)]
#[command(name = "testpilot", version, about = "AI-assisted browser test runner")]
struct Cli {
    /// Directory holding tests.json and results.json.
    #[arg(long, env = "TESTPILOT_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Log filter (tracing EnvFilter syntax).
    #[arg(long, env = "TESTPILOT_LOG", default_value = "info")]
    log_level: String,

    /// API key for the step generator.
    #[arg(long, env = "TESTPILOT_API_KEY")]
    api_key: Option<String>,

    /// Model for the step generator.
    #[arg(long, env = "TESTPILOT_MODEL", default_value = "gpt-4o")]
    model: String,

    /// Alternative chat-completions endpoint base URL.
    #[arg(long, env = "TESTPILOT_API_BASE")]
    api_base: Option<String>,

    /// Run the browser with a visible window.
    #[arg(long)]
    headed: bool,

    /// Explicit Chrome/Chromium binary.
    #[arg(long, env = "TESTPILOT_CHROME")]
    chrome: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a test definition.
    Create {
        #[arg(long)]
        base_url: String,
        #[arg(long)]
        description: String,
        /// Credential entry, repeatable (key=value).
        #[arg(long, value_parser = parse_key_val)]
        credential: Vec<(String, String)>,
        /// Form input entry, repeatable (key=value).
        #[arg(long, value_parser = parse_key_val)]
        input: Vec<(String, String)>,
        /// Prerequisite test id, repeatable; replayed in order before the
        /// main test.
        #[arg(long)]
        prerequisite: Vec<TestId>,
        #[arg(long, default_value_t = 0)]
        max_retries: u32,
        #[arg(long)]
        tag: Vec<String>,
        /// Wait applied before and after every step (milliseconds).
        #[arg(long)]
        global_wait_time: Option<u64>,
        /// Skip waiting for elements to become interactable.
        #[arg(long)]
        no_wait_for_elements: bool,
        /// Mark the test usable as a prerequisite for others.
        #[arg(long)]
        reusable: bool,
    },
    /// List test definitions.
    List {
        /// Show archived tests instead of active ones.
        #[arg(long)]
        archived: bool,
        /// Show everything.
        #[arg(long)]
        all: bool,
    },
    /// Print one test definition as JSON.
    Show { id: TestId },
    /// Execute a test and follow it to completion.
    Run { id: TestId },
    /// Print one execution result as JSON.
    Result { id: ResultId },
    /// List results for a test, newest first.
    Results { id: TestId },
    /// Drop a test's cached steps so the next run regenerates them.
    ClearCache { id: TestId },
    /// Archive a test (or a result with --result).
    Archive {
        id: String,
        #[arg(long)]
        result: bool,
    },
    /// Unarchive a test (or a result with --result).
    Unarchive {
        id: String,
        #[arg(long)]
        result: bool,
    },
    /// Delete a test and all of its results (or one result with --result).
    Delete {
        id: String,
        #[arg(long)]
        result: bool,
    },
    /// Seed a test's cached steps from a recorded script.
    ImportRecording {
        id: TestId,
        #[arg(long)]
        file: PathBuf,
    },
    /// Write a result's screenshots as PNG files.
    Screenshots {
        id: ResultId,
        #[arg(long, default_value = "screenshots")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone())),
        )
        .init();

    let settings = Settings {
        data_dir: cli.data_dir.clone(),
        api_key: cli.api_key.clone(),
        model: cli.model.clone(),
        api_base: cli.api_base.clone(),
        headless: !cli.headed,
        chrome_executable: cli.chrome.clone(),
    };
    let store = Arc::new(TestStore::open(&settings.data_dir).await?);

    match cli.command {
        Command::Create {
            base_url,
            description,
            credential,
            input,
            prerequisite,
            max_retries,
            tag,
            global_wait_time,
            no_wait_for_elements,
            reusable,
        } => {
            let mut test = TestDefinition::new(base_url, description);
            if !credential.is_empty() {
                test.credentials = Some(credential.into_iter().collect());
            }
            if !input.is_empty() {
                test.form_inputs = Some(
                    input
                        .into_iter()
                        .map(|(key, value)| (key, serde_json::Value::String(value)))
                        .collect::<BTreeMap<_, _>>(),
                );
            }
            test.prerequisite_tests = prerequisite;
            test.max_retries = max_retries;
            test.tags = tag;
            test.global_wait_time = global_wait_time;
            if no_wait_for_elements {
                test.wait_for_elements = Some(false);
            }
            test.is_reusable = reusable;
            store.save_test(&test).await?;
            println!("{}", test.id);
        }
        Command::List { archived, all } => {
            let filter = if all {
                ArchiveFilter::All
            } else if archived {
                ArchiveFilter::Archived
            } else {
                ArchiveFilter::Active
            };
            for test in store.list_tests(filter).await? {
                let cache = if test.cached_steps.is_empty() {
                    "uncached"
                } else {
                    "cached"
                };
                println!("{}  [{}]  {}", test.id, cache, test.description);
            }
        }
        Command::Show { id } => {
            let test = store
                .get_test(id)
                .await?
                .ok_or_else(|| anyhow!("no test with id {id}"))?;
            println!("{}", serde_json::to_string_pretty(&test)?);
        }
        Command::Run { id } => run_test(&settings, store, id).await?,
        Command::Result { id } => {
            let result = store
                .get_result(id)
                .await?
                .ok_or_else(|| anyhow!("no result with id {id}"))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Results { id } => {
            for result in store.results_for_test(id).await? {
                println!(
                    "{}  {}  steps={}  retries={}  cost=${:.4}",
                    result.id,
                    result.status,
                    result.steps.len(),
                    result.retry_count,
                    result.cost
                );
            }
        }
        Command::ClearCache { id } => {
            store.clear_cached_steps(id).await?;
            println!("cache cleared for {id}");
        }
        Command::Archive { id, result } => {
            set_archived(&store, &id, result, true).await?;
        }
        Command::Unarchive { id, result } => {
            set_archived(&store, &id, result, false).await?;
        }
        Command::Delete { id, result } => {
            if result {
                let id: ResultId = id.parse().context("invalid result id")?;
                store.delete_result(id).await?;
                println!("deleted result {id}");
            } else {
                let id: TestId = id.parse().context("invalid test id")?;
                store.delete_test(id).await?;
                println!("deleted {id} and its results");
            }
        }
        Command::ImportRecording { id, file } => {
            let test = store
                .get_test(id)
                .await?
                .ok_or_else(|| anyhow!("no test with id {id}"))?;
            let content = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let steps = recording::parse_transcript(&content);
            if steps.is_empty() {
                return Err(anyhow!("no replayable steps found in {}", file.display()));
            }
            println!("imported {} steps as cached sequence", steps.len());
            let mut test = test;
            test.cached_steps = steps;
            store.save_test(&test).await?;
        }
        Command::Screenshots { id, out } => {
            let result = store
                .get_result(id)
                .await?
                .ok_or_else(|| anyhow!("no result with id {id}"))?;
            tokio::fs::create_dir_all(&out).await?;
            for (index, shot) in result.screenshots.iter().enumerate() {
                let bytes = Base64
                    .decode(shot)
                    .with_context(|| format!("screenshot {index} is not valid base64"))?;
                let path = out.join(format!("step-{:02}.png", index + 1));
                tokio::fs::write(&path, bytes).await?;
                println!("{}", path.display());
            }
        }
    }

    Ok(())
}

async fn run_test(settings: &Settings, store: Arc<TestStore>, id: TestId) -> Result<()> {
    let test = store
        .get_test(id)
        .await?
        .ok_or_else(|| anyhow!("no test with id {id}"))?;

    // Cached replays work without a generator; anything that might need
    // generation or refinement requires a configured provider.
    let generator: Arc<dyn StepGenerator> = match settings.generator() {
        Ok(generator) => Arc::new(generator),
        Err(err) if !test.cached_steps.is_empty() => {
            warn!("no generator configured ({err}); cached replay only");
            Arc::new(MockStepGenerator::new())
        }
        Err(err) => return Err(err),
    };

    let driver = Arc::new(ChromiumDriver::launch(settings.driver_config()).await?);
    let runner = Arc::new(TestRunner::new(driver, generator, store.clone()));
    let result_id = runner.spawn_run(test).await?;
    println!("result {result_id}");

    let mut last_action = String::new();
    loop {
        sleep(Duration::from_millis(500)).await;
        let Some(result) = store.get_result(result_id).await? else {
            continue;
        };
        if let Some(action) = &result.current_action {
            if *action != last_action {
                println!("  {action}");
                last_action = action.clone();
            }
        }
        if result.status != RunStatus::Running {
            let passed = result.steps.iter().filter(|step| step.success).count();
            println!(
                "{}  steps {}/{}  retries {}  cost ${:.4}",
                result.status,
                passed,
                result.steps.len(),
                result.retry_count,
                result.cost
            );
            if let Some(error) = &result.error {
                println!("error: {error}");
            }
            if result.status != RunStatus::Passed {
                std::process::exit(1);
            }
            break;
        }
    }
    Ok(())
}

async fn set_archived(
    store: &TestStore,
    id: &str,
    is_result: bool,
    archived: bool,
) -> Result<()> {
    if is_result {
        let id: ResultId = id.parse().context("invalid result id")?;
        store.set_result_archived(id, archived).await?;
    } else {
        let id: TestId = id.parse().context("invalid test id")?;
        store.set_test_archived(id, archived).await?;
    }
    println!("{}archived {id}", if archived { "" } else { "un" });
    Ok(())
}
