use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rdp_llm::{ChatCompletion, OpenRouterClient};
use rdp_pipeline::{
    write_run_report, AnimalStore, FileAnimalStore, PgAnimalStore, PipelineOptions, ProfilerPipeline,
    ProfilerSettings,
};
use rdp_profiler::{OrganizationConfigLoader, PromptBuilder};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "rdp-cli")]
#[command(about = "Generate LLM adoption profiles for rescue dogs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Profile pending dogs of one organization.
    Profile {
        #[arg(long)]
        org_id: i64,
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        batch_size: Option<usize>,
        /// Read animals from a JSON array instead of Postgres.
        #[arg(long)]
        animals_file: Option<PathBuf>,
    },
    /// List configured organizations and check their prompt templates.
    Orgs,
    /// Print the messages that would be sent for each dog in a file.
    RenderPrompt {
        #[arg(long)]
        org_id: i64,
        #[arg(long)]
        animals_file: PathBuf,
        #[arg(long)]
        animal_id: Option<i64>,
    },
}

const DB_MAX_CONNECTIONS: u32 = 5;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let settings = ProfilerSettings::from_env();

    let outcome = match cli.command {
        Commands::Profile {
            org_id,
            limit,
            dry_run,
            batch_size,
            animals_file,
        } => profile(&settings, org_id, limit, dry_run, batch_size, animals_file).await,
        Commands::Orgs => orgs(&settings),
        Commands::RenderPrompt {
            org_id,
            animals_file,
            animal_id,
        } => render_prompt(&settings, org_id, &animals_file, animal_id),
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            error!(error = %format!("{err:#}"), "command failed");
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

async fn profile(
    settings: &ProfilerSettings,
    org_id: i64,
    limit: Option<i64>,
    dry_run: bool,
    batch_size: Option<usize>,
    animals_file: Option<PathBuf>,
) -> Result<bool> {
    let loader = OrganizationConfigLoader::from_workspace_root(&settings.workspace_root)?;
    let prompts = PromptBuilder::new(settings.cache_size);
    let client = OpenRouterClient::new(settings.openrouter_config()?)?;
    info!(provider = client.provider(), endpoint = client.endpoint(), "llm client ready");
    let llm: Arc<dyn ChatCompletion> = Arc::new(client);

    let file_store = animals_file
        .as_ref()
        .map(FileAnimalStore::load)
        .transpose()?
        .map(Arc::new);
    let store: Arc<dyn AnimalStore> = match &file_store {
        Some(store) => store.clone() as Arc<dyn AnimalStore>,
        None => {
            let url = settings.require_database_url()?;
            Arc::new(PgAnimalStore::connect(url, DB_MAX_CONNECTIONS).await?)
        }
    };

    let mut options = PipelineOptions::from_settings(settings, dry_run);
    if let Some(size) = batch_size {
        options.batch_size = size.max(1);
    }

    let pipeline =
        ProfilerPipeline::for_organization(org_id, &loader, &prompts, settings, llm, store, options)?;
    info!(
        org = %pipeline.organization().name,
        model = pipeline.model(),
        dry_run,
        "starting profiling"
    );
    let run = pipeline.run(limit).await?;
    let paths = write_run_report(&run, &settings.workspace_root).await?;

    if let Some(store) = file_store.filter(|_| !dry_run) {
        let profiles_path = paths.dir.join("profiles.json");
        let bytes = serde_json::to_vec_pretty(&store.saved_profiles())
            .context("serializing generated profiles")?;
        tokio::fs::write(&profiles_path, bytes)
            .await
            .with_context(|| format!("writing {}", profiles_path.display()))?;
    }

    println!(
        "profiling complete: run_id={} org={} total={} succeeded={} failed={} validation_failures={} persisted={} reports={}",
        run.run_id,
        run.organization_id,
        run.stats.total,
        run.stats.succeeded,
        run.stats.failed,
        run.stats.validation_failures,
        run.stats.persisted,
        paths.dir.display()
    );
    for message in &run.stats.errors {
        eprintln!("  {message}");
    }
    Ok(run.stats.is_success())
}

fn orgs(settings: &ProfilerSettings) -> Result<bool> {
    let loader = OrganizationConfigLoader::from_workspace_root(&settings.workspace_root)?;
    let prompts = PromptBuilder::new(settings.cache_size);
    let mut healthy = true;

    for org in loader.all() {
        let status = if !org.enabled {
            "disabled".to_string()
        } else {
            match loader
                .prompt_path(org.id)
                .and_then(|path| prompts.template(path))
            {
                Ok(template) => format!("ok (prompt v{})", template.version),
                Err(err) => {
                    healthy = false;
                    format!("error: {err}")
                }
            }
        };
        println!(
            "{:>5}  {:<32} {}->{}  {}",
            org.id, org.name, org.source_language, org.target_language, status
        );
    }
    Ok(healthy)
}

fn render_prompt(
    settings: &ProfilerSettings,
    org_id: i64,
    animals_file: &Path,
    animal_id: Option<i64>,
) -> Result<bool> {
    let loader = OrganizationConfigLoader::from_workspace_root(&settings.workspace_root)?;
    let org = loader.get(org_id)?;
    let prompts = PromptBuilder::new(settings.cache_size);
    let template = prompts.template(loader.prompt_path(org_id)?)?;

    let store = FileAnimalStore::load(animals_file)?;
    let selected = store.select(org_id, animal_id);
    if selected.is_empty() {
        bail!("no animals for organization {org_id} in {}", animals_file.display());
    }

    for animal in selected {
        println!("=== {} ({}) ===", animal.name, animal.id);
        for message in template.build_messages(animal, org) {
            println!("--- {} ---\n{}", message.role, message.content);
        }
    }
    Ok(true)
}
