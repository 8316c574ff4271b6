use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use ecoute_core::{
    ApiEmbedder, ChatCompletionClient, ContentStore, Embedder, ExerciseGenerator, ExerciseType,
    HashingEmbedder, Provider, SimilarityRetriever, TranscriptExtractor, UpsertOutcome,
    format_exercise_readable, get_exercises_dir, get_root_dir, get_transcripts_dir,
    get_vector_db_dir,
};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::fs;
use tracing_subscriber::EnvFilter;

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.0}m {:.0}s", (secs / 60.0).floor(), secs % 60.0)
    }
}

/// CLI wrapper for Provider enum (needed for clap ValueEnum)
#[derive(Clone, Copy, Default, ValueEnum)]
enum CliProvider {
    #[default]
    Grok,
    Openai,
    Gemini,
}

impl From<CliProvider> for Provider {
    fn from(cli: CliProvider) -> Self {
        match cli {
            CliProvider::Grok => Provider::Grok,
            CliProvider::Openai => Provider::Openai,
            CliProvider::Gemini => Provider::Gemini,
        }
    }
}

#[derive(Clone, Copy, Default, ValueEnum)]
enum CliEmbedder {
    /// Offline feature-hashing embedder
    #[default]
    Hashing,
    /// Provider embeddings endpoint
    Api,
}

#[derive(Parser)]
#[command(name = "ecoute")]
#[command(
    about = "Extract listening exercises from transcripts, index them, and generate new ones"
)]
struct Cli {
    /// Data directory holding transcripts/, exercises/ and vector_db/
    #[arg(long, env = "ECOUTE_HOME", global = true)]
    home: Option<PathBuf>,

    /// AI provider for extraction and generation
    #[arg(short, long, default_value = "grok", global = true)]
    provider: CliProvider,

    /// Embedder used for the similarity index
    #[arg(long, default_value = "hashing", global = true)]
    embedder: CliEmbedder,

    /// Provider for `--embedder api`
    #[arg(long, default_value = "openai", global = true)]
    embedding_provider: CliProvider,

    /// HTTP request timeout in seconds
    #[arg(long, default_value_t = 120, global = true)]
    timeout_secs: u64,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract exercises from every transcript in transcripts/
    Extract {
        /// Re-process transcripts that already have a model response
        #[arg(short, long)]
        force: bool,

        /// Process a single transcript file instead of the whole directory
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Index extracted exercise files into the similarity store
    Index {
        /// Directory of exercise files (defaults to exercises/)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Find stored exercises similar to a text
    Query {
        text: String,

        /// multiple_choice, dialog_matching or other
        #[arg(short = 't', long = "type")]
        exercise_type: ExerciseType,

        #[arg(short = 'k', long, default_value_t = 3)]
        limit: usize,
    },
    /// Generate a new exercise about a topic from similar stored examples
    Generate {
        topic: String,

        #[arg(short = 't', long = "type")]
        exercise_type: ExerciseType,

        /// Add the generated exercise to the store
        #[arg(long)]
        save: bool,

        /// Write the generated exercise as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print a stored exercise
    Show {
        id: String,

        #[arg(short = 't', long = "type")]
        exercise_type: ExerciseType,
    },
    /// Count stored exercises per type
    Stats,
}

fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn build_embedder(cli: &Cli) -> Result<Arc<dyn Embedder>> {
    let embedder: Arc<dyn Embedder> = match cli.embedder {
        CliEmbedder::Hashing => Arc::new(HashingEmbedder::default()),
        CliEmbedder::Api => Arc::new(ApiEmbedder::new(
            cli.embedding_provider.into(),
            Duration::from_secs(cli.timeout_secs),
        )?),
    };
    Ok(embedder)
}

fn build_completion(cli: &Cli) -> Result<ChatCompletionClient> {
    let provider: Provider = cli.provider.into();
    Ok(ChatCompletionClient::new(
        provider,
        Duration::from_secs(cli.timeout_secs),
    )?)
}

async fn open_store(cli: &Cli, root: &Path) -> Result<ContentStore> {
    let dir = get_vector_db_dir(root);
    ContentStore::open(&dir, build_embedder(cli)?)
        .await
        .with_context(|| format!("failed to open store at {}", dir.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Validate API keys early
    let needs_completion = matches!(
        cli.command,
        Commands::Extract { .. } | Commands::Generate { .. }
    );
    let mut missing = Vec::new();
    if needs_completion {
        missing.extend(Provider::from(cli.provider).validate_api_key().err());
    }
    if matches!(cli.embedder, CliEmbedder::Api) && !matches!(cli.command, Commands::Extract { .. })
    {
        missing.extend(Provider::from(cli.embedding_provider).validate_api_key().err());
    }
    if !missing.is_empty() {
        for e in missing {
            eprintln!("{} {}", style("Error:").red().bold(), e);
        }
        std::process::exit(1);
    }

    let root = cli.home.clone().unwrap_or_else(get_root_dir);

    println!(
        "\n{}  {}\n",
        style("ecoute").cyan().bold(),
        style("Listening Exercises").dim()
    );

    match &cli.command {
        Commands::Extract { force, file } => {
            run_extract(&cli, &root, *force, file.as_deref()).await
        }
        Commands::Index { dir } => run_index(&cli, &root, dir.as_deref()).await,
        Commands::Query {
            text,
            exercise_type,
            limit,
        } => run_query(&cli, &root, text, *exercise_type, *limit).await,
        Commands::Generate {
            topic,
            exercise_type,
            save,
            output,
        } => run_generate(&cli, &root, topic, *exercise_type, *save, output.as_deref()).await,
        Commands::Show { id, exercise_type } => run_show(&cli, &root, id, *exercise_type).await,
        Commands::Stats => run_stats(&cli, &root).await,
    }
}

async fn run_extract(cli: &Cli, root: &Path, force: bool, file: Option<&Path>) -> Result<()> {
    let completion = build_completion(cli)?;
    let extractor = TranscriptExtractor::new(&completion);
    let exercises_dir = get_exercises_dir(root);
    let step_start = Instant::now();

    if let Some(file) = file {
        let spinner = create_spinner(&format!(
            "Extracting exercises with {}...",
            Provider::from(cli.provider).name()
        ));
        let written = extractor.process_transcript(file, &exercises_dir).await?;
        spinner.finish_with_message(format!(
            "{} Extracted {} {}",
            style("✓").green().bold(),
            style(file.display()).dim(),
            style(format!("[{}]", format_duration(step_start.elapsed()))).dim()
        ));
        for path in written {
            println!("  {} {}", style("→").dim(), style(path.display()).cyan());
        }
        return Ok(());
    }

    let transcripts_dir = get_transcripts_dir(root);
    fs::create_dir_all(&transcripts_dir).await?;
    let spinner = create_spinner(&format!(
        "Extracting exercises from {}...",
        transcripts_dir.display()
    ));
    let summary = extractor
        .process_directory(&transcripts_dir, &exercises_dir, force)
        .await?;
    spinner.finish_with_message(format!(
        "{} Processed {}, skipped {} {}",
        style("✓").green().bold(),
        summary.processed.len(),
        summary.skipped.len(),
        style(format!("[{}]", format_duration(step_start.elapsed()))).dim()
    ));

    for (video_id, reason) in &summary.failed {
        println!(
            "{} {}: {}",
            style("✗").red().bold(),
            style(video_id).yellow(),
            reason
        );
    }
    Ok(())
}

async fn run_index(cli: &Cli, root: &Path, dir: Option<&Path>) -> Result<()> {
    let mut store = open_store(cli, root).await?;
    let dir = dir.map(Path::to_path_buf).unwrap_or_else(|| get_exercises_dir(root));
    let step_start = Instant::now();

    let spinner = create_spinner(&format!("Indexing {}...", dir.display()));
    let summary = store.index_directory(&dir).await?;
    spinner.finish_with_message(format!(
        "{} Indexed {} files: {} new, {} updated, {} discarded {}",
        style("✓").green().bold(),
        summary.files,
        summary.inserted,
        summary.replaced,
        summary.discarded,
        style(format!("[{}]", format_duration(step_start.elapsed()))).dim()
    ));

    for (path, reason) in &summary.failed {
        println!(
            "{} {}: {}",
            style("✗").red().bold(),
            style(path.display()).yellow(),
            reason
        );
    }
    println!("\n{} {}", style("Store:").dim(), store.stats());
    Ok(())
}

async fn run_query(
    cli: &Cli,
    root: &Path,
    text: &str,
    exercise_type: ExerciseType,
    limit: usize,
) -> Result<()> {
    let store = open_store(cli, root).await?;
    let hits = SimilarityRetriever::new(&store)
        .query_scored(text, exercise_type, limit)
        .await?;

    if hits.is_empty() {
        println!(
            "{} No {} exercises stored",
            style("!").yellow().bold(),
            exercise_type.label()
        );
        return Ok(());
    }

    for hit in hits {
        println!("{}", style("─".repeat(60)).dim());
        println!(
            "{} {}  {}",
            style(format!("{:.3}", hit.score)).cyan().bold(),
            style(hit.record.id()).dim(),
            style(hit.record.source_video_id()).yellow()
        );
        println!("{}", format_exercise_readable(hit.record.exercise()));
    }
    Ok(())
}

async fn run_generate(
    cli: &Cli,
    root: &Path,
    topic: &str,
    exercise_type: ExerciseType,
    save: bool,
    output: Option<&Path>,
) -> Result<()> {
    let completion = build_completion(cli)?;
    let mut store = open_store(cli, root).await?;
    let step_start = Instant::now();

    let spinner = create_spinner(&format!(
        "Generating {} exercise with {}...",
        exercise_type.label(),
        Provider::from(cli.provider).name()
    ));
    let record = ExerciseGenerator::new(&completion, SimilarityRetriever::new(&store))
        .generate_record(topic, exercise_type)
        .await;
    let record = match record {
        Ok(record) => record,
        Err(e) => {
            spinner.finish_and_clear();
            return Err(e.into());
        }
    };
    spinner.finish_with_message(format!(
        "{} Generated {} {}",
        style("✓").green().bold(),
        style(record.id()).dim(),
        style(format!("[{}]", format_duration(step_start.elapsed()))).dim()
    ));

    if let Some(output) = output {
        let pretty_json = serde_json::to_string_pretty(record.exercise())?;
        fs::write(output, &pretty_json).await?;
        println!("{} {}", style("Saved:").dim(), style(output.display()).cyan());
    }

    if save {
        let outcome = store.upsert(record.clone()).await?;
        let verb = match outcome {
            UpsertOutcome::Inserted => "Added to",
            UpsertOutcome::Replaced => "Already in",
        };
        println!("{} {} store", style("✓").green().bold(), verb);
    }

    println!("{}", style("─".repeat(60)).dim());
    println!("{}", format_exercise_readable(record.exercise()));
    Ok(())
}

async fn run_show(cli: &Cli, root: &Path, id: &str, exercise_type: ExerciseType) -> Result<()> {
    let store = open_store(cli, root).await?;
    let record = store.require(id, exercise_type)?;

    println!(
        "{} {}",
        style("Source:").dim(),
        style(record.source_video_id()).yellow()
    );
    println!("{}", style("─".repeat(60)).dim());
    println!("{}", format_exercise_readable(record.exercise()));
    Ok(())
}

async fn run_stats(cli: &Cli, root: &Path) -> Result<()> {
    let store = open_store(cli, root).await?;
    let stats = store.stats();
    for (exercise_type, count) in [
        (ExerciseType::MultipleChoice, stats.multiple_choice),
        (ExerciseType::DialogMatching, stats.dialog_matching),
        (ExerciseType::Other, stats.other_exercises),
    ] {
        println!(
            "{:>18}  {}",
            style(exercise_type.label()).dim(),
            style(count).cyan().bold()
        );
    }
    println!(
        "\n{} {}",
        style("Embedder:").dim(),
        store.embedder().model_id()
    );
    Ok(())
}
