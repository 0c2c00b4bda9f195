//! LabelForge CLI - Bridge interface for the label compiler
//!
//! Commands: templates, compile, estimate, render
//! Outputs JSON to stdout, logs to stderr
//! Exit 1 when inputs are unreachable or the template is invalid, 2 for
//! invalid payloads

use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use labelforge_core::{
    grouping::GroupBy,
    pipeline::CompileOptions,
    CompilationPipeline, CompileRequest, EngineConfig, MemoryRecords, MemorySink, PipelineError,
    Renderer, TemplateRegistry,
};

#[derive(Parser)]
#[command(name = "labelforge-cli")]
#[command(about = "LabelForge CLI - Label Compiler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to templates directory
    #[arg(short, long, default_value = "templates", env = "LABELFORGE_TEMPLATES_DIR")]
    templates_dir: PathBuf,

    /// Engine config file (JSON)
    #[arg(short, long, env = "LABELFORGE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the system default printer id
    #[arg(long)]
    default_printer: Option<String>,

    /// Worker threads for per-record compilation
    #[arg(long)]
    workers: Option<usize>,
}

#[derive(Clone, Copy, ValueEnum)]
enum GroupArg {
    Printer,
    SalesWindow,
    PickupTime,
    Route,
}

impl From<GroupArg> for GroupBy {
    fn from(arg: GroupArg) -> Self {
        match arg {
            GroupArg::Printer => GroupBy::Printer,
            GroupArg::SalesWindow => GroupBy::SalesWindow,
            GroupArg::PickupTime => GroupBy::PickupTime,
            GroupArg::Route => GroupBy::Route,
        }
    }
}

#[derive(clap::Args)]
struct BatchArgs {
    /// Template ID
    #[arg(short, long)]
    template: String,

    /// Records file (JSON array, or {"vendor": .., "records": [..]})
    #[arg(short, long)]
    records: PathBuf,

    /// Record ids to include (default: every record in the file)
    #[arg(long, value_delimiter = ',')]
    ids: Vec<String>,

    #[arg(short, long, value_enum, default_value = "printer")]
    group_by: GroupArg,

    /// JSON payload (CompileOptions)
    #[arg(short, long)]
    options: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List available templates
    Templates,

    /// Compile a batch; previews unless --commit is given
    Compile {
        #[command(flatten)]
        batch: BatchArgs,

        /// Submit the batch to the print sink
        #[arg(long)]
        commit: bool,
    },

    /// Label counts, duration and cost for a batch
    Estimate {
        #[command(flatten)]
        batch: BatchArgs,
    },

    /// Compile a batch and write one PNG per label
    Render {
        #[command(flatten)]
        batch: BatchArgs,

        /// Output directory
        #[arg(long, default_value = "out")]
        out: PathBuf,

        /// TrueType font for text
        #[arg(long)]
        font: Option<PathBuf>,
    },
}

/// A failure already reported on stdout
struct Exit(u8);

fn fail(code: u8, error: impl std::fmt::Display) -> Exit {
    let output = serde_json::json!({
        "success": false,
        "error": error.to_string(),
    });
    println!("{}", output);
    Exit(code)
}

fn pipeline_exit(e: PipelineError) -> Exit {
    let code = match e {
        PipelineError::TemplateNotFound(_)
        | PipelineError::RecordNotFound(_)
        | PipelineError::EmptyBatch => 2,
        _ => 1,
    };
    fail(code, e)
}

fn print_json(value: &impl serde::Serialize) -> Result<(), Exit> {
    let text = serde_json::to_string_pretty(value).map_err(|e| fail(1, e))?;
    println!("{}", text);
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("labelforge_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            fail(1, format!("Failed to start runtime: {}", e));
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(Exit(code)) => ExitCode::from(code),
    }
}

async fn run(cli: Cli) -> Result<(), Exit> {
    let mut config = EngineConfig::load(cli.config.as_deref())
        .map_err(|e| fail(1, format!("Failed to load config: {}", e)))?;
    if let Some(printer) = cli.default_printer {
        config.default_printer = printer;
    }
    if let Some(n) = cli.workers {
        config.worker_threads = Some(n);
    }

    let registry = TemplateRegistry::load_from_dir(&cli.templates_dir)
        .map_err(|e| fail(1, format!("Failed to load templates: {}", e)))?;
    let templates = Arc::new(registry);

    match cli.command {
        Commands::Templates => {
            let pipeline = CompilationPipeline::new(
                templates,
                Arc::new(MemoryRecords::default()),
                Arc::new(MemorySink::default()),
                config,
            );
            let list = pipeline.list_templates().await.map_err(pipeline_exit)?;
            print_json(&list)
        }

        Commands::Compile { batch, commit } => {
            let (pipeline, request) =
                prepare(&batch, templates, config, Renderer::new(), !commit)?;
            let result = pipeline.compile_batch(&request).await.map_err(pipeline_exit)?;

            let artifacts = match &result.batch_job_id {
                Some(job) => {
                    let artifacts = pipeline.download(job).await.map_err(pipeline_exit)?;
                    artifacts
                        .iter()
                        .map(|a| {
                            serde_json::json!({
                                "id": a.id,
                                "filename": a.filename,
                                "format": a.format,
                                "hash": a.hash,
                            })
                        })
                        .collect()
                }
                None => vec![],
            };
            print_json(&serde_json::json!({
                "success": true,
                "batch": result,
                "artifacts": artifacts,
            }))
        }

        Commands::Estimate { batch } => {
            let (pipeline, request) =
                prepare(&batch, templates, config, Renderer::new(), true)?;
            let counts = pipeline
                .label_counts(&request.record_ids, &request.options)
                .await
                .map_err(pipeline_exit)?;
            let result = pipeline.compile_batch(&request).await.map_err(pipeline_exit)?;
            let label_counts: Vec<serde_json::Value> = counts
                .into_iter()
                .map(|(id, count)| serde_json::json!({ "recordId": id, "count": count }))
                .collect();
            print_json(&serde_json::json!({
                "success": true,
                "summary": result.summary,
                "warnings": result.warnings,
                "labelCounts": label_counts,
            }))
        }

        Commands::Render { batch, out, font } => {
            let mut renderer = Renderer::new().with_asset_root(&cli.templates_dir);
            if let Some(path) = font {
                renderer = renderer.with_font_file(&path).map_err(|e| fail(1, e))?;
            }
            let (pipeline, request) =
                prepare(&batch, templates, config, renderer.clone(), true)?;
            let result = pipeline.compile_batch(&request).await.map_err(pipeline_exit)?;

            std::fs::create_dir_all(&out).map_err(|e| fail(1, e))?;
            let mut files = vec![];
            for (i, instance) in result.labels.iter().enumerate() {
                let path = out.join(format!("{}-{:04}.png", result.batch_id, i + 1));
                let (surface, report) = renderer
                    .render_raster(&instance.label.template)
                    .map_err(|e| fail(1, e))?;
                surface.save_png(&path).map_err(|e| fail(1, e))?;
                files.push(serde_json::json!({
                    "path": path.display().to_string(),
                    "recordId": instance.record_id,
                    "copies": instance.copies,
                    "report": report,
                }));
            }
            print_json(&serde_json::json!({
                "success": true,
                "files": files,
                "warnings": result.warnings,
            }))
        }
    }
}

/// Build the pipeline and request for a batch subcommand
fn prepare(
    batch: &BatchArgs,
    templates: Arc<TemplateRegistry>,
    config: EngineConfig,
    renderer: Renderer,
    dry_run: bool,
) -> Result<(CompilationPipeline, CompileRequest), Exit> {
    let records = load_records(&batch.records)?;
    let options: CompileOptions = match &batch.options {
        Some(payload) => serde_json::from_str(payload)
            .map_err(|e| fail(2, format!("Invalid payload: {}", e)))?,
        None => CompileOptions::default(),
    };
    let record_ids = if batch.ids.is_empty() { records.ids() } else { batch.ids.clone() };

    let request = CompileRequest {
        record_ids,
        template_id: batch.template.clone(),
        group_by: batch.group_by.into(),
        dry_run,
        options,
    };
    let sink = Arc::new(MemorySink::new(renderer));
    let pipeline = CompilationPipeline::new(templates, Arc::new(records), sink, config);
    Ok((pipeline, request))
}

fn load_records(path: &Path) -> Result<MemoryRecords, Exit> {
    MemoryRecords::load_from_file(path)
        .map_err(|e| fail(1, format!("Failed to load records: {}", e)))
}
