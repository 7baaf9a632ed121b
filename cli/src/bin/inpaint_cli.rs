use clap::{Parser, Subcommand, ValueEnum};
use cli::EditScript;
use color_eyre::eyre::Result;
use inpaint::{
    BaseImage, CommandOutcome, Editor, EditorCommand, EditorConfig, detection::normalize_str,
};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{self, EnvFilter};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay an edit script against its base image and export the results
    Run {
        /// Path to the TOML or JSON edit script
        #[arg(short, long)]
        script: PathBuf,
    },
    /// Normalize a detection service response and print the regions
    Detect {
        /// Path to the raw JSON response
        #[arg(short, long)]
        response: PathBuf,
        /// Image the response describes; segmentation masks are scaled to it
        #[arg(short, long)]
        image: Option<PathBuf>,
    },
    /// Print a JSON schema
    Schema {
        #[arg(value_enum, default_value = "commands")]
        target: SchemaTarget,
    },
    /// Write a starter edit script for an image
    Skeleton {
        /// Path to the base image
        #[arg(short, long)]
        image: PathBuf,
        /// Output directory for exported images
        #[arg(short, long)]
        output_dir: PathBuf,
        /// Where to save the script (.toml or .json)
        #[arg(short, long)]
        script: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SchemaTarget {
    Commands,
    Script,
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Run { script } => run_script(script)?,
        Commands::Detect { response, image } => detect(response, image.as_deref())?,
        Commands::Schema { target } => print_schema(*target)?,
        Commands::Skeleton {
            image,
            output_dir,
            script,
        } => {
            let skeleton = EditScript::skeleton(&image.to_string_lossy(), &output_dir.to_string_lossy());
            skeleton.to_file(script)?;
            info!("Wrote starter script to {:?}", script);
        }
    }

    Ok(())
}

fn run_script(script_path: &Path) -> Result<()> {
    let script = EditScript::from_file(script_path)?;
    info!("Replaying {} steps against {}", script.steps.len(), script.image);

    std::fs::create_dir_all(&script.output_dir)?;

    let mut editor = Editor::new(script.editor.clone());
    editor.open(script.image.clone(), BaseImage::open(&script.image)?);

    for step in script.steps {
        info!("Step '{}': {}", step.name, step.command.description());
        match editor.execute(step.command) {
            Ok(CommandOutcome::Rejected { rejection }) => {
                warn!("Step '{}' rejected: {}", step.name, rejection);
            }
            Ok(outcome) => println!("{}", serde_json::to_string(&outcome)?),
            Err(e) => {
                warn!(
                    "Step '{}' failed: {} ({})",
                    step.name,
                    e,
                    step.description.unwrap_or_default()
                );
            }
        }
    }

    let output = Path::new(&script.output_dir);
    let exports: [(&str, fn(String) -> EditorCommand); 3] = [
        ("mask.png", |path| EditorCommand::ExportMask { path }),
        ("overlay.png", |path| EditorCommand::ExportOverlay { path }),
        ("composite.png", |path| EditorCommand::ExportComposite { path }),
    ];
    for (file, export) in exports {
        let path = output.join(file).to_string_lossy().into_owned();
        match editor.execute(export(path)) {
            Ok(CommandOutcome::EmptyMask) => info!("Mask is empty, skipped {}", file),
            Ok(outcome) => info!("{:?}", outcome),
            Err(e) => warn!("Could not export {}: {}", file, e),
        }
    }

    let snapshot = editor.execute(EditorCommand::Snapshot)?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    info!("✅ Script completed!");
    Ok(())
}

fn detect(response_path: &Path, image: Option<&Path>) -> Result<()> {
    let content = std::fs::read_to_string(response_path)?;
    let natural = image
        .map(|path| BaseImage::open(path).map(|base| base.dimensions()))
        .transpose()?;
    let report = normalize_str(&content, natural)?;
    for skipped in &report.skipped {
        warn!("Skipped entry {}: {}", skipped.index, skipped.reason);
    }
    if report.regions.is_empty() {
        warn!("No usable regions in {:?}", response_path);
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn print_schema(target: SchemaTarget) -> Result<()> {
    let schema = match target {
        SchemaTarget::Commands => serde_json::to_string_pretty(&EditorCommand::schema())?,
        SchemaTarget::Script => serde_json::to_string_pretty(&schemars::schema_for!(EditScript))?,
        SchemaTarget::Config => serde_json::to_string_pretty(&EditorConfig::schema())?,
    };
    println!("{}", schema);
    Ok(())
}
