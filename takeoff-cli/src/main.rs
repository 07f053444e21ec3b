use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;

// Import from takeoff-core
use takeoff_core::{ExtractionConfig, MarkdownParser, TakeoffProcessor};

// Import CLI utilities
use takeoff_cli::{default_output_path, sha256_file, DocumentReport};

#[derive(Parser)]
#[command(name = "takeoff")]
#[command(about = "Extract pipe runs (diameter, material, length) from construction drawing PDFs")]
struct Args {
    /// Path to the PDF file to process
    #[arg(short, long, required_unless_present_any = ["markdown", "show_configs"])]
    input: Option<String>,

    /// Pages to extract, 1-indexed (repeatable or comma separated)
    #[arg(short, long, value_delimiter = ',', default_value = "1")]
    page: Vec<u32>,

    /// Path to custom config file (YAML format)
    #[arg(short, long)]
    config: Option<String>,

    /// Output file path (if not specified, auto-generated based on input)
    #[arg(short, long)]
    output: Option<String>,

    /// OCR render resolution; the first is tried first, 350/300 are added
    /// as fallbacks when missing (repeatable)
    #[arg(long)]
    dpi: Vec<u32>,

    /// Vector runs needed before the OCR fallback is skipped
    #[arg(long)]
    min_runs: Option<usize>,

    /// Disable the OCR fallback entirely
    #[arg(long)]
    no_ocr: bool,

    /// Enable detailed profiling of all pipeline steps
    #[arg(long)]
    profile: bool,

    /// Parse a vision-agent markdown takeoff instead of a PDF
    #[arg(long)]
    markdown: Option<String>,

    /// Show available config options and exit
    #[arg(long)]
    show_configs: bool,

    /// Debug-level logging (RUST_LOG overrides)
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    println!("🦀 Takeoff Pipe Extractor");

    if args.show_configs {
        show_help();
        return Ok(());
    }

    // Load config using functional pattern
    let mut config = ExtractionConfig::load_with_fallback(args.config.as_deref());
    if let Some(config_path) = &args.config {
        println!("📋 Loaded config from: {}", config_path);
    } else {
        println!("📋 Using default config");
    }
    apply_overrides(&mut config, &args);
    tracing::debug!("Effective config: {:?}", config);

    if let Some(markdown_path) = &args.markdown {
        return run_markdown(&args, &config, markdown_path);
    }

    let Some(input) = args.input.as_deref() else {
        anyhow::bail!("--input is required");
    };

    // Check if input file exists
    if !Path::new(input).exists() {
        println!("⚠️  Input PDF not found at: {}", input);
        println!("   Please check the file path.");
        return Ok(());
    }

    let processor = create_processor(config)?;
    println!("📄 Processing: {} (pages {:?})", input, args.page);

    let outcomes = processor.extract_pages_with_profiling(Path::new(input), &args.page, args.profile);
    let report = DocumentReport::new(Path::new(input), sha256_file(Path::new(input))?, outcomes);

    for page in &report.pages {
        match (&page.extraction, &page.error) {
            (Some(extraction), _) => {
                println!(
                    "✅ Page {}: {} pipe groups, {:.1} LF ({:?})",
                    page.page,
                    extraction.pipes.len(),
                    extraction.total_length_ft(),
                    extraction.source
                );
                for pipe in &extraction.pipes {
                    println!(
                        "   - {}\" {}: {:.1} LF in {} runs",
                        pipe.diameter_in.map(|d| d.to_string()).unwrap_or_else(|| "?".to_string()),
                        pipe.material.as_deref().unwrap_or("unknown material"),
                        pipe.total_length_ft,
                        pipe.count
                    );
                }
            }
            (None, Some(error)) => println!("❌ Page {}: {}", page.page, error),
            (None, None) => {}
        }
    }
    println!(
        "📏 Document total: {:.1} LF across {} pages ({} failed)",
        report.total_length_ft(),
        report.pages.len(),
        report.failed_pages()
    );

    let output_path = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(input, args.config.as_deref(), "takeoff"));
    report.save(&output_path)?;
    println!("💾 Takeoff saved to: {}", output_path);

    if report.failed_pages() == report.pages.len() && !report.pages.is_empty() {
        eprintln!("❌ Every requested page failed");
        std::process::exit(1);
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
}

/// Apply CLI overrides to config
fn apply_overrides(config: &mut ExtractionConfig, args: &Args) {
    if !args.dpi.is_empty() {
        config.ocr.set_preferred_dpis(&args.dpi);
    }
    if let Some(min_runs) = args.min_runs {
        config.vector.min_runs_before_ocr = min_runs;
    }
    if args.no_ocr {
        config.ocr.enabled = false;
    }
}

fn run_markdown(args: &Args, config: &ExtractionConfig, markdown_path: &str) -> Result<()> {
    let markdown = std::fs::read_to_string(markdown_path)
        .with_context(|| format!("reading markdown from {markdown_path}"))?;
    let takeoff = MarkdownParser::new(&config.materials).parse(&markdown);

    println!("✅ Parsed vision takeoff");
    println!("   - Pipes: {}", takeoff.pipes.len());
    println!("   - Structures: {}", takeoff.structures.len());
    println!("   - Earthwork items: {}", takeoff.earthwork.len());

    let output_path = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(markdown_path, None, "vision"));
    std::fs::write(&output_path, serde_json::to_string_pretty(&takeoff)?)
        .with_context(|| format!("writing {output_path}"))?;
    println!("💾 Vision takeoff saved to: {}", output_path);
    Ok(())
}

/// Create TakeoffProcessor with pdfium + tesseract backends
#[cfg(feature = "pdfium-backend")]
fn create_processor(config: ExtractionConfig) -> Result<TakeoffProcessor> {
    println!("🚀 Using pdfium backend (OCR via tesseract)");
    TakeoffProcessor::new_default(config)
}

/// Fallback when no backend is compiled in
#[cfg(not(feature = "pdfium-backend"))]
fn create_processor(_config: ExtractionConfig) -> Result<TakeoffProcessor> {
    Err(anyhow::anyhow!(
        "No PDF backend compiled in!\n\
         Compile with: --features pdfium-backend"
    ))
}

fn show_help() {
    println!("\n📋 Available Configuration Options:");
    println!("  --config <path>         Load custom config file");
    println!("  --input <path>          PDF file to process");
    println!("  --page <n>[,<n>...]     Pages to extract, 1-indexed (default: 1)");
    println!("  --output <path>         Output file path (auto-generated if not specified)");
    println!("  --dpi <dpi>             OCR resolution, primary first (default: 450, 350, 300)");
    println!("  --min-runs <n>          Vector runs needed to skip OCR (default: 2)");
    println!("  --no-ocr                Vector text layer only");
    println!("  --markdown <path>       Parse a vision-agent markdown takeoff to JSON");
    println!("  --profile               Log per-step timings");

    println!("\n🔧 Config file sections:");
    println!("  vector     - line grouping and the OCR threshold");
    println!("  ocr        - DPIs and tesseract binary/options");
    println!("  recovery   - lexical recovery thresholds and query templates");
    println!("  reconcile  - length tolerances and the diameter ceiling");
    println!("  materials  - canonical materials, aliases and cues");

    println!("\n📝 Usage Examples:");
    println!("  cargo run -- -i plans.pdf -p 4");
    println!("  cargo run -- -i plans.pdf -p 3,4,5 -o takeoff.json");
    println!("  cargo run -- -i scanned.pdf --dpi 600 --profile");
    println!("  cargo run -- --markdown vision_output.md");

    println!("\n🔧 Runtime requirements:");
    println!("  libpdfium in ./ or on the system library path");
    println!("  tesseract on PATH (or ocr.tesseract_path in the config)");
}
