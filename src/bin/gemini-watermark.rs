use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;

use gemini_watermark_removal::{
    resolve_output_path, AssetSource, OutputFormat, ProcessOptions, ProcessResult, Tuning,
    WatermarkEngine, WatermarkSize,
};

#[derive(Parser)]
#[command(
    name = "gemini-watermark",
    about = "Locate and remove visible Gemini AI watermarks via reverse alpha blending",
    version,
    after_help = "Simple usage: gemini-watermark <image>  (writes {name}_cleaned.{ext})\n\n\
                  NOTE: This tool only removes the VISIBLE Gemini watermark (sparkle logo).\n\
                  It cannot remove SynthID (invisible watermark)."
)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Input image file or directory
    input: String,

    /// Output file or directory (default: {name}_cleaned.{ext})
    #[arg(short, long)]
    output: Option<String>,

    /// Remove at the best match even if it fails the confidence gate
    #[arg(short, long)]
    force: bool,

    /// Force 48x48 watermark size (for images <= 1024px)
    #[arg(long)]
    force_small: bool,

    /// Force 96x96 watermark size (for images > 1024px)
    #[arg(long)]
    force_large: bool,

    /// Output format: png, jpeg or webp (default: from output extension)
    #[arg(long)]
    format: Option<OutputFormat>,

    /// JPEG quality (0.0-1.0)
    #[arg(long, default_value = "1.0")]
    quality: f32,

    /// JSON file overriding detection thresholds and search margins
    #[arg(long)]
    tuning: Option<PathBuf>,

    /// Directory containing bg_48.png and bg_96.png reference captures
    #[arg(long)]
    assets: Option<PathBuf>,

    /// Copy the original to the output when no watermark is found
    #[arg(long)]
    fallback_original: bool,

    /// Print one JSON object per processed file on stdout
    #[arg(long)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all non-error output
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_log_filter(cli.verbose, cli.quiet)),
    )
        .format_timestamp(None)
        .init();

    if cli.force_small && cli.force_large {
        eprintln!("Error: Cannot specify both --force-small and --force-large");
        process::exit(1);
    }

    if !(0.0..=1.0).contains(&cli.quality) {
        eprintln!("Error: Quality must be between 0.0 and 1.0");
        process::exit(1);
    }

    let force_size = if cli.force_small {
        Some(WatermarkSize::Small)
    } else if cli.force_large {
        Some(WatermarkSize::Large)
    } else {
        None
    };

    let opts = ProcessOptions {
        output_format: cli.format,
        output_quality: cli.quality,
        force_size,
        force: cli.force,
        fallback_original: cli.fallback_original,
    };

    let tuning = match &cli.tuning {
        Some(path) => match Tuning::from_json_file(path) {
            Ok(t) => t,
            Err(e) => {
                eprintln!("Fatal: Failed to read tuning file {}: {e}", path.display());
                process::exit(1);
            }
        },
        None => Tuning::default(),
    };

    let source = cli
        .assets
        .clone()
        .map_or(AssetSource::Embedded, AssetSource::Directory);
    let engine = WatermarkEngine::with_assets(source).with_tuning(tuning);

    let input_path = Path::new(&cli.input);
    if !input_path.exists() {
        eprintln!("Error: Input path does not exist: {}", cli.input);
        process::exit(1);
    }

    if !cli.quiet {
        if opts.force {
            eprintln!("WARNING: Force mode - removing at best match regardless of confidence!");
        } else {
            let t = engine.tuning();
            eprintln!(
                "Auto-detection enabled (min correlation: {:.2}, min darkening: {:.1})",
                t.min_correlation, t.min_darkening
            );
        }
        eprintln!();
    }

    let results = if input_path.is_dir() {
        let output_dir = if let Some(o) = &cli.output {
            PathBuf::from(o)
        } else {
            eprintln!("Error: Output directory is required for batch processing");
            eprintln!("Usage: gemini-watermark <input_dir> -o <output_dir>");
            process::exit(1);
        };
        engine.process_directory(input_path, &output_dir, &opts)
    } else {
        let output_path = resolve_output_path(
            input_path,
            cli.output.as_deref().map(Path::new),
            opts.output_format,
        );
        vec![engine.process_file(input_path, &output_path, &opts)]
    };

    let mut success_count = 0u32;
    let mut skip_count = 0u32;
    let mut fallback_count = 0u32;
    let mut fail_count = 0u32;

    for r in &results {
        print_result(r, &cli);
        if r.fallback {
            fallback_count += 1;
        } else if r.skipped {
            skip_count += 1;
        } else if r.success {
            success_count += 1;
        } else {
            fail_count += 1;
        }
    }

    if results.len() > 1 && !cli.quiet {
        eprintln!();
        eprint!("[Summary] Removed: {success_count}");
        if skip_count > 0 {
            eprint!(", Skipped: {skip_count}");
        }
        if fallback_count > 0 {
            eprint!(", Fallback: {fallback_count}");
        }
        if fail_count > 0 {
            eprint!(", Failed: {fail_count}");
        }
        eprintln!(" (Total: {})", results.len());
    }

    if fail_count > 0 {
        process::exit(1);
    }
}

/// Log filter used when `RUST_LOG` is unset.
fn default_log_filter(verbose: bool, quiet: bool) -> &'static str {
    if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    }
}

fn print_result(result: &ProcessResult, cli: &Cli) {
    if cli.json {
        let line = serde_json::json!({
            "path": result.path.display().to_string(),
            "success": result.success,
            "skipped": result.skipped,
            "fallback": result.fallback,
            "detection": result.detection,
            "message": result.message,
        });
        println!("{line}");
    }

    if cli.quiet && result.success {
        return;
    }

    let filename = result.path.file_name().map_or_else(
        || result.path.display().to_string(),
        |f| f.to_string_lossy().to_string(),
    );

    if result.fallback {
        if !cli.quiet {
            eprintln!("[FALLBACK] {filename}: {}", result.message);
        }
    } else if result.skipped {
        if !cli.quiet {
            eprintln!("[SKIP] {filename}: {}", result.message);
        }
    } else if result.success {
        if !cli.quiet {
            match &result.detection {
                Some(d) => eprintln!(
                    "[OK] {filename} (correlation {:.3}, darkening {:.1} at {},{})",
                    d.score, d.darkening, d.x, d.y
                ),
                None => eprintln!("[OK] {filename}"),
            }
        }
    } else {
        eprintln!("[FAIL] {filename}: {}", result.message);
    }

    if cli.verbose && !result.message.is_empty() {
        eprintln!("  -> {}", result.message);
    }
}
