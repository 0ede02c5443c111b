//! Remove the Gemini watermark from a single image.
//!
//! Usage:
//! ```sh
//! cargo run --example remove_watermark -- input.png output.png
//! ```

use std::env;
use std::process;

use gemini_watermark_removal::{OutputFormat, ProcessOptions, WatermarkEngine};

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <input> <output>", args[0]);
        process::exit(1);
    }

    let input = &args[1];
    let output = &args[2];

    let bytes = match std::fs::read(input) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    let engine = WatermarkEngine::new();
    let opts = ProcessOptions {
        output_format: OutputFormat::from_path(output.as_ref()).ok(),
        ..ProcessOptions::default()
    };

    match engine.remove_visible_watermark(&bytes, &opts) {
        Ok(cleaned) => {
            let d = cleaned.detection;
            println!(
                "Removed {0}x{0} watermark at ({1}, {2}), correlation {3:.3}",
                d.size, d.x, d.y, d.score
            );
            if let Err(e) = std::fs::write(output, &cleaned.data) {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        }
        Err(e) if e.is_detection_failure() => println!("Skipped: {e}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
