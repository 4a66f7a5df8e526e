use clap::Parser;
use std::path::PathBuf;
use std::process;

use crate::frames::{FfmpegSampler, FrameSampler};
use crate::media::FrameStrategy;
use crate::phash::DctPhash;

mod error;
mod frames;
mod hamminghash;
mod media;
mod phash;

/// Prints the perceptual fingerprint of a single image, or of one video frame.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    file: PathBuf,

    /// Treat FILE as a video and hash this frame (first, last, timestamp=N)
    #[arg(long)]
    frame: Option<FrameStrategy>,
}

fn main() {
    let args = Cli::parse();

    let img = match args.frame {
        Some(strategy) => {
            let sampler = FfmpegSampler::new();
            if let Ok(info) = sampler.probe(&args.file) {
                println!("Video: {} {}", info.resolution_string(), info.duration_string().unwrap_or_default());
            }
            sampler.sample(&args.file, strategy).map_err(|e| e.to_string())
        }
        None => image::open(&args.file).map_err(|e| e.to_string()),
    };
    let img = match img {
        Ok(i) => i,
        Err(e) => {
            eprintln!("Error opening file {:?}: {}", args.file, e);
            process::exit(1);
        }
    };

    let hash = DctPhash::new().hash_image(&img);
    println!("File: {}", args.file.display());
    if let Some(strategy) = args.frame {
        println!("Frame: {}", strategy);
    }
    println!("pHash (Hex): {}", hash);
    println!("pHash (Bin): {:064b}", hash.0);
}
