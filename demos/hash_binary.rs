/// Demonstrates how to compute the Authenticode and first-page hashes of a PE binary.
use std::path::PathBuf;

use clap::Parser;
use goblin_hashing::{
    compute_full_image_hash, compute_page_hash, HashAlgorithm, HashEngine, ImageView,
    DEFAULT_PAGE_SIZE,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// PE binary to hash
    file: PathBuf,
    /// Digest algorithms, can be repeated
    #[arg(short, long, default_values_t = vec![HashAlgorithm::Sha1, HashAlgorithm::Sha256])]
    algorithm: Vec<HashAlgorithm>,
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: usize,
    /// Only read the leading part of the file, enough for the page hash
    #[arg(long)]
    partial: bool,
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn to_hex(digest: &[u8]) -> String {
    digest.iter().map(|byte| format!("{:02x}", byte)).collect()
}

fn main() {
    let args = Args::parse();
    stderrlog::new()
        .module(module_path!())
        .module("goblin_hashing")
        .verbosity(args.verbose as usize + 1)
        .init()
        .unwrap();

    let view = match ImageView::open(&args.file, args.partial) {
        Ok(view) => view,
        Err(err) => {
            eprintln!("{}: {}", args.file.display(), err);
            std::process::exit(1);
        }
    };

    // Each algorithm gets its own engines, hashed in parallel over the shared view.
    std::thread::scope(|scope| {
        for &algorithm in &args.algorithm {
            let view = &view;
            let args = &args;
            scope.spawn(move || {
                if !args.partial {
                    let mut engine = HashEngine::open(algorithm).expect("Failed to open an engine");
                    match compute_full_image_hash(view, &mut engine) {
                        Ok(()) => println!(
                            "{} authenticode: {}",
                            algorithm,
                            to_hex(engine.digest().unwrap_or_default())
                        ),
                        Err(err) => eprintln!("{} authenticode: {}", algorithm, err),
                    }
                    engine.close();
                }

                let mut engine = HashEngine::open(algorithm).expect("Failed to open an engine");
                match compute_page_hash(view, args.page_size, &mut engine) {
                    Ok(()) => println!(
                        "{} page hash: {}",
                        algorithm,
                        to_hex(engine.digest().unwrap_or_default())
                    ),
                    Err(err) => eprintln!("{} page hash: {}", algorithm, err),
                }
                engine.close();
            });
        }
    });
}
