use std::io::Read;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "diligence-guard",
    about = "Scan extracted M&A contract text for due-diligence red flags",
    version
)]
struct Cli {
    /// Text files to analyze (reads stdin if none provided)
    files: Vec<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.files.is_empty() {
        let mut input = String::new();
        std::io::stdin()
            .read_to_string(&mut input)
            .expect("Failed to read stdin");
        let findings = diligence_guard::analyze_with_rules(&input);
        println!("{}", serde_json::to_string_pretty(&findings).unwrap());
    } else {
        for path in &cli.files {
            let text = std::fs::read_to_string(path).unwrap_or_else(|e| {
                eprintln!("Error reading {path}: {e}");
                std::process::exit(1);
            });
            let findings = diligence_guard::analyze_with_rules(&text);
            println!("{}", serde_json::to_string_pretty(&findings).unwrap());
        }
    }
}
