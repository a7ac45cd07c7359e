// tools/forktree/src/main.rs
//! forktree : crée un arbre binaire de processus par `fork()` COW et affiche
//! sa structure, puis l'usage de la mémoire physique simulée.

mod tree;

use anyhow::Result;
use clap::Parser;

use tree::{TreeConfig, MAX_DEPTH};

/// Arbre de processus forkés sur le substrat exokernel simulé
#[derive(Parser, Debug)]
#[command(name = "forktree", version, about)]
struct Args {
    /// Longueur maximale des noms, donc profondeur de l'arbre
    #[arg(short, long, default_value_t = 3)]
    depth: usize,

    /// Pages de données chargées dans la racine et partagées par l'arbre
    #[arg(short, long, default_value_t = 4)]
    pages: usize,

    /// Pages physiques disponibles
    #[arg(short, long, default_value_t = 1024)]
    frames: usize,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    exofork::init();
    log::debug!("forktree: {:?} (max depth {})", args, MAX_DEPTH);

    let report = tree::run(&TreeConfig {
        depth: args.depth,
        pages: args.pages,
        frames: args.frames,
    })?;

    println!(
        "{} environments, {} copy-on-write faults, peak {} frames, data page shared by up to {}",
        report.nodes.len(),
        report.total_faults(),
        report.peak_frames,
        report.max_sharers()
    );
    if report.leaked_frames != 0 {
        anyhow::bail!("{} frames still allocated after exit", report.leaked_frames);
    }
    Ok(())
}
