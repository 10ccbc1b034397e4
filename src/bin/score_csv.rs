//! Offline scorer: reads a branch CSV export and writes it back with the
//! cluster probabilities and label appended.
//!
//! Usage: `score_csv <input.csv> [output.csv]` (stdout when no output path).
//! Nothing is written unless every row scores.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Seek, SeekFrom};
use std::path::Path;

use anyhow::{bail, Context, Result};
use branch_risk_clustering::{ClusterEngine, EngineConfig};
use tracing::info;

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let Some(input) = args.next() else {
        bail!("usage: score_csv <input.csv> [output.csv]");
    };
    let output = args.next();

    let cfg = EngineConfig::from_env()?;
    let engine = ClusterEngine::from_config(&cfg)?;

    let rows = match &output {
        Some(path) => engine.score_csv_file(Path::new(&input), Path::new(path))?,
        None => {
            // spool first so a rejected batch prints nothing
            let reader =
                BufReader::new(File::open(&input).with_context(|| format!("opening {input}"))?);
            let mut spool = tempfile::tempfile().context("creating spool file")?;
            let rows = engine.score_csv_stream(reader, BufWriter::new(&mut spool))?;
            spool.seek(SeekFrom::Start(0))?;
            io::copy(&mut spool, &mut io::stdout().lock())?;
            rows
        }
    };

    info!(rows, input = %input, output = output.as_deref().unwrap_or("-"), "scoring done");
    Ok(())
}
