use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use infiniray::{BackingKind, Error, RingArray};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let ProbeCommand {
        capacity,
        backing,
        tmpdir,
        rounds,
    } = ProbeCommand::parse();

    if let Some(dir) = &tmpdir {
        infiniray::set_tmpdir(dir);
    }

    if let Some(backing) = backing {
        infiniray::set_backing(backing.into());
    }

    let provider = mirror_fd::probe().name();

    match probe(capacity, rounds) {
        Ok(report) => {
            println!(
                "ok: provider={provider} capacity={} bytes={} appended={}",
                report.capacity, report.bytes, report.appended,
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("failed: provider={provider}: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Construct a ring, check its mirror and run a sliding window over it.
#[derive(Parser)]
struct ProbeCommand {
    /// Requested number of `u64` elements, the ring may round it up.
    #[arg(long, default_value_t = 4096)]
    capacity: usize,

    /// Which shared storage to map. Defaults to `INFINIRAY_BACKING`, or automatic choice.
    #[arg(value_enum, long)]
    backing: Option<Backing>,

    /// Directory for temporary-file storage.
    #[arg(long)]
    tmpdir: Option<PathBuf>,

    /// How many times the sliding window goes around the ring.
    #[arg(long, default_value_t = 4)]
    rounds: usize,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum Backing {
    /// Memory files where permitted, temporary files otherwise.
    Auto,
    /// Anonymous memory files only.
    Memfd,
    /// Unlinked files in the temporary directory only.
    Tmpfile,
}

impl From<Backing> for BackingKind {
    fn from(backing: Backing) -> Self {
        match backing {
            Backing::Auto => BackingKind::Auto,
            Backing::Memfd => BackingKind::Memfd,
            Backing::Tmpfile => BackingKind::TempFile,
        }
    }
}

struct Report {
    capacity: usize,
    bytes: usize,
    appended: u64,
}

#[derive(Debug, thiserror::Error)]
enum ProbeError {
    #[error(transparent)]
    Ring(#[from] Error),
    #[error("mirror differs at element {0}")]
    Mirror(usize),
    #[error("window holds {found} at {index}, expected {expected}")]
    Window { index: usize, found: u64, expected: u64 },
}

fn probe(capacity: usize, rounds: usize) -> Result<Report, ProbeError> {
    let mut ring = RingArray::<u64>::new(capacity)?;
    let capacity = ring.capacity();
    let bytes = ring.byte_size();

    let mut counter = 0u64;
    ring.resize_with(capacity, || {
        counter += 1;
        counter
    })?;

    let raw = ring.raw_block().cast::<u64>();
    for idx in 0..capacity {
        // Safety: both indices are within the mirrored span of `2 * capacity` elements.
        let (low, high) = unsafe {
            (raw.add(idx).read_volatile(), raw.add(idx + capacity).read_volatile())
        };
        if low != high {
            return Err(ProbeError::Mirror(idx));
        }
    }

    ring.clear();
    let mut counter = 0u64;
    let step = (capacity / 16).max(1);
    let total = (capacity * rounds) as u64;

    while counter < total {
        if ring.len() + step > capacity {
            ring.erase(step);
        }

        ring.append((0..step as u64).map(|n| counter + n))?;
        counter += step as u64;
    }

    let first = counter - ring.len() as u64;
    for (index, (&found, expected)) in ring.iter().zip(first..).enumerate() {
        if found != expected {
            return Err(ProbeError::Window { index, found, expected });
        }
    }

    tracing::info!(capacity, bytes, appended = counter, "probe finished");

    Ok(Report {
        capacity,
        bytes,
        appended: counter,
    })
}
