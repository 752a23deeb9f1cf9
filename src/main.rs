mod cache;
mod classify;
mod config;
mod replace;
mod schedule;
mod snapshot;
mod trace;

use std::{
    fs,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{bail, Context};

use crate::{
    cache::IsCache,
    config::{Config, Schedule},
    schedule::{Quota, Scheduler},
    snapshot::{output_paths, LineSink, NullSink, Sink},
    trace::{read_counts, Trace},
};

fn main() -> anyhow::Result<()> {
    let mut args = pico_args::Arguments::from_env();
    if args.contains("-v") {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    } else {
        env_logger::init();
    }

    let config_str: String = if let Some(config_str) = args.opt_value_from_str("--config")? {
        config_str
    } else {
        let config_path: PathBuf = args
            .opt_value_from_str("-p")?
            .context("must provide a config with --config <json> or -p <path>")?;
        fs::read_to_string(&config_path)
            .with_context(|| format!("cannot read config {}", config_path.display()))?
    };
    let config = Config::from_json(&config_str)?;
    log::debug!("{config:?}");

    let trace_a: PathBuf = args.value_from_str("-a")?;
    let trace_b: Option<PathBuf> = args.opt_value_from_str("-b")?;
    let intervals_a: Option<PathBuf> = args.opt_value_from_str("--intervals-a")?;
    let intervals_b: Option<PathBuf> = args.opt_value_from_str("--intervals-b")?;
    let snapshot_prefix: Option<PathBuf> = args.opt_value_from_str("-o")?;
    let table_prefix: Option<PathBuf> = args.opt_value_from_str("--table")?;
    let stats_path: Option<PathBuf> = args.opt_value_from_str("--json")?;
    let addr_per_block: usize = args
        .opt_value_from_str("--buffer-size")?
        .unwrap_or(1024 * 16);
    let blocks_per_queue: usize = args.opt_value_from_str("--queue-size")?.unwrap_or(32);

    let rest = args.finish();
    if !rest.is_empty() {
        log::warn!("ignoring unused arguments: {rest:?}");
    }

    let mut cache = config.to_cache();
    log::info!(
        "{}: {} slice(s) x {} sets x {} ways, observing {:?}",
        cache.make_stats().name,
        config.n_slices(),
        config.n_sets(),
        config.ways,
        config.scope()
    );

    let mut lines = snapshot_prefix
        .as_deref()
        .map(|prefix| LineSink::create(config.snapshot, prefix))
        .transpose()
        .context("cannot create snapshot outputs")?;
    let mut null = NullSink;
    let sink: &mut dyn Sink = match lines.as_mut() {
        Some(lines) => lines,
        None => &mut null,
    };

    let open = |path: PathBuf| Trace::read(path, addr_per_block, blocks_per_queue);
    let mut scheduler = Scheduler::new(cache.as_mut(), sink, config.step);
    match config.schedule {
        Schedule::Single => {
            if trace_b.is_some() {
                log::warn!("single mode reads only -a; ignoring -b");
            }
            scheduler.run_single(open(trace_a)?)?;
        }
        Schedule::FixedRatio { ratio } => {
            let trace_b = trace_b.context("fixed_ratio mode needs a second trace with -b")?;
            scheduler.run_fixed_ratio(open(trace_a)?, open(trace_b)?, ratio.get())?;
        }
        Schedule::Proportional { seed } => {
            let trace_b = trace_b.context("proportional mode needs a second trace with -b")?;
            let (Some(intervals_a), Some(intervals_b)) = (intervals_a, intervals_b) else {
                bail!("proportional mode needs --intervals-a and --intervals-b");
            };
            let counts_a = read_counts(&intervals_a)?;
            let counts_b = read_counts(&intervals_b)?;
            if counts_a.len() != counts_b.len() {
                log::warn!(
                    "interval files differ in length ({} vs {}); using the shorter",
                    counts_a.len(),
                    counts_b.len()
                );
            }
            let quotas: Vec<Quota> = counts_a
                .iter()
                .zip(&counts_b)
                .map(|(&a, &b)| Quota {
                    a: config.quota(a),
                    b: config.quota(b),
                })
                .collect();
            let mut rng = fastrand::Rng::with_seed(seed);
            scheduler.run_proportional(open(trace_a)?, open(trace_b)?, &quotas, &mut rng)?;
        }
    }
    log::info!(
        "processed {} observed events, scheduler {:?}",
        scheduler.events(),
        scheduler.state()
    );

    if let Some(lines) = lines {
        lines.finish().context("cannot flush snapshot outputs")?;
        if let Some(prefix) = &snapshot_prefix {
            log::info!("snapshots written to {}*", prefix.display());
        }
    }

    if let Some(prefix) = table_prefix {
        write_table(cache.as_ref(), &prefix)?;
        log::info!("per-set table written to {}_{{access,miss}}", prefix.display());
    }

    let stats = cache.make_stats();
    log::info!(
        "{} accesses, {} misses (miss rate {:.4}), final occupancy A={} B={}",
        stats.accesses,
        stats.misses,
        stats.miss_rate,
        stats.occupancy_a,
        stats.occupancy_b
    );
    if let Some(stats_path) = stats_path {
        let stats_file = fs::File::create(&stats_path)
            .with_context(|| format!("cannot open {}", stats_path.display()))?;
        serde_json::to_writer_pretty(stats_file, &stats)?;
        log::info!("summary written to {}", stats_path.display());
    }
    Ok(())
}

fn create(path: &Path) -> anyhow::Result<BufWriter<fs::File>> {
    let file = fs::File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

/// Per-set access and miss counts to `<prefix>_access` and `<prefix>_miss`.
fn write_table(cache: &dyn IsCache, prefix: &Path) -> anyhow::Result<()> {
    let paths = output_paths(prefix, &["_access", "_miss"]);
    let mut accesses = create(&paths[0])?;
    let mut misses = create(&paths[1])?;
    cache
        .write_table(&mut accesses, &mut misses)
        .and_then(|()| accesses.flush())
        .and_then(|()| misses.flush())
        .context("cannot write per-set table")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observed_cache() -> Box<dyn IsCache> {
        Config::from_json(r#"{"observe": {"slice": 0, "set": 0}, "schedule": {"mode": "single"}}"#)
            .unwrap()
            .to_cache()
    }

    #[test]
    fn table_lands_next_to_the_prefix() {
        let mut cache = observed_cache();
        cache.access(0).unwrap();
        cache.access(0).unwrap();

        let prefix = std::env::temp_dir().join(format!("cat_sim_{}_table", std::process::id()));
        write_table(cache.as_ref(), &prefix).unwrap();
        let paths = output_paths(&prefix, &["_access", "_miss"]);
        assert_eq!(fs::read_to_string(&paths[0]).unwrap(), "2\n");
        assert_eq!(fs::read_to_string(&paths[1]).unwrap(), "1\n");
        for path in paths {
            fs::remove_file(path).unwrap();
        }
    }

    #[test]
    fn table_errors_name_the_file() {
        let prefix = std::env::temp_dir()
            .join("cat_sim_no_such_dir")
            .join("run");
        let err = write_table(observed_cache().as_ref(), &prefix).unwrap_err();
        let expected = format!("cannot create {}_access", prefix.display());
        assert_eq!(err.to_string(), expected);
    }
}
