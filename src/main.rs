//! Filament CLI
//!
//! Small drivers for poking at the runtime: print the effective
//! configuration, push a batch of tasks through the default scheduler, or
//! run a producer against several consumers over an async input.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use filament::async_input::SingleProducerAsyncInput;
use filament::config::RuntimeConfig;
use filament::observability::init_tracing;
use filament::runtime::{self, Runtime};
use filament::scheduler::{Scheduler, Task};
use filament::{Exit, VERSION};

#[derive(Parser)]
#[command(name = "filament")]
#[command(author, version, about = "A user-space fiber runtime core", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Runtime configuration file (JSON)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbose output (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration as JSON
    Config,

    /// Schedule tasks across priorities and report the drain
    Drain {
        /// Number of tasks to schedule
        #[arg(long, default_value_t = 10_000)]
        tasks: u64,

        /// Number of distinct priorities
        #[arg(
            long,
            default_value_t = 4,
            value_parser = clap::value_parser!(u32).range(1..=i64::from(i32::MAX))
        )]
        priorities: u32,
    },

    /// Stream elements from one producer to several consumers
    Pipe {
        /// Elements to emit
        #[arg(long, default_value_t = 1_000)]
        elements: u64,

        /// Consumer fibers
        #[arg(long, default_value_t = 4)]
        consumers: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Config => {
            println!("{}", config.to_json()?);
        }
        Commands::Drain { tasks, priorities } => run_drain(config, tasks, priorities)?,
        Commands::Pipe {
            elements,
            consumers,
        } => run_pipe(config, elements, consumers)?,
    }
    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<RuntimeConfig> {
    let config = match path {
        Some(path) => RuntimeConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    Ok(config.with_env_overrides()?)
}

fn run_drain(config: RuntimeConfig, tasks: u64, priorities: u32) -> Result<()> {
    if priorities == 0 {
        bail!("--priorities must be at least 1");
    }
    let rt = Runtime::with_config(config)?;
    let scheduler = rt.scheduler();
    let ran = Arc::new(AtomicU64::new(0));

    let start = Instant::now();
    for i in 0..tasks {
        let ran = Arc::clone(&ran);
        let priority = i32::try_from(i % u64::from(priorities))
            .context("priority out of range")?;
        scheduler.schedule_task(
            Task::new(move || {
                ran.fetch_add(1, Ordering::Relaxed);
            }),
            priority,
        );
    }
    let result = rt.run_until_idle();
    let elapsed = start.elapsed();

    println!("filament {VERSION}: drained {} tasks in {:?}", ran.load(Ordering::Relaxed), elapsed);
    println!("{}", serde_json::to_string_pretty(&result)?);
    println!("{}", serde_json::to_string_pretty(&rt.mixed_scheduler().stats())?);
    Ok(())
}

fn run_pipe(config: RuntimeConfig, elements: u64, consumers: usize) -> Result<()> {
    if consumers == 0 {
        bail!("--consumers must be at least 1");
    }
    let rt = Runtime::with_config(config)?;
    let input = SingleProducerAsyncInput::<String, u64, u64>::new();
    let (producer, consumer) = input.split();

    let start = Instant::now();
    let counts = rt.block_on(async move {
        let mut readers = Vec::with_capacity(consumers);
        for _ in 0..consumers {
            let consumer = consumer.clone();
            readers.push(runtime::fork(async move {
                let mut received = 0u64;
                while let Exit::Success(_) = consumer.take().await {
                    received += 1;
                    runtime::yield_now().await;
                }
                received
            })?);
        }
        for n in 0..elements {
            producer.emit(n).await?;
        }
        producer.done(elements)?;

        let mut counts = Vec::with_capacity(readers.len());
        for reader in readers {
            counts.push(reader.join().await?);
        }
        Ok::<_, filament::Error>(counts)
    })??;
    let elapsed = start.elapsed();

    let total: u64 = counts.iter().sum();
    println!("filament {VERSION}: {total} of {elements} elements delivered in {elapsed:?}");
    for (i, count) in counts.iter().enumerate() {
        println!("  consumer {i}: {count}");
    }
    println!("{}", serde_json::to_string_pretty(&rt.stats())?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_priorities_must_fit_a_priority() {
        assert!(Cli::try_parse_from(["filament", "drain", "--priorities", "0"]).is_err());
        assert!(Cli::try_parse_from(["filament", "drain", "--priorities", "3000000000"]).is_err());

        let cli = Cli::try_parse_from(["filament", "drain", "--priorities", "2147483647"]);
        match cli.map(|cli| cli.command) {
            Ok(Commands::Drain { priorities, .. }) => assert_eq!(priorities, 2_147_483_647),
            _ => panic!("expected a drain command"),
        }
    }

    #[test]
    fn test_drain_runs_every_task() {
        assert!(run_drain(RuntimeConfig::default(), 100, 7).is_ok());
    }
}
