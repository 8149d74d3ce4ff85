// SPDX-License-Identifier: Apache-2.0

//! Demo driver: runs the load generator against a built-in mock SUT.
//!
//! Useful for exercising scenarios end to end without an inference stack:
//! the mock SUT completes every sample after a configurable constant
//! latency, and the mock library tracks load/unload calls without owning
//! any data.

#![allow(clippy::print_stdout)]

use bytes::Bytes;
use clap::Parser;
use loadgen::{
    CompletionHandle, LogSettings, QuerySample, QuerySampleLibrary, QuerySampleResponse,
    RequestedSettings, SystemUnderTest, start_test,
};
use miette::IntoDiagnostic;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Drive the load generator against a constant-latency mock SUT.
#[derive(Debug, Parser)]
#[command(name = "loadgen_demo", version, about)]
struct Args {
    /// Path to a JSON file deserializing into the requested settings.
    #[arg(long)]
    config: PathBuf,

    /// Directory receiving the summary, detail, and accuracy logs.
    #[arg(long, default_value = "loadgen_out")]
    output_dir: PathBuf,

    /// Prefix for artifact file names.
    #[arg(long, default_value = "loadgen_")]
    prefix: String,

    /// Mock SUT latency per query, in microseconds.
    #[arg(long, default_value_t = 500)]
    sut_latency_us: u64,

    /// Total samples the mock library advertises.
    #[arg(long, default_value_t = 1024)]
    total_sample_count: u64,

    /// Working-set size the mock library advertises.
    #[arg(long, default_value_t = 1024)]
    performance_sample_count: u64,

    /// Log a detail event for every issued and completed query.
    #[arg(long)]
    trace_queries: bool,
}

struct ConstantLatencySut {
    latency: Duration,
}

impl SystemUnderTest for ConstantLatencySut {
    fn name(&self) -> &str {
        "constant-latency-mock"
    }

    fn issue_query(&self, samples: Vec<QuerySample>, completer: CompletionHandle) {
        let due = Instant::now() + self.latency;
        while Instant::now() < due {
            std::hint::spin_loop();
        }
        let responses: Vec<QuerySampleResponse> = samples
            .iter()
            .map(|s| QuerySampleResponse {
                id: s.id,
                data: Bytes::from(s.index.to_le_bytes().to_vec()),
            })
            .collect();
        completer.query_samples_complete(&responses);
    }

    fn flush_queries(&self) {}

    fn report_latency_results(&self, _latencies_ns: &[i64]) {}
}

struct CountingLibrary {
    total: u64,
    performance: u64,
}

impl QuerySampleLibrary for CountingLibrary {
    fn name(&self) -> &str {
        "counting-mock-library"
    }

    fn total_sample_count(&self) -> u64 {
        self.total
    }

    fn performance_sample_count(&self) -> u64 {
        self.performance
    }

    fn load_samples_to_ram(&self, _indices: &[u64]) {}

    fn unload_samples_from_ram(&self, _indices: &[u64]) {}
}

fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = std::fs::read_to_string(&args.config).into_diagnostic()?;
    let requested: RequestedSettings = serde_json::from_str(&config).into_diagnostic()?;

    let sut = Arc::new(ConstantLatencySut {
        latency: Duration::from_micros(args.sut_latency_us),
    });
    let qsl = Arc::new(CountingLibrary {
        total: args.total_sample_count,
        performance: args.performance_sample_count,
    });
    let log_settings = LogSettings {
        output_dir: args.output_dir,
        prefix: args.prefix,
        log_detail_queries: args.trace_queries,
        copy_summary_to_stdout: true,
    };

    let results = start_test(sut, qsl, &requested, &log_settings)?;
    println!(
        "result: {} (summary: {})",
        if results.summary.valid { "VALID" } else { "INVALID" },
        results.summary_path.display()
    );
    Ok(())
}
