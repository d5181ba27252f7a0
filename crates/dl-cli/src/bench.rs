use std::cmp::Ordering;
use std::time::Instant;

use dl_core::{matcher::match_url, AllowList};

pub struct BenchOptions {
    pub allow_list: AllowList,
    pub iterations: usize,
    pub seed: u32,
}

pub const DEFAULT_SEED: u32 = 0xc0ffee;

const URL_COUNT: usize = 1000;
const MAX_SAMPLES: usize = 100_000_000;

struct BenchResult {
    iterations: usize,
    total_ms: f64,
    avg_us: f64,
    p50_us: f64,
    p95_us: f64,
    p99_us: f64,
    ops_per_sec: u64,
    blocked_pct: f64,
}

pub fn run_bench(opts: BenchOptions) -> Result<(), String> {
    if opts.iterations == 0 {
        return Err("Iterations must be greater than zero".to_string());
    }
    let urls = generate_urls(&opts.allow_list, URL_COUNT, opts.seed);
    let samples = sample_count(urls.len(), opts.iterations)?;

    println!("============================================================");
    println!("DomainLock Benchmark");
    println!("============================================================");
    println!("Allow-list: [{}]", opts.allow_list);

    println!("Warmup...");
    for url in &urls {
        let _ = match_url(url, &opts.allow_list);
    }

    println!("------------------------------------------------------------");
    println!("Benchmark: Random URLs ({} urls, {} iterations)", urls.len(), opts.iterations);
    println!("------------------------------------------------------------");
    let result = run_iterations(&opts.allow_list, &urls, opts.iterations, samples);
    println!("{}", format_result(&result));

    Ok(())
}

/// Latency samples a run will record; one per URL per iteration.
fn sample_count(urls: usize, iterations: usize) -> Result<usize, String> {
    urls.checked_mul(iterations)
        .filter(|&n| n <= MAX_SAMPLES)
        .ok_or_else(|| format!("Too many iterations: at most {} allowed", MAX_SAMPLES / urls.max(1)))
}

fn run_iterations(
    allow_list: &AllowList,
    urls: &[String],
    iterations: usize,
    samples: usize,
) -> BenchResult {
    let mut latencies = Vec::with_capacity(samples);
    let mut blocked = 0usize;

    for _ in 0..iterations {
        for url in urls {
            let start = Instant::now();
            let result = match_url(url, allow_list);
            latencies.push(start.elapsed().as_secs_f64() * 1_000_000.0);
            if result.is_blocked() {
                blocked += 1;
            }
        }
    }

    latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let total_ops = latencies.len();
    let total_ms = latencies.iter().sum::<f64>() / 1000.0;
    let avg_us = if latencies.is_empty() { 0.0 } else { latencies.iter().sum::<f64>() / total_ops as f64 };

    BenchResult {
        iterations: total_ops,
        total_ms,
        avg_us,
        p50_us: percentile(&latencies, 0.50),
        p95_us: percentile(&latencies, 0.95),
        p99_us: percentile(&latencies, 0.99),
        ops_per_sec: if total_ms > 0.0 { (total_ops as f64 / (total_ms / 1000.0)) as u64 } else { 0 },
        blocked_pct: if total_ops == 0 { 0.0 } else { blocked as f64 * 100.0 / total_ops as f64 },
    }
}

fn format_result(result: &BenchResult) -> String {
    format!(
        "  Iterations:  {}\n  Total time:  {:.2}ms\n  Avg latency: {:.3}μs\n  P50 latency: {:.3}μs\n  P95 latency: {:.3}μs\n  P99 latency: {:.3}μs\n  Throughput:  {} ops/sec\n  Blocked:     {:.1}%",
        result.iterations,
        result.total_ms,
        result.avg_us,
        result.p50_us,
        result.p95_us,
        result.p99_us,
        result.ops_per_sec,
        result.blocked_pct,
    )
}

fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let idx = ((values.len() as f64) * p).ceil() as usize;
    let idx = idx.saturating_sub(1).min(values.len() - 1);
    values[idx]
}

fn create_rng(seed: u32) -> impl FnMut() -> f64 {
    let mut state = seed;
    move || {
        state = state.wrapping_mul(1664525).wrapping_add(1013904223);
        (state as f64) / (u32::MAX as f64)
    }
}

fn pick<T: Clone>(items: &[T], rand: &mut impl FnMut() -> f64) -> T {
    let idx = (rand() * items.len() as f64).floor() as usize;
    items[idx.min(items.len() - 1)].clone()
}

/// Mix of allowed subdomains, lookalike hosts and unrelated sites.
fn generate_urls(allow_list: &AllowList, count: usize, seed: u32) -> Vec<String> {
    const OTHER_DOMAINS: &[&str] = &[
        "example.com",
        "github.com",
        "stackoverflow.com",
        "reddit.com",
        "wikipedia.org",
        "doubleclick.net",
    ];
    const SUBDOMAINS: &[&str] = &["www", "app", "api", "cdn", "static.assets"];
    const PATHS: &[&str] = &["/", "/index.html", "/api/v1/data", "/search?q=rust", "/login#top"];

    let mut rng = create_rng(seed);
    let mut urls = Vec::with_capacity(count);

    for _ in 0..count {
        let roll = rng();
        let host = match allow_list.is_empty() {
            false if roll < 0.4 => {
                let domain = pick(allow_list.as_slice(), &mut rng);
                format!("{}.{}", pick(SUBDOMAINS, &mut rng), domain)
            }
            false if roll < 0.5 => format!("evil{}", pick(allow_list.as_slice(), &mut rng)),
            _ => pick(OTHER_DOMAINS, &mut rng).to_string(),
        };
        urls.push(format!("https://{}{}", host, pick(PATHS, &mut rng)));
    }

    urls
}
