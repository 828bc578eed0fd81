// =============================================================================
// DATAGO — Load Test Tool
// =============================================================================
// Drives the gateway's coordinate-transform endpoint at a configurable rate
// from a pool of synthetic client identities, hard enough to watch the
// anonymous-tier bucket trip into 429s.
// =============================================================================

use clap::Parser;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "datago-loadtest")]
#[command(about = "Load test tool for the DATAGO gateway")]
struct Args {
    /// Gateway base URL
    #[arg(long, default_value = "http://localhost:8080")]
    url: String,

    /// Requests per second
    #[arg(long, default_value_t = 50)]
    rate: u32,

    /// Duration in seconds
    #[arg(long, default_value_t = 30)]
    duration: u64,

    /// Number of distinct client identities (spread via X-Forwarded-For)
    #[arg(long, default_value_t = 10)]
    clients: usize,

    /// Center longitude for generated points
    #[arg(long, default_value_t = 126.9780)]
    lon: f64,

    /// Center latitude for generated points
    #[arg(long, default_value_t = 37.5665)]
    lat: f64,
}

struct Counters {
    sent: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    rate_limited: AtomicU64,
    server_error: AtomicU64,
    network_error: AtomicU64,
    latency_sum_us: AtomicU64,
}

impl Counters {
    fn new() -> Self {
        Self {
            sent: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            server_error: AtomicU64::new(0),
            network_error: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
        }
    }
}

fn main() {
    let args = Args::parse();

    println!("=== DATAGO Load Test ===");
    println!("Target:   {}/api/coordinate/transform", args.url);
    println!("Rate:     {} req/s", args.rate);
    println!("Duration: {}s", args.duration);
    println!("Clients:  {}", args.clients);
    println!("Center:   lon={} lat={}", args.lon, args.lat);
    println!();

    // Synthetic client identities; the gateway buckets by forwarded source.
    let identities: Vec<String> =
        (0..args.clients).map(|i| format!("198.51.100.{}", i + 1)).collect();

    // Check server health
    let health_url = format!("{}/api/health", args.url);
    match reqwest::blocking::get(&health_url) {
        Ok(r) if r.status().is_success() => println!("Server health: OK"),
        Ok(r) => {
            eprintln!("Server health check failed: {}", r.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Cannot reach server: {}", e);
            std::process::exit(1);
        }
    }

    let counters = Arc::new(Counters::new());

    let interval = Duration::from_micros(1_000_000 / args.rate as u64);
    let deadline = Instant::now() + Duration::from_secs(args.duration);

    println!("\nSending...\n");
    let start = Instant::now();

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap();

    let mut rng = rand::thread_rng();
    let mut tick = 0u64;

    while Instant::now() < deadline {
        let identity = &identities[(tick as usize) % identities.len()];
        let x = args.lon + rng.gen_range(-0.05..0.05);
        let y = args.lat + rng.gen_range(-0.05..0.05);
        let url = format!(
            "{}/api/coordinate/transform?from=WGS84&to=GRS80_CENTRAL&x={:.6}&y={:.6}",
            args.url, x, y
        );

        let req_start = Instant::now();
        counters.sent.fetch_add(1, Ordering::Relaxed);

        match client.get(&url).header("X-Forwarded-For", identity.as_str()).send() {
            Ok(resp) => {
                let lat_us = req_start.elapsed().as_micros() as u64;
                counters.latency_sum_us.fetch_add(lat_us, Ordering::Relaxed);

                match resp.status().as_u16() {
                    200 => {
                        counters.accepted.fetch_add(1, Ordering::Relaxed);
                    }
                    429 => {
                        counters.rate_limited.fetch_add(1, Ordering::Relaxed);
                    }
                    400 => {
                        counters.rejected.fetch_add(1, Ordering::Relaxed);
                    }
                    other if other >= 500 => {
                        counters.server_error.fetch_add(1, Ordering::Relaxed);
                    }
                    other => {
                        counters.rejected.fetch_add(1, Ordering::Relaxed);
                        if tick < 5 {
                            eprintln!("Unexpected status: {}", other);
                        }
                    }
                }
            }
            Err(_) => {
                counters.network_error.fetch_add(1, Ordering::Relaxed);
            }
        }

        tick += 1;

        // Print progress every 500 requests
        if tick % 500 == 0 {
            let elapsed = start.elapsed().as_secs_f64();
            let sent = counters.sent.load(Ordering::Relaxed);
            println!(
                "  [{:.1}s] sent={} accepted={} rate_limited={} rejected={} 5xx={} err={} ({:.0} req/s)",
                elapsed,
                sent,
                counters.accepted.load(Ordering::Relaxed),
                counters.rate_limited.load(Ordering::Relaxed),
                counters.rejected.load(Ordering::Relaxed),
                counters.server_error.load(Ordering::Relaxed),
                counters.network_error.load(Ordering::Relaxed),
                sent as f64 / elapsed,
            );
        }

        // Rate limiting
        let target = Duration::from_micros(tick * interval.as_micros() as u64);
        let actual = start.elapsed();
        if actual < target {
            std::thread::sleep(target - actual);
        }
    }

    let elapsed = start.elapsed();
    let sent = counters.sent.load(Ordering::Relaxed);
    let accepted = counters.accepted.load(Ordering::Relaxed);
    let avg_lat = if sent > 0 {
        counters.latency_sum_us.load(Ordering::Relaxed) / sent
    } else {
        0
    };

    println!("\n=== Results ===");
    println!("Duration:     {:.2}s", elapsed.as_secs_f64());
    println!("Total sent:   {}", sent);
    println!("Accepted:     {} ({:.1}%)", accepted, accepted as f64 / sent.max(1) as f64 * 100.0);
    println!("Rate limited: {}", counters.rate_limited.load(Ordering::Relaxed));
    println!("Rejected:     {}", counters.rejected.load(Ordering::Relaxed));
    println!("5xx:          {}", counters.server_error.load(Ordering::Relaxed));
    println!("Net errors:   {}", counters.network_error.load(Ordering::Relaxed));
    println!("Avg latency:  {} us", avg_lat);
    println!("Throughput:   {:.1} req/s", sent as f64 / elapsed.as_secs_f64());
}
