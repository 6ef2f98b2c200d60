use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

const HOUR: i64 = 3_600_000; // 1 hour in ms

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname("bookd")
        .user("bookd")
        .password("bookd");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

async fn create_resource(client: &tokio_postgres::Client, category: &str) -> Ulid {
    let rid = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO resources (id, name, category) VALUES ('{rid}', 'bench {rid}', '{category}')"
        ))
        .await
        .unwrap();
    rid
}

fn booking_sql(rid: Ulid, start: i64, end: i64) -> String {
    let bid = Ulid::new();
    let uid = Ulid::new();
    format!(
        r#"INSERT INTO reservations (id, resource_id, user_id, start, "end") VALUES ('{bid}', '{rid}', '{uid}', {start}, {end})"#
    )
}

/// Back-to-back bookings on one resource. Slots are two hours apart so that
/// touching boundaries never conflict.
async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port).await;
    let rid = create_resource(&client, "ROOM").await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let s = (i as i64) * 2 * HOUR;
        let t = Instant::now();
        client.batch_execute(&booking_sql(rid, s, s + HOUR)).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

/// Many clients race for the same slots on one resource. Every slot must be
/// won exactly once; the losers get SQLSTATE 23P01.
async fn phase2_contention(host: &str, port: u16) {
    let n_tasks = 10;
    let n_slots = 200;

    let setup = connect(host, port).await;
    let rid = create_resource(&setup, "ROOM").await;
    // A few substitutes so the conflict path computes real alternatives.
    for _ in 0..5 {
        create_resource(&setup, "ROOM").await;
    }
    drop(setup);

    let confirmed = Arc::new(AtomicUsize::new(0));
    let conflicted = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let host = host.to_string();
        let confirmed = confirmed.clone();
        let conflicted = conflicted.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut latencies = Vec::with_capacity(n_slots);
            for j in 0..n_slots {
                let s = (j as i64) * 2 * HOUR;
                let t = Instant::now();
                match client.batch_execute(&booking_sql(rid, s, s + HOUR)).await {
                    Ok(()) => {
                        confirmed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) if e.code().map(|c| c.code()) == Some("23P01") => {
                        conflicted.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => panic!("unexpected error: {e}"),
                }
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in handles {
        all_latencies.extend(h.await.unwrap());
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_slots;
    let won = confirmed.load(Ordering::Relaxed);
    let lost = conflicted.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} tasks x {n_slots} slots = {total} attempts in {:.2}s = {:.0} ops/sec",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64()
    );
    println!("  confirmed={won} conflicts={lost} (expected confirmed={n_slots})");
    assert_eq!(won, n_slots, "double booking detected");
    print_latency("booking latency", &mut all_latencies);
}

/// Conflict and alternative lookups while writers keep booking elsewhere.
async fn phase3_read_under_load(host: &str, port: u16) {
    let setup = connect(host, port).await;
    let rid = create_resource(&setup, "EQUIPMENT").await;
    for _ in 0..20 {
        create_resource(&setup, "EQUIPMENT").await;
    }
    for i in 0..200 {
        let s = (i as i64) * 2 * HOUR;
        setup.batch_execute(&booking_sql(rid, s, s + HOUR)).await.unwrap();
    }
    drop(setup);

    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for _ in 0..5 {
        let host = host.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let wrid = create_resource(&client, "VEHICLE").await;
            let mut i = 0i64;
            while !stop.load(Ordering::Relaxed) {
                let s = i * 2 * HOUR;
                let _ = client.batch_execute(&booking_sql(wrid, s, s + HOUR)).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();

    for r in 0..n_readers {
        let host = host.to_string();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut conflict_latencies = Vec::with_capacity(reads_per_reader);
            let mut alternative_latencies = Vec::with_capacity(reads_per_reader);
            for k in 0..reads_per_reader {
                let s = ((r * reads_per_reader + k) % 400) as i64 * HOUR;
                let e = s + 3 * HOUR;

                let t = Instant::now();
                client
                    .simple_query(&format!(
                        r#"SELECT * FROM conflicts WHERE resource_id = '{rid}' AND start = {s} AND "end" = {e}"#
                    ))
                    .await
                    .unwrap();
                conflict_latencies.push(t.elapsed());

                let t = Instant::now();
                client
                    .simple_query(&format!(
                        r#"SELECT * FROM alternatives WHERE resource_id = '{rid}' AND start = {s} AND "end" = {e}"#
                    ))
                    .await
                    .unwrap();
                alternative_latencies.push(t.elapsed());
            }
            (conflict_latencies, alternative_latencies)
        }));
    }

    let mut conflicts = Vec::new();
    let mut alternatives = Vec::new();
    for h in reader_handles {
        let (c, a) = h.await.unwrap();
        conflicts.extend(c);
        alternatives.extend(a);
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("conflict query", &mut conflicts);
    print_latency("alternatives query", &mut alternatives);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let rid = create_resource(&client, "ROOM").await;
            for i in 0..ops_per_conn {
                let s = (i as i64) * 2 * HOUR;
                client.batch_execute(&booking_sql(rid, s, s + HOUR)).await.unwrap();
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("BOOKD_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("BOOKD_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid BOOKD_PORT");

    println!("=== bookd stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential booking throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] contended bookings on one resource");
    phase2_contention(&host, port).await;

    println!("\n[phase 3] conflict/alternative queries under write load");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
