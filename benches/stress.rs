use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

const ALL_DAYS: &str = "1,2,3,4,5,6,7";

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname("classroom")
        .user("classroom")
        .password(std::env::var("CLASSROOM_PASSWORD").unwrap_or_else(|_| "classroom".into()));

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
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 1).unwrap()
}

/// The i-th one-hour slot: twelve per day from 07:00, then the next day.
fn slot(i: u64) -> (NaiveDate, String, String) {
    let day = base_date() + Days::new(i / 12);
    let hour = 7 + i % 12;
    (day, format!("{hour:02}:00"), format!("{:02}:00", hour + 1))
}

fn occupation_sql(room: Ulid, i: u64) -> String {
    let (day, start, end) = slot(i);
    format!(
        "INSERT INTO occupations (id, room_id, teacher, subject, start_date, end_date, start_time, end_time, days) \
         VALUES ('{}', '{room}', 'bench@school.edu', 'Load', '{day}', '{day}', '{start}', '{end}', '{ALL_DAYS}')",
        Ulid::new()
    )
}

async fn create_room(client: &tokio_postgres::Client, label: &str) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO rooms (id, room_number, floor, building, max_students) VALUES ('{id}', '{label}', 1, 'Bench', 30)"
        ))
        .await
        .unwrap();
    id
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port).await;
    let room = create_room(&client, "seq").await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n as usize);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        client.batch_execute(&occupation_sql(room, i)).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} occupations in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent(host: &str, port: u16) {
    let n_tasks = 10;
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();

    for t in 0..n_tasks {
        let host = host.to_string();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let room = create_room(&client, &format!("conc-{t}")).await;
            for j in 0..n_per_task {
                client.batch_execute(&occupation_sql(room, j)).await.unwrap();
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} rooms x {n_per_task} occupations = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

/// Every task races for the same slots in one room. Each slot must be won once.
async fn phase3_contention(host: &str, port: u16) {
    let n_tasks = 20;
    let n_slots = 100u64;

    let setup = connect(host, port).await;
    let room = create_room(&setup, "race").await;
    drop(setup);

    let won = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let host = host.to_string();
        let won = won.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            for i in 0..n_slots {
                if client.batch_execute(&occupation_sql(room, i)).await.is_ok() {
                    won.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let won = won.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} tasks racing for {n_slots} slots: {won} won in {:.2}s{}",
        start.elapsed().as_secs_f64(),
        if won as u64 == n_slots { "" } else { "  << DOUBLE BOOKING" }
    );
}

async fn phase4_read_under_load(host: &str, port: u16) {
    let setup = connect(host, port).await;
    let room = create_room(&setup, "read").await;
    for i in 0..200 {
        setup.batch_execute(&occupation_sql(room, i)).await.unwrap();
    }
    drop(setup);

    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5 {
        let host = host.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let room = create_room(&client, &format!("writer-{w}")).await;
            let mut i = 0;
            while !stop.load(Ordering::Relaxed) {
                let _ = client.batch_execute(&occupation_sql(room, i)).await;
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
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let (day, start, _) = slot(((r * reads_per_reader + i) % 200) as u64);
                let t = Instant::now();
                client
                    .simple_query(&format!(
                        "SELECT * FROM occupied WHERE date = '{day}' AND time = '{start}'"
                    ))
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("occupied query", &mut all_latencies);
}

async fn phase5_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for c in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let room = create_room(&client, &format!("storm-{c}")).await;
            for i in 0..ops_per_conn {
                client.batch_execute(&occupation_sql(room, i)).await.unwrap();
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
    let host = std::env::var("CLASSROOM_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("CLASSROOM_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid CLASSROOM_PORT");

    println!("=== classroom-occupancy stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential scheduling throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] concurrent scheduling across rooms");
    phase2_concurrent(&host, port).await;

    println!("\n[phase 3] contention on one room");
    phase3_contention(&host, port).await;

    println!("\n[phase 4] occupied query latency under write load");
    phase4_read_under_load(&host, port).await;

    println!("\n[phase 5] connection storm");
    phase5_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
