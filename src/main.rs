use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use classroom_occupancy::directory::{Directory, OpenDirectory, Roster};
use classroom_occupancy::engine::Engine;
use classroom_occupancy::observability::{
    CONNECTIONS_ACTIVE, CONNECTIONS_REJECTED_TOTAL, CONNECTIONS_TOTAL,
};
use classroom_occupancy::{seed, sweep, wire};

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("CLASSROOM_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    classroom_occupancy::observability::init(metrics_port)?;

    let port = std::env::var("CLASSROOM_PORT").unwrap_or_else(|_| "5433".into());
    let bind = std::env::var("CLASSROOM_BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let data_dir = std::env::var("CLASSROOM_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let password = std::env::var("CLASSROOM_PASSWORD").unwrap_or_else(|_| "classroom".into());
    let max_connections: usize = env_parse("CLASSROOM_MAX_CONNECTIONS", 256);
    let compact_threshold: u64 = env_parse("CLASSROOM_COMPACT_THRESHOLD", 1000);
    let sweep_secs: u64 = env_parse("CLASSROOM_SWEEP_SECS", 60);
    let seed_demo = std::env::var("CLASSROOM_SEED").is_ok_and(|v| !v.is_empty() && v != "0");

    let directory: Arc<dyn Directory> = match std::env::var("CLASSROOM_ROSTER") {
        Ok(path) => {
            let roster = Roster::load(&PathBuf::from(&path))?;
            info!("roster: {} users from {path}", roster.len());
            Arc::new(roster)
        }
        Err(_) => {
            tracing::warn!("no CLASSROOM_ROSTER set, every user may book any subject");
            Arc::new(OpenDirectory)
        }
    };

    std::fs::create_dir_all(&data_dir)?;
    let wal_path = PathBuf::from(&data_dir).join("classroom.wal");
    let engine = Arc::new(Engine::new(wal_path, directory)?);

    if seed_demo {
        seed::seed_rooms(&engine).await?;
    }

    tokio::spawn(sweep::run_occupancy_sweep(
        engine.clone(),
        Duration::from_secs(sweep_secs.max(1)),
    ));
    tokio::spawn(sweep::run_compactor(engine.clone(), compact_threshold));

    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("classroom-occupancy listening on {addr}");
    info!("  data_dir: {data_dir}");
    info!("  rooms: {}", engine.room_count());
    info!("  max_connections: {max_connections}");
    info!("  sweep: every {sweep_secs}s");
    info!("  metrics: {}", metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // Stop accepting on SIGTERM/ctrl-c, then drain in-flight connections
    #[cfg(unix)]
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(CONNECTIONS_ACTIVE).increment(1.0);
                let engine = engine.clone();
                let pw = password.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = wire::process_connection(socket, engine, pw).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    // Wait for in-flight connections to finish (up to 10s)
    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }

    info!("classroom-occupancy stopped");
    Ok(())
}
