//! modeswatch: a 1090 MHz Mode S / ADS-B receiver.
//!
//! Samples from an RTL-SDR (or a recorded file) are demodulated into Mode S
//! frames, decoded, merged into a live aircraft table and persisted as
//! sightings for range and coverage analysis.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{bounded, Receiver};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use modeswatch::config::Config;
use modeswatch::decoder::{Decoder, Message};
use modeswatch::demodulator::{DemodStats, Demodulator};
use modeswatch::history::{self, History};
use modeswatch::tracker::{
    Tracker, CANDIDATE_HOURS, CANDIDATE_REFRESH_INTERVAL, SNAPSHOT_BROADCAST_INTERVAL,
};
use modeswatch::{crc, ingest};

fn main() -> Result<()> {
    let config = Config::from_args();

    let level = if config.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).ok();
    info!("modeswatch starting");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    let history = match &config.db_url {
        Some(url) => Some(History::connect(url).await?),
        None => None,
    };

    let (sighting_tx, sighting_rx) = mpsc::channel(256);
    let tracker = Arc::new(Tracker::new(
        config.anchor(),
        config.max_range_nm,
        history.is_some().then_some(sighting_tx),
    ));
    let writer = history
        .clone()
        .map(|h| tokio::spawn(history::run_writer(h, sighting_rx)));

    let candidates: Arc<RwLock<HashSet<u32>>> = Arc::new(RwLock::new(HashSet::new()));
    let demod = Arc::new(Demodulator::new(Decoder::new(
        config.fix_errors,
        config.crc_check,
    )));
    let stats = demod.stats();
    let shutdown = Arc::new(AtomicBool::new(false));

    let refresher = tokio::spawn(refresh_candidates(
        Arc::clone(&tracker),
        history.clone(),
        Arc::clone(&candidates),
    ));
    let broadcaster = tokio::spawn(broadcast_loop(Arc::clone(&tracker), Arc::clone(&stats)));

    // The read loop owns its thread and feeds the demodulator synchronously;
    // decoded messages cross a bounded channel to the processor.
    let (msg_tx, msg_rx) = bounded::<Message>(1024);

    let ingest_config = config.clone();
    let ingest_demod = Arc::clone(&demod);
    let ingest_shutdown = Arc::clone(&shutdown);
    let mut ingest_task = tokio::task::spawn_blocking(move || {
        if let Err(e) = ingest::run(&ingest_config, &ingest_demod, &msg_tx, &ingest_shutdown) {
            error!("sample ingest failed: {e:#}");
        }
    });

    let proc_tracker = Arc::clone(&tracker);
    let proc_candidates = Arc::clone(&candidates);
    let proc_stats = Arc::clone(&stats);
    let proc_config = config.clone();
    let processor = tokio::task::spawn_blocking(move || {
        process_messages(msg_rx, proc_tracker, proc_candidates, proc_stats, proc_config);
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            shutdown.store(true, Ordering::Relaxed);
            let _ = (&mut ingest_task).await;
        }
        _ = &mut ingest_task => {}
    }

    // The ingest side dropped its sender; let the processor drain the queue.
    processor.await.ok();

    stats.lock().log_summary();

    broadcaster.abort();
    refresher.abort();
    if let Some(writer) = writer {
        drop(tracker);
        if tokio::time::timeout(Duration::from_secs(5), writer).await.is_err() {
            warn!("history writer did not drain in time");
        }
    }

    Ok(())
}

/// Merge decoded messages into the tracker. Short frames recover their ICAO
/// address against the candidate list first; failures are counted and
/// dropped, as is everything filtered by `--show-only`.
fn process_messages(
    rx: Receiver<Message>,
    tracker: Arc<Tracker>,
    candidates: Arc<RwLock<HashSet<u32>>>,
    stats: Arc<Mutex<DemodStats>>,
    config: Config,
) {
    while let Ok(mut msg) = rx.recv() {
        if msg.icao.is_none() {
            match crc::recover_short_icao(&msg.frame, &candidates.read()) {
                Some(icao) => {
                    msg.icao = Some(icao);
                    msg.icao_recovered = true;
                }
                None => {
                    stats.lock().messages_filtered += 1;
                    continue;
                }
            }
        }

        if let Some(only) = config.show_only {
            if msg.icao != Some(only) {
                stats.lock().messages_filtered += 1;
                continue;
            }
        }

        if !msg.crc_valid && config.crc_check {
            continue;
        }

        tracker.update(&msg);
    }
}

/// Rebuild the ICAO recovery candidate list: live tracker keys plus every
/// address the history store saw recently.
async fn refresh_candidates(
    tracker: Arc<Tracker>,
    history: Option<History>,
    candidates: Arc<RwLock<HashSet<u32>>>,
) {
    let mut interval = tokio::time::interval(CANDIDATE_REFRESH_INTERVAL);
    loop {
        interval.tick().await;
        let mut set: HashSet<u32> = tracker.icaos().into_iter().collect();
        if let Some(history) = &history {
            match history.recent_icaos(CANDIDATE_HOURS).await {
                Ok(recent) => set.extend(recent),
                Err(e) => warn!("candidate refresh query failed: {e:#}"),
            }
        }
        *candidates.write() = set;
    }
}

/// Publish the full aircraft list to subscribers on a fixed cadence, with an
/// occasional stats line.
async fn broadcast_loop(tracker: Arc<Tracker>, stats: Arc<Mutex<DemodStats>>) {
    let mut interval = tokio::time::interval(SNAPSHOT_BROADCAST_INTERVAL);
    let mut ticks = 0u64;
    loop {
        interval.tick().await;
        tracker.publish_full_snapshot();
        ticks += 1;
        if ticks % 6 == 0 {
            info!(aircraft = tracker.len(), "tracking");
            stats.lock().log_summary();
        }
    }
}
