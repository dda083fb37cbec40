//! Sample ingest.
//!
//! One thread owns the read loop: it pulls interleaved I/Q bytes from an
//! rtl_sdr subprocess or a file, optionally tees them to a raw dump file,
//! converts them to magnitudes and runs the demodulator synchronously.
//! Chunks overlap by one full frame so a message straddling a read boundary
//! still decodes. A cooperative shutdown flag is checked at buffer
//! boundaries; in-flight buffers finish before the loop returns.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use tracing::{debug, info};

use crate::config::Config;
use crate::decoder::Message;
use crate::demodulator::{Demodulator, FULL_FRAME_SAMPLES, SAMPLE_RATE_HZ};
use crate::magnitude::{compute_magnitude_vector, snip_low_samples, MagnitudeLut};

/// Bytes per read chunk.
const DATA_LEN: usize = 16 * 16384;
/// Overlap carried between chunks, two bytes per sample.
const OVERLAP: usize = (FULL_FRAME_SAMPLES - 1) * 2;

/// Run the read loop until EOF, a dropped consumer or shutdown.
pub fn run(
    config: &Config,
    demod: &Demodulator,
    tx: &Sender<Message>,
    shutdown: &Arc<AtomicBool>,
) -> Result<()> {
    let lut = MagnitudeLut::new();

    let mut dump = match &config.dump_raw {
        Some(path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("creating raw dump {path}"))?,
        )),
        None => None,
    };

    let mut child: Option<Child> = None;
    let mut reader: Box<dyn Read> = match &config.ifile {
        Some(path) => {
            info!("reading samples from {path}");
            open_input(path)?
        }
        None => {
            info!(
                device = config.device_index,
                frequency = config.frequency,
                "starting rtl_sdr"
            );
            let mut c = spawn_rtl_sdr(config)?;
            let stdout = c.stdout.take().context("rtl_sdr stdout unavailable")?;
            child = Some(c);
            Box::new(stdout)
        }
    };

    let mut data = vec![127u8; OVERLAP + DATA_LEN];

    'read: while !shutdown.load(Ordering::Relaxed) {
        data.copy_within(DATA_LEN.., 0);

        let bytes_read = read_chunk(&mut reader, &mut data[OVERLAP..])?;
        if bytes_read == 0 {
            match (&config.ifile, config.loop_file) {
                (Some(path), true) if path != "-" => {
                    debug!("replaying {path}");
                    reader = open_input(path)?;
                    continue;
                }
                _ => break,
            }
        }

        if let Some(dump) = &mut dump {
            dump.write_all(&data[OVERLAP..OVERLAP + bytes_read])
                .context("writing raw dump")?;
        }
        if bytes_read < DATA_LEN {
            data[OVERLAP + bytes_read..].fill(127);
        }

        let mut magnitude = compute_magnitude_vector(&data[..OVERLAP + bytes_read], &lut);
        if let Some(level) = config.snip_level {
            snip_low_samples(&mut magnitude, level);
        }

        for msg in demod.process_buffer(&magnitude) {
            if tx.send(msg).is_err() {
                break 'read;
            }
        }
    }

    if let Some(mut child) = child {
        child.kill().ok();
        child.wait().ok();
    }
    if let Some(mut dump) = dump {
        dump.flush().ok();
    }
    debug!("sample ingest finished");
    Ok(())
}

fn open_input(path: &str) -> Result<Box<dyn Read>> {
    if path == "-" {
        Ok(Box::new(io::stdin()))
    } else {
        let file = File::open(path).with_context(|| format!("opening {path}"))?;
        Ok(Box::new(file))
    }
}

fn spawn_rtl_sdr(config: &Config) -> Result<Child> {
    let mut cmd = Command::new("rtl_sdr");
    cmd.arg("-d")
        .arg(config.device_index.to_string())
        .arg("-f")
        .arg(config.frequency.to_string())
        .arg("-s")
        .arg(SAMPLE_RATE_HZ.to_string())
        .arg("-g")
        .arg(format!("{:.1}", config.gain as f64 / 10.0))
        .arg("-")
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    cmd.spawn().context("spawning rtl_sdr (is rtl-sdr installed?)")
}

/// Fill the buffer, tolerating short reads; 0 means EOF.
fn read_chunk(reader: &mut Box<dyn Read>, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::Decoder;
    use crate::frame::Frame;
    use crossbeam_channel::bounded;
    use std::path::PathBuf;

    /// I/Q byte pair for a pulse (|z| near 1) or silence (|z| near 0).
    fn iq(pulse: bool) -> [u8; 2] {
        if pulse {
            [255, 128]
        } else {
            [128, 128]
        }
    }

    fn frame_as_iq(frame: &Frame) -> Vec<u8> {
        let mut bytes = Vec::new();
        for _ in 0..50 {
            bytes.extend(iq(false));
        }
        for offset in 0..16 {
            bytes.extend(iq(matches!(offset, 0 | 2 | 7 | 9)));
        }
        for i in 0..frame.len() {
            let one = frame.bit(i) == 1;
            bytes.extend(iq(one));
            bytes.extend(iq(!one));
        }
        for _ in 0..FULL_FRAME_SAMPLES + 50 {
            bytes.extend(iq(false));
        }
        bytes
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("modeswatch-{}-{name}", std::process::id()))
    }

    #[test]
    fn reads_file_end_to_end() {
        let frame = Frame::from_hex("8D4840D6202CC371C32CE0576098").unwrap();
        let input = temp_path("ingest.bin");
        std::fs::write(&input, frame_as_iq(&frame)).unwrap();

        let config = Config {
            ifile: Some(input.to_string_lossy().into_owned()),
            ..Config::default()
        };
        let demod = Demodulator::new(Decoder::new(true, true));
        let (tx, rx) = bounded(16);
        let shutdown = Arc::new(AtomicBool::new(false));

        run(&config, &demod, &tx, &shutdown).unwrap();
        drop(tx);

        let messages: Vec<Message> = rx.iter().collect();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].icao, Some(0x4840D6));

        std::fs::remove_file(&input).ok();
    }

    #[test]
    fn raw_dump_mirrors_the_input() {
        let frame = Frame::from_hex("8D4840D6202CC371C32CE0576098").unwrap();
        let bytes = frame_as_iq(&frame);
        let input = temp_path("dump-in.bin");
        let dump = temp_path("dump-out.bin");
        std::fs::write(&input, &bytes).unwrap();

        let config = Config {
            ifile: Some(input.to_string_lossy().into_owned()),
            dump_raw: Some(dump.to_string_lossy().into_owned()),
            ..Config::default()
        };
        let demod = Demodulator::new(Decoder::new(true, true));
        let (tx, _rx) = bounded(16);
        let shutdown = Arc::new(AtomicBool::new(false));

        run(&config, &demod, &tx, &shutdown).unwrap();

        let dumped = std::fs::read(&dump).unwrap();
        assert_eq!(dumped, bytes);

        std::fs::remove_file(&input).ok();
        std::fs::remove_file(&dump).ok();
    }

    #[test]
    fn shutdown_stops_before_reading() {
        let input = temp_path("shutdown.bin");
        std::fs::write(&input, vec![127u8; 4096]).unwrap();

        let config = Config {
            ifile: Some(input.to_string_lossy().into_owned()),
            ..Config::default()
        };
        let demod = Demodulator::new(Decoder::new(true, true));
        let (tx, _rx) = bounded(16);
        let shutdown = Arc::new(AtomicBool::new(true));

        run(&config, &demod, &tx, &shutdown).unwrap();
        assert_eq!(demod.stats().lock().samples_processed, 0);

        std::fs::remove_file(&input).ok();
    }
}
