//! Configuration and command-line argument parsing.

use std::env;

/// Gain in tenths of a dB for the `max` keyword.
pub const MAX_GAIN_TENTHS: i32 = 496;

#[derive(Debug, Clone)]
pub struct Config {
    // Device
    pub device_index: u32,
    pub frequency: u32,
    /// Tuner gain in tenths of a dB.
    pub gain: i32,

    // Input
    pub ifile: Option<String>,
    pub loop_file: bool,

    // Processing
    pub fix_errors: bool,
    pub crc_check: bool,
    pub show_only: Option<u32>,
    pub snip_level: Option<f32>,
    pub dump_raw: Option<String>,

    // Receiver anchor
    pub receiver_lat: Option<f64>,
    pub receiver_lon: Option<f64>,
    pub max_range_nm: f64,

    // Persistence
    pub db_url: Option<String>,

    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_index: 0,
            frequency: 1_090_000_000,
            gain: MAX_GAIN_TENTHS,
            ifile: None,
            loop_file: false,
            fix_errors: true,
            crc_check: true,
            show_only: None,
            snip_level: None,
            dump_raw: None,
            receiver_lat: None,
            receiver_lon: None,
            max_range_nm: 300.0,
            db_url: None,
            verbose: false,
        }
    }
}

impl Config {
    pub fn from_args() -> Self {
        let args: Vec<String> = env::args().skip(1).collect();
        match Self::parse(&args) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{e}");
                print_help();
                std::process::exit(1);
            }
        }
    }

    pub fn parse(args: &[String]) -> Result<Self, String> {
        fn take<'a>(args: &'a [String], i: &mut usize, name: &str) -> Result<&'a str, String> {
            *i += 1;
            args.get(*i)
                .map(|s| s.as_str())
                .ok_or_else(|| format!("{name} needs a value"))
        }

        let mut config = Config::default();

        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--device-index" => {
                    config.device_index = take(args, &mut i, "--device-index")?
                        .parse()
                        .map_err(|_| "invalid device index".to_string())?;
                }
                "--freq" => {
                    config.frequency = take(args, &mut i, "--freq")?
                        .parse()
                        .map_err(|_| "invalid frequency".to_string())?;
                }
                "--gain" => {
                    let v = take(args, &mut i, "--gain")?;
                    config.gain = if v == "max" {
                        MAX_GAIN_TENTHS
                    } else {
                        v.parse::<f64>()
                            .map(|g| (g * 10.0) as i32)
                            .map_err(|_| "invalid gain".to_string())?
                    };
                }
                "--lat" => {
                    config.receiver_lat = Some(
                        take(args, &mut i, "--lat")?
                            .parse()
                            .map_err(|_| "invalid latitude".to_string())?,
                    );
                }
                "--lon" => {
                    config.receiver_lon = Some(
                        take(args, &mut i, "--lon")?
                            .parse()
                            .map_err(|_| "invalid longitude".to_string())?,
                    );
                }
                "--max-range" => {
                    config.max_range_nm = take(args, &mut i, "--max-range")?
                        .parse()
                        .map_err(|_| "invalid max range".to_string())?;
                }
                "--no-fix" => config.fix_errors = false,
                "--no-crc-check" => config.crc_check = false,
                "--show-only" => {
                    let v = take(args, &mut i, "--show-only")?;
                    config.show_only = Some(
                        u32::from_str_radix(v, 16)
                            .map_err(|_| format!("invalid ICAO address: {v}"))?,
                    );
                }
                "--snip-level" => {
                    config.snip_level = Some(
                        take(args, &mut i, "--snip-level")?
                            .parse()
                            .map_err(|_| "invalid snip level".to_string())?,
                    );
                }
                "--dump-raw" => {
                    config.dump_raw = Some(take(args, &mut i, "--dump-raw")?.to_string());
                }
                "--ifile" => config.ifile = Some(take(args, &mut i, "--ifile")?.to_string()),
                "--loop" => config.loop_file = true,
                "--db-url" => config.db_url = Some(take(args, &mut i, "--db-url")?.to_string()),
                "--verbose" => config.verbose = true,
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                other => return Err(format!("unknown option: {other}")),
            }
            i += 1;
        }

        if config.receiver_lat.is_some() != config.receiver_lon.is_some() {
            return Err("--lat and --lon must be given together".to_string());
        }
        if let Some(lat) = config.receiver_lat {
            if !(-90.0..=90.0).contains(&lat) {
                return Err("latitude out of range".to_string());
            }
        }
        if let Some(lon) = config.receiver_lon {
            if !(-180.0..=180.0).contains(&lon) {
                return Err("longitude out of range".to_string());
            }
        }

        Ok(config)
    }

    /// Receiver anchor, when both coordinates are configured.
    pub fn anchor(&self) -> Option<(f64, f64)> {
        match (self.receiver_lat, self.receiver_lon) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

fn print_help() {
    println!(
        r#"modeswatch - 1090 MHz Mode S / ADS-B receiver and tracker

Usage: modeswatch [OPTIONS]

Options:
  --device-index <N>   Select RTL-SDR device (default: 0)
  --freq <hz>          Tuner frequency (default: 1090000000)
  --gain <db|max>      Tuner gain in dB, or 'max' for 49.6 dB (default: max)
  --ifile <path>       Read I/Q samples from file ('-' for stdin)
  --loop               With --ifile, replay the file forever
  --lat <degrees>      Receiver latitude (needs --lon)
  --lon <degrees>      Receiver longitude (needs --lat)
  --max-range <nm>     Discard positions beyond this range (default: 300)
  --no-fix             Disable single-bit CRC error correction
  --no-crc-check       Disable CRC validation (discouraged)
  --show-only <icao>   Keep only messages from this aircraft
  --snip-level <mag>   Drop magnitude samples below this level
  --dump-raw <path>    Tee raw I/Q samples to a file for replay
  --db-url <conninfo>  PostgreSQL history store, e.g. "host=localhost dbname=modeswatch"
  --verbose            Debug-level logging
  --help               Show this help
"#
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config, String> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        Config::parse(&args)
    }

    #[test]
    fn defaults() {
        let c = parse(&[]).unwrap();
        assert_eq!(c.frequency, 1_090_000_000);
        assert_eq!(c.gain, MAX_GAIN_TENTHS);
        assert!(c.fix_errors);
        assert!(c.crc_check);
        assert_eq!(c.max_range_nm, 300.0);
        assert_eq!(c.anchor(), None);
    }

    #[test]
    fn gain_in_tenths() {
        assert_eq!(parse(&["--gain", "28.0"]).unwrap().gain, 280);
        assert_eq!(parse(&["--gain", "max"]).unwrap().gain, MAX_GAIN_TENTHS);
    }

    #[test]
    fn anchor_needs_both_coordinates() {
        assert!(parse(&["--lat", "52.3"]).is_err());
        assert!(parse(&["--lon", "4.8"]).is_err());
        let c = parse(&["--lat", "52.3", "--lon", "4.8"]).unwrap();
        assert_eq!(c.anchor(), Some((52.3, 4.8)));
    }

    #[test]
    fn show_only_parses_hex() {
        let c = parse(&["--show-only", "4840D6"]).unwrap();
        assert_eq!(c.show_only, Some(0x4840D6));
        assert!(parse(&["--show-only", "XYZ"]).is_err());
    }

    #[test]
    fn rejects_unknown_options() {
        assert!(parse(&["--bogus"]).is_err());
        assert!(parse(&["--gain"]).is_err());
    }
}
