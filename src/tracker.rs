//! Aircraft state tracking.
//!
//! Decoded messages merge into a per-ICAO state table behind a single mutex.
//! Position messages feed the CPR resolver; resolved fixes are range-gated
//! against the receiver anchor and appended to a bounded position history.
//! Every update publishes a snapshot to subscribers over a bounded broadcast
//! channel, so a slow consumer lags and drops rather than stalling the
//! pipeline. Stale aircraft are swept lazily on reads.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::cpr::{self, CprFrame};
use crate::decoder::{CprRaw, EhsReport, Message, MessageKind};
use crate::geodesy::{haversine_nm, round6};
use crate::history::SightingRow;

/// Aircraft disappear from snapshots this long after their last message.
pub const AIRCRAFT_TIMEOUT: Duration = Duration::from_secs(60);
/// Cap on the per-aircraft position trail.
pub const MAX_POSITION_HISTORY: usize = 100;
/// How often an aircraft is persisted to the history store.
pub const HISTORY_SAVE_INTERVAL: Duration = Duration::from_secs(30);
/// Cadence of the periodic full-list broadcast.
pub const SNAPSHOT_BROADCAST_INTERVAL: Duration = Duration::from_secs(5);
/// How often the ICAO recovery candidate list is rebuilt.
pub const CANDIDATE_REFRESH_INTERVAL: Duration = Duration::from_secs(60);
/// How far back the history store contributes recovery candidates.
pub const CANDIDATE_HOURS: f64 = 2.0;

const EVENT_CAPACITY: usize = 256;

/// Enhanced surveillance readouts overlaid from Comm-B replies.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EhsFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_altitude_ft: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roll_angle_deg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub true_track_deg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub magnetic_heading_deg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indicated_airspeed_kt: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mach: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baro_rate_fpm: Option<i32>,
}

impl EhsFields {
    fn apply(&mut self, report: &EhsReport) {
        match *report {
            EhsReport::SelectedVerticalIntention { selected_altitude_ft } => {
                self.selected_altitude_ft = Some(selected_altitude_ft);
            }
            EhsReport::TrackAndTurnReport { roll_angle_deg, true_track_deg } => {
                if roll_angle_deg.is_some() {
                    self.roll_angle_deg = roll_angle_deg;
                }
                if true_track_deg.is_some() {
                    self.true_track_deg = true_track_deg;
                }
            }
            EhsReport::HeadingAndSpeedReport {
                magnetic_heading_deg,
                indicated_airspeed_kt,
                mach,
                baro_rate_fpm,
            } => {
                if magnetic_heading_deg.is_some() {
                    self.magnetic_heading_deg = magnetic_heading_deg;
                }
                if indicated_airspeed_kt.is_some() {
                    self.indicated_airspeed_kt = indicated_airspeed_kt;
                }
                if mach.is_some() {
                    self.mach = mach;
                }
                if baro_rate_fpm.is_some() {
                    self.baro_rate_fpm = baro_rate_fpm;
                }
            }
        }
    }
}

/// One resolved position on the trail.
#[derive(Debug, Clone, Serialize)]
pub struct PositionFix {
    pub lat: f64,
    pub lon: f64,
    pub altitude_ft: Option<i32>,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct CprSlot {
    frame: CprFrame,
    surface: bool,
}

/// Mutable per-aircraft state. Lives only inside the tracker lock.
#[derive(Debug, Clone)]
struct AircraftState {
    icao: u32,
    callsign: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    altitude_ft: Option<i32>,
    speed_kt: Option<u16>,
    heading_deg: Option<u16>,
    vertical_rate_fpm: Option<i32>,
    squawk: Option<String>,
    signal_strength: Option<f64>,
    last_seen: Instant,
    seen_at: DateTime<Utc>,
    messages: u64,
    even_cpr: Option<CprSlot>,
    odd_cpr: Option<CprSlot>,
    positions: VecDeque<PositionFix>,
    ehs: EhsFields,
    last_saved: Option<Instant>,
}

impl AircraftState {
    fn new(icao: u32, now: Instant, wall: DateTime<Utc>) -> Self {
        Self {
            icao,
            callsign: None,
            lat: None,
            lon: None,
            altitude_ft: None,
            speed_kt: None,
            heading_deg: None,
            vertical_rate_fpm: None,
            squawk: None,
            signal_strength: None,
            last_seen: now,
            seen_at: wall,
            messages: 0,
            even_cpr: None,
            odd_cpr: None,
            positions: VecDeque::new(),
            ehs: EhsFields::default(),
            last_saved: None,
        }
    }

    fn sighting_row(&self, wall: DateTime<Utc>) -> SightingRow {
        SightingRow {
            icao: format!("{:06X}", self.icao),
            callsign: self.callsign.clone(),
            latitude: self.lat,
            longitude: self.lon,
            altitude: self.altitude_ft,
            speed: self.speed_kt.map(i32::from),
            heading: self.heading_deg.map(i32::from),
            squawk: self.squawk.clone(),
            signal_strength: self.signal_strength,
            seen_at: wall,
        }
    }
}

/// Read-only copy of an aircraft, without the internal CPR slots.
#[derive(Debug, Clone, Serialize)]
pub struct AircraftSnapshot {
    pub icao: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callsign: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude_ft: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_kt: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading_deg: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical_rate_fpm: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub squawk: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_strength: Option<f64>,
    pub last_seen: DateTime<Utc>,
    pub messages: u64,
    #[serde(flatten)]
    pub ehs: EhsFields,
    /// Distance from the receiver anchor, when one is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_nm: Option<f64>,
}

/// Events delivered to subscribers.
#[derive(Debug, Clone, Serialize)]
pub enum TrackerEvent {
    /// A single aircraft changed.
    Aircraft(AircraftSnapshot),
    /// Periodic full list.
    Snapshot(Vec<AircraftSnapshot>),
}

/// The aircraft table and its subscribers.
pub struct Tracker {
    aircraft: Mutex<HashMap<u32, AircraftState>>,
    events: broadcast::Sender<TrackerEvent>,
    history_tx: Option<mpsc::Sender<SightingRow>>,
    anchor: Option<(f64, f64)>,
    max_range_nm: f64,
}

impl Tracker {
    pub fn new(
        anchor: Option<(f64, f64)>,
        max_range_nm: f64,
        history_tx: Option<mpsc::Sender<SightingRow>>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            aircraft: Mutex::new(HashMap::new()),
            events,
            history_tx,
            anchor,
            max_range_nm,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    /// Merge one decoded message. Messages without an ICAO address (short
    /// frames whose recovery failed) never reach this point.
    pub fn update(&self, msg: &Message) {
        self.update_at(msg, Instant::now(), Utc::now());
    }

    fn update_at(&self, msg: &Message, now: Instant, wall: DateTime<Utc>) {
        let Some(icao) = msg.icao else { return };

        let snapshot;
        {
            let mut aircraft = self.aircraft.lock();
            let state = aircraft
                .entry(icao)
                .or_insert_with(|| AircraftState::new(icao, now, wall));
            state.last_seen = now;
            state.seen_at = wall;
            state.messages += 1;

            if msg.signal_level > 0.0 {
                state.signal_strength = Some(match state.signal_strength {
                    None => msg.signal_level,
                    Some(prev) => round6(prev * 0.7 + msg.signal_level * 0.3),
                });
            }

            match &msg.kind {
                MessageKind::Identification { callsign } => {
                    if !callsign.is_empty() {
                        state.callsign = Some(callsign.clone());
                    }
                }
                MessageKind::AirbornePosition { altitude_ft, cpr } => {
                    state.altitude_ft = Some(*altitude_ft);
                    self.merge_position(state, cpr, false, now, wall);
                }
                MessageKind::SurfacePosition { cpr } => {
                    self.merge_position(state, cpr, true, now, wall);
                }
                MessageKind::Velocity { speed_kt, heading_deg, vertical_rate_fpm, .. } => {
                    if speed_kt.is_some() {
                        state.speed_kt = *speed_kt;
                    }
                    if heading_deg.is_some() {
                        state.heading_deg = *heading_deg;
                    }
                    if vertical_rate_fpm.is_some() {
                        state.vertical_rate_fpm = *vertical_rate_fpm;
                    }
                }
                MessageKind::SurveillanceReply { squawk, ehs } => {
                    state.squawk = Some(squawk.clone());
                    if let Some(report) = ehs {
                        state.ehs.apply(report);
                    }
                }
                MessageKind::Unsupported => {}
            }

            let save_due = state
                .last_saved
                .map_or(true, |t| now.duration_since(t) >= HISTORY_SAVE_INTERVAL);
            if save_due {
                state.last_saved = Some(now);
                if let Some(tx) = &self.history_tx {
                    if tx.try_send(state.sighting_row(wall)).is_err() {
                        debug!(icao = %format!("{icao:06X}"), "history queue full, sighting dropped");
                    }
                }
            }

            snapshot = self.snapshot_of(state);
        }

        let _ = self.events.send(TrackerEvent::Aircraft(snapshot));
    }

    /// Store a CPR slot and try to turn it into a fix: a fresh even/odd pair
    /// decodes globally, a lone frame decodes against the last known position.
    fn merge_position(
        &self,
        state: &mut AircraftState,
        cpr: &CprRaw,
        surface: bool,
        now: Instant,
        wall: DateTime<Utc>,
    ) {
        let slot = CprSlot {
            frame: CprFrame { lat: cpr.lat, lon: cpr.lon, time: now },
            surface,
        };
        if cpr.odd {
            state.odd_cpr = Some(slot);
        } else {
            state.even_cpr = Some(slot);
        }
        if surface {
            // Resolving surface frames needs a receiver anchor; the slot is
            // kept so a later airborne frame does not pair with a stale one.
            return;
        }

        let global = match (&state.even_cpr, &state.odd_cpr) {
            (Some(even), Some(odd))
                if !even.surface
                    && !odd.surface
                    && even.frame.age(now) <= cpr::FRAME_MAX_AGE
                    && odd.frame.age(now) <= cpr::FRAME_MAX_AGE =>
            {
                cpr::decode_global(&even.frame, &odd.frame)
            }
            _ => None,
        };
        let position = global.or_else(|| match (state.lat, state.lon) {
            (Some(lat), Some(lon)) => cpr::decode_local(lat, lon, &slot.frame, cpr.odd),
            _ => None,
        });
        let Some((lat, lon)) = position else { return };

        if let Some((rx_lat, rx_lon)) = self.anchor {
            let distance = haversine_nm(rx_lat, rx_lon, lat, lon);
            if distance > self.max_range_nm {
                debug!(
                    icao = %format!("{:06X}", state.icao),
                    distance_nm = distance,
                    "position beyond configured range, not applied"
                );
                return;
            }
        }

        state.lat = Some(lat);
        state.lon = Some(lon);
        append_position(state, lat, lon, wall);
    }

    fn snapshot_of(&self, state: &AircraftState) -> AircraftSnapshot {
        let distance_nm = match (self.anchor, state.lat, state.lon) {
            (Some((rx_lat, rx_lon)), Some(lat), Some(lon)) => {
                Some((haversine_nm(rx_lat, rx_lon, lat, lon) * 10.0).round() / 10.0)
            }
            _ => None,
        };
        AircraftSnapshot {
            icao: format!("{:06X}", state.icao),
            callsign: state.callsign.clone(),
            lat: state.lat,
            lon: state.lon,
            altitude_ft: state.altitude_ft,
            speed_kt: state.speed_kt,
            heading_deg: state.heading_deg,
            vertical_rate_fpm: state.vertical_rate_fpm,
            squawk: state.squawk.clone(),
            signal_strength: state.signal_strength,
            last_seen: state.seen_at,
            messages: state.messages,
            ehs: state.ehs.clone(),
            distance_nm,
        }
    }

    /// All live aircraft, most recent first. Reads sweep expired entries.
    pub fn snapshot_all(&self) -> Vec<AircraftSnapshot> {
        self.snapshot_all_at(Instant::now())
    }

    fn snapshot_all_at(&self, now: Instant) -> Vec<AircraftSnapshot> {
        let mut aircraft = self.aircraft.lock();
        sweep(&mut aircraft, now);
        let mut list: Vec<_> = aircraft.values().map(|s| self.snapshot_of(s)).collect();
        list.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        list
    }

    /// Live ICAO addresses, for the recovery candidate list.
    pub fn icaos(&self) -> Vec<u32> {
        let mut aircraft = self.aircraft.lock();
        sweep(&mut aircraft, Instant::now());
        aircraft.keys().copied().collect()
    }

    /// Position trail for one aircraft, oldest first.
    pub fn position_history(&self, icao: u32) -> Vec<PositionFix> {
        self.aircraft
            .lock()
            .get(&icao)
            .map(|s| s.positions.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Publish the periodic full list to subscribers.
    pub fn publish_full_snapshot(&self) {
        let _ = self.events.send(TrackerEvent::Snapshot(self.snapshot_all()));
    }

    pub fn len(&self) -> usize {
        self.aircraft.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn sweep(aircraft: &mut HashMap<u32, AircraftState>, now: Instant) {
    aircraft.retain(|_, a| now.duration_since(a.last_seen) <= AIRCRAFT_TIMEOUT);
}

fn append_position(state: &mut AircraftState, lat: f64, lon: f64, time: DateTime<Utc>) {
    state.positions.push_back(PositionFix {
        lat,
        lon,
        altitude_ft: state.altitude_ft,
        time,
    });
    while state.positions.len() > MAX_POSITION_HISTORY {
        state.positions.pop_front();
    }
}
