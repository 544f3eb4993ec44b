//! Position fix formatting for the GNSS receiver

use std::fmt;

use serde::{Serialize, Serializer};

use crate::sample::GnssFix;
use crate::transform::{Outcome, Report, Transform};

/// Angle split into degree, minute and ten-thousandths of a minute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dmf {
    pub negative: bool,
    pub degree: u32,
    pub minute: u32,
    pub frac: u32,
}

impl Dmf {
    pub fn from_degrees(x: f64) -> Self {
        let negative = x < 0.0;
        let x = x.abs();
        let degree = x.trunc();
        let minutes = (x - degree) * 60.0;
        let minute = minutes.trunc();
        let frac = ((minutes - minute) * 10000.0).trunc();
        Self {
            negative,
            degree: degree as u32,
            minute: minute as u32,
            frac: frac as u32,
        }
    }
}

impl fmt::Display for Dmf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.negative { "-" } else { "" };
        write!(f, "{}{}.{}.{:04}", sign, self.degree, self.minute, self.frac)
    }
}

impl Serialize for Dmf {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub lat: Dmf,
    pub lng: Dmf,
    pub lat_raw: f64,
    pub lng_raw: f64,
    pub fix: u8,
    pub altitude: f64,
    pub geoid: f64,
    pub h_accuracy: f32,
    pub v_accuracy: f32,
    pub visible_sats: u8,
    pub tracking_sats: u8,
    pub pos_sats: u8,
    pub sat_systems: u32,
    pub pdop: f32,
    pub hdop: f32,
    pub vdop: f32,
    pub tdop: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoFix {
    pub fix: u8,
    pub visible_sats: u8,
    pub tracking_sats: u8,
    pub sat_systems: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FixDetail {
    Fixed(Position),
    NoFix(NoFix),
}

/// One formatted GNSS notification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GnssReport {
    pub time: String,
    #[serde(flatten)]
    pub detail: FixDetail,
}

impl GnssReport {
    pub fn has_position(&self) -> bool {
        matches!(self.detail, FixDetail::Fixed(_))
    }
}

impl Report for GnssReport {
    fn summary(&self) -> &'static str {
        if self.has_position() {
            "Position fixed"
        } else {
            "No position fix"
        }
    }
}

impl From<&GnssFix> for GnssReport {
    fn from(fix: &GnssFix) -> Self {
        let time = format!(
            "{:02}:{:02}:{:02}.{:06}",
            fix.time.hour, fix.time.minute, fix.time.sec, fix.time.usec
        );
        let detail = if fix.has_position() {
            FixDetail::Fixed(Position {
                lat: Dmf::from_degrees(fix.latitude),
                lng: Dmf::from_degrees(fix.longitude),
                lat_raw: fix.latitude,
                lng_raw: fix.longitude,
                fix: fix.fix_mode.raw(),
                altitude: fix.altitude,
                geoid: fix.geoid,
                h_accuracy: fix.h_accuracy,
                v_accuracy: fix.v_accuracy,
                visible_sats: fix.visible_sats,
                tracking_sats: fix.tracking_sats,
                pos_sats: fix.positioning_sats,
                sat_systems: fix.sat_systems,
                pdop: fix.pdop,
                hdop: fix.hdop,
                vdop: fix.vdop,
                tdop: fix.tdop,
            })
        } else {
            FixDetail::NoFix(NoFix {
                fix: 0,
                visible_sats: fix.visible_sats,
                tracking_sats: fix.tracking_sats,
                sat_systems: fix.sat_systems,
            })
        };
        Self { time, detail }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GnssFormat;

impl Transform for GnssFormat {
    type Sample = GnssFix;
    type State = ();
    type Output = GnssReport;

    fn initial_state(&self) -> Self::State {}

    fn apply(&mut self, fix: &GnssFix, _state: &mut ()) -> Outcome<GnssReport> {
        Outcome::Ready(GnssReport::from(fix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{FixMode, FixTime};

    fn fix(mode: FixMode) -> GnssFix {
        GnssFix {
            time: FixTime {
                hour: 9,
                minute: 5,
                sec: 7,
                usec: 1200,
            },
            fix_mode: mode,
            visible_sats: 12,
            tracking_sats: 10,
            positioning_sats: 8,
            sat_systems: 3,
            latitude: 35.681236,
            longitude: -139.75,
            altitude: 40.25,
            geoid: 36.5,
            h_accuracy: 3.5,
            v_accuracy: 5.0,
            pdop: 1.5,
            hdop: 0.9,
            vdop: 1.2,
            tdop: 0.8,
        }
    }

    #[test]
    fn test_dmf_conversion() {
        let dmf = Dmf::from_degrees(35.681236);
        assert_eq!(dmf.degree, 35);
        assert_eq!(dmf.minute, 40);
        assert_eq!(dmf.frac, 8741);
        assert_eq!(dmf.to_string(), "35.40.8741");

        assert_eq!(Dmf::from_degrees(-0.5).to_string(), "-0.30.0000");
        assert_eq!(Dmf::from_degrees(1.515625).to_string(), "1.30.9375");
    }

    #[test]
    fn test_fixed_report_fields() {
        let report = GnssReport::from(&fix(FixMode::ThreeD));
        assert!(report.has_position());
        assert_eq!(report.summary(), "Position fixed");

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["time"], "09:05:07.001200");
        assert_eq!(json["lat"], "35.40.8741");
        assert_eq!(json["lng"], "-139.45.0000");
        assert_eq!(json["fix"], 3);
        assert_eq!(json["pos_sats"], 8);
        assert_eq!(json["lat_raw"], 35.681236);
    }

    #[test]
    fn test_no_fix_report_fields() {
        let report = GnssReport::from(&fix(FixMode::Invalid));
        assert_eq!(report.summary(), "No position fix");
        let json = serde_json::to_value(&report).unwrap();
        let keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys.len(), 5);
        assert_eq!(json["fix"], 0);
        assert_eq!(json["visible_sats"], 12);
        assert!(json.get("lat").is_none());
    }
}
