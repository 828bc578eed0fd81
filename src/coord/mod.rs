// =============================================================================
// DATAGO — Coordinate transformation engine
// =============================================================================
// Pure CPU-bound conversion between the seven Korean systems: single and
// batch transforms, range validation, and system autodetection. Every
// returned point is in {x, y} form (x carries longitude for degree systems).
// =============================================================================

pub mod proj;
pub mod systems;

use crate::error::GatewayError;
use proj::{shift_from_wgs84, shift_to_wgs84, tm_forward, tm_inverse};
use serde::{Deserialize, Serialize};
use serde_json::json;
pub use systems::{lookup, SystemCode, SystemDef, Unit, SYSTEMS};
use tracing::warn;

/// Expected Korean extent for degree-valued points; exits produce warnings.
const KOREA_LON_RANGE: (f64, f64) = (124.0, 132.0);
const KOREA_LAT_RANGE: (f64, f64) = (33.0, 43.0);

pub const TRANSFORM_ACCURACY: &str = "<1m";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Inbound point in either representation; batch bodies accept both.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum PointRepr {
    Xy { x: f64, y: f64 },
    LonLat { longitude: f64, latitude: f64 },
}

/// Canonical {x, y} form: longitude maps to x, latitude to y.
pub fn normalize_point(repr: &PointRepr) -> Point {
    match *repr {
        PointRepr::Xy { x, y } => Point { x, y },
        PointRepr::LonLat { longitude, latitude } => Point { x: longitude, y: latitude },
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PointValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_system: Option<SystemCode>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformEnd {
    pub point: Point,
    pub system: SystemCode,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformReport {
    pub input: TransformEnd,
    pub output: TransformEnd,
    pub accuracy: &'static str,
}

/// Prepared source→target conversion; batch transforms resolve this once and
/// run every point through the same instance.
struct Converter {
    src: &'static SystemDef,
    dst: &'static SystemDef,
}

impl Converter {
    fn new(from: SystemCode, to: SystemCode) -> Self {
        Self { src: lookup(from), dst: lookup(to) }
    }

    fn apply(&self, point: Point) -> Point {
        // To geographic coordinates on the source datum.
        let (lon, lat) = match (&self.src.unit, &self.src.tm) {
            (Unit::Degree, _) => (point.x, point.y),
            (Unit::Meter, Some(tm)) => tm_inverse(tm, point.x, point.y),
            (Unit::Meter, None) => unreachable!("meter systems carry TM parameters"),
        };
        // Across datums via WGS84.
        let (lon, lat) = match &self.src.shift {
            Some(shift) => shift_to_wgs84(self.src.ellipsoid(), shift, lon, lat),
            None => (lon, lat),
        };
        let (lon, lat) = match &self.dst.shift {
            Some(shift) => shift_from_wgs84(self.dst.ellipsoid(), shift, lon, lat),
            None => (lon, lat),
        };
        // To the target representation.
        match (&self.dst.unit, &self.dst.tm) {
            (Unit::Degree, _) => Point { x: lon, y: lat },
            (Unit::Meter, Some(tm)) => {
                let (x, y) = tm_forward(tm, lon, lat);
                Point { x, y }
            }
            (Unit::Meter, None) => unreachable!("meter systems carry TM parameters"),
        }
    }
}

pub struct CoordEngine {
    strict_korea_bounds: bool,
}

impl Default for CoordEngine {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CoordEngine {
    pub fn new(strict_korea_bounds: bool) -> Self {
        Self { strict_korea_bounds }
    }

    pub fn supported_systems(&self) -> Vec<SystemCode> {
        SystemCode::ALL.to_vec()
    }

    pub fn transform(
        &self,
        point: Point,
        from: SystemCode,
        to: SystemCode,
    ) -> Result<Point, GatewayError> {
        if from == to {
            return Ok(point);
        }
        self.check_input(point, from)?;
        let converter = Converter::new(from, to);
        let out = converter.apply(point);
        self.warn_if_out_of_range(out, to);
        Ok(out)
    }

    /// Single-pass batch with one prepared converter.
    pub fn transform_batch(
        &self,
        points: &[Point],
        from: SystemCode,
        to: SystemCode,
    ) -> Result<Vec<Point>, GatewayError> {
        if from == to {
            return Ok(points.to_vec());
        }
        let converter = Converter::new(from, to);
        let mut out = Vec::with_capacity(points.len());
        for &point in points {
            self.check_input(point, from)?;
            let converted = converter.apply(point);
            self.warn_if_out_of_range(converted, to);
            out.push(converted);
        }
        Ok(out)
    }

    pub fn transform_with_metadata(
        &self,
        point: Point,
        from: SystemCode,
        to: SystemCode,
    ) -> Result<TransformReport, GatewayError> {
        let output = self.transform(point, from, to)?;
        Ok(TransformReport {
            input: TransformEnd { point, system: from },
            output: TransformEnd { point: output, system: to },
            accuracy: TRANSFORM_ACCURACY,
        })
    }

    /// First system whose numeric range covers the point; WGS84 leads by
    /// degree range, then each projected system by its box, in table order.
    pub fn detect_system(&self, point: Point) -> Option<SystemCode> {
        if !point.is_finite() {
            return None;
        }
        SYSTEMS.iter().find(|def| def.in_range(point.x, point.y)).map(|def| def.code)
    }

    pub fn validate_point(&self, point: Point, system: SystemCode) -> PointValidation {
        let def = lookup(system);
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if !point.is_finite() {
            errors.push("coordinates must be finite numbers".to_string());
        } else {
            match def.unit {
                Unit::Degree => {
                    if point.x < -180.0 || point.x > 180.0 {
                        errors.push(format!("longitude {} outside [-180, 180]", point.x));
                    }
                    if point.y < -90.0 || point.y > 90.0 {
                        errors.push(format!("latitude {} outside [-90, 90]", point.y));
                    }
                    if errors.is_empty()
                        && self.strict_korea_bounds
                        && !(point.x >= KOREA_LON_RANGE.0
                            && point.x <= KOREA_LON_RANGE.1
                            && point.y >= KOREA_LAT_RANGE.0
                            && point.y <= KOREA_LAT_RANGE.1)
                    {
                        warnings.push(format!(
                            "point ({}, {}) outside the expected Korean extent",
                            point.x, point.y
                        ));
                    }
                }
                Unit::Meter => {
                    if !def.in_range(point.x, point.y) {
                        warnings.push(format!(
                            "point ({}, {}) outside the expected {} range",
                            point.x, point.y, def.code
                        ));
                    }
                }
            }
        }

        PointValidation {
            valid: errors.is_empty(),
            errors,
            warnings,
            detected_system: self.detect_system(point),
        }
    }

    pub fn is_valid_point(&self, point: Point, system: SystemCode) -> bool {
        self.validate_point(point, system).valid
    }

    fn check_input(&self, point: Point, system: SystemCode) -> Result<(), GatewayError> {
        let validation = self.validate_point(point, system);
        for warning in &validation.warnings {
            warn!(system = %system, "{}", warning);
        }
        if !validation.valid {
            return Err(GatewayError::Coordinate {
                message: format!("invalid point for {}", system),
                details: Some(json!({ "errors": validation.errors })),
            });
        }
        Ok(())
    }

    fn warn_if_out_of_range(&self, point: Point, system: SystemCode) {
        let def = lookup(system);
        if point.is_finite() && !def.in_range(point.x, point.y) {
            warn!(system = %system, x = point.x, y = point.y, "transform_result_out_of_range");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEOUL: Point = Point { x: 126.9780, y: 37.5665 };
    const BUSAN: Point = Point { x: 129.0756, y: 35.1796 };
    const INCHEON: Point = Point { x: 126.7052, y: 37.4563 };
    const JEJU: Point = Point { x: 126.5312, y: 33.4996 };

    fn engine() -> CoordEngine {
        CoordEngine::new(true)
    }

    #[test]
    fn test_supported_systems_lists_all_seven() {
        let systems = engine().supported_systems();
        assert_eq!(systems.len(), 7);
        assert_eq!(systems[0], SystemCode::Wgs84);
    }

    #[test]
    fn test_seoul_city_hall_to_grs80_central() {
        let out = engine()
            .transform(SEOUL, SystemCode::Wgs84, SystemCode::Grs80Central)
            .unwrap();
        assert!((out.x - 198_056.37).abs() < 1.0, "easting off: {}", out.x);
        assert!((out.y - 551_885.03).abs() < 1.0, "northing off: {}", out.y);
    }

    #[test]
    fn test_same_system_is_identity() {
        for system in SystemCode::ALL {
            let p = Point::new(200_000.0, 500_000.0);
            let out = engine().transform(p, system, system).unwrap();
            assert_eq!(out, p, "identity must be exact for {}", system);
        }
    }

    #[test]
    fn test_round_trip_every_system_to_six_decimals() {
        let eng = engine();
        for &p in &[SEOUL, BUSAN, INCHEON, JEJU] {
            for system in SystemCode::ALL {
                if system == SystemCode::Wgs84 {
                    continue;
                }
                let projected = eng.transform(p, SystemCode::Wgs84, system).unwrap();
                let back = eng.transform(projected, system, SystemCode::Wgs84).unwrap();
                assert!(
                    (back.x - p.x).abs() < 1e-6,
                    "{}: lon drift {} at ({}, {})",
                    system,
                    back.x - p.x,
                    p.x,
                    p.y
                );
                assert!(
                    (back.y - p.y).abs() < 1e-6,
                    "{}: lat drift {} at ({}, {})",
                    system,
                    back.y - p.y,
                    p.x,
                    p.y
                );
            }
        }
    }

    #[test]
    fn test_round_trip_random_points_in_korea() {
        use rand::Rng;
        let eng = engine();
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let p = Point::new(rng.gen_range(125.0..129.5), rng.gen_range(33.5..38.5));
            for system in [
                SystemCode::Grs80Central,
                SystemCode::BesselCentral,
                SystemCode::Katec,
                SystemCode::UtmK,
            ] {
                let projected = eng.transform(p, SystemCode::Wgs84, system).unwrap();
                let back = eng.transform(projected, system, SystemCode::Wgs84).unwrap();
                assert!(
                    (back.x - p.x).abs() < 1e-6 && (back.y - p.y).abs() < 1e-6,
                    "{}: round trip drift ({}, {}) at ({}, {})",
                    system,
                    back.x - p.x,
                    back.y - p.y,
                    p.x,
                    p.y
                );
            }
        }
    }

    #[test]
    fn test_projected_to_projected_crosses_datums() {
        let eng = engine();
        let grs = eng.transform(SEOUL, SystemCode::Wgs84, SystemCode::Grs80Central).unwrap();
        let bessel = eng
            .transform(grs, SystemCode::Grs80Central, SystemCode::BesselCentral)
            .unwrap();
        let back = eng
            .transform(bessel, SystemCode::BesselCentral, SystemCode::Grs80Central)
            .unwrap();
        assert!((back.x - grs.x).abs() < 0.05, "easting drift {}", back.x - grs.x);
        assert!((back.y - grs.y).abs() < 0.05, "northing drift {}", back.y - grs.y);
        // After removing the false-northing offset, Korean 1985 still sits a
        // few hundred meters from Korea 2000 on the ground.
        let dx = bessel.x - grs.x;
        let dy = bessel.y - (grs.y - 100_000.0);
        let shift = (dx * dx + dy * dy).sqrt();
        assert!(
            (50.0..1_000.0).contains(&shift),
            "datum shift out of expected band: {} m",
            shift
        );
    }

    #[test]
    fn test_autodetect_after_transform() {
        let eng = engine();
        // Source points chosen so each target's box actually covers them.
        let cases: [(Point, SystemCode); 6] = [
            (SEOUL, SystemCode::Grs80Central),
            (Point::new(125.5, 36.5), SystemCode::Grs80West),
            (Point::new(129.3, 36.5), SystemCode::Grs80East),
            (Point::new(127.3845, 36.3504), SystemCode::BesselCentral),
            (Point::new(127.3845, 36.3504), SystemCode::Katec),
            (SEOUL, SystemCode::UtmK),
        ];
        for (source, target) in cases {
            let projected = eng.transform(source, SystemCode::Wgs84, target).unwrap();
            let detected = eng.detect_system(projected).expect("projected point detectable");
            let same_box = lookup(detected).x_range == lookup(target).x_range
                && lookup(detected).y_range == lookup(target).y_range;
            assert!(
                detected == target || same_box,
                "{} detected as {} without sharing a box",
                target,
                detected
            );
        }
        assert_eq!(eng.detect_system(SEOUL), Some(SystemCode::Wgs84));
    }

    #[test]
    fn test_detect_rejects_unplaceable_points() {
        let eng = engine();
        assert_eq!(eng.detect_system(Point::new(500.0, 500.0)), None);
        assert_eq!(eng.detect_system(Point::new(f64::NAN, 37.0)), None);
    }

    #[test]
    fn test_batch_matches_single_transforms() {
        let eng = engine();
        let points = [Point::new(200_000.0, 600_000.0), Point::new(200_100.0, 600_100.0)];
        let batch = eng
            .transform_batch(&points, SystemCode::Grs80Central, SystemCode::Wgs84)
            .unwrap();
        assert_eq!(batch.len(), 2);
        for (i, &p) in points.iter().enumerate() {
            let single = eng.transform(p, SystemCode::Grs80Central, SystemCode::Wgs84).unwrap();
            assert_eq!(batch[i], single, "batch and single must agree at index {}", i);
        }
        // The natural origin inverts to the central meridian exactly.
        assert!((batch[0].x - 127.0).abs() < 1e-9);
        assert!((batch[0].y - 38.0).abs() < 1e-9);
    }

    #[test]
    fn test_batch_rejects_invalid_member() {
        let eng = engine();
        let points = [SEOUL, Point::new(200.0, 37.0)];
        let err = eng
            .transform_batch(&points, SystemCode::Wgs84, SystemCode::Grs80Central)
            .unwrap_err();
        assert_eq!(err.code(), "COORDINATE_ERROR");
    }

    #[test]
    fn test_transform_with_metadata_shape() {
        let report = engine()
            .transform_with_metadata(SEOUL, SystemCode::Wgs84, SystemCode::Grs80Central)
            .unwrap();
        assert_eq!(report.input.system, SystemCode::Wgs84);
        assert_eq!(report.input.point, SEOUL);
        assert_eq!(report.output.system, SystemCode::Grs80Central);
        assert_eq!(report.accuracy, "<1m");
    }

    #[test]
    fn test_validate_degree_domain_errors() {
        let eng = engine();
        let v = eng.validate_point(Point::new(200.0, 95.0), SystemCode::Wgs84);
        assert!(!v.valid);
        assert_eq!(v.errors.len(), 2, "both axes out of domain: {:?}", v.errors);
        assert!(!eng.is_valid_point(Point::new(f64::INFINITY, 0.0), SystemCode::Wgs84));
    }

    #[test]
    fn test_validate_korea_bounds_is_warning_only() {
        let strict = CoordEngine::new(true);
        let v = strict.validate_point(Point::new(2.3522, 48.8566), SystemCode::Wgs84);
        assert!(v.valid, "outside Korea is a warning, not an error");
        assert_eq!(v.warnings.len(), 1);

        let relaxed = CoordEngine::new(false);
        let v = relaxed.validate_point(Point::new(2.3522, 48.8566), SystemCode::Wgs84);
        assert!(v.valid);
        assert!(v.warnings.is_empty(), "relaxed mode skips Korea-extent warnings");
    }

    #[test]
    fn test_validate_projected_out_of_box_warns() {
        let eng = engine();
        let v = eng.validate_point(Point::new(50_000.0, 100_000.0), SystemCode::Grs80Central);
        assert!(v.valid);
        assert_eq!(v.warnings.len(), 1);
        let inside = eng.validate_point(Point::new(198_056.0, 551_885.0), SystemCode::Grs80Central);
        assert!(inside.valid);
        assert!(inside.warnings.is_empty());
        assert_eq!(inside.detected_system, Some(SystemCode::Grs80Central));
    }

    #[test]
    fn test_transform_rejects_domain_violation() {
        let err = engine()
            .transform(Point::new(190.0, 37.0), SystemCode::Wgs84, SystemCode::Grs80Central)
            .unwrap_err();
        assert_eq!(err.code(), "COORDINATE_ERROR");
        let details = err.details().expect("coordinate errors carry details");
        assert!(details["errors"][0].as_str().unwrap().contains("longitude"));
    }

    #[test]
    fn test_normalize_point_maps_lon_lat_to_x_y() {
        let from_lonlat = normalize_point(&PointRepr::LonLat {
            longitude: 126.978,
            latitude: 37.5665,
        });
        assert_eq!(from_lonlat, Point::new(126.978, 37.5665));
        let from_xy = normalize_point(&PointRepr::Xy { x: 1.0, y: 2.0 });
        assert_eq!(from_xy, Point::new(1.0, 2.0));
    }
}
