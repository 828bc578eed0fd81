// =============================================================================
// DATAGO — Coordinate system registry
// =============================================================================
// The closed, table-driven set of seven Korean systems. Definitions never
// mutate at runtime; everything the engine needs (projection parameters,
// datum shift, autodetect box) hangs off one static table.
// =============================================================================

use super::proj::{
    Ellipsoid, HelmertShift, TmParams, BESSEL_ELLIPSOID, GRS80_ELLIPSOID, WGS84_ELLIPSOID,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemCode {
    Wgs84,
    Grs80Central,
    Grs80West,
    Grs80East,
    BesselCentral,
    Katec,
    UtmK,
}

impl SystemCode {
    pub const ALL: [SystemCode; 7] = [
        SystemCode::Wgs84,
        SystemCode::Grs80Central,
        SystemCode::Grs80West,
        SystemCode::Grs80East,
        SystemCode::BesselCentral,
        SystemCode::Katec,
        SystemCode::UtmK,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wgs84 => "WGS84",
            Self::Grs80Central => "GRS80_CENTRAL",
            Self::Grs80West => "GRS80_WEST",
            Self::Grs80East => "GRS80_EAST",
            Self::BesselCentral => "BESSEL_CENTRAL",
            Self::Katec => "KATEC",
            Self::UtmK => "UTM_K",
        }
    }
}

impl fmt::Display for SystemCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SystemCode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WGS84" => Ok(Self::Wgs84),
            "GRS80_CENTRAL" => Ok(Self::Grs80Central),
            "GRS80_WEST" => Ok(Self::Grs80West),
            "GRS80_EAST" => Ok(Self::Grs80East),
            "BESSEL_CENTRAL" => Ok(Self::BesselCentral),
            "KATEC" => Ok(Self::Katec),
            "UTM_K" => Ok(Self::UtmK),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Degree,
    Meter,
}

pub struct SystemDef {
    pub code: SystemCode,
    pub epsg: u32,
    pub proj4: &'static str,
    pub unit: Unit,
    pub tm: Option<TmParams>,
    /// Local datum → WGS84; None means WGS84-compatible.
    pub shift: Option<HelmertShift>,
    /// Autodetect/validation box, inclusive.
    pub x_range: (f64, f64),
    pub y_range: (f64, f64),
}

impl SystemDef {
    pub fn ellipsoid(&self) -> &Ellipsoid {
        match &self.tm {
            Some(tm) => &tm.ellipsoid,
            None => &WGS84_ELLIPSOID,
        }
    }

    pub fn in_range(&self, x: f64, y: f64) -> bool {
        x >= self.x_range.0 && x <= self.x_range.1 && y >= self.y_range.0 && y <= self.y_range.1
    }
}

/// Korean 1985 → WGS84 (the 7-parameter shift both Bessel systems carry).
const KOREAN_1985_TO_WGS84: HelmertShift = HelmertShift {
    dx: -115.80,
    dy: 474.99,
    dz: 674.11,
    rx_sec: 1.16,
    ry_sec: -2.31,
    rz_sec: -1.63,
    scale_ppm: 6.43,
};

/// Modified central meridian of the Korean 1985 belts: 127°00′10.405″E.
const BESSEL_CENTRAL_MERIDIAN: f64 = 127.002_890_277_777_8;

pub static SYSTEMS: [SystemDef; 7] = [
    SystemDef {
        code: SystemCode::Wgs84,
        epsg: 4326,
        proj4: "+proj=longlat +datum=WGS84 +no_defs",
        unit: Unit::Degree,
        tm: None,
        shift: None,
        x_range: (-180.0, 180.0),
        y_range: (-90.0, 90.0),
    },
    SystemDef {
        code: SystemCode::Grs80Central,
        epsg: 5186,
        proj4: "+proj=tmerc +lat_0=38 +lon_0=127 +k=1 +x_0=200000 +y_0=600000 +ellps=GRS80 +units=m +no_defs",
        unit: Unit::Meter,
        tm: Some(TmParams {
            ellipsoid: GRS80_ELLIPSOID,
            lat0_deg: 38.0,
            lon0_deg: 127.0,
            k0: 1.0,
            false_easting: 200_000.0,
            false_northing: 600_000.0,
        }),
        shift: None,
        x_range: (100_000.0, 300_000.0),
        y_range: (400_000.0, 800_000.0),
    },
    SystemDef {
        code: SystemCode::Grs80West,
        epsg: 5185,
        proj4: "+proj=tmerc +lat_0=38 +lon_0=125 +k=1 +x_0=200000 +y_0=600000 +ellps=GRS80 +units=m +no_defs",
        unit: Unit::Meter,
        tm: Some(TmParams {
            ellipsoid: GRS80_ELLIPSOID,
            lat0_deg: 38.0,
            lon0_deg: 125.0,
            k0: 1.0,
            false_easting: 200_000.0,
            false_northing: 600_000.0,
        }),
        shift: None,
        x_range: (100_000.0, 300_000.0),
        y_range: (400_000.0, 800_000.0),
    },
    SystemDef {
        code: SystemCode::Grs80East,
        epsg: 5187,
        proj4: "+proj=tmerc +lat_0=38 +lon_0=129 +k=1 +x_0=200000 +y_0=600000 +ellps=GRS80 +units=m +no_defs",
        unit: Unit::Meter,
        tm: Some(TmParams {
            ellipsoid: GRS80_ELLIPSOID,
            lat0_deg: 38.0,
            lon0_deg: 129.0,
            k0: 1.0,
            false_easting: 200_000.0,
            false_northing: 600_000.0,
        }),
        shift: None,
        x_range: (100_000.0, 300_000.0),
        y_range: (400_000.0, 800_000.0),
    },
    SystemDef {
        code: SystemCode::BesselCentral,
        epsg: 5174,
        proj4: "+proj=tmerc +lat_0=38 +lon_0=127.0028902777778 +k=1 +x_0=200000 +y_0=500000 +ellps=bessel +towgs84=-115.80,474.99,674.11,1.16,-2.31,-1.63,6.43 +units=m +no_defs",
        unit: Unit::Meter,
        tm: Some(TmParams {
            ellipsoid: BESSEL_ELLIPSOID,
            lat0_deg: 38.0,
            lon0_deg: BESSEL_CENTRAL_MERIDIAN,
            k0: 1.0,
            false_easting: 200_000.0,
            false_northing: 500_000.0,
        }),
        shift: Some(KOREAN_1985_TO_WGS84),
        x_range: (100_000.0, 300_000.0),
        y_range: (300_000.0, 700_000.0),
    },
    SystemDef {
        code: SystemCode::Katec,
        epsg: 102_080,
        proj4: "+proj=tmerc +lat_0=38 +lon_0=128 +k=0.9999 +x_0=200000 +y_0=500000 +ellps=bessel +towgs84=-115.80,474.99,674.11,1.16,-2.31,-1.63,6.43 +units=m +no_defs",
        unit: Unit::Meter,
        tm: Some(TmParams {
            ellipsoid: BESSEL_ELLIPSOID,
            lat0_deg: 38.0,
            lon0_deg: 128.0,
            k0: 0.9999,
            false_easting: 200_000.0,
            false_northing: 500_000.0,
        }),
        shift: Some(KOREAN_1985_TO_WGS84),
        x_range: (100_000.0, 300_000.0),
        y_range: (300_000.0, 700_000.0),
    },
    SystemDef {
        code: SystemCode::UtmK,
        epsg: 5179,
        proj4: "+proj=tmerc +lat_0=38 +lon_0=127.5 +k=0.9996 +x_0=1000000 +y_0=2000000 +ellps=GRS80 +units=m +no_defs",
        unit: Unit::Meter,
        tm: Some(TmParams {
            ellipsoid: GRS80_ELLIPSOID,
            lat0_deg: 38.0,
            lon0_deg: 127.5,
            k0: 0.9996,
            false_easting: 1_000_000.0,
            false_northing: 2_000_000.0,
        }),
        shift: None,
        x_range: (900_000.0, 1_100_000.0),
        y_range: (1_800_000.0, 2_200_000.0),
    },
];

pub fn lookup(code: SystemCode) -> &'static SystemDef {
    SYSTEMS
        .iter()
        .find(|def| def.code == code)
        .expect("every SystemCode has a table entry")
}
