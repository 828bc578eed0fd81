// =============================================================================
// DATAGO — Projection & datum math
// =============================================================================
// Transverse-Mercator forward/inverse (Snyder series, sub-millimeter inside
// the Korean belts), geodetic↔geocentric conversion, and the 7-parameter
// position-vector Helmert shift used by the Bessel-datum systems. Pure f64,
// no external dependencies.
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    /// Semi-major axis, meters.
    pub a: f64,
    /// Inverse flattening.
    pub f_inv: f64,
}

impl Ellipsoid {
    pub const fn new(a: f64, f_inv: f64) -> Self {
        Self { a, f_inv }
    }

    pub fn e2(&self) -> f64 {
        let f = 1.0 / self.f_inv;
        f * (2.0 - f)
    }

    /// Second eccentricity squared.
    pub fn ep2(&self) -> f64 {
        let e2 = self.e2();
        e2 / (1.0 - e2)
    }
}

pub const WGS84_ELLIPSOID: Ellipsoid = Ellipsoid::new(6_378_137.0, 298.257_223_563);
pub const GRS80_ELLIPSOID: Ellipsoid = Ellipsoid::new(6_378_137.0, 298.257_222_101);
pub const BESSEL_ELLIPSOID: Ellipsoid = Ellipsoid::new(6_377_397.155, 299.152_812_8);

/// Transverse-Mercator parameterization: natural origin, scale factor, false
/// easting/northing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TmParams {
    pub ellipsoid: Ellipsoid,
    pub lat0_deg: f64,
    pub lon0_deg: f64,
    pub k0: f64,
    pub false_easting: f64,
    pub false_northing: f64,
}

/// Position-vector 7-parameter datum shift (EPSG 9606), local datum → WGS84.
/// Translations in meters, rotations in arc-seconds, scale in ppm — the
/// +towgs84 convention.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HelmertShift {
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
    pub rx_sec: f64,
    pub ry_sec: f64,
    pub rz_sec: f64,
    pub scale_ppm: f64,
}

const ARCSEC_TO_RAD: f64 = std::f64::consts::PI / (180.0 * 3600.0);

/// Meridional arc length from the equator to latitude phi (radians).
fn meridional_arc(ell: &Ellipsoid, phi: f64) -> f64 {
    let e2 = ell.e2();
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    ell.a
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
}

/// Geographic (degrees) → projected (meters).
pub fn tm_forward(tm: &TmParams, lon_deg: f64, lat_deg: f64) -> (f64, f64) {
    let ell = &tm.ellipsoid;
    let e2 = ell.e2();
    let ep2 = ell.ep2();
    let phi = lat_deg.to_radians();
    let lam = lon_deg.to_radians();
    let lam0 = tm.lon0_deg.to_radians();
    let phi0 = tm.lat0_deg.to_radians();

    let sin_phi = phi.sin();
    let cos_phi = phi.cos();
    let tan_phi = phi.tan();

    let n = ell.a / (1.0 - e2 * sin_phi * sin_phi).sqrt();
    let t = tan_phi * tan_phi;
    let c = ep2 * cos_phi * cos_phi;
    let a = (lam - lam0) * cos_phi;
    let a2 = a * a;
    let a3 = a2 * a;
    let a4 = a2 * a2;
    let a5 = a4 * a;
    let a6 = a4 * a2;

    let m = meridional_arc(ell, phi);
    let m0 = meridional_arc(ell, phi0);

    let x = tm.false_easting
        + tm.k0
            * n
            * (a + (1.0 - t + c) * a3 / 6.0
                + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a5 / 120.0);
    let y = tm.false_northing
        + tm.k0
            * (m - m0
                + n * tan_phi
                    * (a2 / 2.0
                        + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                        + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a6 / 720.0));
    (x, y)
}

/// Projected (meters) → geographic (degrees).
pub fn tm_inverse(tm: &TmParams, x: f64, y: f64) -> (f64, f64) {
    let ell = &tm.ellipsoid;
    let e2 = ell.e2();
    let ep2 = ell.ep2();
    let phi0 = tm.lat0_deg.to_radians();
    let lam0 = tm.lon0_deg.to_radians();

    let m0 = meridional_arc(ell, phi0);
    let m = m0 + (y - tm.false_northing) / tm.k0;

    let e1 = {
        let s = (1.0 - e2).sqrt();
        (1.0 - s) / (1.0 + s)
    };
    let mu = m / (ell.a * (1.0 - e2 / 4.0 - 3.0 * e2 * e2 / 64.0 - 5.0 * e2 * e2 * e2 / 256.0));

    let e1_2 = e1 * e1;
    let e1_3 = e1_2 * e1;
    let e1_4 = e1_2 * e1_2;
    // Footpoint latitude.
    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1_3 / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1_2 / 16.0 - 55.0 * e1_4 / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1_3 / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1_4 / 512.0) * (8.0 * mu).sin();

    let sin_phi1 = phi1.sin();
    let cos_phi1 = phi1.cos();
    let tan_phi1 = phi1.tan();

    let c1 = ep2 * cos_phi1 * cos_phi1;
    let t1 = tan_phi1 * tan_phi1;
    let n1 = ell.a / (1.0 - e2 * sin_phi1 * sin_phi1).sqrt();
    let r1 = ell.a * (1.0 - e2) / (1.0 - e2 * sin_phi1 * sin_phi1).powf(1.5);
    let d = (x - tm.false_easting) / (n1 * tm.k0);
    let d2 = d * d;
    let d3 = d2 * d;
    let d4 = d2 * d2;
    let d5 = d4 * d;
    let d6 = d4 * d2;

    let phi = phi1
        - (n1 * tan_phi1 / r1)
            * (d2 / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d4 / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1
                    - 252.0 * ep2
                    - 3.0 * c1 * c1)
                    * d6
                    / 720.0);
    let lam = lam0
        + (d - (1.0 + 2.0 * t1 + c1) * d3 / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1) * d5
                / 120.0)
            / cos_phi1;

    (lam.to_degrees(), phi.to_degrees())
}

/// Geographic (degrees, height in meters) → geocentric cartesian.
pub fn geodetic_to_geocentric(ell: &Ellipsoid, lon_deg: f64, lat_deg: f64, h: f64) -> [f64; 3] {
    let e2 = ell.e2();
    let phi = lat_deg.to_radians();
    let lam = lon_deg.to_radians();
    let sin_phi = phi.sin();
    let n = ell.a / (1.0 - e2 * sin_phi * sin_phi).sqrt();
    [
        (n + h) * phi.cos() * lam.cos(),
        (n + h) * phi.cos() * lam.sin(),
        (n * (1.0 - e2) + h) * sin_phi,
    ]
}

/// Geocentric cartesian → geographic (degrees, height). Iterative latitude,
/// converges in a handful of rounds anywhere near the surface.
pub fn geocentric_to_geodetic(ell: &Ellipsoid, xyz: [f64; 3]) -> (f64, f64, f64) {
    let [x, y, z] = xyz;
    let e2 = ell.e2();
    let lam = y.atan2(x);
    let p = x.hypot(y);

    let mut phi = z.atan2(p * (1.0 - e2));
    let mut h = 0.0;
    for _ in 0..10 {
        let sin_phi = phi.sin();
        let n = ell.a / (1.0 - e2 * sin_phi * sin_phi).sqrt();
        h = p / phi.cos() - n;
        let next = z.atan2(p * (1.0 - e2 * n / (n + h)));
        if (next - phi).abs() < 1e-13 {
            phi = next;
            break;
        }
        phi = next;
    }
    (lam.to_degrees(), phi.to_degrees(), h)
}

fn rotation_matrix(s: &HelmertShift) -> [[f64; 3]; 3] {
    let rx = s.rx_sec * ARCSEC_TO_RAD;
    let ry = s.ry_sec * ARCSEC_TO_RAD;
    let rz = s.rz_sec * ARCSEC_TO_RAD;
    [[1.0, -rz, ry], [rz, 1.0, -rx], [-ry, rx, 1.0]]
}

fn mat_vec(m: &[[f64; 3]; 3], v: [f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

fn invert3(m: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let det = m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);
    let inv_det = 1.0 / det;
    [
        [
            (m[1][1] * m[2][2] - m[1][2] * m[2][1]) * inv_det,
            (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv_det,
            (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv_det,
        ],
        [
            (m[1][2] * m[2][0] - m[1][0] * m[2][2]) * inv_det,
            (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv_det,
            (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv_det,
        ],
        [
            (m[1][0] * m[2][1] - m[1][1] * m[2][0]) * inv_det,
            (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv_det,
            (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv_det,
        ],
    ]
}

/// Local-datum geocentric → WGS84 geocentric.
pub fn helmert_forward(s: &HelmertShift, v: [f64; 3]) -> [f64; 3] {
    let m = 1.0 + s.scale_ppm * 1e-6;
    let rotated = mat_vec(&rotation_matrix(s), v);
    [
        s.dx + m * rotated[0],
        s.dy + m * rotated[1],
        s.dz + m * rotated[2],
    ]
}

/// WGS84 geocentric → local-datum geocentric; exact inverse of the forward
/// affine map so datum round-trips lose nothing.
pub fn helmert_inverse(s: &HelmertShift, v: [f64; 3]) -> [f64; 3] {
    let m = 1.0 + s.scale_ppm * 1e-6;
    let translated = [(v[0] - s.dx) / m, (v[1] - s.dy) / m, (v[2] - s.dz) / m];
    mat_vec(&invert3(&rotation_matrix(s)), translated)
}

/// 2D datum shift of a geographic point, local datum → WGS84.
pub fn shift_to_wgs84(local: &Ellipsoid, s: &HelmertShift, lon: f64, lat: f64) -> (f64, f64) {
    let xyz = geodetic_to_geocentric(local, lon, lat, 0.0);
    let shifted = helmert_forward(s, xyz);
    let (lon, lat, _) = geocentric_to_geodetic(&WGS84_ELLIPSOID, shifted);
    (lon, lat)
}

/// 2D datum shift of a geographic point, WGS84 → local datum.
pub fn shift_from_wgs84(local: &Ellipsoid, s: &HelmertShift, lon: f64, lat: f64) -> (f64, f64) {
    let xyz = geodetic_to_geocentric(&WGS84_ELLIPSOID, lon, lat, 0.0);
    let shifted = helmert_inverse(s, xyz);
    let (lon, lat, _) = geocentric_to_geodetic(local, shifted);
    (lon, lat)
}
