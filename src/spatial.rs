use std::f64::consts::TAU;
use std::fmt;

use geo::{Area, Coord, LineString, Polygon};
use proj4rs::{proj::Proj, transform::transform};
use tracing::debug;

use crate::address::SiteTier;
use crate::batch::ResolvedDataset;
use crate::cache::Coordinate;
use crate::errors::{AppError, AppResult};

pub const DEFAULT_SCALE_METERS: f64 = 100.0;
const DEFAULT_DISC_SEGMENTS: usize = 64;
// shortest meridian degree on the WGS84 ellipsoid, rounded down
const MIN_METERS_PER_DEGREE_LAT: f64 = 110_500.0;
const GEOGRAPHIC_PROJ4: &str = "+proj=longlat +datum=WGS84 +no_defs +type=crs";

/// Transverse Mercator centered on `origin`; planar units are meters.
pub struct Projection {
    origin: Coordinate,
    geographic: Proj,
    planar: Proj,
}

impl Projection {
    pub fn centered_on(origin: Coordinate) -> AppResult<Self> {
        let geographic = build_proj(GEOGRAPHIC_PROJ4)?;
        let planar = build_proj(&format!(
            "+proj=tmerc +lat_0={} +lon_0={} +k=1 +x_0=0 +y_0=0 +datum=WGS84 +units=m +no_defs +type=crs",
            origin.lat, origin.lon
        ))?;
        Ok(Self {
            origin,
            geographic,
            planar,
        })
    }

    pub fn project(&self, coordinate: Coordinate) -> AppResult<Coord<f64>> {
        let mut point = (coordinate.lon.to_radians(), coordinate.lat.to_radians(), 0.0);
        transform(&self.geographic, &self.planar, &mut point)
            .map_err(|err| AppError::Projection(format!("forward transform failed: {err}")))?;
        Ok(Coord {
            x: point.0,
            y: point.1,
        })
    }

    pub fn unproject(&self, planar: Coord<f64>) -> AppResult<Coordinate> {
        let mut point = (planar.x, planar.y, 0.0);
        transform(&self.planar, &self.geographic, &mut point)
            .map_err(|err| AppError::Projection(format!("inverse transform failed: {err}")))?;
        let (lon, lat) = (point.0.to_degrees(), point.1.to_degrees());
        Coordinate::new(lat, lon)
            .ok_or_else(|| AppError::Projection(format!("inverse produced {lat}, {lon}")))
    }
}

impl fmt::Debug for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Projection")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

fn build_proj(definition: &str) -> AppResult<Proj> {
    Proj::from_proj_string(definition)
        .map_err(|err| AppError::Projection(format!("invalid PROJ.4 definition {definition}: {err}")))
}

#[derive(Debug, Clone)]
pub struct SpatialFootprint {
    pub site_id: String,
    pub tier: SiteTier,
    pub volume: f64,
    pub center: Coordinate,
    pub radius_m: f64,
    /// Planar disc around `(0, 0)` in a transverse Mercator centered on `center`.
    pub disc: Polygon<f64>,
}

impl SpatialFootprint {
    pub fn area_m2(&self) -> f64 {
        self.disc.unsigned_area()
    }

    pub fn geographic_ring(&self) -> AppResult<Vec<Coordinate>> {
        let projection = Projection::centered_on(self.center)?;
        self.disc
            .exterior()
            .coords()
            .map(|coord| projection.unproject(*coord))
            .collect()
    }

    fn overlap_with(&self, other: &SpatialFootprint) -> AppResult<Option<OverlapPair>> {
        if self.radius_m <= 0.0 || other.radius_m <= 0.0 {
            return Ok(None);
        }
        let reach = self.radius_m + other.radius_m;
        let lat_gap_m = (self.center.lat - other.center.lat).abs() * MIN_METERS_PER_DEGREE_LAT;
        if lat_gap_m >= reach {
            return Ok(None);
        }

        let distance_m = pair_distance(self.center, other.center)?;
        Ok((distance_m < reach).then(|| OverlapPair {
            first: self.site_id.clone(),
            second: other.site_id.clone(),
            distance_m,
            penetration_m: reach - distance_m,
        }))
    }
}

fn pair_distance(a: Coordinate, b: Coordinate) -> AppResult<f64> {
    let mut b_lon = b.lon;
    if b_lon - a.lon > 180.0 {
        b_lon -= 360.0;
    } else if a.lon - b_lon > 180.0 {
        b_lon += 360.0;
    }
    let mut mid_lon = (a.lon + b_lon) / 2.0;
    if mid_lon < -180.0 {
        mid_lon += 360.0;
    } else if mid_lon > 180.0 {
        mid_lon -= 360.0;
    }
    let midpoint = Coordinate::new((a.lat + b.lat) / 2.0, mid_lon)
        .ok_or_else(|| AppError::Projection(format!("no midpoint for {a:?} and {b:?}")))?;

    let local = Projection::centered_on(midpoint)?;
    let delta = local.project(a)? - local.project(b)?;
    Ok(delta.x.hypot(delta.y))
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverlapPair {
    pub first: String,
    pub second: String,
    pub distance_m: f64,
    pub penetration_m: f64,
}

#[derive(Debug)]
pub struct SpatialDerivation {
    pub footprints: Vec<SpatialFootprint>,
    pub overlaps: Vec<OverlapPair>,
    /// Site ids left out because they have no coordinate.
    pub unresolved: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SpatialWeightDeriver {
    scale_factor: f64,
}

impl Default for SpatialWeightDeriver {
    fn default() -> Self {
        Self::new(DEFAULT_SCALE_METERS)
    }
}

impl SpatialWeightDeriver {
    /// `scale_factor` is meters of radius per unit of volume.
    pub fn new(scale_factor: f64) -> Self {
        Self {
            scale_factor: if scale_factor.is_finite() { scale_factor.max(0.0) } else { 0.0 },
        }
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    pub fn radius_for(&self, volume: f64) -> f64 {
        if !volume.is_finite() || volume <= 0.0 {
            return 0.0;
        }
        volume * self.scale_factor
    }

    pub fn derive(&self, dataset: &ResolvedDataset) -> AppResult<SpatialDerivation> {
        let mut resolved = Vec::new();
        let mut unresolved = Vec::new();
        for site in &dataset.sites {
            match site.coordinate().coordinate() {
                Some(coordinate) => resolved.push((site, coordinate)),
                None => unresolved.push(site.record.site_id.clone()),
            }
        }

        let mut footprints = Vec::with_capacity(resolved.len());
        for (site, center) in resolved {
            let radius_m = self.radius_for(site.record.volume);
            footprints.push(SpatialFootprint {
                site_id: site.record.site_id.clone(),
                tier: site.record.tier.clone(),
                volume: site.record.volume,
                center,
                radius_m,
                disc: disc(radius_m),
            });
        }

        let overlaps = find_overlaps(&footprints)?;
        debug!(
            footprints = footprints.len(),
            overlaps = overlaps.len(),
            unresolved = unresolved.len(),
            "derived site footprints"
        );
        Ok(SpatialDerivation {
            footprints,
            overlaps,
            unresolved,
        })
    }
}

fn disc(radius: f64) -> Polygon<f64> {
    let ring: Vec<Coord<f64>> = (0..=DEFAULT_DISC_SEGMENTS)
        .map(|step| {
            let angle = TAU * (step % DEFAULT_DISC_SEGMENTS) as f64 / DEFAULT_DISC_SEGMENTS as f64;
            Coord {
                x: radius * angle.cos(),
                y: radius * angle.sin(),
            }
        })
        .collect();
    Polygon::new(LineString::from(ring), Vec::new())
}

/// Pairwise disc intersection; boundary contact does not count.
pub fn find_overlaps(footprints: &[SpatialFootprint]) -> AppResult<Vec<OverlapPair>> {
    let mut overlaps = Vec::new();
    for (i, j) in candidate_pairs(footprints.len()) {
        if let Some(pair) = footprints[i].overlap_with(&footprints[j])? {
            overlaps.push(pair);
        }
    }
    Ok(overlaps)
}

// Every unordered pair; a spatial index can narrow this without touching callers.
fn candidate_pairs(count: usize) -> impl Iterator<Item = (usize, usize)> {
    (0..count).flat_map(move |i| (i + 1..count).map(move |j| (i, j)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{KeyVariant, SiteRecord};
    use crate::batch::ResolvedSite;
    use crate::cache::ResolvedCoordinate;
    use crate::fallback::{Resolution, ResolutionSource};

    // ~1000 m of meridian arc at 40°N
    const KM_OF_LATITUDE: f64 = 1000.0 / 111_035.0;

    fn resolved_site(id: &str, volume: f64, coordinate: Option<Coordinate>) -> ResolvedSite {
        let (coordinate, source, precision) = match coordinate {
            Some(c) => (
                ResolvedCoordinate::Resolved(c),
                ResolutionSource::Precise,
                Some(KeyVariant::Precise),
            ),
            None => (ResolvedCoordinate::Unresolved, ResolutionSource::Unresolved, None),
        };
        ResolvedSite {
            record: SiteRecord::new(id).with_volume(volume),
            resolution: Resolution {
                coordinate,
                source,
                precision,
                external_calls: 1,
            },
        }
    }

    fn pair_dataset(radius_volume: f64) -> ResolvedDataset {
        ResolvedDataset {
            sites: vec![
                resolved_site("a", radius_volume, Coordinate::new(40.0, -89.0)),
                resolved_site("b", radius_volume, Coordinate::new(40.0 + KM_OF_LATITUDE, -89.0)),
            ],
        }
    }

    #[test]
    fn discs_one_kilometer_apart_overlap_only_when_radii_reach() {
        let deriver = SpatialWeightDeriver::new(100.0);

        let wide = deriver.derive(&pair_dataset(6.0)).unwrap();
        assert_eq!(wide.overlaps.len(), 1);
        let pair = &wide.overlaps[0];
        assert!((pair.distance_m - 1000.0).abs() < 5.0, "{}", pair.distance_m);
        assert!((pair.penetration_m - 200.0).abs() < 5.0);

        let narrow = deriver.derive(&pair_dataset(4.0)).unwrap();
        assert!(narrow.overlaps.is_empty());
    }

    #[test]
    fn far_away_sites_do_not_change_a_local_overlap() {
        // ~1000 m of meridian arc at 51.5°N
        let london_km = 1000.0 / 111_250.0;
        let london = |id: &str, dlat: f64| {
            resolved_site(id, 5.2, Coordinate::new(51.5 + dlat, -0.12))
        };
        let local = ResolvedDataset {
            sites: vec![london("city", 0.0), london("islington", london_km)],
        };
        let mut mixed = local.clone();
        mixed
            .sites
            .push(resolved_site("chicago", 5.2, Coordinate::new(41.88, -87.63)));
        mixed
            .sites
            .push(resolved_site("los-angeles", 5.2, Coordinate::new(34.05, -118.24)));

        let deriver = SpatialWeightDeriver::new(100.0);
        let alone = deriver.derive(&local).unwrap();
        let together = deriver.derive(&mixed).unwrap();

        assert_eq!(alone.overlaps.len(), 1);
        assert_eq!(together.overlaps.len(), 1);
        let pair = &together.overlaps[0];
        assert_eq!((pair.first.as_str(), pair.second.as_str()), ("city", "islington"));
        assert!((pair.distance_m - 1000.0).abs() < 10.0, "{}", pair.distance_m);
        assert!((pair.distance_m - alone.overlaps[0].distance_m).abs() < 0.01);

        let ring = together.footprints[0].geographic_ring().unwrap();
        let north = ring.iter().map(|c| c.lat).fold(f64::MIN, f64::max);
        let south = ring.iter().map(|c| c.lat).fold(f64::MAX, f64::min);
        let span_m = (north - south) * 111_250.0;
        assert!((span_m - 1040.0).abs() < 10.0, "{span_m}");
    }

    #[test]
    fn east_west_pair_distance_matches_the_ground_across_regions() {
        // one arc-minute of longitude at 60°N is ~930 m on WGS84
        let dataset = ResolvedDataset {
            sites: vec![
                resolved_site("oslo-west", 5.0, Coordinate::new(60.0, 10.0)),
                resolved_site("oslo-east", 5.0, Coordinate::new(60.0, 10.0 + 1.0 / 60.0)),
                resolved_site("sydney", 1.0, Coordinate::new(-33.9, 151.2)),
                resolved_site("lima", 1.0, Coordinate::new(-12.05, -77.04)),
            ],
        };

        let derivation = SpatialWeightDeriver::new(100.0).derive(&dataset).unwrap();

        assert_eq!(derivation.overlaps.len(), 1);
        let distance = derivation.overlaps[0].distance_m;
        assert!((distance - 930.0).abs() / 930.0 < 0.01, "{distance}");
    }

    #[test]
    fn projection_preserves_east_west_distances_away_from_the_equator() {
        // at 60°N a degree of longitude is about half a degree of latitude
        let projection = Projection::centered_on(Coordinate::new(60.0, 10.0).unwrap()).unwrap();
        let west = projection.project(Coordinate::new(60.0, 9.99).unwrap()).unwrap();
        let east = projection.project(Coordinate::new(60.0, 10.01).unwrap()).unwrap();
        let span = (east.x - west.x).abs();
        assert!((span - 1115.0).abs() < 10.0, "{span}");
    }

    #[test]
    fn unresolved_sites_are_excluded_and_listed() {
        let mut sites = Vec::new();
        for idx in 0..10 {
            let coordinate = if idx == 2 || idx == 5 {
                None
            } else {
                Coordinate::new(35.0 + idx as f64, -100.0)
            };
            sites.push(resolved_site(&idx.to_string(), 1.0, coordinate));
        }

        let derivation = SpatialWeightDeriver::default()
            .derive(&ResolvedDataset { sites })
            .unwrap();

        assert_eq!(derivation.footprints.len(), 8);
        assert_eq!(derivation.unresolved, vec!["2".to_string(), "5".to_string()]);
    }

    #[test]
    fn radius_scales_with_volume_and_disc_matches_it() {
        let deriver = SpatialWeightDeriver::new(250.0);
        let derivation = deriver
            .derive(&ResolvedDataset {
                sites: vec![resolved_site("solo", 4.0, Coordinate::new(-33.9, 151.2))],
            })
            .unwrap();

        let footprint = &derivation.footprints[0];
        assert_eq!(footprint.radius_m, 1000.0);
        let circle = std::f64::consts::PI * 1000.0 * 1000.0;
        assert!((footprint.area_m2() - circle).abs() / circle < 0.01);

        let ring = footprint.geographic_ring().unwrap();
        assert_eq!(ring.len(), DEFAULT_DISC_SEGMENTS + 1);
        assert!(ring.iter().all(|c| (c.lat + 33.9).abs() < 0.02));
    }

    #[test]
    fn zero_volume_overlaps_nothing() {
        let deriver = SpatialWeightDeriver::default();
        let dataset = ResolvedDataset {
            sites: vec![
                resolved_site("big", 50.0, Coordinate::new(40.0, -89.0)),
                resolved_site("empty", 0.0, Coordinate::new(40.0, -89.0)),
            ],
        };

        let derivation = deriver.derive(&dataset).unwrap();
        assert_eq!(derivation.footprints[1].radius_m, 0.0);
        assert!(derivation.overlaps.is_empty());
        assert_eq!(deriver.radius_for(-3.0), 0.0);
    }

    #[test]
    fn empty_dataset_derives_nothing() {
        let derivation = SpatialWeightDeriver::default()
            .derive(&ResolvedDataset::default())
            .unwrap();
        assert!(derivation.footprints.is_empty());
        assert!(derivation.overlaps.is_empty());
    }
}
