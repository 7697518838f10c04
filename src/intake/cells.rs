//! Short-lived async locks keyed by rounded location buckets.
//!
//! Holding the locks for every bucket a report's duplicate radius touches
//! serialises "match, then create" for reports about the same spot, so two
//! simultaneous reports cannot both miss each other and open two incidents.
//!
//! Two reports within one radius of each other always share a bucket: each
//! report's box contains the other report's own bucket, and a bucket's key
//! depends only on where the bucket is. Longitude buckets wrap around the
//! antimeridian. Latitude bands close to the poles are one bucket each,
//! whatever the longitude.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::incident::GeoPoint;
use crate::incident::geo::EARTH_RADIUS_M;

/// Smallest bucket edge in degrees (≈111 m of latitude).
const MIN_CELL_DEG: f64 = 0.001;
/// Bands touching this latitude (north or south) ignore longitude.
const POLAR_LAT: f64 = 80.0;
const POLAR_LNG: i64 = i64::MIN;

/// `(lng bucket, lat bucket)`; `lng` is `POLAR_LNG` in polar bands.
type CellKey = (i64, i64);

/// Bucket layout for one radius. The edge is at least twice the radius in
/// degrees, so a box covers a handful of buckets at most, and divides 360
/// exactly so longitude buckets wrap cleanly.
#[derive(Debug, Clone, Copy)]
struct CellGrid {
    radius_m: f64,
    cell_deg: f64,
    ring: i64,
}

impl CellGrid {
    fn new(radius_m: f64) -> Self {
        let radius_m = radius_m.max(0.0);
        let span = (radius_m / EARTH_RADIUS_M).to_degrees();
        let ring = ((360.0 / (2.0 * span).max(MIN_CELL_DEG)).floor() as i64).max(1);
        Self {
            radius_m,
            cell_deg: 360.0 / ring as f64,
            ring,
        }
    }

    fn bucket(&self, deg: f64) -> i64 {
        (deg / self.cell_deg).floor() as i64
    }

    fn is_polar(&self, lat_bucket: i64) -> bool {
        let bottom = lat_bucket as f64 * self.cell_deg;
        bottom + self.cell_deg > POLAR_LAT || bottom < -POLAR_LAT
    }

    /// Longitude buckets (already wrapped) covering the box around `center`.
    fn lng_buckets(&self, center: GeoPoint) -> Vec<i64> {
        let angular = self.radius_m / EARTH_RADIUS_M;
        let s = angular.sin() / center.lat.to_radians().cos();
        if !s.is_finite() || s >= 1.0 {
            return (0..self.ring).collect();
        }
        let delta = s.asin().to_degrees();
        let lo = self.bucket(center.lng - delta);
        let hi = self.bucket(center.lng + delta);
        let count = (hi - lo + 1).min(self.ring);
        (lo..lo + count).map(|b| b.rem_euclid(self.ring)).collect()
    }

    /// Buckets overlapping the box around `center`, sorted for a stable
    /// lock order.
    fn cells_around(&self, center: GeoPoint) -> Vec<CellKey> {
        let lat_delta = (self.radius_m / EARTH_RADIUS_M).to_degrees();
        let lat0 = self.bucket((center.lat - lat_delta).max(-90.0));
        let lat1 = self.bucket((center.lat + lat_delta).min(90.0));

        let mut lng_buckets = None;
        let mut keys = Vec::new();
        for lat in lat0..=lat1 {
            if self.is_polar(lat) {
                keys.push((POLAR_LNG, lat));
                continue;
            }
            let lngs = lng_buckets.get_or_insert_with(|| self.lng_buckets(center));
            keys.extend(lngs.iter().map(|&lng| (lng, lat)));
        }
        keys.sort_unstable();
        keys.dedup();
        keys
    }
}

pub struct CellLocks {
    grid: CellGrid,
    cells: Mutex<HashMap<CellKey, Weak<AsyncMutex<()>>>>,
}

/// Releases all held buckets on drop.
pub struct CellGuard {
    _held: Vec<OwnedMutexGuard<()>>,
}

impl CellLocks {
    /// Locks for reports that merge within `radius_m` of each other.
    pub fn new(radius_m: f64) -> Self {
        Self {
            grid: CellGrid::new(radius_m),
            cells: Mutex::default(),
        }
    }

    pub async fn lock_around(&self, center: GeoPoint) -> CellGuard {
        let mut held = Vec::new();
        for key in self.grid.cells_around(center) {
            let cell = self.cell(key);
            held.push(cell.lock_owned().await);
        }
        CellGuard { _held: held }
    }

    fn cell(&self, key: CellKey) -> Arc<AsyncMutex<()>> {
        // A poisoned map only ever held weak pointers; keep using it.
        let mut cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cell) = cells.get(&key).and_then(Weak::upgrade) {
            return cell;
        }
        cells.retain(|_, w| w.strong_count() > 0);
        let cell = Arc::new(AsyncMutex::new(()));
        cells.insert(key, Arc::downgrade(&cell));
        cell
    }

    #[cfg(test)]
    fn live_cells(&self) -> usize {
        self.cells
            .lock()
            .map(|c| c.values().filter(|w| w.strong_count() > 0).count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::geo::haversine_m;
    use std::time::Duration;

    fn assert_shared(grid: &CellGrid, a: GeoPoint, b: GeoPoint) {
        let dist = haversine_m(a, b);
        assert!(dist <= grid.radius_m, "test points are {dist}m apart");
        let (ka, kb) = (grid.cells_around(a), grid.cells_around(b));
        assert!(ka.iter().any(|k| kb.contains(k)), "{ka:?} vs {kb:?}");
    }

    #[test]
    fn small_radius_touches_few_sorted_cells() {
        let keys = CellGrid::new(10.0).cells_around(GeoPoint::new(28.05, -26.10));
        assert!(!keys.is_empty() && keys.len() <= 4, "{keys:?}");
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn neighbours_straddling_a_boundary_share_a_cell() {
        // Points 2 m apart on either side of a bucket edge.
        let grid = CellGrid::new(10.0);
        assert_shared(
            &grid,
            GeoPoint::new(28.05, -26.09999),
            GeoPoint::new(28.05, -26.10001),
        );
    }

    #[test]
    fn neighbours_near_the_antimeridian_share_a_cell() {
        let grid = CellGrid::new(10.0);
        // One box crosses 180°, the other does not.
        assert_shared(
            &grid,
            GeoPoint::new(179.99992, -17.0),
            GeoPoint::new(179.99985, -17.0),
        );
        // Either side of 180°.
        assert_shared(
            &grid,
            GeoPoint::new(179.99996, -17.0),
            GeoPoint::new(-179.99996, -17.0),
        );
    }

    #[test]
    fn neighbours_across_the_polar_band_edge_share_a_cell() {
        let grid = CellGrid::new(10.0);
        assert_shared(
            &grid,
            GeoPoint::new(28.0, 79.99996),
            GeoPoint::new(28.0, 80.00004),
        );
        assert_shared(
            &grid,
            GeoPoint::new(-45.0, -79.99996),
            GeoPoint::new(-45.0, -80.00004),
        );
    }

    #[test]
    fn neighbours_across_the_pole_share_a_cell() {
        let grid = CellGrid::new(10.0);
        assert_shared(
            &grid,
            GeoPoint::new(0.0, 89.99996),
            GeoPoint::new(180.0, 89.99996),
        );
        let at_pole = grid.cells_around(GeoPoint::new(0.0, 90.0));
        assert!(at_pole.iter().all(|&(lng, _)| lng == POLAR_LNG), "{at_pole:?}");
    }

    #[test]
    fn large_radius_still_locks_few_cells() {
        let grid = CellGrid::new(2000.0);
        for center in [
            GeoPoint::new(28.05, -26.10),
            GeoPoint::new(179.999, 0.0),
            GeoPoint::new(-10.0, 79.99),
            GeoPoint::new(0.0, -89.999),
        ] {
            let keys = grid.cells_around(center);
            assert!(!keys.is_empty() && keys.len() <= 30, "{center:?}: {}", keys.len());
        }
    }

    #[tokio::test]
    async fn second_locker_waits_for_first() {
        let locks = Arc::new(CellLocks::new(10.0));
        let here = GeoPoint::new(28.05, -26.10);

        let first = locks.lock_around(here).await;
        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock_around(here).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(first);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn far_apart_reports_do_not_contend() {
        let locks = CellLocks::new(10.0);
        let _a = locks.lock_around(GeoPoint::new(28.05, -26.10)).await;
        let _b = locks.lock_around(GeoPoint::new(18.42, -33.92)).await;
    }

    #[tokio::test]
    async fn released_cells_are_pruned() {
        let locks = CellLocks::new(10.0);
        drop(locks.lock_around(GeoPoint::new(28.05, -26.10)).await);
        assert_eq!(locks.live_cells(), 0);
    }
}
