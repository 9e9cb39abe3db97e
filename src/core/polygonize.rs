//! Raster-to-vector conversion of thresholded index rasters.
//!
//! Cells above the threshold are grouped into connected regions, and the
//! boundary of every region is walked along cell edges into closed rings.
//! Rings are built in pixel-corner space (x = column, y = row) and mapped
//! through the raster's affine transform afterwards.
//!
//! Boundary edges are oriented with the region on their right in pixel space.
//! Where two region cells touch only at a corner the walk turns right
//! (hugging the current cell) for 4-connectivity and left (crossing to the
//! diagonal cell) for 8-connectivity, so rings follow the same adjacency rule
//! as the region labelling.

use crate::types::{BinaryMask, Connectivity, GeoTransform, IndexRaster, Threshold, WaterError, WaterResult};
use geo::{Area, Coord, LineString, Polygon};
use ndarray::Array2;
use std::collections::{HashMap, VecDeque};
use std::time::Instant;

/// Options controlling region tracing
#[derive(Debug, Clone, Copy)]
pub struct TraceOptions {
    pub connectivity: Connectivity,
    /// Regions with fewer cells are dropped (1 keeps everything)
    pub min_region_cells: usize,
    /// Abort with `DeadlineExceeded` once this instant has passed
    pub deadline: Option<Instant>,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            connectivity: Connectivity::Four,
            min_region_cells: 1,
            deadline: None,
        }
    }
}

/// Threshold the index: 1 where `index > threshold`, 0 elsewhere (NaN included)
pub fn build_mask(index: &IndexRaster, threshold: Threshold) -> BinaryMask {
    let t = threshold.value();
    BinaryMask {
        cells: index.values.mapv(|v| u8::from(v > t)),
        transform: index.transform,
    }
}

/// Sum of polygon areas (holes excluded) in world units
pub fn total_area(polygons: &[Polygon<f64>]) -> f64 {
    polygons.iter().map(|p| p.unsigned_area()).sum()
}

/// Corner position in pixel space
type Vertex = (i64, i64);

#[derive(Debug, Clone, Copy)]
struct Edge {
    start: Vertex,
    end: Vertex,
}

impl Edge {
    fn direction(&self) -> Vertex {
        (self.end.0 - self.start.0, self.end.1 - self.start.1)
    }
}

/// Right-hand turn of a direction in y-down pixel space
fn turn_right(d: Vertex) -> Vertex {
    (-d.1, d.0)
}

fn turn_left(d: Vertex) -> Vertex {
    (d.1, -d.0)
}

/// Polygon extractor for thresholded index rasters
#[derive(Debug, Clone, Default)]
pub struct PolygonExtractor {
    options: TraceOptions,
}

impl PolygonExtractor {
    pub fn new(options: TraceOptions) -> Self {
        Self { options }
    }

    /// Threshold `index` and trace the resulting mask
    pub fn extract(&self, index: &IndexRaster, threshold: Threshold) -> WaterResult<Vec<Polygon<f64>>> {
        let mask = build_mask(index, threshold);
        log::debug!(
            "Mask at threshold {}: {} of {} cells set",
            threshold.value(),
            mask.count_ones(),
            mask.cells.len()
        );
        self.trace(&mask)
    }

    /// Trace every connected region of 1-cells into a georeferenced polygon.
    ///
    /// Polygons come out in row-major order of each region's first cell.
    pub fn trace(&self, mask: &BinaryMask) -> WaterResult<Vec<Polygon<f64>>> {
        let (rows, cols) = mask.shape();
        let mut labels = Array2::<u32>::zeros((rows, cols));
        let mut polygons = Vec::new();
        let mut next_label = 0u32;

        for row in 0..rows {
            for col in 0..cols {
                if mask.cells[[row, col]] != 1 || labels[[row, col]] != 0 {
                    continue;
                }
                self.check_deadline()?;

                next_label += 1;
                let cells = self.label_region(mask, &mut labels, (row, col), next_label);
                if cells.len() < self.options.min_region_cells {
                    continue;
                }

                let rings = self.region_rings(&labels, &cells, next_label)?;
                let polygon = rings_to_polygon(rings, &mask.transform);
                if polygon.unsigned_area() > 0.0 {
                    polygons.push(polygon);
                }
            }
        }

        log::debug!("Traced {} region(s) into {} polygon(s)", next_label, polygons.len());
        Ok(polygons)
    }

    fn check_deadline(&self) -> WaterResult<()> {
        match self.options.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(WaterError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    fn neighbours(&self) -> &'static [(i64, i64)] {
        const FOUR: [(i64, i64); 4] = [(-1, 0), (0, -1), (0, 1), (1, 0)];
        const EIGHT: [(i64, i64); 8] = [
            (-1, -1),
            (-1, 0),
            (-1, 1),
            (0, -1),
            (0, 1),
            (1, -1),
            (1, 0),
            (1, 1),
        ];
        match self.options.connectivity {
            Connectivity::Four => &FOUR,
            Connectivity::Eight => &EIGHT,
        }
    }

    /// Breadth-first labelling of the region containing `seed`
    fn label_region(
        &self,
        mask: &BinaryMask,
        labels: &mut Array2<u32>,
        seed: (usize, usize),
        label: u32,
    ) -> Vec<(usize, usize)> {
        let (rows, cols) = mask.shape();
        let mut cells = Vec::new();
        let mut queue = VecDeque::new();
        labels[seed] = label;
        queue.push_back(seed);

        while let Some((row, col)) = queue.pop_front() {
            cells.push((row, col));
            for &(dr, dc) in self.neighbours() {
                let nr = row as i64 + dr;
                let nc = col as i64 + dc;
                if nr < 0 || nc < 0 || nr >= rows as i64 || nc >= cols as i64 {
                    continue;
                }
                let next = (nr as usize, nc as usize);
                if mask.cells[next] == 1 && labels[next] == 0 {
                    labels[next] = label;
                    queue.push_back(next);
                }
            }
        }
        cells
    }

    /// Closed rings (pixel space) bounding one labelled region, exterior first
    fn region_rings(&self, labels: &Array2<u32>, cells: &[(usize, usize)], label: u32) -> WaterResult<Vec<Vec<Vertex>>> {
        let (rows, cols) = labels.dim();
        let member = |r: i64, c: i64| -> bool {
            r >= 0 && c >= 0 && r < rows as i64 && c < cols as i64 && labels[[r as usize, c as usize]] == label
        };

        let mut edges = Vec::new();
        for &(row, col) in cells {
            let (r, c) = (row as i64, col as i64);
            if !member(r - 1, c) {
                edges.push(Edge { start: (c, r), end: (c + 1, r) });
            }
            if !member(r, c + 1) {
                edges.push(Edge { start: (c + 1, r), end: (c + 1, r + 1) });
            }
            if !member(r + 1, c) {
                edges.push(Edge { start: (c + 1, r + 1), end: (c, r + 1) });
            }
            if !member(r, c - 1) {
                edges.push(Edge { start: (c, r + 1), end: (c, r) });
            }
        }

        let mut outgoing: HashMap<Vertex, Vec<usize>> = HashMap::with_capacity(edges.len());
        for (i, edge) in edges.iter().enumerate() {
            outgoing.entry(edge.start).or_default().push(i);
        }

        // The first cell's top edge always lies on the exterior boundary
        let mut used = vec![false; edges.len()];
        let mut rings = Vec::new();
        for start in 0..edges.len() {
            if used[start] {
                continue;
            }
            self.check_deadline()?;
            rings.push(self.walk_ring(&edges, &outgoing, &mut used, start));
        }
        Ok(rings)
    }

    fn walk_ring(
        &self,
        edges: &[Edge],
        outgoing: &HashMap<Vertex, Vec<usize>>,
        used: &mut [bool],
        start: usize,
    ) -> Vec<Vertex> {
        let mut ring = vec![edges[start].start];
        used[start] = true;
        let mut current = start;

        loop {
            let edge = edges[current];
            let candidates: Vec<usize> = outgoing
                .get(&edge.end)
                .map(|list| {
                    list.iter()
                        .copied()
                        .filter(|&i| !used[i] || i == start)
                        .collect()
                })
                .unwrap_or_default();

            let next = match candidates.as_slice() {
                [] => break,
                [only] => *only,
                several => {
                    let wanted = match self.options.connectivity {
                        Connectivity::Four => turn_right(edge.direction()),
                        Connectivity::Eight => turn_left(edge.direction()),
                    };
                    several
                        .iter()
                        .copied()
                        .find(|&i| edges[i].direction() == wanted)
                        .unwrap_or(several[0])
                }
            };

            if next == start {
                break;
            }
            ring.push(edge.end);
            used[next] = true;
            current = next;
        }

        remove_collinear(ring)
    }
}

/// Drop vertices lying on a straight run between their neighbours
fn remove_collinear(ring: Vec<Vertex>) -> Vec<Vertex> {
    let n = ring.len();
    if n < 4 {
        return ring;
    }
    let signum = |a: Vertex, b: Vertex| ((b.0 - a.0).signum(), (b.1 - a.1).signum());

    (0..n)
        .filter(|&i| {
            let prev = ring[(i + n - 1) % n];
            let next = ring[(i + 1) % n];
            signum(prev, ring[i]) != signum(ring[i], next)
        })
        .map(|i| ring[i])
        .collect()
}

fn to_world(ring: &[Vertex], transform: &GeoTransform) -> LineString<f64> {
    ring.iter()
        .map(|&(x, y)| {
            let (wx, wy) = transform.apply(x as f64, y as f64);
            Coord { x: wx, y: wy }
        })
        .collect()
}

fn rings_to_polygon(rings: Vec<Vec<Vertex>>, transform: &GeoTransform) -> Polygon<f64> {
    let mut rings = rings.iter().map(|ring| to_world(ring, transform));
    let exterior = rings.next().unwrap_or_else(|| LineString::new(Vec::new()));
    // Polygon::new closes every ring
    Polygon::new(exterior, rings.collect())
}
