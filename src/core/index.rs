use crate::types::{IndexRaster, RasterBand, Sample, WaterError, WaterResult};
use ndarray::Zip;

/// Allowed transform mismatch, as a fraction of a pixel
const ALIGNMENT_TOLERANCE: f64 = 1e-6;

/// Normalized difference water index calculator
#[derive(Debug, Clone, Copy)]
pub struct IndexCalculator {
    /// Sensor bit-depth maximum (255 for 8-bit products)
    bit_depth_max: f64,
}

impl Default for IndexCalculator {
    fn default() -> Self {
        Self { bit_depth_max: 255.0 }
    }
}

impl IndexCalculator {
    pub fn new(bit_depth_max: f64) -> WaterResult<Self> {
        if !(bit_depth_max.is_finite() && bit_depth_max > 0.0) {
            return Err(WaterError::Config(format!(
                "Bit-depth maximum must be positive, got {}",
                bit_depth_max
            )));
        }
        Ok(Self { bit_depth_max })
    }

    pub fn bit_depth_max(&self) -> f64 {
        self.bit_depth_max
    }

    /// Compute `(green - nir) / (green + nir)` on samples normalized to [0, 1].
    ///
    /// Both bands are consumed. Nodata cells and cells where the sum vanishes
    /// come out as NaN.
    pub fn compute(&self, green: RasterBand, nir: RasterBand) -> WaterResult<IndexRaster> {
        check_alignment(&green, &nir)?;
        log::debug!("Computing water index over {:?} cells", green.shape());

        let scale = self.bit_depth_max;
        let cell = |g: &Sample, n: &Sample| -> Sample {
            if green.is_nodata(*g) || nir.is_nodata(*n) {
                return f64::NAN;
            }
            normalized_difference(g / scale, n / scale)
        };

        #[cfg(feature = "parallel")]
        let values = Zip::from(&green.data).and(&nir.data).par_map_collect(cell);

        #[cfg(not(feature = "parallel"))]
        let values = Zip::from(&green.data).and(&nir.data).map_collect(cell);

        let index = IndexRaster {
            values,
            transform: green.transform,
            crs: green.crs,
        };
        log::debug!("{} of {} index cells defined", index.defined_cells(), index.values.len());
        Ok(index)
    }
}

/// `(a - b) / (a + b)`, NaN where the denominator is zero
pub fn normalized_difference(a: f64, b: f64) -> f64 {
    let sum = a + b;
    if sum == 0.0 {
        return f64::NAN;
    }
    (a - b) / sum
}

fn check_alignment(green: &RasterBand, nir: &RasterBand) -> WaterResult<()> {
    if green.shape() != nir.shape() {
        return Err(WaterError::Alignment(format!(
            "Band shapes differ: green {:?}, nir {:?}",
            green.shape(),
            nir.shape()
        )));
    }
    if !green.transform.aligned_with(&nir.transform, ALIGNMENT_TOLERANCE) {
        return Err(WaterError::Alignment(format!(
            "Band grids differ: green {:?}, nir {:?}",
            green.transform, nir.transform
        )));
    }
    Ok(())
}
