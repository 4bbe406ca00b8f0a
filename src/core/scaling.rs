//! Value scaling of timeseries layers.
//!
//! Backscatter is optionally converted to dB and clipped to [-30, 5],
//! coherence stays linear in [1e-6, 1], alpha angles clip to [1e-6, 90] and
//! entropy/anisotropy to [1e-6, 1]. A valid value that lands on exactly 0
//! after clipping (0 dB) is moved to `f32::MIN_POSITIVE`, and integer
//! outputs are stretched linearly to `1..=MAX` of the type, so 0 stays the
//! no-data value in every output type.

use crate::config::OutputDataType;

pub const NO_DATA: f32 = 0.0;

/// Replacement for a valid value equal to [`NO_DATA`]
pub const VALID_ZERO: f32 = f32::MIN_POSITIVE;

/// Which clipping range a layer uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductFamily {
    Backscatter,
    Coherence,
    Alpha,
    Entropy,
    Anisotropy,
}

impl ProductFamily {
    /// Family of a product/band pair as used in file names (`BS`, `coh`,
    /// `ha_alpha` with bands `Alpha`, `Entropy`, `Anisotropy`)
    pub fn for_band(product: &str, band: &str) -> Self {
        match (product, band) {
            (_, "Alpha") => ProductFamily::Alpha,
            (_, "Entropy") => ProductFamily::Entropy,
            (_, "Anisotropy") => ProductFamily::Anisotropy,
            ("coh", _) => ProductFamily::Coherence,
            _ => ProductFamily::Backscatter,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingRule {
    pub to_db: bool,
    pub min: f32,
    pub max: f32,
}

impl ScalingRule {
    /// `to_db` only applies to backscatter
    pub fn for_family(family: ProductFamily, to_db: bool) -> Self {
        match family {
            ProductFamily::Backscatter => Self { to_db, min: -30.0, max: 5.0 },
            ProductFamily::Coherence => Self { to_db: false, min: 1e-6, max: 1.0 },
            ProductFamily::Alpha => Self { to_db: false, min: 1e-6, max: 90.0 },
            ProductFamily::Entropy | ProductFamily::Anisotropy => Self { to_db: false, min: 1e-6, max: 1.0 },
        }
    }

    /// `gdal_calc.py` expression over band `A`. Pixels that are not
    /// positive (no-data, NaN) become [`NO_DATA`]; a valid result of exactly
    /// 0 becomes [`VALID_ZERO`].
    pub fn calc_expression(&self) -> String {
        let clipped = if self.to_db {
            format!("clip(10*log10(A),{},{})", self.min, self.max)
        } else {
            format!("clip(A,{},{})", self.min, self.max)
        };
        format!(
            "where(A>0,where({clipped}=={no_data},{valid_zero:e},{clipped}),{no_data})",
            clipped = clipped,
            no_data = NO_DATA,
            valid_zero = VALID_ZERO
        )
    }

    /// Parameters of a linear stretch `(src_min, src_max, dst_min, dst_max)`
    /// into an integer type, `None` for float output
    pub fn stretch(&self, data_type: OutputDataType) -> Option<(f64, f64, f64, f64)> {
        let dst_max = match data_type {
            OutputDataType::Float32 => return None,
            OutputDataType::UInt16 => u16::MAX as f64,
            OutputDataType::UInt8 => u8::MAX as f64,
        };
        Some((self.min as f64, self.max as f64, 1.0, dst_max))
    }
}
