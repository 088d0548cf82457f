// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Projecting pointing onto the field's sky grid.

use ndarray::{ArrayView1, Zip};

use crate::config::FieldGeometry;

/// Something which can find the sky grid pixel that a pointing direction
/// falls in.
pub trait PixelProjector: Sync + Send {
    /// The flattened `[x][y]` pixel index for a single direction (degrees), or
    /// `None` if it lies off the grid.
    ///
    /// Returned indices are always less than `geometry.num_pixels()`.
    fn angle_to_pixel(&self, geometry: &FieldGeometry, dec_deg: f64, ra_deg: f64)
        -> Option<usize>;

    /// Project a series of directions, one pixel per sample.
    fn angles_to_pixels(
        &self,
        geometry: &FieldGeometry,
        dec_deg: ArrayView1<f64>,
        ra_deg: ArrayView1<f64>,
    ) -> Vec<Option<usize>> {
        let mut pixels = vec![None; dec_deg.len()];
        Zip::from(&mut pixels[..])
            .and(&dec_deg)
            .and(&ra_deg)
            .for_each(|pixel, &dec, &ra| *pixel = self.angle_to_pixel(geometry, dec, ra));
        pixels
    }
}

/// Gnomonic (tangent plane) projection about the field centre.
///
/// Right ascension increases towards negative `x`, matching the convention of
/// a sky image viewed from inside the celestial sphere.
#[derive(Debug, Default, Clone, Copy)]
pub struct GnomonicProjector;

impl GnomonicProjector {
    /// Offsets `(x, y)` in degrees on the tangent plane, or `None` for
    /// directions 90 degrees or more from the centre.
    pub fn tangent_plane_offsets(
        geometry: &FieldGeometry,
        dec_deg: f64,
        ra_deg: f64,
    ) -> Option<(f64, f64)> {
        let (dec0, ra0) = (
            geometry.centre_dec_deg.to_radians(),
            geometry.centre_ra_deg.to_radians(),
        );
        let (dec, ra) = (dec_deg.to_radians(), ra_deg.to_radians());
        let (sin_dec0, cos_dec0) = dec0.sin_cos();
        let (sin_dec, cos_dec) = dec.sin_cos();
        let (sin_dra, cos_dra) = (ra - ra0).sin_cos();

        let cos_c = sin_dec0 * sin_dec + cos_dec0 * cos_dec * cos_dra;
        if cos_c <= 0.0 {
            return None;
        }
        let x = cos_dec * sin_dra / cos_c;
        let y = (cos_dec0 * sin_dec - sin_dec0 * cos_dec * cos_dra) / cos_c;
        Some((x.to_degrees(), y.to_degrees()))
    }
}

impl PixelProjector for GnomonicProjector {
    fn angle_to_pixel(
        &self,
        geometry: &FieldGeometry,
        dec_deg: f64,
        ra_deg: f64,
    ) -> Option<usize> {
        if !dec_deg.is_finite() || !ra_deg.is_finite() {
            return None;
        }
        let (x, y) = Self::tangent_plane_offsets(geometry, dec_deg, ra_deg)?;
        let half = geometry.nside as f64 / 2.0;
        let ix = (x / -geometry.dpix_deg + half).floor();
        let iy = (y / geometry.dpix_deg + half).floor();
        let nside = geometry.nside as f64;
        if ix < 0.0 || iy < 0.0 || ix >= nside || iy >= nside {
            return None;
        }
        Some(ix as usize * geometry.nside + iy as usize)
    }
}
