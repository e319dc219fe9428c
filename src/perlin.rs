//! Deterministic multi-octave value noise for heightfield generation.
//!
//! A pure function of its settings: no map has to be loaded, and the same
//! settings always produce the same grid.

use std::f32::consts::PI;

#[derive(Clone, Copy, Debug)]
pub struct PerlinSettings {
    pub seed: i32,
    /// Feature size in grid units at the first octave.
    pub noise_size: f32,
    /// Amplitude falloff per octave, usually in `(0, 1)`.
    pub persistence: f32,
    pub octaves: u32,
}

impl Default for PerlinSettings {
    fn default() -> Self {
        Self {
            seed: 0,
            noise_size: 32.0,
            persistence: 0.5,
            octaves: 4,
        }
    }
}

/// Hash-based lattice noise in `[-1, 1]`.
fn raw_noise(x: i32, y: i32, seed: i32) -> f32 {
    let mut n = x
        .wrapping_add(y.wrapping_mul(57))
        .wrapping_add(seed.wrapping_mul(131));
    n = (n << 13) ^ n;

    let m = n
        .wrapping_mul(n.wrapping_mul(n).wrapping_mul(15731).wrapping_add(789_221))
        .wrapping_add(1_376_312_589)
        & 0x7fff_ffff;

    1.0 - m as f32 / 1_073_741_824.0
}

/// Corner/side/center weighted average of the lattice around a point.
fn smooth_noise(x: i32, y: i32, seed: i32) -> f32 {
    let corners = raw_noise(x - 1, y - 1, seed)
        + raw_noise(x + 1, y - 1, seed)
        + raw_noise(x - 1, y + 1, seed)
        + raw_noise(x + 1, y + 1, seed);
    let sides = raw_noise(x - 1, y, seed)
        + raw_noise(x + 1, y, seed)
        + raw_noise(x, y - 1, seed)
        + raw_noise(x, y + 1, seed);
    let center = raw_noise(x, y, seed);

    corners / 16.0 + sides / 8.0 + center / 4.0
}

fn cosine_interpolate(a: f32, b: f32, t: f32) -> f32 {
    let f = (1.0 - (t * PI).cos()) * 0.5;
    a * (1.0 - f) + b * f
}

fn interpolated_noise(x: f32, y: f32, seed: i32) -> f32 {
    let ix = x.floor() as i32;
    let iy = y.floor() as i32;
    let fx = x - ix as f32;
    let fy = y - iy as f32;

    let v00 = smooth_noise(ix, iy, seed);
    let v10 = smooth_noise(ix + 1, iy, seed);
    let v01 = smooth_noise(ix, iy + 1, seed);
    let v11 = smooth_noise(ix + 1, iy + 1, seed);

    let bottom = cosine_interpolate(v00, v10, fx);
    let top = cosine_interpolate(v01, v11, fx);
    cosine_interpolate(bottom, top, fy)
}

/// Generates a `size * size` grid of altitudes in `[0, 255]`.
pub fn generate(settings: &PerlinSettings, size: u32) -> Vec<f32> {
    let octaves = settings.octaves.max(1);
    let noise_size = settings.noise_size.max(1.0);

    let mut amplitude_total = 0.0;
    {
        let mut amplitude = 1.0;
        for _ in 0..octaves {
            amplitude_total += amplitude;
            amplitude *= settings.persistence;
        }
    }

    let mut heights = Vec::with_capacity((size * size) as usize);

    for y in 0..size {
        for x in 0..size {
            let mut total = 0.0;
            let mut frequency = 1.0;
            let mut amplitude = 1.0;

            for _ in 0..octaves {
                total += interpolated_noise(
                    x as f32 * frequency / noise_size,
                    y as f32 * frequency / noise_size,
                    settings.seed,
                ) * amplitude;

                frequency *= 2.0;
                amplitude *= settings.persistence;
            }

            let normalized = (total / amplitude_total) * 0.5 + 0.5;
            heights.push((normalized * 255.0).clamp(0.0, 255.0));
        }
    }

    heights
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_is_deterministic() {
        let settings = PerlinSettings {
            seed: 1234,
            ..Default::default()
        };
        let a = generate(&settings, 33);
        let b = generate(&settings, 33);
        assert_eq!(a, b);
    }

    #[test]
    fn different_seeds_differ() {
        let a = generate(
            &PerlinSettings {
                seed: 1,
                ..Default::default()
            },
            33,
        );
        let b = generate(
            &PerlinSettings {
                seed: 2,
                ..Default::default()
            },
            33,
        );
        assert_ne!(a, b);
    }

    #[test]
    fn output_stays_in_altitude_range() {
        let heights = generate(
            &PerlinSettings {
                seed: 77,
                noise_size: 8.0,
                persistence: 0.6,
                octaves: 5,
            },
            65,
        );
        assert_eq!(heights.len(), 65 * 65);
        assert!(heights.iter().all(|h| (0.0..=255.0).contains(h)));

        // Not a constant field.
        let min = heights.iter().cloned().fold(f32::INFINITY, f32::min);
        let max = heights.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        assert!(max - min > 1.0);
    }
}
