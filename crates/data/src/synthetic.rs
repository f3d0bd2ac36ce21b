//! Deterministic MNIST-like digits for tests and demos.
//!
//! Digit 1 is a near-vertical stroke, digit 0 an ellipse ring, digit 7 a top
//! bar with a diagonal. Each image gets a random placement and a sprinkle of
//! background noise.

use ndarray::Array3;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Side length of generated images.
pub const IMAGE_SIDE: usize = 28;

/// Generate `n` raw `u8` images with digit labels drawn from {0, 1, 7}.
///
/// About 45% zeros, 45% ones and 10% sevens, so that digit selection has
/// something to discard.
pub fn synthetic_digits(n: usize, seed: u64) -> (Array3<u8>, Vec<u8>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut images = Array3::<u8>::zeros((n, IMAGE_SIDE, IMAGE_SIDE));
    let mut labels = Vec::with_capacity(n);

    for i in 0..n {
        let roll: f64 = rng.gen();
        let digit = if roll < 0.45 {
            0
        } else if roll < 0.9 {
            1
        } else {
            7
        };
        labels.push(digit);

        let mut canvas = [[0u8; IMAGE_SIDE]; IMAGE_SIDE];
        match digit {
            0 => draw_ring(&mut canvas, &mut rng),
            1 => draw_stroke(&mut canvas, &mut rng),
            _ => draw_seven(&mut canvas, &mut rng),
        }
        sprinkle(&mut canvas, &mut rng);

        for r in 0..IMAGE_SIDE {
            for c in 0..IMAGE_SIDE {
                images[[i, r, c]] = canvas[r][c];
            }
        }
    }

    (images, labels)
}

fn plot(canvas: &mut [[u8; IMAGE_SIDE]; IMAGE_SIDE], r: f64, c: f64, value: u8) {
    let (r, c) = (r.round(), c.round());
    if r < 0.0 || c < 0.0 {
        return;
    }
    let (r, c) = (r as usize, c as usize);
    if r < IMAGE_SIDE && c < IMAGE_SIDE {
        canvas[r][c] = canvas[r][c].max(value);
    }
}

fn draw_ring<R: Rng>(canvas: &mut [[u8; IMAGE_SIDE]; IMAGE_SIDE], rng: &mut R) {
    let cr = 14.0 + rng.gen_range(-2.0..2.0);
    let cc = 14.0 + rng.gen_range(-2.0..2.0);
    let ry = rng.gen_range(7.0..10.0);
    let rx = rng.gen_range(4.5..7.5);
    for step in 0..240 {
        let t = step as f64 / 240.0 * std::f64::consts::TAU;
        for thick in [-0.6, 0.0, 0.6] {
            let r = cr + (ry + thick) * t.sin();
            let c = cc + (rx + thick) * t.cos();
            plot(canvas, r, c, rng.gen_range(180..=255));
        }
    }
}

fn draw_stroke<R: Rng>(canvas: &mut [[u8; IMAGE_SIDE]; IMAGE_SIDE], rng: &mut R) {
    let top = rng.gen_range(3.0..7.0);
    let bottom = rng.gen_range(21.0..25.0);
    let col = 14.0 + rng.gen_range(-3.0..3.0);
    let slant = rng.gen_range(-0.25..0.25);
    let mut r = top;
    while r <= bottom {
        let c = col + slant * (r - 14.0);
        for dc in [-0.5, 0.5] {
            plot(canvas, r, c + dc, rng.gen_range(180..=255));
        }
        r += 0.5;
    }
}

fn draw_seven<R: Rng>(canvas: &mut [[u8; IMAGE_SIDE]; IMAGE_SIDE], rng: &mut R) {
    let top = rng.gen_range(4.0..8.0);
    let left = rng.gen_range(6.0..10.0);
    let right = rng.gen_range(18.0..22.0);
    let mut c = left;
    while c <= right {
        plot(canvas, top, c, 230);
        c += 0.5;
    }
    let mut t = 0.0;
    while t <= 1.0 {
        let r = top + t * (24.0 - top);
        let c = right - t * (right - 12.0);
        plot(canvas, r, c, 230);
        t += 0.02;
    }
}

fn sprinkle<R: Rng>(canvas: &mut [[u8; IMAGE_SIDE]; IMAGE_SIDE], rng: &mut R) {
    for row in canvas.iter_mut() {
        for px in row.iter_mut() {
            if rng.gen_bool(0.01) {
                *px = (*px).max(rng.gen_range(60..=255));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_requested_count_and_classes() {
        let (images, labels) = synthetic_digits(200, 1);
        assert_eq!(images.dim(), (200, IMAGE_SIDE, IMAGE_SIDE));
        assert_eq!(labels.len(), 200);
        assert!(labels.iter().all(|l| [0, 1, 7].contains(l)));
        assert!(labels.iter().filter(|&&l| l == 0).count() > 50);
        assert!(labels.iter().filter(|&&l| l == 1).count() > 50);
    }

    #[test]
    fn seed_determines_output() {
        assert_eq!(synthetic_digits(20, 5), synthetic_digits(20, 5));
        assert_ne!(synthetic_digits(20, 5).0, synthetic_digits(20, 6).0);
    }

    #[test]
    fn rings_have_more_ink_than_strokes() {
        let (images, labels) = synthetic_digits(100, 2);
        let ink = |d: u8| {
            let (sum, count) = labels
                .iter()
                .enumerate()
                .filter(|(_, &l)| l == d)
                .fold((0u64, 0u64), |(s, c), (i, _)| {
                    let bright = images
                        .index_axis(ndarray::Axis(0), i)
                        .iter()
                        .filter(|&&p| p > 127)
                        .count() as u64;
                    (s + bright, c + 1)
                });
            sum as f64 / count as f64
        };
        assert!(ink(0) > ink(1));
    }
}
