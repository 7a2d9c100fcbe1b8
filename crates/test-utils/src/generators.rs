//! Test data generators for synthetic rain fields.
//!
//! These generators create predictable, verifiable patterns, plus a
//! little-endian byte encoding standing in for the external grid codec.

use bytes::Bytes;

/// Creates a test grid with predictable values.
///
/// Each cell value is calculated as: `col * 1000 + row`
///
/// # Example
///
/// ```
/// use test_utils::create_test_grid;
///
/// let grid = create_test_grid(10, 5);
/// assert_eq!(grid.len(), 50);
/// assert_eq!(grid[1], 1000.0); // col=1, row=0
/// assert_eq!(grid[10], 1.0);   // col=0, row=1
/// ```
pub fn create_test_grid(width: usize, height: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            data.push((col * 1000 + row) as f32);
        }
    }
    data
}

/// Creates a rain rate field (mm/h) with a single circular storm cell.
///
/// Rate peaks at `peak` in the centre and falls off linearly to zero at
/// `radius` cells.
pub fn create_storm_cell(width: usize, height: usize, peak: f32, radius: f32) -> Vec<f32> {
    let center_x = width as f32 / 2.0;
    let center_y = height as f32 / 2.0;

    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            let dx = col as f32 - center_x;
            let dy = row as f32 - center_y;
            let dist = (dx * dx + dy * dy).sqrt();
            data.push((peak * (1.0 - dist / radius)).max(0.0));
        }
    }
    data
}

/// Creates a field with a uniform value.
pub fn create_uniform_field(width: usize, height: usize, value: f32) -> Vec<f32> {
    vec![value; width * height]
}

/// Creates a field with NaN (no-data) cells along the outer border.
pub fn with_missing_border(mut data: Vec<f32>, width: usize, height: usize) -> Vec<f32> {
    for row in 0..height {
        for col in 0..width {
            if row == 0 || col == 0 || row + 1 == height || col + 1 == width {
                data[row * width + col] = f32::NAN;
            }
        }
    }
    data
}

/// Encodes a field as little-endian f32 bytes.
pub fn encode_field(data: &[f32]) -> Bytes {
    data.iter()
        .flat_map(|v| v.to_le_bytes())
        .collect::<Vec<u8>>()
        .into()
}

/// Decodes little-endian f32 bytes. Trailing partial values are dropped.
pub fn decode_field(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
