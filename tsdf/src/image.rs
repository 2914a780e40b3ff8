//! Image types used for depth / color input and raycast output
use crate::{Error, ThreadPool};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Image size in pixels
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    width: u32,
    height: u32,
}

impl ImageSize {
    /// Builds a new image size
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns the width of the image, in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Returns the height of the image, in pixels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Returns the total number of pixels
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Checks whether either dimension is zero
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl Default for ImageSize {
    fn default() -> Self {
        Self::new(640, 480)
    }
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}×{}", self.width, self.height)
    }
}

/// Row-major raster of pixels
///
/// Pixels are addressed by flat offset or by `(row, column)`; row 0 is the
/// top of the image, matching the camera's `+y`-down convention.
#[derive(Clone, Debug, PartialEq)]
pub struct Image<P> {
    data: Vec<P>,
    size: ImageSize,
}

/// Depth map in meters; non-positive or NaN pixels are invalid
pub type DepthImage = Image<f32>;

/// 8-bit RGB input image
pub type ColorImage = Image<[u8; 3]>;

/// Per-pixel 3D positions; invalid pixels are NaN in every channel
pub type PointImage = Image<[f32; 3]>;

/// Per-pixel unit normals; invalid pixels are NaN in every channel
pub type NormalImage = Image<[f32; 3]>;

/// Per-pixel RGB in `[0, 255]`; invalid pixels are NaN in every channel
pub type RgbImage = Image<[f32; 3]>;

impl<P: Default + Clone> Image<P> {
    /// Builds an image of default-valued pixels
    pub fn new(size: ImageSize) -> Self {
        Self::filled(size, P::default())
    }
}

impl<P: Clone> Image<P> {
    /// Builds a new image with every pixel set to `value`
    pub fn filled(size: ImageSize, value: P) -> Self {
        Self {
            data: vec![value; size.pixel_count()],
            size,
        }
    }
}

impl<P> Image<P> {
    /// Builds an image from row-major pixel data
    pub fn from_vec(size: ImageSize, data: Vec<P>) -> Result<Self, Error> {
        if data.len() != size.pixel_count() {
            return Err(Error::BadImageData(data.len(), size));
        }
        Ok(Self { data, size })
    }

    /// Size of the image, in pixels
    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// Number of columns
    pub fn width(&self) -> usize {
        self.size.width() as usize
    }

    /// Number of rows
    pub fn height(&self) -> usize {
        self.size.height() as usize
    }

    /// Iterates over pixels in row-major order
    pub fn iter(&self) -> impl Iterator<Item = &P> + '_ {
        self.data.iter()
    }

    /// Iterates mutably over pixels in row-major order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut P> + '_ {
        self.data.iter_mut()
    }

    /// Number of pixels
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Checks whether the image has no pixels
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Flat offset of a `(row, column)` pair, panicking if out of bounds
    fn offset(&self, (row, col): (usize, usize)) -> usize {
        assert!(
            row < self.height() && col < self.width(),
            "pixel ({row}, {col}) is outside of a {} image",
            self.size
        );
        row * self.width() + col
    }
}

impl<P: Send> Image<P> {
    /// Overwrites every pixel with `f(column, row)`
    ///
    /// Rows are distributed across the thread pool, if one is given.
    pub fn apply_effect<F: Fn(usize, usize) -> P + Send + Sync>(
        &mut self,
        f: F,
        threads: Option<&ThreadPool>,
    ) {
        let width = self.width().max(1);
        let fill_row = |(y, pixels): (usize, &mut [P])| {
            pixels
                .iter_mut()
                .enumerate()
                .for_each(|(x, out)| *out = f(x, y));
        };
        match threads {
            Some(pool) => pool.run(|| {
                self.data
                    .par_chunks_mut(width)
                    .enumerate()
                    .for_each(fill_row)
            }),
            None => self.data.chunks_mut(width).enumerate().for_each(fill_row),
        }
    }
}

impl<'a, P> IntoIterator for &'a Image<P> {
    type Item = &'a P;
    type IntoIter = std::slice::Iter<'a, P>;
    fn into_iter(self) -> Self::IntoIter {
        self.data.iter()
    }
}

impl<P> std::ops::Index<usize> for Image<P> {
    type Output = P;
    fn index(&self, i: usize) -> &P {
        &self.data[i]
    }
}

impl<P> std::ops::IndexMut<usize> for Image<P> {
    fn index_mut(&mut self, i: usize) -> &mut P {
        &mut self.data[i]
    }
}

impl<P> std::ops::Index<(usize, usize)> for Image<P> {
    type Output = P;
    fn index(&self, pos: (usize, usize)) -> &P {
        &self.data[self.offset(pos)]
    }
}

impl<P> std::ops::IndexMut<(usize, usize)> for Image<P> {
    fn index_mut(&mut self, pos: (usize, usize)) -> &mut P {
        let i = self.offset(pos);
        &mut self.data[i]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn from_vec_checks_length() {
        let size = ImageSize::new(3, 2);
        assert!(Image::from_vec(size, vec![0.0f32; 6]).is_ok());
        assert!(matches!(
            Image::from_vec(size, vec![0.0f32; 5]),
            Err(Error::BadImageData(5, s)) if s == size
        ));
    }

    #[test]
    fn row_major_indexing() {
        let size = ImageSize::new(4, 3);
        let mut img = DepthImage::new(size);
        img.apply_effect(|x, y| (y * 10 + x) as f32, None);
        assert_eq!(img[(2, 1)], 21.0);
        assert_eq!(img[2 * 4 + 1], 21.0);
        assert_eq!(img[(2, 3)], 23.0);

        let mut par = DepthImage::new(size);
        par.apply_effect(|x, y| (y * 10 + x) as f32, Some(&ThreadPool::Global));
        assert_eq!(img, par);
    }

    #[test]
    #[should_panic]
    fn out_of_bounds_tuple_index() {
        let img = ColorImage::new(ImageSize::new(2, 2));
        let _ = img[(2, 0)];
    }
}
