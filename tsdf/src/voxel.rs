//! Voxel types and the running-average update
use static_assertions::const_assert_eq;

/// Signed distance sample
///
/// `tsdf` is normalized by the truncation distance to `[-1, 1]`; a voxel with
/// `weight == 0` has never been observed and its distance is meaningless.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[repr(C)]
pub(crate) struct Voxel {
    pub tsdf: f32,
    pub weight: u32,
}
const_assert_eq!(std::mem::size_of::<Voxel>(), 8);

/// Signed distance sample with a running RGB average
///
/// Color shares the distance weight (and its cap).
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[repr(C)]
pub(crate) struct ColorVoxel {
    pub tsdf: f32,
    pub weight: u32,
    pub rgb: [f32; 3],
}
const_assert_eq!(std::mem::size_of::<ColorVoxel>(), 20);

/// Single observation of a voxel from one frame
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct Observation {
    /// Normalized signed distance, in `[-1, 1]`
    pub tsdf: f32,
    /// Color sample, if a color image was provided and the voxel lands on it
    pub rgb: Option<[f32; 3]>,
}

/// Common behavior of the stored voxel types
pub(crate) trait VoxelData: Copy + Default + Send + Sync + 'static {
    /// Whether this voxel type stores color
    const HAS_COLOR: bool;

    fn tsdf(&self) -> f32;
    fn weight(&self) -> u32;

    /// Returns the stored color, if this type tracks color
    fn rgb(&self) -> Option<[f32; 3]>;

    /// Folds an observation into the running average
    fn fuse(&mut self, obs: Observation, max_weight: u32);

    #[inline]
    fn is_observed(&self) -> bool {
        self.weight() > 0
    }
}

/// Weighted average of `old` (with weight `w`) and one new sample
#[inline]
fn blend(old: f32, w: f32, new: f32) -> f32 {
    (old * w + new) / (w + 1.0)
}

impl VoxelData for Voxel {
    const HAS_COLOR: bool = false;

    #[inline]
    fn tsdf(&self) -> f32 {
        self.tsdf
    }
    #[inline]
    fn weight(&self) -> u32 {
        self.weight
    }
    #[inline]
    fn rgb(&self) -> Option<[f32; 3]> {
        None
    }

    #[inline]
    fn fuse(&mut self, obs: Observation, max_weight: u32) {
        let w = self.weight as f32;
        self.tsdf = blend(self.tsdf, w, obs.tsdf).clamp(-1.0, 1.0);
        self.weight = (self.weight + 1).min(max_weight);
    }
}

impl VoxelData for ColorVoxel {
    const HAS_COLOR: bool = true;

    #[inline]
    fn tsdf(&self) -> f32 {
        self.tsdf
    }
    #[inline]
    fn weight(&self) -> u32 {
        self.weight
    }
    #[inline]
    fn rgb(&self) -> Option<[f32; 3]> {
        Some(self.rgb)
    }

    #[inline]
    fn fuse(&mut self, obs: Observation, max_weight: u32) {
        let w = self.weight as f32;
        self.tsdf = blend(self.tsdf, w, obs.tsdf).clamp(-1.0, 1.0);
        if let Some(rgb) = obs.rgb {
            for (c, n) in self.rgb.iter_mut().zip(rgb) {
                *c = blend(*c, w, n).clamp(0.0, 255.0);
            }
        }
        self.weight = (self.weight + 1).min(max_weight);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn obs(tsdf: f32) -> Observation {
        Observation { tsdf, rgb: None }
    }

    #[test]
    fn weight_saturates() {
        let mut v = Voxel::default();
        assert!(!v.is_observed());
        for i in 1..10 {
            v.fuse(obs(0.5), 4);
            assert_eq!(v.weight, i.min(4));
            assert_eq!(v.tsdf, 0.5);
        }
    }

    #[test]
    fn running_average() {
        let mut v = Voxel::default();
        v.fuse(obs(1.0), 64);
        v.fuse(obs(-1.0), 64);
        assert_eq!(v.tsdf, 0.0);
        v.fuse(obs(0.3), 64);
        assert_relative_eq!(v.tsdf, 0.1, epsilon = 1e-6);
    }

    #[test]
    fn saturated_weight_tracks_new_data() {
        let mut v = Voxel::default();
        for _ in 0..4 {
            v.fuse(obs(1.0), 2);
        }
        // Old data carries weight 2, so a new sample moves the average by 1/3
        v.fuse(obs(-0.5), 2);
        assert_relative_eq!(v.tsdf, 0.5, epsilon = 1e-6);
    }

    #[test]
    fn color_shares_weight() {
        let mut v = ColorVoxel::default();
        v.fuse(
            Observation {
                tsdf: 0.2,
                rgb: Some([100.0, 50.0, 0.0]),
            },
            64,
        );
        assert_eq!(v.rgb, [100.0, 50.0, 0.0]);
        v.fuse(
            Observation {
                tsdf: 0.2,
                rgb: Some([200.0, 150.0, 255.0]),
            },
            64,
        );
        assert_eq!(v.rgb, [150.0, 100.0, 127.5]);

        // Out-of-frame color samples leave the color untouched
        v.fuse(obs(0.2), 64);
        assert_eq!(v.rgb, [150.0, 100.0, 127.5]);
        assert_eq!(v.weight, 3);
        assert_eq!(v.rgb(), Some([150.0, 100.0, 127.5]));
    }
}
