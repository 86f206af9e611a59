//! ADC Signal Filtering
//!
//! The analogue channels are noisy; the sensor suite over-samples each one
//! through a moving-average filter before converting to engineering units.

use num_traits::FromPrimitive;

/// A generic trait for signal filters.
pub trait Filter<T> {
    /// Adds a new sample to the filter.
    fn add_sample(&mut self, sample: T);
    /// Returns the current filtered output value.
    fn output(&self) -> T;
}

/// A moving average filter over the last `N` samples.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MovingAverageFilter<T, const N: usize>
where
    T: FromPrimitive + Copy + Default + core::ops::Add<Output = T> + core::ops::Sub<Output = T> + core::ops::Div<Output = T>,
{
    samples: [T; N],
    index: usize,
    sum: T,
    count: usize,
}

impl<T, const N: usize> MovingAverageFilter<T, N>
where
    T: FromPrimitive + Copy + Default + core::ops::Add<Output = T> + core::ops::Sub<Output = T> + core::ops::Div<Output = T>,
{
    /// Creates a new `MovingAverageFilter` initialized with default values.
    pub fn new() -> Self {
        assert!(N > 0, "Window size must be greater than zero.");
        Self {
            samples: [T::default(); N],
            index: 0,
            sum: T::default(),
            count: 0,
        }
    }
}

impl<T, const N: usize> Default for MovingAverageFilter<T, N>
where
    T: FromPrimitive + Copy + Default + core::ops::Add<Output = T> + core::ops::Sub<Output = T> + core::ops::Div<Output = T>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Filter<T> for MovingAverageFilter<T, N>
where
    T: FromPrimitive + Copy + Default + core::ops::Add<Output = T> + core::ops::Sub<Output = T> + core::ops::Div<Output = T>,
{
    fn add_sample(&mut self, sample: T) {
        // Replace the oldest sample in the running sum
        self.sum = self.sum - self.samples[self.index];
        self.sum = self.sum + sample;
        self.samples[self.index] = sample;
        self.index = (self.index + 1) % N;

        if self.count < N {
            self.count += 1;
        }
    }

    fn output(&self) -> T {
        if self.count == 0 {
            T::default()
        } else {
            self.sum / T::from_usize(self.count).unwrap()
        }
    }
}
