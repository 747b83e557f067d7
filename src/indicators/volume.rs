use rust_decimal::Decimal;
use std::collections::VecDeque;

use super::Series;

/// Rolling average volume and the current bar's volume relative to it.
#[derive(Debug, Clone)]
pub struct VolumeProfile {
    period: usize,
    volumes: VecDeque<Decimal>,
    window_sum: Decimal,
    avg_volume: Option<Decimal>,
}

impl VolumeProfile {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            volumes: VecDeque::with_capacity(period),
            window_sum: Decimal::ZERO,
            avg_volume: None,
        }
    }

    pub fn update(&mut self, volume: Decimal) -> Option<Decimal> {
        if self.period == 0 {
            return None;
        }
        self.volumes.push_back(volume);
        self.window_sum += volume;
        if self.volumes.len() > self.period {
            if let Some(oldest) = self.volumes.pop_front() {
                self.window_sum -= oldest;
            }
        }

        if self.volumes.len() == self.period {
            self.avg_volume = Some(self.window_sum / Decimal::from(self.period));
        }

        self.avg_volume
    }

    /// Undefined while warming up or when the average is zero.
    pub fn relative_volume(&self, current_volume: Decimal) -> Option<Decimal> {
        self.avg_volume
            .filter(|avg| !avg.is_zero())
            .map(|avg| current_volume / avg)
    }
}

pub fn volume_sma_series(volumes: &[Decimal], period: usize) -> Series {
    let mut profile = VolumeProfile::new(period);
    volumes.iter().map(|v| profile.update(*v)).collect()
}

/// volume[i] / SMA(volume, period)[i], the average including bar i itself.
pub fn volume_ratio_series(volumes: &[Decimal], period: usize) -> Series {
    let mut profile = VolumeProfile::new(period);
    volumes
        .iter()
        .map(|v| {
            profile.update(*v);
            profile.relative_volume(*v)
        })
        .collect()
}
