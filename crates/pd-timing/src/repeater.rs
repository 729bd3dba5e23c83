use std::ops::{Add, AddAssign, Sub, SubAssign};

use crate::Nanos;

/// Gates a periodic action so it runs at most once per `interval`. Used by
/// the timeout supervisor and the distributor's pacing check so neither
/// walks its full table on every `Session::process` tick.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Repeater {
    interval: Nanos,
    last_acted: Nanos,
}

impl Repeater {
    #[inline]
    pub fn every(interval: Nanos) -> Self {
        Self { interval, last_acted: Nanos::ZERO }
    }

    #[inline]
    pub fn maybe<F>(&mut self, mut f: F)
    where
        F: FnMut(Nanos),
    {
        let el = self.last_acted.elapsed();
        if el >= self.interval {
            f(el);
            self.last_acted = Nanos::now();
        }
    }

    #[inline]
    pub fn fired(&mut self) -> bool {
        let el = self.last_acted.elapsed();
        if el >= self.interval {
            self.last_acted = Nanos::now();
            true
        } else {
            false
        }
    }

    #[inline]
    pub fn interval(&self) -> Nanos {
        self.interval
    }

    #[inline]
    pub fn set_interval(&mut self, interval: Nanos) {
        self.interval = interval
    }

    pub fn reset(&mut self) {
        self.last_acted = Nanos::now()
    }

    pub fn force_fire(&mut self) {
        self.last_acted = Nanos::ZERO
    }
}

impl Add<Nanos> for Repeater {
    type Output = Repeater;
    fn add(self, rhs: Nanos) -> Self::Output {
        Repeater { interval: self.interval.saturating_add(rhs), ..self }
    }
}

impl Sub<Nanos> for Repeater {
    type Output = Repeater;
    fn sub(self, rhs: Nanos) -> Self::Output {
        Repeater { interval: self.interval.saturating_sub(rhs), ..self }
    }
}

impl AddAssign<Nanos> for Repeater {
    fn add_assign(&mut self, rhs: Nanos) {
        self.interval = self.interval.saturating_add(rhs);
    }
}

impl SubAssign<Nanos> for Repeater {
    fn sub_assign(&mut self, rhs: Nanos) {
        self.interval = self.interval.saturating_sub(rhs);
    }
}
