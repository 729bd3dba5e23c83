use std::sync::Arc;

use once_cell::sync::OnceCell;
use quanta::Mock;

pub type Clock = quanta::Clock;

/// Might be mocked by tests via [`init_global_with_mock`].
static GLOBAL_CLOCK: OnceCell<Clock> = OnceCell::new();

/// Installs a mocked clock so `Nanos::now()` can be driven deterministically
/// from tests. The timeout supervisor and distributor both key off wall-clock
/// deltas, so scenario tests need to move time forward without sleeping.
#[inline]
pub fn init_global_with_mock() -> Arc<Mock> {
    let (mock, controller) = Clock::mock();
    let mock = GLOBAL_CLOCK.get_or_init(|| mock);
    assert_eq!(mock.raw(), 0, "do not initialize the global mock clock from 2 different threads");
    controller
}

#[inline]
pub fn global_clock() -> &'static Clock {
    GLOBAL_CLOCK.get_or_init(Clock::new)
}
