mod global_clock;
mod nanos;
mod repeater;

pub use global_clock::{Clock, global_clock, init_global_with_mock};
pub use nanos::Nanos;
pub use repeater::Repeater;
