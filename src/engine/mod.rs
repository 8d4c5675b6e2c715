//! C4/C5: the alarm engine and the device state engine (spec §4.4, §4.5).

pub mod alarm;
pub mod state;

pub use alarm::AlarmEngine;
pub use state::StateEngine;
