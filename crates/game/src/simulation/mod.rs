mod state;
mod step;
mod tick;

pub use state::{SaveError, SimulationState};
pub use step::{ARENA, step_entities};
pub use tick::{DEFAULT_TICK_PERIOD, SchedulerState, TickDriver, TickScheduler, step};
