//! Counter service: remembers the reload counter it was configured with.

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::service::ReconfigurableService;

#[derive(Debug, Clone, Deserialize)]
pub struct CounterArgs {
    /// Reload counter supplied by the configuration loader.
    pub num_reconfig: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterState {
    pub num_reconfig: u64,
    /// How many reconfigures this instance has applied.
    pub applied: u64,
}

pub struct CounterService {
    name: String,
}

impl CounterService {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl ReconfigurableService for CounterService {
    type Args = CounterArgs;
    type State = CounterState;

    fn construct(name: &str, _args: &CounterArgs) -> Result<Self, ServiceError> {
        Ok(Self {
            name: name.to_string(),
        })
    }

    fn reconfigure(
        &self,
        current: Option<&CounterState>,
        args: CounterArgs,
    ) -> Result<CounterState, ServiceError> {
        Ok(CounterState {
            num_reconfig: args.num_reconfig,
            applied: current.map_or(0, |s| s.applied) + 1,
        })
    }
}
