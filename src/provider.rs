//! External collaborator interfaces (§6): the market-data provider and the
//! calculated-grid lookup. Implementations (spreadsheet adapter, HTTP grid
//! service) live outside this crate; the core only depends on these traits.

use crate::domain::{CalculatedGrid, MarketSnapshot};
use crate::error::EngineError;

/// `poll()` returns the provider's current best-effort view; snapshots are
/// treated as read-only by the core.
pub trait MarketProvider: Send {
    fn connect(&mut self) -> Result<bool, EngineError>;
    fn poll(&mut self) -> Result<Option<MarketSnapshot>, EngineError>;
    fn close(&mut self);
}

/// Supplies the calculated support/resistance grid for an instrument. Kept
/// separate from `MarketProvider` because the grid refreshes on its own,
/// much slower cadence and is looked up off the hot path.
pub trait CalculatedGridProvider: Send {
    fn grid_for(&self, instrument: &str) -> Option<CalculatedGrid>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::VecDeque;

    pub struct ScriptedProvider {
        pub snapshots: VecDeque<MarketSnapshot>,
        pub connected: bool,
    }

    impl MarketProvider for ScriptedProvider {
        fn connect(&mut self) -> Result<bool, EngineError> {
            self.connected = true;
            Ok(true)
        }

        fn poll(&mut self) -> Result<Option<MarketSnapshot>, EngineError> {
            Ok(self.snapshots.pop_front())
        }

        fn close(&mut self) {
            self.connected = false;
        }
    }
}
