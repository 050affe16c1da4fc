//! The decide/apply contract every aggregate implements.
//!
//! `decide` validates a command against the current state and returns the domain
//! events it produces, without touching the state. `apply` folds one event into the
//! state and must be deterministic: replaying a stream through `apply` always yields
//! the same state. Effects (persistence, projections, metrics) live outside the
//! reducer, in the command handler.

use crate::error::RaffleError;
use smallvec::SmallVec;

/// Events produced by one command
pub type Events<E> = SmallVec<[E; 4]>;

/// Core trait for aggregate reducers.
pub trait Reducer {
    /// The state type this reducer operates on
    type State;

    /// Commands expressing intent
    type Command;

    /// Domain events recording what happened
    type Event;

    /// Injected dependencies (clock, sampler, policy)
    type Environment;

    /// Validates `command` and returns the events it produces.
    ///
    /// # Errors
    ///
    /// Returns the `RaffleError` of the first precondition that fails. The state is
    /// never modified.
    fn decide(
        &self,
        state: &Self::State,
        command: Self::Command,
        env: &Self::Environment,
    ) -> Result<Events<Self::Event>, RaffleError>;

    /// Folds one event into the state
    fn apply(&self, state: &mut Self::State, event: &Self::Event);

    /// Decides, then applies every produced event.
    ///
    /// # Errors
    ///
    /// Same as [`Reducer::decide`]; on error the state is untouched.
    fn reduce(
        &self,
        state: &mut Self::State,
        command: Self::Command,
        env: &Self::Environment,
    ) -> Result<Events<Self::Event>, RaffleError> {
        let events = self.decide(state, command, env)?;
        for event in &events {
            self.apply(state, event);
        }
        Ok(events)
    }
}
