//! Testing utilities: a deterministic clock and a Given-When-Then reducer harness.
//!
//! ```ignore
//! ReducerTest::new(EventReducer::new())
//!     .with_env(test_env())
//!     .given_events(vec![created, zone_added])
//!     .when_command(EventCommand::CloseRegistration { event_id })
//!     .then_state(|state| assert_eq!(state.get().unwrap().phase, EventPhase::Closed))
//!     .run();
//! ```

#![allow(clippy::module_name_repetitions)]

use crate::environment::Clock;
use crate::error::RaffleError;
use crate::reducer::{Events, Reducer};
use chrono::{DateTime, TimeZone, Utc};
use std::fmt::Debug;

/// Fixed clock for deterministic tests
///
/// Always returns the same time, making tests reproducible.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    time: DateTime<Utc>,
}

impl FixedClock {
    /// Create a new fixed clock with the given time
    #[must_use]
    pub const fn new(time: DateTime<Utc>) -> Self {
        Self { time }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.time
    }
}

/// A fixed clock at 2025-01-01 00:00:00 UTC
#[must_use]
pub fn test_clock() -> FixedClock {
    FixedClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().unwrap_or_default())
}

type StateAssertion<S> = Box<dyn FnOnce(&S)>;
type OutcomeAssertion<E> = Box<dyn FnOnce(&Result<Events<E>, RaffleError>)>;

/// Fluent Given-When-Then harness for reducers.
///
/// A failing command must leave the state exactly as it was; `run` checks that on
/// every error outcome.
pub struct ReducerTest<R: Reducer> {
    reducer: R,
    environment: Option<R::Environment>,
    initial_state: Option<R::State>,
    command: Option<R::Command>,
    state_assertions: Vec<StateAssertion<R::State>>,
    outcome_assertions: Vec<OutcomeAssertion<R::Event>>,
}

impl<R> ReducerTest<R>
where
    R: Reducer,
    R::State: Clone + Default + PartialEq + Debug,
    R::Event: Debug,
{
    /// Create a new reducer test with the given reducer
    #[must_use]
    pub const fn new(reducer: R) -> Self {
        Self {
            reducer,
            environment: None,
            initial_state: None,
            command: None,
            state_assertions: Vec::new(),
            outcome_assertions: Vec::new(),
        }
    }

    /// Set the environment for the test
    #[must_use]
    pub fn with_env(mut self, env: R::Environment) -> Self {
        self.environment = Some(env);
        self
    }

    /// Set the initial state (Given)
    #[must_use]
    pub fn given_state(mut self, state: R::State) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// Fold past events into the initial state (Given)
    #[must_use]
    pub fn given_events(mut self, events: impl IntoIterator<Item = R::Event>) -> Self {
        let mut state = self.initial_state.take().unwrap_or_default();
        for event in events {
            self.reducer.apply(&mut state, &event);
        }
        self.initial_state = Some(state);
        self
    }

    /// Set the command to test (When)
    #[must_use]
    pub fn when_command(mut self, command: R::Command) -> Self {
        self.command = Some(command);
        self
    }

    /// Assert on the resulting state (Then)
    #[must_use]
    pub fn then_state<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&R::State) + 'static,
    {
        self.state_assertions.push(Box::new(assertion));
        self
    }

    /// Assert on the emitted events; fails if the command was refused (Then)
    #[must_use]
    #[allow(clippy::panic)]
    pub fn then_events<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&[R::Event]) + 'static,
    {
        self.outcome_assertions.push(Box::new(move |outcome| match outcome {
            Ok(events) => assertion(events),
            Err(error) => panic!("Expected events, but the command failed: {error}"),
        }));
        self
    }

    /// Assert the command was refused with exactly `expected` (Then)
    #[must_use]
    #[allow(clippy::panic)]
    pub fn then_error(mut self, expected: RaffleError) -> Self {
        self.outcome_assertions.push(Box::new(move |outcome| match outcome {
            Ok(events) => panic!("Expected {expected:?}, but got events {events:?}"),
            Err(error) => assert_eq!(error, &expected),
        }));
        self
    }

    /// Run the test and execute all assertions
    ///
    /// # Panics
    ///
    /// Panics if the command or environment is not set, if a refused command
    /// changed the state, or if any assertion fails.
    #[allow(clippy::panic, clippy::expect_used)]
    pub fn run(self) {
        let mut state = self.initial_state.unwrap_or_default();
        let before = state.clone();
        let command = self.command.expect("Command must be set with when_command()");
        let env = self
            .environment
            .expect("Environment must be set with with_env()");

        let outcome = self.reducer.reduce(&mut state, command, &env);

        if outcome.is_err() {
            assert_eq!(state, before, "A refused command must not change state");
        }
        for assertion in self.outcome_assertions {
            assertion(&outcome);
        }
        for assertion in self.state_assertions {
            assertion(&state);
        }
    }
}
