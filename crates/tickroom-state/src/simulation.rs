//! Pure transition functions driven by the engine

/// A deterministic, tick-discretized simulation
///
/// Every function must be pure: the same inputs always give the same
/// output, or replicas stop converging.
pub trait Simulation {
    type State: Clone;
    type Event;
    type Render;

    /// State before the room's first tick
    fn initial_state(&self) -> Self::State;

    /// Advance one tick, independent of posts
    fn step(&self, state: Self::State) -> Self::State;

    /// Apply one post's payload
    fn apply_event(&self, event: &Self::Event, state: Self::State) -> Self::State;

    /// Blend the settled past state with the live one
    fn smooth(&self, past: Self::State, current: Self::State) -> Self::Render;
}

type StepFn<S> = Box<dyn Fn(S) -> S + Send>;
type ApplyFn<S, E> = Box<dyn Fn(&E, S) -> S + Send>;
type SmoothFn<S, R> = Box<dyn Fn(S, S) -> R + Send>;

/// Simulation assembled from closures
pub struct SimulationFns<S, E, R> {
    initial: S,
    step: StepFn<S>,
    apply: ApplyFn<S, E>,
    smooth: SmoothFn<S, R>,
}

impl<S, E, R> SimulationFns<S, E, R> {
    pub fn new(
        initial: S,
        step: impl Fn(S) -> S + Send + 'static,
        apply: impl Fn(&E, S) -> S + Send + 'static,
        smooth: impl Fn(S, S) -> R + Send + 'static,
    ) -> Self {
        SimulationFns {
            initial,
            step: Box::new(step),
            apply: Box::new(apply),
            smooth: Box::new(smooth),
        }
    }
}

impl<S: Clone, E, R> Simulation for SimulationFns<S, E, R> {
    type State = S;
    type Event = E;
    type Render = R;

    fn initial_state(&self) -> S {
        self.initial.clone()
    }

    fn step(&self, state: S) -> S {
        (self.step)(state)
    }

    fn apply_event(&self, event: &E, state: S) -> S {
        (self.apply)(event, state)
    }

    fn smooth(&self, past: S, current: S) -> R {
        (self.smooth)(past, current)
    }
}
