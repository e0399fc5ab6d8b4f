use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ndarray::prelude::*;
use parking_lot::{Condvar, Mutex};

use crate::errors::{Result, StyleError};
use crate::traits::StyleBackend;

/// What the mock generator does with its input.
#[derive(Debug, Clone, PartialEq)]
pub enum MockBehavior {
    /// Returns the input unchanged.
    Identity,
    /// Negates every element, i.e. inverts the colors.
    Invert,
    /// Fills the output with one value.
    Constant(f32),
    /// Returns a `[1, H, W, channels]` tensor of zeros.
    Channels(usize),
    Fail(String),
    Panic,
}

/// Test backend with scripted output and optional completion gating.
#[derive(Debug, Clone)]
pub struct MockBackend {
    behavior: MockBehavior,
    gate: Option<Gate>,
    failures_left: usize,
    calls: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            gate: None,
            failures_left: 0,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn identity() -> Self {
        Self::new(MockBehavior::Identity)
    }

    pub fn inverting() -> Self {
        Self::new(MockBehavior::Invert)
    }

    /// Every run waits for one permit from `gate` before producing output.
    pub fn with_gate(mut self, gate: Gate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// The first `count` runs fail before the scripted behavior applies.
    pub const fn failing_first(mut self, count: usize) -> Self {
        self.failures_left = count;
        self
    }

    /// Shared counter of runs started, readable after the backend moved into a session.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl StyleBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn run(&mut self, input: ArrayView4<f32>) -> Result<Array4<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.pass();
        }

        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(injected("scripted failure"));
        }

        match &self.behavior {
            MockBehavior::Identity => Ok(input.to_owned()),
            MockBehavior::Invert => Ok(input.mapv(|v| -v)),
            MockBehavior::Constant(value) => Ok(Array4::from_elem(input.raw_dim(), *value)),
            MockBehavior::Channels(channels) => {
                let (batch, height, width, _) = input.dim();
                Ok(Array4::zeros((batch, height, width, *channels)))
            }
            MockBehavior::Fail(message) => Err(injected(message)),
            MockBehavior::Panic => panic!("mock backend panic"),
        }
    }
}

fn injected(message: &str) -> StyleError {
    StyleError::Backend {
        operation: "mock run".to_string(),
        source: message.to_string().into(),
    }
}

/// Counting gate that holds backend runs until the test releases them.
#[derive(Clone)]
pub struct Gate {
    state: Arc<GateState>,
}

struct GateState {
    permits: Mutex<usize>,
    condition: Condvar,
}

impl Gate {
    pub fn closed() -> Self {
        Self {
            state: Arc::new(GateState {
                permits: Mutex::new(0),
                condition: Condvar::new(),
            }),
        }
    }

    /// Lets `count` more runs through.
    pub fn open(&self, count: usize) {
        let mut permits = self.state.permits.lock();
        *permits += count;
        self.state.condition.notify_all();
    }

    fn pass(&self) {
        let mut permits = self.state.permits.lock();
        self.state.condition.wait_while(&mut permits, |&mut p| p == 0);
        *permits -= 1;
    }
}

impl std::fmt::Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gate")
            .field("permits", &*self.state.permits.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_mock_behaviors() -> Result<()> {
        let input = Array4::from_elem((1, 2, 2, 3), 0.5_f32);

        let output = MockBackend::identity().run(input.view())?;
        assert_eq!(output, input);

        let output = MockBackend::inverting().run(input.view())?;
        assert!(output.iter().all(|&v| v == -0.5));

        let output = MockBackend::new(MockBehavior::Channels(4)).run(input.view())?;
        assert_eq!(output.shape(), &[1, 2, 2, 4]);

        assert!(MockBackend::new(MockBehavior::Fail("nope".into()))
            .run(input.view())
            .is_err());
        Ok(())
    }

    #[test]
    fn test_failing_first_then_recovers() -> Result<()> {
        let input = Array4::<f32>::zeros((1, 1, 1, 3));
        let mut backend = MockBackend::identity().failing_first(1);
        assert!(backend.run(input.view()).is_err());
        assert!(backend.run(input.view()).is_ok());
        assert_eq!(backend.call_counter().load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[test]
    fn test_gate_holds_until_opened() {
        let gate = Gate::closed();
        let mut backend = MockBackend::identity().with_gate(gate.clone());

        let handle = thread::spawn(move || {
            let input = Array4::<f32>::zeros((1, 1, 1, 3));
            backend.run(input.view()).is_ok()
        });

        thread::sleep(Duration::from_millis(20));
        assert!(!handle.is_finished());

        gate.open(1);
        assert!(handle.join().unwrap());
    }
}
