//! StateGate - single-owner state transitions
//!
//! Holds a state machine value together with an epoch. Every committed
//! transition bumps the epoch. Timers capture the epoch when armed and only
//! fire through [`StateGate::expire_if`], so a timer racing a message has
//! exactly one winner: whichever claims the lock first.

use parking_lot::Mutex;

/// A committed transition
#[derive(Debug, Clone, PartialEq)]
pub struct Transition<S> {
    pub from: S,
    pub to: S,
    /// Epoch after the transition
    pub epoch: u64,
}

#[derive(Debug)]
struct GateInner<S> {
    state: S,
    epoch: u64,
}

#[derive(Debug)]
pub struct StateGate<S> {
    inner: Mutex<GateInner<S>>,
}

impl<S: Clone> StateGate<S> {
    pub fn new(state: S) -> Self {
        Self {
            inner: Mutex::new(GateInner { state, epoch: 0 }),
        }
    }

    pub fn state(&self) -> S {
        self.inner.lock().state.clone()
    }

    pub fn epoch(&self) -> u64 {
        self.inner.lock().epoch
    }

    /// Current state and epoch, read atomically
    pub fn snapshot(&self) -> (S, u64) {
        let inner = self.inner.lock();
        (inner.state.clone(), inner.epoch)
    }

    /// Compute the next state from the current one and commit it.
    ///
    /// On `Err` the state and epoch are unchanged.
    pub fn transition<E>(&self, f: impl FnOnce(&S) -> Result<S, E>) -> Result<Transition<S>, E> {
        let mut inner = self.inner.lock();
        let next = f(&inner.state)?;
        let from = std::mem::replace(&mut inner.state, next.clone());
        inner.epoch += 1;
        Ok(Transition {
            from,
            to: next,
            epoch: inner.epoch,
        })
    }

    /// Timer path: commit only if nothing moved the gate since `armed_epoch`.
    pub fn expire_if(
        &self,
        armed_epoch: u64,
        f: impl FnOnce(&S) -> Option<S>,
    ) -> Option<Transition<S>> {
        let mut inner = self.inner.lock();
        if inner.epoch != armed_epoch {
            return None;
        }
        let next = f(&inner.state)?;
        let from = std::mem::replace(&mut inner.state, next.clone());
        inner.epoch += 1;
        Some(Transition {
            from,
            to: next,
            epoch: inner.epoch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    enum Phase {
        Pending,
        Running,
        Expired,
    }

    #[test]
    fn test_stale_timer_does_not_fire() {
        let gate = StateGate::new(Phase::Pending);
        let armed = gate.epoch();
        gate.transition(|_| Ok::<_, ()>(Phase::Running)).unwrap();
        assert!(gate.expire_if(armed, |_| Some(Phase::Expired)).is_none());
        assert_eq!(gate.state(), Phase::Running);
    }

    #[test]
    fn test_rejected_transition_keeps_epoch() {
        let gate = StateGate::new(Phase::Pending);
        let before = gate.epoch();
        let r: Result<_, &str> = gate.transition(|_| Err("illegal"));
        assert!(r.is_err());
        assert_eq!(gate.epoch(), before);
    }

    #[test]
    fn test_concurrent_race_has_one_winner() {
        for _ in 0..200 {
            let gate = Arc::new(StateGate::new(Phase::Pending));
            let armed = gate.epoch();
            let g1 = gate.clone();
            let timer = std::thread::spawn(move || {
                g1.expire_if(armed, |s| (*s == Phase::Pending).then_some(Phase::Expired))
                    .is_some()
            });
            let g2 = gate.clone();
            let start = std::thread::spawn(move || {
                g2.transition(|s| match s {
                    Phase::Pending => Ok(Phase::Running),
                    _ => Err(()),
                })
                .is_ok()
            });
            let fired = timer.join().unwrap();
            let started = start.join().unwrap();
            assert!(fired ^ started);
        }
    }
}
