//! Learning-rate schedules

use serde::{Deserialize, Serialize};

/// Schedule selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    #[default]
    Constant,
    ExponentialDecay,
}

/// Learning rate as a pure function of the iteration index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LearningRateSchedule {
    Constant { lr: f32 },
    /// `lr(k) = initial * rate^(k / decay_steps)`
    ExponentialDecay { initial: f32, rate: f32, decay_steps: usize },
}

impl LearningRateSchedule {
    pub fn new(kind: ScheduleKind, initial: f32, rate: f32, decay_steps: usize) -> Self {
        match kind {
            ScheduleKind::Constant => Self::Constant { lr: initial },
            ScheduleKind::ExponentialDecay => Self::ExponentialDecay {
                initial,
                rate,
                decay_steps,
            },
        }
    }

    pub fn learning_rate(&self, k: usize) -> f32 {
        match *self {
            Self::Constant { lr } => lr,
            Self::ExponentialDecay {
                initial,
                rate,
                decay_steps,
            } => initial * rate.powf(k as f32 / decay_steps.max(1) as f32),
        }
    }
}

/// Stateful wrapper advanced once per optimizer step.
#[derive(Debug, Clone)]
pub struct Scheduler {
    schedule: LearningRateSchedule,
    step: usize,
}

impl Scheduler {
    pub fn new(schedule: LearningRateSchedule) -> Self {
        Self { schedule, step: 0 }
    }

    /// Learning rate for the next optimizer step.
    pub fn lr(&self) -> f32 {
        self.schedule.learning_rate(self.step)
    }

    pub fn step(&mut self) {
        self.step += 1;
    }

    pub fn steps_taken(&self) -> usize {
        self.step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant() {
        let s = LearningRateSchedule::new(ScheduleKind::Constant, 5e-4, 0.1, 100);
        assert_eq!(s.learning_rate(0), 5e-4);
        assert_eq!(s.learning_rate(10_000), 5e-4);
    }

    #[test]
    fn test_exponential_decay() {
        let s = LearningRateSchedule::new(ScheduleKind::ExponentialDecay, 1.0, 0.1, 100);
        assert!((s.learning_rate(0) - 1.0).abs() < 1e-6);
        assert!((s.learning_rate(100) - 0.1).abs() < 1e-6);
        assert!((s.learning_rate(200) - 0.01).abs() < 1e-6);
        assert!(s.learning_rate(50) < 1.0 && s.learning_rate(50) > 0.1);
    }

    #[test]
    fn test_scheduler_steps() {
        let mut sched = Scheduler::new(LearningRateSchedule::new(
            ScheduleKind::ExponentialDecay,
            1.0,
            0.5,
            1,
        ));
        assert_eq!(sched.lr(), 1.0);
        sched.step();
        assert!((sched.lr() - 0.5).abs() < 1e-6);
        assert_eq!(sched.steps_taken(), 1);
    }
}
