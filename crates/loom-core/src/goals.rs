/// Decides whether the iteration loop should stop.
///
/// Treated as a pure predicate; the evaluation policy lives outside the core.
pub trait GoalEvaluator: Send + Sync {
    fn are_goals_complete(&self) -> bool;
}

impl<F> GoalEvaluator for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn are_goals_complete(&self) -> bool {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn closures_are_evaluators() {
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        let evaluator = move || flag.load(Ordering::Relaxed);
        assert!(!evaluator.are_goals_complete());
        done.store(true, Ordering::Relaxed);
        assert!(evaluator.are_goals_complete());
    }
}
