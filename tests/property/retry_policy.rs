// tests/property/retry_policy.rs

use std::collections::BTreeSet;
use std::time::Duration;

use proptest::prelude::*;
use warden::supervisor::{ExitClass, ExitCodePolicy, ExitDecision, RetryTracker, StopReason};

const DELAY: Duration = Duration::from_millis(1);

fn class_strategy() -> impl Strategy<Value = ExitClass> {
    prop_oneof![
        1 => Just(ExitClass::End),
        3 => Just(ExitClass::Skip),
        3 => Just(ExitClass::Start),
        8 => Just(ExitClass::Other),
    ]
}

fn code_set() -> impl Strategy<Value = BTreeSet<i32>> {
    proptest::collection::btree_set(-3i32..10, 0..4)
}

proptest! {
    /// The attempt counter equals the number of unrecognized exits since the
    /// last start code, and the loop stops exactly when it exceeds the limit.
    #[test]
    fn attempt_counts_unrecognized_exits_since_last_start(
        limit in 0u32..5,
        classes in proptest::collection::vec(class_strategy(), 1..40),
    ) {
        let mut tracker = RetryTracker::new(limit, DELAY);
        let mut expected = 0u32;

        for class in classes {
            let decision = tracker.on_exit(class, 1);
            match class {
                ExitClass::End => {
                    prop_assert_eq!(decision, ExitDecision::Stop(StopReason::EndCode(1)));
                    break;
                }
                ExitClass::Skip => prop_assert_eq!(decision, ExitDecision::RestartNow),
                ExitClass::Start => {
                    expected = 0;
                    prop_assert_eq!(decision, ExitDecision::RestartNow);
                }
                ExitClass::Other => {
                    expected += 1;
                    if expected > limit {
                        prop_assert_eq!(
                            decision,
                            ExitDecision::Stop(StopReason::RetriesExhausted(1))
                        );
                        break;
                    }
                    prop_assert_eq!(decision, ExitDecision::RetryAfter(DELAY));
                }
            }
            prop_assert_eq!(tracker.attempt(), expected);
        }
    }

    /// A process that always fails is spawned `retries + 1` times.
    #[test]
    fn always_failing_process_spawns_limit_plus_one_times(limit in 0u32..50) {
        let mut tracker = RetryTracker::new(limit, DELAY);
        let mut spawns = 0u32;
        loop {
            spawns += 1;
            if let ExitDecision::Stop(reason) = tracker.on_exit(ExitClass::Other, 9) {
                prop_assert_eq!(reason, StopReason::RetriesExhausted(9));
                break;
            }
        }
        prop_assert_eq!(spawns, limit + 1);
    }

    /// End beats Skip beats Start beats the generic path.
    #[test]
    fn classification_follows_set_precedence(
        code in -3i32..10,
        end in code_set(),
        skip in code_set(),
        start in code_set(),
    ) {
        let expected = if end.contains(&code) {
            ExitClass::End
        } else if skip.contains(&code) {
            ExitClass::Skip
        } else if start.contains(&code) {
            ExitClass::Start
        } else {
            ExitClass::Other
        };
        let policy = ExitCodePolicy { end, skip, start };
        prop_assert_eq!(policy.classify(code), expected);
    }
}
