//! Property-based tests for history deduplication.

use proptest::prelude::*;

use crate::state::ExecutionHistory;
use crate::step::{Step, StepKind};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Re-delivering any entries never changes which result a step id resolves to.
    #[test]
    fn prop_redelivery_keeps_first_result(
        count in 1u32..10,
        redeliver in proptest::collection::vec(0usize..10, 0..10),
    ) {
        let mut steps: Vec<Step> = (1..=count)
            .map(|id| Step::new(id, format!("step{}", id), StepKind::Run).with_out(id.to_string()))
            .collect();
        for idx in redeliver {
            let mut copy = steps[idx % count as usize].clone();
            copy.out = Some("\"stale\"".to_string());
            steps.push(copy);
        }

        let history = ExecutionHistory::new(steps);

        prop_assert_eq!(history.len(), count as usize);
        for id in 1..=count {
            let id_text = id.to_string();
            prop_assert_eq!(history.result(id).and_then(|s| s.out.as_deref()), Some(id_text.as_str()));
        }
    }
}
