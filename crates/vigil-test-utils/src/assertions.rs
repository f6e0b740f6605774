//! Custom assertion helpers for integration tests.

use vigil_collect::task::{DataCollectionTask, TaskStatus};

/// Asserts that a task is in `expected`.
///
/// # Panics
///
/// Panics if the status differs.
pub fn assert_status(task: &DataCollectionTask, expected: TaskStatus) {
    assert_eq!(
        task.status, expected,
        "Expected task {} to be {expected}, but it was {} (reason: {:?})",
        task.id, task.status, task.last_transition_reason
    );
}

/// Asserts that `tasks` form one forward-linked chain in slice order.
///
/// # Panics
///
/// Panics if any link is missing or points elsewhere, or if the last task
/// has a successor.
pub fn assert_chain_linked(tasks: &[DataCollectionTask]) {
    for pair in tasks.windows(2) {
        assert_eq!(
            pair[0].next_task_id,
            Some(pair[1].id),
            "Task {} should link to {}",
            pair[0].id,
            pair[1].id
        );
    }
    if let Some(last) = tasks.last() {
        assert_eq!(
            last.next_task_id, None,
            "Last task {} should end the chain",
            last.id
        );
    }
}

/// Asserts that windows of consecutive tasks touch without gaps or overlap.
///
/// # Panics
///
/// Panics on the first gap or overlap.
pub fn assert_contiguous_windows(tasks: &[DataCollectionTask]) {
    for pair in tasks.windows(2) {
        assert_eq!(
            pair[0].end_time, pair[1].start_time,
            "Window of task {} should start where task {} ends",
            pair[1].id, pair[0].id
        );
    }
}

/// Asserts that the task failed with an exception containing `needle`.
///
/// # Panics
///
/// Panics if no exception was recorded or it does not contain `needle`.
pub fn assert_exception_contains(task: &DataCollectionTask, needle: &str) {
    let exception = task
        .exception
        .as_deref()
        .unwrap_or_else(|| panic!("Task {} has no recorded exception", task.id));
    assert!(
        exception.contains(needle),
        "Exception of task {} should contain {needle:?}, was {exception:?}",
        task.id
    );
}
