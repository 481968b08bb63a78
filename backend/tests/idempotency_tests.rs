//! Idempotency guard tests
//!
//! Key validation plus a model of the guard's check-then-record protocol:
//! replays return the first recorded result, failures record nothing, and
//! distinct (key, route, user) tuples are independent.

use proptest::prelude::*;
use std::collections::HashMap;
use uuid::Uuid;

use retail_ops_backend::error::AppError;
use shared::{validate_idempotency_key, MIN_IDEMPOTENCY_KEY_LEN};

/// In-memory model of the durable (key, route, user) -> result map, driven
/// exactly the way the services drive the real one.
#[derive(Default)]
struct GuardModel {
    records: HashMap<(String, String, Uuid), String>,
}

impl GuardModel {
    /// Run `work` under the guard. `Ok` results are recorded; `Err` leaves
    /// no record behind (the aborted transaction takes it away).
    fn execute<F>(&mut self, user: Uuid, route: &str, key: &str, work: F) -> Result<String, String>
    where
        F: FnOnce() -> Result<String, String>,
    {
        let tuple = (key.to_string(), route.to_string(), user);
        if let Some(stored) = self.records.get(&tuple) {
            return Ok(stored.clone());
        }
        let result = work()?;
        self.records.insert(tuple, result.clone());
        Ok(result)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn minimum_key_length_is_enforced() {
        assert_eq!(MIN_IDEMPOTENCY_KEY_LEN, 16);
        assert!(validate_idempotency_key("a".repeat(16).as_str()).is_ok());
        assert!(validate_idempotency_key("a".repeat(15).as_str()).is_err());
    }

    #[test]
    fn whitespace_does_not_count_toward_the_minimum() {
        assert!(validate_idempotency_key("   short-key   ").is_err());
    }

    #[test]
    fn replay_returns_the_first_result_without_re_executing() {
        let mut guard = GuardModel::default();
        let user = Uuid::new_v4();
        let mut executions = 0;

        let first = guard
            .execute(user, "inventory.adjust", "key-0123456789abcdef", || {
                executions += 1;
                Ok("movement-1".to_string())
            })
            .unwrap();
        let second = guard
            .execute(user, "inventory.adjust", "key-0123456789abcdef", || {
                executions += 1;
                Ok("movement-2".to_string())
            })
            .unwrap();

        assert_eq!(executions, 1);
        assert_eq!(first, "movement-1");
        // Byte-for-byte the original result, not a re-execution.
        assert_eq!(second, "movement-1");
    }

    #[test]
    fn failure_records_nothing_so_a_retry_re_attempts() {
        let mut guard = GuardModel::default();
        let user = Uuid::new_v4();

        let err = guard
            .execute(user, "inventory.adjust", "key-0123456789abcdef", || {
                Err("insufficient stock".to_string())
            })
            .unwrap_err();
        assert_eq!(err, "insufficient stock");

        // The retry with the same key executes from scratch.
        let ok = guard
            .execute(user, "inventory.adjust", "key-0123456789abcdef", || {
                Ok("movement-1".to_string())
            })
            .unwrap();
        assert_eq!(ok, "movement-1");
    }

    #[test]
    fn different_users_with_the_same_key_execute_independently() {
        let mut guard = GuardModel::default();
        let key = "key-0123456789abcdef";

        let a = guard
            .execute(Uuid::new_v4(), "inventory.adjust", key, || Ok("a".to_string()))
            .unwrap();
        let b = guard
            .execute(Uuid::new_v4(), "inventory.adjust", key, || Ok("b".to_string()))
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn different_routes_with_the_same_key_execute_independently() {
        let mut guard = GuardModel::default();
        let user = Uuid::new_v4();
        let key = "key-0123456789abcdef";

        let adjust = guard
            .execute(user, "inventory.adjust", key, || Ok("adjust".to_string()))
            .unwrap();
        let receive = guard
            .execute(user, "inventory.receive", key, || Ok("receive".to_string()))
            .unwrap();
        assert_ne!(adjust, receive);
    }

    #[test]
    fn concurrent_duplicate_insert_maps_to_a_conflict_kind() {
        // A unique-constraint race on the record insert surfaces as the
        // duplicate-entry conflict, never as a silent double-apply.
        let err = AppError::DuplicateEntry("idempotency key".to_string());
        assert_eq!(err.code(), "DUPLICATE_ENTRY");
        assert_eq!(err.status_code(), axum::http::StatusCode::CONFLICT);
    }
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// However many times a key is replayed, the work runs exactly once and
    /// every call observes the first result.
    #[test]
    fn exactly_once_under_arbitrary_replays(replays in 1usize..30) {
        let mut guard = GuardModel::default();
        let user = Uuid::new_v4();
        let mut executions = 0u32;

        let mut results = Vec::new();
        for i in 0..replays {
            let r = guard
                .execute(user, "stock_counts.apply", "key-0123456789abcdef", || {
                    executions += 1;
                    Ok(format!("result-{i}"))
                })
                .unwrap();
            results.push(r);
        }

        prop_assert_eq!(executions, 1);
        prop_assert!(results.iter().all(|r| r == "result-0"));
    }

    /// Keys of at least the minimum trimmed length validate; shorter ones
    /// never do.
    #[test]
    fn key_validation_matches_the_threshold(key in "[a-z0-9-]{0,40}") {
        let valid = validate_idempotency_key(&key).is_ok();
        prop_assert_eq!(valid, key.trim().len() >= MIN_IDEMPOTENCY_KEY_LEN);
    }
}
