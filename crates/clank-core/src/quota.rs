/// Remaining AI budget of an organization: `max(0, included + extra - used)`.
#[must_use]
pub fn usage_left(included: i64, extra: i64, used: i64) -> i64 {
    (included + extra - used).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_budget() {
        assert_eq!(usage_left(100, 20, 30), 90);
    }

    #[test]
    fn exhausted_budget_clamps_to_zero() {
        assert_eq!(usage_left(100, 0, 100), 0);
        assert_eq!(usage_left(100, 0, 250), 0);
    }
}
