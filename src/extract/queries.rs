//! The fixed set of warehouse queries and how their rows become metric groups.

use serde_json::{Map, Value};

use crate::aggregate::{CHURN, COUPONS, DAILY, SIGNUP_BY_COUPON};

/// How the rows of a query are folded into its metric group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    /// Exactly one row; the group is that row's `column -> value` object.
    SingleRow,
    /// Any number of rows; the group maps each row's value in the named
    /// column to the remaining columns of that row.
    KeyedBy(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricQuery {
    pub group: &'static str,
    pub sql: &'static str,
    pub shape: ResultShape,
}

/// Key used for keyed rows whose key column is NULL.
pub const NULL_KEY: &str = "unknown";

pub const DAILY_METRICS: MetricQuery = MetricQuery {
    group: DAILY,
    shape: ResultShape::SingleRow,
    sql: r#"
    SELECT
        TO_CHAR(CURRENT_DATE - INTERVAL '1 day', 'MM/DD/YYYY')::VARCHAR AS report_date,
        rsd.total::BIGINT AS total,
        rsd.trials::BIGINT AS trials,
        rsd.daily_bot2025_trials::BIGINT AS daily_bot2025_trials,
        rsd.revenue30_trials::BIGINT AS revenue30_trials,
        rsd.active_subscriptions::BIGINT AS active_subscriptions,
        rsd.past_due_subscriptions::BIGINT AS past_due_subscriptions,
        rsd.yearly_subscriptions::BIGINT AS yearly_subscriptions,
        rsd.cancelled_subscriptions::BIGINT AS cancelled_subscriptions,
        rsd.cancel_after_trial::BIGINT AS cancel_after_trial,
        rsd.cancel_during_trial::BIGINT AS cancel_during_trial,
        rsd.ios_first_time_downloads::BIGINT AS ios_first_time_downloads,
        rsd.ios_total_downloads::BIGINT AS ios_total_downloads,
        rsd.google_play_active_installs::BIGINT AS google_play_active_installs
    FROM daily_bot_stats_daily AS rsd
    "#,
};

pub const CHURN_METRICS: MetricQuery = MetricQuery {
    group: CHURN,
    shape: ResultShape::SingleRow,
    sql: r#"
    WITH
    churn_total AS (
      SELECT
        COUNT(DISTINCT CASE WHEN status = 'Conversion' THEN email END) AS churn_conversion_all,
        COUNT(DISTINCT CASE WHEN status = 'Canceled'   THEN email END) AS churn_canceled_all,
        COUNT(DISTINCT CASE WHEN status = 'None'       THEN email END) AS churn_none_all,
        COUNT(DISTINCT CASE WHEN status = 'New Signup' THEN email END) AS churn_new_signup_all,
        COUNT(DISTINCT CASE WHEN status_date >= CURRENT_DATE - INTERVAL '7 days' THEN email END) AS churn_past_due_all
      FROM daily_bot_signup_churn
      WHERE email IS NOT NULL
    ),
    churn_last_week AS (
      SELECT
        COUNT(DISTINCT CASE WHEN status = 'Conversion' THEN email END) AS churn_conversion_week,
        COUNT(DISTINCT CASE WHEN status = 'Canceled'   THEN email END) AS churn_canceled_week,
        COUNT(DISTINCT CASE WHEN status = 'None'       THEN email END) AS churn_none_week,
        COUNT(DISTINCT CASE WHEN status = 'New Signup' THEN email END) AS churn_new_signup_week,
        COUNT(DISTINCT CASE WHEN status_date >= CURRENT_DATE - INTERVAL '7 days' THEN email END) AS churn_past_due_week
      FROM daily_bot_signup_churn
      WHERE email IS NOT NULL
        AND status_date >= CURRENT_DATE - INTERVAL '7 days'
        AND status_date <  CURRENT_DATE
    ),
    churn_last_month AS (
      SELECT
        COUNT(DISTINCT CASE WHEN status = 'Conversion' THEN email END) AS churn_conversion_month,
        COUNT(DISTINCT CASE WHEN status = 'Canceled'   THEN email END) AS churn_canceled_month,
        COUNT(DISTINCT CASE WHEN status = 'None'       THEN email END) AS churn_none_month,
        COUNT(DISTINCT CASE WHEN status = 'New Signup' THEN email END) AS churn_new_signup_month,
        COUNT(DISTINCT CASE WHEN status_date >= CURRENT_DATE - INTERVAL '1 month' THEN email END) AS churn_past_due_month
      FROM daily_bot_signup_churn
      WHERE email IS NOT NULL
        AND status_date >= CURRENT_DATE - INTERVAL '1 month'
        AND status_date <  CURRENT_DATE
    )
    SELECT ct.*, lw.*, lm.*
    FROM churn_total AS ct
    CROSS JOIN churn_last_week AS lw
    CROSS JOIN churn_last_month AS lm
    "#,
};

pub const COUPON_METRICS: MetricQuery = MetricQuery {
    group: COUPONS,
    shape: ResultShape::KeyedBy("coupon_code"),
    sql: r#"
    WITH
        coupon_trial AS (
            SELECT coupon_code, COUNT(DISTINCT email) AS coupon_active_subscriptions
            FROM daily_bot_trial_coupon_activity
            WHERE email IS NOT NULL
            GROUP BY coupon_code
        )
    SELECT
        ct.coupon_code::VARCHAR AS coupon_code,
        ct.coupon_active_subscriptions::BIGINT AS coupon_active_subscriptions,
        atc.total_trials::BIGINT AS total_trials,
        atc.total_conversions::BIGINT AS total_conversions,
        atc.percent_converted::FLOAT8 AS conversion_rate
    FROM coupon_trial AS ct
    JOIN daily_bot_all_time_conversion_rate_by_coupon AS atc
      ON ct.coupon_code = atc.coupon_code
    ORDER BY ct.coupon_code
    "#,
};

pub const SIGNUP_BY_COUPON_METRICS: MetricQuery = MetricQuery {
    group: SIGNUP_BY_COUPON,
    shape: ResultShape::KeyedBy("period"),
    sql: r#"
    WITH
        t_all AS (
          SELECT
            'all'::VARCHAR AS period,
            SUM(CASE WHEN coupon_code IS NULL OR coupon_code = 'No Coupon Code' THEN 1 ELSE 0 END)::BIGINT AS new_signups_without_coupon,
            SUM(CASE WHEN coupon_code IS NOT NULL AND coupon_code <> 'No Coupon Code' THEN 1 ELSE 0 END)::BIGINT AS new_signups_with_coupon,
            COUNT(1)::BIGINT AS total_new_signups
          FROM daily_bot_trial_signups_by_coupon
          WHERE signup_date::date <= DATEADD(day, -1, CURRENT_DATE)
        ),
        t_last_week AS (
          SELECT
            'last_week'::VARCHAR AS period,
            SUM(CASE WHEN coupon_code IS NULL OR coupon_code = 'No Coupon Code' THEN 1 ELSE 0 END)::BIGINT AS new_signups_without_coupon,
            SUM(CASE WHEN coupon_code IS NOT NULL AND coupon_code <> 'No Coupon Code' THEN 1 ELSE 0 END)::BIGINT AS new_signups_with_coupon,
            COUNT(1)::BIGINT AS total_new_signups
          FROM daily_bot_trial_signups_by_coupon
          WHERE signup_date::date >= DATEADD(day, -7, CURRENT_DATE)
            AND signup_date::date <  CURRENT_DATE
        ),
        t_last_month AS (
          SELECT
            'last_month'::VARCHAR AS period,
            SUM(CASE WHEN coupon_code IS NULL OR coupon_code = 'No Coupon Code' THEN 1 ELSE 0 END)::BIGINT AS new_signups_without_coupon,
            SUM(CASE WHEN coupon_code IS NOT NULL AND coupon_code <> 'No Coupon Code' THEN 1 ELSE 0 END)::BIGINT AS new_signups_with_coupon,
            COUNT(1)::BIGINT AS total_new_signups
          FROM daily_bot_trial_signups_by_coupon
          WHERE signup_date::date >= DATEADD(month, -1, CURRENT_DATE)
            AND signup_date::date <  CURRENT_DATE
        )
    SELECT * FROM t_all
    UNION ALL
    SELECT * FROM t_last_week
    UNION ALL
    SELECT * FROM t_last_month
    "#,
};

/// Run order of the extractor. Every group in
/// [`crate::aggregate::WAREHOUSE_GROUPS`] appears exactly once.
pub const QUERIES: [MetricQuery; 4] = [
    DAILY_METRICS,
    CHURN_METRICS,
    COUPON_METRICS,
    SIGNUP_BY_COUPON_METRICS,
];

impl ResultShape {
    /// Folds decoded rows into the group value.
    pub fn apply(&self, rows: Vec<Map<String, Value>>) -> Result<Value, String> {
        match self {
            ResultShape::SingleRow => {
                let count = rows.len();
                let mut rows = rows.into_iter();
                match (rows.next(), count) {
                    (Some(row), 1) => Ok(Value::Object(row)),
                    (None, _) => Err("query returned no rows".to_string()),
                    (Some(_), n) => Err(format!("expected a single row, query returned {}", n)),
                }
            }
            ResultShape::KeyedBy(column) => {
                let mut grouped = Map::new();
                for mut row in rows {
                    let key = match row.remove(*column) {
                        Some(Value::String(key)) => key,
                        Some(Value::Null) => NULL_KEY.to_string(),
                        Some(other) => other.to_string(),
                        None => return Err(format!("key column '{}' missing from result", column)),
                    };
                    if grouped.insert(key.clone(), Value::Object(row)).is_some() {
                        return Err(format!("key '{}' appears in more than one row", key));
                    }
                }
                Ok(Value::Object(grouped))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::aggregate::WAREHOUSE_GROUPS;
    use serde_json::json;

    fn row(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test rows must be objects"),
        }
    }

    #[test]
    fn test_queries_cover_warehouse_groups_in_order() {
        let groups: Vec<&str> = QUERIES.iter().map(|q| q.group).collect();
        assert_eq!(groups, WAREHOUSE_GROUPS);
    }

    #[test]
    fn test_single_row() {
        let value = ResultShape::SingleRow
            .apply(vec![row(json!({"signups": 10, "churned": 2}))])
            .unwrap();
        assert_eq!(value, json!({"signups": 10, "churned": 2}));
    }

    #[test]
    fn test_single_row_rejects_empty_and_multiple() {
        assert_eq!(
            ResultShape::SingleRow.apply(vec![]),
            Err("query returned no rows".to_string())
        );
        assert!(ResultShape::SingleRow
            .apply(vec![row(json!({"a": 1})), row(json!({"a": 2}))])
            .is_err());
    }

    #[test]
    fn test_keyed_rows() {
        let rows = vec![
            row(json!({"coupon_code": "SAVE10", "coupon_active_subscriptions": 5, "total_trials": 9})),
            row(json!({"coupon_code": "No Coupon Code", "coupon_active_subscriptions": 40, "total_trials": 61})),
            row(json!({"coupon_code": null, "coupon_active_subscriptions": 1, "total_trials": 1})),
        ];
        let value = ResultShape::KeyedBy("coupon_code").apply(rows).unwrap();
        assert_eq!(
            value,
            json!({
                "SAVE10": {"coupon_active_subscriptions": 5, "total_trials": 9},
                "No Coupon Code": {"coupon_active_subscriptions": 40, "total_trials": 61},
                "unknown": {"coupon_active_subscriptions": 1, "total_trials": 1},
            })
        );
    }

    #[test]
    fn test_keyed_rows_reject_missing_key_column_and_duplicates() {
        assert!(ResultShape::KeyedBy("period")
            .apply(vec![row(json!({"total_new_signups": 3}))])
            .is_err());
        assert!(ResultShape::KeyedBy("period")
            .apply(vec![row(json!({"period": "all"})), row(json!({"period": "all"}))])
            .is_err());
    }

    #[test]
    fn test_keyed_rows_allow_empty_result() {
        assert_eq!(ResultShape::KeyedBy("coupon_code").apply(vec![]), Ok(json!({})));
    }
}
