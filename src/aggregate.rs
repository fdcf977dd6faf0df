use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use serde::{Deserialize, Serialize};

use crate::{
    record::RequestRecord,
    stage::Stage,
    stats::{PERCENTILES, mean, percentile, round_to, std_dev},
};

/// The `Aggregator` collects every [`RequestRecord`] of a run and derives
/// grouped statistics from them on demand.
///
/// # Role
///
/// - Accept records concurrently from any number of completing attempts
///   ([`add_record`](Self::add_record) only needs `&self`).
/// - Own the raw records. Nothing outside the aggregator can mutate them.
/// - Derive a [`GroupSummary`] per `(stage, url)` pair. Summaries are
///   recomputed from the full record set every time, never updated
///   incrementally, so they cannot drift from the data.
///
/// Summaries are meant to be computed once writers have quiesced (after the
/// last stage resolved). Computing earlier is safe but only sees the records
/// appended so far.
#[derive(Debug, Default)]
pub struct Aggregator {
    records: Mutex<Vec<RequestRecord>>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_record(&self, record: RequestRecord) {
        self.lock().push(record);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the records collected so far, in completion order.
    pub fn records(&self) -> Vec<RequestRecord> {
        self.lock().clone()
    }

    /// Groups records by `(stage_index, url)` and summarizes each group.
    ///
    /// Groups come back ordered by stage, then URL, regardless of the order
    /// in which records were appended.
    pub fn compute_groups(&self) -> Vec<GroupSummary> {
        self.compute_groups_with(&[])
    }

    /// Like [`compute_groups`](Self::compute_groups), but each group also
    /// carries the configuration of its stage when `stages` has it, so a
    /// report can be read without the config that produced it.
    pub fn compute_groups_with(&self, stages: &[Stage]) -> Vec<GroupSummary> {
        let records = self.lock();
        let mut groups: BTreeMap<(usize, &str), Vec<&RequestRecord>> = BTreeMap::new();
        for record in records.iter() {
            groups
                .entry((record.stage_index, record.url.as_str()))
                .or_default()
                .push(record);
        }

        groups
            .into_iter()
            .map(|((stage_index, url), group)| {
                let stage = stages.get(stage_index).copied();
                GroupSummary::summarize(stage_index, stage, url, &group)
            })
            .collect()
    }

    // A panic while holding the lock can only happen mid-push, which leaves
    // the vector intact, so a poisoned lock is still safe to read.
    fn lock(&self) -> MutexGuard<'_, Vec<RequestRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Statistics for every request that hit one URL during one stage.
///
/// Durations are in milliseconds. `minimum`/`maximum` are exact, `average`
/// is rounded to two places and `std_dev` to three.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSummary {
    pub stage_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    pub url: String,
    pub requests: usize,
    pub http2xx: usize,
    pub http3xx: usize,
    pub http4xx: usize,
    pub http5xx: usize,
    /// Anything outside 2xx-5xx, including failed attempts (status `0`).
    pub unclassified: usize,
    pub minimum: u64,
    pub average: f64,
    pub maximum: u64,
    pub std_dev: f64,
    pub percentile50: f64,
    pub percentile66: f64,
    pub percentile75: f64,
    pub percentile80: f64,
    pub percentile90: f64,
    pub percentile95: f64,
    pub percentile98: f64,
    pub percentile99: f64,
}

impl GroupSummary {
    fn summarize(
        stage_index: usize,
        stage: Option<Stage>,
        url: &str,
        records: &[&RequestRecord],
    ) -> Self {
        let mut durations: Vec<u64> = records.iter().map(|r| r.duration_ms).collect();
        durations.sort_unstable();

        let (mut http2xx, mut http3xx, mut http4xx, mut http5xx, mut unclassified) =
            (0, 0, 0, 0, 0);
        for record in records {
            match record.status_class() {
                200 => http2xx += 1,
                300 => http3xx += 1,
                400 => http4xx += 1,
                500 => http5xx += 1,
                _ => unclassified += 1,
            }
        }

        let [p50, p66, p75, p80, p90, p95, p98, p99] =
            PERCENTILES.map(|p| percentile(&durations, p));

        Self {
            stage_index,
            stage,
            url: url.to_string(),
            requests: records.len(),
            http2xx,
            http3xx,
            http4xx,
            http5xx,
            unclassified,
            minimum: durations.first().copied().unwrap_or_default(),
            average: round_to(mean(&durations), 2),
            maximum: durations.last().copied().unwrap_or_default(),
            std_dev: std_dev(&durations),
            percentile50: p50,
            percentile66: p66,
            percentile75: p75,
            percentile80: p80,
            percentile90: p90,
            percentile95: p95,
            percentile98: p98,
            percentile99: p99,
        }
    }

    /// Sum of every status bucket; always equal to `requests`.
    pub fn classified_total(&self) -> usize {
        self.http2xx + self.http3xx + self.http4xx + self.http5xx + self.unclassified
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::record::FAILED_STATUS;

    fn record(stage_index: usize, url: &str, status_code: u16, duration_ms: u64) -> RequestRecord {
        let now = Utc::now();
        RequestRecord {
            id: Uuid::new_v4(),
            stage_index,
            url: url.to_string(),
            status_code,
            duration_ms,
            started_at: now,
            ended_at: now,
        }
    }

    #[test]
    fn groups_by_stage_and_url() {
        let agg = Aggregator::new();
        agg.add_record(record(1, "b", 200, 10));
        agg.add_record(record(0, "b", 200, 10));
        agg.add_record(record(0, "a", 200, 10));
        agg.add_record(record(0, "a", 200, 30));

        let groups = agg.compute_groups();
        let keys: Vec<(usize, &str)> = groups
            .iter()
            .map(|g| (g.stage_index, g.url.as_str()))
            .collect();
        assert_eq!(keys, vec![(0, "a"), (0, "b"), (1, "b")]);
        assert_eq!(groups[0].requests, 2);
        assert_eq!(groups[0].average, 20.0);
        assert_eq!(groups[0].minimum, 10);
        assert_eq!(groups[0].maximum, 30);
    }

    #[test]
    fn status_buckets_cover_every_record() {
        let agg = Aggregator::new();
        for code in [200, 201, 302, 404, 418, 500, 503, FAILED_STATUS, 101] {
            agg.add_record(record(0, "u", code, 5));
        }

        let group = &agg.compute_groups()[0];
        assert_eq!(group.http2xx, 2);
        assert_eq!(group.http3xx, 1);
        assert_eq!(group.http4xx, 2);
        assert_eq!(group.http5xx, 2);
        assert_eq!(group.unclassified, 2);
        assert_eq!(group.classified_total(), group.requests);
    }

    #[test]
    fn summary_statistics() {
        let agg = Aggregator::new();
        for d in [9, 2, 5, 4, 4, 7, 5, 4] {
            agg.add_record(record(0, "u", 200, d));
        }

        let group = &agg.compute_groups()[0];
        assert_eq!(group.minimum, 2);
        assert_eq!(group.maximum, 9);
        assert_eq!(group.average, 5.0);
        assert_eq!(group.std_dev, 2.138);
        // sorted: 2 4 4 4 5 5 7 9, real index 3.5
        assert_eq!(group.percentile50, 4.5);
        assert!(group.percentile99 <= 9.0 && group.percentile99 > 8.0);
    }

    #[test]
    fn single_record_group_has_zero_deviation() {
        let agg = Aggregator::new();
        agg.add_record(record(0, "u", 200, 120));

        let group = &agg.compute_groups()[0];
        assert_eq!(group.std_dev, 0.0);
        assert_eq!(group.percentile50, 120.0);
        assert_eq!(group.percentile99, 120.0);
    }

    #[test]
    fn average_rounds_to_two_places() {
        let agg = Aggregator::new();
        for d in [1, 1, 2] {
            agg.add_record(record(0, "u", 200, d));
        }
        assert_eq!(agg.compute_groups()[0].average, 1.33);
    }

    #[test]
    fn summaries_ignore_append_order() {
        let forward = Aggregator::new();
        let backward = Aggregator::new();
        let durations = [13, 1, 8, 21, 3, 5, 2, 1, 34];
        for &d in &durations {
            forward.add_record(record(0, "u", 200, d));
        }
        for &d in durations.iter().rev() {
            backward.add_record(record(0, "u", 200, d));
        }
        assert_eq!(forward.compute_groups(), backward.compute_groups());
    }

    #[test]
    fn concurrent_appends_are_not_lost() {
        let agg = Arc::new(Aggregator::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let agg = agg.clone();
                std::thread::spawn(move || {
                    for i in 0..250 {
                        agg.add_record(record(t % 2, "u", 200, i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(agg.len(), 2000);
        let total: usize = agg.compute_groups().iter().map(|g| g.requests).sum();
        assert_eq!(total, 2000);
    }

    #[test]
    fn groups_carry_their_stage_when_known() {
        let agg = Aggregator::new();
        agg.add_record(record(0, "u", 200, 5));
        agg.add_record(record(1, "u", 200, 5));
        agg.add_record(record(2, "u", 200, 5));

        let groups = agg.compute_groups_with(&[Stage::new(10, 2), Stage::new(20, 4)]);
        assert_eq!(groups[0].stage, Some(Stage::new(10, 2)));
        assert_eq!(groups[1].stage, Some(Stage::new(20, 4)));
        assert_eq!(groups[2].stage, None);
        assert!(agg.compute_groups().iter().all(|g| g.stage.is_none()));

        let value = serde_json::to_value(&groups[1]).unwrap();
        assert_eq!(value["stage"]["requests"], 20);
        assert_eq!(value["stage"]["virtualUsers"], 4);
        assert!(serde_json::to_value(&groups[2]).unwrap().get("stage").is_none());
    }

    #[test]
    fn empty_aggregator_has_no_groups() {
        let agg = Aggregator::new();
        assert!(agg.is_empty());
        assert!(agg.compute_groups().is_empty());
    }
}
