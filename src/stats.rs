use std::collections::HashMap;

use anyhow::Context as _;
use serde::Serialize;

use crate::{
    codec::{SessionCodec, encoded_key_size},
    store::SessionRecord,
};

/// Running totals for one analysis run.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    processed: u64,
    total: u64,
    missing: u64,
    sizes: Vec<usize>,
    key_counts: HashMap<String, u64>,
    key_sizes: HashMap<String, Vec<usize>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Report {
    pub processed_sessions: u64,
    pub total_sessions: u64,
    pub missing_sessions: u64,
    pub average_size: f64,
    pub keys: Vec<KeyReport>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct KeyReport {
    pub key: String,
    pub count: u64,
    pub average_size: f64,
}

impl SessionStats {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn missing(&self) -> u64 {
        self.missing
    }

    /// Decodes `record` and tallies its size and keys. Nothing is counted when
    /// decoding fails.
    pub fn record(
        &mut self,
        record: &SessionRecord,
        codec: &dyn SessionCodec,
    ) -> anyhow::Result<()> {
        let decoded = codec
            .decode(&record.session_data)
            .with_context(|| format!("decode session `{}`", record.session_key))?;

        let mut measured = Vec::with_capacity(decoded.len());
        for (key, value) in &decoded {
            let size = encoded_key_size(codec, key, value).with_context(|| {
                format!("measure key `{key}` of session `{}`", record.session_key)
            })?;
            measured.push((key, size));
        }

        self.processed += 1;
        self.sizes.push(record.encoded_size());
        for (key, size) in measured {
            *self.key_counts.entry(key.clone()).or_default() += 1;
            self.key_sizes.entry(key.clone()).or_default().push(size);
        }
        Ok(())
    }

    pub fn record_missing(&mut self) {
        self.missing += 1;
    }

    pub fn report(&self) -> Report {
        let mut keys: Vec<KeyReport> = self
            .key_counts
            .iter()
            .map(|(key, count)| KeyReport {
                key: key.clone(),
                count: *count,
                average_size: mean(self.key_sizes.get(key).map_or(&[][..], Vec::as_slice)),
            })
            .collect();
        keys.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));

        Report {
            processed_sessions: self.processed,
            total_sessions: self.total,
            missing_sessions: self.missing,
            average_size: mean(&self.sizes),
            keys,
        }
    }
}

fn mean(values: &[usize]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sum: u128 = values.iter().map(|value| *value as u128).sum();
    sum as f64 / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::SessionStats;
    use crate::{codec::JsonCodec, store::SessionRecord};

    fn record(key: &str, data: &str) -> SessionRecord {
        SessionRecord {
            session_key: key.to_owned(),
            session_data: data.as_bytes().to_vec(),
            expire_date: None,
        }
    }

    #[test]
    fn empty_run_reports_zero_average() {
        let report = SessionStats::new(12).report();
        assert_eq!(report.processed_sessions, 0);
        assert_eq!(report.total_sessions, 12);
        assert_eq!(report.average_size, 0.0);
        assert!(report.keys.is_empty());
    }

    #[test]
    fn counts_keys_once_per_session_and_averages_sizes() {
        let mut stats = SessionStats::new(3);
        let first = record("s1", r#"{"cart":[1,2],"user":"7"}"#);
        let second = record("s2", r#"{"user":"12345"}"#);
        stats.record(&first, &JsonCodec).unwrap();
        stats.record(&second, &JsonCodec).unwrap();

        let report = stats.report();
        assert_eq!(report.processed_sessions, 2);
        assert_eq!(
            report.average_size,
            (first.session_data.len() + second.session_data.len()) as f64 / 2.0
        );

        assert_eq!(report.keys.len(), 2);
        assert_eq!(report.keys[0].key, "user");
        assert_eq!(report.keys[0].count, 2);
        let user_sizes = [r#"{"user":"7"}"#.len(), r#"{"user":"12345"}"#.len()];
        assert_eq!(
            report.keys[0].average_size,
            (user_sizes[0] + user_sizes[1]) as f64 / 2.0
        );
        assert_eq!(report.keys[1].key, "cart");
        assert_eq!(report.keys[1].count, 1);
        assert_eq!(report.keys[1].average_size, r#"{"cart":[1,2]}"#.len() as f64);
    }

    #[test]
    fn ties_are_ordered_by_key_name() {
        let mut stats = SessionStats::new(1);
        stats
            .record(&record("s", r#"{"zeta":1,"alpha":1,"mid":1}"#), &JsonCodec)
            .unwrap();
        let keys: Vec<_> = stats.report().keys.into_iter().map(|k| k.key).collect();
        assert_eq!(keys, ["alpha", "mid", "zeta"]);
    }

    #[test]
    fn decode_failure_leaves_counters_untouched() {
        let mut stats = SessionStats::new(1);
        let err = stats
            .record(&record("broken", "not json"), &JsonCodec)
            .unwrap_err();
        assert!(
            format!("{err:#}").contains("decode session `broken`"),
            "error: {err:#}"
        );
        assert_eq!(stats.processed(), 0);
        assert!(stats.report().keys.is_empty());
    }

    #[test]
    fn missing_sessions_are_counted_separately() {
        let mut stats = SessionStats::new(5);
        stats.record_missing();
        stats.record_missing();
        assert_eq!(stats.missing(), 2);
        assert_eq!(stats.processed(), 0);
        assert_eq!(stats.report().missing_sessions, 2);
    }
}
