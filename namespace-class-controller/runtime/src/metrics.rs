use crate::core::{Error, Outcome};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{
        counter::Counter,
        family::Family,
        histogram::{exponential_buckets, Histogram},
    },
    registry::{Registry, Unit},
};
use tokio::time;

#[derive(Clone, Debug)]
pub struct ReconcileMetrics {
    reconciles: Family<OutcomeLabels, Counter>,
    errors: Family<ErrorLabels, Counter>,
    duration: Histogram,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct OutcomeLabels {
    outcome: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct ErrorLabels {
    error: &'static str,
}

impl ReconcileMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let reconciles = Family::<OutcomeLabels, Counter>::default();
        reg.register(
            "reconcile",
            "Total number of reconciles by outcome",
            reconciles.clone(),
        );

        let errors = Family::<ErrorLabels, Counter>::default();
        reg.register(
            "reconcile_errors",
            "Total number of failed reconciles by error",
            errors.clone(),
        );

        // 5ms to ~20s.
        let duration = Histogram::new(exponential_buckets(0.005, 2.0, 13));
        reg.register_with_unit(
            "reconcile_duration",
            "Histogram of reconcile latency",
            Unit::Seconds,
            duration.clone(),
        );

        Self {
            reconciles,
            errors,
            duration,
        }
    }

    pub(crate) fn observe(&self, result: &Result<Outcome, Error>, elapsed: time::Duration) {
        self.duration.observe(elapsed.as_secs_f64());
        match result {
            Ok(outcome) => {
                self.reconciles
                    .get_or_create(&OutcomeLabels {
                        outcome: outcome.as_str(),
                    })
                    .inc();
            }
            Err(error) => {
                self.reconciles
                    .get_or_create(&OutcomeLabels { outcome: "error" })
                    .inc();
                self.errors
                    .get_or_create(&ErrorLabels {
                        error: error.as_str(),
                    })
                    .inc();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    #[test]
    fn records_outcomes_and_errors() {
        let mut prom = Registry::default();
        let metrics = ReconcileMetrics::register(prom.sub_registry_with_prefix("namespace_class"));

        let elapsed = time::Duration::from_millis(10);
        metrics.observe(&Ok(Outcome::Deleted), elapsed);
        metrics.observe(&Ok(Outcome::Deleted), elapsed);
        metrics.observe(&Err(Error::Cancelled), elapsed);

        let mut text = String::new();
        encode(&mut text, &prom).unwrap();
        assert!(
            text.contains(r#"namespace_class_reconcile_total{outcome="deleted"} 2"#),
            "{text}"
        );
        assert!(
            text.contains(r#"namespace_class_reconcile_total{outcome="error"} 1"#),
            "{text}"
        );
        assert!(
            text.contains(r#"namespace_class_reconcile_errors_total{error="cancelled"} 1"#),
            "{text}"
        );
        assert!(
            text.contains("namespace_class_reconcile_duration_seconds_count 3"),
            "{text}"
        );
    }
}
