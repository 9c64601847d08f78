//! End-to-end refinement runs: engine + chained detectors + metrics.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use converge::{
    AiDetector, Artifact, ChainedDetector, Completion, Converge, ConvergenceDecision,
    ConvergenceDetector, DetectorError, DiffDetector, MetricsCollector, Refiner,
    RefinementConfig, Supervisor, SupervisorError, REASON_CONVERGED, REASON_MAX_ITERATIONS,
};

/// Refiner that rewrites most of the artifact for the first `large_passes`
/// iterations, then settles down to a one-line tweak.
struct SettlingRefiner {
    large_passes: u32,
    /// After the large passes: hand the artifact back untouched instead of
    /// tweaking one line.
    freeze: bool,
    passes: AtomicU32,
    detector: ChainedDetector,
}

impl SettlingRefiner {
    fn new(large_passes: u32, detector: ChainedDetector) -> Self {
        Self {
            large_passes,
            freeze: false,
            passes: AtomicU32::new(0),
            detector,
        }
    }

    fn frozen(large_passes: u32, detector: ChainedDetector) -> Self {
        Self {
            freeze: true,
            ..Self::new(large_passes, detector)
        }
    }
}

#[async_trait]
impl Refiner for SettlingRefiner {
    async fn refine(
        &self,
        _cancel: &CancellationToken,
        current: &Artifact,
    ) -> anyhow::Result<Artifact> {
        let pass = self.passes.fetch_add(1, Ordering::SeqCst) + 1;
        let content = if pass <= self.large_passes {
            (0..40)
                .map(|n| format!("line {n} draft {pass}"))
                .collect::<Vec<_>>()
                .join("\n")
        } else if self.freeze {
            current.content.clone()
        } else {
            // Touch a single line out of forty.
            let mut lines: Vec<String> = current.content.lines().map(String::from).collect();
            if let Some(first) = lines.first_mut() {
                *first = format!("{first}.");
            }
            lines.join("\n")
        };
        Ok(Artifact::new(
            current.kind.clone(),
            content,
            current.context.clone(),
        ))
    }

    async fn check_convergence(
        &self,
        cancel: &CancellationToken,
        current: &Artifact,
        previous: &Artifact,
    ) -> Result<ConvergenceDecision, DetectorError> {
        self.detector.check(cancel, current, previous).await
    }
}

/// Supervisor that always reports non-convergence with low confidence.
struct WafflingSupervisor;

#[async_trait]
impl Supervisor for WafflingSupervisor {
    async fn call(
        &self,
        _cancel: &CancellationToken,
        _prompt: &str,
        _model: &str,
        _max_tokens: u32,
    ) -> Result<Completion, SupervisorError> {
        Ok(Completion::from_text(
            r#"{"converged":false,"confidence":0.3,"reasoning":"unsure","diff_size":"moderate","marginal":"medium"}"#,
        ))
    }
}

fn config(min: u32, max: u32) -> RefinementConfig {
    RefinementConfig {
        min_iterations: min,
        max_iterations: max,
        skip_simple: false,
        timeout: None,
    }
}

#[tokio::test]
async fn diff_detector_ends_the_run_once_edits_settle() {
    // Two sweeping rewrites, then single-line tweaks: 1/40 = 2.5% < 5%.
    // With no fallback detector the chain hands back the diff decision even
    // though 2.5% sits close enough to the threshold to dent its confidence.
    let chain = ChainedDetector::new(vec![Box::new(DiffDetector::default())]);
    let refiner = SettlingRefiner::new(2, chain);
    let mut collector = MetricsCollector::new();

    let result = Converge::new(config(1, 10))
        .run(
            &CancellationToken::new(),
            Artifact::new("analysis", "seed", "integration"),
            &refiner,
            Some(&mut collector),
        )
        .await
        .unwrap();

    assert!(result.converged);
    assert_eq!(result.iterations, 3);
    let artifact = &collector.artifacts()[0];
    assert_eq!(artifact.stop_reason, REASON_CONVERGED);
    assert_eq!(artifact.iterations, 3);
    assert_eq!(collector.iterations().len(), 3);
}

#[tokio::test]
async fn uncertain_ai_fallback_lets_the_bound_finish_the_run() {
    // The chain holds only an AI detector that never commits, so every
    // check is rewritten to not-converged and the engine exhausts the bound.
    let ai = AiDetector::new(Arc::new(WafflingSupervisor), "test-model");
    let chain = ChainedDetector::new(vec![Box::new(ai)]);
    let refiner = SettlingRefiner::new(10, chain);
    let mut collector = MetricsCollector::new();

    let result = Converge::new(config(1, 4))
        .run(
            &CancellationToken::new(),
            Artifact::new("assessment", "seed", "integration"),
            &refiner,
            Some(&mut collector),
        )
        .await
        .unwrap();

    assert!(!result.converged);
    assert_eq!(result.iterations, 4);
    assert_eq!(collector.artifacts()[0].stop_reason, REASON_MAX_ITERATIONS);

    let aggregate = collector.aggregate();
    assert_eq!(aggregate.artifacts, 1);
    assert_eq!(aggregate.p50_iterations, 4);
    assert_eq!(aggregate.convergence_rate, 0.0);
}

#[tokio::test]
async fn chain_prefers_a_confident_diff_over_an_uncertain_ai() {
    // Single-line tweaks from the start: the diff detector is confident and
    // converged, so the waffling AI detector is never consulted.
    let calls = Arc::new(AtomicU32::new(0));
    struct CountingSupervisor(Arc<AtomicU32>);

    #[async_trait]
    impl Supervisor for CountingSupervisor {
        async fn call(
            &self,
            _cancel: &CancellationToken,
            _prompt: &str,
            _model: &str,
            _max_tokens: u32,
        ) -> Result<Completion, SupervisorError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Completion::from_text(
                r#"{"converged":false,"confidence":0.9,"reasoning":"keep going","diff_size":"large","marginal":"high"}"#,
            ))
        }
    }

    let ai = AiDetector::new(Arc::new(CountingSupervisor(calls.clone())), "test-model");
    let chain = ChainedDetector::new(vec![Box::new(DiffDetector::default()), Box::new(ai)]);
    // Pass 2 returns the artifact byte-identical: the diff detector reports
    // converged at full confidence and the AI detector is never consulted.
    let refiner = SettlingRefiner::frozen(1, chain);

    let result = Converge::new(config(2, 10))
        .run(
            &CancellationToken::new(),
            Artifact::new("analysis", "seed", "integration"),
            &refiner,
            None,
        )
        .await
        .unwrap();

    assert!(result.converged);
    assert_eq!(result.iterations, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
