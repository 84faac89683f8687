use std::sync::Arc;
use std::time::Duration;

use crate::error::PipelineError;
use crate::pipeline::{InferencePipeline, PipelineOptions, StepOutcome, StepReport};
use crate::registry::ModelRegistry;
use crate::source::FrameSource;
use crate::testing::{EventLog, MockBehavior, MockCompositor, MockSource, mock_registry};

fn ok(estimates: usize) -> MockBehavior {
    MockBehavior {
        estimates,
        ..Default::default()
    }
}

fn pipeline_with(
    source: &Arc<MockSource>,
    registry: Arc<ModelRegistry>,
    drawn: &EventLog,
    options: PipelineOptions,
) -> InferencePipeline {
    InferencePipeline::new(
        registry,
        source.clone() as Arc<dyn FrameSource>,
        Box::new(MockCompositor {
            events: drawn.clone(),
        }),
        options,
    )
}

fn pipeline(source: &Arc<MockSource>, registry: Arc<ModelRegistry>) -> InferencePipeline {
    pipeline_with(source, registry, &EventLog::default(), PipelineOptions::default())
}

fn processed(outcome: StepOutcome) -> StepReport {
    match outcome {
        StepOutcome::Processed(report) => report,
        other => panic!("expected a processed step, got {:?}", other),
    }
}

fn lifecycle_events(events: &EventLog) -> Vec<String> {
    events
        .take()
        .into_iter()
        .filter(|e| !e.starts_with("infer:"))
        .collect()
}

#[tokio::test]
async fn test_single_model_three_steps() -> anyhow::Result<()> {
    let events = EventLog::default();
    let source = MockSource::live();
    let mut pipeline = pipeline(&source, mock_registry(&events, &[("modelA", ok(1))]));

    let report = pipeline.set_active_models(&["modelA"]).await?;
    assert_eq!(report.loaded, vec!["modelA"]);
    assert!(matches!(pipeline.step().await, StepOutcome::NotReady));

    for i in 0..3 {
        source.push(i as f64 * 0.1);
        let step = processed(pipeline.step().await);
        assert_eq!(step.frame_index, i);
        assert_eq!(step.records, 1);
    }

    let groups = pipeline.log().groups();
    assert_eq!(groups.len(), 3);
    for (i, group) in groups.iter().enumerate() {
        assert_eq!(group.len(), 1);
        assert_eq!(group[0].frame_index, i as u64);
        assert_eq!(group[0].model_id, "modelA");
        assert_eq!(group[0].estimates.len(), 1);
        assert!((group[0].timestamp - i as f64 * 0.1).abs() < 1e-9);
    }
    Ok(())
}

#[tokio::test]
async fn test_switch_disposes_before_loading() -> anyhow::Result<()> {
    let events = EventLog::default();
    let source = MockSource::live();
    let registry = mock_registry(&events, &[("modelA", ok(1)), ("modelB", ok(1))]);
    let mut pipeline = pipeline(&source, registry);

    pipeline.set_active_models(&["modelA"]).await?;
    source.push(0.0);
    processed(pipeline.step().await);
    events.take();

    let report = pipeline.set_active_models(&["modelB"]).await?;
    assert_eq!(report.disposed, vec!["modelA"]);
    assert_eq!(report.loaded, vec!["modelB"]);
    assert_eq!(events.snapshot(), vec!["dispose:modelA", "load:modelB"]);

    // new selection starts a new log
    assert!(pipeline.log().is_empty());
    for i in 1..4 {
        source.push(i as f64);
        processed(pipeline.step().await);
    }
    assert_eq!(pipeline.log().groups()[0][0].frame_index, 0);
    assert!(pipeline.log().records().all(|r| r.model_id == "modelB"));
    Ok(())
}

#[tokio::test]
async fn test_repeated_selection_is_a_no_op() -> anyhow::Result<()> {
    let events = EventLog::default();
    let drawn = EventLog::default();
    let source = MockSource::live();
    let registry = mock_registry(&events, &[("modelA", ok(1)), ("modelB", ok(2))]);
    let mut pipeline = pipeline_with(&source, registry, &drawn, PipelineOptions::default());

    pipeline.set_active_models(&["modelA", "modelB"]).await?;
    source.push(0.0);
    processed(pipeline.step().await);
    events.take();

    let report = pipeline.set_active_models(&["modelB", "modelA"]).await?;
    assert!(report.unchanged);
    assert!(lifecycle_events(&events).is_empty());
    assert_eq!(report.active, vec!["modelB", "modelA"]);
    // log kept
    assert_eq!(pipeline.log().len(), 1);

    // draw order and record order follow the latest request
    drawn.take();
    source.push(0.1);
    processed(pipeline.step().await);
    assert_eq!(
        drawn.take(),
        vec!["begin:4x4", "render:#0a0000:2", "render:#000000:1", "finish"]
    );
    let ids: Vec<_> = pipeline.log().groups()[1]
        .iter()
        .map(|r| r.model_id.as_str())
        .collect();
    assert_eq!(ids, vec!["modelB", "modelA"]);
    Ok(())
}

#[tokio::test]
async fn test_failed_load_is_dropped() -> anyhow::Result<()> {
    let events = EventLog::default();
    let source = MockSource::live();
    let broken = MockBehavior {
        fail_load: true,
        ..Default::default()
    };
    let registry = mock_registry(&events, &[("modelA", ok(1)), ("broken", broken)]);
    let mut pipeline = pipeline(&source, registry);

    let report = pipeline.set_active_models(&["modelA", "broken"]).await?;
    assert_eq!(report.loaded, vec!["modelA"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].model_id(), Some("broken"));
    assert!(matches!(report.failed[0], PipelineError::Load { .. }));
    assert_eq!(report.active, vec!["modelA"]);
    assert!(events.position("dispose:broken").is_some());

    source.push(0.0);
    assert_eq!(processed(pipeline.step().await).records, 1);

    // identical request does not retry
    events.take();
    assert!(pipeline.set_active_models(&["modelA", "broken"]).await?.unchanged);
    assert!(lifecycle_events(&events).is_empty());

    // a different request does
    let report = pipeline.set_active_models(&["broken"]).await?;
    assert_eq!(report.failed.len(), 1);
    assert_eq!(lifecycle_events(&events), vec!["dispose:modelA", "load:broken", "dispose:broken"]);
    assert!(report.active.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unknown_ids_are_ignored() -> anyhow::Result<()> {
    let events = EventLog::default();
    let source = MockSource::live();
    let mut pipeline = pipeline(&source, mock_registry(&events, &[("modelA", ok(0))]));

    let report = pipeline
        .set_active_models(&["ghost", "modelA", "modelA"])
        .await?;
    assert_eq!(report.unknown, vec!["ghost"]);
    assert_eq!(report.active, vec!["modelA"]);
    assert_eq!(lifecycle_events(&events), vec!["load:modelA"]);
    Ok(())
}

#[tokio::test]
async fn test_inference_error_skips_model_for_that_frame() -> anyhow::Result<()> {
    let events = EventLog::default();
    let source = MockSource::live();
    let flaky = MockBehavior {
        fail_inference: true,
        ..Default::default()
    };
    let registry = mock_registry(&events, &[("modelA", ok(1)), ("flaky", flaky)]);
    let mut pipeline = pipeline(&source, registry);
    pipeline.set_active_models(&["modelA", "flaky"]).await?;

    for i in 0..2 {
        source.push(i as f64);
        let step = processed(pipeline.step().await);
        assert_eq!(step.frame_index, i);
        assert_eq!(step.records, 1);
        assert_eq!(step.errors.len(), 1);
        assert!(matches!(step.errors[0], PipelineError::Inference { .. }));
    }

    // both models saw the same frame each step
    let infers: Vec<_> = events
        .snapshot()
        .into_iter()
        .filter(|e| e.starts_with("infer:"))
        .collect();
    assert_eq!(
        infers,
        vec!["infer:modelA@0", "infer:flaky@0", "infer:modelA@1", "infer:flaky@1"]
    );
    assert!(pipeline.log().records().all(|r| r.model_id == "modelA"));
    assert_eq!(pipeline.active_ids(), vec!["modelA", "flaky"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_inference_timeout() -> anyhow::Result<()> {
    let events = EventLog::default();
    let source = MockSource::live();
    let slow = MockBehavior {
        inference_delay: Some(Duration::from_secs(5)),
        ..Default::default()
    };
    let registry = mock_registry(&events, &[("modelA", ok(1)), ("slow", slow)]);
    let options = PipelineOptions {
        inference_timeout: Some(Duration::from_millis(100)),
        ..Default::default()
    };
    let mut pipeline = pipeline_with(&source, registry, &EventLog::default(), options);
    pipeline.set_active_models(&["modelA", "slow"]).await?;

    source.push(0.0);
    let step = processed(pipeline.step().await);
    assert_eq!(step.records, 1);
    assert!(matches!(
        step.errors[0],
        PipelineError::InferenceTimeout { ref id, .. } if id == "slow"
    ));
    Ok(())
}

#[tokio::test]
async fn test_reset_log_keeps_models() -> anyhow::Result<()> {
    let events = EventLog::default();
    let source = MockSource::live();
    let mut pipeline = pipeline(&source, mock_registry(&events, &[("modelA", ok(1))]));
    pipeline.set_active_models(&["modelA"]).await?;

    for i in 0..2 {
        source.push(i as f64);
        processed(pipeline.step().await);
    }
    events.take();

    pipeline.reset_log();
    assert!(pipeline.log().is_empty());
    source.push(2.0);
    assert_eq!(processed(pipeline.step().await).frame_index, 0);
    assert!(lifecycle_events(&events).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_shutdown_is_terminal() -> anyhow::Result<()> {
    let events = EventLog::default();
    let source = MockSource::live();
    let registry = mock_registry(&events, &[("modelA", ok(1)), ("modelB", ok(1))]);
    let mut pipeline = pipeline(&source, registry);
    pipeline.set_active_models(&["modelA", "modelB"]).await?;
    events.take();

    pipeline.shutdown();
    let mut disposed = lifecycle_events(&events);
    disposed.sort();
    assert_eq!(disposed, vec!["dispose:modelA", "dispose:modelB"]);

    source.push(0.0);
    assert!(matches!(pipeline.step().await, StepOutcome::Halted));
    assert!(matches!(
        pipeline.set_active_models(&["modelA"]).await,
        Err(PipelineError::ShutDown)
    ));
    pipeline.shutdown();
    assert!(events.take().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_throughput_is_frames_over_window() -> anyhow::Result<()> {
    let events = EventLog::default();
    let source = MockSource::live();
    let mut pipeline = pipeline(&source, mock_registry(&events, &[("modelA", ok(0))]));
    pipeline.set_active_models(&["modelA"]).await?;

    for i in 0..20 {
        source.push(i as f64 * 0.05);
        processed(pipeline.step().await);
        tokio::time::advance(Duration::from_millis(50)).await;
    }
    let sample = pipeline.compute_throughput();
    assert_eq!(sample.frames, 20);
    assert!((sample.fps - 20.0).abs() < 0.5, "fps {}", sample.fps);

    // the window restarts on every sample
    tokio::time::advance(Duration::from_secs(1)).await;
    let idle = pipeline.compute_throughput();
    assert_eq!(idle.frames, 0);
    assert_eq!(idle.fps, 0.0);
    assert_eq!(pipeline.last_throughput(), Some(idle));
    Ok(())
}

#[tokio::test]
async fn test_end_of_stream_stops_stepping_without_disposing() -> anyhow::Result<()> {
    let events = EventLog::default();
    let source = MockSource::new(1.0);
    let mut pipeline = pipeline(&source, mock_registry(&events, &[("modelA", ok(1))]));
    pipeline.set_active_models(&["modelA"]).await?;

    source.push(0.5);
    processed(pipeline.step().await);
    events.take();

    source.finish();
    assert!(pipeline.is_end_of_stream());
    assert!(matches!(pipeline.step().await, StepOutcome::EndOfStream));
    assert!(events.take().is_empty());
    assert_eq!(pipeline.log().len(), 1);
    assert_eq!(pipeline.active_ids(), vec!["modelA"]);
    Ok(())
}

#[tokio::test]
async fn test_last_frame_is_stepped_after_playback_ended() -> anyhow::Result<()> {
    let events = EventLog::default();
    let source = MockSource::new(1.0);
    let mut pipeline = pipeline(&source, mock_registry(&events, &[("modelA", ok(1))]));
    pipeline.set_active_models(&["modelA"]).await?;

    source.push(0.9);
    source.finish();
    assert!(pipeline.is_end_of_stream());
    let step = processed(pipeline.step().await);
    assert!((step.timestamp - 0.9).abs() < 1e-9);
    assert!(matches!(pipeline.step().await, StepOutcome::EndOfStream));
    assert_eq!(pipeline.log().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_same_frame_is_stepped_once() -> anyhow::Result<()> {
    let events = EventLog::default();
    let source = MockSource::live();
    let mut pipeline = pipeline(&source, mock_registry(&events, &[("modelA", ok(1))]));
    pipeline.set_active_models(&["modelA"]).await?;

    source.push(0.0);
    processed(pipeline.step().await);
    assert!(matches!(pipeline.step().await, StepOutcome::NotReady));
    source.push(0.1);
    assert_eq!(processed(pipeline.step().await).frame_index, 1);
    Ok(())
}

#[tokio::test]
async fn test_retained_log_survives_selection_change() -> anyhow::Result<()> {
    let events = EventLog::default();
    let source = MockSource::live();
    let registry = mock_registry(&events, &[("modelA", ok(1)), ("modelB", ok(1))]);
    let mut pipeline = pipeline(&source, registry);
    pipeline.set_active_models(&["modelA"]).await?;

    pipeline.retain_log(true);
    source.push(0.0);
    processed(pipeline.step().await);
    pipeline.set_active_models(&["modelB"]).await?;
    source.push(0.1);
    assert_eq!(processed(pipeline.step().await).frame_index, 1);
    assert_eq!(pipeline.log().len(), 2);

    pipeline.retain_log(false);
    pipeline.set_active_models(&["modelA"]).await?;
    assert!(pipeline.log().is_empty());
    Ok(())
}
