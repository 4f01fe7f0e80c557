use fabrikd_device::{
    CommandPipeline, PipelineConfig, PipelineEvent, SimConfig, SimLink,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

fn pipeline_over_sim(
    config: PipelineConfig,
) -> (
    Arc<SimLink>,
    Arc<CommandPipeline>,
    mpsc::UnboundedReceiver<PipelineEvent>,
    watch::Sender<bool>,
) {
    let link = Arc::new(SimLink::new(SimConfig::default()));
    let (pipeline, events) = CommandPipeline::new(link.clone(), config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(pipeline.clone().run(shutdown_rx));
    (link, pipeline, events, shutdown_tx)
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<PipelineEvent>) -> PipelineEvent {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("no pipeline event in time")
        .expect("event channel closed")
}

#[tokio::test(start_paused = true)]
async fn test_body_and_client_commands_share_one_fifo() {
    let (link, pipeline, mut events, _shutdown) = pipeline_over_sim(PipelineConfig::default());

    let body = vec!["G28".to_string(), "G1 X1".to_string(), "G1 X2".to_string()];
    pipeline.arm_stream(body.clone(), true);
    // Submitted against the active print: joins the stream lane behind the body
    pipeline.submit(vec!["M140 S0".to_string(), "M104 S0".to_string()]);

    assert_eq!(next_event(&mut events).await, PipelineEvent::StreamDrained);
    assert_eq!(
        link.sent(),
        vec!["G28", "G1 X1", "G1 X2", "M140 S0", "M104 S0"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_submit_outside_a_print_sends_directly() {
    let (link, pipeline, _events, _shutdown) = pipeline_over_sim(PipelineConfig::default());

    pipeline.submit(vec!["M106 S255".to_string()]);
    wait_until(|| !link.sent().is_empty()).await;
    assert_eq!(link.sent(), vec!["M106 S255"]);
}

#[tokio::test(start_paused = true)]
async fn test_transient_error_resends_same_command_once_acknowledged() {
    let (link, pipeline, _events, _shutdown) = pipeline_over_sim(PipelineConfig::default());

    link.fail_next_times("buffer full", 2);
    pipeline.submit_control(vec!["M105".to_string()]);

    wait_until(|| !link.sent().is_empty()).await;
    // Retried in place: acknowledged exactly once, never skipped or duplicated
    assert_eq!(link.sent(), vec!["M105"]);
}

#[tokio::test(start_paused = true)]
async fn test_retry_preserves_order_behind_failing_command() {
    let (link, pipeline, _events, _shutdown) = pipeline_over_sim(PipelineConfig::default());

    link.fail_next_times("buffer full", 3);
    pipeline.submit_control(vec!["G28".to_string(), "G1 X5".to_string()]);

    wait_until(|| link.sent().len() == 2).await;
    assert_eq!(link.sent(), vec!["G28", "G1 X5"]);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_error_clears_queue_and_raises_fault() {
    let (link, pipeline, mut events, _shutdown) = pipeline_over_sim(PipelineConfig::default());

    link.fail_next("build cancelled");
    pipeline.arm_stream(
        vec!["G1 X1".to_string(), "G1 X2".to_string(), "G1 X3".to_string()],
        true,
    );

    match next_event(&mut events).await {
        PipelineEvent::Fault(reason) => assert_eq!(reason, "build cancelled"),
        other => panic!("expected fault, got {:?}", other),
    }
    // The failing command was not retried and the rest never went out
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(link.sent().is_empty());
    assert_eq!(pipeline.stream_cursor(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_empty_batch_drains_immediately() {
    let (_link, pipeline, mut events, _shutdown) = pipeline_over_sim(PipelineConfig::default());

    pipeline.arm_stream(Vec::new(), false);
    assert_eq!(next_event(&mut events).await, PipelineEvent::StreamDrained);
}

#[tokio::test(start_paused = true)]
async fn test_pause_gates_stream_lane_only() {
    let (link, pipeline, mut events, _shutdown) = pipeline_over_sim(PipelineConfig::default());

    pipeline.pause_stream();
    pipeline.arm_stream(vec!["G1 X1".to_string(), "G1 X2".to_string()], true);
    // Immediate lane keeps flowing while the stream is held
    pipeline.submit_control(vec!["M105".to_string()]);

    wait_until(|| !link.sent().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(link.sent(), vec!["M105"]);
    assert_eq!(pipeline.stream_cursor(), 0);

    pipeline.resume_stream();
    assert_eq!(next_event(&mut events).await, PipelineEvent::StreamDrained);
    assert_eq!(link.sent(), vec!["M105", "G1 X1", "G1 X2"]);
    assert_eq!(pipeline.stream_cursor(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_clear_discards_pending_without_drain_event() {
    let (link, pipeline, mut events, _shutdown) = pipeline_over_sim(PipelineConfig::default());

    pipeline.pause_stream();
    pipeline.arm_stream(vec!["G1 X1".to_string(), "G1 X2".to_string()], true);
    pipeline.clear();
    pipeline.resume_stream();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(link.sent().is_empty());
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_sustained_transient_failures_drop_liveness() {
    let config = PipelineConfig {
        fail_threshold: 3,
        ..Default::default()
    };
    let (link, pipeline, _events, _shutdown) = pipeline_over_sim(config);

    link.fail_next_times("buffer full", 10);
    pipeline.submit_control(vec!["M105".to_string()]);

    wait_until(|| !pipeline.is_ok()).await;
    assert!(link.sent().is_empty());
}
