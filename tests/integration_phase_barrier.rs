use anyhow::Result;
use dwrk::transport::mock::{MockCall, MockOp, MockShell};
use dwrk::{CommandPlanner, HostId, Orchestrator, Phase, RemoteTarget};
use std::sync::Arc;
use std::time::{Duration, Instant};

const PAYLOAD: &str = r#"{"threads":4,"connections":10,"requests":1000,"rps":"500",
    "thread_stat_latency":{"mean":"10ms","stdev":"2ms","max":"50ms","+/- stdev":"68%"}}"#;

fn fleet(shell: Arc<MockShell>, hosts: &[&str]) -> Orchestrator {
    let hosts: Vec<HostId> = hosts.iter().map(|h| HostId::from(*h)).collect();
    let args = vec!["-t4".to_string(), "-c10".to_string(), "http://10.0.0.1".to_string()];
    let targets = RemoteTarget::fleet(&hosts, "barrier", "/tmp", &args);
    Orchestrator::new(shell, CommandPlanner::new("wrk", "/tmp/wrk"), targets)
}

fn latest_finish(calls: &[MockCall]) -> Instant {
    calls.iter().map(|c| c.finished).max().unwrap()
}

fn earliest_start(calls: &[MockCall]) -> Instant {
    calls.iter().map(|c| c.started).min().unwrap()
}

/// A slow EXECUTE on one target holds back COLLECT for the whole fleet.
#[tokio::test]
async fn collect_waits_for_slowest_execute() -> Result<()> {
    let shell = Arc::new(
        MockShell::new()
            .with_payload("h1", PAYLOAD)
            .with_payload("h2", PAYLOAD)
            .with_payload("h3", PAYLOAD)
            .with_delay("h1", MockOp::Execute, Duration::from_millis(40))
            .with_delay("h2", MockOp::Execute, Duration::from_millis(200))
            .with_delay("h3", MockOp::Execute, Duration::from_millis(40)),
    );

    let outcome = fleet(Arc::clone(&shell), &["h1", "h2", "h3"]).run().await?;
    assert_eq!(outcome.payloads.len(), 3);
    assert_eq!(outcome.completed, Phase::ALL.to_vec());

    let executes = shell.calls_for(MockOp::Execute);
    let collects = shell.calls_for(MockOp::Collect);
    assert_eq!(executes.len(), 3);
    assert_eq!(collects.len(), 3);

    let slow_done = executes
        .iter()
        .find(|c| c.host == HostId::from("h2"))
        .map(|c| c.finished)
        .unwrap();
    for collect in &collects {
        assert!(
            collect.started >= slow_done,
            "COLLECT on {} started before the slow EXECUTE returned",
            collect.host
        );
    }
    Ok(())
}

/// Every phase starts only after the previous one has fully finished.
#[tokio::test]
async fn phases_never_overlap() -> Result<()> {
    let shell = Arc::new(
        MockShell::new()
            .with_payload("a", PAYLOAD)
            .with_payload("b", PAYLOAD)
            .with_delay("a", MockOp::Copy, Duration::from_millis(60))
            .with_delay("b", MockOp::Collect, Duration::from_millis(60)),
    );

    fleet(Arc::clone(&shell), &["a", "b"]).run().await?;

    let order = [MockOp::Copy, MockOp::Execute, MockOp::Collect, MockOp::Cleanup];
    for pair in order.windows(2) {
        let before = shell.calls_for(pair[0]);
        let after = shell.calls_for(pair[1]);
        assert!(
            earliest_start(&after) >= latest_finish(&before),
            "{:?} overlapped {:?}",
            pair[1],
            pair[0]
        );
    }
    Ok(())
}

/// Within a phase the commands run concurrently, not one after another.
#[tokio::test]
async fn phase_commands_run_concurrently() -> Result<()> {
    let delay = Duration::from_millis(150);
    let mut shell = MockShell::new();
    for host in ["a", "b", "c", "d"] {
        shell = shell
            .with_payload(host, PAYLOAD)
            .with_delay(host, MockOp::Execute, delay);
    }
    let shell = Arc::new(shell);

    fleet(Arc::clone(&shell), &["a", "b", "c", "d"]).run().await?;

    let executes = shell.calls_for(MockOp::Execute);
    let span = latest_finish(&executes) - earliest_start(&executes);
    assert!(span < delay * 3, "EXECUTE took {:?}, looks sequential", span);
    Ok(())
}

/// An interrupt raised mid-run lets the running phase finish, then skips
/// straight to CLEANUP.
#[tokio::test]
async fn interrupt_skips_to_cleanup() -> Result<()> {
    let shell = Arc::new(
        MockShell::new()
            .with_payload("a", PAYLOAD)
            .with_delay("a", MockOp::Execute, Duration::from_millis(200)),
    );
    let orchestrator = fleet(Arc::clone(&shell), &["a"]);
    let handle = orchestrator.interrupt_handle();

    let interrupter = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.interrupt();
    });
    let outcome = orchestrator.run().await?;
    interrupter.await?;

    assert!(outcome.interrupted);
    assert_eq!(
        outcome.completed,
        vec![Phase::Deploy, Phase::Execute, Phase::Cleanup]
    );
    assert_eq!(shell.calls_for(MockOp::Execute).len(), 1);
    assert!(shell.calls_for(MockOp::Collect).is_empty());
    assert_eq!(shell.calls_for(MockOp::Cleanup).len(), 1);
    Ok(())
}
