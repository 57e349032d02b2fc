use anyhow::Result;
use dwrk::transport::mock::MockShell;
use dwrk::{
    CommandPlanner, FleetReport, HostId, MergeEngine, Orchestrator, RawSummary, RemoteTarget,
    StatBlock, SummaryRecord,
};
use std::sync::Arc;

const PAYLOAD: &str = r#"{"threads":4,"connections":10,"requests":1000,"rps":"500",
    "thread_stat_latency":{"mean":"10ms","stdev":"2ms","max":"50ms","+/- stdev":"68%"}}"#;

fn rel_close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1e-12)
}

/// Two identical hosts merge into one twice as large, with the same
/// latency distribution.
#[tokio::test]
async fn two_hosts_end_to_end() -> Result<()> {
    let shell = Arc::new(
        MockShell::new()
            .with_payload("bench-1", PAYLOAD)
            .with_payload("bench-2", PAYLOAD),
    );
    let hosts = vec![HostId::from("bench-1"), HostId::from("bench-2")];
    let targets = RemoteTarget::fleet(&hosts, "e2e", "/tmp", &["http://x".to_string()]);
    let orchestrator = Orchestrator::new(shell, CommandPlanner::new("wrk", "/tmp/wrk"), targets);

    let outcome = orchestrator.run().await?;
    let report = FleetReport::from_outcome(&outcome, "e2e", Vec::new()).unwrap();
    let r = &report.aggregate;

    assert_eq!(r.threads, 8);
    assert_eq!(r.connections, 20);
    assert_eq!(r.requests, 2000);
    assert!(rel_close(r.rps, 1000.0));
    assert!(rel_close(r.latency.mean, 0.010));
    assert!(rel_close(r.latency.stdev, 0.002));
    assert_eq!(r.latency.max, 0.050);
    assert_eq!(r.latency.within_stdev, None);
    assert_eq!(r.sample_weight, 2);

    let text = report.to_string();
    assert!(text.contains("threads: 8\n"));
    assert!(text.contains("requests: 2000\n"));
    assert!(text.contains("rps: 1.00k\n"));
    assert!(text.contains("    max: 50.00ms\n"));
    assert!(text.ends_with("hosts: 2 of 2 succeeded"));
    Ok(())
}

fn record(requests: u64, mean: f64, stdev: f64, max: f64, time_run: f64) -> SummaryRecord {
    let block = StatBlock {
        mean,
        stdev,
        max,
        within_stdev: Some(0.7),
    };
    SummaryRecord {
        threads: 2,
        connections: 8,
        time_set: 10.0,
        time_run,
        requests,
        rps: requests as f64 / time_run,
        read: requests as f64 * 512.0,
        bandwidth: requests as f64 * 512.0 / time_run,
        latency: block,
        rps_stat: StatBlock {
            mean: mean * 1e4,
            stdev: stdev * 1e4,
            max: max * 1e4,
            within_stdev: Some(0.6),
        },
        sample_weight: 1,
    }
}

fn assert_records_close(x: &SummaryRecord, y: &SummaryRecord) {
    assert_eq!(x.threads, y.threads);
    assert_eq!(x.connections, y.connections);
    assert_eq!(x.requests, y.requests);
    assert_eq!(x.sample_weight, y.sample_weight);
    for (a, b) in [
        (x.time_set, y.time_set),
        (x.time_run, y.time_run),
        (x.rps, y.rps),
        (x.read, y.read),
        (x.bandwidth, y.bandwidth),
        (x.latency.mean, y.latency.mean),
        (x.latency.stdev, y.latency.stdev),
        (x.latency.max, y.latency.max),
        (x.rps_stat.mean, y.rps_stat.mean),
        (x.rps_stat.stdev, y.rps_stat.stdev),
        (x.rps_stat.max, y.rps_stat.max),
    ] {
        assert!(rel_close(a, b), "{a} != {b}");
    }
}

/// Grouping does not change the result.
#[test]
fn merge_is_associative() {
    let a = record(1200, 0.011, 0.0021, 0.090, 10.01);
    let b = record(800, 0.014, 0.0050, 0.120, 10.03);
    let c = record(2500, 0.009, 0.0012, 0.045, 10.00);

    let left = a.clone().merge(b.clone()).merge(c.clone());
    let right = a.merge(b.merge(c));
    assert_records_close(&left, &right);
}

/// Payload arrival order does not change the result.
#[test]
fn reduce_is_order_independent() {
    let records = vec![
        record(1200, 0.011, 0.0021, 0.090, 10.01),
        record(800, 0.014, 0.0050, 0.120, 10.03),
        record(2500, 0.009, 0.0012, 0.045, 10.00),
        record(300, 0.020, 0.0100, 0.300, 10.20),
    ];
    let forward = MergeEngine::reduce(records.clone()).unwrap();
    let backward = MergeEngine::reduce(records.into_iter().rev()).unwrap();
    assert_records_close(&forward, &backward);
}

/// The merged max never underestimates any input.
#[test]
fn merged_max_dominates_inputs() {
    let records = vec![
        record(100, 0.01, 0.001, 0.2, 10.0),
        record(100, 0.01, 0.001, 0.7, 10.0),
        record(100, 0.01, 0.001, 0.4, 10.0),
    ];
    let merged = MergeEngine::reduce(records.clone()).unwrap();
    for r in &records {
        assert!(merged.latency.max >= r.latency.max);
    }
    assert_eq!(merged.latency.max, 0.7);
}

/// Raw wrk output with string-typed numbers normalizes the same as numbers.
#[test]
fn string_and_number_counts_agree() {
    let numeric = RawSummary::from_slice(br#"{"threads":4,"requests":1000}"#).unwrap();
    let textual = RawSummary::from_slice(br#"{"threads":"4","requests":"1000"}"#).unwrap();
    assert_eq!(
        SummaryRecord::parse(&numeric).unwrap(),
        SummaryRecord::parse(&textual).unwrap()
    );
}
