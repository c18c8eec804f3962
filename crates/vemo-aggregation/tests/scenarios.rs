use serde_json::json;
use tempfile::TempDir;
use vemo_aggregation::{
    discover_datasets, fold_records, run_batch, Aggregator, EventHandler, Source,
    StreamingAggregator, SummaryPublisher,
};
use vemo_core::{load_dataset, ArtifactLayout};
use vemo_publisher::{MemoryBroker, TransportFactory};

struct TestEnv {
    layout: ArtifactLayout,
    _dir: TempDir,
}

impl TestEnv {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let layout = ArtifactLayout::new(dir.path().join("iot_resources"));
        layout.create_dirs().unwrap();
        Self { layout, _dir: dir }
    }

    fn write(&self, index: u32, csv: &str) {
        std::fs::write(self.layout.dataset_path(index), csv).unwrap();
    }

    fn aggregator(&self) -> Aggregator {
        Aggregator::new(self.layout.data_dir())
    }
}

#[test]
fn blank_reading_counts_as_zero() {
    let env = TestEnv::new();
    env.write(1, "vehicle_id,vehicle_CO2\nv1,12.5\nv1,\nv1,30.0\n");

    let summary = env.aggregator().aggregate(Source::Device("vehicle1".into())).unwrap();
    assert_eq!(summary.vehicle_id, "v1");
    assert_eq!(summary.max_co2, 30.0);
    assert_eq!(summary.records_processed, 3);
}

#[test]
fn second_vehicle_in_file_is_ignored() {
    let env = TestEnv::new();
    env.write(0, "vehicle_id,vehicle_CO2\nv1,5\nv2,99\n");

    let summary = env.aggregator().aggregate(Source::Device("vehicle0".into())).unwrap();
    assert_eq!(summary.vehicle_id, "v1");
    assert_eq!(summary.max_co2, 5.0);
    assert_eq!(summary.records_processed, 1);
}

#[test]
fn dataset_without_co2_column_has_no_summary() {
    let env = TestEnv::new();
    env.write(0, "vehicle_id,vehicle_speed\nv1,3\nv1,4\n");
    assert!(env.aggregator().aggregate(Source::Device("vehicle0".into())).is_none());
}

#[test]
fn numeric_vehicle_ids_are_rendered_without_fraction() {
    let env = TestEnv::new();
    env.write(0, "vehicle_id,vehicle_CO2\n7,1\n7,2\n");

    let summary = env.aggregator().aggregate(Source::Device("vehicle0".into())).unwrap();
    assert_eq!(summary.vehicle_id, "7");
    assert_eq!(summary.results_channel(), "vehicles/7/emission/results");
}

#[test]
fn streaming_and_batch_agree_on_a_dataset() {
    let env = TestEnv::new();
    env.write(
        2,
        "timestep_time,vehicle_CO2,vehicle_id\n0,3.5,veh2\n1,,veh2\n2,80.25,veh2\n3,n/a,veh2\n4,12,veh2\n",
    );
    let records = load_dataset(env.layout.dataset_path(2)).unwrap();

    let batch = fold_records(&records).finish(100);
    let mut streaming = StreamingAggregator::new();
    for record in &records {
        streaming.observe_at(record, 100);
    }

    assert_eq!(streaming.summary("veh2", 100), batch);
    assert_eq!(batch.unwrap().records_processed, 4);
    assert_eq!(streaming.skipped(), 1);
}

#[test]
fn wire_records_aggregate_like_dataset_rows() {
    let env = TestEnv::new();
    env.write(0, "vehicle_id,vehicle_CO2\nveh0,4.5\nveh0,9\n");
    let from_file = env.aggregator().aggregate(Source::Device("vehicle0".into())).unwrap();

    // Rows as the publisher sends them
    let wire: Vec<_> = load_dataset(env.layout.dataset_path(0))
        .unwrap()
        .iter()
        .map(|r| serde_json::from_str(&r.to_json().unwrap()).unwrap())
        .collect();
    let from_wire = env.aggregator().aggregate(Source::Records(wire)).unwrap();

    assert_eq!(from_file.max_co2, from_wire.max_co2);
    assert_eq!(from_file.records_processed, from_wire.records_processed);
}

#[tokio::test]
async fn batch_run_publishes_each_summary() {
    let env = TestEnv::new();
    env.write(0, "vehicle_id,vehicle_CO2\nveh0,10\n");
    env.write(1, "vehicle_id,vehicle_CO2\nveh1,20\nveh1,25\n");

    let broker = MemoryBroker::new();
    let link = broker.connect("emission-aggregator", None).await.unwrap();
    let publisher = SummaryPublisher::new(link.transport);

    let aggregator = env.aggregator();
    let files = discover_datasets(aggregator.data_dir(), "vehicle").unwrap();
    let reports = run_batch(&aggregator, &files, Some(&publisher)).await;

    assert!(reports.iter().all(|r| r.published == Some(true)));
    let results = broker.messages_on("vehicles/veh1/emission/results");
    assert_eq!(results.len(), 1);
    let body = results[0].json().unwrap();
    assert_eq!(body["max_co2"], json!(25.0));
    assert_eq!(body["unit"], json!("ppm"));
}

#[tokio::test]
async fn event_handler_accepts_device_id_events() {
    let env = TestEnv::new();
    env.write(4, "vehicle_id,vehicle_CO2\nveh4,33\n");

    let handler = EventHandler::new(env.aggregator());
    let summary = handler.handle_event(json!("vehicle4")).await.unwrap();
    assert_eq!(summary.vehicle_id, "veh4");
    assert!(handler.handle_event(json!(null)).await.is_none());
}
