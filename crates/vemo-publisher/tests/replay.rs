use std::time::Duration;
use tempfile::TempDir;
use vemo_core::{ArtifactLayout, OverflowPolicy, PublisherSettings};
use vemo_publisher::{
    connect_fleet, Command, ConnectionSettings, Dispatcher, MemoryBroker, Outcome, ScriptSource,
};

struct TestEnv {
    layout: ArtifactLayout,
    broker: MemoryBroker,
    _dir: TempDir,
}

impl TestEnv {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let layout = ArtifactLayout::new(dir.path().join("iot_resources"));
        layout.create_dirs().unwrap();

        Self {
            layout,
            broker: MemoryBroker::new(),
            _dir: dir,
        }
    }

    fn write_dataset(&self, index: u32, rows: usize) {
        let mut csv = String::from("timestep_time,vehicle_id,vehicle_CO2\n");
        for row in 0..rows {
            csv.push_str(&format!("{}.0,veh{},{}\n", row, index, row * 10));
        }
        std::fs::write(self.layout.dataset_path(index), csv).unwrap();
    }

    async fn dispatcher(&self, devices: u32, settings: ConnectionSettings) -> Dispatcher {
        let fleet = connect_fleet(0..devices, &self.layout, &settings, &[], &self.broker).await;
        Dispatcher::new(fleet.connections, self.layout.clone(), &PublisherSettings::default())
            .with_pace(Duration::ZERO)
            .with_pause(Duration::ZERO)
    }
}

fn fast() -> ConnectionSettings {
    ConnectionSettings {
        operation_timeout: Duration::from_secs(1),
        drain_interval: Duration::ZERO,
        queue_capacity: 64,
        overflow: OverflowPolicy::Block,
    }
}

#[tokio::test]
async fn replay_preserves_per_device_order() {
    let env = TestEnv::new();
    env.write_dataset(0, 5);
    env.write_dataset(1, 3);

    let mut dispatcher = env.dispatcher(2, fast()).await;
    let mut script = ScriptSource::parse("s\nd\n").unwrap();
    assert_eq!(dispatcher.run(&mut script).await, Outcome::Disconnected);

    for (device, rows) in [("device_0", 5), ("device_1", 3)] {
        let messages = env.broker.messages_from(device);
        assert_eq!(messages.len(), rows);
        for (row, message) in messages.iter().enumerate() {
            let json = message.json().unwrap();
            assert_eq!(message.channel, "vehicle/emission/data");
            assert_eq!(json["timestep_time"], serde_json::json!(row as f64));
            assert_eq!(json["vehicle_CO2"], serde_json::json!((row * 10) as f64));
        }
    }
}

#[tokio::test]
async fn replay_keeps_column_order_and_coerced_types() {
    let env = TestEnv::new();
    std::fs::write(
        env.layout.dataset_path(0),
        "timestep_time,vehicle_CO2,vehicle_id,vehicle_lane\n0,,veh0,\n",
    )
    .unwrap();

    let mut dispatcher = env.dispatcher(1, fast()).await;
    let mut script = ScriptSource::from_commands([Command::Replay, Command::Disconnect]);
    dispatcher.run(&mut script).await;

    let messages = env.broker.messages_from("device_0");
    assert_eq!(
        String::from_utf8(messages[0].payload.clone()).unwrap(),
        r#"{"timestep_time":0.0,"vehicle_CO2":0.0,"vehicle_id":"veh0","vehicle_lane":0.0}"#
    );
}

#[tokio::test]
async fn slow_drain_with_reject_policy_counts_drops() {
    let env = TestEnv::new();
    env.write_dataset(0, 20);

    let settings = ConnectionSettings {
        operation_timeout: Duration::from_secs(1),
        drain_interval: Duration::from_millis(50),
        queue_capacity: 2,
        overflow: OverflowPolicy::Reject,
    };
    let mut dispatcher = env.dispatcher(1, settings).await;
    let mut script = ScriptSource::from_commands([Command::Replay]);
    assert_eq!(dispatcher.run(&mut script).await, Outcome::Exited);

    let stats = dispatcher.connections()[0].stats();
    assert!(stats.dropped > 0);
    assert_eq!(stats.queued + stats.dropped, 20);
}

#[tokio::test]
async fn custom_message_goes_to_every_device() {
    let env = TestEnv::new();
    let mut dispatcher = env.dispatcher(3, fast()).await;

    let mut script = ScriptSource::parse("c status parked fleet/status\nd\n").unwrap();
    dispatcher.run(&mut script).await;

    let messages = env.broker.messages_on("fleet/status");
    assert_eq!(messages.len(), 3);
    assert!(messages
        .iter()
        .all(|m| m.json().unwrap() == serde_json::json!({"status": "parked"})));
}
