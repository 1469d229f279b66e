mod common;

use common::*;
use knockrod_protocol::codec;
use knockrod_protocol::{Ctlf, Direction, Error, KnockRod};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;

async fn ready_session() -> (KnockRod, SharedModel) {
    init_logging();
    let model = shared(DeviceModel::homed());
    let (stream, _device) = spawn_device(model.clone());
    let rod = KnockRod::with_stream(stream, test_config()).unwrap();
    rod.init().await.unwrap();
    rod.stop_polling();
    (rod, model)
}

#[tokio::test(start_paused = true)]
async fn test_oscillation_alternates_between_bounds() {
    let (rod, model) = ready_session().await;

    rod.oscillate(0.5, 0.2, 0.8, 30).unwrap();
    assert!(rod.is_oscillating());
    tokio::time::sleep(Duration::from_secs(2)).await;

    let moves = model.lock().moves();
    assert!(moves.len() >= 3, "moves: {:?}", moves);
    assert_eq!(moves[0], (12000, 15000));
    assert_eq!(moves[1], (3000, 15000));
    assert_eq!(moves[2], (12000, 15000));

    rod.disconnect().await;
    assert!(!rod.is_oscillating());
}

#[tokio::test(start_paused = true)]
async fn test_zero_speed_stops_oscillation() {
    let (rod, model) = ready_session().await;

    rod.oscillate(1.0, 0.0, 1.0, 30).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    rod.oscillate(0.0, 0.0, 1.0, 30).unwrap();

    let params = rod.oscillation_params();
    assert!(!params.active);
    assert!(!rod.is_oscillating());

    let count = model.lock().moves().len();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(model.lock().moves().len(), count);

    rod.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_bounds_change_applies_to_next_stroke() {
    let (rod, model) = ready_session().await;

    rod.oscillate(0.5, 0.0, 1.0, 30).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    // same speed: the running loop keeps going with the new bounds
    rod.oscillate(0.5, 0.4, 0.6, 30).unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let moves = model.lock().moves();
    assert_eq!(moves[0], (15000, 15000));
    assert_eq!(moves[1], (6000, 15000));
    assert_eq!(rod.oscillation_params().direction, Direction::Up);

    rod.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_speed_change_restarts_loop() {
    let (rod, model) = ready_session().await;

    rod.oscillate(0.5, 0.0, 1.0, 30).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    rod.oscillate(1.0, 0.0, 1.0, 30).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let moves = model.lock().moves();
    assert_eq!(moves[0], (15000, 15000));
    // barely left the bottom, so the restarted stroke keeps heading up
    assert_eq!(moves[1], (15000, 30000));
    assert_eq!(rod.oscillation_params().direction, Direction::Down);

    rod.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_restart_heads_for_far_bound() {
    let (rod, model) = ready_session().await;

    rod.oscillate(0.5, 0.0, 1.0, 30).unwrap();
    // most of the way up the first stroke
    tokio::time::sleep(Duration::from_millis(700)).await;
    rod.oscillate(1.0, 0.0, 1.0, 30).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let moves = model.lock().moves();
    assert_eq!(moves, vec![(15000, 15000), (0, 30000)]);
    assert_eq!(rod.oscillation_params().direction, Direction::Up);

    rod.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_restart_from_inactive_heads_for_far_bound() {
    let (rod, model) = ready_session().await;

    rod.move_to(14000, 30000, 30).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    rod.oscillate(0.5, 0.0, 1.0, 30).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(model.lock().moves(), vec![(14000, 30000), (0, 15000)]);

    rod.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_lets_running_stroke_finish_its_frame() {
    init_logging();
    // tiny buffer so the frame write is still in progress when stopping
    let (host, mut device) = tokio::io::duplex(4);
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    tokio::spawn(async move {
        let mut byte = [0u8; 1];
        while let Ok(1) = device.read(&mut byte).await {
            sink.lock().push(byte[0]);
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    });
    let config = test_config();
    let expected =
        codec::numerical_value_movement(15000, config.position_band, 15000, 30, 0, Ctlf::empty())
            .unwrap();
    let rod = KnockRod::with_stream(Box::new(host), config).unwrap();

    rod.oscillate(0.5, 0.0, 1.0, 30).unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(!received.lock().is_empty());
    assert!(received.lock().len() < expected.len());
    rod.oscillate(0.0, 0.0, 1.0, 30).unwrap();
    assert!(!rod.is_oscillating());

    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(*received.lock(), expected);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_oscillation_parameters() {
    let (rod, _model) = ready_session().await;

    assert!(matches!(
        rod.oscillate(1.5, 0.0, 1.0, 30),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        rod.oscillate(0.5, 0.8, 0.2, 30),
        Err(Error::InvalidArgument(_))
    ));
    assert!(!rod.is_oscillating());

    rod.disconnect().await;
}
