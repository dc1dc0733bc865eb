//! Tests against a live Redis server.
//!
//! Run with `--features redis_tests` and `EPOC_REDIS_HOST` pointing at a
//! server. Database 15 is flushed by these tests.
#![cfg(feature = "redis_tests")]

use epoc::clock::FixedClock;
use epoc::config::Settings;
use epoc::field;
use epoc::ConfigurationClient;
use serde_json::json;
use serial_test::serial;

const TEST_DB: i64 = 15;

fn client() -> ConfigurationClient {
    let mut settings = Settings::load().unwrap();
    settings.redis.db = TEST_DB;
    let mut cfg = ConfigurationClient::connect(&settings.redis)
        .unwrap()
        .with_clock(FixedClock::parse("2020-01-01 11:53:12").unwrap());
    cfg.flush().unwrap();
    cfg
}

#[test]
#[serial]
fn test_counter_on_redis() {
    let mut cfg = client();
    assert_eq!(cfg.file_id().unwrap(), 0);
    cfg.set_file_id(17).unwrap();
    assert_eq!(cfg.increment_file_id().unwrap(), 18);
    assert_eq!(cfg.file_id().unwrap(), 18);
}

#[test]
#[serial]
fn test_fname_on_redis() {
    let mut cfg = client();
    cfg.write(field::FILE_ID, 37).unwrap();
    cfg.set("project_id", "ProjectID").unwrap();
    cfg.set("measurement_tag", "Lysozyme").unwrap();
    assert_eq!(
        cfg.fname().unwrap(),
        "037_ProjectID_Lysozyme_2020-01-01_1153_master.h5"
    );
}

#[test]
#[serial]
fn test_overlays_on_redis() {
    let mut cfg = client();
    assert!(cfg.overlays().unwrap().is_empty());
    cfg.set_overlays(vec![json!({"type": "circle"}), json!([1, 2])]).unwrap();
    cfg.add_overlay(json!("text")).unwrap();
    assert_eq!(
        cfg.overlays().unwrap(),
        vec![json!({"type": "circle"}), json!([1, 2]), json!("text")]
    );
}

#[test]
#[serial]
fn test_two_connections_see_each_other() {
    let mut a = client();
    let mut b = client();
    a.set("PI_name", "Erik").unwrap();
    assert_eq!(b.read(field::PI_NAME).unwrap(), "Erik");
}
