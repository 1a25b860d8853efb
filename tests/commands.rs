//! Command-layer scenarios: checksum caching, staging, markers.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::MockServer;
use hss_dsi::gridftp::{Command, CommandInfo, Dsi, ServerOps, SessionInfo};
use hss_dsi::hss::Hss;
use hss_dsi::sim::{Placement, SimHss};
use hss_dsi::{CHECKSUM_ATTR, Config, HssDsi};

fn make_dsi(hss: &Arc<SimHss>) -> HssDsi {
    let info = SessionInfo { username: "alice".to_string(), groups: vec![] };
    HssDsi::with_config(
        Arc::clone(hss) as Arc<dyn Hss>,
        Arc::new(Config::default()),
        &info,
    )
    .unwrap()
}

fn run_command(dsi: &HssDsi, server: &Arc<MockServer>, command: Command, path: &str) -> String {
    dsi.command(
        server.clone() as Arc<dyn ServerOps>,
        CommandInfo { command, pathname: path.to_string() },
    );
    let (_result, response) = server.wait_command();
    response
}

#[test]
fn full_checksum_is_stable_and_cached() {
    let hss = Arc::new(SimHss::new());
    hss.add_file("/hello", b"hello world");
    let dsi = make_dsi(&hss);

    let server = MockServer::new(1024, 2);
    let first = run_command(&dsi, &server, Command::Cksm { offset: 0, length: -1 }, "/hello");
    assert_eq!(first, "5eb63bbbe01eeed093cb22bb8f5acdc3");

    // The digest landed in the user-attribute cache.
    assert_eq!(
        hss.user_attr_get("/hello", CHECKSUM_ATTR).unwrap().as_deref(),
        Some("5eb63bbbe01eeed093cb22bb8f5acdc3")
    );

    // A second full checksum returns the cached value without opening the
    // file again.
    let opens_before = hss.open_call_count();
    let server = MockServer::new(1024, 2);
    let second = run_command(&dsi, &server, Command::Cksm { offset: 0, length: -1 }, "/hello");
    assert_eq!(second, first);
    assert_eq!(hss.open_call_count(), opens_before);
}

#[test]
fn cache_hit_skips_the_read_path_entirely() {
    let hss = Arc::new(SimHss::new());
    hss.add_file("/cached", b"irrelevant bytes");
    hss.user_attr_set("/cached", CHECKSUM_ATTR, "abc123").unwrap();
    let dsi = make_dsi(&hss);

    let opens_before = hss.open_call_count();
    let server = MockServer::new(1024, 2);
    let got = run_command(&dsi, &server, Command::Cksm { offset: 0, length: -1 }, "/cached");
    assert_eq!(got, "abc123");
    assert_eq!(hss.open_call_count(), opens_before);
}

#[test]
fn partial_checksum_never_touches_the_cache() {
    let hss = Arc::new(SimHss::new());
    hss.add_file("/part", b"hello world");
    hss.user_attr_set("/part", CHECKSUM_ATTR, "bogus-cached-value").unwrap();
    let dsi = make_dsi(&hss);

    let server = MockServer::new(1024, 2);
    let got = run_command(&dsi, &server, Command::Cksm { offset: 0, length: 5 }, "/part");
    // md5("hello"), not the planted cache entry.
    assert_eq!(got, "5d41402abc4b2a76b9719d911017c592");
    // And the cache was not overwritten.
    assert_eq!(
        hss.user_attr_get("/part", CHECKSUM_ATTR).unwrap().as_deref(),
        Some("bogus-cached-value")
    );
}

#[test]
fn stage_command_reports_tape_only_immediately() {
    let hss = Arc::new(SimHss::new());
    hss.add_file("/tape", b"bytes");
    hss.set_placement("/tape", Placement::TapeOnly);
    let dsi = make_dsi(&hss);

    let server = MockServer::new(1024, 2);
    let response =
        run_command(&dsi, &server, Command::Stage { timeout_secs: 5 }, "/tape");
    assert_eq!(response, "250 /tape is on a tape only class of service.\r\n");
    assert_eq!(hss.stage_call_count(), 0);
}

#[test]
fn stage_command_stages_archived_files() {
    let hss = Arc::new(SimHss::new());
    hss.add_file("/arch", b"bytes");
    hss.set_placement("/arch", Placement::Archived);
    hss.set_stage_latency("/arch", Duration::from_millis(100));
    let dsi = make_dsi(&hss);

    let server = MockServer::new(1024, 2);
    let response = run_command(&dsi, &server, Command::Stage { timeout_secs: 10 }, "/arch");
    assert_eq!(response, "250 Stage of file /arch succeeded.\r\n");
    assert_eq!(hss.stage_call_count(), 1);
}

#[test]
fn hardlink_pair_requires_from_first() {
    let hss = Arc::new(SimHss::new());
    hss.add_file("/src", b"bytes");
    let dsi = make_dsi(&hss);

    let server = MockServer::new(1024, 2);
    let response = run_command(&dsi, &server, Command::HardlinkTo, "/dst");
    assert_eq!(response, "501 Must specify HARDLINKFROM first\r\n");

    let server = MockServer::new(1024, 2);
    let response = run_command(&dsi, &server, Command::HardlinkFrom, "/src");
    assert_eq!(response, "250 Ok\r\n");
    let server = MockServer::new(1024, 2);
    let response = run_command(&dsi, &server, Command::HardlinkTo, "/dst");
    assert_eq!(response, "250 Ok\r\n");
    assert_eq!(hss.read_back("/dst").unwrap(), b"bytes");
}

#[test]
fn filesystem_commands_round_trip() {
    let hss = Arc::new(SimHss::new());
    hss.add_file("/old", b"bytes");
    let dsi = make_dsi(&hss);

    let server = MockServer::new(1024, 2);
    let response = run_command(
        &dsi,
        &server,
        Command::Rnto { from_pathname: "/old".to_string() },
        "/renamed",
    );
    assert_eq!(response, "250 Ok\r\n");
    assert!(hss.read_back("/renamed").is_some());

    let server = MockServer::new(1024, 2);
    assert_eq!(run_command(&dsi, &server, Command::Mkd, "/dir"), "250 Ok\r\n");
    let server = MockServer::new(1024, 2);
    assert_eq!(run_command(&dsi, &server, Command::Rmd, "/dir"), "250 Ok\r\n");

    let server = MockServer::new(1024, 2);
    assert_eq!(run_command(&dsi, &server, Command::Dele, "/renamed"), "250 Ok\r\n");
    assert!(hss.read_back("/renamed").is_none());
}

#[test]
fn missing_path_maps_to_a_500_class_response() {
    let hss = Arc::new(SimHss::new());
    let dsi = make_dsi(&hss);
    let server = MockServer::new(1024, 2);
    dsi.command(
        server.clone() as Arc<dyn ServerOps>,
        CommandInfo { command: Command::Dele, pathname: "/missing".to_string() },
    );
    let (result, response) = server.wait_command();
    assert!(result.is_err());
    assert!(response.starts_with("500 "));
}

#[test]
fn checksum_markers_report_cumulative_bytes() {
    let hss = Arc::new(SimHss::new());
    // The sim finishes fast, so markers may or may not fire before the
    // command completes; whatever fired must be a well-formed cumulative
    // count. The timer mechanics themselves are covered in marker.rs.
    let payload = vec![0x42u8; 256 * 1024];
    hss.add_file("/big", &payload);
    let dsi = make_dsi(&hss);

    let server = MockServer::with_update_interval(64 * 1024, 1);
    dsi.command(
        server.clone() as Arc<dyn ServerOps>,
        CommandInfo {
            command: Command::Cksm { offset: 0, length: -1 },
            pathname: "/big".to_string(),
        },
    );
    let (result, _digest) = server.wait_command();
    result.unwrap();
    // Markers are timing-dependent; when any fired, each carries a decimal
    // cumulative count no larger than the file.
    for marker in server.markers() {
        let value: u64 = marker.parse().expect("marker must be a decimal byte count");
        assert!(value <= payload.len() as u64);
    }
}
