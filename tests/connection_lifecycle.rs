mod common;

use std::sync::Arc;
use std::time::Duration;

use board_probe_lib::device::{ConnError, ConnectionManager, ConnectionState};
use board_probe_lib::serial::pipeline::ReaderExit;
use board_probe_lib::serial::PortSelection;
use board_probe_lib::ScannerConfig;

use common::{board_with, port, FakeOpener, Reply};

fn named(name: &str) -> PortSelection {
    PortSelection::Named(name.to_string())
}

#[tokio::test(start_paused = true)]
async fn connect_while_connecting_is_refused() {
    let opener = Arc::new(FakeOpener::new(|| board_with(vec![])).with_open_delay(Duration::from_secs(1)));
    let manager = ConnectionManager::with_opener(opener.clone(), ScannerConfig::default());

    let (first, second) = tokio::join!(manager.connect(named("fake0")), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        manager.connect(named("fake0")).await
    });

    assert!(first.is_ok());
    assert!(matches!(second, Err(ConnError::Busy)));
    assert_eq!(opener.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn busy_flag_is_cleared_after_a_failed_connect() {
    let opener = Arc::new(FakeOpener::new(|| board_with(vec![])));
    let manager = ConnectionManager::with_opener(opener.clone(), ScannerConfig::default());

    let err = manager.connect(named("ttyUSB9")).await.unwrap_err();
    assert!(matches!(err, ConnError::PortNotFound(ref name) if name == "ttyUSB9"));
    assert!(!err.remediation_hint().is_empty());
    assert_eq!(manager.state().await, ConnectionState::Disconnected);

    let info = manager.connect(named("fake0")).await.unwrap();
    assert_eq!(info.port_name, "fake0");
    assert_eq!(info.baud_rate, 115200);
}

#[tokio::test(start_paused = true)]
async fn reconnect_tears_down_the_previous_session() {
    let opener = Arc::new(FakeOpener::new(|| board_with(vec![])));
    let manager = ConnectionManager::with_opener(opener.clone(), ScannerConfig::default());

    let first = manager.connect(named("fake0")).await.unwrap();
    assert!(opener.events().is_empty());

    let second = manager.connect(named("fake0")).await.unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(opener.open_count(), 2);
    assert_eq!(opener.events(), vec!["shutdown", "closed"]);
    assert_eq!(manager.state().await, ConnectionState::Connected("fake0".into()));
}

#[tokio::test(start_paused = true)]
async fn clean_disconnect_closes_writer_then_port() {
    let opener = Arc::new(FakeOpener::new(|| board_with(vec![])));
    let manager = ConnectionManager::with_opener(opener.clone(), ScannerConfig::default());
    manager.connect(named("fake0")).await.unwrap();

    let report = manager.disconnect().await.unwrap();
    assert!(report.is_clean(), "{:?}", report);
    assert_eq!(report.reader_exit, Some(ReaderExit::Cancelled));
    assert!(report.writer_closed);
    assert_eq!(opener.events(), vec!["shutdown", "closed"]);
    assert_eq!(manager.state().await, ConnectionState::Disconnected);
    assert!(manager.disconnect().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn failed_read_cancellation_still_closes_writer_then_port() {
    let opener = Arc::new(FakeOpener::new(|| {
        Box::new(|command: &str| if command == "bye" { Reply::Hangup } else { Reply::Silent })
    }));
    let manager = ConnectionManager::with_opener(opener.clone(), ScannerConfig::default());
    manager.connect(named("fake0")).await.unwrap();

    let sent = manager
        .execute_with_session(|session| Box::pin(async move { session.coordinator().send("bye").await }))
        .await
        .unwrap();
    assert!(sent);

    // Let the read loop see the end of the stream
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(manager.state().await, ConnectionState::Stale("fake0".into()));

    let report = manager.disconnect().await.unwrap();
    assert!(report.cancel_error.is_some());
    assert_eq!(report.reader_exit, Some(ReaderExit::EndOfStream));
    assert!(report.port_closed);
    assert!(!report.is_clean());
    assert_eq!(opener.events(), vec!["shutdown", "closed"]);
}

#[tokio::test(start_paused = true)]
async fn sends_fail_fast_once_the_reader_has_stopped() {
    let opener = Arc::new(FakeOpener::new(|| {
        Box::new(|command: &str| if command == "bye" { Reply::Hangup } else { Reply::Silent })
    }));
    let manager = ConnectionManager::with_opener(opener.clone(), ScannerConfig::default());
    manager.connect(named("fake0")).await.unwrap();

    let results = manager
        .execute_with_session(|session| {
            Box::pin(async move {
                let first = session.coordinator().send("bye").await;
                tokio::time::sleep(Duration::from_millis(100)).await;
                let second = session.coordinator().send("sm a 0").await;
                (first, second)
            })
        })
        .await
        .unwrap();

    assert_eq!(results, (true, false));
    assert_eq!(opener.received(), vec!["bye"]);
}

#[tokio::test(start_paused = true)]
async fn automatic_selection_prefers_usb_ports() {
    let opener = Arc::new(
        FakeOpener::new(|| board_with(vec![])).with_ports(vec![port("/dev/ttyS0", false), port("/dev/ttyACM0", true)]),
    );
    let manager = ConnectionManager::with_opener(opener.clone(), ScannerConfig::default());

    let info = manager.connect(PortSelection::Auto).await.unwrap();
    assert_eq!(info.port_name, "/dev/ttyACM0");
    assert_eq!(manager.list_ports().await.unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn automatic_selection_without_ports_fails() {
    let opener = Arc::new(FakeOpener::new(|| board_with(vec![])).with_ports(vec![]));
    let manager = ConnectionManager::with_opener(opener.clone(), ScannerConfig::default());

    let err = manager.connect(PortSelection::Auto).await.unwrap_err();
    assert!(matches!(err, ConnError::NoPorts));
    assert_eq!(opener.open_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn commands_need_a_session() {
    let opener = Arc::new(FakeOpener::new(|| board_with(vec![])));
    let manager = ConnectionManager::with_opener(opener, ScannerConfig::default());

    let err = manager.diagnose().await.unwrap_err();
    assert!(matches!(err, ConnError::NotConnected));
}
