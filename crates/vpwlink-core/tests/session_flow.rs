use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use vpwlink_core::codec::{AdapterKind, HeaderMode};
use vpwlink_core::config::SessionConfig;
use vpwlink_core::logger::MemoryLogger;
use vpwlink_core::protocol::crc::vpw_crc;
use vpwlink_core::protocol::{
    spawn_keep_alive, BlockId, RequestBuilder, ResponseStatus, SeedReply, ToolPresentNotifier,
    UnlockOutcome,
};
use vpwlink_core::session::Session;
use vpwlink_core::transport::{MockHandle, MockTransport, PortConfig};

/// PCM replies to decoded requests, without CRC
fn pcm(request: &[u8]) -> Option<Vec<u8>> {
    let reply: &[u8] = match request {
        [0x6C, 0x10, 0xF0, 0x3C, 0x01] => b"\x6C\xF0\x10\x7C\x01\x001G1YY",
        [0x6C, 0x10, 0xF0, 0x3C, 0x02] => b"\x6C\xF0\x10\x7C\x02\x002284",
        [0x6C, 0x10, 0xF0, 0x3C, 0x03] => b"\x6C\xF0\x10\x7C\x03\x005123",
        [0x6C, 0x10, 0xF0, 0x3C, 0x04] => b"\x6C\xF0\x10\x7C\x04\x00\x01AB",
        [0x6C, 0x10, 0xF0, 0x3C, 0x05] => b"\x6C\xF0\x10\x7C\x05C123",
        [0x6C, 0x10, 0xF0, 0x3C, 0x06] => b"\x6C\xF0\x10\x7C\x064567",
        [0x6C, 0x10, 0xF0, 0x3C, 0x0A] => &[0x6C, 0xF0, 0x10, 0x7C, 0x0A, 0x00, 0xBA, 0x31, 0x68],
        [0x6C, 0x10, 0xF0, 0x3C, 0x08] => &[0x6C, 0xF0, 0x10, 0x7C, 0x08, 0x00, 0xBA, 0x12, 0x34],
        [0x6C, 0x10, 0xF0, 0x3C, 0x14] => b"\x6C\xF0\x10\x7C\x14ADBC",
        [0x6C, 0x10, 0xF0, 0x3C, 0xA0] => &[0x6C, 0xF0, 0x10, 0x7C, 0xA0, 0x03],
        // refuses the speedometer calibration id
        [0x6C, 0x10, 0xF0, 0x3C, 0x11] => &[0x6C, 0xF0, 0x10, 0x7F, 0x3C, 0x11, 0x12],
        [0x6C, 0x10, 0xF0, 0x27, 0x01] => &[0x6C, 0xF0, 0x10, 0x67, 0x01, 0x2A, 0xED],
        [0x6C, 0x10, 0xF0, 0x27, 0x02, 0xA6, 0x23] => &[0x6C, 0xF0, 0x10, 0x67, 0x02, 0x34],
        [0x6C, 0x10, 0xF0, 0x27, 0x02, ..] => &[0x6C, 0xF0, 0x10, 0x67, 0x02, 0x35],
        _ => return None,
    };
    Some(reply.to_vec())
}

/// ScanTool in STPX mode in front of the PCM
fn scantool(request: &[u8]) -> Vec<Vec<u8>> {
    let line = String::from_utf8_lossy(request).trim().to_string();
    if let Some(rest) = line.strip_prefix("STPX H:") {
        let (header, data) = rest.split_once(", R:1, D:").unwrap();
        let bytes = hex::decode(format!("{}{}", header, data.trim())).unwrap();
        let mut replies = vec![b"OK>".to_vec()];
        if let Some(mut reply) = pcm(&bytes) {
            reply.push(vpw_crc(&reply));
            replies.push(format!("\r\n{}\r\n>", hex::encode_upper(reply)).into_bytes());
        }
        return replies;
    }
    match line.as_str() {
        "AT Z" => vec![b"\r\rELM327 v1.4b\r\r>".to_vec()],
        "AT DP" => vec![b"SAE J1850 VPW\r\r>".to_vec()],
        "ST I" => vec![b"STN1110 v4.2.1\r\r>".to_vec()],
        _ => vec![b"OK\r\r>".to_vec()],
    }
}

fn config() -> SessionConfig {
    SessionConfig {
        adapter: AdapterKind::AtCommand {
            header_mode: HeaderMode::Stpx,
        },
        port: PortConfig::Plain,
        ..SessionConfig::default()
    }
}

fn open_session(transport: MockTransport) -> (Session<MockTransport>, MockHandle, Arc<MemoryLogger>) {
    let handle = transport.handle();
    let logger = Arc::new(MemoryLogger::new());
    let mut session = Session::new(transport, &config(), logger.clone());
    let info = session.open().unwrap();
    assert_eq!(info.name, "ELM327 v1.4b");
    handle.clear_sent();
    (session, handle, logger)
}

#[test]
fn test_identity_queries() {
    let (mut session, _, _) = open_session(MockTransport::with_responder(scantool));

    let os = session.query_operating_system_id();
    assert_eq!(os.status, ResponseStatus::Success);
    assert_eq!(os.value, 0x00BA_3168);

    let vin = session.query_vin();
    assert_eq!(vin.status, ResponseStatus::Success);
    assert_eq!(vin.value, "1G1YY22845123");

    let serial = session.query_serial();
    assert_eq!(serial.status, ResponseStatus::Success);
    assert_eq!(serial.value, "ABC1234567");

    let bcc = session.query_broadcast_code();
    assert_eq!(bcc.value, "ADBC");

    let mec = session.query_manufacturer_enable_counter();
    assert_eq!(mec.value, 3);

    let cal = session.query_calibration_id(BlockId::CalibrationId);
    assert_eq!(cal.value, 0x00BA_1234);
}

#[test]
fn test_refusal_exhausts_retries() {
    let (mut session, handle, _) = open_session(MockTransport::with_responder(scantool));
    let response = session.query_calibration_id(BlockId::SpeedCalibrationId);
    assert_eq!(response.status, ResponseStatus::Error);
    assert_eq!(response.value, 0);
    // one request; the remaining attempts listen without resending
    assert_eq!(handle.sent().len(), 1);
}

#[test]
fn test_unlock_flow() {
    let (mut session, handle, logger) = open_session(MockTransport::with_responder(scantool));

    assert_eq!(session.request_seed().value, SeedReply::Seed(0xED2A));
    handle.clear_sent();

    let response = session.unlock();
    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.value, UnlockOutcome::Accepted);

    let sent: Vec<String> = handle
        .sent()
        .iter()
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
        .collect();
    assert_eq!(
        sent,
        vec![
            "STPX H:6C10F0, R:1, D:2701 \r".to_string(),
            "STPX H:6C10F0, R:1, D:2702A623 \r".to_string(),
        ]
    );
    assert!(logger.user_lines().contains(&"PCM unlocked".to_string()));
}

#[test]
fn test_wrong_key() {
    let (mut session, _, _) = open_session(MockTransport::with_responder(scantool));
    let response = session.send_key(0x0001);
    assert_eq!(response.status, ResponseStatus::UnexpectedResponse);
    assert_eq!(response.value, UnlockOutcome::Unrecognized(0x35));
}

#[test]
fn test_cancel_mid_exchange() {
    let cancel_slot: Arc<Mutex<Option<CancellationToken>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&cancel_slot);
    let transport = MockTransport::with_responder(move |request| {
        if request.starts_with(b"STPX") {
            if let Some(token) = slot.lock().unwrap().as_ref() {
                token.cancel();
            }
            // acknowledged, but the PCM never answers
            return vec![b"OK>".to_vec()];
        }
        scantool(request)
    });
    let (mut session, handle, _) = open_session(transport);
    *cancel_slot.lock().unwrap() = Some(session.cancellation_token());
    let discards = handle.discard_count();

    let response = session.query_operating_system_id();
    assert_eq!(response.status, ResponseStatus::Cancelled);
    assert!(handle.discard_count() > discards);

    session.reset_cancellation();
    assert!(!session.cancellation_token().is_cancelled());
}

#[test]
fn test_keep_alive_worker_shares_device() {
    let (session, handle, _) = open_session(MockTransport::with_responder(scantool));
    let device = Arc::new(Mutex::new(session.into_device()));
    let cancel = CancellationToken::new();
    let notifier = ToolPresentNotifier::new(
        RequestBuilder::default().tool_present(),
        Duration::from_millis(20),
    );

    let worker = spawn_keep_alive(Arc::clone(&device), notifier, cancel.clone());
    thread::sleep(Duration::from_millis(100));
    cancel.cancel();
    worker.join().unwrap();

    let sent = handle.sent();
    assert!(sent.len() >= 2);
    assert!(sent
        .iter()
        .all(|bytes| bytes.as_slice() == b"STPX H:8CFEF0, R:1, D:3F \r"));
}

#[test]
fn test_notify_tool_present_is_rate_limited() {
    let (mut session, handle, _) = open_session(MockTransport::with_responder(scantool));
    assert!(session.notify_tool_present());
    assert!(!session.notify_tool_present());
    assert!(session.force_notify_tool_present());
    assert_eq!(handle.sent().len(), 2);
}
