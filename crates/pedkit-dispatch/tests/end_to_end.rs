//! Host commands through the dispatcher into a simulated PED.
//!
//! Invariants tested:
//!   1. Master key in the clear, then a PIN key under it, then a PIN block
//!      against that slot within the timeout
//!   2. A transport key is recorded with its material and becomes the KTK
//!   3. Checksum failures come back as their own response codes and the
//!      attempt is still recorded, as FAILED
//!   4. Protected keys block both delete commands and nothing is touched
//!   5. A link answers in arrival order, skips noise and bad frames, and
//!      closes cleanly on EOF or cancellation

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use pedkit_core::config::{KeyLengthEncoding, LinkConfig};
use pedkit_core::{KeyAlgorithm, KeyStatus, KeyType};
use pedkit_crypto::PinBlockFormat;
use pedkit_dispatch::{Dispatcher, LinkSession};
use pedkit_ped::{pin, Ped, PinLength, PinRequest, SimulatedPed};
use pedkit_protocol::formatter::{
    delete_all_command, delete_single_command, format, inject_key_command, read_serial_command,
    write_serial_command,
};
use pedkit_protocol::message::InjectKeyCommand;
use pedkit_protocol::{FrameCodec, MessageParser};
use pedkit_store::KeyStore;
use tokio::io::AsyncWriteExt;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

const MASTER_3KEY: &str = "0123456789ABCDEFFEDCBA987654321089ABCDEF01234567";
const MASTER_KCV: &str = "3FD539";
const TRANSPORT: &str = "0123456789ABCDEFFEDCBA9876543210";
const TRANSPORT_KCV: &str = "08D7B4";
const WORKING_KCV: &str = "EB7A8D";
/// Working key 89ABCDEF0123456776543210FEDCBA98 under MASTER_3KEY
const WORKING_UNDER_MASTER: &str = "915A894F3E5DE2FBB357A5C410F0AA36";
/// The same working key under TRANSPORT
const WORKING_UNDER_TRANSPORT: &str = "4230EF1CB268495597F4494DD23D8A72";
const IPEK: &str = "6AC292FAA1315B4D858AB3A3D7D5933A";
const IPEK_KCV: &str = "AF8C07";

fn dispatcher() -> Dispatcher<SimulatedPed> {
    let link = LinkConfig {
        device_serial: "0000000000000001".into(),
        ..LinkConfig::default()
    };
    Dispatcher::with_ped(SimulatedPed::default(), Arc::new(KeyStore::in_memory()), link)
}

#[allow(clippy::too_many_arguments)]
fn inject(
    slot: u32,
    ktk_slot: u32,
    key_type: &str,
    sub_type: &str,
    encryption: &str,
    algorithm: &str,
    key_kcv: &str,
    ktk_kcv: &str,
    key_hex: &str,
) -> Vec<u8> {
    let cmd = InjectKeyCommand {
        version: "01".into(),
        key_slot: slot,
        ktk_slot,
        key_type: key_type.into(),
        encryption_type: encryption.into(),
        algorithm: algorithm.into(),
        key_sub_type: sub_type.into(),
        key_checksum: key_kcv.into(),
        ktk_checksum: ktk_kcv.into(),
        ksn: "0".repeat(20),
        key_length: String::new(),
        key_hex: key_hex.into(),
        ktk_hex: None,
        batch: None,
    };
    inject_key_command(&cmd, KeyLengthEncoding::HexBytes)
}

/// Feed one complete frame through parser and dispatcher; return the reply payload.
async fn send(d: &Dispatcher<SimulatedPed>, frame: &[u8]) -> Option<String> {
    let mut codec = FrameCodec::new();
    codec.append_data(frame);
    let payload = codec.next_message().expect("test frame is valid");
    let message = MessageParser::new(KeyLengthEncoding::HexBytes).parse(&payload);
    let reply = d.handle(message).await?;
    let mut codec = FrameCodec::new();
    codec.append_data(&reply);
    let payload = codec.next_message().expect("reply is a valid frame");
    Some(String::from_utf8(payload).unwrap())
}

async fn load_master(d: &Dispatcher<SimulatedPed>) {
    let frame = inject(3, 0, "01", "00", "00", "01", "3FD5", "0000", MASTER_3KEY);
    assert_eq!(send(d, &frame).await.unwrap(), "02003FD5");
}

async fn load_transport(d: &Dispatcher<SimulatedPed>) {
    let frame = inject(1, 0, "06", "00", "00", "00", "08D7", "0000", TRANSPORT);
    assert_eq!(send(d, &frame).await.unwrap(), "020008D7");
}

#[tokio::test]
async fn master_then_pin_key_then_pin_block() {
    let d = dispatcher();
    load_master(&d).await;

    let frame = inject(13, 3, "05", "01", "01", "00", "EB7A", "3FD5", WORKING_UNDER_MASTER);
    assert_eq!(send(&d, &frame).await.unwrap(), "0200EB7A");

    let mut ped = d.ped().lock().await;
    assert!(ped.is_key_present(13, KeyType::WorkingPin).await);

    ped.pin_pad().enter("1234");
    let request = PinRequest {
        slot: 13,
        key_type: KeyType::WorkingPin,
        length: PinLength::parse("4-6").unwrap(),
        pan: Some("4012345678909".into()),
        timeout_secs: 30,
        prompt: None,
        format: PinBlockFormat::Iso0,
        algorithm: KeyAlgorithm::Tdes2Key,
        dukpt: None,
        allow_bypass: false,
    };
    let result = tokio::time::timeout(
        Duration::from_secs(30),
        pin::get_pin_block(&mut *ped, &request, &CancellationToken::new(), Duration::from_secs(5)),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(result.pin_block.len(), 8);
    drop(ped);

    let master = d.store().get_by_kcv(MASTER_KCV).unwrap().unwrap();
    assert_eq!(master.slot, Some(3));
    assert_eq!(master.algorithm, KeyAlgorithm::Tdes3Key);
    assert!(master.material.is_none());

    let working = d.store().get_resident(13, KeyType::WorkingPin).unwrap().unwrap();
    assert_eq!(working.kcv, WORKING_KCV);
    assert_eq!(working.status, KeyStatus::Successful);
}

#[tokio::test]
async fn transport_key_becomes_the_ktk() {
    let d = dispatcher();
    load_transport(&d).await;

    let ktk = d.store().current_ktk().unwrap().unwrap();
    assert_eq!(ktk.kcv, TRANSPORT_KCV);
    assert_eq!(ktk.slot, Some(1));
    let material = d.store().key_material(TRANSPORT_KCV).unwrap().unwrap();
    assert_eq!(hex::encode_upper(material.as_slice()), TRANSPORT);

    // MAC key unwrapped by the PED under the KTK
    let frame = inject(20, 1, "04", "02", "02", "00", "EB7A", "08D7", WORKING_UNDER_TRANSPORT);
    assert_eq!(send(&d, &frame).await.unwrap(), "0200EB7A");
    assert!(d.ped().lock().await.is_key_present(20, KeyType::WorkingMac).await);
}

#[tokio::test]
async fn checksum_failures_have_their_own_codes() {
    let d = dispatcher();
    load_transport(&d).await;

    let wrong_ktk = inject(20, 1, "04", "01", "02", "00", "EB7A", "FFFF", WORKING_UNDER_TRANSPORT);
    assert_eq!(send(&d, &wrong_ktk).await.unwrap(), "0213EB7A");

    let wrong_key = inject(20, 1, "04", "01", "01", "00", "1234", "08D7", WORKING_UNDER_TRANSPORT);
    assert_eq!(send(&d, &wrong_key).await.unwrap(), "02121234");

    assert!(!d.ped().lock().await.is_key_present(20, KeyType::WorkingPin).await);
    let failed = d.store().get_by_kcv("1234").unwrap().unwrap();
    assert_eq!(failed.status, KeyStatus::Failed);
    assert_eq!(failed.slot, Some(20));
    // the KTK keeps its role
    assert_eq!(
        d.store().current_ktk().unwrap().unwrap().kcv,
        TRANSPORT_KCV
    );
}

#[tokio::test]
async fn refused_injections() {
    let d = dispatcher();

    // no KTK at slot 9
    let missing = inject(20, 9, "05", "01", "01", "00", "EB7A", "08D7", WORKING_UNDER_TRANSPORT);
    assert_eq!(send(&d, &missing).await.unwrap(), "0210EB7A");

    // working keys never travel in the clear
    let clear_working = inject(20, 0, "05", "01", "00", "00", "EB7A", "0000", TRANSPORT);
    assert_eq!(send(&d, &clear_working).await.unwrap(), "0210EB7A");

    // TR-31 blocks are not handled
    let tr31 = inject(20, 0, "02", "00", "04", "00", "EB7A", "0000", TRANSPORT);
    assert_eq!(send(&d, &tr31).await.unwrap(), "0211EB7A");

    // unmapped key type
    let odd_type = inject(20, 0, "07", "00", "00", "00", "08D7", "0000", TRANSPORT);
    assert_eq!(send(&d, &odd_type).await.unwrap(), "021008D7");

    assert_eq!(d.ped().lock().await.key_count(), 0);
}

#[tokio::test]
async fn dukpt_ipek_in_the_clear() {
    let d = dispatcher();

    let mut cmd = InjectKeyCommand {
        version: "01".into(),
        key_slot: 2,
        ktk_slot: 0,
        key_type: "02".into(),
        encryption_type: "05".into(),
        algorithm: "00".into(),
        key_sub_type: "00".into(),
        key_checksum: "AF8C".into(),
        ktk_checksum: "0000".into(),
        ksn: "0".repeat(20),
        key_length: String::new(),
        key_hex: IPEK.into(),
        ktk_hex: None,
        batch: None,
    };
    let zero_ksn = inject_key_command(&cmd, KeyLengthEncoding::HexBytes);
    assert_eq!(send(&d, &zero_ksn).await.unwrap(), "0214AF8C");

    cmd.ksn = "FFFF9876543210E00000".into();
    let frame = inject_key_command(&cmd, KeyLengthEncoding::HexBytes);
    assert_eq!(send(&d, &frame).await.unwrap(), "0200AF8C");

    let info = d.ped().lock().await.dukpt_info(2).await.unwrap().unwrap();
    assert_eq!(info.ksn_hex(), "FFFF9876543210E00000");
    let record = d.store().get_by_kcv(IPEK_KCV).unwrap().unwrap();
    assert_eq!(record.key_type, KeyType::DukptInitial);
}

#[tokio::test]
async fn legacy_master_inject_skips_placeholder_checksum() {
    let d = dispatcher();
    let frame = format("01", &["05", TRANSPORT]);
    assert_eq!(send(&d, &frame).await.unwrap(), "02000000");
    let record = d.store().get_resident(5, KeyType::Master).unwrap().unwrap();
    assert_eq!(record.kcv, TRANSPORT_KCV);
}

#[tokio::test]
async fn profile_reference_blocks_single_delete() {
    let d = dispatcher();
    load_master(&d).await;
    d.store().assign_profile("acquirer", MASTER_KCV).unwrap();

    let delete = delete_single_command("00", 3, "01");
    assert_eq!(send(&d, &delete).await.unwrap(), "060B");
    assert!(d.ped().lock().await.is_key_present(3, KeyType::Master).await);
    assert!(d.store().exists_with_kcv(MASTER_KCV).unwrap());

    d.store().remove_profile("acquirer").unwrap();
    assert_eq!(send(&d, &delete).await.unwrap(), "0600");
    assert!(!d.ped().lock().await.is_key_present(3, KeyType::Master).await);
    assert!(!d.store().exists_with_kcv(MASTER_KCV).unwrap());

    // nothing left to delete
    assert_eq!(send(&d, &delete).await.unwrap(), "060B");
}

#[tokio::test]
async fn active_ktk_blocks_delete_all() {
    let d = dispatcher();
    load_master(&d).await;
    load_transport(&d).await;

    let delete_all = delete_all_command("00");
    assert_eq!(send(&d, &delete_all).await.unwrap(), "050B");
    assert_eq!(d.ped().lock().await.key_count(), 2);
    assert_eq!(d.store().list_all().unwrap().len(), 2);

    d.store().remove_ktk_flag(TRANSPORT_KCV).unwrap();
    assert_eq!(send(&d, &delete_all).await.unwrap(), "0500");
    assert_eq!(d.ped().lock().await.key_count(), 0);
    assert!(d.store().list_all().unwrap().is_empty());
}

#[tokio::test]
async fn link_answers_in_order_over_noise() {
    let d = Arc::new(dispatcher());
    let (client, server) = tokio::io::duplex(4096);
    let cancel = CancellationToken::new();
    let session = tokio::spawn(LinkSession::new("bench", d.clone()).run(server, cancel));

    let mut corrupt = write_serial_command("00", "FFFFFFFFFFFFFFFF");
    let last = corrupt.len() - 1;
    corrupt[last] ^= 0x55;

    let mut bytes = b"\xFF\x10noise".to_vec();
    bytes.extend(read_serial_command("00"));
    bytes.extend(corrupt);
    bytes.extend(write_serial_command("00", "ABCDEF0123456789"));
    bytes.extend(read_serial_command("00"));

    let (client_read, mut client_write) = tokio::io::split(client);
    client_write.write_all(&bytes).await.unwrap();

    let mut replies = FramedRead::new(client_read, FrameCodec::new());
    for expected in ["03000000000000000001", "0400", "0300ABCDEF0123456789"] {
        let reply = replies.next().await.unwrap().unwrap();
        assert_eq!(String::from_utf8(reply).unwrap(), expected);
    }

    client_write.shutdown().await.unwrap();
    let stats = session.await.unwrap().unwrap();
    assert_eq!(stats.frames, 3);
    assert_eq!(stats.replies, 3);
}

#[tokio::test]
async fn link_stops_on_cancellation() {
    let d = Arc::new(dispatcher());
    let (_client, server) = tokio::io::duplex(1024);
    let cancel = CancellationToken::new();
    let session = tokio::spawn(LinkSession::new("idle", d).run(server, cancel.clone()));

    cancel.cancel();
    let stats = tokio::time::timeout(Duration::from_secs(5), session)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(stats.frames, 0);
}
