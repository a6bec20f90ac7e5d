use std::fs;

use kernel::settings::TransferSettings;

use super::*;
use crate::ErrorCategory;
use crate::test_support::{
    RecordingSink, loopback_ports, sample_folder, temp_dir, wait_for, write_file,
};

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

struct FixedPrompt(&'static str);

impl PasswordPrompt for FixedPrompt {
    fn prompt(&self, _request: &crate::transfer::crypto::PasswordRequest) -> Option<String> {
        Some(self.0.to_string())
    }
}

/// Holds every prompt until released or until ten seconds pass.
struct HeldPrompt(std::sync::Mutex<std::sync::mpsc::Receiver<()>>);

impl PasswordPrompt for HeldPrompt {
    fn prompt(&self, _request: &crate::transfer::crypto::PasswordRequest) -> Option<String> {
        let release = self.0.lock().expect("prompt lock");
        let _ = release.recv_timeout(Duration::from_secs(10));
        None
    }
}

fn settings(device_name: &str, save_directory: PathBuf) -> Arc<SettingsStore> {
    Arc::new(SettingsStore::new(TransferSettings {
        device_name: device_name.to_string(),
        save_directory,
        encryption_enabled: false,
    }))
}

fn service(
    ports: &TransferPorts,
    device_name: &str,
    save_directory: PathBuf,
) -> (TransferService, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let service = TransferService::new(settings(device_name, save_directory), sink.clone())
        .with_ports(ports.clone())
        .with_discovery_window(Duration::from_millis(400));
    (service, sink)
}

#[tokio::test]
async fn folder_should_arrive_with_its_layout() {
    let ports = loopback_ports();
    let source = temp_dir("service-folder-source");
    let folder = sample_folder(&source);
    let save = temp_dir("service-folder-save");
    let (receiver, receiver_sink) = service(&ports, "desk", save.clone());
    let (sender, sender_sink) = service(&ports, "laptop", temp_dir("service-folder-unused"));
    receiver.start_receiving().await.expect("start receiving");

    let summary = sender
        .send(LOCALHOST, vec![folder], None)
        .await
        .expect("send folder");

    assert_eq!(summary, TransferSummary { bytes: 30, files: 2 });
    assert!(wait_for(|| !receiver_sink.completed(TransferDirection::Receive).is_empty()).await);
    assert_eq!(receiver_sink.completed(TransferDirection::Receive), vec![(30, 2)]);
    assert_eq!(fs::read(save.join("trip/a.txt")).expect("read a"), vec![b'a'; 10]);
    assert_eq!(fs::read(save.join("trip/sub/b.txt")).expect("read b"), vec![b'b'; 20]);
    assert!(save.join("trip/sub2").is_dir());
    assert!(receiver_sink.events().contains(&TransferEvent::FileCount {
        direction: TransferDirection::Receive,
        total: 2,
        done: 0,
        pending: 2,
    }));
    assert!(sender_sink.events().iter().any(|event| matches!(
        event,
        TransferEvent::PeerIdentified { identity, .. } if identity.variant == DeviceVariant::Python
    )));

    receiver.stop_receiving().await;
}

#[tokio::test]
async fn sending_the_same_folder_twice_should_not_merge() {
    let ports = loopback_ports();
    let folder = sample_folder(&temp_dir("service-twice-source"));
    let save = temp_dir("service-twice-save");
    let (receiver, receiver_sink) = service(&ports, "desk", save.clone());
    let (sender, _) = service(&ports, "laptop", temp_dir("service-twice-unused"));
    receiver.start_receiving().await.expect("start receiving");

    for _ in 0..2 {
        sender
            .send(LOCALHOST, vec![folder.clone()], None)
            .await
            .expect("send folder");
    }

    assert!(wait_for(|| receiver_sink.completed(TransferDirection::Receive).len() == 2).await);
    assert!(save.join("trip/a.txt").is_file());
    assert!(save.join("trip (1)/a.txt").is_file());
    assert!(save.join("trip (1)/sub2").is_dir());

    receiver.stop_receiving().await;
}

#[tokio::test]
async fn java_receiver_should_be_reached_on_the_android_port() {
    let ports = loopback_ports();
    let save = temp_dir("service-java-save");
    let file = temp_dir("service-java-source").join("photo.jpg");
    write_file(&file, &[9u8; 10_000]);

    let control = TcpListener::bind((Ipv4Addr::LOCALHOST, ports.control))
        .await
        .expect("bind control");
    let data = TcpListener::bind((Ipv4Addr::LOCALHOST, ports.android_data))
        .await
        .expect("bind android data");
    let java = DeviceIdentity {
        variant: DeviceVariant::Java,
        os_name: "android".to_string(),
    };
    let fake_control = tokio::spawn(async move {
        let (mut stream, _) = control.accept().await.expect("accept control");
        negotiate_as_receiver(&mut stream, &java)
            .await
            .expect("negotiate")
    });
    let profile = ports.profile(DeviceVariant::Python);
    let fake_save = save.clone();
    let fake_data = tokio::spawn(async move {
        let (mut stream, _) = data.accept().await.expect("accept data");
        IncomingTransfer::new(fake_save, profile)
            .run(&mut stream, Arc::new(NoopTransferEventSink))
            .await
            .expect("receive")
    });

    let (sender, _) = service(&ports, "laptop", temp_dir("service-java-unused"));
    let summary = sender
        .send(LOCALHOST, vec![file], None)
        .await
        .expect("send to java");

    let seen = fake_control.await.expect("control task");
    let outcome = fake_data.await.expect("data task");
    assert_eq!(seen, DeviceIdentity::local());
    assert_eq!(summary.bytes, 10_000);
    assert_eq!(outcome.files, 1);
    assert_eq!(fs::read(save.join("photo.jpg")).expect("read photo"), vec![9u8; 10_000]);
    assert_eq!(ports.profile(DeviceVariant::Java).chunk_size, 4096);
}

#[tokio::test]
async fn encrypted_files_should_be_decrypted_after_the_batch() {
    let ports = loopback_ports();
    let source = temp_dir("service-crypt-source");
    let file = source.join("secret.txt");
    write_file(&file, b"meet at noon");
    let save = temp_dir("service-crypt-save");
    let (receiver, receiver_sink) = service(&ports, "desk", save.clone());
    let receiver = receiver.with_password_prompt(Arc::new(FixedPrompt("pw")));
    let (sender, _) = service(&ports, "laptop", temp_dir("service-crypt-unused"));
    receiver.start_receiving().await.expect("start receiving");

    sender
        .send(LOCALHOST, vec![file], Some("pw".to_string()))
        .await
        .expect("send encrypted");

    let finished = || {
        receiver_sink
            .events()
            .into_iter()
            .find_map(|event| match event {
                TransferEvent::DecryptFinished { report } => Some(report),
                _ => None,
            })
    };
    assert!(wait_for(|| finished().is_some()).await);
    let report = finished().expect("decrypt report");
    assert_eq!(report.decrypted, vec![save.join("secret.txt")]);
    assert!(report.deleted.is_empty());
    assert_eq!(fs::read(save.join("secret.txt")).expect("read plain"), b"meet at noon");
    assert!(!save.join("secret.txt.crypt").exists());
    assert!(!source.join("secret.txt.crypt").exists());
    assert!(receiver_sink.events().iter().any(|event| matches!(
        event,
        TransferEvent::DecryptNeeded { paths } if paths == &vec![save.join("secret.txt.crypt")]
    )));

    receiver.stop_receiving().await;
}

#[tokio::test]
async fn stop_should_not_wait_for_a_pending_password_prompt() {
    let ports = loopback_ports();
    let source = temp_dir("service-held-source");
    let file = source.join("secret.txt");
    write_file(&file, b"meet at noon");
    let save = temp_dir("service-held-save");
    let (release, held) = std::sync::mpsc::channel::<()>();
    let (receiver, receiver_sink) = service(&ports, "desk", save.clone());
    let receiver =
        receiver.with_password_prompt(Arc::new(HeldPrompt(std::sync::Mutex::new(held))));
    let (sender, _) = service(&ports, "laptop", temp_dir("service-held-unused"));
    receiver.start_receiving().await.expect("start receiving");

    sender
        .send(LOCALHOST, vec![file], Some("pw".to_string()))
        .await
        .expect("send encrypted");
    assert!(
        wait_for(|| receiver_sink
            .events()
            .iter()
            .any(|event| matches!(event, TransferEvent::DecryptNeeded { .. })))
        .await
    );

    let stopped = tokio::time::timeout(Duration::from_secs(3), receiver.stop_receiving()).await;
    drop(release);

    assert!(stopped.is_ok());
    assert!(!receiver.is_receiving());
    assert!(save.join("secret.txt.crypt").is_file());
}

#[tokio::test]
async fn discover_should_find_a_receiver_and_refuse_overlapping_rounds() {
    let ports = loopback_ports();
    let (receiver, _) = service(&ports, "desk", temp_dir("service-discover-save"));
    let (seeker, seeker_sink) = service(&ports, "laptop", temp_dir("service-discover-unused"));
    receiver.start_receiving().await.expect("start receiving");

    let (first, second) = tokio::join!(seeker.discover(), seeker.discover());

    let peers = first.expect("discovery round");
    assert_eq!(
        peers,
        vec![DiscoveredPeer {
            display_name: "desk".to_string(),
            address: LOCALHOST,
        }]
    );
    assert_eq!(second.expect_err("overlapping round").code, "discovery_busy");
    assert!(seeker_sink.events().iter().any(|event| matches!(
        event,
        TransferEvent::PeerDiscovered { peer } if peer.display_name == "desk"
    )));

    receiver.stop_receiving().await;
}

#[tokio::test]
async fn start_receiving_should_require_the_save_directory() {
    let ports = loopback_ports();
    let missing = temp_dir("service-missing").join("nope");
    let (receiver, _) = service(&ports, "desk", missing);

    let error = receiver.start_receiving().await.expect_err("missing save dir");

    assert_eq!(error.code, "filesystem_save_dir_missing");
    assert!(!receiver.is_receiving());
}

#[tokio::test]
async fn stop_receiving_should_release_the_ports() {
    let ports = loopback_ports();
    let (receiver, _) = service(&ports, "desk", temp_dir("service-stop"));
    receiver.start_receiving().await.expect("start receiving");
    receiver.start_receiving().await.expect("second start is a no-op");

    receiver.stop_receiving().await;

    assert!(!receiver.is_receiving());
    receiver.start_receiving().await.expect("restart receiving");
    receiver.stop_receiving().await;
}

#[tokio::test]
async fn send_without_receiver_should_fail_with_a_connection_error() {
    let ports = loopback_ports();
    let file = temp_dir("service-refused").join("a.txt");
    write_file(&file, b"a");
    let (sender, sink) = service(&ports, "laptop", temp_dir("service-refused-unused"));

    let error = sender
        .send(LOCALHOST, vec![file], None)
        .await
        .expect_err("nobody listening");

    assert_eq!(error.category(), ErrorCategory::Connection);
    assert!(sink.events().iter().any(|event| matches!(
        event,
        TransferEvent::Failed { direction: TransferDirection::Send, code, .. }
            if code == "connection_connect_failed"
    )));
}

#[tokio::test]
async fn second_send_should_be_refused_while_one_is_running() {
    let ports = loopback_ports();
    let file = temp_dir("service-busy").join("a.txt");
    write_file(&file, b"a");
    let (sender, _) = service(&ports, "laptop", temp_dir("service-busy-unused"));
    let _running = sender.send_slot.try_lock().expect("hold send slot");

    let error = sender
        .send(LOCALHOST, vec![file], None)
        .await
        .expect_err("busy");

    assert_eq!(error.code, "transfer_send_busy");
}

#[tokio::test]
async fn invalid_selection_should_fail_before_connecting() {
    let ports = loopback_ports();
    let (sender, _) = service(&ports, "laptop", temp_dir("service-selection"));

    let error = sender
        .send(LOCALHOST, Vec::new(), None)
        .await
        .expect_err("empty selection");

    assert_eq!(error.code, "filesystem_selection_invalid");
}

#[test]
fn background_tasks_should_need_a_runtime() {
    let ports = loopback_ports();
    let (service, _) = service(&ports, "desk", temp_dir("service-noop"));
    let service = service.with_task_spawner(Arc::new(NoopTransferTaskSpawner));

    let error = service
        .spawn_task("noop_check", async {})
        .expect_err("noop spawner");

    assert_eq!(error.code, "transfer_runtime_unavailable");
    assert_eq!(error.context_value("task"), Some("noop_check"));
}
