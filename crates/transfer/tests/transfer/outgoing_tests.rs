use super::*;
use crate::test_support::{RecordingSink, sample_folder, temp_dir, write_file};
use crate::transfer::crypto::decrypt_bytes;
use crate::transfer::wire::{Record, decode_metadata, read_exact_vec, read_record};

struct SentRecord {
    header: RecordHeader,
    body: Vec<u8>,
}

async fn parse_stream(bytes: &[u8]) -> (Vec<SentRecord>, bool) {
    let mut reader = bytes;
    let mut records = Vec::new();
    loop {
        match read_record(&mut reader).await.expect("read record") {
            Some(Record::File(header)) => {
                let body = read_exact_vec(&mut reader, header.size, u64::MAX, "body")
                    .await
                    .expect("read body");
                records.push(SentRecord { header, body });
            }
            Some(Record::Halt) => return (records, true),
            None => return (records, false),
        }
    }
}

fn plan_for(path: PathBuf) -> TransferPlan {
    crate::transfer::selection::plan_selection(&[path]).expect("plan selection")
}

#[tokio::test]
async fn run_should_send_metadata_then_files_then_halt() {
    let root = temp_dir("outgoing-order");
    let folder = sample_folder(&root);
    let profile = TransferPorts::default().profile(DeviceVariant::Python);

    let mut stream = Vec::new();
    let summary = OutgoingTransfer::new(plan_for(folder), profile, None)
        .run(&mut stream, Arc::new(NoopTransferEventSink))
        .await
        .expect("send");

    assert_eq!(summary, TransferSummary { bytes: 30, files: 2 });
    let (records, halted) = parse_stream(&stream).await;
    assert!(halted);
    let names = records
        .iter()
        .map(|record| record.header.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["metadata.json", "a.txt", "sub/b.txt"]);
    assert!(records.iter().all(|record| !record.header.encrypted));

    let metadata = decode_metadata(&records[0].body).expect("decode metadata");
    assert_eq!(metadata.base_folder_name.as_deref(), Some("trip"));
    assert!(metadata.entries.iter().any(|entry| entry.path == "sub2/"));
    assert_eq!(records[1].body, vec![b'a'; 10]);
    assert_eq!(records[2].body, vec![b'b'; 20]);
}

#[tokio::test]
async fn run_should_stream_empty_files() {
    let root = temp_dir("outgoing-empty");
    let empty = root.join("empty.txt");
    write_file(&empty, b"");
    let profile = TransferPorts::default().profile(DeviceVariant::Java);

    let mut stream = Vec::new();
    let summary = OutgoingTransfer::new(plan_for(empty), profile, None)
        .run(&mut stream, Arc::new(NoopTransferEventSink))
        .await
        .expect("send");

    assert_eq!(summary, TransferSummary { bytes: 0, files: 1 });
    let (records, halted) = parse_stream(&stream).await;
    assert!(halted);
    assert_eq!(records[1].header.name, "empty.txt");
    assert_eq!(records[1].header.size, 0);
}

#[tokio::test]
async fn encrypted_records_should_carry_crypt_suffix_and_leave_no_copies() {
    let root = temp_dir("outgoing-encrypted");
    let folder = sample_folder(&root);
    let profile = TransferPorts::default().profile(DeviceVariant::Java);

    let password = Some("pw".to_string());
    let transfer = OutgoingTransfer::new(plan_for(folder.clone()), profile, password);
    assert!(transfer.is_encrypted());
    let mut stream = Vec::new();
    transfer
        .run(&mut stream, Arc::new(NoopTransferEventSink))
        .await
        .expect("send");

    let (records, _) = parse_stream(&stream).await;
    assert!(!records[0].header.encrypted);
    let files = &records[1..];
    assert_eq!(files[0].header.name, "a.txt.crypt");
    assert_eq!(files[1].header.name, "sub/b.txt.crypt");
    assert!(files.iter().all(|record| record.header.encrypted));
    assert_eq!(
        decrypt_bytes(&files[0].body, "pw").expect("decrypt"),
        vec![b'a'; 10]
    );

    let leftovers = walkdir::WalkDir::new(&folder)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "crypt"))
        .count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn encrypted_send_should_leave_existing_crypt_files_alone() {
    let root = temp_dir("outgoing-crypt-collision");
    let folder = root.join("docs");
    write_file(&folder.join("a.txt"), b"plain");
    write_file(&folder.join("a.txt.crypt"), b"USER DATA");
    let profile = TransferPorts::default().profile(DeviceVariant::Python);

    let mut stream = Vec::new();
    let summary = OutgoingTransfer::new(plan_for(folder.clone()), profile, Some("pw".to_string()))
        .run(&mut stream, Arc::new(NoopTransferEventSink))
        .await
        .expect("send");

    assert_eq!(summary.files, 2);
    assert_eq!(
        std::fs::read(folder.join("a.txt.crypt")).expect("user file"),
        b"USER DATA"
    );
    let mut left = std::fs::read_dir(&folder)
        .expect("list folder")
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .collect::<Vec<_>>();
    left.sort();
    assert_eq!(left, vec!["a.txt", "a.txt.crypt"]);

    let (records, halted) = parse_stream(&stream).await;
    assert!(halted);
    let plain = records
        .iter()
        .find(|record| record.header.name == "a.txt.crypt")
        .expect("record for a.txt");
    assert_eq!(decrypt_bytes(&plain.body, "pw").expect("decrypt a"), b"plain");
    let user = records
        .iter()
        .find(|record| record.header.name == "a.txt.crypt.crypt")
        .expect("record for the user file");
    assert_eq!(decrypt_bytes(&user.body, "pw").expect("decrypt user"), b"USER DATA");
}

#[tokio::test]
async fn peers_without_encryption_should_receive_plaintext() {
    let root = temp_dir("outgoing-swift");
    let file = root.join("note.txt");
    write_file(&file, b"plain words");
    let profile = TransferPorts::default().profile(DeviceVariant::Swift);

    let transfer = OutgoingTransfer::new(plan_for(file), profile, Some("pw".to_string()));
    assert!(!transfer.is_encrypted());
    let mut stream = Vec::new();
    transfer
        .run(&mut stream, Arc::new(NoopTransferEventSink))
        .await
        .expect("send");

    let (records, _) = parse_stream(&stream).await;
    assert_eq!(records[1].header.name, "note.txt");
    assert!(!records[1].header.encrypted);
    assert_eq!(records[1].body, b"plain words".to_vec());
}

#[tokio::test]
async fn run_should_report_counts_and_finish_at_full_progress() {
    let root = temp_dir("outgoing-events");
    let folder = sample_folder(&root);
    let sink = Arc::new(RecordingSink::default());
    let profile = TransferPorts::default().profile(DeviceVariant::Python);

    let mut stream = Vec::new();
    OutgoingTransfer::new(plan_for(folder), profile, None)
        .run(&mut stream, sink.clone())
        .await
        .expect("send");

    let events = sink.events();
    assert_eq!(
        events.first(),
        Some(&TransferEvent::FileCount {
            direction: TransferDirection::Send,
            total: 2,
            done: 0,
            pending: 2,
        })
    );
    assert!(events.contains(&TransferEvent::FileCount {
        direction: TransferDirection::Send,
        total: 2,
        done: 2,
        pending: 0,
    }));
    let last_overall = events.iter().rev().find_map(|event| match event {
        TransferEvent::OverallProgress { percent, .. } => Some(*percent),
        _ => None,
    });
    assert_eq!(last_overall, Some(100));
    assert_eq!(sink.completed(TransferDirection::Send), vec![(30, 2)]);
}
