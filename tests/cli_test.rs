use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn replay_file(lines: &[&str]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
    file
}

#[test]
fn test_replay_produces_summary_csv() {
    let input = replay_file(&[
        r#"{"kind":"application","id":1,"order_id":"ord_1","amount":"499.00"}"#,
        r#"{"kind":"webhook","event_id":"evt_1","event_type":"payment_succeeded","order_id":"ord_1"}"#,
    ]);

    Command::cargo_bin("permitflow")
        .unwrap()
        .arg(input.path())
        .assert()
        .success()
        .stdout(predicate::str::starts_with("id,status,order_id"))
        .stdout(predicate::str::contains("1,PERMIT_READY,ord_1"));
}

#[test]
fn test_duplicate_deliveries_do_not_change_the_outcome() {
    let input = replay_file(&[
        r#"{"kind":"application","id":1,"order_id":"ord_1","amount":"499.00"}"#,
        r#"{"kind":"webhook","event_id":"evt_1","event_type":"payment_succeeded","order_id":"ord_1"}"#,
        r#"{"kind":"webhook","event_id":"evt_1","event_type":"payment_succeeded","order_id":"ord_1"}"#,
        r#"{"kind":"webhook","event_id":"evt_1","event_type":"payment_succeeded","order_id":"ord_1"}"#,
    ]);

    Command::cargo_bin("permitflow")
        .unwrap()
        .arg(input.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("PERMIT_READY").count(1));
}

#[test]
fn test_failed_payment_lands_in_summary_with_reason() {
    let input = replay_file(&[
        r#"{"kind":"application","id":1,"order_id":"ord_1","amount":"499.00"}"#,
        r#"{"kind":"webhook","event_id":"evt_1","event_type":"payment_failed","order_id":"ord_1","failure_reason":"card declined"}"#,
    ]);

    Command::cargo_bin("permitflow")
        .unwrap()
        .arg(input.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("1,PAYMENT_FAILED,ord_1"))
        .stdout(predicate::str::contains("card declined"));
}

#[test]
fn test_malformed_line_is_reported_and_skipped() {
    let input = replay_file(&[
        r#"{"kind":"application","id":1,"order_id":"ord_1","amount":"499.00"}"#,
        "{not json}",
        r#"{"kind":"webhook","event_id":"evt_1","event_type":"payment_succeeded","order_id":"ord_1"}"#,
    ]);

    Command::cargo_bin("permitflow")
        .unwrap()
        .arg(input.path())
        .assert()
        .success()
        .stderr(predicate::str::contains("Error reading record"))
        .stdout(predicate::str::contains("1,PERMIT_READY,ord_1"));
}

#[test]
fn test_missing_input_file_fails() {
    Command::cargo_bin("permitflow")
        .unwrap()
        .arg("/nonexistent/replay.jsonl")
        .assert()
        .failure();
}
