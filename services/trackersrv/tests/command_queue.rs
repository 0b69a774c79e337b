//! Modem command queue behaviour seen from a transport writer

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod common;

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use trackersrv::modem::queue::{LineOutcome, OnComplete, TIMEOUT_PENALTY};
use trackersrv::modem::{CommandQueue, CommandResponse, CommandTimeout, Terminator};

const UNSOLICITED: &[&str] = &["+CMTI", "+CDS", "RING"];
const TIMEOUT: Duration = Duration::from_secs(5);

fn queue() -> (CommandQueue, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CommandQueue::new(tx, TIMEOUT, UNSOLICITED), rx)
}

fn recorder() -> (OnComplete, Arc<Mutex<Vec<CommandResponse>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (Box::new(move |r| sink.lock().push(r)), seen)
}

async fn settle() {
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_at_most_one_command_in_flight() {
    let (queue, mut rx) = queue();
    let mut seen = Vec::new();
    for text in ["ATZ", "ATE0", "AT+CMGF=0", "AT+CNMI=2,1,0,1,0"] {
        let (cb, responses) = recorder();
        queue.execute(text, Some(cb), false, CommandTimeout::Default);
        seen.push(responses);
    }

    for (i, expected) in ["ATZ", "ATE0", "AT+CMGF=0", "AT+CNMI=2,1,0,1,0"]
        .iter()
        .enumerate()
    {
        assert_eq!(rx.try_recv().unwrap(), format!("{}\r", expected));
        assert!(rx.try_recv().is_err(), "second write before completion");
        assert_eq!(queue.in_flight().as_deref(), Some(*expected));
        assert_eq!(queue.pending_len(), 3 - i);

        // unsolicited traffic never completes the command
        assert!(matches!(
            queue.accept_line("+CMTI: \"SM\",3"),
            LineOutcome::Unsolicited(_)
        ));
        assert!(rx.try_recv().is_err());

        assert_eq!(
            queue.accept_line("OK"),
            LineOutcome::Completed(Terminator::Ok)
        );
        assert_eq!(seen[i].lock().len(), 1);
    }
    assert!(queue.in_flight().is_none());
}

#[tokio::test]
async fn test_submit_waits_for_terminator() {
    let (queue, mut rx) = queue();
    let waiter = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.submit("AT+CGMI", false, CommandTimeout::Default).await })
    };
    settle().await;
    assert_eq!(rx.recv().await.unwrap(), "AT+CGMI\r");

    queue.accept_line("AT+CGMI");
    queue.accept_line("huawei");
    queue.accept_line("OK");

    let response = waiter.await.unwrap();
    assert!(response.is_ok());
    assert_eq!(response.data, vec!["huawei".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_fires_once_at_the_boundary() {
    let (queue, mut rx) = queue();
    let (cb, seen) = recorder();
    queue.execute("AT+CMGS=23", Some(cb), false, CommandTimeout::Default);
    queue.execute("AT", None, false, CommandTimeout::Disabled);
    assert_eq!(rx.try_recv().unwrap(), "AT+CMGS=23\r");

    tokio::time::advance(TIMEOUT - Duration::from_millis(1)).await;
    settle().await;
    assert!(seen.lock().is_empty());
    assert_eq!(queue.in_flight().as_deref(), Some("AT+CMGS=23"));
    assert!(rx.try_recv().is_err());

    tokio::time::advance(Duration::from_millis(1)).await;
    settle().await;
    {
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].terminator, Terminator::Timeout);
        assert_eq!(seen[0].data, vec!["timeout".to_string()]);
    }
    assert_eq!(queue.error_counter(), TIMEOUT_PENALTY);
    assert_eq!(rx.try_recv().unwrap(), "AT\r");

    // the late answer belongs to nobody but the next command
    queue.accept_line("OK");
    tokio::time::advance(TIMEOUT * 2).await;
    settle().await;
    assert_eq!(seen.lock().len(), 1);
    assert!(queue.in_flight().is_none());
}

#[tokio::test]
async fn test_closed_queue_rejects_new_commands() {
    let (queue, _rx) = queue();
    let (cb, seen) = recorder();
    queue.execute("AT+CMGL=4", Some(cb), false, CommandTimeout::Default);
    queue.close("serial port removed");
    assert_eq!(
        seen.lock()[0].terminator,
        Terminator::Closed("serial port removed".to_string())
    );

    let response = queue.submit("AT", true, CommandTimeout::Default).await;
    assert!(!response.is_ok());
    assert!(matches!(response.terminator, Terminator::Closed(_)));
}
