use super::*;

async fn collect(bytes: &[u8]) -> Vec<String> {
    let mut lines = Vec::new();
    read_lines(bytes, "test", |line| lines.push(line)).await;
    lines
}

#[tokio::test]
async fn invalid_utf8_is_replaced_and_reading_continues() {
    let lines = collect(b"caf\xe9\nafter\n").await;
    assert_eq!(lines, vec!["caf\u{fffd}".to_string(), "after".to_string()]);
}

#[tokio::test]
async fn crlf_and_unterminated_last_line() {
    let lines = collect(b"first\r\nsecond").await;
    assert_eq!(lines, vec!["first".to_string(), "second".to_string()]);
}

#[tokio::test]
async fn stderr_lines_survive_a_bad_byte() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    forward_stderr(&b"Analyzing: \"Cr\xe8me\"\nmodel loaded\n"[..], tx).await;
    let mut logs = Vec::new();
    while let Ok(SupervisorEvent::Log(line)) = rx.try_recv() {
        logs.push(line);
    }
    assert_eq!(
        logs,
        vec![
            "Analyzing: \"Cr\u{fffd}me\"".to_string(),
            "model loaded".to_string()
        ]
    );
}

#[test]
fn display_shows_program_and_args() {
    let command = WorkerCommand::new("python3").arg("-u").arg("backend/app.py");
    assert_eq!(command.to_string(), "python3 -u backend/app.py");
}
