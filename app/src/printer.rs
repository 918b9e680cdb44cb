//! Stdout subscriber: one JSON object per broadcast event.

use std::io::{self, Write};
use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;
use serde_json::{json, Value};
use tracing::{debug, warn};

use livefeed_ipc::SubscriberMessage;

/// Render one message as a JSON line body.
pub fn render(message: &SubscriberMessage) -> Value {
    json!({ "event": message.event, "payload": message.payload })
}

/// Print messages from `rx` until every sender is gone.
///
/// Returns the number of lines written.
pub fn spawn(rx: Receiver<SubscriberMessage>) -> io::Result<JoinHandle<u64>> {
    thread::Builder::new()
        .name("livefeed-stdout".to_string())
        .spawn(move || {
            let mut written = 0;
            let stdout = io::stdout();

            for message in rx {
                let mut out = stdout.lock();
                let result = serde_json::to_writer(&mut out, &render(&message))
                    .map_err(io::Error::from)
                    .and_then(|()| out.write_all(b"\n"))
                    .and_then(|()| out.flush());

                if let Err(e) = result {
                    warn!("Stopping stdout output: {}", e);
                    break;
                }
                written += 1;
            }

            debug!(written, "Stdout printer finished");
            written
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_wraps_event_and_payload() {
        let line = render(&SubscriberMessage {
            event: "chat".to_string(),
            payload: json!({ "comment": "hi" }),
        });
        assert_eq!(line, json!({ "event": "chat", "payload": { "comment": "hi" } }));
    }

    #[test]
    fn test_printer_exits_when_senders_drop() {
        let (tx, rx) = livefeed_ipc::subscriber_channel();
        let printer = spawn(rx).unwrap();

        tx.send(SubscriberMessage {
            event: "toast".to_string(),
            payload: Value::Null,
        })
        .unwrap();
        drop(tx);

        assert_eq!(printer.join().unwrap(), 1);
    }
}
