use std::io::{self, BufRead};

use tokio::sync::mpsc;

/// Lines typed on stdin. Reading happens on a dedicated thread so the
/// interfaces can `select!` over input and server traffic.
pub struct Console {
    lines: mpsc::Receiver<String>,
}

impl Console {
    pub fn spawn() -> Self {
        let (lines_tx, lines_rx) = mpsc::channel(16);

        std::thread::spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if lines_tx.blocking_send(line).is_err() {
                    break;
                }
            }
        });

        Self { lines: lines_rx }
    }

    /// `None` once stdin is closed.
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }
}
